//! Audio-device output via rodio.
//!
//! The pump itself has no device dependency; this module adapts it to a
//! rodio [`Source`] and owns the stream/sink pair.

use std::time::Duration;

use rodio::{ChannelCount, OutputStream, OutputStreamBuilder, SampleRate, Sink, Source};

use super::AnyPump;
use crate::errors::PlayerError;

/// Handle to the default audio device. Dropping it stops playback.
pub struct AudioOutput {
    /// not read, but the stream must stay alive for the sink to play
    _stream: OutputStream,
    sink: Sink,
}

impl std::fmt::Debug for AudioOutput {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioOutput")
            .field("queued", &self.sink.len())
            .finish_non_exhaustive()
    }
}

impl AudioOutput {
    /// Opens the default output stream, paused.
    ///
    /// # Errors
    ///
    /// Propagates the audio subsystem's status verbatim.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn open() -> Result<Self, PlayerError> {
        let stream = OutputStreamBuilder::open_default_stream()?;
        let sink = Sink::connect_new(stream.mixer());
        sink.pause();
        Ok(Self {
            _stream: stream,
            sink,
        })
    }

    pub(crate) fn append(&self, source: PumpSource) {
        self.sink.append(source);
    }

    pub(crate) fn resume(&self) {
        self.sink.play();
    }

    pub(crate) fn pause(&self) {
        self.sink.pause();
    }

    /// Empties the queue, discarding any primed buffers.
    pub(crate) fn flush(&self) {
        self.sink.stop();
    }

    /// Whether the queue has drained (e.g. non-loop playback finished).
    #[must_use]
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.sink.empty()
    }
}

/// Streams a pump's buffers to rodio, converting to `f32` on the way out.
#[derive(Debug)]
pub struct PumpSource {
    pump: AnyPump,
    channels: ChannelCount,
    sample_rate: SampleRate,
    staged: Vec<f32>,
    position: usize,
}

impl PumpSource {
    pub(crate) fn new(pump: AnyPump, channels: u16, sample_rate: u32) -> Self {
        Self {
            pump,
            channels: channels.max(1),
            sample_rate,
            staged: Vec::new(),
            position: 0,
        }
    }
}

impl Iterator for PumpSource {
    type Item = f32;

    #[inline]
    fn next(&mut self) -> Option<f32> {
        if self.position >= self.staged.len() {
            if self.pump.is_finished() {
                return None;
            }
            self.staged.clear();
            self.pump.refill_into_f32(&mut self.staged);
            self.position = 0;
            if self.staged.is_empty() {
                return None;
            }
        }
        let sample = self.staged[self.position];
        self.position += 1;
        Some(sample)
    }
}

impl Source for PumpSource {
    #[inline]
    fn current_span_len(&self) -> Option<usize> {
        None
    }

    #[inline]
    fn channels(&self) -> ChannelCount {
        self.channels
    }

    #[inline]
    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    #[inline]
    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{Player, WrapMode};
    use rstest::rstest;

    #[rstest]
    #[case(vec![0.5f32; 32], 16)]
    #[case(vec![-1.0f32; 8], 4)]
    fn source_streams_the_loaded_samples(#[case] data: Vec<f32>, #[case] frames: i64) {
        let mut player = Player::new(WrapMode::Strict);
        let expected = data.clone();
        player.load(data, 2, 44100);
        player.set_loop_playback(false);
        let pump = player.make_pump().unwrap();
        let mut source = PumpSource::new(pump, 2, 44100);
        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 44100);
        assert_eq!(player.num_frames(), frames);
        let streamed: Vec<f32> = source.by_ref().take(expected.len()).collect();
        assert_eq!(streamed, expected);
        // after the data, silence until the pump reports finished
        assert!(source.take(65536).all(|s| s == 0.0));
    }
}
