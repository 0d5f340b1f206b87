//! Gapless loop playback.
//!
//! A [`Player`] owns the loaded PCM, a rotating pool of three fixed-size
//! output buffers, and the playback counters; nothing lives in process
//! globals. The refill side ([`BufferPump`]) and the application side share
//! a single [`Controls`] block of atomics: the application publishes loop
//! points and the volume multiplier with release stores, the pump snapshots
//! them with acquire loads once per refill and never locks or allocates.
//!
//! Sample counters are in *samples*, not frames: they advance by the channel
//! count per frame, exactly like the stream the buffers carry. The public
//! API converts from frames on the way in and back on the way out.

pub mod output;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;

use crate::errors::PlayerError;

/// Number of output buffers in rotation.
pub const NUM_BUFFERS: usize = 3;
/// Size of each output buffer, in bytes.
pub const BUFFER_SIZE: usize = 16384;

/// The comparison used when deciding whether the sample counter has passed
/// the loop end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapMode {
    /// Wrap once the counter is strictly past the loop end.
    #[default]
    Strict,
    /// Wrap as soon as the counter reaches the loop end.
    Inclusive,
}

/// A sample type the pump can fill buffers with. The volume scaling matches
/// the original integer behavior: multiply in double precision, truncate
/// back toward zero.
pub trait LoopSample: Copy + Default + Send + Sync + 'static {
    #[must_use]
    fn scaled(self, volume: f64) -> Self;
    #[must_use]
    fn to_f32(self) -> f32;
}

impl LoopSample for i16 {
    #[inline]
    fn scaled(self, volume: f64) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let scaled = (f64::from(self) * volume) as Self;
        scaled
    }

    #[inline]
    fn to_f32(self) -> f32 {
        f32::from(self) / 32_768.0
    }
}

impl LoopSample for i32 {
    #[inline]
    fn scaled(self, volume: f64) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let scaled = (f64::from(self) * volume) as Self;
        scaled
    }

    #[inline]
    fn to_f32(self) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let value = self as f32 / 2_147_483_648.0;
        value
    }
}

impl LoopSample for f32 {
    #[inline]
    fn scaled(self, volume: f64) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let scaled = (f64::from(self) * volume) as Self;
        scaled
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }
}

/// Owned interleaved PCM, one variant per sample format; the playback twin
/// of `looplab_analysis::PcmSamples`.
#[derive(Debug, Clone)]
pub enum PcmBuffer {
    Int16(Arc<[i16]>),
    Int32(Arc<[i32]>),
    Float(Arc<[f32]>),
}

impl PcmBuffer {
    /// Total number of samples across all channels.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Self::Int16(data) => data.len(),
            Self::Int32(data) => data.len(),
            Self::Float(data) => data.len(),
        }
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<i16>> for PcmBuffer {
    #[inline]
    fn from(data: Vec<i16>) -> Self {
        Self::Int16(data.into())
    }
}

impl From<Vec<i32>> for PcmBuffer {
    #[inline]
    fn from(data: Vec<i32>) -> Self {
        Self::Int32(data.into())
    }
}

impl From<Vec<f32>> for PcmBuffer {
    #[inline]
    fn from(data: Vec<f32>) -> Self {
        Self::Float(data.into())
    }
}

/// Playback state shared between the application side (single writer per
/// field) and the refill side (single reader).
#[derive(Debug)]
pub struct Controls {
    sample_counter: AtomicI64,
    loop_start: AtomicI64,
    loop_end: AtomicI64,
    loop_playback: AtomicBool,
    volume_bits: AtomicU64,
    wrap_mode: AtomicU8,
    finished: AtomicBool,
}

impl Controls {
    fn new(wrap_mode: WrapMode) -> Self {
        Self {
            sample_counter: AtomicI64::new(0),
            loop_start: AtomicI64::new(0),
            loop_end: AtomicI64::new(0),
            loop_playback: AtomicBool::new(true),
            volume_bits: AtomicU64::new(1.0f64.to_bits()),
            wrap_mode: AtomicU8::new(wrap_mode as u8),
            finished: AtomicBool::new(false),
        }
    }

    fn wrap_mode(&self) -> WrapMode {
        if self.wrap_mode.load(Ordering::Acquire) == WrapMode::Inclusive as u8 {
            WrapMode::Inclusive
        } else {
            WrapMode::Strict
        }
    }

    fn volume(&self) -> f64 {
        f64::from_bits(self.volume_bits.load(Ordering::Acquire))
    }
}

/// Fills fixed-size output buffers from loaded PCM, wrapping the sample
/// counter at the loop end. Generic over the sample format; the fill loop is
/// monomorphized per format.
#[derive(Debug)]
pub struct BufferPump<S> {
    data: Arc<[S]>,
    controls: Arc<Controls>,
    buffers: [Box<[S]>; NUM_BUFFERS],
    next_buffer: usize,
}

impl<S: LoopSample> BufferPump<S> {
    fn new(data: Arc<[S]>, controls: Arc<Controls>) -> Self {
        let samples = BUFFER_SIZE / size_of::<S>();
        Self {
            data,
            controls,
            buffers: std::array::from_fn(|_| vec![S::default(); samples].into_boxed_slice()),
            next_buffer: 0,
        }
    }

    /// Samples per output buffer for this format.
    #[must_use]
    #[inline]
    pub const fn samples_per_buffer(&self) -> usize {
        BUFFER_SIZE / size_of::<S>()
    }

    /// Fills the next buffer in rotation and returns it.
    ///
    /// Loop points, volume, and the wrap mode are snapshotted once per
    /// refill. Past the end of data the buffer is padded with silence; in
    /// loop mode the counter wraps back to the loop start instead.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn refill(&mut self) -> &[S] {
        let index = self.next_buffer;
        self.next_buffer = (self.next_buffer + 1) % NUM_BUFFERS;

        let controls = &*self.controls;
        let mut counter = controls.sample_counter.load(Ordering::Acquire);
        let loop_start = controls.loop_start.load(Ordering::Acquire);
        let loop_end = controls.loop_end.load(Ordering::Acquire);
        let loop_playback = controls.loop_playback.load(Ordering::Acquire);
        let volume = controls.volume();
        let wrap_mode = controls.wrap_mode();
        let mut finished = controls.finished.load(Ordering::Acquire);

        #[allow(clippy::cast_possible_wrap)]
        let num_samples = self.data.len() as i64;
        for slot in &mut self.buffers[index] {
            if finished {
                *slot = S::default();
                continue;
            }
            if counter >= num_samples || counter < 0 {
                *slot = S::default();
            } else {
                #[allow(clippy::cast_sign_loss)]
                let sample = self.data[counter as usize];
                *slot = sample.scaled(volume);
                counter += 1;
            }
            let past_loop_end = loop_playback
                && loop_end > 0
                && match wrap_mode {
                    WrapMode::Strict => counter > loop_end,
                    WrapMode::Inclusive => counter >= loop_end,
                };
            if past_loop_end {
                counter = loop_start;
            } else if counter >= num_samples {
                if loop_playback {
                    counter = loop_start;
                } else {
                    counter = 0;
                    finished = true;
                }
            }
        }

        controls.sample_counter.store(counter, Ordering::Release);
        if finished {
            controls.finished.store(true, Ordering::Release);
        }
        &self.buffers[index]
    }

    /// Whether non-loop playback has run off the end of the data.
    #[must_use]
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.controls.finished.load(Ordering::Acquire)
    }
}

/// A [`BufferPump`] over whichever sample format is loaded.
#[derive(Debug)]
pub enum AnyPump {
    Int16(BufferPump<i16>),
    Int32(BufferPump<i32>),
    Float(BufferPump<f32>),
}

impl AnyPump {
    fn new(buffer: &PcmBuffer, controls: Arc<Controls>) -> Self {
        match buffer {
            PcmBuffer::Int16(data) => Self::Int16(BufferPump::new(Arc::clone(data), controls)),
            PcmBuffer::Int32(data) => Self::Int32(BufferPump::new(Arc::clone(data), controls)),
            PcmBuffer::Float(data) => Self::Float(BufferPump::new(Arc::clone(data), controls)),
        }
    }

    /// Refills the next buffer and appends its contents to `out` as f32.
    pub(crate) fn refill_into_f32(&mut self, out: &mut Vec<f32>) {
        match self {
            Self::Int16(pump) => out.extend(pump.refill().iter().map(|s| s.to_f32())),
            Self::Int32(pump) => out.extend(pump.refill().iter().map(|s| s.to_f32())),
            Self::Float(pump) => out.extend(pump.refill().iter().copied()),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        match self {
            Self::Int16(pump) => pump.is_finished(),
            Self::Int32(pump) => pump.is_finished(),
            Self::Float(pump) => pump.is_finished(),
        }
    }
}

/// The loop player. Owns the loaded track, the shared control block, and
/// (once [`connect`](Self::connect)ed) the audio output handle.
#[derive(Debug)]
pub struct Player {
    audio: Option<PcmBuffer>,
    controls: Arc<Controls>,
    channels: u16,
    sample_rate: u32,
    playing: bool,
    paused: bool,
    sample_counter_on_pause: i64,
    output: Option<output::AudioOutput>,
}

impl Player {
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn new(wrap_mode: WrapMode) -> Self {
        Self {
            audio: None,
            controls: Arc::new(Controls::new(wrap_mode)),
            channels: 0,
            sample_rate: 0,
            playing: false,
            paused: false,
            sample_counter_on_pause: -1,
            output: None,
        }
    }

    /// Opens the default audio output. Playback works without this; the pump
    /// can be driven directly, which is how the tests run.
    ///
    /// # Errors
    ///
    /// Propagates the audio subsystem's status verbatim.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn connect(&mut self) -> Result<(), PlayerError> {
        self.output = Some(output::AudioOutput::open()?);
        Ok(())
    }

    /// Loads a track. The sample counter is left untouched, matching the
    /// original engine; call [`stop`](Self::stop) first for a clean start.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn load(&mut self, buffer: impl Into<PcmBuffer>, channels: u16, sample_rate: u32) {
        self.audio = Some(buffer.into());
        self.channels = channels.max(1);
        self.sample_rate = sample_rate;
        self.controls.finished.store(false, Ordering::Release);
        debug!(
            "loaded {} samples, {channels} channels at {sample_rate} Hz",
            self.audio.as_ref().map_or(0, PcmBuffer::len)
        );
    }

    /// A pump over the loaded audio, sharing this player's controls. Tests
    /// and custom outputs drive playback through it.
    ///
    /// # Errors
    ///
    /// Fails if nothing is loaded.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn make_pump(&self) -> Result<AnyPump, PlayerError> {
        let buffer = self.audio.as_ref().ok_or(PlayerError::NoAudio)?;
        Ok(AnyPump::new(buffer, Arc::clone(&self.controls)))
    }

    /// Sets the loop points, in frames. An end of 0 disables end-of-loop
    /// wrapping.
    ///
    /// # Errors
    ///
    /// Rejects an end at or before the start (unless the end is 0).
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn set_loop_points(&self, start_frame: i64, end_frame: i64) -> Result<(), PlayerError> {
        if end_frame > 0 && end_frame <= start_frame {
            return Err(PlayerError::InvalidLoopPoints {
                start: start_frame,
                end: end_frame,
            });
        }
        let channels = i64::from(self.channels.max(1));
        self.controls
            .loop_start
            .store(start_frame * channels, Ordering::Release);
        self.controls
            .loop_end
            .store(end_frame * channels, Ordering::Release);
        Ok(())
    }

    /// Moves the playhead, in frames.
    #[inline]
    pub fn set_sample_counter(&self, frame: i64) {
        let channels = i64::from(self.channels.max(1));
        self.controls
            .sample_counter
            .store(frame * channels, Ordering::Release);
    }

    #[inline]
    pub fn set_volume_multiplier(&self, volume: f64) {
        self.controls
            .volume_bits
            .store(volume.to_bits(), Ordering::Release);
    }

    #[inline]
    pub fn set_loop_playback(&self, enabled: bool) {
        self.controls.loop_playback.store(enabled, Ordering::Release);
    }

    #[inline]
    pub fn set_wrap_mode(&self, mode: WrapMode) {
        self.controls.wrap_mode.store(mode as u8, Ordering::Release);
    }

    /// Starts or resumes playback.
    ///
    /// Fresh audio is primed unless playback is resuming from a pause with
    /// the playhead exactly where it was left; in that case the already
    /// queued buffers are still valid. If the playhead moved during the
    /// pause the queue is flushed first.
    ///
    /// # Errors
    ///
    /// Fails if nothing is loaded.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn play(&mut self) -> Result<(), PlayerError> {
        let buffer = self.audio.as_ref().ok_or(PlayerError::NoAudio)?;
        let counter = self.controls.sample_counter.load(Ordering::Acquire);
        let needs_prime = !self.paused || counter != self.sample_counter_on_pause;
        if let Some(out) = &self.output {
            if needs_prime {
                out.flush();
                let pump = AnyPump::new(buffer, Arc::clone(&self.controls));
                out.append(output::PumpSource::new(pump, self.channels, self.sample_rate));
            }
            out.resume();
        }
        self.playing = true;
        self.paused = false;
        self.sample_counter_on_pause = -1;
        Ok(())
    }

    /// Pauses playback, remembering where the playhead was so an unmoved
    /// resume can skip re-priming.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn pause(&mut self) {
        if let Some(out) = &self.output {
            out.pause();
        }
        self.playing = false;
        self.paused = true;
        self.sample_counter_on_pause = self.controls.sample_counter.load(Ordering::Acquire);
    }

    /// Stops playback, flushes any queued audio, and rewinds to the start.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn stop(&mut self) {
        if let Some(out) = &self.output {
            out.flush();
        }
        self.playing = false;
        self.paused = false;
        self.sample_counter_on_pause = -1;
        self.controls.sample_counter.store(0, Ordering::Release);
        self.controls.finished.store(false, Ordering::Release);
    }

    #[must_use]
    #[inline]
    pub const fn is_playing(&self) -> bool {
        self.playing
    }

    #[must_use]
    #[inline]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether non-loop playback has reached the end of the track.
    #[must_use]
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.controls.finished.load(Ordering::Acquire)
    }

    /// The playhead position, in frames.
    #[must_use]
    #[inline]
    pub fn sample_counter(&self) -> i64 {
        self.controls.sample_counter.load(Ordering::Acquire) / i64::from(self.channels.max(1))
    }

    #[must_use]
    #[inline]
    pub fn loop_start(&self) -> i64 {
        self.controls.loop_start.load(Ordering::Acquire) / i64::from(self.channels.max(1))
    }

    #[must_use]
    #[inline]
    pub fn loop_end(&self) -> i64 {
        self.controls.loop_end.load(Ordering::Acquire) / i64::from(self.channels.max(1))
    }

    #[must_use]
    #[inline]
    pub fn loop_playback(&self) -> bool {
        self.controls.loop_playback.load(Ordering::Acquire)
    }

    /// Number of frames in the loaded track, 0 if none.
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn num_frames(&self) -> i64 {
        #[allow(clippy::cast_possible_wrap)]
        let samples = self.audio.as_ref().map_or(0, PcmBuffer::len) as i64;
        samples / i64::from(self.channels.max(1))
    }
}
