//! Decodes an audio file to interleaved float PCM at its native sample rate.
//!
//! The analysis core never parses containers; this is the front-end's job,
//! done with rodio's decoder. Channels and framerate are preserved (the
//! finder reduces the framerate itself).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context};
use rodio::decoder::DecoderBuilder;
use rodio::Source;

pub struct DecodedTrack {
    /// Interleaved samples in `[-1, 1]`.
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

pub fn decode(path: &Path) -> anyhow::Result<DecodedTrack> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let byte_len = file.metadata()?.len();
    let source = DecoderBuilder::new()
        .with_data(BufReader::new(file))
        .with_byte_len(byte_len)
        .with_gapless(true)
        .build()
        .with_context(|| format!("failed to decode {}", path.display()))?;

    let channels = source.channels();
    let sample_rate = source.sample_rate();
    if channels == 0 || channels > 2 {
        bail!("{} has {channels} channels; only mono and stereo are supported", path.display());
    }

    let samples: Vec<f32> = source.collect();
    if samples.is_empty() {
        bail!("{} decoded to zero samples", path.display());
    }
    log::debug!(
        "decoded {}: {} samples, {channels} channels at {sample_rate} Hz",
        path.display(),
        samples.len()
    );
    Ok(DecodedTrack {
        samples,
        channels,
        sample_rate,
    })
}
