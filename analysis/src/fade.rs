//! Preliminary fade detection and removal.

use crate::AudioDataFloat;

/// Detects an ending fade-out in the track, returning the reduced-frame
/// index where the fade begins.
///
/// Not implemented yet: always returns `None`, so fade truncation is a no-op
/// even when `use_fade_detection` is set.
// TODO: fit a decaying envelope to the tail's RMS and return the knee point.
#[must_use]
#[inline]
pub fn detect_fade(_audio: &AudioDataFloat) -> Option<usize> {
    None
}
