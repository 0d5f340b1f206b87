use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinderError {
    #[error("audio must have 1 or 2 channels, got {0}")]
    UnsupportedChannelLayout(u16),
    #[error("audio is empty")]
    EmptySamples,
    #[error("{samples} interleaved samples cannot be split into {channels} channels")]
    RaggedInterleave { samples: usize, channels: u16 },
    #[error("failed to allocate a {0}-element scratch buffer")]
    OutOfMemory(usize),
    #[error("loudness engine failure: {0}")]
    Loudness(String),
    #[error("analysis was cancelled")]
    Cancelled,
}

pub type FinderResult<T> = Result<T, FinderError>;

/// Allocates a zeroed scratch vector, surfacing allocation failure instead of
/// aborting the process.
pub(crate) fn scratch<T: Clone + Default>(len: usize) -> FinderResult<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| FinderError::OutOfMemory(len))?;
    v.resize(len, T::default());
    Ok(v)
}
