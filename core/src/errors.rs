use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("failed to open the audio output stream: {0}")]
    Stream(#[from] rodio::StreamError),
    #[error("no audio is loaded")]
    NoAudio,
    #[error("loop end {end} must come after loop start {start}")]
    InvalidLoopPoints { start: i64, end: i64 },
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not locate a configuration directory for looplab")]
    NoConfigDir,
}
