use thiserror::Error;

#[derive(Error, Debug)]
pub enum BorealError {
    #[error("Unknown modality: {0}")]
    UnknownModality(String),

    #[error("Gain vector length {gains} does not match mode channel count {channels}")]
    GainLengthMismatch { gains: usize, channels: usize },

    #[error("Worker {worker} failed: {source}")]
    Worker {
        worker: usize,
        #[source]
        source: Box<BorealError>,
    },

    #[error("Worker {worker} panicked: {message}")]
    WorkerPanic { worker: usize, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, BorealError>;
