use thiserror::Error;

/// Errors that can occur while loading GTFS data or computing predictions.
#[derive(Debug, Error)]
pub enum GtfsError {
    #[error("GTFS parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("ZIP archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Protobuf decode error: {0}")]
    ProtobufError(#[from] prost::DecodeError),

    #[error("Background task failed: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Static GTFS schedule has not been loaded yet")]
    ScheduleNotLoaded,
}
