use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum StreamerError {
    StringError(String),
    EmptyPath,
    BufferTooSmall { buffer_size: u64, read_size: u64 },
    AlreadyQueued,
    EmptyStack,
    IoError(Arc<std::io::Error>),
    JsonError(Arc<serde_json::Error>),
}

impl std::error::Error for StreamerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            StreamerError::StringError(_) => None,
            StreamerError::EmptyPath => None,
            StreamerError::BufferTooSmall { .. } => None,
            StreamerError::AlreadyQueued => None,
            StreamerError::EmptyStack => None,
            StreamerError::IoError(ref e) => Some(&**e),
            StreamerError::JsonError(ref e) => Some(&**e),
        }
    }
}

impl core::fmt::Display for StreamerError {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match *self {
            StreamerError::StringError(ref e) => e.fmt(fmt),
            StreamerError::EmptyPath => "A read requires a non-empty path".fmt(fmt),
            StreamerError::BufferTooSmall {
                buffer_size,
                read_size,
            } => write!(
                fmt,
                "Output buffer of {} bytes can't hold a read of {} bytes",
                buffer_size, read_size
            ),
            StreamerError::AlreadyQueued => "Request was already queued".fmt(fmt),
            StreamerError::EmptyStack => "Stream stack has no entries".fmt(fmt),
            StreamerError::IoError(ref e) => e.fmt(fmt),
            StreamerError::JsonError(ref e) => e.fmt(fmt),
        }
    }
}

impl From<&str> for StreamerError {
    fn from(str: &str) -> Self {
        StreamerError::StringError(str.to_string())
    }
}

impl From<String> for StreamerError {
    fn from(string: String) -> Self {
        StreamerError::StringError(string)
    }
}

impl From<std::io::Error> for StreamerError {
    fn from(error: std::io::Error) -> Self {
        StreamerError::IoError(Arc::new(error))
    }
}

impl From<serde_json::Error> for StreamerError {
    fn from(error: serde_json::Error) -> Self {
        StreamerError::JsonError(Arc::new(error))
    }
}

pub type StreamerResult<T> = Result<T, StreamerError>;
