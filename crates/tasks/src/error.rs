use std::fmt;

use encoder::EncoderError;
use spans::SpanError;

#[derive(Debug)]
pub enum TaskError {
    Io(std::io::Error),
    ConfigFormat(String),
    Validation(Vec<String>),
    Initialization(String),
    Data(String),
    Span(SpanError),
    Encoder(EncoderError),
    Runtime(String),
}

impl TaskError {
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation(messages)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Io(err) => write!(f, "failed to read input: {}", err),
            TaskError::ConfigFormat(err) => write!(f, "failed to parse config: {}", err),
            TaskError::Validation(messages) => {
                write!(f, "invalid configuration: {}", messages.join("; "))
            }
            TaskError::Initialization(msg) => write!(f, "probe initialization failed: {}", msg),
            TaskError::Data(msg) => write!(f, "invalid data: {}", msg),
            TaskError::Span(err) => write!(f, "span error: {}", err),
            TaskError::Encoder(err) => write!(f, "encoder error: {}", err),
            TaskError::Runtime(msg) => write!(f, "probe forward failed: {}", msg),
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TaskError::Io(err) => Some(err),
            TaskError::Span(err) => Some(err),
            TaskError::Encoder(err) => Some(err),
            TaskError::ConfigFormat(_)
            | TaskError::Validation(_)
            | TaskError::Initialization(_)
            | TaskError::Data(_)
            | TaskError::Runtime(_) => None,
        }
    }
}

impl From<std::io::Error> for TaskError {
    fn from(value: std::io::Error) -> Self {
        TaskError::Io(value)
    }
}

impl From<toml::de::Error> for TaskError {
    fn from(value: toml::de::Error) -> Self {
        TaskError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(value: serde_json::Error) -> Self {
        TaskError::ConfigFormat(value.to_string())
    }
}

impl From<SpanError> for TaskError {
    fn from(value: SpanError) -> Self {
        TaskError::Span(value)
    }
}

impl From<EncoderError> for TaskError {
    fn from(value: EncoderError) -> Self {
        TaskError::Encoder(value)
    }
}

impl From<candle_core::Error> for TaskError {
    fn from(value: candle_core::Error) -> Self {
        TaskError::Runtime(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;
