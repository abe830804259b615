// Error types for the dispatch core

use crate::stage::Stage;
use std::sync::Arc;
use thiserror::Error;

/// Status reported for failures the transport bridge cannot classify.
pub const INTERNAL_SERVER_ERROR: u16 = 500;

/// Boxed error raised by application code.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Errors raised by registration, dispatch and the transport bridge.
///
/// A pipeline failure is cloned into every `leave` handler of the request
/// before being returned to the caller.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Unsupported stage: {0}")]
    UnsupportedStage(String),

    #[error("Invalid parameter pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A blocking-stage failure, tagged with the stage that raised it.
    #[error("{source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error("Not Found")]
    NotFound,

    #[error("{0}")]
    Handler(String),

    #[error(transparent)]
    Custom(BoxError),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl Error {
    /// Failure raised by a handler with a plain message.
    pub fn handler(message: impl Into<String>) -> Self {
        Error::Handler(message.into())
    }

    /// Wrap any error type raised by application code.
    pub fn custom<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Custom(Arc::new(err))
    }

    pub(crate) fn at_stage(self, stage: Stage) -> Self {
        match self {
            // Already tagged by a nested pipeline; keep the innermost stage.
            err @ Error::Stage { .. } => err,
            err => Error::Stage {
                stage,
                source: Box::new(err),
            },
        }
    }

    /// The pipeline stage that raised this failure, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The failure as raised by the handler, without the stage tag.
    pub fn cause(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.cause(),
            err => err,
        }
    }

    /// HTTP status the transport bridge reports for this failure.
    pub fn status_code(&self) -> u16 {
        match self.cause() {
            Error::NotFound => crate::NOT_FOUND,
            _ => INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
