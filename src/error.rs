use thiserror::Error;

use crate::dify::DifyError;

#[derive(Debug, Error)]
pub enum BriefrunError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error ({context}): {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Upstream error: {0}")]
    Upstream(#[from] DifyError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BriefrunError {
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// Message safe to hand back through a control surface.
    ///
    /// Caller mistakes are echoed verbatim; anything that would leak paths,
    /// upstream bodies or configuration detail is replaced with a generic
    /// message. The full error is expected to have been logged already.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidArgument(_) | Self::Conflict(_) | Self::NotFound(_) => self.to_string(),
            Self::Storage { .. } => "A storage error occurred. Check the logs.".to_string(),
            Self::Upstream(e) if e.is_retryable() => {
                "The upstream service is unavailable. Try again later.".to_string()
            }
            Self::Upstream(_) => "The upstream service rejected the request.".to_string(),
            Self::Config(_) | Self::Internal(_) => {
                "An internal error occurred. Check the logs.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, BriefrunError>;
