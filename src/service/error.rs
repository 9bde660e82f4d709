use std::fmt;

/// Failures surfaced through the service command surface.
#[derive(Debug)]
pub enum ServiceError {
    /// No step counter on this device. Terminal until conditions change.
    CapabilityUnavailable { reason: String },
    AlreadyRunning,
    /// A store operation failed after all retries.
    Persistence { operation: &'static str, source: anyhow::Error },
}

impl ServiceError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceError::CapabilityUnavailable { .. })
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::CapabilityUnavailable { reason } => {
                write!(f, "step counter unavailable: {reason}")
            }
            ServiceError::AlreadyRunning => write!(f, "step service already running"),
            ServiceError::Persistence { operation, source } => {
                write!(f, "baseline {operation} failed: {source:#}")
            }
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Persistence { source, .. } => {
                let source: &(dyn std::error::Error + 'static) = source.as_ref();
                Some(source)
            }
            _ => None,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
