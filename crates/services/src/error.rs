use pointroom_protocol::{ErrorKind, ProtocolError};

use crate::dao::DaoError;

/// Failures of a room action. Everything but `TransientIo` and `Internal` is
/// raised before shared state is touched.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Authorization(String),
    #[error("Join or create a room first")]
    NotAuthenticated,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Storage unavailable: {0}")]
    TransientIo(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::Authorization(_) => ErrorKind::Authorization,
            ServiceError::NotAuthenticated => ErrorKind::NotAuthenticated,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Conflict(_) => ErrorKind::Conflict,
            ServiceError::TransientIo(_) => ErrorKind::TransientIo,
            ServiceError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Caused by the caller rather than the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            ServiceError::TransientIo(_) | ServiceError::Internal(_)
        )
    }

    pub(crate) fn admin_only(action: &str) -> Self {
        ServiceError::Authorization(format!("Only the host or a facilitator can {action}"))
    }

    pub(crate) fn host_only(action: &str) -> Self {
        ServiceError::Authorization(format!("Only the host can {action}"))
    }
}

impl From<ProtocolError> for ServiceError {
    fn from(e: ProtocolError) -> Self {
        ServiceError::Validation(e.to_string())
    }
}

impl From<DaoError> for ServiceError {
    fn from(e: DaoError) -> Self {
        match e {
            DaoError::NotFound => ServiceError::NotFound("Document not found".to_string()),
            other => ServiceError::TransientIo(other.to_string()),
        }
    }
}
