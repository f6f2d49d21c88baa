use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The remote end answered with a non-success status code.
    #[error("HTTP status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Status code carried by a classified transport failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_for_http_errors() {
        let http = BridgeError::Http {
            status: 404,
            message: "Not Found".to_string(),
        };
        assert_eq!(http.status(), Some(404));
        assert_eq!(http.to_string(), "HTTP status 404: Not Found");

        let other = BridgeError::OperationFailed("boom".to_string());
        assert_eq!(other.status(), None);
    }
}
