use thiserror::Error;

/// Failures seen by an API caller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server does not know the job (unknown or evicted ID).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Connection failure, timeout, rate limit or 5xx. Worth retrying.
    #[error("Network error: {0}")]
    Network(String),

    /// The server refused the request (4xx other than 404 and 429).
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The response body was not the expected document.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl ClientError {
    /// True for errors a poller should ride out on the next interval.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Network(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_errors_are_transient() {
        assert!(ClientError::Network("reset".into()).is_transient());
        assert!(!ClientError::NotFound("job".into()).is_transient());
        assert!(!ClientError::Decode("eof".into()).is_transient());
        assert!(!ClientError::Rejected {
            status: 400,
            message: "bad".into()
        }
        .is_transient());
    }

    #[test]
    fn test_rejected_display() {
        let err = ClientError::Rejected {
            status: 401,
            message: "API key required".into(),
        };
        assert_eq!(err.to_string(), "Request rejected (401): API key required");
    }
}
