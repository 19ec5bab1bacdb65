use reqwest::StatusCode;
use thiserror::Error;

/// Failures raised by the samplers.
///
/// `Cancelled` is a cooperative stop, not a failure: the orchestrator swallows
/// it. Inside a throughput lane every other variant is transient and the lane
/// simply retries; outside a lane it ends the run.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid endpoint `{url}`: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response status {0}")]
    Status(StatusCode),
}

impl ProbeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProbeError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cancelled_is_cancellation() {
        assert!(ProbeError::Cancelled.is_cancelled());
        assert!(!ProbeError::Status(StatusCode::BAD_GATEWAY).is_cancelled());
        let invalid = ProbeError::InvalidEndpoint {
            url: "x".into(),
            reason: "relative URL without a base".into(),
        };
        assert!(!invalid.is_cancelled());
        assert_eq!(
            invalid.to_string(),
            "invalid endpoint `x`: relative URL without a base"
        );
    }
}
