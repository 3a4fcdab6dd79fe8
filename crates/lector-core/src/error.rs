//! Failure taxonomy for synthesis requests.
//!
//! These errors travel through a shared in-flight future to every joined
//! caller, so they are `Clone` and carry messages rather than sources.

use thiserror::Error;

/// Errors a synthesis request can resolve with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    /// The credential is missing or was rejected.
    #[error("authentication failed{}", suffix(.message))]
    Auth { message: Option<String> },

    /// The service is throttling us.
    #[error("rate limited{}", suffix(.message))]
    RateLimited { message: Option<String> },

    /// The service answered with a failure status, or the task died.
    #[error("synthesis service error{}{}", status_suffix(.status), suffix(.message))]
    Service {
        status: Option<u16>,
        message: Option<String>,
    },

    /// No response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The request was superseded or its cache was cleared. Never user-visible.
    #[error("synthesis request cancelled")]
    Cancelled,

    /// No segment at this index in the loaded document. Never user-visible.
    #[error("segment {index} out of range (document has {len})")]
    OutOfRange { index: usize, len: usize },
}

fn suffix(message: &Option<String>) -> String {
    message.as_ref().map(|m| format!(": {m}")).unwrap_or_default()
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl SynthesisError {
    /// Classify an HTTP failure status, keeping the server's own message.
    pub fn from_status(status: u16, message: Option<String>) -> Self {
        let message = message.filter(|m| !m.trim().is_empty());
        match status {
            401 | 403 => SynthesisError::Auth { message },
            429 => SynthesisError::RateLimited { message },
            _ => SynthesisError::Service {
                status: Some(status),
                message,
            },
        }
    }

    pub fn missing_credential() -> Self {
        SynthesisError::Auth {
            message: Some("API key missing".into()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SynthesisError::Cancelled)
    }

    /// Failures that are swallowed rather than shown to the user.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            SynthesisError::Cancelled | SynthesisError::OutOfRange { .. }
        )
    }

    /// Message for the user-visible error slot. `None` for silent failures.
    ///
    /// A message supplied by the service wins over the generic text.
    pub fn user_message(&self) -> Option<String> {
        let text = match self {
            SynthesisError::Cancelled | SynthesisError::OutOfRange { .. } => return None,
            SynthesisError::Auth { message: Some(m) }
            | SynthesisError::RateLimited { message: Some(m) }
            | SynthesisError::Service {
                message: Some(m), ..
            } => m.clone(),
            SynthesisError::Auth { message: None } => {
                "Invalid API Key: Access denied. Please enter a valid OpenAI API Key in Settings."
                    .into()
            }
            SynthesisError::RateLimited { message: None } => {
                "Too Many Requests: You are being rate-limited by OpenAI. Please try again in a minute."
                    .into()
            }
            SynthesisError::Service {
                status: Some(500),
                message: None,
            } => "Server Error: The speech service encountered an issue. Please try again.".into(),
            SynthesisError::Service {
                status: Some(502..=504),
                message: None,
            } => {
                "Connection Error: Unable to reach OpenAI services. Please check your internet or API status."
                    .into()
            }
            SynthesisError::Service {
                status: Some(status),
                message: None,
            } => format!("An error occurred ({status}). Please try again."),
            SynthesisError::Service {
                status: None,
                message: None,
            } => "An unexpected error occurred.".into(),
            SynthesisError::Network(_) => {
                "Network Error: No response received. Please check your internet connection.".into()
            }
        };
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            SynthesisError::from_status(401, None),
            SynthesisError::Auth { .. }
        ));
        assert!(matches!(
            SynthesisError::from_status(429, None),
            SynthesisError::RateLimited { .. }
        ));
        assert_eq!(
            SynthesisError::from_status(503, Some("  ".into())),
            SynthesisError::Service {
                status: Some(503),
                message: None
            }
        );
    }

    #[test]
    fn cancellation_and_range_are_silent() {
        assert!(SynthesisError::Cancelled.is_cancelled());
        assert!(SynthesisError::Cancelled.is_silent());
        assert_eq!(SynthesisError::Cancelled.user_message(), None);

        let range = SynthesisError::OutOfRange { index: 4, len: 2 };
        assert!(range.is_silent());
        assert!(!range.is_cancelled());
        assert_eq!(range.user_message(), None);
        assert!(!SynthesisError::from_status(401, None).is_silent());
    }

    #[test]
    fn server_message_takes_priority() {
        let err = SynthesisError::from_status(500, Some("quota exceeded".into()));
        assert_eq!(err.user_message().as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn generic_messages_by_kind() {
        let auth = SynthesisError::from_status(401, None).user_message().unwrap();
        assert!(auth.starts_with("Invalid API Key"));

        let limited = SynthesisError::from_status(429, None).user_message().unwrap();
        assert!(limited.starts_with("Too Many Requests"));

        let gateway = SynthesisError::from_status(502, None).user_message().unwrap();
        assert!(gateway.starts_with("Connection Error"));

        let other = SynthesisError::from_status(418, None).user_message().unwrap();
        assert_eq!(other, "An error occurred (418). Please try again.");
    }

    #[test]
    fn display_includes_detail() {
        let err = SynthesisError::Service {
            status: Some(500),
            message: Some("boom".into()),
        };
        assert_eq!(err.to_string(), "synthesis service error (500): boom");
        assert_eq!(
            SynthesisError::missing_credential().to_string(),
            "authentication failed: API key missing"
        );
    }
}
