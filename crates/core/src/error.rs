//! Error types for the action engine
//!
//! Resolution and confirmation problems are reported to the user and never
//! corrupt the pending action store. Mutation failures carry the store's
//! diagnostics, which are only shown when the debug flag is set.

use thiserror::Error;

use crate::types::Domain;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no {domain} matches {query:?}")]
    ResolutionEmpty { domain: Domain, query: String },

    #[error("confirmation expired")]
    StaleConfirmation,

    #[error("{value:?} is not a legal {field} option")]
    OptionUnmatched { field: String, value: String },

    #[error("selection {index} is not in the list")]
    InvalidPick { index: usize },

    #[error("missing required argument: {0}")]
    MissingArgument(String),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error("presenter failed: {0}")]
    Presentation(#[source] anyhow::Error),
}

/// A failed call to a domain mutator (network or validation error)
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{operation} on {domain} failed: {message}")]
pub struct MutationError {
    pub operation: String,
    pub domain: Domain,
    pub message: String,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub request_id: Option<String>,
}

impl MutationError {
    pub fn new(operation: impl Into<String>, domain: Domain, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            domain,
            message: message.into(),
            status: None,
            code: None,
            request_id: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Text safe to show in chat. Diagnostics only with `debug`.
    pub fn user_message(&self, debug: bool) -> String {
        let mut text = format!("Sorry, I couldn't update the {}.", self.domain.label());
        if !debug {
            return text;
        }
        text.push_str(&format!("\n[debug] {}: {}", self.operation, self.message));
        if let Some(status) = self.status {
            text.push_str(&format!("\nstatus: {}", status));
        }
        if let Some(ref code) = self.code {
            text.push_str(&format!("\ncode: {}", code));
        }
        if let Some(ref request_id) = self.request_id {
            text.push_str(&format!("\nrequest id: {}", request_id));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_is_sanitized_without_debug() {
        let err = MutationError::new("update", Domain::Task, "validation failed: status")
            .with_status(400)
            .with_code("validation_error")
            .with_request_id("req-42");
        let msg = err.user_message(false);
        assert_eq!(msg, "Sorry, I couldn't update the task.");
        assert!(!msg.contains("req-42"));
    }

    #[test]
    fn test_user_message_with_debug_details() {
        let err = MutationError::new("archive", Domain::Idea, "timeout")
            .with_status(504)
            .with_request_id("req-7");
        let msg = err.user_message(true);
        assert!(msg.contains("archive: timeout"));
        assert!(msg.contains("status: 504"));
        assert!(msg.contains("request id: req-7"));
        assert!(!msg.contains("code:"));
    }

    #[test]
    fn test_engine_error_wraps_mutation() {
        let err: EngineError = MutationError::new("create", Domain::Journal, "boom").into();
        assert_eq!(err.to_string(), "create on journal failed: boom");
    }
}
