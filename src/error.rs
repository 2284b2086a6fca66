//! Error taxonomy for the orchestration engine.
//!
//! Errors raised while driving a task are translated by the orchestrator into
//! a FAILED transition with a sanitized message; validation and concurrency
//! guards surface to the caller synchronously. Vault errors live in
//! [`crate::vault`] and never become task state.

use crate::task::model::{AgentKind, DocumentKind, TaskState};
use thiserror::Error;
use uuid::Uuid;

/// Main error type for orchestration operations
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: TaskState, to: TaskState },

    #[error("Required documents missing: {}", format_kinds(.missing))]
    DocumentsMissing { missing: Vec<DocumentKind> },

    #[error("No agent registered for '{kind}'")]
    AgentNotFound { kind: AgentKind },

    #[error("Agent already registered for '{kind}'")]
    DuplicateAgent { kind: AgentKind },

    #[error("Dispatch already in progress for task {task_id}")]
    DispatchInProgress { task_id: Uuid },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: Uuid },

    #[error("Submission failed ({kind}): {message}")]
    Submission {
        kind: SubmissionFailureKind,
        message: String,
    },

    #[error("Repository error: {message}")]
    Repository { message: String },

    #[error("Audit sink error: {message}")]
    Audit { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Whether a submission failure may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionFailureKind {
    /// Network/timeout class, retried with backoff
    Transient,
    /// Portal rejected the submission, never retried
    Permanent,
}

impl std::fmt::Display for SubmissionFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionFailureKind::Transient => write!(f, "transient"),
            SubmissionFailureKind::Permanent => write!(f, "permanent"),
        }
    }
}

fn format_kinds(kinds: &[DocumentKind]) -> String {
    kinds
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl OrchestrationError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a transient submission error
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::Submission {
            kind: SubmissionFailureKind::Transient,
            message: message.into(),
        }
    }

    /// Create a permanent submission error
    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self::Submission {
            kind: SubmissionFailureKind::Permanent,
            message: message.into(),
        }
    }

    /// Create a repository error
    pub fn repository<S: Into<String>>(message: S) -> Self {
        Self::Repository {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a retry with backoff may resolve this error
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrchestrationError::Submission {
                kind: SubmissionFailureKind::Transient,
                ..
            }
        )
    }
}

/// Sanitize failure messages before they are persisted on a task or logged.
///
/// Redacts secret-looking `key=value` pairs and sensitive file paths, and
/// bounds the message length. Vault plaintext never flows through here, but
/// agent/connector errors may echo credentials.
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    sanitized = regex::Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+")
        .unwrap()
        .replace_all(&sanitized, "${1}=***")
        .to_string();

    sanitized =
        regex::Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
            .unwrap()
            .replace_all(&sanitized, "/***REDACTED***/")
            .to_string();

    // Bound persisted message length
    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let max_content_len = 500 - truncate_suffix.len();
        sanitized = format!("{}{}", &sanitized[..max_content_len], truncate_suffix);
    }

    sanitized
}

/// Result type for orchestration operations
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_constructor() {
        let error = OrchestrationError::validation("title must not be empty");
        assert!(matches!(error, OrchestrationError::Validation { .. }));
        assert_eq!(
            error.to_string(),
            "Validation failed: title must not be empty"
        );
    }

    #[test]
    fn test_transient_is_transient() {
        assert!(OrchestrationError::transient("connection reset").is_transient());
        assert!(!OrchestrationError::permanent("portal rejected form").is_transient());
        assert!(!OrchestrationError::validation("bad input").is_transient());
    }

    #[test]
    fn test_documents_missing_display() {
        let error = OrchestrationError::DocumentsMissing {
            missing: vec![
                DocumentKind::new("avis_imposition"),
                DocumentKind::new("justificatif_domicile"),
            ],
        };
        let rendered = error.to_string();
        assert!(rendered.contains("avis_imposition"));
        assert!(rendered.contains("justificatif_domicile"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let error = OrchestrationError::InvalidTransition {
            from: TaskState::Completed,
            to: TaskState::Pending,
        };
        assert_eq!(error.to_string(), "Invalid transition: completed -> pending");
    }

    #[test]
    fn test_sanitize_redacts_secrets() {
        let sanitized =
            sanitize_error_message("portal auth failed: password=secret123 token=abc456");

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc456"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("token=***"));
    }

    #[test]
    fn test_sanitize_case_insensitive() {
        let sanitized = sanitize_error_message("PASSWORD=hunter2 Token=abc Key=xyz");

        assert!(!sanitized.contains("hunter2"));
        assert!(!sanitized.contains("abc"));
        assert!(!sanitized.contains("xyz"));
    }

    #[test]
    fn test_sanitize_file_paths() {
        let sanitized =
            sanitize_error_message("failed to read /home/user/.ssh/id_rsa during submit");

        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("id_rsa"));
    }

    #[test]
    fn test_sanitize_truncates_long_messages() {
        let sanitized = sanitize_error_message(&"x".repeat(600));

        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_exactly_500_chars_untouched() {
        let message = "x".repeat(500);
        let sanitized = sanitize_error_message(&message);
        assert_eq!(sanitized.len(), 500);
        assert!(!sanitized.contains("truncated"));
    }

    #[test]
    fn test_sanitize_empty_message() {
        assert_eq!(sanitize_error_message(""), "");
    }
}
