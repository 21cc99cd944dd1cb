use thiserror::Error;

/// Errors surfaced by the remote client.
///
/// Retriable transport failures are classified by `is_transient`; the retry
/// handler consults it before burning an attempt. Auth, validation, and
/// not-found conditions surface immediately.
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("no GitHub credential found: {0}")]
    TokenNotFound(String),

    #[error("repository configuration missing: {0}")]
    ConfigNotFound(String),

    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),

    #[error("I/O error talking to GitHub: {0}")]
    Io(#[from] std::io::Error),

    #[error("retry budget exhausted for {operation}: {message}")]
    RetryExhausted { operation: String, message: String },

    #[error("network error: {0}")]
    Network(String),
}

impl GitHubError {
    /// HTTP status of the underlying API error, if there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            GitHubError::Api(octocrab::Error::GitHub { source, .. }) => {
                Some(source.status_code.as_u16())
            }
            _ => None,
        }
    }

    /// Whether retrying could plausibly help. Server errors and secondary
    /// rate limits are transient; 4xx classes other than 429 are not.
    pub fn is_transient(&self) -> bool {
        match self {
            GitHubError::Api(octocrab::Error::GitHub { source, .. }) => {
                let status = source.status_code.as_u16();
                status >= 500 || status == 429 || is_rate_limit_message(&source.message)
            }
            GitHubError::Api(octocrab::Error::Http { .. }) => true,
            GitHubError::Io(_) | GitHubError::Network(_) => true,
            GitHubError::TokenNotFound(_)
            | GitHubError::ConfigNotFound(_)
            | GitHubError::RetryExhausted { .. } => false,
            GitHubError::Api(_) => false,
        }
    }
}

fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("abuse detection")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_transient() {
        let err = GitHubError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn token_errors_are_not_transient() {
        let err = GitHubError::TokenNotFound("missing".to_string());
        assert!(!err.is_transient());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn rate_limit_message_detection() {
        assert!(is_rate_limit_message("API rate limit exceeded for user"));
        assert!(!is_rate_limit_message("Validation Failed"));
    }
}
