use thiserror::Error;

/// Errors raised by the remote browser session.
///
/// `is_session_lost()` separates "the session is gone, recreate everything"
/// from failures that only affect the current command.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Session is no longer valid: {0}")]
    SessionInvalidated(String),

    #[error("Login failed: {0}")]
    Auth(String),

    #[error("Page element not found: {0}")]
    ElementMissing(String),

    #[error("WebDriver error '{error}': {message}")]
    WebDriver { error: String, message: String },

    #[error("Browser driver unavailable: {0}")]
    Driver(String),

    #[error("Unexpected WebDriver response: {0}")]
    Protocol(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Build the error for a WebDriver `{"error": .., "message": ..}` payload.
    ///
    /// Chrome reports a crashed or closed browser either as `invalid session id`
    /// or as a generic error whose message mentions the deleted session.
    pub fn from_webdriver(error: &str, message: &str) -> Self {
        let lost = error == "invalid session id"
            || message.contains("session deleted")
            || message.contains("disconnected: not connected to DevTools");
        if lost {
            Self::SessionInvalidated(message.to_string())
        } else {
            Self::WebDriver {
                error: error.to_string(),
                message: message.to_string(),
            }
        }
    }

    /// Whether the whole session must be recreated (as opposed to retrying
    /// the command). A refused connection means the driver process died.
    pub fn is_session_lost(&self) -> bool {
        match self {
            RemoteError::SessionInvalidated(_) => true,
            RemoteError::Http(e) => e.is_connect(),
            _ => false,
        }
    }

    /// Login problems are not worth retrying with a fresh browser.
    pub fn is_auth(&self) -> bool {
        matches!(self, RemoteError::Auth(_))
    }
}
