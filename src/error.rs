use std::time::Duration;

use reqwest::StatusCode;

/// Everything that can go wrong in a login+submit cycle.
///
/// Retry policy is decided by the owner of the loop, not by the site of the
/// failure: `LoginSession` retries only captcha-class errors, the schedule
/// runner retries everything else up to its attempt bound. `Cancelled` is
/// checked before any retry classification and is never retried.
#[derive(Debug, thiserror::Error)]
pub enum PunchError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("read: {0}")]
    Read(#[from] std::io::Error),

    #[error("markup: cannot parse tag: {0:?}")]
    MalformedMarkup(String),

    #[error("data: {0}")]
    DataParse(String),

    #[error("data: expected {expected} values, found {found}")]
    Incomplete { expected: usize, found: usize },

    #[error("body: unsupported content encoding: {0:?}")]
    UnsupportedEncoding(String),

    #[error("captcha: server rejected the code")]
    CaptchaMismatch,

    #[error("captcha: cannot recognize image")]
    CannotRecognizeCaptcha,

    #[error("login: rejected by server: {0}")]
    LoginRejected(String),

    #[error("session cookie not found: {0}")]
    SessionCookieMissing(String),

    #[error("form: incomplete: {0}")]
    IncompleteForm(String),

    #[error("submit: status {0}")]
    SubmitStatus(StatusCode),

    #[error("submit: unrecognized server reply: {0:?}")]
    UnknownSubmissionResult(String),

    #[error("punch timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("maximum attempts exceeded")]
    MaxAttemptsExceeded,
}

impl PunchError {
    /// Captcha-class failures are the only ones the login session may
    /// retry on its own.
    pub fn is_captcha_retry(&self) -> bool {
        matches!(self, Self::CaptchaMismatch | Self::CannotRecognizeCaptcha)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
