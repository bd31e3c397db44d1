//! Error types for ballot-core

use std::fmt::Write;
use thiserror::Error;

/// What the user can do about a failure.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    pub summary: String,
    /// Fallbacks when `summary` does not help.
    pub otherwise: Vec<String>,
}

impl Remediation {
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            otherwise: Vec::new(),
        }
    }

    #[must_use]
    pub fn or(mut self, step: impl Into<String>) -> Self {
        self.otherwise.push(step.into());
        self
    }

    /// Multi-line hint for stderr.
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut text = format!("hint: {}\n", self.summary);
        for step in &self.otherwise {
            let _ = writeln!(text, "  or: {step}");
        }
        text
    }
}

/// Stable classification used by callers to decide how to present a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The user declined or abandoned an interactive step.
    UserAction,
    /// Network or gateway trouble; a manual re-submission may succeed.
    Transient,
    /// The request or the data returned for it is malformed.
    TerminalData,
    /// Local configuration or filesystem problem.
    Config,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Everything a submission, query or store operation can fail with.
#[derive(Error, Debug)]
pub enum Error {
    /// The signer reported that the user declined to sign
    #[error("signing rejected: {0}")]
    UserRejectedSigning(String),

    /// The gateway refused or failed to broadcast the signed transactions
    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),

    /// The gateway could not be reached or answered with a transport error
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// A typed argument or request field is malformed
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The signer failed for a reason other than user rejection
    #[error("signer error: {0}")]
    Signer(String),

    /// A session did not reach the awaited state in time
    #[error("timed out: {0}")]
    Timeout(String),

    /// A view returned data that does not match its declared shape
    #[error("decode error: {0}")]
    Decode(String),

    /// A view returned a non-ok return code
    #[error("query {function} failed: {code}: {message}")]
    Query {
        function: String,
        code: String,
        message: String,
    },

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("logging setup: {0}")]
    Logging(#[from] crate::logging::LogError),

    /// Session store or registry file access
    #[error("session storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Bucket that picks the CLI exit code.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UserRejectedSigning(_) => ErrorClass::UserAction,
            Self::BroadcastFailed(_)
            | Self::NetworkUnavailable(_)
            | Self::Signer(_)
            | Self::Timeout(_) => ErrorClass::Transient,
            Self::InvalidArguments(_) | Self::Decode(_) | Self::Query { .. } | Self::Json(_) => {
                ErrorClass::TerminalData
            }
            Self::Config(_) | Self::Logging(_) | Self::Io(_) => ErrorClass::Config,
        }
    }

    /// Hint shown under the error, if there is one to give.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::UserRejectedSigning(_) => Some(
                Remediation::new("Submit again and approve the request in your wallet.")
                    .or("Check that the wallet is unlocked and on the right network."),
            ),
            Self::BroadcastFailed(_) => Some(
                Remediation::new("Check the account balance and nonce, then submit again.")
                    .or("A stale nonce usually means another transaction is pending."),
            ),
            Self::NetworkUnavailable(_) => Some(
                Remediation::new("Verify the gateway URL in ballot.toml and retry.")
                    .or("Switch [network].environment to another preset."),
            ),
            Self::InvalidArguments(_) => Some(Remediation::new(
                "Fix the highlighted argument and submit again.",
            )),
            Self::Config(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Make sure the session files under the data directory are writable.")
                    .or("Point [sessions] in ballot.toml at another location."),
            ),
            Self::Timeout(_) => Some(Remediation::new(
                "The transaction may still complete; check again with `ballot status`.",
            )),
            Self::Signer(_)
            | Self::Decode(_)
            | Self::Query { .. }
            | Self::Logging(_)
            | Self::Json(_) => None,
        }
    }
}

/// Problems with `ballot.toml`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} does not exist")]
    Missing(String),

    #[error("cannot read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("not valid TOML: {0}")]
    Syntax(String),

    #[error("{0}")]
    Invalid(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Missing(path) => Remediation::new(format!(
                "Create {path} or point --config / BALLOT_CONFIG at an existing file."
            )),
            Self::Unreadable { path, .. } => {
                Remediation::new(format!("Check that {path} is readable by this user."))
            }
            Self::Syntax(_) => Remediation::new("Fix the TOML syntax in the config file.")
                .or("Remove the file to fall back to built-in defaults."),
            Self::Invalid(_) => Remediation::new("Correct the reported value in the config file."),
        }
    }
}
