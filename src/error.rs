//! Error types for the vstore framework
//!
//! Every failure surfaced by the public API maps onto one of the framework
//! error codes. Node replies embedded in error messages are sanitized before
//! they are stored or logged.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical human readable messages for the framework error codes
pub mod messages {
    pub const BASE_DIRECTORY_DOES_NOT_EXIST: &str =
        "The given base directory does not exist. Please create it first.";
    pub const CONFIG_DOWNLOAD_FAILED: &str =
        "Failed to download the configuration from the master node.";
    pub const COPYING_INTO_FRAMEWORK_FAILED: &str =
        "Failed to copy the file into the framework directory.";
    pub const COPIED_FILE_NOT_FOUND: &str = "The copied file could not be found.";
    pub const FILE_ALREADY_EXISTS: &str = "This file is already saved. Why save it twice?";
    pub const PARAMETERS_MUST_NOT_BE_NULL: &str = "Given parameters must not be null or empty!";
    pub const REQUEST_FAILED: &str = "The request to the node failed.";
    pub const RESPONSE_WRONG_STATUS_CODE: &str = "The node replied with a wrong status code.";
    pub const DB_LOCAL_ERROR: &str = "An error occurred while accessing the local database.";
    pub const JSON_PARSING_FAILED: &str = "Failed to parse the JSON reply.";
    pub const MASTERPEER_WRONG_REPLY: &str = "The master node sent an unexpected reply.";
}

/// Framework error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BaseDirectoryDoesNotExist,
    ParametersMustNotBeNull,
    CopyingIntoFrameworkFailed,
    FileNotFound,
    FileAlreadyExists,
    DbLocalError,
    ConfigDownloadFailed,
    ConfigParseError,
    ConfigConnectionFailed,
    RequestFailed,
    ResponseWrongStatusCode,
    JsonParsingFailed,
    MasterpeerWrongReply,
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::BaseDirectoryDoesNotExist => "BASE_DIRECTORY_DOES_NOT_EXIST",
            ErrorCode::ParametersMustNotBeNull => "PARAMETERS_MUST_NOT_BE_NULL",
            ErrorCode::CopyingIntoFrameworkFailed => "COPYING_INTO_FRAMEWORK_FAILED",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::FileAlreadyExists => "FILE_ALREADY_EXISTS",
            ErrorCode::DbLocalError => "DB_LOCAL_ERROR",
            ErrorCode::ConfigDownloadFailed => "CONFIG_DOWNLOAD_FAILED",
            ErrorCode::ConfigParseError => "CONFIG_PARSE_ERROR",
            ErrorCode::ConfigConnectionFailed => "CONFIG_CONNECTION_FAILED",
            ErrorCode::RequestFailed => "REQUEST_FAILED",
            ErrorCode::ResponseWrongStatusCode => "RESPONSE_WRONG_STATUS_CODE",
            ErrorCode::JsonParsingFailed => "JSON_PARSING_FAILED",
            ErrorCode::MasterpeerWrongReply => "MASTERPEER_WRONG_REPLY",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        f.write_str(name)
    }
}

/// Main error type for vstore operations
#[derive(Debug, Error)]
pub enum VStoreError {
    #[error("Base directory does not exist: {path}")]
    BaseDirectoryDoesNotExist { path: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Copying into framework failed: {message}")]
    CopyFailed { message: String },

    #[error("File not found: {message}")]
    FileNotFound { message: String },

    #[error("{}", messages::FILE_ALREADY_EXISTS)]
    FileAlreadyExists { hash: String },

    #[error("Local database error: {message}")]
    Database { message: String },

    #[error("Configuration download failed ({code}): {message}")]
    ConfigDownload { code: ErrorCode, message: String },

    #[error("Request failed: {message}")]
    RequestFailed { message: String },

    #[error("Wrong status code {status} from {url}")]
    WrongStatusCode { status: u16, url: String },

    #[error("Master node sent an unexpected reply: {message}")]
    MasterWrongReply { message: String },

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<sled::Error> for VStoreError {
    fn from(err: sled::Error) -> Self {
        Self::Database {
            message: err.to_string(),
        }
    }
}

impl VStoreError {
    /// Framework error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            VStoreError::BaseDirectoryDoesNotExist { .. } => ErrorCode::BaseDirectoryDoesNotExist,
            VStoreError::InvalidInput { .. } => ErrorCode::ParametersMustNotBeNull,
            VStoreError::CopyFailed { .. } => ErrorCode::CopyingIntoFrameworkFailed,
            VStoreError::FileNotFound { .. } => ErrorCode::FileNotFound,
            VStoreError::FileAlreadyExists { .. } => ErrorCode::FileAlreadyExists,
            VStoreError::Database { .. } => ErrorCode::DbLocalError,
            VStoreError::ConfigDownload { code, .. } => *code,
            VStoreError::RequestFailed { .. } | VStoreError::Http(_) => ErrorCode::RequestFailed,
            VStoreError::WrongStatusCode { .. } => ErrorCode::ResponseWrongStatusCode,
            VStoreError::MasterWrongReply { .. } => ErrorCode::MasterpeerWrongReply,
            VStoreError::Parse { .. } | VStoreError::Json(_) => ErrorCode::JsonParsingFailed,
            VStoreError::Url(_) => ErrorCode::ParametersMustNotBeNull,
            VStoreError::Io(_) | VStoreError::Internal { .. } | VStoreError::Config(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Whether retrying the operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VStoreError::RequestFailed { .. }
                | VStoreError::Http(_)
                | VStoreError::WrongStatusCode { .. }
                | VStoreError::ConfigDownload {
                    code: ErrorCode::ConfigConnectionFailed,
                    ..
                }
        )
    }

    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Error for missing or empty parameters
    pub fn missing_parameters() -> Self {
        Self::invalid_input(messages::PARAMETERS_MUST_NOT_BE_NULL)
    }

    /// Create copy failure error
    pub fn copy_failed<S: Into<String>>(message: S) -> Self {
        Self::CopyFailed {
            message: message.into(),
        }
    }

    /// Create file not found error
    pub fn file_not_found<S: Into<String>>(message: S) -> Self {
        Self::FileNotFound {
            message: message.into(),
        }
    }

    /// Create local database error
    pub fn database<S: Into<String>>(message: S) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create configuration download error
    pub fn config_download<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self::ConfigDownload {
            code,
            message: message.into(),
        }
    }

    /// Create request failure error, sanitizing the message
    pub fn request_failed<S: Into<String>>(message: S) -> Self {
        Self::RequestFailed {
            message: sanitize_reply(&message.into()),
        }
    }

    /// Create wrong status code error
    pub fn wrong_status<S: Into<String>>(status: u16, url: S) -> Self {
        Self::WrongStatusCode {
            status,
            url: url.into(),
        }
    }

    /// Create master reply error
    pub fn master_wrong_reply<S: Into<String>>(message: S) -> Self {
        Self::MasterWrongReply {
            message: sanitize_reply(&message.into()),
        }
    }

    /// Create parse error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

const MAX_REPLY_LEN: usize = 500;

static SECRET_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#"(?i)(password|token|key|secret|phoneid)([=:]\s*|"\s*:\s*")[^\s,"}]+"#).ok()
});

/// Sanitize a node or master reply before it ends up in an error or event.
///
/// Credentials and device identifiers are redacted and the result is
/// truncated to 500 bytes on a character boundary.
pub fn sanitize_reply(message: &str) -> String {
    let mut sanitized = match SECRET_PATTERN.as_ref() {
        Some(re) => re.replace_all(message, "${1}${2}***").to_string(),
        None => message.to_string(),
    };

    if sanitized.len() > MAX_REPLY_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_REPLY_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(suffix);
    }

    sanitized
}

/// Result type for vstore operations
pub type VStoreResult<T> = Result<T, VStoreError>;
