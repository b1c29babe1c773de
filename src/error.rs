use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::codec::CodecError;
use crate::credentials::CredentialError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("parsing fetched mail: {0}")]
    Mime(#[from] mailparse::MailParseError),

    #[error("connecting to {server}: {reason}")]
    Connection { server: String, reason: String },

    #[error("sending {subject:?}: {reason}")]
    Send { subject: String, reason: String },

    #[error("{action} {}: {cause}", .path.display())]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        cause: io::Error,
    },

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("configuration: {0}")]
    Config(String),

    #[error("background task: {0}")]
    Task(String),
}

impl Error {
    pub fn filesystem(action: &'static str, path: &Path, cause: io::Error) -> Self {
        Error::Filesystem {
            action,
            path: path.to_path_buf(),
            cause,
        }
    }

    pub fn connection(server: &str, reason: impl ToString) -> Self {
        Error::Connection {
            server: server.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
