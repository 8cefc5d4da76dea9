use std::path::PathBuf;

use crate::instruction::Phase;

#[derive(Debug, thiserror::Error)]
pub enum TxnError {
    #[error("instruction phase violation: expected {expected:?}, found {found:?}")]
    InvalidPhase { expected: Phase, found: Phase },

    #[error("invalid config value for `{key}`: {message}")]
    Config { key: String, message: String },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = TxnError> = std::result::Result<T, E>;
