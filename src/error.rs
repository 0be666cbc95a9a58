//! Error types for the wallet transaction manager

use thiserror::Error;

/// Main error type for the transaction manager
#[derive(Error, Debug)]
pub enum TxManagerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Gas estimation error: {0}")]
    Estimation(String),

    #[error("Submission of tx {tx_id} rejected by ledger: {message}")]
    Submission { tx_id: String, message: String },

    #[error("Signing of tx {tx_id} failed: {message}")]
    Signing { tx_id: String, message: String },

    #[error("Cannot replace tx {tx_id}: {reason}")]
    ReplacementNotAllowed { tx_id: String, reason: String },

    #[error("Persistence error for {key}: {message}")]
    Persistence { key: String, message: String },

    #[error("Invalid state transition for tx {tx_id} from {from} to {to}")]
    InvalidStateTransition {
        tx_id: String,
        from: String,
        to: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TxManagerError {
    /// Check if the caller can reasonably retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TxManagerError::Estimation(_) | TxManagerError::Persistence { .. }
        )
    }

    /// Check if the error was caused by the caller's input or the target's state
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            TxManagerError::Validation(_) | TxManagerError::ReplacementNotAllowed { .. }
        )
    }

    /// Transaction id the error refers to, if any
    pub fn tx_id(&self) -> Option<&str> {
        match self {
            TxManagerError::Submission { tx_id, .. }
            | TxManagerError::Signing { tx_id, .. }
            | TxManagerError::ReplacementNotAllowed { tx_id, .. }
            | TxManagerError::InvalidStateTransition { tx_id, .. } => Some(tx_id),
            _ => None,
        }
    }
}

/// Errors reported by a ledger client implementation
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Errors reported by a signer implementation
#[derive(Error, Debug, Clone)]
#[error("Signer error: {0}")]
pub struct SignerError(pub String);

/// Result type for transaction manager operations
pub type TxManagerResult<T> = Result<T, TxManagerError>;
