//! Error types for the broadcast tracker

use std::fmt;

use thiserror::Error;

/// Main error type for broadcast tracking
#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Already broadcasting transaction {hash}")]
    AlreadyTracked { hash: String },

    #[error("Transaction {hash} was already confirmed; broadcast it under a fresh identifier")]
    AlreadyConfirmed { hash: String },

    #[error("Account {sender} already has a transaction in flight")]
    AccountLocked { sender: String },

    #[error("Transaction hash returned by broadcast {returned} does not match expected {expected}")]
    IdentifierMismatch { expected: String, returned: String },

    #[error("Chain access error: {0}")]
    ChainAccess(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Outcome handler failed for transaction {hash}: {message}")]
    Notification { hash: String, message: String },

    #[error("Broadcast coordinator used before initialize")]
    NotInitialized,

    #[error("Block {index} received out of order (last processed {last})")]
    OutOfOrderBlock { index: u64, last: u64 },

    #[error(
        "Transaction {hash} confirmed in block {block_index} ({block_hash}) was reverted; \
         confirmation depth is shallower than the reorg"
    )]
    ReorgBeyondConfirmation {
        hash: String,
        block_index: u64,
        block_hash: String,
    },

    #[error("Broadcast pass for block {block_index} had {} failure(s): {}", .failures.len(), FailureList(.failures))]
    PassFailed {
        block_index: u64,
        failures: Vec<RecordFailure>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failure while processing a single tracked record during a pass
#[derive(Debug)]
pub struct RecordFailure {
    pub hash: String,
    pub error: BroadcastError,
}

impl fmt::Display for RecordFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.hash, self.error)
    }
}

struct FailureList<'a>(&'a [RecordFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

impl BroadcastError {
    /// Check if error is retryable on the next block pass
    pub fn is_retryable(&self) -> bool {
        match self {
            BroadcastError::ChainAccess(_)
            | BroadcastError::Timeout { .. }
            | BroadcastError::Notification { .. } => true,
            // Serialization conflicts between concurrent writers
            BroadcastError::Database(sqlx::Error::Database(e)) => {
                e.code().as_deref() == Some("40001")
            }
            BroadcastError::PassFailed { failures, .. } => {
                failures.iter().all(|f| f.error.is_retryable())
            }
            _ => false,
        }
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        match self {
            BroadcastError::IdentifierMismatch { .. }
            | BroadcastError::ReorgBeyondConfirmation { .. } => true,
            BroadcastError::PassFailed { failures, .. } => {
                failures.iter().any(|f| f.error.should_alert())
            }
            _ => false,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            BroadcastError::Database(_) => "database",
            BroadcastError::Storage(_) => "storage",
            BroadcastError::Encoding(_) => "encoding",
            BroadcastError::AlreadyTracked { .. } => "already_tracked",
            BroadcastError::AlreadyConfirmed { .. } => "already_confirmed",
            BroadcastError::AccountLocked { .. } => "account_locked",
            BroadcastError::IdentifierMismatch { .. } => "identifier_mismatch",
            BroadcastError::ChainAccess(_) => "chain_access",
            BroadcastError::Timeout { .. } => "timeout",
            BroadcastError::Notification { .. } => "notification",
            BroadcastError::NotInitialized => "not_initialized",
            BroadcastError::OutOfOrderBlock { .. } => "out_of_order",
            BroadcastError::ReorgBeyondConfirmation { .. } => "reorg",
            BroadcastError::PassFailed { .. } => "pass_failed",
            BroadcastError::Internal(_) => "internal",
        }
    }
}

/// Result type for broadcast tracking operations
pub type BroadcastResult<T> = Result<T, BroadcastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_failure_display_lists_records() {
        let err = BroadcastError::PassFailed {
            block_index: 7,
            failures: vec![
                RecordFailure {
                    hash: "tx1".to_string(),
                    error: BroadcastError::ChainAccess("connection refused".to_string()),
                },
                RecordFailure {
                    hash: "tx2".to_string(),
                    error: BroadcastError::Timeout {
                        operation: "find transaction".to_string(),
                    },
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.contains("block 7"));
        assert!(msg.contains("2 failure(s)"));
        assert!(msg.contains("tx1: Chain access error: connection refused"));
        assert!(msg.contains("tx2: Timeout waiting for find transaction"));
        assert!(err.is_retryable());
        assert!(!err.should_alert());
    }

    #[test]
    fn test_mismatch_alerts_and_is_not_retryable() {
        let err = BroadcastError::IdentifierMismatch {
            expected: "a".to_string(),
            returned: "b".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.should_alert());

        let pass = BroadcastError::PassFailed {
            block_index: 1,
            failures: vec![RecordFailure {
                hash: "a".to_string(),
                error: err,
            }],
        };
        assert!(!pass.is_retryable());
        assert!(pass.should_alert());
    }
}
