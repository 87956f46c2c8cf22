//! Contract-specific error types
//!
//! Comprehensive error taxonomy for ledger, registry, escrow, and swap
//! operations. Every failure is a synchronous validation error that aborts
//! the whole call with no state mutation.

use thiserror::Error;

/// Token-ledger errors (the external transfer primitive)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Insufficient balance for {token}: required {required}, available {available}")]
    InsufficientBalance {
        token: String,
        required: String,
        available: String,
    },

    #[error("Transfer amount must be positive")]
    InvalidAmount,

    #[error("Arithmetic overflow in balance calculation")]
    Overflow,
}

/// Registry-specific errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Invalid identity: nil account")]
    InvalidIdentity,

    #[error("Escrow already exists for DAO {dao}")]
    AlreadyExists { dao: String },

    #[error("No escrow implementation configured")]
    ImplementationNotSet,

    #[error("Module back-reference does not match this registry")]
    ModuleSetupInvalid,

    #[error("Unauthorized: caller is not the registry owner")]
    NotAuthorized,

    #[error("Module not active: {module}")]
    ModuleNotActive { module: String },

    #[error("No escrow for DAO {dao}")]
    EscrowNotFound { dao: String },

    #[error("Escrow error: {0}")]
    Escrow(#[from] EscrowError),
}

/// Escrow-specific errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EscrowError {
    #[error("Invalid identity: nil account")]
    InvalidIdentity,

    #[error("Escrow already initialized")]
    AlreadyInitialized,

    #[error("Escrow not initialized")]
    NotInitialized,

    #[error("Deposit amount must be positive")]
    InvalidAmount,

    #[error("Native value mismatch: sent {sent}, declared {declared}")]
    InvalidEthValue { sent: String, declared: String },

    #[error("Array length mismatch: {left} tokens, {right} amounts")]
    ArrayLengthMismatch { left: usize, right: usize },

    #[error("Invalid deposit id: {index} (count {count})")]
    InvalidDepositId { index: usize, count: usize },

    #[error("Unauthorized: caller is not the depositor")]
    NotAuthorized,

    #[error("Deposit not withdrawable")]
    NotWithdrawable,

    #[error("Insufficient deal balance for {token}: required {required}, available {available}")]
    InsufficientDealBalance {
        token: String,
        required: String,
        available: String,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Swap-module errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SwapError {
    #[error("Invalid identity: nil account")]
    InvalidIdentity,

    #[error("At least 2 participants required, got {count}")]
    TooFewParticipants { count: usize },

    #[error("At least 1 token required")]
    TooFewTokens,

    #[error("Duplicate token: {token}")]
    DuplicateToken { token: String },

    #[error("Array length mismatch: expected {expected}, got {got}")]
    ArrayLengthMismatch { expected: usize, got: usize },

    #[error("Too many reward recipients: {count} (max {max})")]
    TooManyRecipients { count: usize, max: usize },

    #[error("Metadata must not be empty")]
    EmptyMetadata,

    #[error("Metadata already exists: {metadata}")]
    DuplicateMetadata { metadata: String },

    #[error("Deadline offset must be positive")]
    InvalidDeadline,

    #[error("Invalid reward shares: recipient shares must sum to 10000 basis points")]
    InvalidRewardShares,

    #[error("Reward pool rate {rate} exceeds the configured cap {cap}")]
    RewardTooLarge { rate: String, cap: String },

    #[error("Matrix amounts must be non-negative")]
    InvalidAmount,

    #[error("Deal id doesn't exist: {id}")]
    UnknownId { id: String },

    #[error("Metadata does not exist: {metadata}")]
    MetadataNotFound { metadata: String },

    #[error("Deal expired: deadline passed")]
    Expired,

    #[error("Deal already executed")]
    AlreadyExecuted,

    #[error("Deal not executable: funding incomplete")]
    NotExecutable,

    #[error("Arithmetic overflow in settlement math")]
    Overflow,

    #[error("Unauthorized: caller is not the module owner")]
    NotAuthorized,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Escrow error: {0}")]
    Escrow(#[from] EscrowError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_error_display() {
        let err = LedgerError::InsufficientBalance {
            token: "TKA".to_string(),
            required: "5".to_string(),
            available: "1".to_string(),
        };
        assert!(err.to_string().contains("TKA"));
        assert!(err.to_string().contains("5"));
    }

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::ModuleSetupInvalid;
        assert!(err.to_string().contains("back-reference"));
    }

    #[test]
    fn test_escrow_error_from_ledger() {
        let ledger_err = LedgerError::InvalidAmount;
        let escrow_err: EscrowError = ledger_err.into();
        assert!(matches!(escrow_err, EscrowError::Ledger(_)));
    }

    #[test]
    fn test_swap_error_from_escrow() {
        let escrow_err = EscrowError::NotWithdrawable;
        let swap_err: SwapError = escrow_err.into();
        assert!(matches!(swap_err, SwapError::Escrow(_)));
    }
}
