//! Transaction lifecycle state.

/// State of an object transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is open and accepts operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction was dropped without committing.
    Disposed,
}

impl TransactionState {
    /// Returns true once the transaction can no longer be used.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        !matches!(self, Self::Active)
    }
}
