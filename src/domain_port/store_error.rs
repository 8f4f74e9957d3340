/// Storage failures, classified once at the store boundary.
///
/// Callers above the stores (retry, circuit breaker, orchestrator) only ever
/// look at the classification, never at driver error codes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    /// Connection-level failure: refused, reset, pool exhausted.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// Deadlock, lock wait timeout, serialization failure.
    #[error("transient conflict: {0}")]
    Transient(String),
    #[error("query timed out")]
    Timeout,
    #[error("operation cancelled")]
    Cancelled,
    #[error("circuit open")]
    CircuitOpen,
    #[error("giving up after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<StoreError>,
    },
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// The error with retry bookkeeping peeled off.
    pub fn root(&self) -> &StoreError {
        match self {
            StoreError::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            StoreError::Unavailable(_) | StoreError::Transient(_)
        )
    }

    /// Whether the circuit breaker should count this outcome against the
    /// dependency. A missing row or a uniqueness conflict means the database
    /// answered.
    pub fn is_fault(&self) -> bool {
        matches!(
            self.root(),
            StoreError::Unavailable(_)
                | StoreError::Transient(_)
                | StoreError::Timeout
                | StoreError::Database(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), StoreError::NotFound)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_survives_retry_wrapping() {
        let err = StoreError::RetriesExhausted {
            attempts: 3,
            last: Box::new(StoreError::Transient("deadlock".into())),
        };
        assert!(err.is_retryable());
        assert!(err.is_fault());
        assert!(matches!(err.root(), StoreError::Transient(_)));
    }

    #[test]
    fn not_found_is_neither_retryable_nor_fault() {
        let err = StoreError::NotFound;
        assert!(!err.is_retryable());
        assert!(!err.is_fault());
        assert!(err.is_not_found());
    }

    #[test]
    fn timeout_and_cancel_are_not_retried() {
        assert!(!StoreError::Timeout.is_retryable());
        assert!(StoreError::Timeout.is_fault());
        assert!(!StoreError::Cancelled.is_retryable());
        assert!(!StoreError::Cancelled.is_fault());
    }
}
