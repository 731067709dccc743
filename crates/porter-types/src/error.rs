use thiserror::Error;

/// Result type for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Service-level error taxonomy.
///
/// Every failure a registry, ledger, or chat operation can surface maps onto
/// exactly one of these variants; the HTTP layer turns the variant into a
/// status code and a `{ "message": … }` body.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Malformed or missing required fields
    #[error("{0}")]
    Validation(String),

    /// Violates the one-active-request-per-requester invariant
    #[error("{0}")]
    Conflict(String),

    /// Missing entity, or entity in the wrong state for the operation
    #[error("{0}")]
    NotFound(String),

    /// Caller lacks rights over the entity
    #[error("{0}")]
    Authorization(String),

    /// A requester tried to accept their own delivery
    #[error("you cannot accept your own delivery")]
    SelfAccept,

    /// Acceptor is already at the concurrent in-progress cap
    #[error("delivery limit reached: at most {0} deliveries in progress")]
    Capacity(u32),

    /// Ledger/state transaction failed; no partial state was left behind
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Infrastructure failure (database, lock poisoning, ...)
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn internal<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Internal(err.into())
    }
}
