use thiserror::Error;

/// Errors from the local session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors from the remote reservation gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("reservation not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("unexpected HTTP status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("live stream error: {0}")]
    Stream(String),
}

/// Errors surfaced by session engine operations.
///
/// Store failures are not part of this type: persistence is best effort and
/// the engine logs write failures instead of failing the operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no active chat session")]
    NoActiveSession,

    #[error("no lease context loaded")]
    NoLeaseContext,

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}
