// crates/ingest-core/src/error.rs
//
// Typed errors for the registry-facing API. Kept separate from the pool's
// and media pipeline's own error types (see `pool.rs`, `ingest-media`) —
// this is specifically the set that the facade's numeric return codes are
// derived from, so the §6 error-code table has exactly one source.

use crate::types::codes;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("processor not initialized")]
    NotInitialized,
    #[error("processor already initialized")]
    AlreadyInitialized,
    #[error("camera id {0} not found")]
    InvalidId(i32),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("camera id {0} already in use")]
    IdInUse(i32),
    #[error("no free camera slot (max_slots reached)")]
    NoFreeSlot,
    #[error("worker failed to start: {0}")]
    WorkerStartFailed(String),
    #[error("{0}")]
    Unspecified(String),
}

impl RegistryError {
    /// The numeric code a facade caller (or an FFI binding) sees.
    pub fn as_code(&self) -> i32 {
        match self {
            Self::NotInitialized => codes::NOT_INITIALIZED,
            // Idempotent by design (§4.4) — callers treat this as success,
            // so it never actually reaches as_code() from add_camera's
            // return path, but the mapping is recorded for completeness.
            Self::AlreadyInitialized => codes::OK,
            Self::InvalidId(_) => codes::INVALID_ID,
            Self::InvalidUrl(_) => codes::INVALID_ARGUMENT,
            Self::IdInUse(_) => codes::ID_IN_USE,
            Self::NoFreeSlot => codes::WORKER_START_FAILED,
            Self::WorkerStartFailed(_) => codes::WORKER_START_FAILED,
            Self::Unspecified(_) => codes::UNSPECIFIED,
        }
    }
}
