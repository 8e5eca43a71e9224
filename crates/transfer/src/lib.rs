//! Content digests, deploy path normalization and upload sources.

mod digest;
mod source;
mod validation;

pub use digest::{HashAlgorithm, checksum_bytes, hash_reader};
pub use source::UploadSource;
pub use validation::{normalize_path, validate_deploy_path};

/// Read block size used while hashing: 64 KiB.
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
}
