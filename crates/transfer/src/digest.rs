use std::fmt;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{HASH_BUFFER_SIZE, TransferError};

/// Digest algorithm used to address content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha256,
    Md5,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Md5 => "md5",
        };
        f.write_str(name)
    }
}

impl FromStr for HashAlgorithm {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "md5" => Ok(Self::Md5),
            other => Err(TransferError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Incremental hasher over any supported algorithm.
pub struct ContentHasher {
    state: HasherState,
}

enum HasherState {
    Sha1(Sha1),
    Sha256(Sha256),
    Md5(Md5),
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha1 => HasherState::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Md5 => HasherState::Md5(Md5::new()),
        };
        Self { state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha1(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
            HasherState::Md5(h) => h.update(data),
        }
    }

    /// Consumes the hasher and returns the lower-case hex digest.
    pub fn finalize_hex(self) -> String {
        match self.state {
            HasherState::Sha1(h) => hex::encode(h.finalize()),
            HasherState::Sha256(h) => hex::encode(h.finalize()),
            HasherState::Md5(h) => hex::encode(h.finalize()),
        }
    }
}

/// Computes the digest of `data` and returns it hex-encoded.
pub fn checksum_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut hasher = ContentHasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}

/// Streams `reader` through the digest in fixed-size blocks.
///
/// Returns the hex digest and the number of bytes consumed.
pub async fn hash_reader<R>(algorithm: HashAlgorithm, mut reader: R) -> std::io::Result<(String, u64)>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = ContentHasher::new(algorithm);
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hasher.finalize_hex(), total))
}
