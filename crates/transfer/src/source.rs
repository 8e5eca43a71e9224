use std::path::PathBuf;
use std::sync::Arc;

/// Where the bytes of an upload come from.
///
/// Files are reopened for every attempt so a retried upload always sends
/// the full body from the start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// A file on disk, streamed at upload time.
    File(PathBuf),
    /// Content generated in memory (the serialized site configuration).
    Inline(Arc<[u8]>),
}
