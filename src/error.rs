use std::path::PathBuf;

use crate::intern::Category;

/// The primary error type for all operations in the `cbin` crate.
#[derive(Debug)]
pub enum ArchiveError {
    /// An I/O error occurred, typically while reading or writing an archive file.
    /// Includes the path where the error happened, when one is known.
    Io { source: std::io::Error, path: PathBuf },

    /// The first four bytes of the file are not the `cbin` magic signature.
    BadMagic { found: [u8; 4] },

    /// The header carries a format version this build does not understand.
    UnsupportedVersion { found: u16 },

    /// A declared length reaches past the end of the available bytes.
    /// Fatal only for the affected region; earlier blocks stay readable.
    TruncatedArchive { offset: u64, needed: u64, available: u64 },

    /// Structural metadata (header, dedup table directory, block index) failed validation.
    CorruptArchive(String),

    /// A block's internal offsets or framing failed validation. The block is
    /// skippable; the rest of the archive stays readable.
    CorruptBlock { block: usize, detail: String },

    /// A record references a dedup id at or beyond the end of its table.
    DanglingDedupReference { category: Category, id: u32, table_len: u32 },

    /// A global game index beyond the end of the archive.
    OutOfRange { index: u64, game_count: u64 },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ArchiveError>;

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveError::Io { source, path } => {
                if path.as_os_str().is_empty() {
                    write!(f, "I/O error: {}", source)
                } else {
                    write!(f, "I/O error on path '{}': {}", path.display(), source)
                }
            }
            ArchiveError::BadMagic { found } => {
                write!(f, "Not a cbin archive (magic bytes {:02x?})", found)
            }
            ArchiveError::UnsupportedVersion { found } => {
                write!(f, "Unsupported archive format version {}", found)
            }
            ArchiveError::TruncatedArchive { offset, needed, available } => write!(
                f,
                "Truncated archive: need {} bytes at offset {}, only {} available",
                needed, offset, available
            ),
            ArchiveError::CorruptArchive(msg) => write!(f, "Corrupt archive metadata: {}", msg),
            ArchiveError::CorruptBlock { block, detail } => {
                write!(f, "Corrupt block {}: {}", block, detail)
            }
            ArchiveError::DanglingDedupReference { category, id, table_len } => write!(
                f,
                "Dangling dedup reference: id {} into {} table of length {}",
                id, category, table_len
            ),
            ArchiveError::OutOfRange { index, game_count } => write!(
                f,
                "Game index {} out of range (archive holds {} games)",
                index, game_count
            ),
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiveError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

// Generic IO error conversion that doesn't carry a path
impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        ArchiveError::Io { source: err, path: PathBuf::new() }
    }
}

impl ArchiveError {
    /// Attach a path to a bare I/O error; other variants pass through unchanged.
    pub fn with_path(self, path: &std::path::Path) -> Self {
        match self {
            ArchiveError::Io { source, .. } => {
                ArchiveError::Io { source, path: path.to_path_buf() }
            }
            other => other,
        }
    }
}
