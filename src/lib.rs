//! # CBin Core Library
//!
//! This crate provides the core functionality for the `cbin` archival
//! format: a compact binary container for large chess game collections.
//!
//! Games are grouped into self-describing, length-prefixed blocks;
//! repeated metadata strings and opening move sequences are interned once
//! per archive and referenced by small integer ids; a fixed-width block
//! index gives O(1) block lookup, zero-copy random access to any game,
//! and coordination-free parallel scans over disjoint block ranges.
//!
//! ## Key Modules
//!
//! - [`game`]: The in-memory game model and compact move encoding.
//! - [`intern`]: Build-time deduplication of repeated byte sequences.
//! - [`builder`]: Streaming archive construction with block batching.
//! - [`reader`]: Memory-mapped, lazily validated archive access.
//! - [`chunker`]: Byte-balanced partitioning for parallel workers.
//!
//! ## Example
//!
//! ```no_run
//! use cbin::{Archive, ArchiveBuilder, GameRecord};
//!
//! # fn main() -> cbin::Result<()> {
//! let mut builder = ArchiveBuilder::new()?;
//! builder.add_game(&GameRecord::default())?;
//! builder.finish_to_path(std::path::Path::new("games.cbin"))?;
//!
//! let archive = Archive::open(std::path::Path::new("games.cbin"))?;
//! let first = archive.get(0)?;
//! println!("{} vs {}", first.white()?, first.black()?);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod chunker;
pub mod error;
pub mod game;
pub mod intern;
pub mod reader;

mod block;
mod codec;
mod format;

pub use builder::{ArchiveBuilder, ArchiveSummary, BuilderOptions};
pub use chunker::{scan, split, split_auto, ChunkRange};
pub use error::{ArchiveError, Result};
pub use format::BlockDescriptor;
pub use game::{CastleKind, GameRecord, GameResult, Move, MoveToken, Piece};
pub use intern::Category;
pub use reader::{Archive, GameIter, GameView, Moves};
