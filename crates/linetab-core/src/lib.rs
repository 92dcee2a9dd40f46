//! # linetab-core
//!
//! DWARF line number program decoding for Linetab.
//!
//! This crate turns the `.debug_line` bytecode of a compilation unit into
//! address-to-source rows, including:
//! - Header parsing for DWARF versions 2 through 5
//! - Directory and file tables (v5 entry formats and legacy lists)
//! - The line number state machine (special, standard, and extended opcodes)
//! - Lazy row iteration, address lookup, and file lookup
//!
//! ## Collaborators
//!
//! Object file loading and DIE parsing live elsewhere. The caller supplies the
//! `.debug_line` bytes as a [`SectionReader`] and the unit attributes the table
//! depends on as a [`UnitContext`].
//!
//! ## Malformed input
//!
//! Every read is bounds-checked. Truncated or malformed tables produce a
//! [`LineError`]; decoding never panics on bad input and never aborts the
//! process, so callers decide whether to skip, report, or stop.

pub mod context;
mod cursor;
pub mod error;
pub mod files;
pub mod header;
pub mod line_table;
pub mod machine;
pub mod prelude;
pub mod rows;

pub use context::{StringSections, UnitContext};
pub use cursor::SectionReader;
pub use error::{LineError, Result};
pub use files::FileEntry;
pub use header::{FormatEntry, Header};
pub use line_table::{LineTable, WeakLineTable};
pub use machine::{Registers, SpecialOpcode};
pub use rows::{LineRows, Row};
