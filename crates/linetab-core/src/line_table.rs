//! # Line Table
//!
//! One decoded line number program, shared by all of its iterators.
//!
//! A [`LineTable`] is a cheap handle (`Arc`) around the header, the
//! subsection bytes and the directory/file table. The header and bytes never
//! change after parsing. The file table is the only shared mutable state: it
//! grows when the program declares files with `DW_LNE_define_file` and records
//! when a full pass over the program has completed. Both happen under one
//! `RwLock`, so tables can be iterated from several threads at once.
//!
//! ## Example
//!
//! ```rust,no_run
//! use linetab_core::{LineTable, SectionReader, UnitContext};
//!
//! # fn example(debug_line: SectionReader) -> linetab_core::Result<()> {
//! let context = UnitContext::new(8).with_comp_dir("/src").with_name("main.c");
//! let table = LineTable::parse(&debug_line, 0, &context)?;
//!
//! if let Some(row) = table.find_address(0x401000)? {
//!     println!("{}", row.describe());
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use gimli::Reader;
use tracing::debug;

use crate::context::UnitContext;
use crate::cursor::{SectionCursor, SectionReader};
use crate::error::{LineError, Result};
use crate::files::{FileEntry, FileTable};
use crate::header::{self, Header};
use crate::rows::{LineRows, Row};

pub(crate) struct LineTableInner
{
    pub(crate) header: Header,
    pub(crate) program: SectionReader,
    pub(crate) files: RwLock<FileTable>,
}

/// A decoded line number program.
#[derive(Clone)]
pub struct LineTable
{
    inner: Arc<LineTableInner>,
}

impl LineTable
{
    /// Parse the line table at `offset` in `.debug_line`.
    ///
    /// `offset` is usually the unit's `DW_AT_stmt_list`.
    ///
    /// ## Errors
    ///
    /// Returns [`LineError::Format`] for a malformed header or directory/file
    /// table and [`LineError::Read`] if the data is truncated.
    pub fn parse(debug_line: &SectionReader, offset: usize, context: &UnitContext) -> Result<Self>
    {
        let program = header::subsection(debug_line, offset)?;
        let (header, files) = Header::parse(&program, context)?;
        debug!(
            offset,
            version = header.version(),
            files = files.files().len(),
            directories = files.directories().len(),
            "parsed line table header"
        );

        Ok(Self {
            inner: Arc::new(LineTableInner {
                header,
                program,
                files: RwLock::new(files),
            }),
        })
    }

    pub(crate) fn inner(&self) -> &LineTableInner
    {
        &self.inner
    }

    pub fn header(&self) -> &Header
    {
        &self.inner.header
    }

    /// Total size of the subsection in bytes, including the unit length field.
    pub fn size(&self) -> usize
    {
        self.inner.program.len()
    }

    /// Iterate over the rows, starting from the beginning of the program.
    ///
    /// Every call starts a fresh pass with reset registers; iterating twice
    /// yields identical rows.
    pub fn rows(&self) -> LineRows
    {
        LineRows::new(self.clone())
    }

    /// Find the row whose address range contains `address`.
    ///
    /// A row covers `[row.address, next.address)` where `next` is the row that
    /// follows it. End-of-sequence rows only close ranges, so they are never
    /// returned. Returns `None` when no range contains the address.
    pub fn find_address(&self, address: u64) -> Result<Option<Row>>
    {
        let mut rows = self.rows();
        let Some(mut prev) = rows.next().transpose()? else {
            return Ok(None);
        };
        for next in rows {
            let next = next?;
            if prev.address() <= address && address < next.address() && !prev.end_sequence() {
                return Ok(Some(prev));
            }
            prev = next;
        }
        Ok(None)
    }

    /// Look up a file entry by index.
    ///
    /// Files declared inside the program are only known once execution reaches
    /// them, so an index past the current table triggers one full pass over the
    /// program. Once a pass has completed, the table is complete and later
    /// misses fail immediately.
    ///
    /// ## Errors
    ///
    /// [`LineError::OutOfRange`] if no such file exists, or any decoding error
    /// raised while scanning the program.
    pub fn get_file(&self, index: u64) -> Result<Arc<FileEntry>>
    {
        if let Some(file) = self.read_files().file(index) {
            return Ok(file);
        }

        if !self.is_complete() {
            debug!(index, "file index beyond table, scanning line number program");
            self.write_files().record_full_scan();
            for row in self.rows() {
                row?;
            }
            self.write_files().mark_complete();
        }

        let files = self.read_files();
        files.file(index).ok_or(LineError::OutOfRange {
            index,
            size: files.files().len(),
        })
    }

    /// Snapshot of the file entries known so far.
    pub fn files(&self) -> Vec<Arc<FileEntry>>
    {
        self.read_files().files().to_vec()
    }

    /// Snapshot of the resolved include directories.
    pub fn directories(&self) -> Vec<String>
    {
        self.read_files().directories().to_vec()
    }

    /// Whether a full pass over the program has completed.
    pub fn is_complete(&self) -> bool
    {
        self.read_files().is_complete()
    }

    /// How many full passes `get_file` has run to discover late file entries.
    pub fn full_scans(&self) -> usize
    {
        self.read_files().full_scans()
    }

    /// Read the 16-byte MD5 digest recorded for a DWARF 5 file entry.
    pub fn file_md5(&self, file: &FileEntry) -> Result<Option<[u8; 16]>>
    {
        let Some(offset) = file.md5_offset() else {
            return Ok(None);
        };
        let mut cursor = SectionCursor::at(&self.inner.program, offset)?;
        let mut digest = [0; 16];
        for byte in &mut digest {
            *byte = cursor.u8()?;
        }
        Ok(Some(digest))
    }

    /// Create a handle that does not keep the table alive.
    pub fn downgrade(&self) -> WeakLineTable
    {
        WeakLineTable {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn read_files(&self) -> std::sync::RwLockReadGuard<'_, FileTable>
    {
        self.inner.files.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_files(&self) -> std::sync::RwLockWriteGuard<'_, FileTable>
    {
        self.inner.files.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for LineTable
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("LineTable")
            .field("header", &self.inner.header)
            .field("size", &self.size())
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

/// Lookup-only handle to a [`LineTable`].
///
/// Holding one never extends the table's lifetime; `upgrade` fails once every
/// [`LineTable`] handle has been dropped.
#[derive(Debug, Clone)]
pub struct WeakLineTable
{
    inner: Weak<LineTableInner>,
}

impl WeakLineTable
{
    pub fn upgrade(&self) -> Option<LineTable>
    {
        self.inner.upgrade().map(|inner| LineTable { inner })
    }

    pub fn is_alive(&self) -> bool
    {
        self.inner.strong_count() > 0
    }
}
