//! # Directory and File Tables
//!
//! Resolved include directories and source files of one line table.
//!
//! Paths are resolved once, when an entry is created:
//!
//! - Directories always end with a separator and are never empty.
//! - A relative directory is prefixed with the compile directory.
//! - A relative file is prefixed with its directory, or with the compile
//!   directory when the directory index is out of range.
//! - An absolute file path is kept as-is.
//!
//! Legacy tables (DWARF 2–4) carry an implicit directory 0 (the compile
//! directory) and file 0 (the unit name). DWARF 5 tables list every entry
//! explicitly.
//!
//! The file list can grow after parsing: legacy programs may declare files
//! with `DW_LNE_define_file` in the middle of the bytecode. Growth happens
//! under the table's lock and is tracked by a high-water offset so repeated
//! passes over the program never append the same definition twice.

use std::sync::Arc;

use gimli::constants;
use tracing::trace;

use crate::context::UnitContext;
use crate::cursor::{FormReader, SectionCursor};
use crate::error::{LineError, Result};
use crate::header::FormatEntry;

/// One entry of the file table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry
{
    path: String,
    directory_index: u64,
    timestamp: Option<u64>,
    size: Option<u64>,
    md5_offset: Option<usize>,
}

impl FileEntry
{
    /// Resolved path of the file.
    ///
    /// Path bytes that are not valid UTF-8 are replaced with U+FFFD, so a
    /// non-UTF-8 path is returned lossily rather than byte for byte.
    pub fn path(&self) -> &str
    {
        &self.path
    }

    /// Raw directory index, which may point past the directory list.
    pub fn directory_index(&self) -> u64
    {
        self.directory_index
    }

    /// Modification time, if the producer recorded one.
    pub fn timestamp(&self) -> Option<u64>
    {
        self.timestamp
    }

    /// File size in bytes, if the producer recorded one.
    pub fn size(&self) -> Option<u64>
    {
        self.size
    }

    /// Offset of the 16-byte MD5 digest within the line table subsection.
    ///
    /// Use [`LineTable::file_md5`](crate::LineTable::file_md5) to read it.
    pub fn md5_offset(&self) -> Option<usize>
    {
        self.md5_offset
    }
}

/// Directory and file lists shared by every iterator of a table.
#[derive(Debug)]
pub(crate) struct FileTable
{
    comp_dir: String,
    directories: Vec<String>,
    files: Vec<Arc<FileEntry>>,
    complete: bool,
    defined_through: usize,
    full_scans: usize,
}

impl FileTable
{
    /// Read the legacy (DWARF 2–4) include directory and file name lists.
    pub(crate) fn read_legacy(cursor: &mut SectionCursor, context: &UnitContext) -> Result<Self>
    {
        let comp_dir = normalize_directory(context.comp_dir().to_owned())?;
        let mut table = Self::new(comp_dir.clone());
        table.directories.push(comp_dir.clone());

        loop {
            let raw = cursor.cstr()?;
            if raw.is_empty() {
                break;
            }
            table.directories.push(resolve_directory(raw, &comp_dir)?);
        }

        let unit_file = resolve_file(context.name().to_owned(), &comp_dir)?;
        table.files.push(Arc::new(FileEntry {
            path: unit_file,
            directory_index: 0,
            timestamp: None,
            size: None,
            md5_offset: None,
        }));

        loop {
            let raw = cursor.cstr()?;
            if raw.is_empty() {
                break;
            }
            let directory_index = cursor.uleb128()?;
            let timestamp = cursor.uleb128()?;
            let size = cursor.uleb128()?;
            let entry = table.legacy_entry(raw, directory_index, timestamp, size)?;
            table.files.push(Arc::new(entry));
        }

        Ok(table)
    }

    /// Read the DWARF 5 directory list, driven by its entry format.
    pub(crate) fn read_v5_directories(
        cursor: &mut SectionCursor,
        forms: &FormReader<'_>,
        directory_format: &[FormatEntry],
        context: &UnitContext,
    ) -> Result<Self>
    {
        let comp_dir = if context.comp_dir().is_empty() {
            String::new()
        } else {
            normalize_directory(context.comp_dir().to_owned())?
        };
        let mut table = Self::new(comp_dir.clone());

        let count = cursor.uleb128()?;
        if count == 0 {
            return Err(LineError::format("unexpected directory count 0"));
        }
        for _ in 0..count {
            let mut raw = String::new();
            for entry in directory_format {
                raw = forms.string(cursor, entry.form())?;
            }
            table.directories.push(resolve_directory(raw, &comp_dir)?);
        }

        Ok(table)
    }

    /// Read the DWARF 5 file list, resolving each entry against the directories.
    pub(crate) fn read_v5_files(
        &mut self,
        cursor: &mut SectionCursor,
        forms: &FormReader<'_>,
        file_format: &[FormatEntry],
    ) -> Result<()>
    {
        let count = cursor.uleb128()?;
        if count == 0 {
            return Err(LineError::format("unexpected file count 0"));
        }
        for _ in 0..count {
            let entry = self.read_v5_file(cursor, forms, file_format)?;
            self.files.push(Arc::new(entry));
        }
        Ok(())
    }

    fn new(comp_dir: String) -> Self
    {
        Self {
            comp_dir,
            directories: Vec::new(),
            files: Vec::new(),
            complete: false,
            defined_through: 0,
            full_scans: 0,
        }
    }

    fn read_v5_file(&self, cursor: &mut SectionCursor, forms: &FormReader<'_>, format: &[FormatEntry]) -> Result<FileEntry>
    {
        let mut raw = String::new();
        let mut directory_index = 0;
        let mut timestamp = None;
        let mut size = None;
        let mut md5_offset = None;

        for entry in format {
            let form = entry.form();
            match entry.content_type() {
                constants::DW_LNCT_path => raw = forms.string(cursor, form)?,
                constants::DW_LNCT_directory_index => directory_index = forms.unsigned(cursor, form)?,
                constants::DW_LNCT_timestamp if form == constants::DW_FORM_block => forms.skip(cursor, form)?,
                constants::DW_LNCT_timestamp => timestamp = Some(forms.unsigned(cursor, form)?),
                constants::DW_LNCT_size => size = Some(forms.unsigned(cursor, form)?),
                constants::DW_LNCT_MD5 => {
                    md5_offset = Some(cursor.offset());
                    forms.skip(cursor, form)?;
                }
                _ => forms.skip(cursor, form)?,
            }
        }

        Ok(FileEntry {
            path: self.resolve_in_directory(raw, directory_index)?,
            directory_index,
            timestamp,
            size,
            md5_offset,
        })
    }

    fn legacy_entry(&self, raw: String, directory_index: u64, timestamp: u64, size: u64) -> Result<FileEntry>
    {
        Ok(FileEntry {
            path: self.resolve_in_directory(raw, directory_index)?,
            directory_index,
            timestamp: (timestamp != 0).then_some(timestamp),
            size: (size != 0).then_some(size),
            md5_offset: None,
        })
    }

    fn resolve_in_directory(&self, raw: String, directory_index: u64) -> Result<String>
    {
        let base = usize::try_from(directory_index)
            .ok()
            .and_then(|index| self.directories.get(index))
            .unwrap_or(&self.comp_dir);
        resolve_file(raw, base)
    }

    /// Append a file declared by `DW_LNE_define_file`.
    ///
    /// `at` is the offset of the defining opcode and `end` the offset just past
    /// it. Definitions at or before the high-water mark were already appended by
    /// an earlier pass and are ignored.
    pub(crate) fn define_file(
        &mut self,
        at: usize,
        end: usize,
        raw: String,
        directory_index: u64,
        timestamp: u64,
        size: u64,
    ) -> Result<()>
    {
        if at < self.defined_through {
            return Ok(());
        }
        let entry = self.legacy_entry(raw, directory_index, timestamp, size)?;
        trace!(index = self.files.len(), path = entry.path(), "define_file appended file entry");
        self.files.push(Arc::new(entry));
        self.defined_through = end;
        Ok(())
    }

    pub(crate) fn file(&self, index: u64) -> Option<Arc<FileEntry>>
    {
        usize::try_from(index).ok().and_then(|index| self.files.get(index)).cloned()
    }

    pub(crate) fn files(&self) -> &[Arc<FileEntry>]
    {
        &self.files
    }

    pub(crate) fn directories(&self) -> &[String]
    {
        &self.directories
    }

    pub(crate) fn is_complete(&self) -> bool
    {
        self.complete
    }

    pub(crate) fn mark_complete(&mut self)
    {
        self.complete = true;
    }

    pub(crate) fn full_scans(&self) -> usize
    {
        self.full_scans
    }

    pub(crate) fn record_full_scan(&mut self)
    {
        self.full_scans += 1;
    }
}

fn is_separator(c: char) -> bool
{
    c == '/' || c == '\\'
}

/// Whether a path is rooted: POSIX `/`, UNC `\\`, or a drive letter.
fn is_absolute(path: &str) -> bool
{
    let bytes = path.as_bytes();
    path.starts_with(is_separator)
        || (bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && is_separator(char::from(bytes[2])))
}

fn normalize_directory(mut path: String) -> Result<String>
{
    if path.is_empty() {
        return Err(LineError::format("empty directory"));
    }
    if !path.ends_with(is_separator) {
        path.push('/');
    }
    Ok(path)
}

fn resolve_directory(raw: String, comp_dir: &str) -> Result<String>
{
    let path = normalize_directory(raw)?;
    if is_absolute(&path) {
        Ok(path)
    } else {
        Ok(format!("{comp_dir}{path}"))
    }
}

fn resolve_file(raw: String, directory: &str) -> Result<String>
{
    if raw.is_empty() {
        return Err(LineError::format("empty file"));
    }
    if is_absolute(&raw) {
        Ok(raw)
    } else {
        Ok(format!("{directory}{raw}"))
    }
}
