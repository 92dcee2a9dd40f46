//! Rows of the line table and the lazy iterator producing them.

use std::fmt;
use std::sync::{Arc, PoisonError};

use tracing::{debug, trace};

use crate::cursor::SectionCursor;
use crate::error::{LineError, Result};
use crate::files::FileEntry;
use crate::line_table::LineTable;
use crate::machine::{LineMachine, Registers};

/// One address-to-source mapping emitted by the line number program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row
{
    registers: Registers,
    file: Arc<FileEntry>,
}

impl Row
{
    pub fn address(&self) -> u64
    {
        self.registers.address
    }

    pub fn op_index(&self) -> u64
    {
        self.registers.op_index
    }

    pub fn file_index(&self) -> u64
    {
        self.registers.file_index
    }

    /// The file entry `file_index` referred to when the row was emitted.
    pub fn file(&self) -> &Arc<FileEntry>
    {
        &self.file
    }

    pub fn line(&self) -> i64
    {
        self.registers.line
    }

    pub fn column(&self) -> u64
    {
        self.registers.column
    }

    pub fn is_stmt(&self) -> bool
    {
        self.registers.is_stmt
    }

    pub fn basic_block(&self) -> bool
    {
        self.registers.basic_block
    }

    /// Marks the first address past a sequence; such a row only closes a range.
    pub fn end_sequence(&self) -> bool
    {
        self.registers.end_sequence
    }

    pub fn prologue_end(&self) -> bool
    {
        self.registers.prologue_end
    }

    pub fn epilogue_begin(&self) -> bool
    {
        self.registers.epilogue_begin
    }

    pub fn isa(&self) -> u64
    {
        self.registers.isa
    }

    pub fn discriminator(&self) -> u64
    {
        self.registers.discriminator
    }

    /// Full register snapshot.
    pub fn registers(&self) -> &Registers
    {
        &self.registers
    }

    /// Format as `path[:line[:column]]`, leaving out zero line and column.
    pub fn describe(&self) -> String
    {
        let path = self.file.path();
        match (self.registers.line, self.registers.column) {
            (0, _) => path.to_owned(),
            (line, 0) => format!("{path}:{line}"),
            (line, column) => format!("{path}:{line}:{column}"),
        }
    }
}

impl fmt::Display for Row
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.describe())
    }
}

/// Lazy, forward-only iterator over the rows of a [`LineTable`].
///
/// Each call to `next` runs opcodes from the current byte offset until one
/// emits a row or the program ends. The iterator owns its registers and
/// offset, so iterators of the same table never interfere. After an error it
/// yields nothing more.
///
/// ```rust,no_run
/// # fn example(table: &linetab_core::LineTable) -> linetab_core::Result<()> {
/// for row in table.rows() {
///     let row = row?;
///     println!("{:#x} {}", row.address(), row.describe());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LineRows
{
    table: LineTable,
    registers: Registers,
    offset: usize,
    failed: bool,
}

impl LineRows
{
    pub(crate) fn new(table: LineTable) -> Self
    {
        let header = table.header();
        let registers = Registers::new(header.default_is_stmt());
        let offset = header.program_offset();
        Self {
            table,
            registers,
            offset,
            failed: false,
        }
    }

    /// Current byte offset within the line table subsection.
    pub fn offset(&self) -> usize
    {
        self.offset
    }

    /// Whether the whole program has been consumed (or decoding failed).
    pub fn is_finished(&self) -> bool
    {
        self.failed || self.offset >= self.table.size()
    }

    /// Current register state, i.e. what the next opcode will act upon.
    pub fn registers(&self) -> &Registers
    {
        &self.registers
    }

    fn advance(&mut self) -> Result<Option<Row>>
    {
        let inner = self.table.inner();
        let machine = LineMachine::new(&inner.header, &inner.files);
        let mut cursor = SectionCursor::at(&inner.program, self.offset)?;

        let mut stepped = false;
        let mut emitted = None;
        while emitted.is_none() && !cursor.is_empty() {
            emitted = machine.step(&mut self.registers, &mut cursor)?;
            stepped = true;
        }
        self.offset = cursor.offset();

        if stepped && emitted.is_none() {
            return Err(LineError::format("unexpected end of line number program"));
        }
        if stepped && cursor.is_empty() {
            let mut files = inner.files.write().unwrap_or_else(PoisonError::into_inner);
            if !files.is_complete() {
                debug!(offset = self.offset, "line number program fully executed, file table complete");
                files.mark_complete();
            }
        }

        let Some(registers) = emitted else {
            return Ok(None);
        };
        let file = inner
            .files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .file(registers.file_index)
            .ok_or_else(|| {
                LineError::format(format!("bad file index {} in line table", registers.file_index))
            })?;
        let row = Row { registers, file };
        trace!(address = row.address(), line = row.line(), "emitted line table row");
        Ok(Some(row))
    }
}

impl Iterator for LineRows
{
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.failed {
            return None;
        }
        match self.advance() {
            Ok(row) => row.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
