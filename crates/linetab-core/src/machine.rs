//! # Line Number State Machine
//!
//! Interprets line number program opcodes (DWARF4 §6.2.5) against a
//! [`Registers`] file.
//!
//! Opcodes fall into three classes, chosen by the first byte:
//!
//! - **Special** (`opcode >= opcode_base`): advance address and line together,
//!   then emit a row.
//! - **Standard** (`1..opcode_base`): adjust one register; only
//!   `DW_LNS_copy` emits.
//! - **Extended** (`0`, then a length and a sub-opcode): only
//!   `DW_LNE_end_sequence` emits, and it is also the only opcode that resets
//!   the registers.
//!
//! One call to [`LineMachine::step`] executes exactly one opcode and returns
//! the emitted register snapshot, if any.

use std::sync::{PoisonError, RwLock};

use gimli::{constants, DwLne, DwLns, ReaderOffset};

use crate::cursor::SectionCursor;
use crate::error::{LineError, Result};
use crate::files::FileTable;
use crate::header::Header;

/// The line number state machine registers.
///
/// A row of the line table is a snapshot of these registers at the moment a
/// row-emitting opcode runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers
{
    /// Program counter of the current instruction.
    pub address: u64,
    /// Operation within a VLIW instruction; always 0 when
    /// `maximum_operations_per_instruction` is 1.
    pub op_index: u64,
    /// Index into the file table.
    pub file_index: u64,
    /// Source line, starting at 1. Signed so malformed negative advances stay visible.
    pub line: i64,
    /// Source column; 0 means unknown.
    pub column: u64,
    /// Recommended breakpoint location.
    pub is_stmt: bool,
    /// Beginning of a basic block.
    pub basic_block: bool,
    /// First byte after the end of a sequence of instructions.
    pub end_sequence: bool,
    /// Where a breakpoint should stop on function entry.
    pub prologue_end: bool,
    /// Where a breakpoint should stop before function exit.
    pub epilogue_begin: bool,
    /// Instruction set architecture of the current instruction.
    pub isa: u64,
    /// Block the current instruction belongs to.
    pub discriminator: u64,
}

impl Registers
{
    /// Registers in their initial state.
    #[must_use]
    pub fn new(default_is_stmt: bool) -> Self
    {
        Self {
            address: 0,
            op_index: 0,
            file_index: 1,
            line: 1,
            column: 0,
            is_stmt: default_is_stmt,
            basic_block: false,
            end_sequence: false,
            prologue_end: false,
            epilogue_begin: false,
            isa: 0,
            discriminator: 0,
        }
    }

    /// Return every register to its initial state.
    pub fn reset(&mut self, default_is_stmt: bool)
    {
        *self = Self::new(default_is_stmt);
    }

    /// Apply an operation advance.
    ///
    /// ```text
    /// total_ops = op_index + operation_advance
    /// address  += minimum_instruction_length * (total_ops / maximum_operations_per_instruction)
    /// op_index  = total_ops % maximum_operations_per_instruction
    /// ```
    ///
    /// With one operation per instruction this is plain address addition.
    pub fn advance_operations(&mut self, header: &Header, operation_advance: u64)
    {
        let max_ops = u64::from(header.maximum_operations_per_instruction());
        let total_ops = self.op_index.wrapping_add(operation_advance);
        let step = u64::from(header.minimum_instruction_length()).wrapping_mul(total_ops / max_ops);
        self.address = self.address.wrapping_add(step);
        self.op_index = total_ops % max_ops;
    }

    /// Snapshot the registers for a new row, then clear the per-row flags.
    fn emit(&mut self) -> Registers
    {
        let row = *self;
        self.basic_block = false;
        self.prologue_end = false;
        self.epilogue_begin = false;
        self.discriminator = 0;
        row
    }
}

/// Decoded fields of a special opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialOpcode
{
    /// `opcode - opcode_base`
    pub adjusted: u8,
    /// `adjusted / line_range`
    pub operation_advance: u8,
    /// `line_base + adjusted % line_range`
    pub line_increment: i64,
}

impl SpecialOpcode
{
    /// Decode `opcode`.
    ///
    /// Returns `None` if `opcode` is below `opcode_base` (not a special opcode)
    /// or if `line_range` is 0.
    #[must_use]
    pub fn decode(opcode: u8, opcode_base: u8, line_base: i8, line_range: u8) -> Option<Self>
    {
        let adjusted = opcode.checked_sub(opcode_base)?;
        Some(Self {
            adjusted,
            operation_advance: adjusted.checked_div(line_range)?,
            line_increment: i64::from(line_base) + i64::from(adjusted.checked_rem(line_range)?),
        })
    }
}

/// Executes opcodes of one line table.
///
/// The machine itself is stateless: registers and the byte position belong to
/// the caller, so any number of iterators can share one table.
pub(crate) struct LineMachine<'a>
{
    header: &'a Header,
    files: &'a RwLock<FileTable>,
}

impl<'a> LineMachine<'a>
{
    pub(crate) fn new(header: &'a Header, files: &'a RwLock<FileTable>) -> Self
    {
        Self { header, files }
    }

    /// Execute one opcode at the cursor.
    ///
    /// Returns the emitted row registers, or `None` if the opcode did not emit.
    pub(crate) fn step(&self, regs: &mut Registers, cursor: &mut SectionCursor) -> Result<Option<Registers>>
    {
        let at = cursor.offset();
        let opcode = cursor.u8()?;
        if opcode >= self.header.opcode_base() {
            self.special(regs, opcode).map(Some)
        } else if opcode != 0 {
            self.standard(regs, DwLns(opcode), cursor)
        } else {
            self.extended(regs, cursor, at)
        }
    }

    fn special(&self, regs: &mut Registers, opcode: u8) -> Result<Registers>
    {
        let header = self.header;
        let special = SpecialOpcode::decode(opcode, header.opcode_base(), header.line_base(), header.line_range())
            .ok_or_else(|| LineError::format(format!("bad special opcode {opcode}")))?;
        regs.advance_operations(header, u64::from(special.operation_advance));
        regs.line = regs.line.wrapping_add(special.line_increment);
        Ok(regs.emit())
    }

    fn standard(&self, regs: &mut Registers, opcode: DwLns, cursor: &mut SectionCursor) -> Result<Option<Registers>>
    {
        let header = self.header;
        match opcode {
            constants::DW_LNS_copy => return Ok(Some(regs.emit())),
            constants::DW_LNS_advance_pc => {
                let operation_advance = cursor.uleb128()?;
                regs.advance_operations(header, operation_advance);
            }
            constants::DW_LNS_advance_line => {
                let delta = cursor.sleb128()?;
                regs.line = regs.line.wrapping_add(delta);
            }
            constants::DW_LNS_set_file => regs.file_index = cursor.uleb128()?,
            constants::DW_LNS_set_column => regs.column = cursor.uleb128()?,
            constants::DW_LNS_negate_stmt => regs.is_stmt = !regs.is_stmt,
            constants::DW_LNS_set_basic_block => regs.basic_block = true,
            constants::DW_LNS_const_add_pc => {
                // Same advance as special opcode 255, without touching the line.
                let operation_advance = (255 - header.opcode_base()) / header.line_range();
                regs.advance_operations(header, u64::from(operation_advance));
            }
            constants::DW_LNS_fixed_advance_pc => {
                let delta = cursor.u16()?;
                regs.address = regs.address.wrapping_add(u64::from(delta));
                regs.op_index = 0;
            }
            constants::DW_LNS_set_prologue_end => regs.prologue_end = true,
            constants::DW_LNS_set_epilogue_begin => regs.epilogue_begin = true,
            constants::DW_LNS_set_isa => regs.isa = cursor.uleb128()?,
            _ => return Err(LineError::format(format!("unknown line number opcode {opcode}"))),
        }
        Ok(None)
    }

    fn extended(&self, regs: &mut Registers, cursor: &mut SectionCursor, at: usize) -> Result<Option<Registers>>
    {
        let length = cursor.uleb128()?;
        let end = usize::from_u64(length)?
            .checked_add(cursor.offset())
            .ok_or_else(|| LineError::format(format!("extended opcode length {length:#x} overflows")))?;

        let opcode = DwLne(cursor.u8()?);
        let mut emitted = None;
        match opcode {
            constants::DW_LNE_end_sequence => {
                regs.end_sequence = true;
                emitted = Some(*regs);
                regs.reset(self.header.default_is_stmt());
            }
            constants::DW_LNE_set_address => {
                regs.address = cursor.address(self.header.address_size())?;
                regs.op_index = 0;
            }
            constants::DW_LNE_define_file => self.define_file(cursor, at)?,
            constants::DW_LNE_set_discriminator => regs.discriminator = cursor.uleb128()?,
            _ if opcode.0 >= constants::DW_LNE_lo_user.0 => {
                return Err(LineError::NotImplemented(format!(
                    "vendor line number opcode {opcode}"
                )));
            }
            _ => return Err(LineError::format(format!("unknown line number opcode {opcode}"))),
        }

        if cursor.offset() > end {
            return Err(LineError::format(format!(
                "extended line number opcode {opcode} exceeded its size"
            )));
        }
        cursor.seek(end)?;
        Ok(emitted)
    }

    /// `DW_LNE_define_file`: deprecated in DWARF 5, so only legacy tables grow.
    fn define_file(&self, cursor: &mut SectionCursor, at: usize) -> Result<()>
    {
        let raw = cursor.cstr()?;
        let directory_index = cursor.uleb128()?;
        let timestamp = cursor.uleb128()?;
        let size = cursor.uleb128()?;
        if self.header.version() >= 5 {
            return Ok(());
        }

        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        files.define_file(at, cursor.offset(), raw, directory_index, timestamp, size)
    }
}
