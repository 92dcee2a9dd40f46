//! # Line Table Header
//!
//! Decoding of the per-version line number program header.
//!
//! Layout differences by version (DWARF2 §6.2.4, DWARF3 §6.2.4, DWARF4 §6.2.3,
//! DWARF5 §6.2.4):
//!
//! - **v2/v3**: no `maximum_operations_per_instruction` (implicitly 1).
//! - **v4**: adds `maximum_operations_per_instruction` for VLIW targets.
//! - **v5**: adds `address_size`/`segment_selector_size` after the version and
//!   replaces the null-terminated directory/file lists with lists described by
//!   *entry formats* (pairs of content type and form).
//!
//! The header is validated strictly: a zero divisor or a standard opcode
//! length that disagrees with the DWARF definition is rejected before any
//! opcode runs.

use gimli::{constants, DwForm, DwLnct, Format, Reader};
use smallvec::SmallVec;
use tracing::debug;

use crate::context::UnitContext;
use crate::cursor::{FormReader, SectionCursor, SectionReader};
use crate::error::{LineError, Result};
use crate::files::FileTable;

/// Operand counts of the standard opcodes, indexed by opcode number.
///
/// Index 0 is unused; 1 is `DW_LNS_copy` and 12 is `DW_LNS_set_isa`.
pub const STANDARD_OPCODE_LENGTHS: [u8; 13] = [
    0, // unused
    0, 1, 1, 1, 1, // copy, advance_pc, advance_line, set_file, set_column
    0, 0, 0, 1, 0, // negate_stmt, set_basic_block, const_add_pc, fixed_advance_pc, set_prologue_end
    0, 1, // set_epilogue_begin, set_isa
];

/// One `(content type, form)` pair of a DWARF 5 entry format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatEntry
{
    content_type: DwLnct,
    form: DwForm,
}

impl FormatEntry
{
    fn read(cursor: &mut SectionCursor) -> Result<Self>
    {
        let content_type = cursor.uleb128()?;
        let form = cursor.uleb128()?;
        let content_type = u16::try_from(content_type)
            .map_err(|_| LineError::format(format!("entry format content type {content_type:#x} out of range")))?;
        let form =
            u16::try_from(form).map_err(|_| LineError::format(format!("entry format form {form:#x} out of range")))?;
        Ok(Self {
            content_type: DwLnct(content_type),
            form: DwForm(form),
        })
    }

    pub fn content_type(&self) -> DwLnct
    {
        self.content_type
    }

    pub fn form(&self) -> DwForm
    {
        self.form
    }
}

/// Entry format of a v5 directory or file list.
pub type EntryFormat = SmallVec<[FormatEntry; 5]>;

/// Decoded line number program header.
#[derive(Debug, Clone)]
pub struct Header
{
    version: u16,
    format: Format,
    unit_length: usize,
    address_size: u8,
    segment_selector_size: u8,
    header_length: usize,
    program_offset: usize,
    minimum_instruction_length: u8,
    maximum_operations_per_instruction: u8,
    default_is_stmt: bool,
    line_base: i8,
    line_range: u8,
    opcode_base: u8,
    standard_opcode_lengths: Vec<u8>,
    directory_format: EntryFormat,
    file_format: EntryFormat,
}

impl Header
{
    /// Parse a header from the start of a line table subsection.
    ///
    /// Returns the header together with the directory/file table it declares.
    pub(crate) fn parse(subsection: &SectionReader, context: &UnitContext) -> Result<(Self, FileTable)>
    {
        let mut cursor = SectionCursor::new(subsection.clone());
        let (unit_length, format) = cursor.initial_length()?;

        let version = cursor.u16()?;
        if !(2..=5).contains(&version) {
            return Err(LineError::format(format!("unknown line number table version {version}")));
        }

        let (address_size, segment_selector_size) = if version == 5 {
            (cursor.u8()?, cursor.u8()?)
        } else {
            (context.address_size(), 0)
        };

        let header_length = cursor.section_offset(format)?;
        let total_size = subsection.len();
        let program_offset = cursor
            .offset()
            .checked_add(header_length)
            .filter(|offset| *offset <= total_size)
            .ok_or_else(|| {
                LineError::format(format!(
                    "header length {header_length:#x} overruns line table of {total_size:#x} bytes"
                ))
            })?;

        let minimum_instruction_length = cursor.u8()?;
        let maximum_operations_per_instruction = if version >= 4 { cursor.u8()? } else { 1 };
        if maximum_operations_per_instruction == 0 {
            return Err(LineError::format(
                "maximum_operations_per_instruction cannot be 0 in line number table",
            ));
        }

        let default_is_stmt = cursor.u8()? != 0;
        let line_base = cursor.i8()?;
        let line_range = cursor.u8()?;
        if line_range == 0 {
            return Err(LineError::format("line_range cannot be 0 in line number table"));
        }
        let opcode_base = cursor.u8()?;
        if opcode_base == 0 {
            return Err(LineError::format("opcode_base cannot be 0 in line number table"));
        }

        let mut standard_opcode_lengths = vec![0; usize::from(opcode_base)];
        for opcode in 1..opcode_base {
            let length = cursor.u8()?;
            if let Some(&expected) = STANDARD_OPCODE_LENGTHS.get(usize::from(opcode)) {
                if length != expected {
                    return Err(LineError::format(format!(
                        "expected {expected} arguments for line number opcode {opcode}, got {length}"
                    )));
                }
            }
            standard_opcode_lengths[usize::from(opcode)] = length;
        }

        let mut directory_format = EntryFormat::new();
        let mut file_format = EntryFormat::new();
        let files = if version == 5 {
            let forms = FormReader::new(format, address_size, context.strings());
            directory_format = read_directory_format(&mut cursor)?;
            let mut files = FileTable::read_v5_directories(&mut cursor, &forms, &directory_format, context)?;
            file_format = read_file_format(&mut cursor)?;
            files.read_v5_files(&mut cursor, &forms, &file_format)?;
            files
        } else {
            FileTable::read_legacy(&mut cursor, context)?
        };

        if cursor.offset() != program_offset {
            debug!(
                tables_end = cursor.offset(),
                program_offset, "line table header length disagrees with its directory/file tables"
            );
        }

        let header = Self {
            version,
            format,
            unit_length,
            address_size,
            segment_selector_size,
            header_length,
            program_offset,
            minimum_instruction_length,
            maximum_operations_per_instruction,
            default_is_stmt,
            line_base,
            line_range,
            opcode_base,
            standard_opcode_lengths,
            directory_format,
            file_format,
        };
        Ok((header, files))
    }

    /// DWARF version of the line table (2 through 5).
    pub fn version(&self) -> u16
    {
        self.version
    }

    /// 32-bit or 64-bit DWARF.
    pub fn format(&self) -> Format
    {
        self.format
    }

    /// Length of the subsection, excluding the initial length field.
    pub fn unit_length(&self) -> usize
    {
        self.unit_length
    }

    /// Size in bytes of a target address in `DW_LNE_set_address`.
    pub fn address_size(&self) -> u8
    {
        self.address_size
    }

    pub fn segment_selector_size(&self) -> u8
    {
        self.segment_selector_size
    }

    pub fn header_length(&self) -> usize
    {
        self.header_length
    }

    /// Offset of the first opcode, relative to the start of the subsection.
    pub fn program_offset(&self) -> usize
    {
        self.program_offset
    }

    pub fn minimum_instruction_length(&self) -> u8
    {
        self.minimum_instruction_length
    }

    pub fn maximum_operations_per_instruction(&self) -> u8
    {
        self.maximum_operations_per_instruction
    }

    pub fn default_is_stmt(&self) -> bool
    {
        self.default_is_stmt
    }

    pub fn line_base(&self) -> i8
    {
        self.line_base
    }

    pub fn line_range(&self) -> u8
    {
        self.line_range
    }

    /// First special opcode number.
    pub fn opcode_base(&self) -> u8
    {
        self.opcode_base
    }

    /// Operand counts per standard opcode; index 0 is unused.
    pub fn standard_opcode_lengths(&self) -> &[u8]
    {
        &self.standard_opcode_lengths
    }

    /// Entry format of the v5 directory list (empty for older versions).
    pub fn directory_format(&self) -> &[FormatEntry]
    {
        &self.directory_format
    }

    /// Entry format of the v5 file list (empty for older versions).
    pub fn file_format(&self) -> &[FormatEntry]
    {
        &self.file_format
    }
}

/// Slice one line table out of `.debug_line`.
///
/// The result spans the initial length field plus `unit_length` bytes.
pub(crate) fn subsection(debug_line: &SectionReader, offset: usize) -> Result<SectionReader>
{
    let mut cursor = SectionCursor::at(debug_line, offset)?;
    let (unit_length, format) = cursor.initial_length()?;
    let total = usize::from(format.initial_length_size())
        .checked_add(unit_length)
        .ok_or_else(|| LineError::format(format!("unit length {unit_length:#x} overflows")))?;

    let mut subsection = debug_line.clone();
    subsection.skip(offset)?;
    subsection.truncate(total)?;
    Ok(subsection)
}

fn is_path_form(form: DwForm) -> bool
{
    matches!(
        form,
        constants::DW_FORM_string
            | constants::DW_FORM_line_strp
            | constants::DW_FORM_strp
            | constants::DW_FORM_strp_sup
            | constants::DW_FORM_strx
            | constants::DW_FORM_strx1
            | constants::DW_FORM_strx2
            | constants::DW_FORM_strx4
    )
}

/// Whether DWARF 5 permits `form` for `content_type` in a file entry format.
///
/// Vendor content types are accepted with any form; their values are skipped.
fn is_allowed_file_form(content_type: DwLnct, form: DwForm) -> bool
{
    match content_type {
        constants::DW_LNCT_path => is_path_form(form),
        constants::DW_LNCT_directory_index => matches!(
            form,
            constants::DW_FORM_data1 | constants::DW_FORM_data2 | constants::DW_FORM_udata
        ),
        constants::DW_LNCT_timestamp => matches!(
            form,
            constants::DW_FORM_data4 | constants::DW_FORM_data8 | constants::DW_FORM_udata | constants::DW_FORM_block
        ),
        constants::DW_LNCT_size => matches!(
            form,
            constants::DW_FORM_data1
                | constants::DW_FORM_data2
                | constants::DW_FORM_data4
                | constants::DW_FORM_data8
                | constants::DW_FORM_udata
        ),
        constants::DW_LNCT_MD5 => form == constants::DW_FORM_data16,
        _ => true,
    }
}

fn read_directory_format(cursor: &mut SectionCursor) -> Result<EntryFormat>
{
    let count = cursor.u8()?;
    if count != 1 {
        return Err(LineError::format(format!("unexpected directory format entry count {count}")));
    }
    let entry = FormatEntry::read(cursor)?;
    if entry.content_type != constants::DW_LNCT_path {
        return Err(LineError::format(format!(
            "unexpected directory format entry type {}",
            entry.content_type
        )));
    }
    if !is_path_form(entry.form) {
        return Err(LineError::format(format!("unexpected directory format entry form {}", entry.form)));
    }
    Ok(EntryFormat::from_elem(entry, 1))
}

fn read_file_format(cursor: &mut SectionCursor) -> Result<EntryFormat>
{
    let count = cursor.u8()?;
    if count == 0 {
        return Err(LineError::format("unexpected file format entry count 0"));
    }
    let mut entries = EntryFormat::new();
    for _ in 0..count {
        let entry = FormatEntry::read(cursor)?;
        if !is_allowed_file_form(entry.content_type, entry.form) {
            return Err(LineError::format(format!(
                "unexpected file format entry type {} form {}",
                entry.content_type, entry.form
            )));
        }
        entries.push(entry);
    }
    Ok(entries)
}
