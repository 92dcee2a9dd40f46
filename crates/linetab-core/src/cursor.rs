//! Bounds-checked reading over a line table subsection.
//!
//! The byte-level primitives (fixed width integers, LEB128, strings) come
//! from `gimli::Reader`, which reports `UnexpectedEof` instead of reading past
//! the data. This module adds offset bookkeeping relative to the start of the
//! subsection and the DWARF 5 form-driven reads used by entry formats.

use gimli::{constants, DwForm, EndianArcSlice, Format, Reader, ReaderOffset, RunTimeEndian};

use crate::context::StringSections;
use crate::error::{LineError, Result};

/// Shared, reference-counted section bytes.
pub type SectionReader = EndianArcSlice<RunTimeEndian>;

/// A read position inside one line table subsection.
///
/// Offsets are relative to the first byte of the subsection (the unit length
/// field), which is also how `program_offset` is expressed.
#[derive(Debug, Clone)]
pub(crate) struct SectionCursor
{
    base: SectionReader,
    rest: SectionReader,
}

impl SectionCursor
{
    pub(crate) fn new(base: SectionReader) -> Self
    {
        Self {
            rest: base.clone(),
            base,
        }
    }

    /// Position a cursor at `offset` bytes into `base`.
    pub(crate) fn at(base: &SectionReader, offset: usize) -> Result<Self>
    {
        let mut cursor = Self::new(base.clone());
        cursor.rest.skip(offset)?;
        Ok(cursor)
    }

    pub(crate) fn offset(&self) -> usize
    {
        self.rest.offset_from(&self.base)
    }

    pub(crate) fn is_empty(&self) -> bool
    {
        self.rest.is_empty()
    }

    /// Move to an absolute offset at or after the current one.
    pub(crate) fn seek(&mut self, offset: usize) -> Result<()>
    {
        let current = self.offset();
        if offset < current {
            return Err(LineError::format(format!(
                "cannot seek backwards from offset {current:#x} to {offset:#x}"
            )));
        }
        self.rest.skip(offset - current)?;
        Ok(())
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<()>
    {
        self.rest.skip(len)?;
        Ok(())
    }

    /// Read a unit length, detecting 32-bit or 64-bit DWARF.
    pub(crate) fn initial_length(&mut self) -> Result<(usize, Format)>
    {
        Ok(self.rest.read_initial_length()?)
    }

    pub(crate) fn u8(&mut self) -> Result<u8>
    {
        Ok(self.rest.read_u8()?)
    }

    pub(crate) fn i8(&mut self) -> Result<i8>
    {
        Ok(self.rest.read_i8()?)
    }

    pub(crate) fn u16(&mut self) -> Result<u16>
    {
        Ok(self.rest.read_u16()?)
    }

    pub(crate) fn u32(&mut self) -> Result<u32>
    {
        Ok(self.rest.read_u32()?)
    }

    pub(crate) fn u64(&mut self) -> Result<u64>
    {
        Ok(self.rest.read_u64()?)
    }

    pub(crate) fn uleb128(&mut self) -> Result<u64>
    {
        Ok(self.rest.read_uleb128()?)
    }

    pub(crate) fn sleb128(&mut self) -> Result<i64>
    {
        Ok(self.rest.read_sleb128()?)
    }

    /// Read a target address of `address_size` bytes.
    pub(crate) fn address(&mut self, address_size: u8) -> Result<u64>
    {
        Ok(self.rest.read_address(address_size)?)
    }

    /// Read a section offset whose width depends on the DWARF format.
    pub(crate) fn section_offset(&mut self, format: Format) -> Result<usize>
    {
        Ok(self.rest.read_offset(format)?)
    }

    /// Read a null-terminated string, replacing invalid UTF-8.
    pub(crate) fn cstr(&mut self) -> Result<String>
    {
        let bytes = self.rest.read_null_terminated_slice()?;
        Ok(bytes.to_string_lossy()?.into_owned())
    }
}

/// Reads attribute values encoded in a `DW_FORM_*`.
///
/// Only the forms DWARF 5 allows in line table entry formats are decoded;
/// anything else can still be skipped so vendor content types do not
/// desynchronize the entries that follow.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FormReader<'a>
{
    format: Format,
    address_size: u8,
    strings: &'a StringSections,
}

impl<'a> FormReader<'a>
{
    pub(crate) fn new(format: Format, address_size: u8, strings: &'a StringSections) -> Self
    {
        Self {
            format,
            address_size,
            strings,
        }
    }

    /// Read a string-class value.
    pub(crate) fn string(&self, cursor: &mut SectionCursor, form: DwForm) -> Result<String>
    {
        match form {
            constants::DW_FORM_string => cursor.cstr(),
            constants::DW_FORM_strp => {
                let offset = cursor.section_offset(self.format)?;
                string_at(self.section(self.strings.debug_str.as_ref(), ".debug_str", form)?, offset)
            }
            constants::DW_FORM_line_strp => {
                let offset = cursor.section_offset(self.format)?;
                string_at(self.section(self.strings.debug_line_str.as_ref(), ".debug_line_str", form)?, offset)
            }
            constants::DW_FORM_strp_sup => {
                let offset = cursor.section_offset(self.format)?;
                string_at(self.section(self.strings.debug_str_sup.as_ref(), ".debug_str_sup", form)?, offset)
            }
            constants::DW_FORM_strx => {
                let index = cursor.uleb128()?;
                self.indexed_string(index, form)
            }
            constants::DW_FORM_strx1 => {
                let index = cursor.u8()?;
                self.indexed_string(u64::from(index), form)
            }
            constants::DW_FORM_strx2 => {
                let index = cursor.u16()?;
                self.indexed_string(u64::from(index), form)
            }
            constants::DW_FORM_strx4 => {
                let index = cursor.u32()?;
                self.indexed_string(u64::from(index), form)
            }
            _ => Err(LineError::format(format!("{form} is not a string form"))),
        }
    }

    /// Read a constant-class unsigned value.
    pub(crate) fn unsigned(&self, cursor: &mut SectionCursor, form: DwForm) -> Result<u64>
    {
        match form {
            constants::DW_FORM_data1 => Ok(u64::from(cursor.u8()?)),
            constants::DW_FORM_data2 => Ok(u64::from(cursor.u16()?)),
            constants::DW_FORM_data4 => Ok(u64::from(cursor.u32()?)),
            constants::DW_FORM_data8 => cursor.u64(),
            constants::DW_FORM_udata => cursor.uleb128(),
            _ => Err(LineError::format(format!("{form} is not an unsigned constant form"))),
        }
    }

    /// Skip over one value of the given form.
    pub(crate) fn skip(&self, cursor: &mut SectionCursor, form: DwForm) -> Result<()>
    {
        let len = match form {
            constants::DW_FORM_flag_present | constants::DW_FORM_implicit_const => 0,
            constants::DW_FORM_data1
            | constants::DW_FORM_flag
            | constants::DW_FORM_ref1
            | constants::DW_FORM_strx1
            | constants::DW_FORM_addrx1 => 1,
            constants::DW_FORM_data2 | constants::DW_FORM_ref2 | constants::DW_FORM_strx2 | constants::DW_FORM_addrx2 => 2,
            constants::DW_FORM_strx3 | constants::DW_FORM_addrx3 => 3,
            constants::DW_FORM_data4
            | constants::DW_FORM_ref4
            | constants::DW_FORM_ref_sup4
            | constants::DW_FORM_strx4
            | constants::DW_FORM_addrx4 => 4,
            constants::DW_FORM_data8 | constants::DW_FORM_ref8 | constants::DW_FORM_ref_sig8 | constants::DW_FORM_ref_sup8 => 8,
            constants::DW_FORM_data16 => 16,
            constants::DW_FORM_addr => usize::from(self.address_size),
            constants::DW_FORM_strp
            | constants::DW_FORM_line_strp
            | constants::DW_FORM_strp_sup
            | constants::DW_FORM_sec_offset
            | constants::DW_FORM_ref_addr
            | constants::DW_FORM_GNU_strp_alt
            | constants::DW_FORM_GNU_ref_alt => usize::from(self.format.word_size()),
            constants::DW_FORM_udata
            | constants::DW_FORM_strx
            | constants::DW_FORM_addrx
            | constants::DW_FORM_ref_udata
            | constants::DW_FORM_loclistx
            | constants::DW_FORM_rnglistx => {
                cursor.uleb128()?;
                0
            }
            constants::DW_FORM_sdata => {
                cursor.sleb128()?;
                0
            }
            constants::DW_FORM_string => {
                cursor.cstr()?;
                0
            }
            constants::DW_FORM_block1 => usize::from(cursor.u8()?),
            constants::DW_FORM_block2 => usize::from(cursor.u16()?),
            constants::DW_FORM_block4 => usize::from_u32(cursor.u32()?),
            constants::DW_FORM_block | constants::DW_FORM_exprloc => usize::from_u64(cursor.uleb128()?)?,
            _ => return Err(LineError::format(format!("cannot skip value of unsupported {form}"))),
        };
        cursor.skip(len)
    }

    fn section(&self, section: Option<&'a SectionReader>, name: &'static str, form: DwForm) -> Result<&'a SectionReader>
    {
        section.ok_or(LineError::MissingSection { section: name, form })
    }

    fn indexed_string(&self, index: u64, form: DwForm) -> Result<String>
    {
        let offsets = self.section(self.strings.debug_str_offsets.as_ref(), ".debug_str_offsets", form)?;
        let entry = usize::from_u64(index)?
            .checked_mul(usize::from(self.format.word_size()))
            .and_then(|delta| delta.checked_add(self.strings.str_offsets_base))
            .ok_or_else(|| LineError::format(format!("string offset index {index} overflows")))?;

        let mut reader = offsets.clone();
        reader.skip(entry)?;
        let offset = reader.read_offset(self.format)?;
        string_at(self.section(self.strings.debug_str.as_ref(), ".debug_str", form)?, offset)
    }
}

fn string_at(section: &SectionReader, offset: usize) -> Result<String>
{
    let mut reader = section.clone();
    reader.skip(offset)?;
    let bytes = reader.read_null_terminated_slice()?;
    Ok(bytes.to_string_lossy()?.into_owned())
}
