//! Assembler for hand-written line number programs.
//!
//! Tests describe a header and a list of opcodes; `LineProgram::build` lays
//! them out the way a compiler would emit them into `.debug_line`.

#![allow(dead_code)]

use std::sync::Arc;

use gimli::{constants, EndianArcSlice, RunTimeEndian};
use linetab_core::{LineTable, Result, SectionReader, UnitContext};

pub const COMP_DIR: &str = "/src";
pub const UNIT_NAME: &str = "main.c";

pub fn uleb(out: &mut Vec<u8>, mut value: u64)
{
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn sleb(out: &mut Vec<u8>, mut value: i64)
{
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn cstr(out: &mut Vec<u8>, text: &str)
{
    out.extend_from_slice(text.as_bytes());
    out.push(0);
}

pub fn reader(bytes: Vec<u8>) -> SectionReader
{
    EndianArcSlice::new(Arc::from(bytes), RunTimeEndian::Little)
}

/// Context used by most tests: 8-byte addresses, `/src/main.c`.
pub fn context() -> UnitContext
{
    UnitContext::new(8).with_comp_dir(COMP_DIR).with_name(UNIT_NAME)
}

/// A line number program under construction.
///
/// Defaults match what GCC emits for x86-64: `line_base` -5, `line_range` 14,
/// `opcode_base` 13. Legacy tables start with file 1 = `main.c` in the compile
/// directory, and v5 tables list `main.c` as both file 0 and file 1, so the
/// initial `file_index` of 1 always resolves.
#[derive(Debug, Clone)]
pub struct LineProgram
{
    pub version: u16,
    pub dwarf64: bool,
    pub address_size: u8,
    pub minimum_instruction_length: u8,
    pub maximum_operations_per_instruction: u8,
    pub default_is_stmt: bool,
    pub line_base: i8,
    pub line_range: u8,
    pub opcode_base: u8,
    pub standard_opcode_lengths: Vec<u8>,
    /// Overrides the computed `header_length` when set.
    pub header_length: Option<u64>,
    /// Legacy tables: include directories and `(name, dir, mtime, size)` files.
    pub directories: Vec<String>,
    pub files: Vec<(String, u64, u64, u64)>,
    /// v5 tables: raw bytes from the directory format count to the last file.
    pub v5_tables: Vec<u8>,
    pub program: Vec<u8>,
}

impl LineProgram
{
    pub fn new(version: u16) -> Self
    {
        let mut program = Self {
            version,
            dwarf64: false,
            address_size: 8,
            minimum_instruction_length: 1,
            maximum_operations_per_instruction: 1,
            default_is_stmt: true,
            line_base: -5,
            line_range: 14,
            opcode_base: 13,
            standard_opcode_lengths: vec![0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1],
            header_length: None,
            directories: Vec::new(),
            files: vec![("main.c".to_owned(), 0, 0, 0)],
            v5_tables: Vec::new(),
            program: Vec::new(),
        };
        if version == 5 {
            program.v5_tables = V5Tables::new()
                .directory("/src")
                .file("main.c", 0)
                .file("main.c", 0)
                .build();
        }
        program
    }

    /// Drop the default file 1 (`main.c`) of legacy tables.
    pub fn without_files(mut self) -> Self
    {
        self.files.clear();
        self
    }

    pub fn directory(mut self, name: &str) -> Self
    {
        self.directories.push(name.to_owned());
        self
    }

    pub fn file(mut self, name: &str, directory: u64) -> Self
    {
        self.files.push((name.to_owned(), directory, 0, 0));
        self
    }

    pub fn file_with_metadata(mut self, name: &str, directory: u64, mtime: u64, size: u64) -> Self
    {
        self.files.push((name.to_owned(), directory, mtime, size));
        self
    }

    pub fn v5_tables(mut self, tables: Vec<u8>) -> Self
    {
        self.v5_tables = tables;
        self
    }

    // Opcodes

    pub fn raw(mut self, bytes: &[u8]) -> Self
    {
        self.program.extend_from_slice(bytes);
        self
    }

    pub fn special(self, opcode: u8) -> Self
    {
        self.raw(&[opcode])
    }

    pub fn copy(self) -> Self
    {
        self.raw(&[constants::DW_LNS_copy.0])
    }

    pub fn advance_pc(mut self, operation_advance: u64) -> Self
    {
        self.program.push(constants::DW_LNS_advance_pc.0);
        uleb(&mut self.program, operation_advance);
        self
    }

    pub fn advance_line(mut self, delta: i64) -> Self
    {
        self.program.push(constants::DW_LNS_advance_line.0);
        sleb(&mut self.program, delta);
        self
    }

    pub fn set_file(mut self, index: u64) -> Self
    {
        self.program.push(constants::DW_LNS_set_file.0);
        uleb(&mut self.program, index);
        self
    }

    pub fn set_column(mut self, column: u64) -> Self
    {
        self.program.push(constants::DW_LNS_set_column.0);
        uleb(&mut self.program, column);
        self
    }

    pub fn negate_stmt(self) -> Self
    {
        self.raw(&[constants::DW_LNS_negate_stmt.0])
    }

    pub fn set_basic_block(self) -> Self
    {
        self.raw(&[constants::DW_LNS_set_basic_block.0])
    }

    pub fn const_add_pc(self) -> Self
    {
        self.raw(&[constants::DW_LNS_const_add_pc.0])
    }

    pub fn fixed_advance_pc(mut self, delta: u16) -> Self
    {
        self.program.push(constants::DW_LNS_fixed_advance_pc.0);
        self.program.extend_from_slice(&delta.to_le_bytes());
        self
    }

    pub fn set_prologue_end(self) -> Self
    {
        self.raw(&[constants::DW_LNS_set_prologue_end.0])
    }

    pub fn set_epilogue_begin(self) -> Self
    {
        self.raw(&[constants::DW_LNS_set_epilogue_begin.0])
    }

    pub fn set_isa(mut self, isa: u64) -> Self
    {
        self.program.push(constants::DW_LNS_set_isa.0);
        uleb(&mut self.program, isa);
        self
    }

    /// Extended opcode with its declared length computed from `payload`.
    pub fn extended(self, opcode: u8, payload: &[u8]) -> Self
    {
        self.extended_with_length(opcode, payload, payload.len() as u64 + 1)
    }

    pub fn extended_with_length(mut self, opcode: u8, payload: &[u8], length: u64) -> Self
    {
        self.program.push(0);
        uleb(&mut self.program, length);
        self.program.push(opcode);
        self.program.extend_from_slice(payload);
        self
    }

    pub fn end_sequence(self) -> Self
    {
        self.extended(constants::DW_LNE_end_sequence.0, &[])
    }

    pub fn set_address(self, address: u64) -> Self
    {
        let bytes = address.to_le_bytes();
        let size = usize::from(self.address_size);
        self.extended(constants::DW_LNE_set_address.0, &bytes[..size])
    }

    pub fn define_file(self, name: &str, directory: u64) -> Self
    {
        let mut payload = Vec::new();
        cstr(&mut payload, name);
        uleb(&mut payload, directory);
        uleb(&mut payload, 0);
        uleb(&mut payload, 0);
        self.extended(constants::DW_LNE_define_file.0, &payload)
    }

    pub fn set_discriminator(self, discriminator: u64) -> Self
    {
        let mut payload = Vec::new();
        uleb(&mut payload, discriminator);
        self.extended(constants::DW_LNE_set_discriminator.0, &payload)
    }

    /// Lay out the whole subsection, starting with the unit length.
    pub fn build(&self) -> Vec<u8>
    {
        let mut after_header_length = vec![self.minimum_instruction_length];
        if self.version >= 4 {
            after_header_length.push(self.maximum_operations_per_instruction);
        }
        after_header_length.push(u8::from(self.default_is_stmt));
        after_header_length.push(self.line_base as u8);
        after_header_length.push(self.line_range);
        after_header_length.push(self.opcode_base);
        after_header_length.extend_from_slice(&self.standard_opcode_lengths);

        if self.version >= 5 {
            after_header_length.extend_from_slice(&self.v5_tables);
        } else {
            for directory in &self.directories {
                cstr(&mut after_header_length, directory);
            }
            after_header_length.push(0);
            for (name, directory, mtime, size) in &self.files {
                cstr(&mut after_header_length, name);
                uleb(&mut after_header_length, *directory);
                uleb(&mut after_header_length, *mtime);
                uleb(&mut after_header_length, *size);
            }
            after_header_length.push(0);
        }

        let header_length = self.header_length.unwrap_or(after_header_length.len() as u64);
        let mut unit = self.version.to_le_bytes().to_vec();
        if self.version >= 5 {
            unit.push(self.address_size);
            unit.push(0);
        }
        if self.dwarf64 {
            unit.extend_from_slice(&header_length.to_le_bytes());
        } else {
            unit.extend_from_slice(&(header_length as u32).to_le_bytes());
        }
        unit.extend_from_slice(&after_header_length);
        unit.extend_from_slice(&self.program);

        let mut out = Vec::new();
        if self.dwarf64 {
            out.extend_from_slice(&0xffff_ffff_u32.to_le_bytes());
            out.extend_from_slice(&(unit.len() as u64).to_le_bytes());
        } else {
            out.extend_from_slice(&(unit.len() as u32).to_le_bytes());
        }
        out.extend_from_slice(&unit);
        out
    }

    pub fn parse_with(&self, context: &UnitContext) -> Result<LineTable>
    {
        LineTable::parse(&reader(self.build()), 0, context)
    }

    pub fn parse(&self) -> Result<LineTable>
    {
        self.parse_with(&UnitContext::new(self.address_size).with_comp_dir(COMP_DIR).with_name(UNIT_NAME))
    }
}

/// Builder for the DWARF 5 directory and file lists.
///
/// Directories are always `(DW_LNCT_path, DW_FORM_string)`. Files default to
/// `(path, string)` + `(directory_index, udata)`; extra file format entries can
/// be appended together with a writer for their values.
#[derive(Debug, Clone, Default)]
pub struct V5Tables
{
    directories: Vec<String>,
    file_format: Vec<(u16, u16)>,
    files: Vec<Vec<u8>>,
}

impl V5Tables
{
    pub fn new() -> Self
    {
        Self {
            directories: Vec::new(),
            file_format: vec![
                (constants::DW_LNCT_path.0, constants::DW_FORM_string.0),
                (constants::DW_LNCT_directory_index.0, constants::DW_FORM_udata.0),
            ],
            files: Vec::new(),
        }
    }

    pub fn directory(mut self, path: &str) -> Self
    {
        self.directories.push(path.to_owned());
        self
    }

    /// Replace the file entry format.
    pub fn file_format(mut self, format: &[(u16, u16)]) -> Self
    {
        self.file_format = format.to_vec();
        self
    }

    /// Add a file using the default `(path, directory_index)` format.
    pub fn file(mut self, path: &str, directory: u64) -> Self
    {
        let mut entry = Vec::new();
        cstr(&mut entry, path);
        uleb(&mut entry, directory);
        self.files.push(entry);
        self
    }

    /// Add a file whose encoded values are given verbatim.
    pub fn raw_file(mut self, values: Vec<u8>) -> Self
    {
        self.files.push(values);
        self
    }

    pub fn build(&self) -> Vec<u8>
    {
        let mut out = vec![1];
        uleb(&mut out, u64::from(constants::DW_LNCT_path.0));
        uleb(&mut out, u64::from(constants::DW_FORM_string.0));
        uleb(&mut out, self.directories.len() as u64);
        for directory in &self.directories {
            cstr(&mut out, directory);
        }

        out.push(self.file_format.len() as u8);
        for (content_type, form) in &self.file_format {
            uleb(&mut out, u64::from(*content_type));
            uleb(&mut out, u64::from(*form));
        }
        uleb(&mut out, self.files.len() as u64);
        for file in &self.files {
            out.extend_from_slice(file);
        }
        out
    }
}
