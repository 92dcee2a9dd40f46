//! # Unit Context
//!
//! Values a line table needs from its compilation unit.
//!
//! The line number program does not stand alone: legacy tables inherit the
//! address size from the unit header, resolve relative paths against the
//! unit's `DW_AT_comp_dir`, and use `DW_AT_name` as file 0. Version 5 tables
//! may also store their paths in string sections. Resolving those attributes
//! is the DIE reader's job; this module only carries the results.
//!
//! ## Example
//!
//! ```rust
//! use linetab_core::UnitContext;
//!
//! let context = UnitContext::new(8)
//!     .with_comp_dir("/home/user/project")
//!     .with_name("src/main.c");
//! assert_eq!(context.address_size(), 8);
//! assert_eq!(context.comp_dir(), "/home/user/project");
//! ```

use crate::cursor::SectionReader;

/// String sections referenced by DWARF 5 string forms.
///
/// Every section is optional; a table that only uses `DW_FORM_string` needs
/// none of them. Reading a form whose section is absent fails with
/// [`LineError::MissingSection`](crate::LineError::MissingSection).
#[derive(Debug, Clone, Default)]
pub struct StringSections
{
    /// `.debug_str`, target of `DW_FORM_strp` and `DW_FORM_strx*`
    pub debug_str: Option<SectionReader>,
    /// `.debug_line_str`, target of `DW_FORM_line_strp`
    pub debug_line_str: Option<SectionReader>,
    /// `.debug_str` of the supplementary object file, target of `DW_FORM_strp_sup`
    pub debug_str_sup: Option<SectionReader>,
    /// `.debug_str_offsets`, indexed by `DW_FORM_strx*`
    pub debug_str_offsets: Option<SectionReader>,
    /// The unit's `DW_AT_str_offsets_base`
    pub str_offsets_base: usize,
}

/// Already-resolved compilation unit attributes.
#[derive(Debug, Clone)]
pub struct UnitContext
{
    address_size: u8,
    comp_dir: String,
    name: String,
    strings: StringSections,
}

impl UnitContext
{
    /// Create a context for a unit with the given address size in bytes.
    #[must_use]
    pub fn new(address_size: u8) -> Self
    {
        Self {
            address_size,
            comp_dir: String::new(),
            name: String::new(),
            strings: StringSections::default(),
        }
    }

    /// Set the compile directory (`DW_AT_comp_dir`).
    #[must_use]
    pub fn with_comp_dir(mut self, comp_dir: impl Into<String>) -> Self
    {
        self.comp_dir = comp_dir.into();
        self
    }

    /// Set the unit name (`DW_AT_name`), used as file 0 of legacy tables.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self
    {
        self.name = name.into();
        self
    }

    /// Attach the string sections used by DWARF 5 string forms.
    #[must_use]
    pub fn with_strings(mut self, strings: StringSections) -> Self
    {
        self.strings = strings;
        self
    }

    pub fn address_size(&self) -> u8
    {
        self.address_size
    }

    pub fn comp_dir(&self) -> &str
    {
        &self.comp_dir
    }

    pub fn name(&self) -> &str
    {
        &self.name
    }

    pub fn strings(&self) -> &StringSections
    {
        &self.strings
    }
}
