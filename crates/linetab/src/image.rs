//! Binary loading and compilation unit discovery.
//!
//! Reads the DWARF sections out of an ELF, Mach-O, or PE file with `object`,
//! then walks `.debug_info` with `gimli` to find each unit's line table and
//! the attributes the decoder needs to resolve it.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gimli::{
    constants, AttributeValue, DebugStrOffsetsBase, Dwarf, EndianArcSlice, Format, Reader, RunTimeEndian, SectionId,
};
use linetab_core::{LineTable, SectionReader, StringSections, UnitContext};
use object::{Object, ObjectSection};
use tracing::{debug, warn};

use crate::CliError;

/// Section names in ELF/PE and their Mach-O spelling (truncated to 16 bytes).
const DWARF_SECTIONS: &[(&str, &[&str])] = &[
    (".debug_abbrev", &[".debug_abbrev", "__debug_abbrev"]),
    (".debug_addr", &[".debug_addr", "__debug_addr"]),
    (".debug_info", &[".debug_info", "__debug_info"]),
    (".debug_line", &[".debug_line", "__debug_line"]),
    (".debug_line_str", &[".debug_line_str", "__debug_line_str"]),
    (".debug_str", &[".debug_str", "__debug_str"]),
    (".debug_str_offsets", &[".debug_str_offsets", "__debug_str_offs"]),
    (".debug_str_sup", &[".debug_str_sup"]),
];

/// Placeholder for units without `DW_AT_comp_dir`.
const UNKNOWN_COMP_DIR: &str = "./";

fn load_section_bytes(file: &object::File<'_>, names: &[&str]) -> Result<Option<Arc<[u8]>>, CliError>
{
    for name in names {
        if let Some(section) = file.section_by_name(name) {
            let data = section.uncompressed_data()?;
            return Ok(Some(match data {
                Cow::Borrowed(bytes) => Arc::from(bytes),
                Cow::Owned(vec) => vec.into(),
            }));
        }
    }
    Ok(None)
}

/// Resolve a string-valued attribute of a unit's root DIE.
fn attr_string(
    dwarf: &Dwarf<SectionReader>,
    format: Format,
    str_offsets_base: DebugStrOffsetsBase,
    value: AttributeValue<SectionReader>,
) -> Result<SectionReader, gimli::Error>
{
    match value {
        AttributeValue::String(string) => Ok(string),
        AttributeValue::DebugStrRef(offset) => dwarf.string(offset),
        AttributeValue::DebugStrRefSup(offset) => dwarf.sup_string(offset),
        AttributeValue::DebugLineStrRef(offset) => dwarf.line_string(offset),
        AttributeValue::DebugStrOffsetsIndex(index) => {
            let offset = dwarf.debug_str_offsets.get_str_offset(format, str_offsets_base, index)?;
            dwarf.string(offset)
        }
        _ => Err(gimli::Error::ExpectedStringAttributeValue),
    }
}

/// One compilation unit that has a line table.
#[derive(Debug, Clone)]
pub struct UnitLines
{
    /// Position among the units with line tables, as accepted by `--unit`.
    pub index: usize,
    /// `DW_AT_stmt_list`: offset of the line table in `.debug_line`.
    pub offset: usize,
    pub context: UnitContext,
}

/// DWARF sections of one binary, loaded into memory.
pub struct DebugImage
{
    path: PathBuf,
    endian: RunTimeEndian,
    sections: HashMap<&'static str, Arc<[u8]>>,
}

impl DebugImage
{
    pub fn open(path: &Path) -> Result<Self, CliError>
    {
        let data = fs::read(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file = object::File::parse(&*data)?;
        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let mut sections = HashMap::new();
        for (canonical, aliases) in DWARF_SECTIONS {
            if let Some(bytes) = load_section_bytes(&file, aliases)? {
                debug!(section = canonical, size = bytes.len(), "loaded DWARF section");
                sections.insert(*canonical, bytes);
            }
        }
        if !sections.contains_key(".debug_line") {
            warn!(path = %path.display(), "binary has no .debug_line section");
        }

        Ok(Self {
            path: path.to_path_buf(),
            endian,
            sections,
        })
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }

    fn section(&self, name: &str) -> Option<SectionReader>
    {
        self.sections
            .get(name)
            .map(|data| EndianArcSlice::new(Arc::clone(data), self.endian))
    }

    fn section_or_empty(&self, id: SectionId) -> SectionReader
    {
        self.section(id.name())
            .unwrap_or_else(|| EndianArcSlice::new(Arc::from(&[][..]), self.endian))
    }

    fn string_sections(&self) -> StringSections
    {
        StringSections {
            debug_str: self.section(".debug_str"),
            debug_line_str: self.section(".debug_line_str"),
            debug_str_sup: self.section(".debug_str_sup"),
            debug_str_offsets: self.section(".debug_str_offsets"),
            str_offsets_base: 0,
        }
    }

    /// List every unit in `.debug_info` that references a line table.
    ///
    /// Only the root DIE of each unit is read. The line tables themselves are
    /// left to [`DebugImage::line_table`], so one malformed table does not
    /// hide the others.
    pub fn units(&self) -> Result<Vec<UnitLines>, CliError>
    {
        let dwarf = Dwarf::load(|id| Ok::<_, gimli::Error>(self.section_or_empty(id)))?;

        let mut units = Vec::new();
        let mut headers = dwarf.units();
        while let Some(header) = headers.next()? {
            let abbrevs = dwarf.abbreviations(&header)?;
            let mut entries = header.entries(&abbrevs);
            let Some((_, root)) = entries.next_dfs()? else {
                continue;
            };

            let Some(AttributeValue::DebugLineRef(offset)) = root.attr_value(constants::DW_AT_stmt_list)? else {
                continue;
            };
            let str_offsets_base = match root.attr_value(constants::DW_AT_str_offsets_base)? {
                Some(AttributeValue::DebugStrOffsetsBase(base)) => base,
                _ => DebugStrOffsetsBase(0),
            };
            let root_string = |name: constants::DwAt| -> Result<Option<String>, gimli::Error> {
                match root.attr_value(name)? {
                    Some(value) => {
                        let string = attr_string(&dwarf, header.format(), str_offsets_base, value)?;
                        Ok(Some(string.to_string_lossy()?.into_owned()))
                    }
                    None => Ok(None),
                }
            };

            let comp_dir = root_string(constants::DW_AT_comp_dir)?.unwrap_or_else(|| UNKNOWN_COMP_DIR.to_owned());
            let name = root_string(constants::DW_AT_name)?.unwrap_or_else(|| format!("<unit {}>", units.len()));
            let strings = StringSections {
                str_offsets_base: str_offsets_base.0,
                ..self.string_sections()
            };

            let context = UnitContext::new(header.address_size())
                .with_comp_dir(comp_dir)
                .with_name(name)
                .with_strings(strings);
            units.push(UnitLines {
                index: units.len(),
                offset: offset.0,
                context,
            });
        }

        debug!(path = %self.path.display(), units = units.len(), "discovered units with line tables");
        Ok(units)
    }

    /// Decode the line table of `unit`.
    pub fn line_table(&self, unit: &UnitLines) -> Result<LineTable, CliError>
    {
        let debug_line = self.section(".debug_line").ok_or(CliError::MissingDebugLine)?;
        Ok(LineTable::parse(&debug_line, unit.offset, &unit.context)?)
    }
}

#[cfg(test)]
mod tests
{
    use linetab_core::LineError;

    use super::*;

    const ABBREV_WITH_LINES: u8 = 1;
    const ABBREV_WITHOUT_LINES: u8 = 2;

    /// Abbreviation 1: a childless `DW_TAG_compile_unit` with name, comp_dir,
    /// and stmt_list. Abbreviation 2: the same with only a name.
    fn debug_abbrev() -> Vec<u8>
    {
        vec![
            ABBREV_WITH_LINES, 0x11, 0, 0x03, 0x08, 0x1b, 0x08, 0x10, 0x17, 0, 0,
            ABBREV_WITHOUT_LINES, 0x11, 0, 0x03, 0x08, 0, 0,
            0,
        ]
    }

    /// A DWARF 4 compilation unit with 8-byte addresses.
    fn compile_unit(name: &str, stmt_list: Option<u32>) -> Vec<u8>
    {
        let mut die = vec![if stmt_list.is_some() { ABBREV_WITH_LINES } else { ABBREV_WITHOUT_LINES }];
        die.extend_from_slice(name.as_bytes());
        die.push(0);
        if let Some(offset) = stmt_list {
            die.extend_from_slice(b"/src\0");
            die.extend_from_slice(&offset.to_le_bytes());
        }

        let mut body = Vec::new();
        body.extend_from_slice(&4_u16.to_le_bytes());
        body.extend_from_slice(&0_u32.to_le_bytes());
        body.push(8);
        body.extend_from_slice(&die);

        let mut unit = u32::try_from(body.len()).unwrap().to_le_bytes().to_vec();
        unit.extend_from_slice(&body);
        unit
    }

    /// A valid v4 table at offset 0 and a version 7 table at offset 41.
    fn debug_line() -> Vec<u8>
    {
        let mut line = Vec::new();
        line.extend_from_slice(&37_u32.to_le_bytes());
        line.extend_from_slice(&4_u16.to_le_bytes());
        line.extend_from_slice(&27_u32.to_le_bytes());
        line.extend_from_slice(&[1, 1, 1, 0xfb, 14, 13]);
        line.extend_from_slice(&[0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
        line.push(0);
        line.extend_from_slice(b"a.c\0");
        line.extend_from_slice(&[0, 0, 0, 0]);
        // DW_LNS_copy, DW_LNE_end_sequence
        line.extend_from_slice(&[0x01, 0x00, 0x01, 0x01]);
        assert_eq!(line.len(), 41);

        line.extend_from_slice(&2_u32.to_le_bytes());
        line.extend_from_slice(&7_u16.to_le_bytes());
        line
    }

    fn image() -> DebugImage
    {
        let mut info = compile_unit("good.c", Some(0));
        info.extend(compile_unit("asm.s", None));
        info.extend(compile_unit("bad.c", Some(41)));

        let sections: HashMap<&'static str, Arc<[u8]>> = HashMap::from([
            (".debug_abbrev", Arc::from(debug_abbrev())),
            (".debug_info", Arc::from(info)),
            (".debug_line", Arc::from(debug_line())),
        ]);
        DebugImage {
            path: PathBuf::from("test.o"),
            endian: RunTimeEndian::Little,
            sections,
        }
    }

    #[test]
    fn test_units_read_root_attributes()
    {
        let units = image().units().unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!((units[0].index, units[0].offset), (0, 0));
        assert_eq!(units[0].context.name(), "good.c");
        assert_eq!(units[0].context.comp_dir(), "/src");
        assert_eq!(units[0].context.address_size(), 8);
        assert_eq!((units[1].index, units[1].offset), (1, 41));
        assert_eq!(units[1].context.name(), "bad.c");
    }

    #[test]
    fn test_bad_line_table_only_fails_its_own_unit()
    {
        let image = image();
        let units = image.units().unwrap();

        let table = image.line_table(&units[0]).unwrap();
        let rows: Vec<_> = table.rows().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].file().path(), "/src/a.c");

        match image.line_table(&units[1]) {
            Err(CliError::Line(LineError::Format(message))) => assert!(message.contains("version 7"), "{message}"),
            Err(other) => panic!("Expected Format error, got {other}"),
            Ok(_) => panic!("Expected Format error"),
        }
    }
}
