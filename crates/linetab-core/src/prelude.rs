//! Common module for library exports

pub use crate::context::{StringSections, UnitContext};
pub use crate::cursor::SectionReader;
pub use crate::error::{LineError, Result};
pub use crate::files::FileEntry;
pub use crate::header::Header;
pub use crate::line_table::LineTable;
pub use crate::rows::{LineRows, Row};
