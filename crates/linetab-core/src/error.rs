//! # Error Types
//!
//! Error handling for line table decoding.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

/// Main error type for line table operations
///
/// Every failure is returned from the operation that detected it (table
/// construction, iterator advance, or lookup). Nothing is logged and swallowed:
/// once the bytecode is misread, every following byte would be misinterpreted too.
///
/// ## Error Categories
///
/// 1. **Encoding errors**: Format (header, opcode, or path violates DWARF)
/// 2. **Lookup errors**: OutOfRange (file index missing after a full scan)
/// 3. **Unsupported input**: NotImplemented (vendor opcodes), MissingSection
/// 4. **Truncated input**: Read (a bounds-checked cursor read ran off the data)
#[derive(Error, Debug)]
pub enum LineError
{
    /// The header or bytecode violates the DWARF encoding contract
    ///
    /// Examples:
    /// - Unsupported version (outside 2..=5)
    /// - `line_range` or `maximum_operations_per_instruction` of zero
    /// - Standard opcode lengths that disagree with the DWARF definition
    /// - Disallowed content-type/form combination in a v5 descriptor
    /// - An extended opcode that reads past its declared length
    /// - Unknown standard or extended opcode
    /// - The program ends without a row-emitting opcode
    /// - Empty directory or file path
    #[error("Format error: {0}")]
    Format(String),

    /// A file index has no entry, even after the whole program was executed
    #[error("File name index {index} exceeds file table size of {size}")]
    OutOfRange
    {
        /// Requested file index
        index: u64,
        /// Number of entries in the complete file table
        size: usize,
    },

    /// A recognized but unhandled encoding (vendor extended opcodes)
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// A v5 string form refers to a string section the unit context does not supply
    #[error("Missing section {section} required by {form}")]
    MissingSection
    {
        /// Name of the absent section (e.g. `.debug_line_str`)
        section: &'static str,
        /// The form that needed it
        form: gimli::DwForm,
    },

    /// A bounds-checked read failed
    ///
    /// This wraps the cursor error from `gimli`, most commonly
    /// `UnexpectedEof` on truncated input.
    #[error("Read error: {0}")]
    Read(#[from] gimli::Error),
}

impl LineError
{
    /// Shorthand for building a [`LineError::Format`].
    pub(crate) fn format(message: impl Into<String>) -> Self
    {
        LineError::Format(message.into())
    }
}

/// Convenience type alias for `Result<T, LineError>`
///
/// ```rust
/// use linetab_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, LineError>;
