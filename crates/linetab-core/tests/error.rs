//! Tests for error handling

use gimli::constants;
use linetab_core::error::{LineError, Result};

#[test]
fn test_line_error_display()
{
    let error = LineError::Format("line_range cannot be 0 in line number table".to_string());
    let message = format!("{}", error);
    assert!(message.contains("Format error"));
    assert!(message.contains("line_range"));
}

#[test]
fn test_line_error_out_of_range()
{
    let error = LineError::OutOfRange { index: 12, size: 3 };
    assert_eq!(error.to_string(), "File name index 12 exceeds file table size of 3");
}

#[test]
fn test_line_error_not_implemented()
{
    let error = LineError::NotImplemented("vendor line number opcode 0x80".to_string());
    let message = format!("{}", error);
    assert!(message.contains("Not implemented"));
    assert!(message.contains("0x80"));
}

#[test]
fn test_line_error_missing_section()
{
    let error = LineError::MissingSection {
        section: ".debug_line_str",
        form: constants::DW_FORM_line_strp,
    };
    let message = error.to_string();
    assert!(message.contains(".debug_line_str"));
    assert!(message.contains("DW_FORM_line_strp"));
}

#[test]
fn test_gimli_error_conversion()
{
    let gimli_error = gimli::Error::UnexpectedEof(gimli::ReaderOffsetId(0));
    let line_error: LineError = gimli_error.into();

    match line_error {
        LineError::Read(_) => {
            // Expected: cursor errors convert to Read
        }
        _ => panic!("Expected Read variant"),
    }
}

#[test]
fn test_result_type()
{
    fn returns_ok() -> Result<u64>
    {
        Ok(42)
    }

    fn returns_err() -> Result<u64>
    {
        Err(LineError::OutOfRange { index: 1, size: 0 })
    }

    assert_eq!(returns_ok().unwrap(), 42);
    assert!(returns_err().is_err());
}

#[test]
fn test_error_is_send_and_sync()
{
    fn assert_send_sync<T: Send + Sync + std::error::Error>() {}
    assert_send_sync::<LineError>();
}
