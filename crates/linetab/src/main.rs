mod image;

use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use image::{DebugImage, UnitLines};
use linetab_core::{LineError, LineTable, Row};
use linetab_utils::{
    info, init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingError,
    LoggingGuard,
};

/// Inspect the DWARF line number tables of a compiled binary.
#[derive(Parser, Debug)]
#[command(name = "linetab")]
#[command(version)]
#[command(about = "Inspect the DWARF line number tables of a compiled binary", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format (pretty or json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct UnitArgs
{
    /// Path to an ELF, Mach-O, or PE binary with DWARF debug info
    binary: PathBuf,

    /// Only inspect the unit at this index (see `linetab header`)
    #[arg(short, long)]
    unit: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Print every row of the line tables
    Rows(UnitArgs),
    /// Map addresses to source locations
    Lookup
    {
        /// Path to an ELF, Mach-O, or PE binary with DWARF debug info
        binary: PathBuf,
        /// Addresses to look up (hex format: 0x1000 or decimal)
        #[arg(required = true)]
        addresses: Vec<String>,
    },
    /// List the include directories and source files of the line tables
    Files(UnitArgs),
    /// Show the decoded line table headers
    Header(UnitArgs),
}

#[derive(Debug, thiserror::Error)]
enum CliError
{
    #[error("failed to read {}: {source}", path.display())]
    Io
    {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse binary: {0}")]
    Object(#[from] object::Error),

    #[error("failed to read DWARF: {0}")]
    Dwarf(#[from] gimli::Error),

    #[error("binary has no .debug_line section")]
    MissingDebugLine,

    #[error("unit {index} not found ({count} units have line tables)")]
    NoSuchUnit
    {
        index: usize,
        count: usize,
    },

    #[error("invalid address {0:?}: use hex (0x1000) or decimal")]
    InvalidAddress(String),

    #[error(transparent)]
    Line(#[from] LineError),

    #[error(transparent)]
    Logging(#[from] LoggingError),
}

fn main()
{
    let cli = Cli::parse();

    let _guard = match start_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run_command(cli.command) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn start_logging(cli: &Cli) -> Result<LoggingGuard, CliError>
{
    let guard = match (&cli.log_file, cli.log_level, cli.log_format) {
        (Some(path), level, _) => init_logging_to_file(path, level)?,
        (None, None, None) => init_logging()?,
        (None, level, format) => {
            init_logging_with_level(level.unwrap_or(LogLevel::Warn), format.unwrap_or(LogFormat::Pretty))?
        }
    };
    Ok(guard)
}

fn run_command(command: Commands) -> Result<(), CliError>
{
    match command {
        Commands::Rows(args) => {
            let image = DebugImage::open(&args.binary)?;
            for unit in select_units(&image, args.unit)? {
                let table = image.line_table(&unit)?;
                println!("{}", unit_title(&unit));
                for row in table.rows() {
                    println!("  {}", format_row(&row?));
                }
            }
            Ok(())
        }
        Commands::Lookup { binary, addresses } => {
            let addresses = addresses
                .iter()
                .map(|address| parse_address(address))
                .collect::<Result<Vec<_>, _>>()?;
            let image = DebugImage::open(&binary)?;
            let tables = image
                .units()?
                .iter()
                .map(|unit| image.line_table(unit))
                .collect::<Result<Vec<_>, _>>()?;

            for address in addresses {
                match lookup(&tables, address)? {
                    Some(row) => println!("{address:#x}: {row}"),
                    None => println!("{address:#x}: ??"),
                }
            }
            Ok(())
        }
        Commands::Files(args) => {
            let image = DebugImage::open(&args.binary)?;
            for unit in select_units(&image, args.unit)? {
                let table = image.line_table(&unit)?;
                // Run the program once so files declared inside it are listed too.
                for row in table.rows() {
                    row?;
                }
                println!("{}", unit_title(&unit));
                print_files(&table)?;
            }
            Ok(())
        }
        Commands::Header(args) => {
            let image = DebugImage::open(&args.binary)?;
            for unit in select_units(&image, args.unit)? {
                let table = image.line_table(&unit)?;
                println!("{}", unit_title(&unit));
                print!("{}", format_header(&table));
            }
            Ok(())
        }
    }
}

fn select_units(image: &DebugImage, selected: Option<usize>) -> Result<Vec<UnitLines>, CliError>
{
    let units = image.units()?;
    info!(path = %image.path().display(), units = units.len(), "loaded binary");
    match selected {
        None => Ok(units),
        Some(index) => {
            let count = units.len();
            units
                .into_iter()
                .nth(index)
                .map(|unit| vec![unit])
                .ok_or(CliError::NoSuchUnit { index, count })
        }
    }
}

fn lookup(tables: &[LineTable], address: u64) -> Result<Option<Row>, CliError>
{
    for table in tables {
        if let Some(row) = table.find_address(address)? {
            return Ok(Some(row));
        }
    }
    Ok(None)
}

/// Parse an address (hex format: 0x1000 or decimal)
fn parse_address(text: &str) -> Result<u64, CliError>
{
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| CliError::InvalidAddress(text.to_owned()))
}

fn unit_title(unit: &UnitLines) -> String
{
    format!(
        "unit {} ({}) at .debug_line+{:#x}",
        unit.index,
        unit.context.name(),
        unit.offset
    )
}

fn format_row(row: &Row) -> String
{
    let mut line = format!("{:#018x} {}", row.address(), row.describe());
    let flags = [
        (row.is_stmt(), "is_stmt"),
        (row.basic_block(), "basic_block"),
        (row.end_sequence(), "end_sequence"),
        (row.prologue_end(), "prologue_end"),
        (row.epilogue_begin(), "epilogue_begin"),
    ];
    for (_, name) in flags.iter().filter(|(set, _)| *set) {
        line.push(' ');
        line.push_str(name);
    }
    if row.op_index() != 0 {
        let _ = write!(line, " op_index={}", row.op_index());
    }
    if row.discriminator() != 0 {
        let _ = write!(line, " discriminator={}", row.discriminator());
    }
    line
}

fn format_header(table: &LineTable) -> String
{
    let header = table.header();
    let mut out = String::new();
    let _ = writeln!(out, "  version:                {}", header.version());
    let _ = writeln!(out, "  format:                 {}-bit", header.format().word_size() * 8);
    let _ = writeln!(out, "  unit length:            {:#x}", header.unit_length());
    let _ = writeln!(out, "  address size:           {}", header.address_size());
    let _ = writeln!(out, "  header length:          {:#x}", header.header_length());
    let _ = writeln!(out, "  min instruction length: {}", header.minimum_instruction_length());
    let _ = writeln!(out, "  max ops per insn:       {}", header.maximum_operations_per_instruction());
    let _ = writeln!(out, "  default is_stmt:        {}", header.default_is_stmt());
    let _ = writeln!(out, "  line base:              {}", header.line_base());
    let _ = writeln!(out, "  line range:             {}", header.line_range());
    let _ = writeln!(out, "  opcode base:            {}", header.opcode_base());
    let _ = writeln!(out, "  standard opcode lengths: {:?}", &header.standard_opcode_lengths()[1..]);
    for entry in header.directory_format() {
        let _ = writeln!(out, "  directory format:       {} {}", entry.content_type(), entry.form());
    }
    for entry in header.file_format() {
        let _ = writeln!(out, "  file format:            {} {}", entry.content_type(), entry.form());
    }
    out
}

fn print_files(table: &LineTable) -> Result<(), CliError>
{
    for (index, directory) in table.directories().iter().enumerate() {
        println!("  dir  {index:>3} {directory}");
    }
    for (index, file) in table.files().iter().enumerate() {
        let mut line = format!("  file {index:>3} {} (dir {})", file.path(), file.directory_index());
        if let Some(size) = file.size() {
            let _ = write!(line, " size={size}");
        }
        if let Some(timestamp) = file.timestamp() {
            let _ = write!(line, " mtime={timestamp}");
        }
        if let Some(digest) = table.file_md5(file)? {
            line.push_str(" md5=");
            for byte in digest {
                let _ = write!(line, "{byte:02x}");
            }
        }
        println!("{line}");
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_parse_address_hex_and_decimal()
    {
        assert_eq!(parse_address("0x401000").unwrap(), 0x40_1000);
        assert_eq!(parse_address("0XFF").unwrap(), 0xff);
        assert_eq!(parse_address("4096").unwrap(), 4096);
    }

    #[test]
    fn test_parse_address_rejects_garbage()
    {
        assert!(matches!(parse_address("main"), Err(CliError::InvalidAddress(_))));
        assert!(matches!(parse_address("0x"), Err(CliError::InvalidAddress(_))));
        assert!(matches!(parse_address("-1"), Err(CliError::InvalidAddress(_))));
    }

    #[test]
    fn test_cli_definition_is_valid()
    {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_logging_flags_parse_after_subcommand()
    {
        let cli = Cli::try_parse_from(["linetab", "rows", "a.out", "--unit", "2", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        match cli.command {
            Commands::Rows(args) => {
                assert_eq!(args.binary, PathBuf::from("a.out"));
                assert_eq!(args.unit, Some(2));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_lookup_requires_an_address()
    {
        assert!(Cli::try_parse_from(["linetab", "lookup", "a.out"]).is_err());
    }
}
