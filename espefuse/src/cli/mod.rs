//! CLI utilities for the espefuse binary
//!
//! No stability guaranties apply

use std::{fs, path::PathBuf};

use clap::Args;
use comfy_table::{modifiers, presets::UTF8_FULL, Attribute, Cell, Color, Table};
use dialoguer::{theme::ColorfulTheme, Input};
use log::warn;
use miette::{Result, WrapErr};

use self::config::Config;
use crate::{
    efuse::{EfuseBlock, Efuses, EncodedValue, Protection, Registry},
    error::Error,
    operations::{
        BurnCallbacks,
        CodingSchemeHazard,
        FieldSummary,
        PlannedWrite,
        VerificationFailure,
    },
    transport::VirtualDevice,
};

pub mod config;

/// Establish a connection with a target device
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct ConnectArgs {
    /// eFuse catalog describing the blocks and fields of the device
    #[arg(long, global = true, env = "ESPEFUSE_CATALOG")]
    pub catalog: Option<PathBuf>,
    /// Image of the eFuse blocks of a virtual device, created if missing
    #[arg(long, global = true, env = "ESPEFUSE_DEVICE_FILE")]
    pub device_file: Option<PathBuf>,
    /// Burn without asking for confirmation
    #[arg(long, global = true)]
    pub do_not_confirm: bool,
}

impl ConnectArgs {
    /// Whether burns must be confirmed, considering the configuration.
    pub fn confirm(&self, config: &Config) -> bool {
        !(self.do_not_confirm || config.device.do_not_confirm)
    }
}

/// Burn values into named eFuse fields
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct BurnEfuseArgs {
    /// Pairs of eFuse field names and values; a single-bit field may be given
    /// without a value
    #[arg(required = true, value_name = "EFUSE_NAME VALUE")]
    pub name_value_pairs: Vec<String>,
    /// Write blocks even if they look like they have already been written
    #[arg(long)]
    pub force_write_always: bool,
}

/// Burn the read- or write-disable bit of named eFuse fields
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct ProtectArgs {
    /// Names of the eFuse fields to protect
    #[arg(required = true, value_name = "EFUSE_NAME")]
    pub efuse_names: Vec<String>,
}

/// Burn raw data into eFuse blocks
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct BurnBlockDataArgs {
    /// Pairs of block names and files containing the data to burn. Files
    /// shorter than the block are padded with zeros
    #[arg(required = true, value_name = "BLOCK DATAFILE")]
    pub block_datafiles: Vec<String>,
    /// Byte offset in the eFuse block, only valid with a single block
    #[arg(long, short = 'o', default_value_t = 0)]
    pub offset: usize,
    /// Write blocks even if they look like they have already been written
    #[arg(long)]
    pub force_write_always: bool,
}

/// Burn individual bits of an eFuse block
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct BurnBitArgs {
    /// eFuse block to burn
    pub block: String,
    /// Bit numbers in the eFuse block, in the range [0..BLOCK_LENGTH*8-1]
    #[arg(required = true)]
    pub bit_numbers: Vec<usize>,
    /// Write blocks even if they look like they have already been written
    #[arg(long)]
    pub force_write_always: bool,
}

/// Write the raw contents of every eFuse block to files
#[derive(Debug, Args)]
#[non_exhaustive]
pub struct DumpArgs {
    /// File name of the dump, the block index is appended to its stem
    pub file_name: PathBuf,
}

/// Open the device given by `args`, or the configuration otherwise.
pub fn connect(args: &ConnectArgs, config: &Config) -> Result<Efuses<VirtualDevice>> {
    let catalog = args
        .catalog
        .as_ref()
        .or(config.device.catalog.as_ref())
        .ok_or(Error::NoCatalog)?;
    let registry = Registry::load(catalog)
        .wrap_err_with(|| format!("Failed to load eFuse catalog {}", catalog.display()))?;

    let device_file = args
        .device_file
        .as_ref()
        .or(config.device.device_file.as_ref())
        .ok_or(Error::NoDevice)?;
    let device = VirtualDevice::open(device_file, &registry)
        .map_err(Error::from)
        .wrap_err_with(|| format!("Failed to open device {}", device_file.display()))?;

    println!("Device: {}", device_file.display());
    println!("Connecting...\n");

    Ok(Efuses::connect(device, registry)?)
}

/// Turn `NAME VALUE` pairs from the command line into encoded values.
///
/// A single name without a value is accepted for single-bit fields, which are
/// then burned to `1`.
pub fn parse_name_value_pairs(
    registry: &Registry,
    pairs: &[String],
) -> Result<Vec<(String, EncodedValue)>, Error> {
    if let [name] = pairs {
        let field = registry.field(name)?;
        return Ok(vec![(name.clone(), EncodedValue::parse(field, None)?)]);
    }

    if pairs.len() % 2 != 0 {
        let name = pairs.last().cloned().unwrap_or_default();
        return Err(Error::MissingValue(name));
    }

    pairs
        .chunks(2)
        .map(|pair| {
            let field = registry.field(&pair[0])?;
            Ok((pair[0].clone(), EncodedValue::parse(field, Some(pair[1].as_str()))?))
        })
        .collect()
}

/// Split `BLOCK DATAFILE` pairs from the command line and read the files.
///
/// A trailing block without a data file is left to the burn operation to
/// reject.
pub fn read_block_datafiles(pairs: &[String]) -> Result<(Vec<String>, Vec<Vec<u8>>)> {
    let blocks = pairs.iter().step_by(2).cloned().collect();
    let data = pairs
        .iter()
        .skip(1)
        .step_by(2)
        .map(|file| {
            fs::read(file).map_err(|err| Error::FileOpenError(file.clone(), err).into())
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((blocks, data))
}

/// Print the state of every eFuse field as a table
pub fn print_summary(rows: &[FieldSummary]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(modifiers::UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Name")
                .fg(Color::Green)
                .add_attribute(Attribute::Bold),
            Cell::new("Block")
                .fg(Color::Cyan)
                .add_attribute(Attribute::Bold),
            Cell::new("Bits")
                .fg(Color::Magenta)
                .add_attribute(Attribute::Bold),
            Cell::new("Value")
                .fg(Color::Yellow)
                .add_attribute(Attribute::Bold),
            Cell::new("R/W")
                .fg(Color::Red)
                .add_attribute(Attribute::Bold),
            Cell::new("Description")
                .fg(Color::DarkCyan)
                .add_attribute(Attribute::Bold),
        ]);

    for row in rows {
        let value = row
            .value
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "??".to_string());
        let access = format!(
            "{}/{}",
            if row.readable { "R" } else { "-" },
            if row.writeable { "W" } else { "-" }
        );

        table.add_row(vec![
            Cell::new(&row.name).fg(Color::Green),
            Cell::new(&row.block).fg(Color::Cyan),
            Cell::new(format!("{}..{}", row.bit_range.start, row.bit_range.end))
                .fg(Color::Magenta),
            Cell::new(value).fg(Color::Yellow),
            Cell::new(access).fg(Color::Red),
            Cell::new(&row.description).fg(Color::DarkCyan),
        ]);
    }

    println!("{table}");
}

/// Prints the progress of a burn to the terminal, and asks the operator for
/// confirmation before anything is burned.
#[derive(Debug)]
pub struct EspefuseCallbacks {
    confirm: bool,
}

impl EspefuseCallbacks {
    pub fn new(confirm: bool) -> Self {
        Self { confirm }
    }
}

impl BurnCallbacks for EspefuseCallbacks {
    fn attention(&mut self, hazard: &CodingSchemeHazard) {
        println!(
            "    ATTENTION! {} uses the {} coding scheme, after burning these eFuses can not be burned anymore:",
            hazard.block_name, hazard.coding_scheme
        );
        for chunk in hazard.blocked.chunks(5) {
            println!("        {}", chunk.join(", "));
        }
    }

    fn staging(&mut self, write: &PlannedWrite) {
        println!(
            "Burn eFuse {} (BLOCK{}): {} -> {}",
            write.name, write.block, write.old, write.new
        );
    }

    fn cascade(&mut self, protection: Protection, fields: &[String]) {
        println!(
            "Permanently {protection}-disabling eFuse{} {}",
            if fields.len() > 1 { "s" } else { "" },
            fields.join(", ")
        );
    }

    fn already_protected(&mut self, field: &str, protection: Protection) {
        println!("eFuse {field} is already {protection}-protected");
    }

    fn block_data(&mut self, block: &EfuseBlock, data: &[u8], offset: usize) {
        println!(
            "Burn {} at offset {offset}: {}",
            block.name(),
            data.iter()
                .map(|byte| format!("{byte:02x}"))
                .collect::<Vec<_>>()
                .join(" ")
        );
    }

    fn confirm(&mut self) -> Result<bool, Error> {
        if !self.confirm {
            return Ok(true);
        }

        println!("\nThis is an irreversible operation!");
        let answer = Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt("Type 'BURN' (all capitals) to continue")
            .allow_empty(true)
            .interact_text()?;

        Ok(answer == "BURN")
    }

    fn unreadable(&mut self, field: &str) {
        warn!("{field} is read-protected, the burned value can not be verified");
    }

    fn verification_failed(&mut self, failure: &VerificationFailure) {
        println!("{failure}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::efuse::{BlockDefinition, Catalog, CodingScheme, EfuseField};

    fn registry() -> Registry {
        Registry::new(Catalog {
            blocks: vec![BlockDefinition::new("BLOCK0", 4, CodingScheme::None)],
            fields: vec![
                EfuseField::new("WR_DIS", 0, 0, 8),
                EfuseField::new("RD_DIS", 0, 8, 4),
                EfuseField::new("FLAG", 0, 12, 1),
                EfuseField::new("VERSION", 0, 16, 8),
            ],
            ..Catalog::default()
        })
        .unwrap()
    }

    fn args(args: &[&str]) -> Vec<String> {
        args.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn single_bit_field_without_value() {
        let values = parse_name_value_pairs(&registry(), &args(&["FLAG"])).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].1.to_u64(), Some(1));

        assert!(matches!(
            parse_name_value_pairs(&registry(), &args(&["VERSION"])),
            Err(Error::MissingValue(name)) if name == "VERSION"
        ));
    }

    #[test]
    fn pairs_of_names_and_values() {
        let values =
            parse_name_value_pairs(&registry(), &args(&["VERSION", "0x12", "FLAG", "false"]))
                .unwrap();
        assert_eq!(values[0].0, "VERSION");
        assert_eq!(values[0].1.to_u64(), Some(0x12));
        assert_eq!(values[1].1.to_u64(), Some(0));

        assert!(matches!(
            parse_name_value_pairs(&registry(), &args(&["VERSION", "1", "FLAG"])),
            Err(Error::MissingValue(name)) if name == "FLAG"
        ));
        assert!(matches!(
            parse_name_value_pairs(&registry(), &args(&["NOPE", "1"])),
            Err(Error::UnknownField(_))
        ));
    }

    #[test]
    fn confirmation_can_be_disabled() {
        let config = Config::default();
        let args = ConnectArgs {
            catalog: None,
            device_file: None,
            do_not_confirm: false,
        };
        assert!(args.confirm(&config));
        assert!(EspefuseCallbacks::new(false).confirm().unwrap());

        let mut config = Config::default();
        config.device.do_not_confirm = true;
        assert!(!args.confirm(&config));
    }
}
