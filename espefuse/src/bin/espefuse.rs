use clap::{Parser, Subcommand};
use espefuse::{
    cli::{
        config::Config,
        connect,
        parse_name_value_pairs,
        print_summary,
        read_block_datafiles,
        BurnBitArgs,
        BurnBlockDataArgs,
        BurnEfuseArgs,
        ConnectArgs,
        DumpArgs,
        EspefuseCallbacks,
        ProtectArgs,
    },
    logging::initialize_logger,
    operations,
};
use log::{debug, LevelFilter};
use miette::Result;

#[derive(Debug, Parser)]
#[command(about, max_term_width = 100, propagate_version = true, version)]
struct Cli {
    #[command(subcommand)]
    subcommand: Commands,

    #[command(flatten)]
    connect_args: ConnectArgs,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Burn values into named eFuse fields
    BurnEfuse(BurnEfuseArgs),
    /// Permanently disable reading named eFuse fields
    ReadProtectEfuse(ProtectArgs),
    /// Permanently disable writing named eFuse fields
    WriteProtectEfuse(ProtectArgs),
    /// Burn raw data into eFuse blocks
    ///
    /// The data is burned as it is, without any conversion of its byte order.
    /// Data shorter than the block, after the offset, is padded with zeros up
    /// to the end of the block.
    BurnBlockData(BurnBlockDataArgs),
    /// Burn individual bits of an eFuse block
    BurnBit(BurnBitArgs),
    /// Write the raw contents of every eFuse block to files
    Dump(DumpArgs),
    /// Print the value and protection state of every eFuse field
    Summary,
}

fn main() -> Result<()> {
    miette::set_panic_hook();
    initialize_logger(LevelFilter::Info);

    // Attempt to parse any provided command-line arguments, or print the help
    // message and terminate if the invocation is not correct.
    let cli = Cli::parse();
    debug!("{:#?}", cli.subcommand);

    // Load any user configuration, if present.
    let config = Config::load()?;

    // Execute the correct action based on the provided subcommand and its
    // associated arguments.
    match cli.subcommand {
        Commands::BurnEfuse(args) => burn_efuse(args, &cli.connect_args, &config),
        Commands::ReadProtectEfuse(args) => read_protect_efuse(args, &cli.connect_args, &config),
        Commands::WriteProtectEfuse(args) => write_protect_efuse(args, &cli.connect_args, &config),
        Commands::BurnBlockData(args) => burn_block_data(args, &cli.connect_args, &config),
        Commands::BurnBit(args) => burn_bit(args, &cli.connect_args, &config),
        Commands::Dump(args) => dump(args, &cli.connect_args, &config),
        Commands::Summary => summary(&cli.connect_args, &config),
    }
}

fn burn_efuse(args: BurnEfuseArgs, connect_args: &ConnectArgs, config: &Config) -> Result<()> {
    let mut efuses = connect(connect_args, config)?;
    efuses.set_force_write_always(args.force_write_always);

    let values = parse_name_value_pairs(efuses.registry(), &args.name_value_pairs)?;
    let mut callbacks = EspefuseCallbacks::new(connect_args.confirm(config));

    println!("The eFuses to burn:");
    operations::burn_efuse(&mut efuses, &values, &mut callbacks)?;

    Ok(())
}

fn read_protect_efuse(
    args: ProtectArgs,
    connect_args: &ConnectArgs,
    config: &Config,
) -> Result<()> {
    let mut efuses = connect(connect_args, config)?;
    let mut callbacks = EspefuseCallbacks::new(connect_args.confirm(config));

    operations::read_protect_efuse(&mut efuses, &args.efuse_names, &mut callbacks)?;

    Ok(())
}

fn write_protect_efuse(
    args: ProtectArgs,
    connect_args: &ConnectArgs,
    config: &Config,
) -> Result<()> {
    let mut efuses = connect(connect_args, config)?;
    let mut callbacks = EspefuseCallbacks::new(connect_args.confirm(config));

    operations::write_protect_efuse(&mut efuses, &args.efuse_names, &mut callbacks)?;

    Ok(())
}

fn burn_block_data(
    args: BurnBlockDataArgs,
    connect_args: &ConnectArgs,
    config: &Config,
) -> Result<()> {
    let (blocks, data) = read_block_datafiles(&args.block_datafiles)?;

    let mut efuses = connect(connect_args, config)?;
    efuses.set_force_write_always(args.force_write_always);
    let mut callbacks = EspefuseCallbacks::new(connect_args.confirm(config));

    operations::burn_block_data(&mut efuses, &blocks, &data, args.offset, &mut callbacks)?;
    println!("Successful");

    Ok(())
}

fn burn_bit(args: BurnBitArgs, connect_args: &ConnectArgs, config: &Config) -> Result<()> {
    let mut efuses = connect(connect_args, config)?;
    efuses.set_force_write_always(args.force_write_always);
    let mut callbacks = EspefuseCallbacks::new(connect_args.confirm(config));

    operations::burn_bit(&mut efuses, &args.block, &args.bit_numbers, &mut callbacks)?;
    println!("Successful");

    Ok(())
}

fn dump(args: DumpArgs, connect_args: &ConnectArgs, config: &Config) -> Result<()> {
    let efuses = connect(connect_args, config)?;

    for file in operations::dump(&efuses, &args.file_name)? {
        println!("{}", file.display());
    }

    Ok(())
}

fn summary(connect_args: &ConnectArgs, config: &Config) -> Result<()> {
    let efuses = connect(connect_args, config)?;
    print_summary(&operations::summary(&efuses)?);

    Ok(())
}
