use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use cualloc::CuRequest;
use cualloc::inventory::LoadAmount;
use cuhub::common::serialization::write_snapshot_json;
use cuhub::common::setup::setup_logging;
use cuhub::{HubConfig, Manager};

#[derive(Parser)]
#[command(version, about = "Compute unit allocation manager")]
struct RootOptions {
    /// Enables debug logging
    #[arg(long, global = true, env = "CUHUB_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Loads a configuration and prints the resulting inventory as JSON
    Snapshot(ConfigOpts),
    /// Prints how many instances of each declared group (or of one kernel) fit
    Available(AvailableOpts),
}

#[derive(Parser)]
struct ConfigOpts {
    /// Path to the TOML configuration
    config: PathBuf,
}

#[derive(Parser)]
struct AvailableOpts {
    #[command(flatten)]
    config: ConfigOpts,

    /// Kernel name to check instead of the groups
    #[arg(long)]
    kernel: Option<String>,

    /// Kernel alias
    #[arg(long, default_value = "")]
    alias: String,

    /// Requested load in percent
    #[arg(long, default_value_t = 100)]
    load: u32,

    /// Request whole compute units
    #[arg(long)]
    exclusive: bool,
}

fn init_manager(opts: &ConfigOpts, debug: bool) -> anyhow::Result<Manager> {
    let config = HubConfig::load(&opts.config)
        .with_context(|| format!("Cannot load configuration {}", opts.config.display()))?;
    setup_logging(debug, config.log_level_filter());
    Ok(Manager::init(&config)?)
}

fn command_snapshot(opts: ConfigOpts, debug: bool) -> anyhow::Result<()> {
    let manager = init_manager(&opts, debug)?;
    let snapshot = manager.teardown();
    write_snapshot_json(&snapshot, std::io::stdout().lock())?;
    Ok(())
}

fn command_available(opts: AvailableOpts, debug: bool) -> anyhow::Result<()> {
    let manager = init_manager(&opts.config, debug)?;
    if opts.kernel.is_some() || !opts.alias.is_empty() {
        let request = CuRequest {
            kernel_name: opts.kernel.unwrap_or_default(),
            kernel_alias: opts.alias,
            exclusive: opts.exclusive,
            load: LoadAmount::new_percent(opts.load),
            ..Default::default()
        };
        let count = manager.check_cu_available_num(&request)?;
        println!("{}: {count}", request.display_name());
    } else {
        let snapshot = manager.snapshot();
        for group in &snapshot.groups {
            let count = manager.check_group_available_num(&group.name, None)?;
            println!("{}: {count}", group.name);
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let opts = RootOptions::parse();
    match opts.subcmd {
        SubCommand::Snapshot(config) => command_snapshot(config, opts.debug),
        SubCommand::Available(available) => command_available(available, opts.debug),
    }
}
