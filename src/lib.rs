pub mod cli;
pub mod column_spec;
pub mod columns;
pub mod domain;
pub mod error;
pub mod export;
pub mod formats;
pub mod history;
pub mod io_utils;
pub mod loader;
pub mod missing;
pub mod progress;
pub mod reconcile;
pub mod registry;
pub mod rows;
pub mod stats;
pub mod store;
pub mod table;
pub mod value;
pub mod warnings;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands, LoadArgs},
    domain::curation_registry,
    loader::{LoadOptions, Loader},
    store::sqlite::SqliteStore,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("curation_loader", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Load(args) => handle_load(&args),
        Commands::Columns(args) => columns::execute(&args),
        Commands::History(args) => history::execute(&args),
        Commands::Export(args) => export::execute(&args),
    }
}

fn handle_load(args: &LoadArgs) -> Result<()> {
    let registry = curation_registry()?;
    let format = formats::select(
        &registry,
        args.format.as_deref(),
        args.dataset.as_deref(),
        args.model.as_deref(),
    )?;
    let separator = io_utils::resolve_separator(Some(&args.input), args.delimiter);
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    info!(
        "Loading '{}' into {:?} with separator '{}'",
        args.input.display(),
        args.db,
        io_utils::printable_separator(separator)
    );

    let options = LoadOptions {
        separator,
        can_overwrite: !args.no_overwrite,
        warn_on_error: args.warn_on_error,
        strict_sample_id: args.strict_sample_id,
        dry_run: args.dry_run,
        user: args.user.clone(),
        missing_data: args.missing.clone(),
        progress: args.progress,
    };
    debug!("Load options: {options:?}");

    let mut store = SqliteStore::open(&args.db)
        .with_context(|| format!("Opening database {:?}", args.db))?;
    let report = Loader::new(&mut store, &registry, format.as_ref(), options)
        .load_path(&args.input, encoding)?;

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("Serializing load report")?;
        println!("{json}");
    } else {
        print!("{}", report.render(args.verbose));
    }
    Ok(())
}
