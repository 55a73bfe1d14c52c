use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Load and reconcile lab data sheets", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load a data sheet into a curation database
    Load(LoadArgs),
    /// List the columns a format understands
    Columns(ColumnsArgs),
    /// Show the change history of one record
    History(HistoryArgs),
    /// Write all records of one type as a tab-separated file
    Export(ExportArgs),
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Input data sheet
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// SQLite database file (created if missing)
    #[arg(short = 'd', long = "db")]
    pub db: PathBuf,
    /// Built-in format: samples, sample-master, sequencing or manifest
    #[arg(short = 'f', long = "format", conflicts_with_all = ["dataset", "model"])]
    pub format: Option<String>,
    /// Dataset definition (YAML) for the generic loader
    #[arg(long = "dataset", conflicts_with = "model")]
    pub dataset: Option<PathBuf>,
    /// Load columns named after the fields of this record type
    #[arg(long = "model")]
    pub model: Option<String>,
    /// Field delimiter (defaults to tab, or comma for .csv files)
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<char>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Report conflicting changes without applying them
    #[arg(long = "no-overwrite")]
    pub no_overwrite: bool,
    /// Skip bad rows with a warning instead of aborting
    #[arg(long = "warn-on-error")]
    pub warn_on_error: bool,
    /// Fail rows whose sample id cannot be parsed
    #[arg(long = "strict-sample-id")]
    pub strict_sample_id: bool,
    /// Do all the work, then roll everything back
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// User recorded in the change history (defaults to the command line)
    #[arg(long)]
    pub user: Option<String>,
    /// Additional values meaning "no data" (repeatable)
    #[arg(long = "missing", action = clap::ArgAction::Append)]
    pub missing: Vec<String>,
    /// Print progress to stderr
    #[arg(long)]
    pub progress: bool,
    /// List every conflicting field change in the report
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    /// Built-in format name
    #[arg(short = 'f', long = "format", conflicts_with = "dataset", required_unless_present = "dataset")]
    pub format: Option<String>,
    /// Dataset definition (YAML)
    #[arg(long = "dataset")]
    pub dataset: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// SQLite database file
    #[arg(short = 'd', long = "db")]
    pub db: PathBuf,
    /// Record type, e.g. fecalsample
    #[arg(short = 't', long = "type")]
    pub kind: String,
    /// Natural key of the record, e.g. P1-0001
    pub key: String,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// SQLite database file
    #[arg(short = 'd', long = "db")]
    pub db: PathBuf,
    /// Record type to export
    #[arg(short = 't', long = "type")]
    pub kind: String,
    /// Output file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Field delimiter for the output
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<char>,
    /// Character encoding of the output (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
}

pub fn parse_delimiter(value: &str) -> Result<char, String> {
    match value {
        "tab" | "\t" | "\\t" => Ok('\t'),
        "comma" | "," => Ok(','),
        "|" | "pipe" => Ok('|'),
        ";" | "semicolon" => Ok(';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiters_accept_names_and_single_chars() {
        assert_eq!(parse_delimiter("tab"), Ok('\t'));
        assert_eq!(parse_delimiter(","), Ok(','));
        assert_eq!(parse_delimiter("pipe"), Ok('|'));
        assert_eq!(parse_delimiter(":"), Ok(':'));
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("§").is_err());
    }

    #[test]
    fn load_requires_input_and_db() {
        let cli = Cli::try_parse_from([
            "curation-loader",
            "load",
            "-i",
            "sheet.tsv",
            "-d",
            "cur.db",
            "-f",
            "samples",
            "--no-overwrite",
            "--missing",
            "NA",
            "--missing",
            "-",
        ])
        .expect("parse");
        let Commands::Load(args) = cli.command else {
            panic!("expected load");
        };
        assert!(args.no_overwrite);
        assert_eq!(args.missing, vec!["NA", "-"]);
        assert!(Cli::try_parse_from(["curation-loader", "load", "-i", "x"]).is_err());
    }
}
