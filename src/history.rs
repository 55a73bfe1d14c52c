use anyhow::{Context, Result, bail};
use itertools::Itertools;
use log::info;

use crate::{
    cli::HistoryArgs,
    domain::curation_registry,
    error::LoadError,
    store::{ChangeRecord, Store, sqlite::SqliteStore},
    table::Table,
};

pub fn execute(args: &HistoryArgs) -> Result<()> {
    let registry = curation_registry()?;
    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("Opening database {:?}", args.db))?;

    let key = registry.natural_lookup(&args.kind, &args.key)?;
    let mut found = store.find(&args.kind, &key)?;
    let entity = match found.len() {
        0 => bail!("No {} record matches '{}'", args.kind, args.key),
        1 => found.remove(0),
        _ => {
            return Err(LoadError::AmbiguousLookup {
                kind: args.kind.clone(),
                query: args.key.clone(),
            }
            .into());
        }
    };

    let records = store.changes(entity.id)?;
    let mut table = Table::new(["when", "action", "source", "by", "fields"]);
    for record in &records {
        table.push(history_row(record));
    }
    println!("{} {} ({})", entity.kind, registry.label(&entity), entity.id);
    table.print();
    info!("Listed {} change(s) for {} {}", table.len(), args.kind, args.key);
    Ok(())
}

fn history_row(record: &ChangeRecord) -> [String; 5] {
    let action = if record.created { "created" } else { "updated" };
    let by = match record.actor.user() {
        Some(user) => user.to_string(),
        None => record.actor.command_line().to_string(),
    };
    let fields = record
        .fields
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .join(", ");
    [
        record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        action.to_string(),
        format!("{}:{}", record.file, record.line),
        by,
        fields,
    ]
}
