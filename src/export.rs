use std::collections::HashMap;

use anyhow::{Context, Result};
use log::info;

use crate::{
    cli::ExportArgs,
    domain::curation_registry,
    formats::dataset::DatasetDefinition,
    io_utils,
    registry::Registry,
    store::{Entity, Store, sqlite::SqliteStore},
    value::{EntityId, FieldValue},
};

pub fn execute(args: &ExportArgs) -> Result<()> {
    let registry = curation_registry()?;
    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("Opening database {:?}", args.db))?;
    let separator = io_utils::resolve_separator(args.output.as_deref(), args.delimiter);
    let encoding = io_utils::resolve_encoding(args.output_encoding.as_deref())?;
    let mut writer = io_utils::open_writer(args.output.as_deref(), separator, encoding)?;

    let rows = export_rows(&store, &registry, &args.kind)?;
    for row in &rows {
        writer.write_record(row).context("Writing export row")?;
    }
    writer.flush().context("Flushing export output")?;
    info!(
        "Exported {} {} record(s) using separator '{}'",
        rows.len().saturating_sub(1),
        args.kind,
        io_utils::printable_separator(separator)
    );
    Ok(())
}

/// Header row followed by one row per stored entity of `kind`.
pub fn export_rows(store: &dyn Store, registry: &Registry, kind: &str) -> Result<Vec<Vec<String>>> {
    let definition = DatasetDefinition::for_model(registry, kind)?;
    let fields = definition
        .columns
        .iter()
        .map(|column| column.accessor.as_str())
        .collect::<Vec<_>>();

    let mut labels = LabelCache::new(store, registry);
    let mut rows = vec![fields.iter().map(|f| f.to_string()).collect::<Vec<_>>()];
    for entity in store.all(kind)? {
        let mut row = Vec::with_capacity(fields.len());
        for field in &fields {
            let cell = match entity.get(field) {
                Some(FieldValue::Ref(id)) => labels.label(*id)?,
                Some(value) => value.as_display(),
                None => String::new(),
            };
            row.push(cell);
        }
        rows.push(row);
    }
    Ok(rows)
}

struct LabelCache<'a> {
    store: &'a dyn Store,
    registry: &'a Registry,
    seen: HashMap<EntityId, String>,
}

impl<'a> LabelCache<'a> {
    fn new(store: &'a dyn Store, registry: &'a Registry) -> Self {
        Self {
            store,
            registry,
            seen: HashMap::new(),
        }
    }

    fn label(&mut self, id: EntityId) -> Result<String> {
        if let Some(label) = self.seen.get(&id) {
            return Ok(label.clone());
        }
        let entity: Entity = self
            .store
            .get(id)?
            .with_context(|| format!("Dangling reference to {id}"))?;
        let label = self.registry.label(&entity);
        self.seen.insert(id, label.clone());
        Ok(label)
    }
}
