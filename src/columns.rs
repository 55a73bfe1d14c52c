//! Column listing for a load format.
//!
//! Shows each declared header with the row key it feeds, so a sheet can be
//! checked against a format before loading it.

use anyhow::Result;
use log::info;

use crate::{cli::ColumnsArgs, domain::curation_registry, formats, table::Table};

pub fn execute(args: &ColumnsArgs) -> Result<()> {
    let registry = curation_registry()?;
    let format = formats::select(&registry, args.format.as_deref(), args.dataset.as_deref(), None)?;
    let spec = format.columns();

    let mut table = Table::new(["#", "header", "key", "converted"]);
    let headers = spec.headers();
    for (idx, key) in spec.all_keys().iter().enumerate() {
        let header = headers.get(idx).cloned().unwrap_or_default();
        let (key, converted) = match key {
            Some(key) => (key.clone(), spec.converter(key).is_some()),
            None => ("(ignored)".to_string(), false),
        };
        let converted = if converted { "yes" } else { "" };
        table.push([(idx + 1).to_string(), header, key, converted.to_string()]);
    }
    table.print();
    info!("Listed {} column(s) of format {}", table.len(), format.name());
    Ok(())
}
