//! Merging two independently prepared flow tables into one schema and one timeline.

use tracing::info;

use crate::table::{FlowColumn, FlowTable};

/// Column union: `a`'s columns in order, then `b`'s columns that `a` lacks.
fn union_columns<'a>(a: &'a FlowTable, b: &'a FlowTable) -> Vec<&'a str> {
    let mut names = a.column_names();
    for name in b.column_names() {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn reindex(table: &FlowTable, names: &[&str]) -> FlowTable {
    let columns = names
        .iter()
        .map(|name| FlowColumn {
            name: (*name).to_string(),
            values: table
                .column(name)
                .map(<[f64]>::to_vec)
                .unwrap_or_else(|| vec![0.0; table.len()]),
        })
        .collect();
    FlowTable::from_parts(table.index().to_vec(), columns)
}

/// Reindexes both tables to the union of their columns, filling absent columns with 0.
pub fn align_columns(a: &FlowTable, b: &FlowTable) -> (FlowTable, FlowTable) {
    let names = union_columns(a, b);
    let aligned = (reindex(a, &names), reindex(b, &names));

    info!(
        component = "reconcile",
        event = "reconcile.aligned",
        columns = names.len(),
        left_added = names.len() - a.columns().len(),
        right_added = names.len() - b.columns().len(),
        schema_fingerprint = %aligned.0.schema_fingerprint()
    );
    aligned
}

/// Concatenates `a` then `b` and stable-sorts by index, so equal timestamps keep `a` first.
/// Mismatched schemas are reconciled the same way as [`align_columns`].
pub fn combine_datasets(a: &FlowTable, b: &FlowTable) -> FlowTable {
    let names = union_columns(a, b);
    let (a, b) = (reindex(a, &names), reindex(b, &names));

    let index: Vec<i64> = a.index().iter().chain(b.index()).copied().collect();
    let columns = a
        .columns()
        .iter()
        .zip(b.columns())
        .map(|(left, right)| FlowColumn {
            name: left.name.clone(),
            values: left.values.iter().chain(&right.values).copied().collect(),
        })
        .collect();

    let mut combined = FlowTable::from_parts(index, columns);
    combined.sort_by_index();

    info!(
        component = "reconcile",
        event = "reconcile.combined",
        left_rows = a.len(),
        right_rows = b.len(),
        rows = combined.len(),
        columns = combined.columns().len()
    );
    combined
}
