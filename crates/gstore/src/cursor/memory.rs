//! In-memory evaluation of an operation program.

use std::collections::HashSet;

use serde_json::Value;

use super::{Cursor, FieldMapping, Operation, Projection};
use crate::{Record, Result, compare_records, identity_key};

/// Applies `program` to `dataset` in order. Set operations fetch their
/// sibling cursor when they are reached.
pub(crate) async fn evaluate(program: Vec<Operation>, mut dataset: Vec<Record>) -> Result<Vec<Record>> {
    for op in program {
        dataset = match op {
            Operation::Map(f) => dataset.into_iter().map(|r| f(r)).collect(),
            Operation::Filter(f) => {
                dataset.retain(|r| f(r));
                dataset
            }
            Operation::Projection(Projection::Fields(fields)) => {
                dataset.into_iter().map(|r| keep_fields(r, &fields)).collect()
            }
            Operation::Projection(Projection::Mapping(mapping)) => {
                dataset.iter().map(|r| map_fields(r, &mapping)).collect()
            }
            Operation::Select(query) | Operation::Find(query) => {
                dataset.retain(|r| query.matches(r));
                dataset
            }
            Operation::Sort(cmp) => {
                dataset.sort_by(|a, b| cmp(a, b));
                dataset
            }
            Operation::Order(keys) => {
                dataset.sort_by(|a, b| compare_records(a, b, &keys));
                dataset
            }
            Operation::Desc(keys) => {
                dataset.sort_by(|a, b| compare_records(b, a, &keys));
                dataset
            }
            Operation::Distinct => dedupe(dataset),
            Operation::One => {
                dataset.truncate(1);
                dataset
            }
            Operation::Limit(n) => {
                dataset.truncate(n);
                dataset
            }
            Operation::Union(other) => {
                let other = fetch_sibling(other).await?;
                dedupe(dataset.into_iter().chain(other).collect())
            }
            Operation::Intersection(other) => {
                let keys = key_set(&fetch_sibling(other).await?);
                dataset.retain(|r| keys.contains(&identity_key(r)));
                dataset
            }
            Operation::Difference(other) => {
                let keys = key_set(&fetch_sibling(other).await?);
                dataset.retain(|r| !keys.contains(&identity_key(r)));
                dataset
            }
            Operation::Complement(other) => {
                let keys = key_set(&dataset);
                let mut other = fetch_sibling(other).await?;
                other.retain(|r| !keys.contains(&identity_key(r)));
                other
            }
        };
    }
    Ok(dataset)
}

async fn fetch_sibling(mut cursor: Box<Cursor>) -> Result<Vec<Record>> {
    cursor.fetch().await
}

fn key_set(dataset: &[Record]) -> HashSet<String> {
    dataset.iter().map(identity_key).collect()
}

/// First occurrence of every identity wins.
fn dedupe(dataset: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::with_capacity(dataset.len());
    dataset
        .into_iter()
        .filter(|r| seen.insert(identity_key(r)))
        .collect()
}

fn keep_fields(mut record: Record, fields: &[String]) -> Record {
    fields
        .iter()
        .filter_map(|f| record.remove(f).map(|v| (f.clone(), v)))
        .collect()
}

fn map_fields(record: &Record, mapping: &[FieldMapping]) -> Record {
    mapping
        .iter()
        .map(|m| {
            let source = record.get(&m.from).cloned().unwrap_or(Value::Null);
            let value = m.transforms.iter().fold(source, |v, f| f(v));
            (m.to.clone(), value)
        })
        .collect()
}
