//! Records and the value helpers shared by every execution engine.

use core::cmp::Ordering;

use serde_json::{Map, Value};

/// A single record: field name to JSON value.
pub type Record = Map<String, Value>;

/// Name of the identifier field carried by every persisted record.
pub const ID_FIELD: &str = "Id";

/// Key under which records are compared by `distinct` and the set operations.
///
/// Records carrying an `Id` are keyed by it, and `1` and `"1"` share a key.
/// Records without one are keyed by their full serialized content, so two
/// equal anonymous records collapse.
pub fn identity_key(record: &Record) -> String {
    if let Some(id) = record_id(record) {
        return format!("i:{id}");
    }
    match record.get(ID_FIELD) {
        Some(Value::String(s)) => format!("s:{s}"),
        Some(value) => format!("v:{value}"),
        None => format!("r:{}", Value::Object(record.clone())),
    }
}

/// Reads the `Id` field as an unsigned integer.
///
/// Numeric strings are accepted since ids above 2^53 travel as strings.
pub fn record_id(record: &Record) -> Option<u64> {
    value_as_id(record.get(ID_FIELD)?)
}

pub fn value_as_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

const fn rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(_) => 4,
    }
}

/// Total order over optional JSON values used for sorting.
///
/// Values of different kinds order as missing/null < bool < number < string <
/// everything else. Arrays and objects fall back to their serialized form.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => compare_numbers(x, y),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) if rank(a) == 4 && rank(b) == 4 => x.to_string().cmp(&y.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn compare_numbers(x: &serde_json::Number, y: &serde_json::Number) -> Ordering {
    match (x.as_u64(), y.as_u64()) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
    }
}

/// Compares two records field by field, first key wins.
pub fn compare_records(a: &Record, b: &Record, keys: &[String]) -> Ordering {
    keys.iter()
        .map(|key| compare_values(a.get(key), b.get(key)))
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Field values of the first record, in key order.
///
/// Keys of a [`Record`] iterate in lexicographic order.
pub fn row(dataset: &[Record]) -> Vec<Value> {
    dataset
        .first()
        .map(|record| record.values().cloned().collect())
        .unwrap_or_default()
}

/// Values of one field across the dataset, `null` where a record lacks it.
///
/// Without a `field` the first key of the first record is used.
pub fn col(dataset: &[Record], field: Option<&str>) -> Vec<Value> {
    let Some(field) = field.or_else(|| dataset.first()?.keys().next().map(String::as_str)) else {
        return Vec::new();
    };
    dataset
        .iter()
        .map(|record| record.get(field).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Field names of the first record, or nothing for an empty dataset.
pub fn header(dataset: &[Record]) -> Vec<String> {
    dataset
        .first()
        .map(|record| record.keys().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("record literal must be an object"),
        }
    }

    #[test]
    fn identity_prefers_id() {
        let a = rec(json!({"Id": 1, "Name": "a"}));
        let b = rec(json!({"Id": 1, "Name": "b"}));
        assert_eq!(identity_key(&a), identity_key(&b));

        let anon = rec(json!({"Name": "a"}));
        assert_ne!(identity_key(&anon), identity_key(&a));
        assert_eq!(identity_key(&anon), identity_key(&anon.clone()));
    }

    #[test]
    fn numeric_and_string_ids_share_identity() {
        let num = rec(json!({"Id": 1}));
        let text = rec(json!({"Id": "1"}));
        assert_eq!(identity_key(&num), identity_key(&text));
        assert_ne!(identity_key(&num), identity_key(&rec(json!({"Id": "x"}))));
    }

    #[test]
    fn string_and_numeric_ids_parse() {
        assert_eq!(record_id(&rec(json!({"Id": 42}))), Some(42));
        assert_eq!(record_id(&rec(json!({"Id": "18446744073709551615"}))), Some(u64::MAX));
        assert_eq!(record_id(&rec(json!({"Id": "x"}))), None);
        assert_eq!(record_id(&rec(json!({}))), None);
    }

    #[test]
    fn mixed_kinds_have_a_total_order() {
        let null = json!(null);
        let num = json!(3);
        let text = json!("3");
        assert_eq!(compare_values(None, Some(&null)), Ordering::Equal);
        assert_eq!(compare_values(Some(&null), Some(&num)), Ordering::Less);
        assert_eq!(compare_values(Some(&num), Some(&text)), Ordering::Less);
        assert_eq!(compare_values(Some(&json!(1.5)), Some(&json!(2))), Ordering::Less);
    }

    #[test]
    fn transforms_read_values_in_field_order() {
        let ds = vec![
            rec(json!({"Id": 1, "Name": "qwerty"})),
            rec(json!({"Id": 2})),
        ];
        assert_eq!(header(&ds), ["Id", "Name"]);
        assert_eq!(col(&ds, Some("Name")), [json!("qwerty"), json!(null)]);
        assert_eq!(col(&ds, None), [json!(1), json!(2)]);
        assert_eq!(row(&ds), [json!(1), json!("qwerty")]);
        assert!(header(&[]).is_empty());
        assert!(row(&[]).is_empty());
        assert!(col(&[], None).is_empty());
    }
}
