//! The internal occurrence record: an open key/value bag.
//!
//! Records start as one upstream's raw JSON object, get normalized by the
//! owning subquery's adapter (identifier prefixing, canonical ages, derived
//! coordinates), and are read-only after that. Unified fields every exposed
//! record carries: `database`, `record_type`, `age_older`/`age_younger`
//! (canonical ybp, used for filtering and ordering) and `AgeOlder`/
//! `AgeYounger` (the client-requested unit).

use serde_json::{Map, Value};

use crate::request::{OrderKey, OrderSpec};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a raw upstream JSON object. Non-objects yield None.
    pub fn from_object(value: Value) -> Option<Record> {
        match value {
            Value::Object(fields) => Some(Record { fields }),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(v) = self.fields.remove(from) {
            self.fields.insert(to.to_string(), v);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Numeric field access. Upstreams are inconsistent about quoting
    /// numbers, so numeric strings count.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.fields.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.fields.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Canonical old edge in ybp.
    pub fn age_older(&self) -> Option<f64> {
        self.get_f64("age_older")
    }

    /// Canonical young edge in ybp.
    pub fn age_younger(&self) -> Option<f64> {
        self.get_f64("age_younger")
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

/// Stable post-merge sort. Records missing a key sort after records that
/// have it, regardless of direction; ties keep the incoming order (which is
/// registration order across subqueries, document order within one).
pub fn sort_records(records: &mut [Record], order: &[OrderSpec]) {
    if order.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        for spec in order {
            let field = match spec.key {
                OrderKey::AgeOlder => "age_older",
                OrderKey::AgeYounger => "age_younger",
            };
            let cmp = match (a.get_f64(field), b.get_f64(field)) {
                (Some(x), Some(y)) => {
                    let c = x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal);
                    if spec.descending {
                        c.reverse()
                    } else {
                        c
                    }
                }
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            };
            if cmp != std::cmp::Ordering::Equal {
                return cmp;
            }
        }
        std::cmp::Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(older: Option<f64>, tag: &str) -> Record {
        let mut r = Record::new();
        if let Some(v) = older {
            r.set("age_older", v);
        }
        r.set("tag", tag);
        r
    }

    #[test]
    fn numeric_strings_count_as_numbers() {
        let r = Record::from_object(json!({"occid": "123", "age": 4.5})).unwrap();
        assert_eq!(r.get_u64("occid"), Some(123));
        assert_eq!(r.get_f64("age"), Some(4.5));
    }

    #[test]
    fn missing_keys_sort_last_in_both_directions() {
        let specs = |desc| {
            vec![OrderSpec {
                key: OrderKey::AgeOlder,
                descending: desc,
            }]
        };
        for desc in [false, true] {
            let mut records = vec![rec(None, "missing"), rec(Some(2.0), "b"), rec(Some(1.0), "a")];
            sort_records(&mut records, &specs(desc));
            assert_eq!(records[2].get_str("tag"), Some("missing"));
        }
    }

    #[test]
    fn ties_preserve_incoming_order() {
        let mut records = vec![
            rec(Some(5.0), "first"),
            rec(Some(5.0), "second"),
            rec(Some(1.0), "third"),
        ];
        sort_records(
            &mut records,
            &[OrderSpec {
                key: OrderKey::AgeOlder,
                descending: false,
            }],
        );
        assert_eq!(records[0].get_str("tag"), Some("third"));
        assert_eq!(records[1].get_str("tag"), Some("first"));
        assert_eq!(records[2].get_str("tag"), Some("second"));
    }
}
