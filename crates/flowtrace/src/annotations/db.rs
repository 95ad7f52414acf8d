//! Annotation records, queries, and the in-memory store.
//!
//! Records are keyed semantically by `(language, package, id)`. Queries are
//! conjunctive maps of field equalities, with `$in` for membership and
//! `$or` for disjunction, matched against the records' JSON form.

use std::rc::Rc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::StoreError;

/// What a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Function,
    Type,
}

/// A positional or named slot descriptor in `inputs`/`outputs`/`slots`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotRef {
    Index(usize),
    Name(String),
}

/// One slot entry: `{"slot": 0}` or `{"slot": "name"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDef {
    pub slot: SlotRef,
}

/// An annotation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub language: String,
    pub package: String,
    pub id: String,
    pub kind: RecordKind,
    /// Full name of the described callable (function records).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Method name, for function records scoped to a class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// One or more fully-qualified type names the record describes.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "string_or_list"
    )]
    pub class: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<SlotDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<SlotDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<SlotDef>,
}

impl Annotation {
    /// The key identifying this record in graph data:
    /// `language/package/id`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.language, self.package, self.id)
    }
}

/// Accepts `"x"` or `["x", "y"]` for the `class` field.
fn string_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// A conjunctive query over record fields.
#[derive(Debug, Clone, Default)]
pub struct Query(pub serde_json::Map<String, serde_json::Value>);

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field equality.
    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(field.to_owned(), value.into());
        self
    }

    /// Adds a `$in` membership constraint on a field.
    #[must_use]
    pub fn with_in(mut self, field: &str, values: Vec<serde_json::Value>) -> Self {
        self.0.insert(
            field.to_owned(),
            serde_json::json!({ "$in": serde_json::Value::Array(values) }),
        );
        self
    }

    /// A disjunction of sub-queries.
    #[must_use]
    pub fn any_of(queries: Vec<Self>) -> Self {
        let list: Vec<serde_json::Value> = queries
            .into_iter()
            .map(|q| serde_json::Value::Object(q.0))
            .collect();
        let mut map = serde_json::Map::new();
        map.insert("$or".to_owned(), serde_json::Value::Array(list));
        Self(map)
    }

    /// Whether the record's JSON form satisfies this query.
    #[must_use]
    pub fn matches(&self, record: &serde_json::Value) -> bool {
        self.0.iter().all(|(field, constraint)| {
            if field == "$or" {
                let serde_json::Value::Array(alternatives) = constraint else {
                    return false;
                };
                return alternatives.iter().any(|alternative| {
                    alternative
                        .as_object()
                        .is_some_and(|object| Self(object.clone()).matches(record))
                });
            }
            let Some(value) = record.get(field) else {
                return false;
            };
            match constraint.get("$in") {
                Some(serde_json::Value::Array(options)) => {
                    options.iter().any(|option| field_matches(value, option))
                }
                _ => field_matches(value, constraint),
            }
        })
    }
}

/// Field equality: direct, or membership when the record field is a list.
fn field_matches(value: &serde_json::Value, expected: &serde_json::Value) -> bool {
    if value == expected {
        return true;
    }
    match value {
        serde_json::Value::Array(items) => items.iter().any(|item| item == expected),
        _ => false,
    }
}

/// A queryable annotation store.
pub trait AnnotationDb {
    /// Exactly one record, none, or an error on ambiguity.
    fn get(&self, query: &Query) -> Result<Option<Rc<Annotation>>, StoreError>;

    /// All records matching the query.
    fn filter(&self, query: &Query) -> Vec<Rc<Annotation>>;

    /// Loads a package's records. Idempotent and cheap when repeated.
    ///
    /// Returns whether anything was actually loaded.
    fn load_package(&mut self, language: &str, package: &str) -> Result<bool, StoreError>;
}

/// In-memory annotation store.
#[derive(Debug, Default)]
pub struct MemoryAnnotationDb {
    /// Records paired with their JSON form for query matching.
    records: Vec<(Rc<Annotation>, serde_json::Value)>,
}

impl MemoryAnnotationDb {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads records from parsed JSON documents.
    pub fn load_documents(&mut self, documents: Vec<serde_json::Value>) -> Result<(), StoreError> {
        for document in documents {
            let record: Annotation = serde_json::from_value(document)?;
            let json = serde_json::to_value(&record)?;
            self.records.push((Rc::new(record), json));
        }
        Ok(())
    }

    /// Loads records from a JSON string holding a list of documents.
    pub fn load_str(&mut self, json: &str) -> Result<(), StoreError> {
        let documents: Vec<serde_json::Value> = serde_json::from_str(json)?;
        self.load_documents(documents)
    }

    /// Loads records from a JSON file holding a list of documents.
    pub fn load_file(&mut self, path: &std::path::Path) -> Result<(), StoreError> {
        let text = std::fs::read_to_string(path)?;
        self.load_str(&text)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl AnnotationDb for MemoryAnnotationDb {
    fn get(&self, query: &Query) -> Result<Option<Rc<Annotation>>, StoreError> {
        let mut matches = self.filter(query);
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            n => Err(StoreError::Ambiguous { matches: n }),
        }
    }

    fn filter(&self, query: &Query) -> Vec<Rc<Annotation>> {
        self.records
            .iter()
            .filter(|(_, json)| query.matches(json))
            .map(|(record, _)| Rc::clone(record))
            .collect()
    }

    fn load_package(&mut self, _language: &str, _package: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db() -> MemoryAnnotationDb {
        let mut db = MemoryAnnotationDb::new();
        db.load_str(
            r#"[
                {"language": "python", "package": "shop", "id": "widget",
                 "kind": "type", "class": "shop.Widget",
                 "slots": [{"slot": "label"}]},
                {"language": "python", "package": "shop", "id": "make-widget",
                 "kind": "function", "function": "shop.make_widget",
                 "outputs": [{"slot": 0}]},
                {"language": "python", "package": "shop", "id": "pair",
                 "kind": "type", "class": ["shop.Left", "shop.Right"]}
            ]"#,
        )
        .unwrap();
        db
    }

    #[test]
    fn filter_matches_field_equalities() {
        let db = sample_db();
        let query = Query::new().with("kind", "function");
        let found = db.filter(&query);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "make-widget");
    }

    #[test]
    fn equality_matches_inside_list_fields() {
        let db = sample_db();
        let query = Query::new().with("class", "shop.Right");
        let found = db.filter(&query);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "pair");
    }

    #[test]
    fn in_operator_matches_membership() {
        let db = sample_db();
        let query = Query::new().with_in(
            "id",
            vec![serde_json::json!("widget"), serde_json::json!("pair")],
        );
        assert_eq!(db.filter(&query).len(), 2);
    }

    #[test]
    fn or_operator_matches_disjunction() {
        let db = sample_db();
        let query = Query::any_of(vec![
            Query::new().with("id", "widget"),
            Query::new().with("id", "make-widget"),
        ]);
        assert_eq!(db.filter(&query).len(), 2);
    }

    #[test]
    fn get_rejects_ambiguity() {
        let db = sample_db();
        let query = Query::new().with("language", "python");
        assert!(matches!(
            db.get(&query),
            Err(StoreError::Ambiguous { matches: 3 })
        ));
    }

    #[test]
    fn get_returns_single_record() {
        let db = sample_db();
        let query = Query::new().with("id", "widget");
        let record = db.get(&query).unwrap().unwrap();
        assert_eq!(record.key(), "python/shop/widget");
        assert_eq!(record.slots.len(), 1);
    }

    #[test]
    fn slot_refs_deserialize_as_index_or_name() {
        let db = sample_db();
        let record = db
            .get(&Query::new().with("id", "make-widget"))
            .unwrap()
            .unwrap();
        assert_eq!(record.outputs[0].slot, SlotRef::Index(0));
    }
}
