//! Normalized in-memory query cache
//!
//! Objects that carry both `__typename` and `id` are stored once, keyed
//! `Typename:id`, and referenced from wherever they appear. Later writes for
//! the same entity shallow-merge into the stored record.
//!
//! Root fields are stored under a key built from their arguments. A
//! [`FieldPolicy`] can narrow that key to a subset of the arguments and can
//! replace the default "incoming wins" merge with list concatenation, which
//! is how paginated lists accumulate pages.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::{Value as JsonValue, json};
use tokio::sync::watch;
use tracing::trace;

use super::document::{
    BoundField, BoundOperation, BoundSelection, JsonMap, OperationKind, TYPENAME_FIELD,
    collect_fields,
};

const REF_FIELD: &str = "__ref";

/// How an incoming field value combines with the cached one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Incoming value replaces the cached one
    #[default]
    Replace,
    /// Incoming list is appended after the cached list, duplicates included
    Concat,
}

/// Per-field cache behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPolicy {
    /// Arguments that distinguish cache entries. `None` uses all of them.
    pub key_args: Option<Vec<String>>,
    pub merge: MergeStrategy,
}

impl FieldPolicy {
    /// Policy for an offset-paginated list: keyed on `key_args` only, pages
    /// appended in arrival order
    pub fn paginated<I, S>(key_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key_args: Some(key_args.into_iter().map(Into::into).collect()),
            merge: MergeStrategy::Concat,
        }
    }
}

/// Field policies keyed by `(typename, field name)`
#[derive(Debug, Clone, Default)]
pub struct TypePolicies {
    fields: HashMap<(String, String), FieldPolicy>,
}

impl TypePolicies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(
        mut self,
        typename: impl Into<String>,
        field: impl Into<String>,
        policy: FieldPolicy,
    ) -> Self {
        self.fields.insert((typename.into(), field.into()), policy);
        self
    }

    fn get(&self, typename: &str, field: &str) -> Option<&FieldPolicy> {
        self.fields.get(&(typename.to_string(), field.to_string()))
    }
}

/// Storage key of a field: `name` or `name({"arg":value,...})` with sorted args
pub fn field_storage_key(name: &str, arguments: &JsonMap, policy: Option<&FieldPolicy>) -> String {
    let args: BTreeMap<&String, &JsonValue> = arguments
        .iter()
        .filter(|(arg, _)| match policy.and_then(|p| p.key_args.as_ref()) {
            Some(key_args) => key_args.iter().any(|k| k == *arg),
            None => true,
        })
        .collect();

    if args.is_empty() {
        name.to_string()
    } else {
        // BTreeMap keeps the serialization order stable
        let encoded = serde_json::to_string(&args).unwrap_or_default();
        format!("{name}({encoded})")
    }
}

fn root_id(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Query => "ROOT_QUERY",
        OperationKind::Mutation => "ROOT_MUTATION",
        OperationKind::Subscription => "ROOT_SUBSCRIPTION",
    }
}

fn root_typename(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Query => "Query",
        OperationKind::Mutation => "Mutation",
        OperationKind::Subscription => "Subscription",
    }
}

/// Cache id of an object, if it is an identifiable entity
pub fn identify(object: &JsonMap) -> Option<String> {
    let typename = object.get(TYPENAME_FIELD)?.as_str()?;
    let id = match object.get("id")? {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(format!("{typename}:{id}"))
}

fn merge_values(strategy: MergeStrategy, existing: Option<JsonValue>, incoming: JsonValue) -> JsonValue {
    match strategy {
        MergeStrategy::Replace => incoming,
        MergeStrategy::Concat => {
            let mut merged = match existing {
                Some(JsonValue::Array(items)) => items,
                _ => Vec::new(),
            };
            match incoming {
                JsonValue::Array(items) => merged.extend(items),
                JsonValue::Null => {}
                other => merged.push(other),
            }
            JsonValue::Array(merged)
        }
    }
}

/// Normalized cache shared by every query and mutation of one client
pub struct InMemoryCache {
    records: RwLock<HashMap<String, JsonMap>>,
    policies: TypePolicies,
    version: watch::Sender<u64>,
    // Bumped by `reset`, only while holding the `records` write lock
    generation: AtomicU64,
}

impl InMemoryCache {
    pub fn new(policies: TypePolicies) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            records: RwLock::new(HashMap::new()),
            policies,
            version,
            generation: AtomicU64::new(0),
        }
    }

    /// Receiver that observes a new value after every write or reset
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    /// Number of resets so far. Capture it before sending a request and
    /// pass it to [`write_in_generation`](Self::write_in_generation).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Normalize `data` (the response's `data` object) into the store
    pub fn write(&self, operation: &BoundOperation, data: &JsonValue) {
        self.write_checked(None, operation, data);
    }

    /// Like [`write`](Self::write), but only if the cache has not been reset
    /// since `generation` was read. Returns whether the data was written.
    pub fn write_in_generation(&self, generation: u64, operation: &BoundOperation, data: &JsonValue) -> bool {
        self.write_checked(Some(generation), operation, data)
    }

    fn write_checked(&self, generation: Option<u64>, operation: &BoundOperation, data: &JsonValue) -> bool {
        let Some(object) = data.as_object() else {
            return false;
        };
        {
            let mut records = self.records.write();
            if generation.is_some_and(|g| g != self.generation.load(Ordering::Acquire)) {
                trace!(kind = ?operation.kind, "Stale write after reset dropped");
                return false;
            }
            let mut writer = Writer {
                records: &mut records,
                policies: &self.policies,
            };
            writer.write_object(
                root_id(operation.kind),
                root_typename(operation.kind),
                &operation.selection,
                object,
            );
        }
        trace!(kind = ?operation.kind, "Cache write");
        self.bump();
        true
    }

    /// Denormalize the operation's selection from the store.
    ///
    /// Returns `None` when any selected field is missing.
    pub fn read(&self, operation: &BoundOperation) -> Option<JsonValue> {
        let records = self.records.read();
        let root = records.get(root_id(operation.kind))?;
        let reader = Reader {
            records: &records,
            policies: &self.policies,
        };
        reader
            .read_object(root, root_typename(operation.kind), &operation.selection)
            .map(JsonValue::Object)
    }

    /// Raw cached list of a root query field; empty when nothing was merged yet
    pub fn read_list(&self, field: &str, arguments: &JsonMap) -> Vec<JsonValue> {
        let key = field_storage_key(field, arguments, self.policies.get("Query", field));
        self.records
            .read()
            .get(root_id(OperationKind::Query))
            .and_then(|root| root.get(&key))
            .and_then(|value| value.as_array().cloned())
            .unwrap_or_default()
    }

    /// Stored record of an entity
    pub fn read_entity(&self, id: &str) -> Option<JsonMap> {
        self.records.read().get(id).cloned()
    }

    /// Snapshot of every record, keyed by cache id
    pub fn extract(&self) -> JsonValue {
        let records = self.records.read();
        let ordered: BTreeMap<&String, &JsonMap> = records.iter().collect();
        json!(ordered)
    }

    /// Drop all cached data
    pub fn reset(&self) {
        {
            let mut records = self.records.write();
            records.clear();
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        self.bump();
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(TypePolicies::default())
    }
}

struct Writer<'a> {
    records: &'a mut HashMap<String, JsonMap>,
    policies: &'a TypePolicies,
}

impl Writer<'_> {
    /// Merge the selected fields of `object` into the record `id`
    fn write_object(&mut self, id: &str, typename: &str, selection: &[BoundSelection], object: &JsonMap) {
        let fields = self.store_fields(typename, selection, object);
        let record = self.records.entry(id.to_string()).or_default();
        Self::merge_into(record, fields);
    }

    /// Stored representation of the selected fields, with the merge
    /// strategy each one needs
    fn store_fields(
        &mut self,
        typename: &str,
        selection: &[BoundSelection],
        object: &JsonMap,
    ) -> Vec<(String, MergeStrategy, JsonValue)> {
        let mut selected = Vec::new();
        collect_fields(selection, Some(typename), &mut selected);

        let mut stored = Vec::with_capacity(selected.len());
        for field in selected {
            let Some(value) = object.get(&field.response_key) else {
                continue;
            };
            let policy = self.policies.get(typename, &field.name);
            let key = field_storage_key(&field.name, &field.arguments, policy);
            let strategy = policy.map(|p| p.merge).unwrap_or_default();
            stored.push((key, strategy, self.store_value(field, value)));
        }
        stored
    }

    fn merge_into(record: &mut JsonMap, fields: Vec<(String, MergeStrategy, JsonValue)>) {
        for (key, strategy, value) in fields {
            let existing = record.remove(&key);
            record.insert(key, merge_values(strategy, existing, value));
        }
    }

    fn store_value(&mut self, field: &BoundField, value: &JsonValue) -> JsonValue {
        if field.is_leaf() {
            return value.clone();
        }
        match value {
            JsonValue::Array(items) => {
                JsonValue::Array(items.iter().map(|item| self.store_value(field, item)).collect())
            }
            JsonValue::Object(object) => {
                let typename = object
                    .get(TYPENAME_FIELD)
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string();
                match identify(object) {
                    Some(id) => {
                        self.write_object(&id, &typename, &field.selection, object);
                        json!({ REF_FIELD: id })
                    }
                    None => {
                        let fields = self.store_fields(&typename, &field.selection, object);
                        let mut embedded = JsonMap::new();
                        Self::merge_into(&mut embedded, fields);
                        JsonValue::Object(embedded)
                    }
                }
            }
            other => other.clone(),
        }
    }
}

struct Reader<'a> {
    records: &'a HashMap<String, JsonMap>,
    policies: &'a TypePolicies,
}

impl Reader<'_> {
    fn read_object(&self, record: &JsonMap, typename: &str, selection: &[BoundSelection]) -> Option<JsonMap> {
        let mut selected = Vec::new();
        collect_fields(selection, Some(typename), &mut selected);

        let mut out = JsonMap::new();
        for field in selected {
            if field.name == TYPENAME_FIELD {
                let value = record
                    .get(TYPENAME_FIELD)
                    .cloned()
                    .unwrap_or_else(|| JsonValue::String(typename.to_string()));
                out.insert(field.response_key.clone(), value);
                continue;
            }
            let policy = self.policies.get(typename, &field.name);
            let key = field_storage_key(&field.name, &field.arguments, policy);
            let stored = record.get(&key)?;
            out.insert(field.response_key.clone(), self.read_value(field, stored)?);
        }
        Some(out)
    }

    fn read_value(&self, field: &BoundField, stored: &JsonValue) -> Option<JsonValue> {
        if field.is_leaf() {
            return Some(stored.clone());
        }
        match stored {
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.read_value(field, item))
                .collect::<Option<Vec<_>>>()
                .map(JsonValue::Array),
            JsonValue::Object(object) => {
                let record = match object.get(REF_FIELD).and_then(|r| r.as_str()) {
                    Some(id) => self.records.get(id)?,
                    None => object,
                };
                let typename = record
                    .get(TYPENAME_FIELD)
                    .and_then(|t| t.as_str())
                    .unwrap_or_default();
                self.read_object(record, typename, &field.selection)
                    .map(JsonValue::Object)
            }
            other => Some(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphql::document::Document;
    use pretty_assertions::assert_eq;

    const BOOKS: &str = r#"query($searchString: String, $typeCode: String, $offset: Int, $limit: Int) {
        getAvailableBooks(searchString: $searchString, typeCode: $typeCode, offset: $offset, limit: $limit) { id title }
    }"#;

    fn books_cache() -> InMemoryCache {
        InMemoryCache::new(TypePolicies::new().with_field(
            "Query",
            "getAvailableBooks",
            FieldPolicy::paginated(["searchString", "typeCode"]),
        ))
    }

    fn vars(search: &str, offset: i64) -> JsonMap {
        let mut map = JsonMap::new();
        map.insert("searchString".into(), json!(search));
        map.insert("typeCode".into(), json!("BOOK"));
        map.insert("offset".into(), json!(offset));
        map.insert("limit".into(), json!(2));
        map
    }

    fn page(ids: &[i64]) -> JsonValue {
        let books: Vec<_> = ids
            .iter()
            .map(|id| json!({"__typename": "Book", "id": id, "title": format!("Book {id}")}))
            .collect();
        json!({ "getAvailableBooks": books })
    }

    fn ids(data: &JsonValue) -> Vec<i64> {
        data["getAvailableBooks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["id"].as_i64().unwrap())
            .collect()
    }

    #[test]
    fn test_pages_append_in_order() {
        let cache = books_cache();
        let doc = Document::parse(BOOKS).unwrap();

        let first = doc.bind(&vars("", 0)).unwrap();
        cache.write(&first, &page(&[1, 2]));
        let second = doc.bind(&vars("", 2)).unwrap();
        cache.write(&second, &page(&[3, 4]));

        // Offset is not a key argument, so both bindings read the same entry
        assert_eq!(ids(&cache.read(&first).unwrap()), vec![1, 2, 3, 4]);
        assert_eq!(ids(&cache.read(&second).unwrap()), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_search_strings_do_not_share_entries() {
        let cache = books_cache();
        let doc = Document::parse(BOOKS).unwrap();

        cache.write(&doc.bind(&vars("dune", 0)).unwrap(), &page(&[1, 2]));
        cache.write(&doc.bind(&vars("emma", 0)).unwrap(), &page(&[7]));

        assert_eq!(ids(&cache.read(&doc.bind(&vars("dune", 0)).unwrap()).unwrap()), vec![1, 2]);
        assert_eq!(ids(&cache.read(&doc.bind(&vars("emma", 0)).unwrap()).unwrap()), vec![7]);
    }

    #[test]
    fn test_refetching_a_page_duplicates_entries() {
        let cache = books_cache();
        let doc = Document::parse(BOOKS).unwrap();
        let op = doc.bind(&vars("", 0)).unwrap();

        cache.write(&op, &page(&[1, 2]));
        cache.write(&op, &page(&[1, 2]));

        assert_eq!(ids(&cache.read(&op).unwrap()), vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_unmerged_list_reads_empty() {
        let cache = books_cache();
        assert_eq!(cache.read_list("getAvailableBooks", &vars("", 0)), Vec::<JsonValue>::new());

        let doc = Document::parse(BOOKS).unwrap();
        cache.write(&doc.bind(&vars("", 0)).unwrap(), &page(&[5]));
        assert_eq!(cache.read_list("getAvailableBooks", &vars("", 0)).len(), 1);
    }

    #[test]
    fn test_missing_field_is_a_miss() {
        let cache = InMemoryCache::default();
        let doc = Document::parse("{ getUserCheckouts { id status } }").unwrap();
        assert_eq!(cache.read(&doc.bind(&JsonMap::new()).unwrap()), None);
    }

    #[test]
    fn test_entities_are_shared_and_shallow_merged() {
        let cache = InMemoryCache::default();
        let checkouts = Document::parse(
            "{ getUserCheckouts { id status orders { id books { id title price } } } }",
        )
        .unwrap()
        .bind(&JsonMap::new())
        .unwrap();

        cache.write(
            &checkouts,
            &json!({"getUserCheckouts": [{
                "__typename": "Checkout", "id": "c1", "status": "open",
                "orders": {"__typename": "Order", "id": "o1",
                    "books": {"__typename": "Book", "id": 9, "title": "Old", "price": 10}}
            }]}),
        );

        // A later response mentioning the same book updates it everywhere
        let rename = Document::parse("mutation { renameBook { id title } }")
            .unwrap()
            .bind(&JsonMap::new())
            .unwrap();
        cache.write(
            &rename,
            &json!({"renameBook": {"__typename": "Book", "id": 9, "title": "New"}}),
        );

        let book = cache.read_entity("Book:9").unwrap();
        assert_eq!(book.get("title"), Some(&json!("New")));
        assert_eq!(book.get("price"), Some(&json!(10)));

        let data = cache.read(&checkouts).unwrap();
        assert_eq!(data["getUserCheckouts"][0]["orders"]["books"]["title"], json!("New"));
        assert_eq!(data["getUserCheckouts"][0]["__typename"], json!("Checkout"));
    }

    #[test]
    fn test_write_bumps_version_and_reset_clears() {
        let cache = InMemoryCache::default();
        let op = Document::parse("{ ping }").unwrap().bind(&JsonMap::new()).unwrap();
        let before = cache.version();

        cache.write(&op, &json!({"ping": true}));
        assert!(cache.version() > before);
        assert_eq!(cache.read(&op), Some(json!({"ping": true})));

        cache.reset();
        assert_eq!(cache.read(&op), None);
        assert_eq!(cache.extract(), json!({}));
    }

    #[test]
    fn test_write_from_before_reset_is_dropped() {
        let cache = InMemoryCache::default();
        let op = Document::parse("{ ping }").unwrap().bind(&JsonMap::new()).unwrap();

        let generation = cache.generation();
        cache.reset();

        assert!(!cache.write_in_generation(generation, &op, &json!({"ping": true})));
        assert_eq!(cache.read(&op), None);

        assert!(cache.write_in_generation(cache.generation(), &op, &json!({"ping": true})));
        assert_eq!(cache.read(&op), Some(json!({"ping": true})));
    }

    #[test]
    fn test_storage_key_uses_only_key_args() {
        let policy = FieldPolicy::paginated(["searchString", "typeCode"]);
        let key = field_storage_key("getAvailableBooks", &vars("x", 40), Some(&policy));
        assert_eq!(key, r#"getAvailableBooks({"searchString":"x","typeCode":"BOOK"})"#);
        assert_eq!(field_storage_key("getUserCheckouts", &JsonMap::new(), None), "getUserCheckouts");
    }
}
