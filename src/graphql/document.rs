//! Parsed GraphQL operation documents
//!
//! Documents are parsed once with the `async-graphql` parser. On parse every
//! nested selection set gets a `__typename` selection so responses carry the
//! type information the normalized cache keys entities by.
//!
//! Binding a document to a set of variables produces a [`BoundOperation`]:
//! a plain tree of selected fields with arguments resolved to JSON, fragment
//! spreads expanded, and `@skip`/`@include` applied.

use std::collections::HashMap;
use std::sync::Arc;

use async_graphql::Name;
use async_graphql::Value as ConstValue;
use async_graphql::parser::parse_query;
use async_graphql::parser::types::{
    Directive, ExecutableDocument, FragmentDefinition, OperationDefinition, OperationType,
    Selection, SelectionSet,
};
use async_graphql::parser::Positioned;
use serde_json::{Map, Value as JsonValue};

use super::error::DocumentError;

pub type JsonMap = Map<String, JsonValue>;

/// Field name the cache uses to identify entity types
pub const TYPENAME_FIELD: &str = "__typename";

// Guards against fragment cycles; the server rejects those anyway
const MAX_FRAGMENT_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl From<OperationType> for OperationKind {
    fn from(ty: OperationType) -> Self {
        match ty {
            OperationType::Query => Self::Query,
            OperationType::Mutation => Self::Mutation,
            OperationType::Subscription => Self::Subscription,
        }
    }
}

/// A parsed, typename-augmented GraphQL document
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

struct DocumentInner {
    source: String,
    ast: ExecutableDocument,
    operation_name: Option<String>,
    kind: OperationKind,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("operation_name", &self.inner.operation_name)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

impl Document {
    /// Parse a document. The first operation in it is the one executed.
    pub fn parse(source: &str) -> Result<Self, DocumentError> {
        let ast = parse_query(source).map_err(|e| DocumentError::Parse(e.to_string()))?;
        let source = add_typename(source, &ast);
        let ast = parse_query(&source).map_err(|e| DocumentError::Parse(e.to_string()))?;

        let (operation_name, kind) = {
            let (name, operation) = ast
                .operations
                .iter()
                .min_by_key(|(_, op)| (op.pos.line, op.pos.column))
                .ok_or(DocumentError::NoOperation)?;
            (name.map(|n| n.to_string()), OperationKind::from(operation.node.ty))
        };

        Ok(Self {
            inner: Arc::new(DocumentInner {
                source,
                ast,
                operation_name,
                kind,
            }),
        })
    }

    /// Document text as sent over the wire
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    pub fn operation_name(&self) -> Option<&str> {
        self.inner.operation_name.as_deref()
    }

    pub fn kind(&self) -> OperationKind {
        self.inner.kind
    }

    fn operation(&self) -> Result<&OperationDefinition, DocumentError> {
        let wanted = self.inner.operation_name.as_deref();
        self.inner
            .ast
            .operations
            .iter()
            .find(|(name, _)| name.map(|n| n.as_str()) == wanted)
            .map(|(_, op)| &op.node)
            .ok_or(DocumentError::NoOperation)
    }

    /// Resolve the selection tree against `variables`
    pub fn bind(&self, variables: &JsonMap) -> Result<BoundOperation, DocumentError> {
        let operation = self.operation()?;

        let mut resolved: HashMap<String, ConstValue> = HashMap::new();
        for definition in &operation.variable_definitions {
            let name = definition.node.name.node.to_string();
            let value = match variables.get(&name) {
                Some(json) => ConstValue::from_json(json.clone())
                    .map_err(|e| DocumentError::Parse(format!("variable ${name}: {e}")))?,
                None => definition
                    .node
                    .default_value
                    .as_ref()
                    .map(|v| v.node.clone())
                    .unwrap_or(ConstValue::Null),
            };
            resolved.insert(name, value);
        }

        let binder = Binder {
            variables: &resolved,
            fragments: &self.inner.ast.fragments,
        };
        let selection = binder.bind_set(&operation.selection_set.node, 0)?;

        Ok(BoundOperation {
            kind: self.inner.kind,
            selection,
        })
    }
}

/// An operation's selection tree with arguments resolved
#[derive(Debug, Clone, PartialEq)]
pub struct BoundOperation {
    pub kind: OperationKind,
    pub selection: Vec<BoundSelection>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundSelection {
    Field(BoundField),
    /// Inline fragment or expanded fragment spread
    Fragment {
        type_condition: Option<String>,
        selection: Vec<BoundSelection>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundField {
    pub name: String,
    /// Alias if present, otherwise the field name
    pub response_key: String,
    pub arguments: JsonMap,
    pub selection: Vec<BoundSelection>,
}

impl BoundField {
    pub fn is_leaf(&self) -> bool {
        self.selection.is_empty()
    }
}

/// Fields selected by `selection` for an object of type `typename`
///
/// Fragments with a type condition are included when the condition names the
/// object's type or when the type is unknown.
pub fn collect_fields<'a>(
    selection: &'a [BoundSelection],
    typename: Option<&str>,
    out: &mut Vec<&'a BoundField>,
) {
    for item in selection {
        match item {
            BoundSelection::Field(field) => out.push(field),
            BoundSelection::Fragment {
                type_condition,
                selection,
            } => {
                let applies = match (type_condition.as_deref(), typename) {
                    (Some(condition), Some(typename)) => condition == typename,
                    _ => true,
                };
                if applies {
                    collect_fields(selection, typename, out);
                }
            }
        }
    }
}

struct Binder<'a> {
    variables: &'a HashMap<String, ConstValue>,
    fragments: &'a HashMap<Name, Positioned<FragmentDefinition>>,
}

impl Binder<'_> {
    fn bind_set(
        &self,
        set: &SelectionSet,
        depth: usize,
    ) -> Result<Vec<BoundSelection>, DocumentError> {
        let mut bound = Vec::with_capacity(set.items.len());
        for item in &set.items {
            match &item.node {
                Selection::Field(field) => {
                    let field = &field.node;
                    if !self.included(&field.directives)? {
                        continue;
                    }
                    let mut arguments = JsonMap::new();
                    for (name, value) in &field.arguments {
                        let value = value.node.clone().into_const_with(|n| self.lookup(n))?;
                        arguments.insert(name.node.to_string(), to_json(value)?);
                    }
                    bound.push(BoundSelection::Field(BoundField {
                        name: field.name.node.to_string(),
                        response_key: field.response_key().node.to_string(),
                        arguments,
                        selection: self.bind_set(&field.selection_set.node, depth)?,
                    }));
                }
                Selection::InlineFragment(fragment) => {
                    let fragment = &fragment.node;
                    if !self.included(&fragment.directives)? {
                        continue;
                    }
                    bound.push(BoundSelection::Fragment {
                        type_condition: fragment
                            .type_condition
                            .as_ref()
                            .map(|c| c.node.on.node.to_string()),
                        selection: self.bind_set(&fragment.selection_set.node, depth)?,
                    });
                }
                Selection::FragmentSpread(spread) => {
                    let spread = &spread.node;
                    if !self.included(&spread.directives)? {
                        continue;
                    }
                    if depth >= MAX_FRAGMENT_DEPTH {
                        return Err(DocumentError::Parse(format!(
                            "fragment nesting too deep at {}",
                            spread.fragment_name.node
                        )));
                    }
                    let definition = self
                        .fragments
                        .get(&spread.fragment_name.node)
                        .ok_or_else(|| {
                            DocumentError::Parse(format!(
                                "unknown fragment {}",
                                spread.fragment_name.node
                            ))
                        })?;
                    bound.push(BoundSelection::Fragment {
                        type_condition: Some(definition.node.type_condition.node.on.node.to_string()),
                        selection: self.bind_set(&definition.node.selection_set.node, depth + 1)?,
                    });
                }
            }
        }
        Ok(bound)
    }

    fn lookup(&self, name: Name) -> Result<ConstValue, DocumentError> {
        self.variables
            .get(name.as_str())
            .cloned()
            .ok_or_else(|| DocumentError::UnknownVariable(name.to_string()))
    }

    /// Evaluates `@skip(if:)` and `@include(if:)`
    fn included(&self, directives: &[Positioned<Directive>]) -> Result<bool, DocumentError> {
        for directive in directives {
            let directive = &directive.node;
            let expected = match directive.name.node.as_str() {
                "skip" => false,
                "include" => true,
                _ => continue,
            };
            let condition = directive
                .arguments
                .iter()
                .find(|(name, _)| name.node.as_str() == "if")
                .map(|(_, value)| value.node.clone().into_const_with(|n| self.lookup(n)))
                .transpose()?
                .map(|v| matches!(v, ConstValue::Boolean(true)))
                .unwrap_or(false);
            if condition != expected {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn to_json(value: ConstValue) -> Result<JsonValue, DocumentError> {
    value
        .into_json()
        .map_err(|e| DocumentError::Parse(format!("argument value: {e}")))
}

/// Insert `__typename` into every nested selection set that lacks it
fn add_typename(source: &str, ast: &ExecutableDocument) -> String {
    let mut positions = Vec::new();
    for (_, operation) in ast.operations.iter() {
        // The operation root is not an entity
        for item in &operation.node.selection_set.node.items {
            collect_nested_sets(&item.node, &mut positions);
        }
    }
    for (_, fragment) in ast.fragments.iter() {
        push_set(&fragment.node.selection_set, &mut positions);
    }

    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(source.match_indices('\n').map(|(i, _)| i + 1))
        .collect();

    let mut offsets: Vec<usize> = positions
        .into_iter()
        .filter_map(|(line, column)| {
            let start = *line_starts.get(line.checked_sub(1)?)?;
            let at = source[start..]
                .char_indices()
                .nth(column.saturating_sub(1))
                .map(|(i, _)| start + i)?;
            source[at..].find('{').map(|brace| at + brace + 1)
        })
        .collect();
    offsets.sort_unstable();
    offsets.dedup();

    let mut out = source.to_string();
    for offset in offsets.into_iter().rev() {
        out.insert_str(offset, " __typename");
    }
    out
}

fn collect_nested_sets(selection: &Selection, positions: &mut Vec<(usize, usize)>) {
    match selection {
        Selection::Field(field) => push_set(&field.node.selection_set, positions),
        Selection::InlineFragment(fragment) => {
            // The enclosing selection set already receives the typename
            for item in &fragment.node.selection_set.node.items {
                collect_nested_sets(&item.node, positions);
            }
        }
        Selection::FragmentSpread(_) => {}
    }
}

fn push_set(set: &Positioned<SelectionSet>, positions: &mut Vec<(usize, usize)>) {
    if set.node.items.is_empty() {
        return;
    }
    let has_typename = set.node.items.iter().any(|item| {
        matches!(&item.node, Selection::Field(f) if f.node.name.node.as_str() == TYPENAME_FIELD && f.node.alias.is_none())
    });
    if !has_typename {
        positions.push((set.pos.line, set.pos.column));
    }
    for item in &set.node.items {
        collect_nested_sets(&item.node, positions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn field<'a>(selection: &'a [BoundSelection], key: &str) -> &'a BoundField {
        let mut fields = Vec::new();
        collect_fields(selection, None, &mut fields);
        fields
            .into_iter()
            .find(|f| f.response_key == key)
            .unwrap_or_else(|| panic!("no field {key}"))
    }

    fn has_typename(selection: &[BoundSelection]) -> bool {
        let mut fields = Vec::new();
        collect_fields(selection, None, &mut fields);
        fields.iter().any(|f| f.name == TYPENAME_FIELD)
    }

    #[test]
    fn test_typename_added_to_nested_sets_only() {
        let doc = Document::parse(
            "query { getUserCheckouts { id orders { id books { id title } } } }",
        )
        .unwrap();
        let bound = doc.bind(&JsonMap::new()).unwrap();

        assert!(!has_typename(&bound.selection));
        let checkouts = field(&bound.selection, "getUserCheckouts");
        assert!(has_typename(&checkouts.selection));
        let orders = field(&checkouts.selection, "orders");
        assert!(has_typename(&orders.selection));
        let books = field(&orders.selection, "books");
        assert!(has_typename(&books.selection));
    }

    #[test]
    fn test_existing_typename_not_duplicated() {
        let doc = Document::parse("{ me { __typename id } }").unwrap();
        assert_eq!(doc.source().matches("__typename").count(), 1);
    }

    #[test]
    fn test_arguments_resolve_variables_and_defaults() {
        let doc = Document::parse(
            r#"query Books($searchString: String, $typeCode: String = "ALL", $offset: Int) {
                getAvailableBooks(searchString: $searchString, typeCode: $typeCode, offset: $offset, limit: 10) { id }
            }"#,
        )
        .unwrap();
        assert_eq!(doc.operation_name(), Some("Books"));
        assert_eq!(doc.kind(), OperationKind::Query);

        let mut variables = JsonMap::new();
        variables.insert("searchString".into(), json!("dune"));
        let bound = doc.bind(&variables).unwrap();
        let books = field(&bound.selection, "getAvailableBooks");

        assert_eq!(
            JsonValue::Object(books.arguments.clone()),
            json!({"searchString": "dune", "typeCode": "ALL", "offset": null, "limit": 10})
        );
    }

    #[test]
    fn test_aliases_fragments_and_directives() {
        let doc = Document::parse(
            r#"query($withPrice: Boolean!) {
                first: getAvailableBooks(typeCode: "A") { ...BookParts price @include(if: $withPrice) }
            }
            fragment BookParts on Book { id title }"#,
        )
        .unwrap();

        let mut variables = JsonMap::new();
        variables.insert("withPrice".into(), json!(false));
        let bound = doc.bind(&variables).unwrap();

        let books = field(&bound.selection, "first");
        assert_eq!(books.name, "getAvailableBooks");
        let mut fields = Vec::new();
        collect_fields(&books.selection, Some("Book"), &mut fields);
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"title"));
        assert!(!names.contains(&"price"));
    }

    #[test]
    fn test_mutation_kind_and_parse_error() {
        let doc = Document::parse("mutation { signup(name: \"a\") { token } }").unwrap();
        assert_eq!(doc.kind(), OperationKind::Mutation);

        assert!(matches!(Document::parse("query {"), Err(DocumentError::Parse(_))));
    }
}
