use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property map of a node or relationship.
pub type Properties = Map<String, Value>;

/// Database identity of a node or relationship. Stable within one query
/// execution: two rows referencing the same entity carry equal identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(pub i64);

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub identity: Identity,
    pub labels: Vec<String>,
    pub properties: Properties,
}

impl GraphNode {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphRelationship {
    pub identity: Identity,
    pub rel_type: String,
    pub start: Identity,
    pub end: Identity,
    pub properties: Properties,
}

/// A single value in a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphValue {
    Node(GraphNode),
    Relationship(GraphRelationship),
    Scalar(Value),
    List(Vec<GraphValue>),
}

impl GraphValue {
    pub fn null() -> Self {
        GraphValue::Scalar(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, GraphValue::Scalar(Value::Null))
    }

    pub fn as_node(&self) -> Option<&GraphNode> {
        match self {
            GraphValue::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&GraphRelationship> {
        match self {
            GraphValue::Relationship(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            GraphValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_scalar().and_then(Value::as_i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(Value::as_str)
    }
}

/// One result row: column alias → value, in RETURN order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, GraphValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a column.
    pub fn insert(&mut self, column: impl Into<String>, value: GraphValue) {
        let column = column.into();
        match self.columns.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: GraphValue) -> Self {
        self.insert(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&GraphValue> {
        self.columns
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GraphValue)> {
        self.columns.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, GraphValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, GraphValue)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

/// JavaScript-style truthiness, used for flags such as `deleted` that hold
/// `false` until they are stamped with a timestamp.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_preserves_column_order_and_replaces_duplicates() {
        let row = Row::new()
            .with("a", GraphValue::Scalar(json!(1)))
            .with("b", GraphValue::null())
            .with("a", GraphValue::Scalar(json!(2)));

        let cols: Vec<&str> = row.iter().map(|(c, _)| c).collect();
        assert_eq!(cols, vec!["a", "b"]);
        assert_eq!(row.get("a").and_then(GraphValue::as_i64), Some(2));
        assert!(row.get("b").is_some_and(GraphValue::is_null));
    }

    #[test]
    fn deleted_timestamp_is_truthy_and_false_is_not() {
        assert!(is_truthy(Some(&json!("2024-01-01T00:00:00.000Z"))));
        assert!(!is_truthy(Some(&json!(false))));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(!is_truthy(None));
    }
}
