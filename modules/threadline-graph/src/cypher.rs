//! Fluent Cypher statement builder.
//!
//! Every literal handed to the builder is bound to a generated parameter
//! (`$p1`, `$p2`, ...) so statements never carry inlined values and the
//! driver can cache their plans.
//!
//! ```ignore
//! let stmt = Cypher::new()
//!     .match_()
//!     .node(node("m").label("Message").props(json!({ "id": id })))
//!     .return_("m")
//!     .compile();
//! ```

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use threadline_common::ThreadlineError;

pub type Params = BTreeMap<String, Value>;

/// A compiled statement ready for execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub text: String,
    pub params: Params,
    /// Aliases of the final RETURN clause, in order.
    pub columns: Vec<String>,
}

impl Statement {
    /// A hand-written statement with no parameters.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `(left)-[]->(right)`
    Right,
    /// `(left)<-[]-(right)`
    Left,
    /// `(left)-[]-(right)`
    Both,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePattern {
    alias: String,
    label: Option<String>,
    props: Option<Value>,
}

pub fn node(alias: &str) -> NodePattern {
    NodePattern {
        alias: alias.to_string(),
        ..NodePattern::default()
    }
}

impl NodePattern {
    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn props(mut self, props: Value) -> Self {
        self.props = Some(props);
        self
    }
}

impl From<&str> for NodePattern {
    fn from(alias: &str) -> Self {
        node(alias)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelPattern {
    alias: Option<String>,
    rel_type: Option<String>,
    hops: Option<(u32, Option<u32>)>,
    props: Option<Value>,
}

pub fn rel(rel_type: &str) -> RelPattern {
    RelPattern {
        rel_type: Some(rel_type.to_string()),
        ..RelPattern::default()
    }
}

impl RelPattern {
    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// Variable-length match: `*min..max`, or `*min..` when `max` is `None`.
    pub fn hops(mut self, min: u32, max: Option<u32>) -> Self {
        self.hops = Some((min, max));
        self
    }

    pub fn props(mut self, props: Value) -> Self {
        self.props = Some(props);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }

    fn inverse(self) -> Option<Operator> {
        match self {
            Operator::Eq => Some(Operator::Ne),
            Operator::Ne => Some(Operator::Eq),
            _ => None,
        }
    }
}

/// A WHERE condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Cypher text used verbatim.
    Raw(String),
    Compare {
        field: String,
        op: Operator,
        value: Value,
    },
    /// AND of the inner conditions.
    All(Vec<Condition>),
    /// OR of the inner conditions.
    Any(Vec<Condition>),
    /// Flips equality comparisons inside; anything else is wrapped in `NOT (..)`.
    Not(Box<Condition>),
}

impl Condition {
    pub fn raw(text: impl Into<String>) -> Self {
        Condition::Raw(text.into())
    }

    pub fn compare(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Condition::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Operator::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Operator::Ne, value)
    }

    pub fn all(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::All(conditions.into_iter().collect())
    }

    pub fn any(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Condition::Any(conditions.into_iter().collect())
    }

    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }

    /// Field → value pairs compared for equality and ANDed together.
    pub fn fields<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Condition::All(pairs.into_iter().map(|(k, v)| Self::eq(k, v)).collect())
    }

    /// Interpret a loosely-shaped JSON clause:
    /// - a string is raw Cypher;
    /// - an object is field → value equality, ANDed. A `"not": true` entry
    ///   switches every later key to not-equals;
    /// - an array ORs its elements (nested arrays are flattened), unless the
    ///   first element is `"AND"`, in which case the rest are ANDed.
    pub fn from_json(clause: &Value) -> Result<Self, ThreadlineError> {
        match clause {
            Value::String(s) => Ok(Condition::Raw(s.clone())),
            Value::Object(map) => Ok(Self::from_object(map)),
            Value::Array(items) => {
                let mut flat = Vec::new();
                flatten_into(items, &mut flat);

                let (conjunctive, rest) = match flat.first() {
                    Some(Value::String(s)) if s == "AND" && flat.len() > 1 => (true, &flat[1..]),
                    _ => (false, &flat[..]),
                };
                if rest.is_empty() {
                    return Err(ThreadlineError::MalformedClause("an empty array".to_string()));
                }

                let conditions = rest
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(Condition::Raw(s.clone())),
                        Value::Object(map) => Ok(Self::from_object(map)),
                        other => Err(ThreadlineError::MalformedClause(shape_name(other).to_string())),
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(if conjunctive {
                    Condition::All(conditions)
                } else {
                    Condition::Any(conditions)
                })
            }
            other => Err(ThreadlineError::MalformedClause(shape_name(other).to_string())),
        }
    }

    fn from_object(map: &Map<String, Value>) -> Self {
        let mut negated = false;
        let mut conditions = Vec::with_capacity(map.len());
        for (field, value) in map {
            if field == "not" && *value == Value::Bool(true) {
                negated = true;
                continue;
            }
            let op = if negated { Operator::Ne } else { Operator::Eq };
            conditions.push(Self::compare(field.as_str(), op, value.clone()));
        }
        Condition::All(conditions)
    }
}

impl From<&str> for Condition {
    fn from(text: &str) -> Self {
        Condition::Raw(text.to_string())
    }
}

impl From<String> for Condition {
    fn from(text: String) -> Self {
        Condition::Raw(text)
    }
}

fn flatten_into(items: &[Value], out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Array(inner) => flatten_into(inner, out),
            other => out.push(other.clone()),
        }
    }
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClauseKind {
    Create,
    Match,
    OptionalMatch,
    Merge,
    Where,
    Return,
    Other,
}

impl ClauseKind {
    fn is_pattern(self) -> bool {
        matches!(
            self,
            ClauseKind::Create | ClauseKind::Match | ClauseKind::OptionalMatch | ClauseKind::Merge
        )
    }
}

#[derive(Debug, Clone)]
struct Clause {
    kind: ClauseKind,
    head: &'static str,
    parts: Vec<String>,
}

impl Clause {
    fn render(&self) -> String {
        if self.parts.is_empty() {
            return self.head.to_string();
        }
        let sep = match self.kind {
            ClauseKind::Where => " AND ",
            kind if kind.is_pattern() => ", ",
            _ => " ",
        };
        format!("{} {}", self.head, self.parts.join(sep))
    }
}

/// Chainable statement builder. Calls append clauses in order; `compile()`
/// renders them one per line.
#[derive(Debug, Clone, Default)]
pub struct Cypher {
    clauses: Vec<Clause>,
    params: Params,
    last_id: u32,
}

impl Cypher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` under a fresh parameter name and return its placeholder.
    pub fn bind(&mut self, value: impl Into<Value>) -> String {
        self.last_id += 1;
        let name = format!("p{}", self.last_id);
        let placeholder = format!("${name}");
        self.params.insert(name, value.into());
        placeholder
    }

    pub fn create(&mut self) -> &mut Self {
        self.open(ClauseKind::Create, "CREATE")
    }

    pub fn match_(&mut self) -> &mut Self {
        self.open(ClauseKind::Match, "MATCH")
    }

    pub fn optional_match(&mut self) -> &mut Self {
        self.open(ClauseKind::OptionalMatch, "OPTIONAL MATCH")
    }

    pub fn merge(&mut self) -> &mut Self {
        self.open(ClauseKind::Merge, "MERGE")
    }

    /// Append a node pattern to the open pattern clause.
    pub fn node(&mut self, pattern: impl Into<NodePattern>) -> &mut Self {
        let kind = self.pattern_kind();
        let rendered = self.render_node(&pattern.into(), kind);
        self.push_part(rendered);
        self
    }

    /// Append a relationship pattern. Undirected inside MATCH, left-to-right
    /// everywhere else.
    pub fn connect(
        &mut self,
        left: impl Into<NodePattern>,
        relation: RelPattern,
        right: impl Into<NodePattern>,
    ) -> &mut Self {
        let direction = match self.pattern_kind() {
            ClauseKind::Match | ClauseKind::OptionalMatch => Direction::Both,
            _ => Direction::Right,
        };
        self.connect_with(left, relation, right, direction)
    }

    pub fn connect_right(
        &mut self,
        left: impl Into<NodePattern>,
        relation: RelPattern,
        right: impl Into<NodePattern>,
    ) -> &mut Self {
        self.connect_with(left, relation, right, Direction::Right)
    }

    pub fn connect_left(
        &mut self,
        left: impl Into<NodePattern>,
        relation: RelPattern,
        right: impl Into<NodePattern>,
    ) -> &mut Self {
        self.connect_with(left, relation, right, Direction::Left)
    }

    pub fn connect_with(
        &mut self,
        left: impl Into<NodePattern>,
        relation: RelPattern,
        right: impl Into<NodePattern>,
        direction: Direction,
    ) -> &mut Self {
        let kind = self.pattern_kind();
        let left = self.render_node(&left.into(), kind);
        let relation = self.render_rel(&relation, kind);
        let right = self.render_node(&right.into(), kind);

        let (open, close) = match direction {
            Direction::Right => ("-", "->"),
            Direction::Left => ("<-", "-"),
            Direction::Both => ("-", "-"),
        };
        self.push_part(format!("{left}{open}{relation}{close}{right}"));
        self
    }

    /// AND a condition onto the current WHERE clause, opening one if needed.
    /// Fails when the condition reduces to nothing.
    pub fn where_(&mut self, condition: impl Into<Condition>) -> Result<&mut Self, ThreadlineError> {
        let rendered = self
            .reduce(&condition.into(), false)
            .ok_or_else(|| ThreadlineError::MalformedClause("an empty condition".to_string()))?;
        self.push_where(rendered);
        Ok(self)
    }

    /// `field = value`, or `field IN value` when `value` is an array.
    pub fn where_field(&mut self, field: &str, value: impl Into<Value>) -> &mut Self {
        let rendered = self.render_compare(field, Operator::Eq, &value.into(), false);
        if let Some(rendered) = rendered {
            self.push_where(rendered);
        }
        self
    }

    /// Dynamic form of `where_` for string / object / array shaped clauses.
    pub fn where_json(&mut self, clause: &Value) -> Result<&mut Self, ThreadlineError> {
        let condition = Condition::from_json(clause)?;
        self.where_(condition)
    }

    pub fn with_(&mut self, expr: &str) -> &mut Self {
        self.push_clause(ClauseKind::Other, "WITH", expr)
    }

    pub fn unwind(&mut self, list: &str, alias: &str) -> &mut Self {
        self.push_clause(ClauseKind::Other, "UNWIND", &format!("{list} AS {alias}"))
    }

    /// `UNWIND $pN AS alias` with `value` bound.
    pub fn unwind_value(&mut self, value: impl Into<Value>, alias: &str) -> &mut Self {
        let placeholder = self.bind(value);
        self.unwind(&placeholder, alias)
    }

    pub fn set(&mut self, expr: &str) -> &mut Self {
        self.push_clause(ClauseKind::Other, "SET", expr)
    }

    pub fn on_create_set(&mut self, expr: &str) -> &mut Self {
        self.push_clause(ClauseKind::Other, "ON CREATE SET", expr)
    }

    pub fn on_match_set(&mut self, expr: &str) -> &mut Self {
        self.push_clause(ClauseKind::Other, "ON MATCH SET", expr)
    }

    pub fn detach_delete(&mut self, expr: &str) -> &mut Self {
        self.push_clause(ClauseKind::Other, "DETACH DELETE", expr)
    }

    pub fn return_(&mut self, expr: &str) -> &mut Self {
        self.push_clause(ClauseKind::Return, "RETURN", expr)
    }

    pub fn order_by(&mut self, expr: &str) -> &mut Self {
        self.push_clause(ClauseKind::Other, "ORDER BY", expr)
    }

    pub fn skip(&mut self, count: i64) -> &mut Self {
        self.push_clause(ClauseKind::Other, "SKIP", &count.max(0).to_string())
    }

    pub fn limit(&mut self, count: i64) -> &mut Self {
        self.push_clause(ClauseKind::Other, "LIMIT", &count.max(0).to_string())
    }

    /// Append a line of Cypher verbatim.
    pub fn raw(&mut self, text: &str) -> &mut Self {
        self.clauses.push(Clause {
            kind: ClauseKind::Other,
            head: "",
            parts: vec![text.to_string()],
        });
        self
    }

    pub fn compile(&self) -> Statement {
        let text = self
            .clauses
            .iter()
            .map(|c| {
                let line = c.render();
                line.trim_start().to_string()
            })
            .collect::<Vec<_>>()
            .join("\n");

        let columns = self
            .clauses
            .iter()
            .rev()
            .find(|c| c.kind == ClauseKind::Return)
            .map(|c| return_columns(&c.parts.join(" ")))
            .unwrap_or_default();

        Statement {
            text,
            params: self.params.clone(),
            columns,
        }
    }

    // --- internals ---

    fn open(&mut self, kind: ClauseKind, head: &'static str) -> &mut Self {
        self.clauses.push(Clause {
            kind,
            head,
            parts: Vec::new(),
        });
        self
    }

    /// Kind of the open pattern clause, starting a MATCH if there is none.
    fn pattern_kind(&mut self) -> ClauseKind {
        match self.clauses.last() {
            Some(c) if c.kind.is_pattern() => c.kind,
            _ => {
                self.open(ClauseKind::Match, "MATCH");
                ClauseKind::Match
            }
        }
    }

    fn push_part(&mut self, part: String) {
        if let Some(clause) = self.clauses.last_mut() {
            clause.parts.push(part);
        }
    }

    fn push_where(&mut self, rendered: String) {
        match self.clauses.last_mut() {
            Some(c) if c.kind == ClauseKind::Where => c.parts.push(rendered),
            _ => self.clauses.push(Clause {
                kind: ClauseKind::Where,
                head: "WHERE",
                parts: vec![rendered],
            }),
        }
    }

    fn push_clause(&mut self, kind: ClauseKind, head: &'static str, body: &str) -> &mut Self {
        self.clauses.push(Clause {
            kind,
            head,
            parts: vec![body.to_string()],
        });
        self
    }

    fn render_node(&mut self, pattern: &NodePattern, kind: ClauseKind) -> String {
        let mut out = format!("({}", pattern.alias);
        if let Some(label) = &pattern.label {
            out.push(':');
            out.push_str(label);
        }
        if let Some(props) = self.render_props(pattern.props.as_ref(), kind) {
            if out.len() > 1 {
                out.push(' ');
            }
            out.push_str(&props);
        }
        out.push(')');
        out
    }

    fn render_rel(&mut self, pattern: &RelPattern, kind: ClauseKind) -> String {
        let mut out = String::from("[");
        if let Some(alias) = &pattern.alias {
            out.push_str(alias);
        }
        if let Some(rel_type) = &pattern.rel_type {
            out.push(':');
            out.push_str(rel_type);
        }
        if let Some((min, max)) = pattern.hops {
            out.push_str(&match max {
                Some(max) => format!("*{min}..{max}"),
                None => format!("*{min}.."),
            });
        }
        if let Some(props) = self.render_props(pattern.props.as_ref(), kind) {
            out.push(' ');
            out.push_str(&props);
        }
        out.push(']');
        out
    }

    /// CREATE takes a whole parameter map; MATCH and MERGE need a literal
    /// map with one parameter per property.
    fn render_props(&mut self, props: Option<&Value>, kind: ClauseKind) -> Option<String> {
        match props? {
            Value::Null => None,
            Value::Object(map) if kind != ClauseKind::Create => {
                if map.is_empty() {
                    return None;
                }
                let entries = map
                    .iter()
                    .map(|(k, v)| {
                        let placeholder = self.bind(v.clone());
                        format!("{}: {placeholder}", escape_key(k))
                    })
                    .collect::<Vec<_>>();
                Some(format!("{{{}}}", entries.join(", ")))
            }
            other => Some(self.bind(other.clone())),
        }
    }

    fn reduce(&mut self, condition: &Condition, negate: bool) -> Option<String> {
        match condition {
            Condition::Raw(text) => {
                let text = text.trim();
                if text.is_empty() {
                    None
                } else if negate {
                    Some(format!("NOT ({text})"))
                } else {
                    Some(text.to_string())
                }
            }
            Condition::Compare { field, op, value } => self.render_compare(field, *op, value, negate),
            // De Morgan: a negated group flips its joiner along with each term.
            Condition::All(items) => {
                self.reduce_group(items, if negate { " OR " } else { " AND " }, negate)
            }
            Condition::Any(items) => {
                self.reduce_group(items, if negate { " AND " } else { " OR " }, negate)
            }
            Condition::Not(inner) => self.reduce(inner, !negate),
        }
    }

    fn reduce_group(&mut self, items: &[Condition], joiner: &str, negate: bool) -> Option<String> {
        let parts: Vec<String> = items
            .iter()
            .filter_map(|c| self.reduce(c, negate))
            .collect();
        match parts.len() {
            0 => None,
            1 => parts.into_iter().next(),
            _ => Some(format!("({})", parts.join(joiner))),
        }
    }

    fn render_compare(&mut self, field: &str, op: Operator, value: &Value, negate: bool) -> Option<String> {
        let (op, wrap) = match (negate, op.inverse()) {
            (true, Some(inverse)) => (inverse, false),
            (true, None) => (op, true),
            (false, _) => (op, false),
        };

        let expr = match (value, op) {
            (Value::Array(_), Operator::Eq) => Some(format!("{field} IN {}", self.bind(value.clone()))),
            (Value::Array(_), Operator::Ne) => {
                Some(format!("{field} NOT IN {}", self.bind(value.clone())))
            }
            (Value::Array(items), _) => {
                let each = items
                    .iter()
                    .map(|v| Condition::compare(field, op, v.clone()))
                    .collect::<Vec<_>>();
                self.reduce_group(&each, " OR ", false)
            }
            (Value::Null, Operator::Eq) => Some(format!("{field} IS NULL")),
            (Value::Null, Operator::Ne) => Some(format!("{field} IS NOT NULL")),
            _ => Some(format!("{field} {} {}", op.symbol(), self.bind(value.clone()))),
        };

        expr.map(|e| if wrap { format!("NOT ({e})") } else { e })
    }
}

fn escape_key(key: &str) -> String {
    let mut chars = key.chars();
    let plain = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        key.to_string()
    } else {
        format!("`{}`", key.replace('`', "``"))
    }
}

/// Column aliases of a RETURN body: the `AS` alias when present, else the
/// bare expression.
fn return_columns(body: &str) -> Vec<String> {
    let body = body.trim_start();
    let body = match body.get(..9) {
        Some(head) if head.eq_ignore_ascii_case("DISTINCT ") => &body[9..],
        _ => body,
    };
    let mut columns = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                columns.push(column_alias(&body[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    columns.push(column_alias(&body[start..]));
    columns.retain(|c| !c.is_empty());
    columns
}

fn column_alias(item: &str) -> String {
    let item = item.trim();
    let upper = item.to_ascii_uppercase();
    let alias = match upper.rfind(" AS ") {
        Some(pos) => item[pos + 4..].trim(),
        None => item,
    };
    alias.trim_matches('`').to_string()
}
