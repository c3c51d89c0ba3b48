//! Conversions between neo4rs wire values and the driver-neutral row model.

use neo4rs::{
    BoltList, BoltMap, BoltNode, BoltNull, BoltPath, BoltRelation, BoltString, BoltType,
};
use serde_json::{Map, Number, Value};
use tracing::warn;

use threadline_common::{
    GraphNode, GraphRelationship, GraphValue, Identity, Properties, Row, ThreadlineError,
    DRIVER_ERROR_CODE,
};

use crate::cypher::Statement;

/// Build a neo4rs query with every bound parameter attached.
pub(crate) fn to_query(statement: &Statement) -> neo4rs::Query {
    statement
        .params
        .iter()
        .fold(neo4rs::query(&statement.text), |q, (key, value)| {
            q.param(key, to_bolt(value))
        })
}

/// Read the statement's columns out of a driver row. A column the server
/// did not return is logged and comes back as null.
pub(crate) fn to_row(columns: &[String], row: &neo4rs::Row) -> Row {
    columns
        .iter()
        .map(|column| {
            let value = match row.get::<BoltType>(column) {
                Ok(v) => from_bolt(&v),
                Err(e) => {
                    warn!(column = column.as_str(), error = %e, "Result column missing from row");
                    GraphValue::null()
                }
            };
            (column.clone(), value)
        })
        .collect()
}

/// Rows of a statement without declared columns carry no values.
pub(crate) fn warn_undeclared_columns(statement: &Statement, rows: usize) {
    if statement.columns.is_empty() && rows > 0 {
        warn!(
            rows,
            query = statement.text.as_str(),
            "Statement returned rows but declares no columns; values dropped"
        );
    }
}

pub(crate) fn from_bolt(value: &BoltType) -> GraphValue {
    match value {
        BoltType::Node(node) => GraphValue::Node(node_from_bolt(node)),
        BoltType::Relation(rel) => GraphValue::Relationship(relationship_from_bolt(rel)),
        BoltType::List(list) => GraphValue::List(list.value.iter().map(from_bolt).collect()),
        BoltType::Path(path) => GraphValue::List(path_from_bolt(path)),
        other => GraphValue::Scalar(scalar_from_bolt(other)),
    }
}

fn node_from_bolt(node: &BoltNode) -> GraphNode {
    GraphNode {
        identity: Identity(node.id.value),
        labels: node
            .labels
            .value
            .iter()
            .filter_map(|label| match label {
                BoltType::String(s) => Some(s.value.clone()),
                _ => None,
            })
            .collect(),
        properties: properties_from_bolt(&node.properties),
    }
}

fn relationship_from_bolt(rel: &BoltRelation) -> GraphRelationship {
    GraphRelationship {
        identity: Identity(rel.id.value),
        rel_type: rel.typ.value.clone(),
        start: Identity(rel.start_node_id.value),
        end: Identity(rel.end_node_id.value),
        properties: properties_from_bolt(&rel.properties),
    }
}

/// Relationship inside a path, before the index sequence gives it endpoints.
struct PathSegment {
    identity: Identity,
    rel_type: String,
    properties: Properties,
}

fn path_from_bolt(path: &BoltPath) -> Vec<GraphValue> {
    let nodes = path
        .nodes
        .value
        .iter()
        .filter_map(|n| match n {
            BoltType::Node(node) => Some(node_from_bolt(node)),
            _ => None,
        })
        .collect();
    let segments: Vec<PathSegment> = path
        .rels
        .value
        .iter()
        .filter_map(|r| match r {
            BoltType::UnboundedRelation(rel) => Some(PathSegment {
                identity: Identity(rel.id.value),
                rel_type: rel.typ.value.clone(),
                properties: properties_from_bolt(&rel.properties),
            }),
            _ => None,
        })
        .collect();
    let indices: Vec<i64> = path
        .indices
        .value
        .iter()
        .filter_map(|i| match i {
            BoltType::Integer(i) => Some(i.value),
            _ => None,
        })
        .collect();
    flatten_path(nodes, segments, &indices)
}

/// Flatten a path into its nodes followed by its relationships. `indices`
/// alternates a 1-based relationship index, negative when the hop runs
/// against the relationship's direction, and the index of the next node.
fn flatten_path(nodes: Vec<GraphNode>, segments: Vec<PathSegment>, indices: &[i64]) -> Vec<GraphValue> {
    let mut relationships = Vec::new();
    let mut current = 0usize;
    for hop in indices.chunks_exact(2) {
        let (rel_index, node_index) = (hop[0], hop[1]);
        let next = usize::try_from(node_index).ok().filter(|&n| n < nodes.len());
        let segment = usize::try_from(rel_index.unsigned_abs())
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| segments.get(i));
        let (Some(next), Some(segment)) = (next, segment) else {
            warn!(rel_index, node_index, "Path index out of range; truncating path");
            break;
        };
        let (start, end) = if rel_index > 0 { (current, next) } else { (next, current) };
        relationships.push(GraphValue::Relationship(GraphRelationship {
            identity: segment.identity,
            rel_type: segment.rel_type.clone(),
            start: nodes[start].identity,
            end: nodes[end].identity,
            properties: segment.properties.clone(),
        }));
        current = next;
    }

    nodes
        .into_iter()
        .map(GraphValue::Node)
        .chain(relationships)
        .collect()
}

/// Keys are sorted so the same stored entity always projects identically.
fn properties_from_bolt(map: &BoltMap) -> Properties {
    let mut entries: Vec<(&BoltString, &BoltType)> = map.value.iter().collect();
    entries.sort_by(|a, b| a.0.value.cmp(&b.0.value));
    entries
        .into_iter()
        .map(|(k, v)| (k.value.clone(), scalar_from_bolt(v)))
        .collect::<Map<String, Value>>()
}

fn scalar_from_bolt(value: &BoltType) -> Value {
    match value {
        BoltType::Null(_) => Value::Null,
        BoltType::Boolean(b) => Value::Bool(b.value),
        BoltType::Integer(i) => Value::from(i.value),
        BoltType::Float(f) => Number::from_f64(f.value)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        BoltType::String(s) => Value::String(s.value.clone()),
        BoltType::List(list) => Value::Array(list.value.iter().map(scalar_from_bolt).collect()),
        BoltType::Map(map) => Value::Object(properties_from_bolt(map)),
        // Graph entities nested inside scalars keep only their properties.
        BoltType::Node(node) => Value::Object(properties_from_bolt(&node.properties)),
        BoltType::Relation(rel) => Value::Object(properties_from_bolt(&rel.properties)),
        other => Value::String(format!("{other:?}")),
    }
}

pub(crate) fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.into(),
            None => n.as_f64().unwrap_or_default().into(),
        },
        Value::String(s) => s.as_str().into(),
        Value::Array(items) => BoltType::List(BoltList {
            value: items.iter().map(to_bolt).collect(),
        }),
        Value::Object(map) => {
            let mut out = BoltMap::new();
            for (k, v) in map {
                out.put(BoltString::from(k.as_str()), to_bolt(v));
            }
            BoltType::Map(out)
        }
    }
}

/// Fold driver failures into the crate error, keeping the server's status
/// code when there is one.
pub(crate) fn normalize(err: neo4rs::Error) -> ThreadlineError {
    match err {
        neo4rs::Error::Neo4j(e) => ThreadlineError::Query {
            code: e.code().to_string(),
            message: e.message().to_string(),
        },
        other => ThreadlineError::Query {
            code: DRIVER_ERROR_CODE.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo4rs::{BoltBoolean, BoltFloat, BoltInteger};
    use serde_json::json;

    #[test]
    fn json_params_map_onto_bolt_types() {
        assert_eq!(to_bolt(&json!(null)), BoltType::Null(BoltNull));
        assert_eq!(to_bolt(&json!(true)), BoltType::Boolean(BoltBoolean::new(true)));
        assert_eq!(to_bolt(&json!(7)), BoltType::Integer(BoltInteger::new(7)));
        assert_eq!(to_bolt(&json!(1.5)), BoltType::Float(BoltFloat::new(1.5)));

        match to_bolt(&json!(["a", 1])) {
            BoltType::List(list) => assert_eq!(list.value.len(), 2),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn scalars_round_trip_through_bolt() {
        for value in [json!("x"), json!(3), json!(false), json!([1, "two"]), json!({ "a": 1 })] {
            assert_eq!(scalar_from_bolt(&to_bolt(&value)), value);
        }
    }

    fn path_node(id: i64) -> GraphNode {
        GraphNode {
            identity: Identity(id),
            labels: vec!["Message".to_string()],
            properties: Properties::new(),
        }
    }

    fn segment(id: i64) -> PathSegment {
        PathSegment {
            identity: Identity(id),
            rel_type: "IN_REPLY_TO".to_string(),
            properties: Properties::new(),
        }
    }

    fn endpoints(value: &GraphValue) -> (i64, i64) {
        match value {
            GraphValue::Relationship(r) => (r.start.0, r.end.0),
            other => panic!("expected relationship, got {other:?}"),
        }
    }

    #[test]
    fn paths_keep_relationships_oriented_by_index_sequence() {
        // (1)-[10]->(2)<-[11]-(3)
        let flat = flatten_path(
            vec![path_node(1), path_node(2), path_node(3)],
            vec![segment(10), segment(11)],
            &[1, 1, -2, 2],
        );

        assert_eq!(flat.len(), 5);
        assert!(matches!(&flat[0], GraphValue::Node(n) if n.identity == Identity(1)));
        assert_eq!(endpoints(&flat[3]), (1, 2));
        assert_eq!(endpoints(&flat[4]), (3, 2));
    }

    #[test]
    fn out_of_range_path_indices_truncate() {
        let flat = flatten_path(vec![path_node(1), path_node(2)], vec![segment(10)], &[1, 1, 2, 5]);
        assert_eq!(flat.len(), 3);
        assert_eq!(endpoints(&flat[2]), (1, 2));
    }

    #[test]
    fn lists_of_scalars_stay_scalar_lists() {
        let value = from_bolt(&to_bolt(&json!([1, 2])));
        match value {
            GraphValue::List(items) => {
                assert_eq!(items, vec![GraphValue::Scalar(json!(1)), GraphValue::Scalar(json!(2))])
            }
            other => panic!("expected list, got {other:?}"),
        }
    }
}
