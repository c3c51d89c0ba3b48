//! Turns flat result rows into a navigable graph.
//!
//! Query results repeat the same node once per row it participates in. The
//! linker deduplicates nodes and relationships by database identity and
//! wires every relationship to its endpoints, so callers can walk
//! `edges_to` / `edges_from` instead of re-querying.

use std::collections::HashMap;

use serde_json::Value;

use threadline_common::{GraphNode, GraphRelationship, GraphValue, Identity, Row};

/// A node plus the relationships touching it, as indices into the arena.
#[derive(Debug, Clone)]
pub struct LinkedNode {
    pub node: GraphNode,
    /// Column the node was first seen in.
    pub column: String,
    /// Relationships starting at this node.
    pub edges_to: Vec<usize>,
    /// Relationships ending at this node.
    pub edges_from: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct LinkedRelationship {
    pub relationship: GraphRelationship,
    /// Start node, when it appears in the result set.
    pub start: Option<usize>,
    /// End node, when it appears in the result set.
    pub end: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct LinkedGraph {
    nodes: Vec<LinkedNode>,
    relationships: Vec<LinkedRelationship>,
    registry: HashMap<String, usize>,
    rel_registry: HashMap<String, usize>,
}

fn node_key(identity: Identity) -> String {
    format!("node/{identity}")
}

fn rel_key(identity: Identity) -> String {
    format!("rel/{identity}")
}

impl LinkedGraph {
    /// Link every node and relationship found in `rows`. Nodes are registered
    /// first so relationship order within a row does not matter.
    pub fn link(rows: &[Row]) -> Self {
        let mut graph = Self::default();

        for row in rows {
            for (column, value) in row.iter() {
                graph.register_nodes(column, value);
            }
        }
        for row in rows {
            for (_, value) in row.iter() {
                graph.register_relationships(value);
            }
        }

        graph
    }

    fn register_nodes(&mut self, column: &str, value: &GraphValue) {
        match value {
            GraphValue::Node(node) => {
                let key = node_key(node.identity);
                if self.registry.contains_key(&key) {
                    return;
                }
                self.registry.insert(key, self.nodes.len());
                self.nodes.push(LinkedNode {
                    node: node.clone(),
                    column: column.to_string(),
                    edges_to: Vec::new(),
                    edges_from: Vec::new(),
                });
            }
            GraphValue::List(items) => {
                for item in items {
                    self.register_nodes(column, item);
                }
            }
            GraphValue::Relationship(_) | GraphValue::Scalar(_) => {}
        }
    }

    fn register_relationships(&mut self, value: &GraphValue) {
        match value {
            GraphValue::Relationship(rel) => self.attach(rel),
            GraphValue::List(items) => {
                for item in items {
                    self.register_relationships(item);
                }
            }
            GraphValue::Node(_) | GraphValue::Scalar(_) => {}
        }
    }

    fn attach(&mut self, rel: &GraphRelationship) {
        let key = rel_key(rel.identity);
        if let Some(&existing) = self.rel_registry.get(&key) {
            // Seen before; only fill in edges still missing.
            let (start, end) = {
                let linked = &self.relationships[existing];
                (linked.start, linked.end)
            };
            self.wire(existing, start, end);
            return;
        }

        let start = self.registry.get(&node_key(rel.start)).copied();
        let end = self.registry.get(&node_key(rel.end)).copied();
        let idx = self.relationships.len();
        self.rel_registry.insert(key, idx);
        self.relationships.push(LinkedRelationship {
            relationship: rel.clone(),
            start,
            end,
        });
        self.wire(idx, start, end);
    }

    fn wire(&mut self, rel_idx: usize, start: Option<usize>, end: Option<usize>) {
        if let Some(s) = start {
            let edges = &mut self.nodes[s].edges_to;
            if !edges.contains(&rel_idx) {
                edges.push(rel_idx);
            }
        }
        if let Some(e) = end {
            let edges = &mut self.nodes[e].edges_from;
            if !edges.contains(&rel_idx) {
                edges.push(rel_idx);
            }
        }
    }

    pub fn nodes(&self) -> &[LinkedNode] {
        &self.nodes
    }

    pub fn relationships(&self) -> &[LinkedRelationship] {
        &self.relationships
    }

    pub fn node(&self, idx: usize) -> &LinkedNode {
        &self.nodes[idx]
    }

    pub fn relationship(&self, idx: usize) -> &LinkedRelationship {
        &self.relationships[idx]
    }

    /// Look up by registry key, e.g. `node/42`.
    pub fn node_by_key(&self, key: &str) -> Option<&LinkedNode> {
        self.registry.get(key).map(|&i| &self.nodes[i])
    }

    pub fn find_node(&self, identity: Identity) -> Option<usize> {
        self.registry.get(&node_key(identity)).copied()
    }

    /// First node carrying `label` whose `prop` equals `value`.
    pub fn find_by_property(&self, label: &str, prop: &str, value: &Value) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.node.has_label(label) && n.node.prop(prop) == Some(value))
    }

    /// Relationships of `rel_type` leaving `idx`.
    pub fn outgoing<'a>(
        &'a self,
        idx: usize,
        rel_type: &'a str,
    ) -> impl Iterator<Item = &'a LinkedRelationship> + 'a {
        self.nodes[idx]
            .edges_to
            .iter()
            .map(move |&r| &self.relationships[r])
            .filter(move |r| r.relationship.rel_type == rel_type)
    }

    /// Relationships of `rel_type` arriving at `idx`.
    pub fn incoming<'a>(
        &'a self,
        idx: usize,
        rel_type: &'a str,
    ) -> impl Iterator<Item = &'a LinkedRelationship> + 'a {
        self.nodes[idx]
            .edges_from
            .iter()
            .map(move |&r| &self.relationships[r])
            .filter(move |r| r.relationship.rel_type == rel_type)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::{json, Value};
    use threadline_common::{GraphNode, GraphRelationship, GraphValue, Identity, Properties};

    pub fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => Properties::new(),
        }
    }

    pub fn node(id: i64, label: &str, properties: Value) -> GraphValue {
        GraphValue::Node(GraphNode {
            identity: Identity(id),
            labels: vec![label.to_string()],
            properties: props(properties),
        })
    }

    pub fn rel(id: i64, rel_type: &str, start: i64, end: i64, properties: Value) -> GraphValue {
        GraphValue::Relationship(GraphRelationship {
            identity: Identity(id),
            rel_type: rel_type.to_string(),
            start: Identity(start),
            end: Identity(end),
            properties: props(properties),
        })
    }

    pub fn message(id: i64, msg_id: &str, create_time: &str) -> GraphValue {
        node(
            id,
            "Message",
            json!({
                "id": msg_id,
                "slug": msg_id,
                "body": format!("body of {msg_id}"),
                "content": format!("<p>body of {msg_id}</p>"),
                "deleted": false,
                "create_time": create_time,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn nodes_are_deduplicated_across_rows() {
        let rows = vec![
            Row::new().with("a", node(1, "User", json!({}))).with("b", node(2, "User", json!({}))),
            Row::new().with("a", node(1, "User", json!({}))).with("b", node(3, "User", json!({}))),
        ];
        let graph = LinkedGraph::link(&rows);
        assert_eq!(graph.nodes().len(), 3);
        assert_eq!(graph.node_by_key("node/1").map(|n| n.column.as_str()), Some("a"));
    }

    #[test]
    fn relationships_wire_both_endpoints_once() {
        let follows = rel(10, "FOLLOWS", 1, 2, json!({}));
        let rows = vec![
            Row::new()
                .with("r", follows.clone())
                .with("a", node(1, "User", json!({})))
                .with("b", node(2, "User", json!({}))),
            Row::new()
                .with("a", node(1, "User", json!({})))
                .with("r", follows.clone())
                .with("b", node(2, "User", json!({}))),
            Row::new().with("rs", GraphValue::List(vec![follows.clone(), follows])),
        ];
        let graph = LinkedGraph::link(&rows);

        let a = graph.find_node(Identity(1)).unwrap();
        let b = graph.find_node(Identity(2)).unwrap();
        assert_eq!(graph.relationships().len(), 1);
        assert_eq!(graph.node(a).edges_to, vec![0]);
        assert!(graph.node(a).edges_from.is_empty());
        assert_eq!(graph.node(b).edges_from, vec![0]);
        assert_eq!(graph.outgoing(a, "FOLLOWS").count(), 1);
        assert_eq!(graph.incoming(b, "FOLLOWS").count(), 1);
        assert_eq!(graph.incoming(b, "LIKES").count(), 0);
    }

    #[test]
    fn dangling_relationship_attaches_to_the_endpoint_present() {
        let rows = vec![Row::new()
            .with("m", message(1, "m1", "2024-01-01T00:00:00.000Z"))
            .with("replies", GraphValue::List(vec![rel(20, "IN_REPLY_TO", 99, 1, json!({}))]))];
        let graph = LinkedGraph::link(&rows);

        let m = graph.find_node(Identity(1)).unwrap();
        assert_eq!(graph.node(m).edges_from.len(), 1);
        let linked = graph.relationship(0);
        assert_eq!(linked.start, None);
        assert_eq!(linked.end, Some(m));
    }

    #[test]
    fn nulls_and_scalars_are_ignored() {
        let rows = vec![Row::new()
            .with("x", GraphValue::null())
            .with("n", GraphValue::Scalar(json!(3)))
            .with("list", GraphValue::List(vec![GraphValue::null()]))];
        let graph = LinkedGraph::link(&rows);
        assert!(graph.nodes().is_empty());
        assert!(graph.relationships().is_empty());
    }

    #[test]
    fn find_by_property_matches_label_and_value() {
        let rows = vec![Row::new()
            .with("u", node(1, "User", json!({ "id": "x" })))
            .with("m", message(2, "x", "2024-01-01T00:00:00.000Z"))];
        let graph = LinkedGraph::link(&rows);
        assert_eq!(graph.find_by_property("Message", "id", &json!("x")), Some(1));
        assert_eq!(graph.find_by_property("Message", "id", &json!("y")), None);
    }

    #[test]
    fn linking_twice_is_stable() {
        let rows = vec![Row::new()
            .with("a", node(1, "User", json!({})))
            .with("b", node(2, "User", json!({})))
            .with("r", rel(3, "KNOWS", 1, 2, json!({})))];
        let first = LinkedGraph::link(&rows);
        let second = LinkedGraph::link(&rows);
        assert_eq!(first.nodes().len(), second.nodes().len());
        assert_eq!(first.node(0).edges_to, second.node(0).edges_to);
    }
}
