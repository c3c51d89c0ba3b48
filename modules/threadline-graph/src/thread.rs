//! Shapes a linked result set into a `MessageView` tree.
//!
//! Walks up the `IN_REPLY_TO` chain for ancestors and down it for replies,
//! decorating every visited message with its author, metadata and deletion
//! redaction. Traversal is synchronous and bounded by the requested depths.

use std::cmp::Ordering;

use serde_json::Value;
use tracing::warn;

use threadline_common::{
    is_truthy, GraphNode, MessageRecord, MessageView, MetadataRecord, DELETED_BODY,
    DELETED_CONTENT, REDACTED,
};

use crate::link::LinkedGraph;

pub const IN_REPLY_TO: &str = "IN_REPLY_TO";
pub const CREATED_BY: &str = "CREATED_BY";
pub const DELETED_BY: &str = "DELETED_BY";
pub const METADATA_FOR: &str = "METADATA_FOR";

pub const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplySort {
    #[default]
    Oldest,
    Newest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadOptions {
    /// Parent levels to include; 0 leaves `parent` absent.
    pub ancestor_depth: u32,
    /// Reply levels to include; 0 leaves `replies` absent.
    pub descendant_depth: u32,
    /// Order of the root's direct replies.
    pub sort: ReplySort,
    pub limit: usize,
    pub skip: usize,
}

impl Default for ThreadOptions {
    fn default() -> Self {
        Self {
            ancestor_depth: 0,
            descendant_depth: 0,
            sort: ReplySort::Oldest,
            limit: DEFAULT_LIMIT,
            skip: 0,
        }
    }
}

/// Aggregates for the root, counted by the fetch itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadCounts {
    /// Number of ancestors.
    pub level: u64,
    /// Number of direct replies, deleted or not.
    pub reply_count: u64,
}

/// Build the view rooted at node `root`.
pub fn assemble(
    graph: &LinkedGraph,
    root: usize,
    options: &ThreadOptions,
    counts: ThreadCounts,
) -> MessageView {
    let mut view = decorate(graph, root);
    view.level = counts.level;
    view.reply_count = counts.reply_count;

    if options.ancestor_depth > 0 {
        view.parent = ancestors(graph, root, options.ancestor_depth, counts.level);
    }

    if options.descendant_depth > 0 {
        let mut direct = descendants(graph, root, options.descendant_depth, counts.level + 1);
        if options.sort == ReplySort::Newest {
            direct.reverse();
        }
        view.replies = Some(
            direct
                .into_iter()
                .skip(options.skip)
                .take(options.limit)
                .collect(),
        );
    }

    view
}

/// Message properties plus author, metadata and redaction.
pub fn decorate(graph: &LinkedGraph, idx: usize) -> MessageView {
    let linked = graph.node(idx);
    let mut view = MessageView::new(MessageRecord::from_properties(&linked.node.properties));

    view.author = related_username(graph, idx, CREATED_BY);
    view.metadata = metadata(graph, idx);
    view.reply_count = graph.incoming(idx, IN_REPLY_TO).count() as u64;

    if view.is_deleted() {
        view.message.body = DELETED_BODY.to_string();
        view.message.content = DELETED_CONTENT.to_string();
        view.author = Some(REDACTED.to_string());
        view.deleted_by = related_username(graph, idx, DELETED_BY);
    }

    view
}

/// Username at the end of the first `rel_type` edge, redacted when that
/// user is deleted.
fn related_username(graph: &LinkedGraph, idx: usize, rel_type: &str) -> Option<String> {
    let user = graph.outgoing(idx, rel_type).find_map(|r| r.end)?;
    let user = &graph.node(user).node;
    if is_truthy(user.prop("deleted")) {
        return Some(REDACTED.to_string());
    }
    user.str_prop("username").map(str::to_string)
}

fn metadata(graph: &LinkedGraph, idx: usize) -> Vec<MetadataRecord> {
    let mut entries: Vec<(i64, MetadataRecord)> = graph
        .incoming(idx, METADATA_FOR)
        .filter_map(|r| r.start)
        .map(|m| {
            let node = &graph.node(m).node;
            let index = node.prop("index").and_then(Value::as_i64).unwrap_or(i64::MAX);
            (index, metadata_record(node))
        })
        .collect();
    entries.sort_by_key(|(index, _)| *index);
    entries.into_iter().map(|(_, record)| record).collect()
}

/// Decode a `:Metadata` node. Values flagged `json` are parsed back into
/// their structured form.
pub(crate) fn metadata_record(node: &GraphNode) -> MetadataRecord {
    let raw = node.prop("value").cloned().unwrap_or(Value::Null);
    let value = match (&raw, node.prop("json").and_then(Value::as_bool)) {
        (Value::String(encoded), Some(true)) => serde_json::from_str(encoded).unwrap_or_else(|e| {
            warn!(error = %e, "Metadata flagged as JSON failed to decode; keeping raw value");
            raw.clone()
        }),
        _ => raw.clone(),
    };
    MetadataRecord {
        kind: node.str_prop("type").unwrap_or_default().to_string(),
        value,
        create_time: node.str_prop("create_time").map(str::to_string),
    }
}

fn ancestors(graph: &LinkedGraph, idx: usize, depth: u32, root_level: u64) -> Option<Box<MessageView>> {
    let mut chain = Vec::new();
    let mut current = idx;
    for step in 1..=u64::from(depth) {
        let Some(parent) = graph.outgoing(current, IN_REPLY_TO).find_map(|r| r.end) else {
            break;
        };
        let mut view = decorate(graph, parent);
        view.level = root_level.saturating_sub(step);
        chain.push(view);
        current = parent;
    }

    chain.into_iter().rev().fold(None, |above, mut view| {
        view.parent = above;
        Some(Box::new(view))
    })
}

/// Replies to `idx`, oldest first, with deleted leaves pruned.
fn descendants(graph: &LinkedGraph, idx: usize, depth: u32, level: u64) -> Vec<MessageView> {
    let mut children: Vec<MessageView> = graph
        .incoming(idx, IN_REPLY_TO)
        .filter_map(|r| r.start)
        .filter_map(|child| {
            let mut view = decorate(graph, child);
            view.level = level;
            let replies = if depth > 1 {
                descendants(graph, child, depth - 1, level + 1)
            } else {
                Vec::new()
            };
            if view.is_deleted() && replies.is_empty() {
                return None;
            }
            view.replies = Some(replies);
            Some(view)
        })
        .collect();

    children.sort_by(oldest_first);
    children
}

// `create_time` strings order chronologically only because every write uses
// RFC 3339 UTC with fixed millisecond precision (see `messages::timestamp`).
fn oldest_first(a: &MessageView, b: &MessageView) -> Ordering {
    a.message
        .create_time
        .cmp(&b.message.create_time)
        .then_with(|| a.id().cmp(b.id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::fixtures::*;
    use serde_json::json;
    use threadline_common::{GraphValue, Identity, Row};

    const ALICE: i64 = 1;
    const BOB: i64 = 2;

    fn users() -> Vec<GraphValue> {
        vec![
            node(ALICE, "User", json!({ "username": "alice", "deleted": false })),
            node(BOB, "User", json!({ "username": "bob$xyz", "deleted": "2024-03-01T00:00:00.000Z" })),
        ]
    }

    fn deleted_message(id: i64, msg_id: &str, create_time: &str) -> GraphValue {
        let GraphValue::Node(mut n) = message(id, msg_id, create_time) else {
            unreachable!()
        };
        n.properties
            .insert("deleted".into(), json!("2024-02-01T00:00:00.000Z"));
        GraphValue::Node(n)
    }

    /// One row holding every value, as the real fetch does after linking.
    fn rows(values: Vec<GraphValue>) -> Vec<Row> {
        vec![values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (format!("c{i}"), v))
            .collect()]
    }

    fn root_of(graph: &LinkedGraph, id: i64) -> usize {
        graph.find_node(Identity(id)).unwrap()
    }

    fn reply_ids(view: &MessageView) -> Vec<&str> {
        view.replies
            .as_ref()
            .map(|r| r.iter().map(MessageView::id).collect())
            .unwrap_or_default()
    }

    #[test]
    fn author_and_metadata_are_attached() {
        let mut values = users();
        values.extend([
            message(10, "m1", "2024-01-01T00:00:00.000Z"),
            rel(100, CREATED_BY, 10, ALICE, json!({})),
            node(20, "Metadata", json!({ "type": "tags", "value": "[\"a\",\"b\"]", "json": true, "index": 1 })),
            node(21, "Metadata", json!({ "type": "mood", "value": "calm", "json": false, "index": 0 })),
            rel(101, METADATA_FOR, 20, 10, json!({})),
            rel(102, METADATA_FOR, 21, 10, json!({})),
        ]);
        let graph = LinkedGraph::link(&rows(values));

        let view = assemble(&graph, root_of(&graph, 10), &ThreadOptions::default(), ThreadCounts::default());
        assert_eq!(view.author.as_deref(), Some("alice"));
        assert_eq!(view.metadata.len(), 2);
        assert_eq!(view.metadata[0].kind, "mood");
        assert_eq!(view.metadata[0].value, json!("calm"));
        assert_eq!(view.metadata[1].value, json!(["a", "b"]));
    }

    #[test]
    fn missing_author_is_none() {
        let graph = LinkedGraph::link(&rows(vec![message(10, "m1", "2024-01-01T00:00:00.000Z")]));
        let view = assemble(&graph, 0, &ThreadOptions::default(), ThreadCounts::default());
        assert_eq!(view.author, None);
    }

    #[test]
    fn deleted_message_is_redacted_with_deleter() {
        let mut values = users();
        values.extend([
            deleted_message(10, "m1", "2024-01-01T00:00:00.000Z"),
            rel(100, CREATED_BY, 10, ALICE, json!({})),
            rel(101, DELETED_BY, 10, ALICE, json!({ "time": "2024-02-01T00:00:00.000Z" })),
        ]);
        let graph = LinkedGraph::link(&rows(values));

        let view = assemble(&graph, root_of(&graph, 10), &ThreadOptions::default(), ThreadCounts::default());
        assert_eq!(view.message.body, DELETED_BODY);
        assert_eq!(view.message.content, DELETED_CONTENT);
        assert_eq!(view.author.as_deref(), Some(REDACTED));
        assert_eq!(view.deleted_by.as_deref(), Some("alice"));
        assert!(view.is_deleted());
    }

    #[test]
    fn deleted_author_is_redacted_on_live_message() {
        let mut values = users();
        values.extend([
            message(10, "m1", "2024-01-01T00:00:00.000Z"),
            rel(100, CREATED_BY, 10, BOB, json!({})),
        ]);
        let graph = LinkedGraph::link(&rows(values));
        let view = assemble(&graph, root_of(&graph, 10), &ThreadOptions::default(), ThreadCounts::default());
        assert_eq!(view.author.as_deref(), Some(REDACTED));
        assert_eq!(view.message.body, "body of m1");
    }

    #[test]
    fn zero_depths_leave_tree_absent_but_keep_counts() {
        let values = vec![
            message(10, "m1", "2024-01-01T00:00:00.000Z"),
            message(11, "m2", "2024-01-02T00:00:00.000Z"),
            rel(200, IN_REPLY_TO, 11, 10, json!({})),
        ];
        let graph = LinkedGraph::link(&rows(values));
        let counts = ThreadCounts { level: 3, reply_count: 5 };

        let view = assemble(&graph, root_of(&graph, 10), &ThreadOptions::default(), counts);
        assert!(view.parent.is_none());
        assert!(view.replies.is_none());
        assert_eq!(view.level, 3);
        assert_eq!(view.reply_count, 5);
    }

    #[test]
    fn deleted_leaf_is_pruned_but_deleted_branch_is_kept() {
        let values = vec![
            message(10, "root", "2024-01-01T00:00:00.000Z"),
            deleted_message(11, "leaf", "2024-01-02T00:00:00.000Z"),
            deleted_message(12, "branch", "2024-01-03T00:00:00.000Z"),
            message(13, "grandchild", "2024-01-04T00:00:00.000Z"),
            rel(200, IN_REPLY_TO, 11, 10, json!({})),
            rel(201, IN_REPLY_TO, 12, 10, json!({})),
            rel(202, IN_REPLY_TO, 13, 12, json!({})),
        ];
        let graph = LinkedGraph::link(&rows(values));
        let options = ThreadOptions {
            descendant_depth: 2,
            ..ThreadOptions::default()
        };

        let view = assemble(&graph, root_of(&graph, 10), &options, ThreadCounts { level: 0, reply_count: 2 });
        assert_eq!(reply_ids(&view), vec!["branch"]);

        let branch = &view.replies.as_ref().unwrap()[0];
        assert_eq!(branch.message.body, DELETED_BODY);
        assert_eq!(branch.level, 1);
        assert_eq!(branch.reply_count, 1);
        assert_eq!(reply_ids(branch), vec!["grandchild"]);

        let grandchild = &branch.replies.as_ref().unwrap()[0];
        assert_eq!(grandchild.level, 2);
        assert_eq!(grandchild.replies.as_deref(), Some(&[][..]));
        // The root count still includes the pruned leaf.
        assert_eq!(view.reply_count, 2);
    }

    #[test]
    fn boundary_children_count_dangling_replies() {
        let values = vec![
            message(10, "root", "2024-01-01T00:00:00.000Z"),
            message(11, "child", "2024-01-02T00:00:00.000Z"),
            rel(200, IN_REPLY_TO, 11, 10, json!({})),
            // Replies to `child` beyond the window, fetched without their start nodes.
            GraphValue::List(vec![
                rel(201, IN_REPLY_TO, 50, 11, json!({})),
                rel(202, IN_REPLY_TO, 51, 11, json!({})),
            ]),
        ];
        let graph = LinkedGraph::link(&rows(values));
        let options = ThreadOptions {
            descendant_depth: 1,
            ..ThreadOptions::default()
        };

        let view = assemble(&graph, root_of(&graph, 10), &options, ThreadCounts { level: 0, reply_count: 1 });
        let child = &view.replies.as_ref().unwrap()[0];
        assert_eq!(child.reply_count, 2);
        assert_eq!(child.replies.as_deref(), Some(&[][..]));
    }

    #[test]
    fn pagination_applies_to_direct_children_after_pruning() {
        let mut values = vec![message(10, "root", "2024-01-01T00:00:00.000Z")];
        for i in 0..25i64 {
            let id = 100 + i;
            let msg_id = format!("r{i:02}");
            let time = format!("2024-01-02T00:00:{i:02}.000Z");
            values.push(if i == 0 {
                deleted_message(id, &msg_id, &time)
            } else {
                message(id, &msg_id, &time)
            });
            values.push(rel(1000 + i, IN_REPLY_TO, id, 10, json!({})));
        }
        let graph = LinkedGraph::link(&rows(values));
        let root = root_of(&graph, 10);

        let oldest = ThreadOptions {
            descendant_depth: 1,
            limit: 5,
            skip: 2,
            ..ThreadOptions::default()
        };
        let view = assemble(&graph, root, &oldest, ThreadCounts { level: 0, reply_count: 25 });
        assert_eq!(reply_ids(&view), vec!["r03", "r04", "r05", "r06", "r07"]);

        let newest = ThreadOptions {
            sort: ReplySort::Newest,
            skip: 0,
            ..oldest.clone()
        };
        let view = assemble(&graph, root, &newest, ThreadCounts { level: 0, reply_count: 25 });
        assert_eq!(reply_ids(&view), vec!["r24", "r23", "r22", "r21", "r20"]);

        let default_limit = ThreadOptions {
            descendant_depth: 1,
            ..ThreadOptions::default()
        };
        let view = assemble(&graph, root, &default_limit, ThreadCounts::default());
        assert_eq!(view.replies.as_ref().map(Vec::len), Some(DEFAULT_LIMIT));
    }

    #[test]
    fn deeper_levels_are_oldest_first_and_unpaginated() {
        let mut values = vec![
            message(10, "root", "2024-01-01T00:00:00.000Z"),
            message(11, "child", "2024-01-02T00:00:00.000Z"),
            rel(200, IN_REPLY_TO, 11, 10, json!({})),
        ];
        for i in 0..4i64 {
            let id = 20 + i;
            values.push(message(id, &format!("g{i}"), &format!("2024-01-03T00:00:0{}.000Z", 3 - i)));
            values.push(rel(300 + i, IN_REPLY_TO, id, 11, json!({})));
        }
        let graph = LinkedGraph::link(&rows(values));
        let options = ThreadOptions {
            descendant_depth: 2,
            sort: ReplySort::Newest,
            limit: 1,
            ..ThreadOptions::default()
        };

        let view = assemble(&graph, root_of(&graph, 10), &options, ThreadCounts::default());
        let child = &view.replies.as_ref().unwrap()[0];
        assert_eq!(reply_ids(child), vec!["g3", "g2", "g1", "g0"]);
    }

    #[test]
    fn ancestor_chain_is_bounded_and_levelled() {
        let mut values = users();
        values.extend([
            message(10, "a", "2024-01-01T00:00:00.000Z"),
            message(11, "b", "2024-01-02T00:00:00.000Z"),
            deleted_message(12, "c", "2024-01-03T00:00:00.000Z"),
            message(13, "d", "2024-01-04T00:00:00.000Z"),
            rel(200, IN_REPLY_TO, 11, 10, json!({})),
            rel(201, IN_REPLY_TO, 12, 11, json!({})),
            rel(202, IN_REPLY_TO, 13, 12, json!({})),
            rel(203, CREATED_BY, 12, ALICE, json!({})),
        ]);
        let graph = LinkedGraph::link(&rows(values));
        let options = ThreadOptions {
            ancestor_depth: 2,
            ..ThreadOptions::default()
        };

        let view = assemble(&graph, root_of(&graph, 13), &options, ThreadCounts { level: 3, reply_count: 0 });
        let parent = view.parent.as_ref().unwrap();
        assert_eq!(parent.id(), "c");
        assert_eq!(parent.level, 2);
        assert_eq!(parent.author.as_deref(), Some(REDACTED));
        assert_eq!(parent.message.body, DELETED_BODY);

        let grandparent = parent.parent.as_ref().unwrap();
        assert_eq!(grandparent.id(), "b");
        assert_eq!(grandparent.level, 1);
        assert!(grandparent.parent.is_none());
    }

    #[test]
    fn topic_with_ancestors_requested_has_no_parent() {
        let graph = LinkedGraph::link(&rows(vec![message(10, "a", "2024-01-01T00:00:00.000Z")]));
        let options = ThreadOptions {
            ancestor_depth: 5,
            ..ThreadOptions::default()
        };
        let view = assemble(&graph, 0, &options, ThreadCounts::default());
        assert!(view.parent.is_none());
    }

    #[test]
    fn undecodable_json_metadata_keeps_raw_value() {
        let GraphValue::Node(n) = node(1, "Metadata", json!({ "type": "x", "value": "{not json", "json": true })) else {
            unreachable!()
        };
        let record = metadata_record(&n);
        assert_eq!(record.kind, "x");
        assert_eq!(record.value, json!("{not json"));
    }
}
