use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use threadline_common::{
    GraphNode, GraphValue, MessageRecord, MessageView, MetadataInput, MetadataRecord, Row,
    ThreadlineError,
};

use crate::cypher::{node, rel, Condition, Cypher, Statement};
use crate::link::LinkedGraph;
use crate::render::ContentRenderer;
use crate::session::Database;
use crate::thread::{
    assemble, decorate, metadata_record, ThreadCounts, ThreadOptions, CREATED_BY, DELETED_BY,
    IN_REPLY_TO, METADATA_FOR,
};

pub const MESSAGE_ID_LENGTH: usize = 10;

/// Input for [`MessageStore::create`].
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub username: String,
    pub body: String,
    /// Rendered from `body` when absent.
    pub content: Option<String>,
    /// Defaults to the generated id.
    pub slug: Option<String>,
    /// Parent message id; `None` creates a topic.
    pub in_reply_to: Option<String>,
    pub private: bool,
    pub hidden: bool,
}

/// Reads and writes `:Message` nodes and their threads.
#[derive(Clone)]
pub struct MessageStore {
    db: Database,
    renderer: Arc<dyn ContentRenderer>,
}

impl MessageStore {
    pub fn new(db: Database, renderer: Arc<dyn ContentRenderer>) -> Self {
        Self { db, renderer }
    }

    /// Fetch a message with its thread context. All queries run on one
    /// transaction so the linked rows come from a single snapshot.
    pub async fn get_by_id(
        &self,
        id: &str,
        options: &ThreadOptions,
    ) -> Result<Option<MessageView>, ThreadlineError> {
        let mut statements = vec![main_query(id)];
        if options.descendant_depth > 0 {
            statements.push(descendant_query(id, options.descendant_depth));
        }
        if options.ancestor_depth > 0 {
            statements.push(ancestor_query(id, options.ancestor_depth));
        }

        let results = self.db.run_in_transaction(&statements).await?;
        let counts = match results.first().and_then(|rows| rows.first()) {
            Some(row) => ThreadCounts {
                level: count_column(row, "parentCount"),
                reply_count: count_column(row, "childCount"),
            },
            None => return Ok(None),
        };

        let rows: Vec<Row> = results.into_iter().flatten().collect();
        let graph = LinkedGraph::link(&rows);
        let Some(root) = graph.find_by_property("Message", "id", &Value::from(id)) else {
            return Ok(None);
        };

        debug!(id, rows = rows.len(), nodes = graph.nodes().len(), "Thread linked");
        Ok(Some(assemble(&graph, root, options, counts)))
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<MessageRecord>, ThreadlineError> {
        let stmt = Cypher::new()
            .match_()
            .node(node("m").label("Message").props(json!({ "slug": slug })))
            .return_("m")
            .limit(1)
            .compile();

        let rows = self.db.run(&stmt).await?;
        Ok(first_node(&rows, "m").map(|n| MessageRecord::from_properties(&n.properties)))
    }

    /// Create a topic, or a reply when `in_reply_to` is set. Returns `None`
    /// when the author or parent does not exist.
    pub async fn create(&self, new: NewMessage) -> Result<Option<MessageView>, ThreadlineError> {
        if new.username.is_empty() || new.body.is_empty() {
            return Err(ThreadlineError::InvalidInput(
                "a message needs a username and body".to_string(),
            ));
        }

        let content = match &new.content {
            Some(content) => content.clone(),
            None if new.in_reply_to.is_some() => self.renderer.render(&new.body).trim().to_string(),
            None => self.renderer.strip(&new.body).trim().to_string(),
        };

        let id = new_message_id();
        let now = timestamp();
        let properties = json!({
            "id": id,
            "slug": new.slug.clone().unwrap_or_else(|| id.clone()),
            "body": new.body,
            "content": content,
            "private": new.private,
            "hidden": new.hidden,
            "deleted": false,
            "create_time": now,
            "update_time": now,
        });

        let stmt = create_query(&new.username, new.in_reply_to.as_deref(), properties);
        let results = self.db.run_in_transaction(&[stmt]).await?;
        let rows = results.into_iter().next().unwrap_or_default();

        let graph = LinkedGraph::link(&rows);
        let Some(created) = graph.find_by_property("Message", "id", &Value::from(id.as_str())) else {
            return Ok(None);
        };

        let mut view = decorate(&graph, created);
        view.level = rows.first().map(|r| count_column(r, "level")).unwrap_or(0);
        info!(id = view.id(), reply = new.in_reply_to.is_some(), "Message created");
        Ok(Some(view))
    }

    /// Replace all metadata on a message. The delete and the insert commit
    /// together or not at all.
    pub async fn update_metadata(
        &self,
        id: &str,
        metadata: &[MetadataInput],
    ) -> Result<Vec<MetadataRecord>, ThreadlineError> {
        let records = encode_metadata(metadata, &timestamp());

        let delete = Cypher::new()
            .match_()
            .connect_left(
                node("message").label("Message").props(json!({ "id": id })),
                rel(METADATA_FOR),
                node("mdNodes").label("Metadata"),
            )
            .detach_delete("mdNodes")
            .compile();

        let insert = Cypher::new()
            .unwind_value(records, "map")
            .match_()
            .node(node("message").label("Message").props(json!({ "id": id })))
            .create()
            .connect_right(node("mdNodes").label("Metadata"), rel(METADATA_FOR), "message")
            .set("mdNodes = map")
            .return_("mdNodes")
            .order_by("mdNodes.index")
            .compile();

        let results = self.db.run_in_transaction(&[delete, insert]).await?;
        let inserted = results.into_iter().nth(1).unwrap_or_default();

        Ok(inserted
            .iter()
            .filter_map(|row| row.get("mdNodes").and_then(GraphValue::as_node))
            .map(metadata_record)
            .collect())
    }

    /// Soft-delete a message on behalf of `username`. Already deleted
    /// messages are left alone and yield `None`.
    pub async fn delete(
        &self,
        id: &str,
        username: &str,
    ) -> Result<Option<MessageRecord>, ThreadlineError> {
        let now = timestamp();
        let mut q = Cypher::new();
        q.match_()
            .node(node("m").label("Message").props(json!({ "id": id })))
            .node(node("u").label("User").props(json!({ "username": username })))
            .where_(Condition::any([
                Condition::eq("m.deleted", false),
                Condition::eq("m.deleted", Value::Null),
            ]))?;
        let stamp = q.bind(now.as_str());
        q.set(&format!("m.deleted = {stamp}"))
            .create()
            .connect_right("m", rel(DELETED_BY).props(json!({ "time": now })), "u")
            .return_("m");

        let rows = self.db.run(&q.compile()).await?;
        let deleted = first_node(&rows, "m").map(|n| MessageRecord::from_properties(&n.properties));
        if deleted.is_some() {
            info!(id, username, "Message deleted");
        }
        Ok(deleted)
    }
}

fn main_query(id: &str) -> Statement {
    Cypher::new()
        .match_()
        .node(node("message").label("Message").props(json!({ "id": id })))
        .optional_match()
        .connect_right("message", rel(CREATED_BY).alias("rmAuthor"), node("mAuthor").label("User"))
        .optional_match()
        .connect_right("message", rel(DELETED_BY).alias("rmDeletedBy"), node("mDeletedBy").label("User"))
        .optional_match()
        .connect_left("message", rel(METADATA_FOR).alias("rmMetadata"), node("mMetadata").label("Metadata"))
        .optional_match()
        .connect_left("message", rel(IN_REPLY_TO), "child")
        .optional_match()
        .connect_right("message", rel(IN_REPLY_TO).hops(1, None), "parent")
        .return_(
            "message, rmAuthor, mAuthor, rmDeletedBy, mDeletedBy, \
             collect(DISTINCT rmMetadata) AS rmMetadata, collect(DISTINCT mMetadata) AS mMetadata, \
             count(DISTINCT child) AS childCount, count(DISTINCT parent) AS parentCount",
        )
        .compile()
}

/// Every reply within `depth` levels, plus the reply edges hanging off each
/// so boundary messages can report how many replies they have.
fn descendant_query(id: &str, depth: u32) -> Statement {
    Cypher::new()
        .match_()
        .connect_left(
            node("message").label("Message").props(json!({ "id": id })),
            rel(IN_REPLY_TO).alias("rChild").hops(1, Some(depth)),
            node("child").label("Message"),
        )
        .optional_match()
        .connect_right("child", rel(CREATED_BY).alias("rcAuthor"), node("cAuthor").label("User"))
        .optional_match()
        .connect_right("child", rel(DELETED_BY).alias("rcDeletedBy"), node("cDeletedBy").label("User"))
        .optional_match()
        .connect_left("child", rel(METADATA_FOR).alias("rcMetadata"), node("cMetadata").label("Metadata"))
        .optional_match()
        .connect_left("child", rel(IN_REPLY_TO).alias("rcReply"), "")
        .return_(
            "rChild, child, rcAuthor, cAuthor, rcDeletedBy, cDeletedBy, \
             collect(DISTINCT rcMetadata) AS rcMetadata, collect(DISTINCT cMetadata) AS cMetadata, \
             collect(DISTINCT rcReply) AS rcReply",
        )
        .compile()
}

fn ancestor_query(id: &str, depth: u32) -> Statement {
    Cypher::new()
        .match_()
        .connect_right(
            node("message").label("Message").props(json!({ "id": id })),
            rel(IN_REPLY_TO).alias("rParent").hops(1, Some(depth)),
            node("parent").label("Message"),
        )
        .optional_match()
        .connect_right("parent", rel(CREATED_BY).alias("rpAuthor"), node("pAuthor").label("User"))
        .optional_match()
        .connect_right("parent", rel(DELETED_BY).alias("rpDeletedBy"), node("pDeletedBy").label("User"))
        .optional_match()
        .connect_left("parent", rel(METADATA_FOR).alias("rpMetadata"), node("pMetadata").label("Metadata"))
        .optional_match()
        .connect_left("parent", rel(IN_REPLY_TO).alias("rpReply"), "")
        .return_(
            "rParent, parent, rpAuthor, pAuthor, rpDeletedBy, pDeletedBy, \
             collect(DISTINCT rpMetadata) AS rpMetadata, collect(DISTINCT pMetadata) AS pMetadata, \
             collect(DISTINCT rpReply) AS rpReply",
        )
        .compile()
}

fn create_query(username: &str, in_reply_to: Option<&str>, properties: Value) -> Statement {
    let mut q = Cypher::new();
    q.match_()
        .node(node("author").label("User").props(json!({ "username": username })));

    match in_reply_to {
        Some(parent) => {
            q.node(node("parent").label("Message").props(json!({ "id": parent })))
                .create()
                .node(node("message").label("Message").props(properties))
                .connect("message", rel(CREATED_BY).alias("rAuthor"), "author")
                .connect("message", rel(IN_REPLY_TO), "parent")
                .with_("message, rAuthor, author, parent")
                .optional_match()
                .connect_right("parent", rel(IN_REPLY_TO).hops(1, None), "ancestor")
                .return_("message, rAuthor, author, count(ancestor) + 1 AS level");
        }
        None => {
            q.create()
                .node(node("message").label("Message").props(properties))
                .connect("message", rel(CREATED_BY).alias("rAuthor"), "author")
                .return_("message, rAuthor, author, 0 AS level");
        }
    }

    q.compile()
}

/// Shape metadata for storage: index preserves input order, and structured
/// values (objects, arrays, null) are stored as JSON text flagged `json`.
fn encode_metadata(metadata: &[MetadataInput], now: &str) -> Value {
    Value::Array(
        metadata
            .iter()
            .enumerate()
            .map(|(index, md)| {
                let mut record = json!({
                    "type": md.kind,
                    "create_time": now,
                    "index": index,
                });
                match &md.value {
                    Value::Object(_) | Value::Array(_) | Value::Null => {
                        record["value"] = Value::String(md.value.to_string());
                        record["json"] = Value::Bool(true);
                    }
                    scalar => record["value"] = scalar.clone(),
                }
                record
            })
            .collect(),
    )
}

fn new_message_id() -> String {
    Uuid::new_v4().simple().to_string()[..MESSAGE_ID_LENGTH].to_string()
}

pub(crate) fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn first_node<'a>(rows: &'a [Row], column: &str) -> Option<&'a GraphNode> {
    rows.first()?.get(column)?.as_node()
}

fn count_column(row: &Row, column: &str) -> u64 {
    row.get(column)
        .and_then(GraphValue::as_i64)
        .map(|n| n.max(0) as u64)
        .unwrap_or(0)
}
