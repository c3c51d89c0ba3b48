use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{is_truthy, Properties};

/// Body shown in place of a deleted message's markdown.
pub const DELETED_BODY: &str = "_[deleted]_";
/// Rendered content shown in place of a deleted message's HTML.
pub const DELETED_CONTENT: &str = "<p><em>[deleted]</em></p>";
/// Shown in place of a username that has been deleted.
pub const REDACTED: &str = "[deleted]";

/// Stored properties of a `:Message` node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub slug: String,
    pub body: String,
    pub content: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub hidden: bool,
    /// Deletion timestamp; serialized as `false` while the message is live.
    #[serde(default, with = "deleted_flag")]
    pub deleted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl MessageRecord {
    /// Lenient projection of a node's property map; missing fields default.
    pub fn from_properties(props: &Properties) -> Self {
        Self {
            id: string_prop(props, "id"),
            slug: string_prop(props, "slug"),
            body: string_prop(props, "body"),
            content: string_prop(props, "content"),
            private: props.get("private").and_then(Value::as_bool).unwrap_or(false),
            hidden: props.get("hidden").and_then(Value::as_bool).unwrap_or(false),
            deleted: timestamp_flag(props.get("deleted")),
            create_time: props.get("create_time").and_then(Value::as_str).map(str::to_string),
            update_time: props.get("update_time").and_then(Value::as_str).map(str::to_string),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }
}

/// A decoded `:Metadata` node attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
}

/// Caller-supplied metadata entry for `update_metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataInput {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Value,
}

impl MetadataInput {
    pub fn new(kind: impl Into<String>, value: Value) -> Self {
        Self {
            kind: kind.into(),
            value,
        }
    }
}

/// Denormalized message projection returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: MessageRecord,
    pub author: Option<String>,
    #[serde(rename = "deletedBy", skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    pub level: u64,
    #[serde(rename = "replyCount")]
    pub reply_count: u64,
    pub metadata: Vec<MetadataRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<MessageView>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replies: Option<Vec<MessageView>>,
}

impl MessageView {
    pub fn new(message: MessageRecord) -> Self {
        Self {
            message,
            author: None,
            deleted_by: None,
            level: 0,
            reply_count: 0,
            metadata: Vec::new(),
            parent: None,
            replies: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.message.id
    }

    pub fn is_deleted(&self) -> bool {
        self.message.is_deleted()
    }
}

/// Stored properties of a `:User` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserView {
    pub username: String,
    pub displayname: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, with = "deleted_flag")]
    pub deleted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
}

impl UserView {
    pub fn from_properties(props: &Properties) -> Self {
        let username = string_prop(props, "username");
        let displayname = props
            .get("displayname")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| username.clone());
        Self {
            username,
            displayname,
            email: props
                .get("email")
                .and_then(Value::as_str)
                .filter(|e| !e.is_empty())
                .map(str::to_string),
            deleted: timestamp_flag(props.get("deleted")),
            create_time: props.get("create_time").and_then(Value::as_str).map(str::to_string),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }
}

fn string_prop(props: &Properties, key: &str) -> String {
    props
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// `false` / null → `None`; a timestamp (or any other truthy value) → `Some`.
fn timestamp_flag(value: Option<&Value>) -> Option<String> {
    if !is_truthy(value) {
        return None;
    }
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
        None => None,
    }
}

mod deleted_flag {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => s.serialize_str(ts),
            None => s.serialize_bool(false),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(super::timestamp_flag(Some(&value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => Properties::new(),
        }
    }

    #[test]
    fn live_message_serializes_deleted_as_false() {
        let record = MessageRecord::from_properties(&props(json!({
            "id": "abc",
            "slug": "abc",
            "body": "Hello",
            "content": "Hello",
            "deleted": false,
        })));
        assert!(!record.is_deleted());

        let view = MessageView::new(record);
        let out = serde_json::to_value(&view).unwrap();
        assert_eq!(out["deleted"], json!(false));
        assert_eq!(out["replyCount"], json!(0));
        assert!(out.get("replies").is_none());
        assert!(out.get("parent").is_none());
    }

    #[test]
    fn deleted_timestamp_survives_projection() {
        let record = MessageRecord::from_properties(&props(json!({
            "id": "abc",
            "deleted": "2024-02-01T10:00:00.000Z",
        })));
        assert_eq!(record.deleted.as_deref(), Some("2024-02-01T10:00:00.000Z"));
    }

    #[test]
    fn user_email_false_is_absent() {
        let user = UserView::from_properties(&props(json!({
            "username": "alice",
            "email": false,
            "deleted": false,
        })));
        assert_eq!(user.displayname, "alice");
        assert_eq!(user.email, None);
        assert!(!user.is_deleted());
    }
}
