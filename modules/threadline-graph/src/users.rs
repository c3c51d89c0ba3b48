use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use threadline_common::{GraphValue, ThreadlineError, UserView};

use crate::cypher::{node, rel, Cypher, NodePattern};
use crate::messages::{first_node, timestamp};
use crate::session::Database;

const LOGIN_WITH: &str = "LOGIN_WITH";

/// Optional profile fields for [`UserStore::create_with_password`].
#[derive(Debug, Clone, Default)]
pub struct UserOptions {
    pub displayname: Option<String>,
    pub email: Option<String>,
}

/// One-way password hashing. Implementations are CPU-bound; the store
/// calls them on the blocking pool.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, ThreadlineError>;
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// bcrypt with a random per-hash salt.
#[derive(Debug, Clone)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub const DEFAULT_COST: u32 = 10;

    /// `cost` is clamped to the range bcrypt accepts.
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.clamp(4, 31),
        }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_COST)
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, password: &str) -> Result<String, ThreadlineError> {
        bcrypt::hash(password, self.cost).map_err(|e| ThreadlineError::Password(e.to_string()))
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        bcrypt::verify(password, hash).unwrap_or_else(|e| {
            warn!(error = %e, "Stored password hash is unreadable");
            false
        })
    }
}

/// Reads and writes `:User` nodes and their `:Password` logins.
#[derive(Clone)]
pub struct UserStore {
    db: Database,
    hasher: Arc<dyn PasswordHasher>,
}

impl UserStore {
    pub fn new(db: Database, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { db, hasher }
    }

    async fn hash(&self, password: &str) -> Result<String, ThreadlineError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| ThreadlineError::Password(e.to_string()))?
    }

    async fn verify(&self, password: &str, hash: &str) -> Result<bool, ThreadlineError> {
        let hasher = self.hasher.clone();
        let (password, hash) = (password.to_string(), hash.to_string());
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| ThreadlineError::Password(e.to_string()))
    }

    /// A live (not deleted) user.
    pub async fn get(&self, username: &str) -> Result<Option<UserView>, ThreadlineError> {
        let stmt = Cypher::new()
            .match_()
            .node(live_user("u", username))
            .return_("u")
            .compile();

        let rows = self.db.run(&stmt).await?;
        Ok(first_node(&rows, "u").map(|n| UserView::from_properties(&n.properties)))
    }

    pub async fn create_with_password(
        &self,
        username: &str,
        password: &str,
        options: UserOptions,
    ) -> Result<Option<UserView>, ThreadlineError> {
        if username.is_empty() || password.is_empty() {
            return Err(ThreadlineError::InvalidInput(
                "a user needs a username and password".to_string(),
            ));
        }

        let hash = self.hash(password).await?;
        let user = json!({
            "username": username,
            "displayname": options.displayname.unwrap_or_else(|| username.to_string()),
            // Neo4j drops null properties, so an absent email is stored as false.
            "email": options.email.map(Value::String).unwrap_or(Value::Bool(false)),
            "deleted": false,
            "create_time": timestamp(),
        });

        let stmt = Cypher::new()
            .create()
            .node(node("u").label("User").props(user))
            .node(node("p").label("Password").props(json!({ "hash": hash })))
            .connect("u", rel(LOGIN_WITH), "p")
            .return_("u")
            .compile();

        let results = self.db.run_in_transaction(&[stmt]).await?;
        let rows = results.into_iter().next().unwrap_or_default();
        let created = first_node(&rows, "u").map(|n| UserView::from_properties(&n.properties));
        if created.is_some() {
            info!(username, "User created");
        }
        Ok(created)
    }

    pub async fn validate_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, ThreadlineError> {
        let stmt = Cypher::new()
            .match_()
            .node(live_user("u", username))
            .connect_right("u", rel(LOGIN_WITH), node("p").label("Password"))
            .return_("u.username AS username, p.hash AS hash")
            .compile();

        let rows = self.db.run(&stmt).await?;
        let Some(row) = rows.first() else {
            return Ok(false);
        };
        if row.get("username").and_then(GraphValue::as_str) != Some(username) {
            return Ok(false);
        }
        match row.get("hash").and_then(GraphValue::as_str) {
            Some(hash) => self.verify(password, hash).await,
            None => Ok(false),
        }
    }

    /// Set a new password, creating the login if the user has none.
    /// Returns whether a live user was found.
    pub async fn change_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, ThreadlineError> {
        if password.is_empty() {
            return Err(ThreadlineError::InvalidInput("password must not be empty".to_string()));
        }

        let mut q = Cypher::new();
        let hash = q.bind(self.hash(password).await?);
        q.match_()
            .node(live_user("u", username))
            .merge()
            .connect_right("u", rel(LOGIN_WITH), node("p").label("Password"))
            .on_create_set(&format!("p.hash = {hash}"))
            .on_match_set(&format!("p.hash = {hash}"))
            .return_("u.username AS username");

        let results = self.db.run_in_transaction(&[q.compile()]).await?;
        let changed = results.first().is_some_and(|rows| !rows.is_empty());
        if changed {
            info!(username, "Password changed");
        } else {
            warn!(username, "Password change for unknown user");
        }
        Ok(changed)
    }

    /// Soft-delete a user: stamp `deleted`, rename to `<name>$<suffix>` so the
    /// name can be reused, and purge their logins.
    pub async fn delete(&self, username: &str) -> Result<Option<UserView>, ThreadlineError> {
        let replacement = format!("{username}${}", &Uuid::new_v4().simple().to_string()[..3]);

        let mut q = Cypher::new();
        q.match_()
            .node(node("u").label("User").props(json!({ "username": username })))
            .optional_match()
            .connect_right("u", rel(LOGIN_WITH), node("p").label("Password"));
        let deleted = q.bind(timestamp());
        let renamed = q.bind(replacement.as_str());
        q.set(&format!("u.deleted = {deleted}, u.username = {renamed}"))
            .detach_delete("p")
            .return_("u");

        let results = self.db.run_in_transaction(&[q.compile()]).await?;
        let rows = results.into_iter().next().unwrap_or_default();
        let user = first_node(&rows, "u").map(|n| UserView::from_properties(&n.properties));
        if user.is_some() {
            info!(username, replacement = replacement.as_str(), "User deleted");
        }
        Ok(user)
    }
}

fn live_user(alias: &str, username: &str) -> NodePattern {
    node(alias)
        .label("User")
        .props(json!({ "username": username, "deleted": false }))
}
