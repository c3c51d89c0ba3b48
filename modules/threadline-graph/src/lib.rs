pub mod bolt;
pub mod client;
pub mod cypher;
pub mod link;
pub mod messages;
pub mod migrate;
pub mod render;
pub mod session;
pub mod thread;
pub mod users;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use client::GraphClient;
pub use cypher::{node, rel, Condition, Cypher, Direction, Operator, Statement};
pub use link::LinkedGraph;
pub use messages::{MessageStore, NewMessage};
pub use migrate::migrate;
pub use render::{ContentRenderer, MarkdownRenderer};
pub use session::{Database, GraphBackend, Transaction};
pub use thread::{ReplySort, ThreadCounts, ThreadOptions};
pub use users::{PasswordHasher, BcryptHasher, UserOptions, UserStore};
