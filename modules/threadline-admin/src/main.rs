//! Operator CLI for a Threadline graph: schema migrations, users and messages.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use threadline_common::{Config, MetadataInput};
use threadline_graph::{
    migrate, BcryptHasher, Database, GraphClient, MarkdownRenderer, MessageStore, NewMessage,
    ReplySort, ThreadOptions, UserOptions, UserStore,
};

#[derive(Parser)]
#[command(name = "threadline")]
#[command(about = "Threadline graph administration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create constraints and indexes
    Migrate,

    /// Manage users
    #[command(subcommand)]
    User(UserCommand),

    /// Post a topic, or a reply with --reply-to
    Post {
        username: String,
        body: String,

        /// Parent message id
        #[arg(long)]
        reply_to: Option<String>,

        #[arg(long)]
        slug: Option<String>,
    },

    /// Print a message and its thread as JSON
    Thread {
        id: String,

        /// Reply levels to include
        #[arg(long, default_value_t = 0)]
        depth: u32,

        /// Parent levels to include
        #[arg(long, default_value_t = 0)]
        context: u32,

        #[arg(long, value_enum, default_value_t = SortArg::Oldest)]
        sort: SortArg,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        skip: usize,
    },

    /// Replace a message's metadata with `type=<json>` entries
    Metadata { id: String, entries: Vec<String> },

    /// Soft-delete a message
    Delete { id: String, username: String },
}

#[derive(Subcommand)]
enum UserCommand {
    /// Create a user with a password login
    Create {
        username: String,
        #[arg(long, env = "THREADLINE_PASSWORD")]
        password: String,
        #[arg(long)]
        displayname: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },

    /// Replace a user's password
    Passwd {
        username: String,
        #[arg(long, env = "THREADLINE_PASSWORD")]
        password: String,
    },

    /// Soft-delete a user and purge their logins
    Delete { username: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Oldest,
    Newest,
}

impl From<SortArg> for ReplySort {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Oldest => ReplySort::Oldest,
            SortArg::Newest => ReplySort::Newest,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("threadline=info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.log_redacted();

    let client = GraphClient::new(&config);
    let db = client.database();

    let result = run(cli.command, &db).await;
    db.close().await;
    result
}

async fn run(command: Commands, db: &Database) -> Result<()> {
    let messages = MessageStore::new(db.clone(), Arc::new(MarkdownRenderer::new()));
    let users = UserStore::new(db.clone(), Arc::new(BcryptHasher::default()));

    match command {
        Commands::Migrate => migrate(db).await?,

        Commands::User(UserCommand::Create {
            username,
            password,
            displayname,
            email,
        }) => {
            let user = users
                .create_with_password(&username, &password, UserOptions { displayname, email })
                .await?
                .context("user was not created")?;
            print_json(&user)?;
        }

        Commands::User(UserCommand::Passwd { username, password }) => {
            anyhow::ensure!(
                users.change_password(&username, &password).await?,
                "no live user named {username}"
            );
            info!(%username, "Password updated");
        }

        Commands::User(UserCommand::Delete { username }) => {
            let user = users
                .delete(&username)
                .await?
                .with_context(|| format!("no user named {username}"))?;
            print_json(&user)?;
        }

        Commands::Post {
            username,
            body,
            reply_to,
            slug,
        } => {
            let message = messages
                .create(NewMessage {
                    username,
                    body,
                    slug,
                    in_reply_to: reply_to,
                    ..NewMessage::default()
                })
                .await?
                .context("author or parent message not found")?;
            print_json(&message)?;
        }

        Commands::Thread {
            id,
            depth,
            context,
            sort,
            limit,
            skip,
        } => {
            let options = ThreadOptions {
                ancestor_depth: context,
                descendant_depth: depth,
                sort: sort.into(),
                limit,
                skip,
            };
            let thread = messages
                .get_by_id(&id, &options)
                .await?
                .with_context(|| format!("no message with id {id}"))?;
            print_json(&thread)?;
        }

        Commands::Metadata { id, entries } => {
            let metadata = entries
                .iter()
                .map(|entry| parse_metadata(entry))
                .collect::<Result<Vec<_>>>()?;
            let stored = messages.update_metadata(&id, &metadata).await?;
            print_json(&stored)?;
        }

        Commands::Delete { id, username } => {
            let message = messages
                .delete(&id, &username)
                .await?
                .with_context(|| format!("message {id} not found or already deleted"))?;
            print_json(&message)?;
        }
    }

    Ok(())
}

/// `tags=["a","b"]` → structured value; anything that is not JSON stays a string.
fn parse_metadata(entry: &str) -> Result<MetadataInput> {
    let (kind, raw) = entry
        .split_once('=')
        .with_context(|| format!("expected type=value, got {entry:?}"))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok(MetadataInput::new(kind, value))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_entries_parse_json_or_fall_back_to_text() {
        let md = parse_metadata(r#"tags=["a","b"]"#).unwrap();
        assert_eq!(md.kind, "tags");
        assert_eq!(md.value, json!(["a", "b"]));

        let md = parse_metadata("mood=calm").unwrap();
        assert_eq!(md.value, json!("calm"));

        assert!(parse_metadata("no-separator").is_err());
    }

    #[test]
    fn cli_parses_thread_options() {
        let cli = Cli::try_parse_from([
            "threadline", "thread", "abc", "--depth", "2", "--sort", "newest", "--limit", "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Thread { id, depth, sort, limit, skip, .. } => {
                assert_eq!(id, "abc");
                assert_eq!(depth, 2);
                assert!(matches!(sort, SortArg::Newest));
                assert_eq!(limit, 5);
                assert_eq!(skip, 0);
            }
            _ => panic!("expected thread command"),
        }
    }
}
