use tracing::{info, warn};

use threadline_common::ThreadlineError;

use crate::cypher::Statement;
use crate::session::Database;

/// Run idempotent schema migrations: constraints, indexes.
pub async fn migrate(db: &Database) -> Result<(), ThreadlineError> {
    info!("Running schema migrations...");

    // --- Uniqueness constraints ---
    let constraints = [
        "CREATE CONSTRAINT message_id IF NOT EXISTS FOR (n:Message) REQUIRE n.id IS UNIQUE",
        "CREATE CONSTRAINT message_slug IF NOT EXISTS FOR (n:Message) REQUIRE n.slug IS UNIQUE",
        "CREATE CONSTRAINT user_username IF NOT EXISTS FOR (n:User) REQUIRE n.username IS UNIQUE",
    ];

    for c in &constraints {
        run_ignoring_exists(db, c).await?;
    }
    info!("Uniqueness constraints created");

    // --- Property indexes (reply ordering) ---
    let indexes = ["CREATE INDEX message_create_time IF NOT EXISTS FOR (n:Message) ON (n.create_time)"];

    for idx in &indexes {
        run_ignoring_exists(db, idx).await?;
    }
    info!("Property indexes created");

    info!("Schema migrations complete");
    Ok(())
}

/// Servers that predate `IF NOT EXISTS` report a clash instead; treat it as done.
async fn run_ignoring_exists(db: &Database, cypher: &str) -> Result<(), ThreadlineError> {
    match db.run(&Statement::new(cypher)).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("already exists") || msg.contains("equivalent") {
                warn!("Already exists (skipped): {}", cypher.chars().take(80).collect::<String>());
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}
