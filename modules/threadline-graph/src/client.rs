use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use neo4rs::{ConfigBuilder, Graph, Txn};
use tokio::sync::Mutex;
use tracing::info;

use threadline_common::{Config, Row, ThreadlineError};

use crate::bolt::{normalize, to_query, to_row, warn_undeclared_columns};
use crate::cypher::Statement;
use crate::session::{BackendTransaction, Database, GraphBackend};

/// Thin wrapper around neo4rs::Graph providing connection setup and shutdown.
///
/// The pool is created on first use and shared by every clone.
#[derive(Clone)]
pub struct GraphClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    graph: ArcSwapOption<Graph>,
    connecting: Mutex<()>,
    closed: AtomicBool,
}

impl GraphClient {
    /// Build a client without touching the network.
    pub fn new(config: &Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: config.clone(),
                graph: ArcSwapOption::empty(),
                connecting: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Build a client and open the pool right away, surfacing bad
    /// credentials or an unreachable server at startup.
    pub async fn connect(config: &Config) -> Result<Self, ThreadlineError> {
        let client = Self::new(config);
        client.graph().await?;
        Ok(client)
    }

    /// A `Database` handle backed by this client.
    pub fn database(&self) -> Database {
        Database::new(Arc::new(self.clone()))
    }

    async fn graph(&self) -> Result<Arc<Graph>, ThreadlineError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ThreadlineError::ShutDown);
        }
        if let Some(graph) = self.inner.graph.load_full() {
            return Ok(graph);
        }

        let _guard = self.inner.connecting.lock().await;
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ThreadlineError::ShutDown);
        }
        if let Some(graph) = self.inner.graph.load_full() {
            return Ok(graph);
        }

        let config = &self.inner.config;
        let mut builder = ConfigBuilder::default()
            .uri(config.neo4j_uri.as_str())
            .user(config.neo4j_user.as_str())
            .password(config.neo4j_password.as_str())
            .fetch_size(config.fetch_size)
            .max_connections(config.max_connections);
        if let Some(db) = &config.neo4j_database {
            builder = builder.db(db.as_str());
        }
        let neo_config = builder
            .build()
            .map_err(|e| ThreadlineError::Connection(e.to_string()))?;
        let graph = Arc::new(
            Graph::connect(neo_config)
                .await
                .map_err(|e| ThreadlineError::Connection(e.to_string()))?,
        );

        info!(uri = config.neo4j_uri.as_str(), "Connected to Neo4j");
        self.inner.graph.store(Some(graph.clone()));
        Ok(graph)
    }
}

#[async_trait]
impl GraphBackend for GraphClient {
    async fn run(&self, statement: &Statement) -> Result<Vec<Row>, ThreadlineError> {
        let graph = self.graph().await?;
        let mut stream = graph.execute(to_query(statement)).await.map_err(normalize)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(normalize)? {
            rows.push(to_row(&statement.columns, &row));
        }
        warn_undeclared_columns(statement, rows.len());
        Ok(rows)
    }

    async fn begin(&self) -> Result<Box<dyn BackendTransaction>, ThreadlineError> {
        let graph = self.graph().await?;
        let txn = graph.start_txn().await.map_err(normalize)?;
        Ok(Box::new(BoltTransaction { txn }))
    }

    async fn close(&self) {
        let _guard = self.inner.connecting.lock().await;
        self.inner.closed.store(true, Ordering::Release);
        // Dropping the last Graph handle drains its connection pool.
        if self.inner.graph.swap(None).is_some() {
            info!("Neo4j connection closed");
        }
    }
}

struct BoltTransaction {
    txn: Txn,
}

#[async_trait]
impl BackendTransaction for BoltTransaction {
    async fn run(&mut self, statement: &Statement) -> Result<Vec<Row>, ThreadlineError> {
        let mut stream = self.txn.execute(to_query(statement)).await.map_err(normalize)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next(self.txn.handle()).await.map_err(normalize)? {
            rows.push(to_row(&statement.columns, &row));
        }
        warn_undeclared_columns(statement, rows.len());
        Ok(rows)
    }

    async fn commit(self: Box<Self>) -> Result<(), ThreadlineError> {
        self.txn.commit().await.map_err(normalize)
    }

    async fn rollback(self: Box<Self>) -> Result<(), ThreadlineError> {
        self.txn.rollback().await.map_err(normalize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_client_refuses_work_without_connecting() {
        let client = GraphClient::new(&Config::default());
        client.close().await;

        let err = client.run(&Statement::new("RETURN 1")).await.unwrap_err();
        assert!(matches!(err, ThreadlineError::ShutDown));
        assert!(matches!(client.begin().await, Err(ThreadlineError::ShutDown)));
    }
}
