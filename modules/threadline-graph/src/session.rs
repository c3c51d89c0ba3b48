//! Query execution and explicit transactions.
//!
//! `Database` is the handle every store holds. It runs compiled statements
//! against a [`GraphBackend`], logs each one, and hands out [`Transaction`]s
//! that refuse further work once committed or rolled back.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use threadline_common::{Row, ThreadlineError};

use crate::cypher::Statement;

/// A connection to a graph store.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Run one statement in an auto-commit transaction.
    async fn run(&self, statement: &Statement) -> Result<Vec<Row>, ThreadlineError>;

    /// Open an explicit transaction.
    async fn begin(&self) -> Result<Box<dyn BackendTransaction>, ThreadlineError>;

    /// Release pooled connections. Later calls fail with `ShutDown`.
    async fn close(&self);
}

#[async_trait]
pub trait BackendTransaction: Send {
    async fn run(&mut self, statement: &Statement) -> Result<Vec<Row>, ThreadlineError>;
    async fn commit(self: Box<Self>) -> Result<(), ThreadlineError>;
    async fn rollback(self: Box<Self>) -> Result<(), ThreadlineError>;
}

#[derive(Clone)]
pub struct Database {
    backend: Arc<dyn GraphBackend>,
}

impl Database {
    pub fn new(backend: Arc<dyn GraphBackend>) -> Self {
        Self { backend }
    }

    /// Run a single auto-commit statement.
    pub async fn run(&self, statement: &Statement) -> Result<Vec<Row>, ThreadlineError> {
        let started = Instant::now();
        let result = self.backend.run(statement).await;
        log_outcome(statement, started, &result);
        result
    }

    /// Open an explicit transaction. The caller must commit or roll back.
    pub async fn transaction(&self) -> Result<Transaction, ThreadlineError> {
        let inner = self.backend.begin().await?;
        Ok(Transaction { inner: Some(inner) })
    }

    /// Run statements in order inside one transaction. Commits when all
    /// succeed; otherwise rolls back and returns the failing statement's error.
    pub async fn run_in_transaction(
        &self,
        statements: &[Statement],
    ) -> Result<Vec<Vec<Row>>, ThreadlineError> {
        let mut txn = self.transaction().await?;
        let mut results = Vec::with_capacity(statements.len());

        for statement in statements {
            match txn.run(statement).await {
                Ok(rows) => results.push(rows),
                Err(e) => {
                    if let Err(rollback_err) = txn.rollback().await {
                        warn!(error = %rollback_err, "Rollback after failed statement also failed");
                    }
                    return Err(e);
                }
            }
        }

        txn.commit().await?;
        Ok(results)
    }

    pub async fn close(&self) {
        self.backend.close().await;
    }
}

/// An open transaction. Once committed or rolled back every operation
/// returns `TransactionClosed` without reaching the server.
pub struct Transaction {
    inner: Option<Box<dyn BackendTransaction>>,
}

impl Transaction {
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    pub async fn run(&mut self, statement: &Statement) -> Result<Vec<Row>, ThreadlineError> {
        let inner = self.inner.as_mut().ok_or(ThreadlineError::TransactionClosed)?;
        let started = Instant::now();
        let result = inner.run(statement).await;
        log_outcome(statement, started, &result);
        result
    }

    pub async fn commit(&mut self) -> Result<(), ThreadlineError> {
        let inner = self.inner.take().ok_or(ThreadlineError::TransactionClosed)?;
        inner.commit().await
    }

    pub async fn rollback(&mut self) -> Result<(), ThreadlineError> {
        let inner = self.inner.take().ok_or(ThreadlineError::TransactionClosed)?;
        inner.rollback().await
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.inner.is_some() {
            warn!("Transaction dropped while still open; the server will roll it back");
        }
    }
}

fn log_outcome(statement: &Statement, started: Instant, result: &Result<Vec<Row>, ThreadlineError>) {
    let duration_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(rows) => debug!(
            statement = statement.text.as_str(),
            params = ?statement.params,
            rows = rows.len(),
            duration_ms,
            "Query executed"
        ),
        Err(e) => error!(
            statement = statement.text.as_str(),
            params = ?statement.params,
            code = e.code(),
            error = %e,
            duration_ms,
            "Query failed"
        ),
    }
}
