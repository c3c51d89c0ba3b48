use thiserror::Error;

/// Status code used when the driver fails before the server produced one.
pub const DRIVER_ERROR_CODE: &str = "Threadline.DriverError";

#[derive(Error, Debug)]
pub enum ThreadlineError {
    /// The database rejected or failed a statement. `code` is the server's
    /// status code (e.g. `Neo.ClientError.Schema.ConstraintValidationFailed`).
    #[error("Query failed ({code}): {message}")]
    Query { code: String, message: String },

    #[error("Transaction has closed")]
    TransactionClosed,

    #[error("Where clause could not be processed. Found {0} instead")]
    MalformedClause(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Graph client has been shut down")]
    ShutDown,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Password hashing failed: {0}")]
    Password(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ThreadlineError {
    /// Stable, machine-readable code for this error.
    pub fn code(&self) -> &str {
        match self {
            ThreadlineError::Query { code, .. } => code,
            ThreadlineError::TransactionClosed => "Threadline.TransactionClosed",
            ThreadlineError::MalformedClause(_) => "Threadline.MalformedClause",
            ThreadlineError::Connection(_) => "Threadline.Connection",
            ThreadlineError::ShutDown => "Threadline.ShutDown",
            ThreadlineError::InvalidInput(_) => "Threadline.InvalidInput",
            ThreadlineError::Password(_) => "Threadline.Password",
            ThreadlineError::Config(_) => "Threadline.Config",
        }
    }
}

pub type Result<T, E = ThreadlineError> = std::result::Result<T, E>;
