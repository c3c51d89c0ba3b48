pub mod config;
pub mod error;
pub mod types;
pub mod views;

pub use config::Config;
pub use error::{ThreadlineError, DRIVER_ERROR_CODE};
pub use types::*;
pub use views::*;
