pub mod config;
pub mod error;
pub mod types;

pub use config::RecallConfig;
pub use error::{RecallError, Result};
pub use types::*;
