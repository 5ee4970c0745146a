pub mod api;
pub mod config;
pub mod error;
pub mod filters;
pub mod init;

pub use error::{FilterError, Result};
