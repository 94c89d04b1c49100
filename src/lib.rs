pub mod config;
pub mod dap;
pub mod debugger;
pub mod error;
pub mod kernel;
pub mod log;

pub use error::{Error, ErrorOrigin, Result};
