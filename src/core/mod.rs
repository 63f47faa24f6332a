pub mod config;
pub mod error;
pub mod log;
pub mod result;

pub use config::Config;
pub use error::Error;
pub use result::Result;

pub use crate as zufs_core;
