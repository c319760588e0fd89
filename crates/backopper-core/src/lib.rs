pub mod backup;
pub mod config;
pub mod credentials;
pub mod crontab;
pub mod error;
pub mod feed;
pub mod io;
pub mod lock;
pub mod notify;
pub mod reconcile;
pub mod remote;
pub mod report;
pub mod retention;
pub mod types;

pub use error::{BackopperError, Result};
