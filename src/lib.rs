pub mod config;
pub mod error;
pub mod db;
pub mod storage;
pub mod store;
pub mod upload;
pub mod watch;

pub use config::Config;
pub use error::{CamwatchError, Result};
pub use store::{StatusStore, UploadRecord};
pub use upload::{UploadOutcome, Uploader};
pub use watch::{FileWatcher, WatcherSettings, WatcherStats};
