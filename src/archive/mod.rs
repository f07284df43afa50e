//! Creator archiver
//! Resolves a creator, crawls and reconciles their posts, and stores every artifact on disk

pub mod config_loader;
pub mod crawler;
pub mod document;
pub mod download_pool;
pub mod fetcher;
pub mod identity;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod path_namer;
pub mod reconciler;
pub mod site_client;
pub mod summary;

// Re-export commonly used types for convenience
pub use config_loader::{AppConfig, ConfigOverrides, Http, init_config};

pub use models::{AuxFile, CreatorData, CreatorDirectory, CreatorRef, DownloadTask, PostRecord};

pub use site_client::{SiteClient, SiteError};

pub use logger::{Logger, init_logger};

pub use orchestrator::Orchestrator;

pub use summary::RunSummary;
