pub mod config;
pub mod error;
pub mod proxy;
pub mod routing;
pub mod server;
pub mod storage;

// Re-export commonly used types
pub use config::{Config, SharedConfig};
pub use error::{PrismError, PrismResult};
pub use proxy::ProxyHandler;
pub use server::Server;
pub use storage::{
    AsyncRepository, BlobStore, DetachingRepository, FileBlobStore, RecordFilter, RecordStats,
    Repository, RequestRecord, RetentionTask, SqliteRepository,
};
