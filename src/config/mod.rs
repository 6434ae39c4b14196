mod registry;
mod server;

pub use registry::{
    DEFAULT_APP_NAME, DEFAULT_MAX_CONCURRENT_INDEXERS, DEFAULT_TAG_FORMAT, ModuleHosting,
    RegistryConfig, StorageLocation, Timeouts,
};
pub use server::ServerConfig;
