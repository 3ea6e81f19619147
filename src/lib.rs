pub mod catalog;
pub mod core;
pub mod curve;
pub mod dashboard;
pub mod gateway;
pub mod sync;

pub use sync::SyncError;

pub type Result<T> = std::result::Result<T, error_stack::Report<SyncError>>;

pub mod prelude {
    pub use crate::catalog::{CatalogConfig, CatalogError, ChannelCatalog, ResyncOutcome};
    pub use crate::core::*;
    pub use crate::curve::{CurveRequest, DEFAULT_BACKEND};
    pub use crate::dashboard::memory::MemoryStore;
    pub use crate::dashboard::store::DocumentStore;
    pub use crate::dashboard::validation::{DashboardValidator, ValidationConfig};
    pub use crate::dashboard::{DashboardDocument, DashboardError, DashboardService, StoragePolicy};
    pub use crate::gateway::{ArchiverGateway, CurveQuery, GatewayError, MemoryGateway};
    pub use crate::sync::{CatalogSynchronizer, SyncConfig};
}
