pub mod clock;
pub mod database;
pub mod in_memory_store;
pub mod notifier;
pub mod observability;
pub mod routing;

pub use clock::SystemClock;
pub use database::SqliteDocumentStore;
pub use in_memory_store::InMemoryDocumentStore;
pub use notifier::LoggingNotifier;
pub use observability::*;
pub use routing::HttpRoutingService;
