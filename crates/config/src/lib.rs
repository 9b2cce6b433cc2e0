pub mod models;

pub use models::{
    ApiConfig, AppConfig, DatabaseConfig, DispatcherConfig, ExternalConfig, MembershipConfig,
    MonitorConfig, ObservabilityConfig,
};
