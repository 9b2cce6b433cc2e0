pub mod api_observability;
pub mod app_config;
pub mod database;
pub mod dispatch;

pub use api_observability::*;
pub use app_config::*;
pub use database::*;
pub use dispatch::*;
