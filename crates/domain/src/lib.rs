pub mod entities;
pub mod events;
pub mod ports;
pub mod store;

pub use entities::*;
pub use events::*;
pub use ports::*;
pub use saferide_errors::{DispatchError, DispatchResult};
pub use store::*;
