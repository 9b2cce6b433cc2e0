//! # SafeRide Testing Utils
//!
//! Shared testing utilities for the saferide workspace: test data builders,
//! a controllable clock and recording doubles for the external collaborators.
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! saferide-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! ```rust
//! use saferide_testing_utils::{FakeClock, MemberBuilder, RecordingNotifier};
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
