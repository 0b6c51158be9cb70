//! # Farm Testing Utils
//!
//! Shared testing utilities for the render farm manager workspace.
//!
//! ## Features
//!
//! - **Mock Store**: In-memory implementation of every repository trait
//! - **Recording Collaborators**: Broadcaster and task log sink that keep what they receive
//! - **Mock Clock**: Manually advanced wall clock
//! - **Test Data Builders**: Utilities for creating test data
//! - **Harness**: Wires the mocks together for orchestration tests
//!
//! ## Usage
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! farm-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use helpers::*;
pub use mocks::*;
