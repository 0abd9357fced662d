//! # PC Test Utilities
//!
//! Shared test utilities for the Player Controller (PC) service.
//!
//! ## Modules
//!
//! - `mock_engine` - Scriptable in-memory `MediaEngine`
//! - `mock_notifier` - Notifier that records per-participant notifications
//! - `fixtures` - Canned commands and a wired `TestHarness`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = TestHarness::new(2);
//!     let alice = participant("p-1", "alice");
//!
//!     harness.start(&alice).await.unwrap();
//!     assert_eq!(harness.loads(), vec![1, 0]);
//! }
//! ```

pub mod fixtures;
pub mod mock_engine;
pub mod mock_notifier;

pub use fixtures::*;
pub use mock_engine::*;
pub use mock_notifier::*;
