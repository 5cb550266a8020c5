//! Integration test utilities for the chat client
//!
//! In-process mock REST and gateway servers on ephemeral ports, plus
//! configurations and frames shared by the tests.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
