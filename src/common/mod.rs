//! Common types, traits, and error definitions for path_optimizer
//!
//! This module provides the foundational building blocks shared by the
//! map utilities and the optimization pipeline.

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
