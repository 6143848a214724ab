//! Core domain model, business-time utilities and name normalization for Kingsroom.

pub mod model;
pub mod normalize;
pub mod time;

pub use model::*;

pub const CRATE_NAME: &str = "kr-core";
