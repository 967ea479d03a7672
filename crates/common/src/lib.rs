//! Common types for the itinerary generation workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
