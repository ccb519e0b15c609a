pub mod config;
pub mod error;
pub mod types;

pub use error::{ParleyError, ParleyResult};
pub use types::{ContactCard, Location, LocationMode, MediaKind, MediaMetadata};
