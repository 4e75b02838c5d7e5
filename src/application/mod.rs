//! Application services orchestrating rendering, persistence, and caching.

pub mod error;
pub mod images;
pub mod render;
pub mod repos;

pub use error::AppError;
pub use images::{CreateOutcome, FieldLookup, ImageRenderer, ImageService, NewImageRequest};
