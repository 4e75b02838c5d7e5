pub mod api;

pub use api::{ApiState, build_router};
