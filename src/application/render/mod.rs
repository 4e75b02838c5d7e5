//! LaTeX rendering: subprocess plumbing, toolchain registry, and the
//! compile-then-convert pipeline.

pub mod command;
pub mod log;
pub mod pipeline;
pub mod toolchain;

pub use pipeline::{RenderError, RenderedImage, Renderer};
