//! grafite: a self-hosted LaTeX-to-image rendering service.
//!
//! LaTeX source goes in, a PNG or SVG data URI comes out; results are
//! persisted once per content key and served through a field-level cache.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
