//! Content-key derivation.
//!
//! A key uniquely identifies a (source, compiler, format, key-version) tuple
//! and is the deduplication anchor for the durable store: at most one record
//! may exist per key.

use sha2::{Digest, Sha256};

use super::types::{ImageFormat, TexCompiler};

/// Bumped whenever the key derivation changes incompatibly.
pub const KEY_VERSION: u32 = 1;

/// Derive the content key for a compile request.
///
/// Deterministic pure function: the trimmed source text is hashed (UTF-8
/// bytes) and suffixed with the compiler, image format, and key version.
pub fn build_key(tex_source: &str, compiler: TexCompiler, format: ImageFormat) -> String {
    build_key_versioned(tex_source, compiler, format, KEY_VERSION)
}

pub fn build_key_versioned(
    tex_source: &str,
    compiler: TexCompiler,
    format: ImageFormat,
    version: u32,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tex_source.trim().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{digest}_{compiler}_{format}_v{version}")
}
