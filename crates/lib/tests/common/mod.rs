#![allow(dead_code)]
//! # Common Test Utilities
//!
//! Shared setup for the integration tests, so tests are isolated and
//! repeatable.

use dotenvy::dotenv;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes the tracing subscriber and loads .env for tests.
pub fn setup_tracing() {
    INIT.call_once(|| {
        dotenv().ok();
        tracing_subscriber::fmt::init();
    });
}

/// A minimal PNG header, enough to stand in for image bytes on disk.
pub const FAKE_PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Writes a throwaway PNG fixture and returns the handle keeping it alive.
pub fn fixture_image() -> tempfile::NamedTempFile {
    use std::io::Write;
    let mut file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .expect("failed to create fixture image");
    file.write_all(FAKE_PNG).expect("failed to write fixture");
    file
}
