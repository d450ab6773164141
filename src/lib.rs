//! Spectrum Player Library
//!
//! Audio output with underrun recovery and a playback-position oracle,
//! plus a short-time spectrum analyzer synchronized to that position.

pub mod audio;
pub mod decode;
pub mod engine;
pub mod spectrum;
pub mod tui;
