//! Power Anomaly library
//!
//! This module exposes the detector, its transports and storage for use
//! by the binaries, in tests, and as a library.

pub mod core;
pub mod db;
pub mod detection;
pub mod ingest;
pub mod service;
