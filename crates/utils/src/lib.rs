//! Shared helpers for the device plugin binaries: logging setup and the
//! build version string.

pub mod logging;
pub mod version;
