//! End-to-end tests driving the full write / spawn / parse pipeline
//! against stub solver executables.

#[cfg(unix)]
mod scenarios;
