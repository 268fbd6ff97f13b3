//! Configuration and process-level helpers.

/// `lexio.toml` loading, defaults, env overrides and validation.
pub mod toml_config;

/// Tracing subscriber setup.
pub mod logging;
