//! Bladesmith: a Laravel-Blade-compatible template engine. A multi-pass
//! rendering pipeline (tokenize, resolve directives, evaluate expressions
//! through a sandboxed whitelist, interpolate) sits behind a single
//! `Engine` entry point.
//!
//! # Rendering
//!
//! `Engine::render` resolves a named template under its configured
//! `template_dir`, runs it through the directive passes in `parser`, and
//! returns the fully interpolated string. `Engine::render_string` does the
//! same for an in-memory source without touching the filesystem.

pub mod cache;
pub mod compiler;
pub mod directives;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod loader;
pub mod parser;
pub mod state;
pub mod value;

pub use engine::{CacheStats, CacheStorageType, Config, Engine, Logger, Stats, StderrLogger};
pub use error::{Result, TemplateError};
pub use value::{Context, Value};
