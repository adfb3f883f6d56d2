//! Inazuma: a read-through caching reverse proxy for script-variant wiki
//! pages.
//!
//! Anonymous page GETs are served from an object store keyed by
//! (variant, title); misses fall back to the MediaWiki origin under a
//! distributed single-flight lock, and origin-driven purges re-prime the
//! cache for the affected titles.

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
