// src/ingest/providers/mod.rs
pub mod soda;

pub use soda::{clamp_limit, QueryDialect, SodaFetcher, DEFAULT_LIMIT, MAX_LIMIT};
