// src/host/mod.rs
// Adapters between the orchestrating host and the ingest core.

pub mod input;
pub mod scheme;
pub mod writer;

pub use input::{parse_input, read_input, HostInput};
pub use scheme::SCHEME;
pub use writer::XmlEventWriter;
