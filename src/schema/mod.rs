//! Schema-aware message encoding.
//!
//! ## Key Components
//!
//! - **Encoder**: batch processor encoding messages against registry schemas
//! - **Cache**: concurrent subject cache with staleness refresh and idle purge
//! - **Registry**: read-only HTTP client for the schema registry service
//! - **Compiled**: parsed schema paired with its JSON input convention
//! - **Wire**: the fixed magic-byte/schema-ID framing layout

pub mod cache;
pub mod compiled;
pub mod encoder;
pub mod registry;
pub mod wire;

pub use cache::{CacheStats, SchemaCache};
pub use compiled::{CompiledSchema, JsonMode};
pub use encoder::SchemaRegistryEncoder;
pub use registry::{RegistryClient, RegistrySchema};
pub use wire::{frame, unframe, WIRE_HEADER_LEN};
