//! Tool result caching: canonical keys, tag versioning and JSON memoization

pub mod key;
pub mod tags;
pub mod tool_cache;

pub use key::{CacheParams, canonicalize_params, hash_input_for_cache};
pub use tags::{TagVersions, format_versioned_key};
pub use tool_cache::ToolCache;
