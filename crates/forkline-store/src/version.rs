//! Version constants for recording artifacts.

/// Library version.
pub const FORKLINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema version stamped on recording artifacts. Incremented when the
/// artifact format changes in a breaking way.
pub const SCHEMA_VERSION: &str = "recording_v0";

/// Assumed schema version for artifacts recorded before versioning existed.
pub const DEFAULT_SCHEMA_VERSION: &str = "recording_v0";
