//! Forkline store — local append-only run persistence and recording.
//!
//! The durable side of Forkline: a SQLite-backed [`SqliteStore`] holding
//! recorded runs, the [`RunRecorder`] write path (the only path to
//! persistence, with redaction applied at the boundary), and an in-memory
//! fake for tests. All I/O lives here; the comparison core stays pure.

pub mod error;
pub mod fakes;
pub mod recorder;
pub mod storage_traits;
pub mod store;
pub mod version;

pub use error::{StoreError, StoreResult};
pub use fakes::MemoryStore;
pub use recorder::{capture_env_fingerprint, RunRecorder};
pub use storage_traits::{RunListing, RunStore};
pub use store::SqliteStore;
pub use version::{DEFAULT_SCHEMA_VERSION, FORKLINE_VERSION, SCHEMA_VERSION};
