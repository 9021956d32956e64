//! Persistence layer: store traits and the libSQL backend.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{DraftStore, InvitationStore};
