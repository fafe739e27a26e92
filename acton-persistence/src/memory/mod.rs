//! In-memory backends
//!
//! [`MemoryDocumentStore`] backs the document repositories and
//! [`MemoryDatabase`] backs the relational one. Both keep data in process,
//! honour unique indexes, and issue [`MemorySession`]s for caller-owned
//! transactions. Handles count the driver calls made through them so tests
//! can assert that a rejected call never reached the store.

mod document;
mod engine;
mod matcher;
mod relational;

pub use document::{MemoryCollection, MemoryDocumentStore};
pub use engine::MemorySession;
pub use relational::{MemoryDatabase, MemoryTable};
