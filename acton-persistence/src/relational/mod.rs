//! Relational repository
//!
//! [`RelationalRepository`] runs the repository contract against a table.
//! Filters must be structured conditions; `raw` takes parameterised SQL.
//!
//! # Example
//!
//! ```rust
//! use acton_persistence::memory::MemoryDatabase;
//! use acton_persistence::relational::{RelationalRepository, TableSchema};
//! use acton_persistence::repository::Entity;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Order {
//!     id: String,
//!     total: i64,
//! }
//!
//! impl Entity for Order {
//!     const NAME: &'static str = "Order";
//! }
//!
//! let db = MemoryDatabase::new();
//! let orders: RelationalRepository<Order, _> =
//!     RelationalRepository::new(db.table(TableSchema::new("orders")));
//! ```

mod driver;
#[cfg(feature = "postgres")]
mod postgres;
mod query;
mod repository;

pub use driver::RelationalDriver;
#[cfg(feature = "postgres")]
pub use postgres::{PgTableDriver, PgTransaction};
pub use query::{RawSql, Relation, SelectQuery, TableSchema};
pub use repository::RelationalRepository;
