//! Document-store repositories
//!
//! One generic [`DocumentRepository`] serves both identifier flavours:
//!
//! - [`ObjectIdRepository`]: keys are 12-byte [`ObjectId`]s built from
//!   24-character hex strings; malformed strings fail with `InvalidArgument`
//! - [`StringIdRepository`]: keys are opaque strings, UUIDv4 when generated
//!
//! Soft-delete visibility is an explicit predicate injected into every native
//! query, and `raw` takes an aggregation pipeline (a JSON array of stages).

mod driver;
mod id;
mod object_id;
mod query;
mod repository;

pub use driver::{DocumentDriver, FindSpec, Lookup, SortSpec};
pub use id::{IdScheme, ObjectIdScheme, StringIdScheme};
pub use object_id::{ObjectId, ObjectIdError};
pub use query::{build_query, like_to_regex, soft_delete_predicate, Visibility, ID_FIELD};
pub use repository::{DocumentRepository, ObjectIdRepository, StringIdRepository};
