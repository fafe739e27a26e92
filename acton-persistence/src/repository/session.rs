//! Caller-owned transaction handles
//!
//! A repository never opens, commits or rolls back a transaction. Callers
//! start one on the backend (for example `MemoryDocumentStore::start_session`
//! or `PgTransaction::begin`), pass `&dyn TransactionHandle` through the
//! options of every call that belongs to the unit of work, and finish it
//! themselves.

use std::any::Any;
use std::fmt;

use super::error::{RepositoryError, RepositoryOperation};

/// Opaque token scoping repository calls to one unit of work
pub trait TransactionHandle: Send + Sync + fmt::Debug {
    /// Name of the backend that issued the handle
    fn backend(&self) -> &'static str;

    /// Access to the concrete handle, used by drivers to recover their
    /// native transaction type
    fn as_any(&self) -> &dyn Any;
}

/// Recover a driver's native handle from an optional opaque one
///
/// A handle issued by a different backend is a programming error and fails
/// with `InvalidArgument`.
pub fn downcast_session<'a, T>(
    session: Option<&'a dyn TransactionHandle>,
    operation: RepositoryOperation,
) -> Result<Option<&'a T>, RepositoryError>
where
    T: TransactionHandle + 'static,
{
    match session {
        None => Ok(None),
        Some(handle) => handle.as_any().downcast_ref::<T>().map(Some).ok_or_else(|| {
            RepositoryError::invalid_argument(
                operation,
                format!(
                    "session issued by '{}' cannot be used with this backend",
                    handle.backend()
                ),
            )
        }),
    }
}
