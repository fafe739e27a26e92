//! Named relation sets owned by a repository
//!
//! Each repository instance carries a [`RelationRegistry`] mapping relation
//! names to backend-specific relation descriptors, a default set used by
//! `Join::Default`, and optional named sets used by `Join::Set`.

use std::collections::BTreeMap;

use super::error::{RepositoryError, RepositoryOperation};
use super::options::Join;

/// Cardinality of a relation
///
/// A `One` relation loads a single related record (or null); a `Many`
/// relation loads a list, empty when nothing matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelationKind {
    /// The local record references at most one related record
    #[default]
    One,
    /// Any number of related records reference the local record
    Many,
}

/// Lookup table from relation names to backend relation descriptors
#[derive(Debug, Clone)]
pub struct RelationRegistry<R> {
    relations: BTreeMap<String, R>,
    default_set: Vec<String>,
    sets: BTreeMap<String, Vec<String>>,
}

impl<R> Default for RelationRegistry<R> {
    fn default() -> Self {
        Self {
            relations: BTreeMap::new(),
            default_set: Vec::new(),
            sets: BTreeMap::new(),
        }
    }
}

impl<R: Clone> RelationRegistry<R> {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a relation under a name
    #[must_use]
    pub fn relation(mut self, name: impl Into<String>, relation: R) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }

    /// Register a relation and add it to the default set
    #[must_use]
    pub fn default_relation(mut self, name: impl Into<String>, relation: R) -> Self {
        let name = name.into();
        if !self.default_set.contains(&name) {
            self.default_set.push(name.clone());
        }
        self.relations.insert(name, relation);
        self
    }

    /// Register a named set of already registered relations
    #[must_use]
    pub fn set<I, S>(mut self, name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sets
            .insert(name.into(), members.into_iter().map(Into::into).collect());
        self
    }

    /// Names of every registered relation
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    /// Whether no relation is registered
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Resolve a join option into `(name, relation)` pairs
    ///
    /// Fails with `InvalidArgument` when the option names an unregistered
    /// relation or set.
    pub fn resolve(
        &self,
        join: &Join,
        operation: RepositoryOperation,
    ) -> Result<Vec<(String, R)>, RepositoryError> {
        let names: &[String] = match join {
            Join::None => return Ok(Vec::new()),
            Join::Default => &self.default_set,
            Join::Set(set) => self.sets.get(set).ok_or_else(|| {
                RepositoryError::invalid_argument(
                    operation,
                    format!("unknown relation set '{}'", set),
                )
            })?,
            Join::Only(names) => names,
        };

        names
            .iter()
            .map(|name| {
                self.relations
                    .get(name)
                    .map(|relation| (name.clone(), relation.clone()))
                    .ok_or_else(|| {
                        RepositoryError::invalid_argument(
                            operation,
                            format!("unknown relation '{}'", name),
                        )
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryErrorKind;

    fn registry() -> RelationRegistry<u8> {
        RelationRegistry::new()
            .default_relation("role", 1)
            .relation("team", 2)
            .relation("manager", 3)
            .set("org", ["team", "manager"])
    }

    #[test]
    fn test_resolve_none() {
        assert!(registry()
            .resolve(&Join::None, RepositoryOperation::FindAll)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_resolve_default_set() {
        let resolved = registry()
            .resolve(&Join::Default, RepositoryOperation::FindAll)
            .unwrap();
        assert_eq!(resolved, vec![("role".to_string(), 1)]);
    }

    #[test]
    fn test_resolve_named_set() {
        let resolved = registry()
            .resolve(&Join::Set("org".into()), RepositoryOperation::FindAll)
            .unwrap();
        let names: Vec<_> = resolved.into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["team", "manager"]);
    }

    #[test]
    fn test_resolve_explicit_overrides_default() {
        let resolved = registry()
            .resolve(
                &Join::Only(vec!["manager".into()]),
                RepositoryOperation::FindOne,
            )
            .unwrap();
        assert_eq!(resolved, vec![("manager".to_string(), 3)]);
    }

    #[test]
    fn test_resolve_unknown_relation() {
        let err = registry()
            .resolve(&Join::Only(vec!["ghost".into()]), RepositoryOperation::FindAll)
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidArgument);
        assert!(err.message.contains("ghost"));
    }

    #[test]
    fn test_resolve_unknown_set() {
        let err = registry()
            .resolve(&Join::Set("nope".into()), RepositoryOperation::FindAll)
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidArgument);
    }
}
