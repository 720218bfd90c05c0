//! Collation dependency resolution
//!
//! A [`Resolver`] walks from one constraint, index or materialized view down
//! through stored expressions, column types, domains, arrays, composite
//! members and range subtypes, collecting every collation it meets.
//!
//! ## Policy
//!
//! Over-approximate: redundant or speculative collations are fine, missing
//! ones are not. Any error aborts the whole call; there is no partial result.
//!
//! ## Depth guard
//!
//! Every expression node and every type, relation, range or constraint hop
//! counts as one level; list wrappers do not. Going past
//! [`ResolveOptions::max_depth`] fails with `ResourceExhausted`. Each level
//! also asks [`Catalog::check_stack`] first, which is the hard bound: the
//! counter alone says nothing about how much native stack is left.
//!
//! ## Constraint cycles
//!
//! `pg_depend` records a `CHECK` as depending on the types of the literals
//! in its own expression, so a constraint can reach itself through a type.
//! A constraint already being resolved further up is skipped; the outer
//! frame collects its collations anyway.

use std::fmt;
use std::str::FromStr;

use pgrx::pg_sys::Oid;

use crate::catalog::Catalog;
use crate::config::ResolveOptions;
use crate::error::{CollDepError, CollDepResult};

mod constraint;
mod index;
mod matview;
pub mod normalize;
mod types;
mod walker;

pub use normalize::{normalize, CollationList};

/// Objects whose collation dependencies can be computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependentKind {
    Constraint,
    Index,
    MaterializedView,
}

impl DependentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependentKind::Constraint => "constraint",
            DependentKind::Index => "index",
            DependentKind::MaterializedView => "matview",
        }
    }
}

impl fmt::Display for DependentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependentKind {
    type Err = CollDepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "constraint" => Ok(DependentKind::Constraint),
            "index" => Ok(DependentKind::Index),
            "matview" | "materialized view" => Ok(DependentKind::MaterializedView),
            _ => Err(CollDepError::InvalidParameter {
                parameter: "objkind".to_string(),
                value: s.to_string(),
                reason: "expected 'constraint', 'index' or 'matview'".to_string(),
            }),
        }
    }
}

/// Recursive resolver state for a single top-level call
pub struct Resolver<'c, C: Catalog + ?Sized> {
    catalog: &'c C,
    options: ResolveOptions,
    depth: usize,
    /// Constraints whose resolution is in progress
    active_constraints: Vec<Oid>,
}

impl<'c, C: Catalog + ?Sized> Resolver<'c, C> {
    pub fn new(catalog: &'c C, options: ResolveOptions) -> Self {
        Self {
            catalog,
            options,
            depth: 0,
            active_constraints: Vec::new(),
        }
    }

    /// Run `f` one level deeper, failing if that would pass the limit
    fn descend<T>(&mut self, f: impl FnOnce(&mut Self) -> CollDepResult<T>) -> CollDepResult<T> {
        if self.depth >= self.options.max_depth {
            return Err(CollDepError::ResourceExhausted {
                depth: self.depth + 1,
                max_depth: self.options.max_depth,
            });
        }
        self.catalog.check_stack()?;

        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Normalized collation dependencies of any supported object
    pub fn dependencies(&mut self, kind: DependentKind, id: Oid) -> CollDepResult<Vec<Oid>> {
        match kind {
            DependentKind::Constraint => self.constraint_dependencies(id),
            DependentKind::Index => self.index_dependencies(id),
            DependentKind::MaterializedView => self.matview_dependencies(id),
        }
    }
}

/// Resolve the collation dependencies of one object with a fresh resolver
pub fn resolve<C: Catalog + ?Sized>(
    catalog: &C,
    options: ResolveOptions,
    kind: DependentKind,
    id: Oid,
) -> CollDepResult<Vec<Oid>> {
    Resolver::new(catalog, options).dependencies(kind, id)
}
