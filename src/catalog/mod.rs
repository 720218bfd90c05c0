//! Read-only catalog access used by the resolvers
//!
//! Resolvers never reach into global state: they receive a [`Catalog`] and
//! ask it for typed descriptors. [`spi::SpiCatalog`] answers from the live
//! system catalogs; tests substitute an in-memory fixture.

use pgrx::pg_sys::Oid;
use serde::Serialize;

use crate::error::CollDepResult;
use crate::node::{parse_node_tree_with, Node};

pub mod spi;

#[cfg(test)]
pub mod fixture;

/// `pg_type.typtype`, with arrays split out of base types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TypeKind {
    Scalar,
    Array,
    Domain,
    Composite,
    Range,
    Multirange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub id: Oid,
    pub declared_collation: Oid,
    pub element_type: Oid,
    pub base_type: Oid,
    pub composite_relation: Oid,
    pub kind: TypeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub position: i16,
    pub type_id: Oid,
    pub explicit_collation: Oid,
}

impl AttributeDescriptor {
    /// System columns have negative attribute numbers
    pub fn is_system_column(&self) -> bool {
        self.position < 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintDescriptor {
    pub id: Oid,
    pub owner_relation: Oid,
    /// `conbin` text, if the constraint has an expression
    pub serialized_expression: Option<String>,
    /// `conkey`; position 0 stands for a whole-row reference
    pub key_attribute_positions: Option<Vec<i16>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKeyColumn {
    /// `None` for expression columns
    pub attribute_position: Option<i16>,
    pub explicit_collation: Option<Oid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub id: Oid,
    pub base_relation: Oid,
    pub key_columns: Vec<IndexKeyColumn>,
    /// `indexprs` text: a list with one entry per expression column
    pub serialized_expressions: Option<String>,
    /// `indpred` text
    pub serialized_predicate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeDescriptor {
    pub collation: Oid,
    pub subtype: Oid,
}

/// What kind of object references a type through `pg_depend`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    Constraint,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub referencing_class: ObjectClass,
    pub referencing_object: Oid,
    pub referenced_object: Oid,
}

/// `pg_rewrite.ev_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEvent {
    Select,
    Update,
    Insert,
    Delete,
}

impl RuleEvent {
    pub fn from_ev_type(ev_type: char) -> Option<Self> {
        match ev_type {
            '1' => Some(RuleEvent::Select),
            '2' => Some(RuleEvent::Update),
            '3' => Some(RuleEvent::Insert),
            '4' => Some(RuleEvent::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    pub event: RuleEvent,
    pub is_instead: bool,
    /// `ev_action` text: a list of queries
    pub serialized_actions: String,
}

/// A materialized view and its raw rule set; the resolver checks its shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedViewDescriptor {
    pub id: Oid,
    pub name: String,
    pub rules: Vec<RewriteRule>,
}

/// Display data for a collation, used by the JSON report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollationInfo {
    pub oid: u32,
    pub name: String,
    pub provider: String,
    pub version: Option<String>,
}

pub trait Catalog {
    fn lookup_type(&self, id: Oid) -> CollDepResult<TypeDescriptor>;

    /// Live attributes ordered by position; NotFound if the relation is unknown
    fn list_attributes(&self, relation_id: Oid) -> CollDepResult<Vec<AttributeDescriptor>>;

    fn lookup_constraint(&self, id: Oid) -> CollDepResult<ConstraintDescriptor>;

    fn lookup_index(&self, id: Oid) -> CollDepResult<IndexDescriptor>;

    fn lookup_range(&self, type_id: Oid, is_multirange: bool) -> CollDepResult<RangeDescriptor>;

    /// Dependency edges whose referenced object is the given type
    fn list_constraint_dependents(&self, type_id: Oid) -> CollDepResult<Vec<DependencyEdge>>;

    /// NotFound unless `id` names a materialized view
    fn lookup_materialized_view(&self, id: Oid) -> CollDepResult<MaterializedViewDescriptor>;

    fn lookup_collation(&self, id: Oid) -> CollDepResult<CollationInfo>;

    /// Take a share lock on a relation until the matching unlock
    fn lock_relation(&self, relation_id: Oid) -> CollDepResult<()>;

    fn unlock_relation(&self, relation_id: Oid);

    /// Fail with `StackDepthExceeded` when the native stack is nearly used up
    fn check_stack(&self) -> CollDepResult<()>;

    fn parse_serialized_expression(&self, text: &str) -> CollDepResult<Node> {
        parse_node_tree_with(text, &|| self.check_stack())
    }
}

/// Share lock on a relation, released when dropped
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct RelationLock<'c, C: Catalog + ?Sized> {
    catalog: &'c C,
    relation_id: Oid,
}

impl<'c, C: Catalog + ?Sized> RelationLock<'c, C> {
    pub fn acquire(catalog: &'c C, relation_id: Oid) -> CollDepResult<Self> {
        catalog.lock_relation(relation_id)?;
        Ok(Self { catalog, relation_id })
    }
}

impl<C: Catalog + ?Sized> Drop for RelationLock<'_, C> {
    fn drop(&mut self) {
        self.catalog.unlock_relation(self.relation_id);
    }
}
