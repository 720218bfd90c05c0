//! In-memory catalog for resolver tests

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use pgrx::pg_sys::Oid;

use super::{
    AttributeDescriptor, Catalog, CollationInfo, ConstraintDescriptor, DependencyEdge,
    IndexDescriptor, IndexKeyColumn, MaterializedViewDescriptor, ObjectClass, RangeDescriptor,
    RewriteRule, RuleEvent, TypeDescriptor, TypeKind,
};
use crate::error::{CollDepError, CollDepResult};

pub fn oid(value: u32) -> Oid {
    Oid::from(value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    Lock(Oid),
    Unlock(Oid),
}

#[derive(Debug, Default)]
pub struct FixtureCatalog {
    types: HashMap<Oid, TypeDescriptor>,
    relations: HashMap<Oid, Vec<AttributeDescriptor>>,
    constraints: HashMap<Oid, ConstraintDescriptor>,
    indexes: HashMap<Oid, IndexDescriptor>,
    /// `(range type, multirange type, descriptor)`
    ranges: Vec<(Oid, Oid, RangeDescriptor)>,
    dependents: HashMap<Oid, Vec<DependencyEdge>>,
    matviews: HashMap<Oid, MaterializedViewDescriptor>,
    collations: HashMap<Oid, CollationInfo>,
    locks: RefCell<Vec<LockEvent>>,
    stack_checks: Cell<usize>,
    stack_limit: Option<usize>,
}

impl FixtureCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_type(&mut self, id: u32, kind: TypeKind, f: impl FnOnce(&mut TypeDescriptor)) -> &mut Self {
        let mut descriptor = TypeDescriptor {
            id: oid(id),
            declared_collation: Oid::INVALID,
            element_type: Oid::INVALID,
            base_type: Oid::INVALID,
            composite_relation: Oid::INVALID,
            kind,
        };
        f(&mut descriptor);
        self.types.insert(oid(id), descriptor);
        self
    }

    /// Plain base type, collatable when `collation` is non-zero
    pub fn scalar(&mut self, id: u32, collation: u32) -> &mut Self {
        self.add_type(id, TypeKind::Scalar, |t| t.declared_collation = oid(collation))
    }

    pub fn array(&mut self, id: u32, element: u32) -> &mut Self {
        self.add_type(id, TypeKind::Array, |t| t.element_type = oid(element))
    }

    pub fn domain(&mut self, id: u32, base: u32, collation: u32) -> &mut Self {
        self.add_type(id, TypeKind::Domain, |t| {
            t.base_type = oid(base);
            t.declared_collation = oid(collation);
        })
    }

    /// Composite type `id` backed by relation `relation` with `(type, collation)` columns
    pub fn composite(&mut self, id: u32, relation: u32, columns: &[(u32, u32)]) -> &mut Self {
        self.add_type(id, TypeKind::Composite, |t| t.composite_relation = oid(relation));
        self.relation(relation, columns)
    }

    pub fn range(&mut self, id: u32, multirange: u32, subtype: u32, collation: u32) -> &mut Self {
        self.add_type(id, TypeKind::Range, |_| {});
        self.add_type(multirange, TypeKind::Multirange, |_| {});
        self.ranges.push((
            oid(id),
            oid(multirange),
            RangeDescriptor {
                collation: oid(collation),
                subtype: oid(subtype),
            },
        ));
        self
    }

    /// Relation with user columns numbered from 1, plus a `ctid`-like system column
    pub fn relation(&mut self, id: u32, columns: &[(u32, u32)]) -> &mut Self {
        let mut attributes = vec![AttributeDescriptor {
            position: -1,
            type_id: oid(27),
            explicit_collation: Oid::INVALID,
        }];
        for (i, (type_id, collation)) in columns.iter().enumerate() {
            attributes.push(AttributeDescriptor {
                position: i16::try_from(i + 1).unwrap(),
                type_id: oid(*type_id),
                explicit_collation: oid(*collation),
            });
        }
        self.relations.insert(oid(id), attributes);
        self
    }

    pub fn constraint(
        &mut self,
        id: u32,
        relation: u32,
        expression: Option<&str>,
        keys: Option<&[i16]>,
    ) -> &mut Self {
        self.constraints.insert(
            oid(id),
            ConstraintDescriptor {
                id: oid(id),
                owner_relation: oid(relation),
                serialized_expression: expression.map(str::to_string),
                key_attribute_positions: keys.map(<[i16]>::to_vec),
            },
        );
        self
    }

    /// Attach constraint `constraint` to type `type_id` through a dependency edge
    pub fn type_constraint(&mut self, type_id: u32, constraint: u32) -> &mut Self {
        self.dependents.entry(oid(type_id)).or_default().push(DependencyEdge {
            referencing_class: ObjectClass::Constraint,
            referencing_object: oid(constraint),
            referenced_object: oid(type_id),
        });
        self
    }

    /// A non-constraint object depending on the type, which resolvers must ignore
    pub fn type_dependent(&mut self, type_id: u32, object: u32) -> &mut Self {
        self.dependents.entry(oid(type_id)).or_default().push(DependencyEdge {
            referencing_class: ObjectClass::Other,
            referencing_object: oid(object),
            referenced_object: oid(type_id),
        });
        self
    }

    /// Index whose keys are `(attribute position or 0, explicit collation or 0)`
    pub fn index(
        &mut self,
        id: u32,
        relation: u32,
        keys: &[(i16, u32)],
        expressions: Option<&str>,
        predicate: Option<&str>,
    ) -> &mut Self {
        self.indexes.insert(
            oid(id),
            IndexDescriptor {
                id: oid(id),
                base_relation: oid(relation),
                key_columns: keys
                    .iter()
                    .map(|(position, collation)| IndexKeyColumn {
                        attribute_position: (*position != 0).then_some(*position),
                        explicit_collation: (*collation != 0).then_some(oid(*collation)),
                    })
                    .collect(),
                serialized_expressions: expressions.map(str::to_string),
                serialized_predicate: predicate.map(str::to_string),
            },
        );
        self
    }

    pub fn matview(&mut self, id: u32, rules: Vec<RewriteRule>) -> &mut Self {
        self.matviews.insert(
            oid(id),
            MaterializedViewDescriptor {
                id: oid(id),
                name: format!("mv_{id}"),
                rules,
            },
        );
        self
    }

    pub fn collation(&mut self, id: u32, name: &str) -> &mut Self {
        self.collations.insert(
            oid(id),
            CollationInfo {
                oid: id,
                name: name.to_string(),
                provider: "libc".to_string(),
                version: None,
            },
        );
        self
    }

    /// Report the stack as exhausted once `checks` stack checks have passed
    pub fn stack_limit(&mut self, checks: usize) -> &mut Self {
        self.stack_limit = Some(checks);
        self
    }

    pub fn stack_checks(&self) -> usize {
        self.stack_checks.get()
    }

    pub fn lock_events(&self) -> Vec<LockEvent> {
        self.locks.borrow().clone()
    }

    /// Every lock taken so far has been released
    pub fn locks_balanced(&self) -> bool {
        let mut held: Vec<Oid> = Vec::new();
        for event in self.locks.borrow().iter() {
            match event {
                LockEvent::Lock(id) => held.push(*id),
                LockEvent::Unlock(id) => match held.iter().position(|h| h == id) {
                    Some(i) => {
                        held.remove(i);
                    }
                    None => return false,
                },
            }
        }
        held.is_empty()
    }
}

pub fn select_instead(actions: &str) -> RewriteRule {
    RewriteRule {
        event: RuleEvent::Select,
        is_instead: true,
        serialized_actions: actions.to_string(),
    }
}

impl Catalog for FixtureCatalog {
    fn lookup_type(&self, id: Oid) -> CollDepResult<TypeDescriptor> {
        self.types
            .get(&id)
            .cloned()
            .ok_or_else(|| CollDepError::not_found("type", id))
    }

    fn list_attributes(&self, relation_id: Oid) -> CollDepResult<Vec<AttributeDescriptor>> {
        self.relations
            .get(&relation_id)
            .cloned()
            .ok_or_else(|| CollDepError::not_found("relation", relation_id))
    }

    fn lookup_constraint(&self, id: Oid) -> CollDepResult<ConstraintDescriptor> {
        self.constraints
            .get(&id)
            .cloned()
            .ok_or_else(|| CollDepError::not_found("constraint", id))
    }

    fn lookup_index(&self, id: Oid) -> CollDepResult<IndexDescriptor> {
        self.indexes
            .get(&id)
            .cloned()
            .ok_or_else(|| CollDepError::not_found("index", id))
    }

    fn lookup_range(&self, type_id: Oid, is_multirange: bool) -> CollDepResult<RangeDescriptor> {
        self.ranges
            .iter()
            .find(|(range, multirange, _)| {
                if is_multirange {
                    *multirange == type_id
                } else {
                    *range == type_id
                }
            })
            .map(|(_, _, descriptor)| descriptor.clone())
            .ok_or_else(|| CollDepError::not_found("range", type_id))
    }

    fn list_constraint_dependents(&self, type_id: Oid) -> CollDepResult<Vec<DependencyEdge>> {
        Ok(self.dependents.get(&type_id).cloned().unwrap_or_default())
    }

    fn lookup_materialized_view(&self, id: Oid) -> CollDepResult<MaterializedViewDescriptor> {
        self.matviews
            .get(&id)
            .cloned()
            .ok_or_else(|| CollDepError::not_found("materialized view", id))
    }

    fn lookup_collation(&self, id: Oid) -> CollDepResult<CollationInfo> {
        self.collations
            .get(&id)
            .cloned()
            .ok_or_else(|| CollDepError::not_found("collation", id))
    }

    fn lock_relation(&self, relation_id: Oid) -> CollDepResult<()> {
        self.locks.borrow_mut().push(LockEvent::Lock(relation_id));
        Ok(())
    }

    fn unlock_relation(&self, relation_id: Oid) {
        self.locks.borrow_mut().push(LockEvent::Unlock(relation_id));
    }

    fn check_stack(&self) -> CollDepResult<()> {
        let checks = self.stack_checks.get() + 1;
        self.stack_checks.set(checks);
        match self.stack_limit {
            Some(limit) if checks > limit => Err(CollDepError::StackDepthExceeded {
                context: format!("running stack check {checks}"),
            }),
            _ => Ok(()),
        }
    }
}
