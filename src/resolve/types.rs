//! Type, relation and range resolution

use pgrx::pg_sys::Oid;

use super::{CollationList, Resolver};
use crate::catalog::{Catalog, ObjectClass, TypeKind};
use crate::error::CollDepResult;

impl<C: Catalog + ?Sized> Resolver<'_, C> {
    /// Collations a value of this type can depend on
    ///
    /// The type's own shape is inspected in priority order: declared
    /// collation, element type, domain base type, composite relation, then
    /// range subtype. Constraints attached to the type (domain `CHECK`s) are
    /// always added on top.
    pub fn type_collations(&mut self, type_id: Oid) -> CollDepResult<CollationList> {
        self.descend(|resolver| {
            let ty = resolver.catalog.lookup_type(type_id)?;
            let mut collations = CollationList::new();

            if ty.declared_collation != Oid::INVALID {
                collations.push(ty.declared_collation);
            } else if ty.element_type != Oid::INVALID {
                collations.append(resolver.type_collations(ty.element_type)?);
            } else if ty.base_type != Oid::INVALID {
                collations.append(resolver.type_collations(ty.base_type)?);
            } else if ty.composite_relation != Oid::INVALID {
                collations.append(resolver.relation_collations(ty.composite_relation)?);
            } else if matches!(ty.kind, TypeKind::Range | TypeKind::Multirange) {
                let is_multirange = ty.kind == TypeKind::Multirange;
                collations.append(resolver.range_collations(ty.id, is_multirange)?);
            }

            for edge in resolver.catalog.list_constraint_dependents(type_id)? {
                if edge.referencing_class != ObjectClass::Constraint || edge.referenced_object != type_id {
                    continue;
                }
                collations.append(resolver.constraint_collations(edge.referencing_object)?);
            }

            Ok(collations)
        })
    }

    /// Collations of every user column of a relation or composite type
    pub fn relation_collations(&mut self, relation_id: Oid) -> CollDepResult<CollationList> {
        self.descend(|resolver| {
            let mut collations = CollationList::new();
            for attribute in resolver.catalog.list_attributes(relation_id)? {
                if attribute.is_system_column() {
                    continue;
                }
                collations.push(attribute.explicit_collation);
                collations.append(resolver.type_collations(attribute.type_id)?);
            }
            Ok(collations)
        })
    }

    /// Range collation plus whatever the subtype depends on
    pub fn range_collations(&mut self, type_id: Oid, is_multirange: bool) -> CollDepResult<CollationList> {
        self.descend(|resolver| {
            let range = resolver.catalog.lookup_range(type_id, is_multirange)?;
            let mut collations = CollationList::new();
            collations.push(range.collation);
            collations.append(resolver.type_collations(range.subtype)?);
            Ok(collations)
        })
    }
}
