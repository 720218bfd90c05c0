//! Constraint resolution

use pgrx::pg_sys::Oid;

use super::{CollationList, Resolver};
use crate::catalog::{Catalog, RelationLock};
use crate::error::{CollDepError, CollDepResult};

impl<C: Catalog + ?Sized> Resolver<'_, C> {
    /// Collation dependencies of a constraint, sorted and deduplicated
    pub fn constraint_dependencies(&mut self, constraint_id: Oid) -> CollDepResult<Vec<Oid>> {
        Ok(self.constraint_collations(constraint_id)?.normalize())
    }

    /// Collations from the constraint's expression and from the types of its key columns
    ///
    /// Re-entering a constraint that is already being resolved yields nothing.
    pub(crate) fn constraint_collations(&mut self, constraint_id: Oid) -> CollDepResult<CollationList> {
        if self.active_constraints.contains(&constraint_id) {
            return Ok(CollationList::new());
        }

        self.active_constraints.push(constraint_id);
        let result = self.resolve_constraint(constraint_id);
        self.active_constraints.pop();
        result
    }

    fn resolve_constraint(&mut self, constraint_id: Oid) -> CollDepResult<CollationList> {
        self.descend(|resolver| {
            let catalog = resolver.catalog;
            let constraint = catalog.lookup_constraint(constraint_id)?;
            let mut collations = CollationList::new();

            if let Some(text) = &constraint.serialized_expression {
                let expression = catalog.parse_serialized_expression(text)?;
                resolver.walk(&expression, &mut collations)?;
            }

            let Some(keys) = &constraint.key_attribute_positions else {
                return Ok(collations);
            };

            if constraint.owner_relation == Oid::INVALID {
                return Err(CollDepError::corrupt(
                    format!("constraint {}", constraint_id.as_u32()),
                    "key columns without an owning relation",
                ));
            }

            let _lock = RelationLock::acquire(catalog, constraint.owner_relation)?;
            let attributes = catalog.list_attributes(constraint.owner_relation)?;

            for &position in keys {
                // Whole-row references were already covered by the expression
                if position == 0 {
                    if constraint.serialized_expression.is_none() {
                        return Err(CollDepError::corrupt(
                            format!("constraint {}", constraint_id.as_u32()),
                            "whole-row key without an expression",
                        ));
                    }
                    continue;
                }

                let attribute = attributes
                    .iter()
                    .find(|attribute| attribute.position == position)
                    .ok_or_else(|| {
                        CollDepError::corrupt(
                            format!("constraint {}", constraint_id.as_u32()),
                            format!("key column {} does not exist", position),
                        )
                    })?;
                if attribute.is_system_column() {
                    continue;
                }
                collations.append(resolver.type_collations(attribute.type_id)?);
            }

            Ok(collations)
        })
    }
}
