//! Index resolution

use pgrx::pg_sys::Oid;

use super::{CollationList, Resolver};
use crate::catalog::{AttributeDescriptor, Catalog, RelationLock};
use crate::error::{CollDepError, CollDepResult};
use crate::node::Node;

impl<C: Catalog + ?Sized> Resolver<'_, C> {
    /// Collation dependencies of an index, sorted and deduplicated
    ///
    /// Plain key columns contribute their explicit collation when the index
    /// records one, and their type's collations otherwise. Expression columns
    /// and the partial-index predicate are walked.
    pub fn index_dependencies(&mut self, index_id: Oid) -> CollDepResult<Vec<Oid>> {
        let catalog = self.catalog;
        let _index_lock = RelationLock::acquire(catalog, index_id)?;
        let index = catalog.lookup_index(index_id)?;
        let _table_lock = RelationLock::acquire(catalog, index.base_relation)?;

        let object = format!("index {}", index_id.as_u32());
        let mut expressions = match &index.serialized_expressions {
            Some(text) => expression_list(catalog.parse_serialized_expression(text)?),
            None => Vec::new(),
        }
        .into_iter();

        let needs_attributes = index.key_columns.iter().any(|column| {
            column.attribute_position.is_some() && column.explicit_collation.is_none()
        });
        let attributes: Vec<AttributeDescriptor> = if needs_attributes {
            catalog.list_attributes(index.base_relation)?
        } else {
            Vec::new()
        };

        let mut collations = CollationList::new();
        for column in &index.key_columns {
            match (column.attribute_position, column.explicit_collation) {
                (Some(_), Some(collation)) => collations.push(collation),
                (Some(position), None) => {
                    let attribute = attributes
                        .iter()
                        .find(|attribute| attribute.position == position)
                        .ok_or_else(|| {
                            CollDepError::corrupt(&object, format!("key column {} does not exist", position))
                        })?;
                    if !attribute.is_system_column() {
                        collations.append(self.type_collations(attribute.type_id)?);
                    }
                }
                (None, _) => {
                    let expression = expressions
                        .next()
                        .ok_or_else(|| CollDepError::corrupt(&object, "too few entries in indexprs list"))?;
                    self.walk(&expression, &mut collations)?;
                }
            }
        }

        if let Some(text) = &index.serialized_predicate {
            let predicate = catalog.parse_serialized_expression(text)?;
            self.walk(&predicate, &mut collations)?;
        }

        Ok(collations.normalize())
    }
}

/// `indexprs` is a list; a lone node is treated as a one-entry list
fn expression_list(node: Node) -> Vec<Node> {
    if node.is_list() {
        node.children
    } else {
        vec![node]
    }
}

#[cfg(test)]
mod tests {
    use pgrx::pg_sys::Oid;

    use crate::catalog::fixture::{oid, FixtureCatalog, LockEvent};
    use crate::config::ResolveOptions;
    use crate::error::testing::{assert_error_contains, assert_error_sqlstate};
    use crate::resolve::{resolve, DependentKind, Resolver};

    const TABLE: u32 = 16400;
    const LOWER_A: &str = "({FUNCEXPR :funcid 870 :funcresulttype 25 :funcretset false \
        :funcvariadic false :funcformat 0 :funccollid 950 :inputcollid 950 \
        :args ({VAR :varno 1 :varattno 1 :vartype 25 :varcollid 950}) :location 27})";
    const A_IS_NOT_NULL: &str = "{NULLTEST :arg {VAR :varno 1 :varattno 1 :vartype 25 \
        :varcollid 951} :nulltesttype 1 :argisrow false :location 40}";

    fn oids(values: &[u32]) -> Vec<Oid> {
        values.iter().copied().map(oid).collect()
    }

    /// `T(a text COLLATE "C", b int4[])`
    fn catalog() -> FixtureCatalog {
        let mut catalog = FixtureCatalog::new();
        catalog
            .scalar(23, 0)
            .scalar(25, 100)
            .array(1007, 23)
            .relation(TABLE, &[(25, 950), (1007, 0)]);
        catalog
    }

    fn dependencies(catalog: &FixtureCatalog, id: u32) -> Vec<Oid> {
        Resolver::new(catalog, ResolveOptions::default())
            .index_dependencies(oid(id))
            .unwrap()
    }

    #[test]
    fn test_plain_column_without_collation_uses_type() {
        let mut catalog = catalog();
        catalog.index(18000, TABLE, &[(1, 0)], None, None);

        assert_eq!(dependencies(&catalog, 18000), oids(&[100]));
    }

    #[test]
    fn test_explicit_collation_suppresses_type_fallback() {
        let mut catalog = catalog();
        catalog.index(18001, TABLE, &[(1, 951)], None, None);

        assert_eq!(dependencies(&catalog, 18001), oids(&[951]));
    }

    #[test]
    fn test_non_collatable_column_is_empty() {
        let mut catalog = catalog();
        catalog.index(18002, TABLE, &[(2, 0)], None, None);

        assert!(dependencies(&catalog, 18002).is_empty());
    }

    #[test]
    fn test_expression_column_is_walked() {
        let mut catalog = catalog();
        catalog.index(18003, TABLE, &[(0, 950), (2, 0)], Some(LOWER_A), None);

        assert_eq!(dependencies(&catalog, 18003), oids(&[100, 950]));
    }

    #[test]
    fn test_predicate_is_walked() {
        let mut catalog = catalog();
        catalog.index(18004, TABLE, &[(2, 0)], None, Some(A_IS_NOT_NULL));

        assert_eq!(dependencies(&catalog, 18004), oids(&[100, 951]));
    }

    #[test]
    fn test_too_few_expressions_is_corrupt() {
        let mut catalog = catalog();
        catalog.index(18005, TABLE, &[(0, 0), (0, 0)], Some(LOWER_A), None);

        let result = Resolver::new(&catalog, ResolveOptions::default()).index_dependencies(oid(18005));
        assert_error_contains(result, "too few entries in indexprs list");
        assert!(catalog.locks_balanced());
    }

    #[test]
    fn test_expression_column_without_expressions_is_corrupt() {
        let mut catalog = catalog();
        catalog.index(18006, TABLE, &[(0, 0)], None, None);

        let result = Resolver::new(&catalog, ResolveOptions::default()).index_dependencies(oid(18006));
        assert_error_sqlstate(result, "XX001");
    }

    #[test]
    fn test_index_and_table_are_locked_then_released() {
        let mut catalog = catalog();
        catalog.index(18007, TABLE, &[(1, 0)], None, None);

        dependencies(&catalog, 18007);
        assert_eq!(
            catalog.lock_events(),
            vec![
                LockEvent::Lock(oid(18007)),
                LockEvent::Lock(oid(TABLE)),
                LockEvent::Unlock(oid(TABLE)),
                LockEvent::Unlock(oid(18007)),
            ]
        );
    }

    #[test]
    fn test_unknown_index_is_not_found_and_unlocks() {
        let catalog = catalog();
        let result = resolve(&catalog, ResolveOptions::default(), DependentKind::Index, oid(18999));

        assert_error_sqlstate(result, "42704");
        assert_eq!(
            catalog.lock_events(),
            vec![LockEvent::Lock(oid(18999)), LockEvent::Unlock(oid(18999))]
        );
    }

    #[test]
    fn test_unsupported_predicate_unlocks() {
        let mut catalog = catalog();
        catalog.index(18008, TABLE, &[(1, 950)], None, Some("{FIELDSTORE :arg <>}"));

        let result = Resolver::new(&catalog, ResolveOptions::default()).index_dependencies(oid(18008));
        assert_error_sqlstate(result, "0A000");
        assert!(catalog.locks_balanced());
    }
}
