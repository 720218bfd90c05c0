//! [`Catalog`] implementation over SPI
//!
//! Every lookup is a parameterised query on the system catalogs, run inside
//! the caller's snapshot. Serialized expressions are fetched as text
//! (`pg_node_tree::text`) and parsed by the node reader.

use pgrx::prelude::*;
use pgrx::pg_sys::Oid;
use pgrx::spi::SpiHeapTupleData;
use pgrx::{FromDatum, IntoDatum};

use super::{
    AttributeDescriptor, Catalog, CollationInfo, ConstraintDescriptor, DependencyEdge,
    IndexDescriptor, IndexKeyColumn, MaterializedViewDescriptor, ObjectClass, RangeDescriptor,
    RewriteRule, RuleEvent, TypeDescriptor, TypeKind,
};
use crate::error::{CollDepError, CollDepResult};

const TYPE_QUERY: &str = "\
    SELECT t.typcollation, t.typelem, t.typbasetype, t.typrelid, t.typtype, \
           (t.typcategory = 'A') AS is_array \
    FROM pg_catalog.pg_type t \
    WHERE t.oid = $1";

const RELATION_EXISTS_QUERY: &str = "\
    SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_class c WHERE c.oid = $1) AS found";

const ATTRIBUTES_QUERY: &str = "\
    SELECT a.attnum, a.atttypid, a.attcollation \
    FROM pg_catalog.pg_attribute a \
    WHERE a.attrelid = $1 AND NOT a.attisdropped \
    ORDER BY a.attnum";

const CONSTRAINT_QUERY: &str = "\
    SELECT c.conrelid, c.conbin::text AS conbin, c.conkey, \
           pg_catalog.array_ndims(c.conkey) AS conkey_ndims \
    FROM pg_catalog.pg_constraint c \
    WHERE c.oid = $1";

const INDEX_QUERY: &str = "\
    SELECT i.indrelid, i.indnkeyatts, i.indkey::int2[] AS indkey, \
           i.indcollation::oid[] AS indcollation, \
           i.indexprs::text AS indexprs, i.indpred::text AS indpred \
    FROM pg_catalog.pg_index i \
    WHERE i.indexrelid = $1";

const RANGE_QUERY: &str = "\
    SELECT r.rngcollation, r.rngsubtype \
    FROM pg_catalog.pg_range r \
    WHERE r.rngtypid = $1";

const MULTIRANGE_QUERY: &str = "\
    SELECT r.rngcollation, r.rngsubtype \
    FROM pg_catalog.pg_range r \
    WHERE r.rngmultitypid = $1";

const DEPENDENTS_QUERY: &str = "\
    SELECT d.objid, \
           (d.classid = 'pg_catalog.pg_constraint'::pg_catalog.regclass) AS is_constraint \
    FROM pg_catalog.pg_depend d \
    WHERE d.refclassid = 'pg_catalog.pg_type'::pg_catalog.regclass \
      AND d.refobjid = $1";

const MATVIEW_QUERY: &str = "\
    SELECT c.relname::text AS relname, c.relkind \
    FROM pg_catalog.pg_class c \
    WHERE c.oid = $1";

const RULES_QUERY: &str = "\
    SELECT r.ev_type, r.is_instead, r.ev_action::text AS ev_action \
    FROM pg_catalog.pg_rewrite r \
    WHERE r.ev_class = $1 \
    ORDER BY r.oid";

const COLLATION_QUERY: &str = "\
    SELECT c.collname::text AS collname, c.collprovider, c.collversion \
    FROM pg_catalog.pg_collation c \
    WHERE c.oid = $1";

/// Catalog accessor reading the live system catalogs through SPI
#[derive(Debug, Default, Clone, Copy)]
pub struct SpiCatalog;

impl SpiCatalog {
    pub fn new() -> Self {
        SpiCatalog
    }
}

fn spi_error(query: &str, e: pgrx::spi::Error) -> CollDepError {
    CollDepError::SpiError {
        query: query.to_string(),
        error: e.to_string(),
    }
}

/// Run `query` with a single OID parameter and map each row
fn select_rows<T>(
    query: &str,
    id: Oid,
    mut extract: impl FnMut(&SpiHeapTupleData<'_>) -> CollDepResult<T>,
) -> CollDepResult<Vec<T>> {
    Spi::connect(|client| {
        let rows = client
            .select(
                query,
                None,
                Some(vec![(PgOid::BuiltIn(PgBuiltInOids::OIDOID), id.into_datum())]),
            )
            .map_err(|e| spi_error(query, e))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(extract(&row)?);
        }
        Ok(result)
    })
}

fn select_one<T>(
    query: &str,
    id: Oid,
    extract: impl FnMut(&SpiHeapTupleData<'_>) -> CollDepResult<T>,
) -> CollDepResult<Option<T>> {
    Ok(select_rows(query, id, extract)?.into_iter().next())
}

fn column<T: FromDatum + IntoDatum>(
    row: &SpiHeapTupleData<'_>,
    name: &str,
) -> CollDepResult<Option<T>> {
    row[name].value::<T>().map_err(|e| CollDepError::SpiError {
        query: format!("extract column {name}"),
        error: e.to_string(),
    })
}

fn required<T: FromDatum + IntoDatum>(
    row: &SpiHeapTupleData<'_>,
    name: &str,
    object: &str,
) -> CollDepResult<T> {
    column(row, name)?
        .ok_or_else(|| CollDepError::corrupt(object, format!("{name} is NULL")))
}

#[allow(clippy::cast_sign_loss)]
fn char_column(row: &SpiHeapTupleData<'_>, name: &str, object: &str) -> CollDepResult<char> {
    required::<i8>(row, name, object).map(|c| c as u8 as char)
}

impl Catalog for SpiCatalog {
    fn lookup_type(&self, id: Oid) -> CollDepResult<TypeDescriptor> {
        debug1!("pg_collation_dependencies: lookup type {:?}", id);

        let object = format!("type {}", id.as_u32());
        select_one(TYPE_QUERY, id, |row| {
            let typtype = char_column(row, "typtype", &object)?;
            let is_array = column::<bool>(row, "is_array")?.unwrap_or(false);
            let kind = match typtype {
                'd' => TypeKind::Domain,
                'c' => TypeKind::Composite,
                'r' => TypeKind::Range,
                'm' => TypeKind::Multirange,
                _ if is_array => TypeKind::Array,
                _ => TypeKind::Scalar,
            };

            Ok(TypeDescriptor {
                id,
                declared_collation: required(row, "typcollation", &object)?,
                element_type: required(row, "typelem", &object)?,
                base_type: required(row, "typbasetype", &object)?,
                composite_relation: required(row, "typrelid", &object)?,
                kind,
            })
        })?
        .ok_or_else(|| CollDepError::not_found("type", id))
    }

    fn list_attributes(&self, relation_id: Oid) -> CollDepResult<Vec<AttributeDescriptor>> {
        debug1!("pg_collation_dependencies: list attributes of relation {:?}", relation_id);

        let exists = select_one(RELATION_EXISTS_QUERY, relation_id, |row| {
            Ok(column::<bool>(row, "found")?.unwrap_or(false))
        })?
        .unwrap_or(false);
        if !exists {
            return Err(CollDepError::not_found("relation", relation_id));
        }

        let object = format!("attributes of relation {}", relation_id.as_u32());
        select_rows(ATTRIBUTES_QUERY, relation_id, |row| {
            Ok(AttributeDescriptor {
                position: required(row, "attnum", &object)?,
                type_id: required(row, "atttypid", &object)?,
                explicit_collation: required(row, "attcollation", &object)?,
            })
        })
    }

    fn lookup_constraint(&self, id: Oid) -> CollDepResult<ConstraintDescriptor> {
        debug1!("pg_collation_dependencies: lookup constraint {:?}", id);

        let object = format!("constraint {}", id.as_u32());
        select_one(CONSTRAINT_QUERY, id, |row| {
            let keys = column::<Vec<Option<i16>>>(row, "conkey")?;
            let ndims = column::<i32>(row, "conkey_ndims")?;

            let key_attribute_positions = match (keys, ndims) {
                (None, _) => None,
                // Empty arrays have no dimensions at all
                (Some(keys), None) if keys.is_empty() => Some(Vec::new()),
                (Some(keys), Some(1)) => Some(
                    keys.into_iter()
                        .collect::<Option<Vec<i16>>>()
                        .ok_or_else(|| {
                            CollDepError::corrupt(&object, "conkey is not a 1-D smallint array")
                        })?,
                ),
                (Some(_), _) => {
                    return Err(CollDepError::corrupt(&object, "conkey is not a 1-D smallint array"));
                }
            };

            Ok(ConstraintDescriptor {
                id,
                owner_relation: column::<Oid>(row, "conrelid")?.unwrap_or(Oid::INVALID),
                serialized_expression: column::<String>(row, "conbin")?,
                key_attribute_positions,
            })
        })?
        .ok_or_else(|| CollDepError::not_found("constraint", id))
    }

    fn lookup_index(&self, id: Oid) -> CollDepResult<IndexDescriptor> {
        debug1!("pg_collation_dependencies: lookup index {:?}", id);

        let object = format!("index {}", id.as_u32());
        select_one(INDEX_QUERY, id, |row| {
            let key_count: i16 = required(row, "indnkeyatts", &object)?;
            let keys: Vec<Option<i16>> = required(row, "indkey", &object)?;
            let collations: Vec<Option<Oid>> = column(row, "indcollation")?.unwrap_or_default();

            let key_count = usize::try_from(key_count)
                .map_err(|_| CollDepError::corrupt(&object, "negative indnkeyatts"))?;
            if keys.len() < key_count {
                return Err(CollDepError::corrupt(
                    &object,
                    format!("indkey has {} entries, indnkeyatts is {}", keys.len(), key_count),
                ));
            }

            let key_columns = keys
                .into_iter()
                .take(key_count)
                .enumerate()
                .map(|(i, attnum)| {
                    let attnum = attnum
                        .ok_or_else(|| CollDepError::corrupt(&object, "indkey contains NULL"))?;
                    Ok(IndexKeyColumn {
                        attribute_position: (attnum != 0).then_some(attnum),
                        explicit_collation: collations
                            .get(i)
                            .copied()
                            .flatten()
                            .filter(|coll| *coll != Oid::INVALID),
                    })
                })
                .collect::<CollDepResult<Vec<_>>>()?;

            Ok(IndexDescriptor {
                id,
                base_relation: required(row, "indrelid", &object)?,
                key_columns,
                serialized_expressions: column(row, "indexprs")?,
                serialized_predicate: column(row, "indpred")?,
            })
        })?
        .ok_or_else(|| CollDepError::not_found("index", id))
    }

    fn lookup_range(&self, type_id: Oid, is_multirange: bool) -> CollDepResult<RangeDescriptor> {
        debug1!(
            "pg_collation_dependencies: lookup {} {:?}",
            if is_multirange { "multirange" } else { "range" },
            type_id
        );

        let query = if is_multirange { MULTIRANGE_QUERY } else { RANGE_QUERY };
        let object = format!("range {}", type_id.as_u32());
        select_one(query, type_id, |row| {
            Ok(RangeDescriptor {
                collation: required(row, "rngcollation", &object)?,
                subtype: required(row, "rngsubtype", &object)?,
            })
        })?
        .ok_or_else(|| CollDepError::not_found("range", type_id))
    }

    fn list_constraint_dependents(&self, type_id: Oid) -> CollDepResult<Vec<DependencyEdge>> {
        debug1!("pg_collation_dependencies: scan pg_depend for type {:?}", type_id);

        let object = format!("dependencies on type {}", type_id.as_u32());
        select_rows(DEPENDENTS_QUERY, type_id, |row| {
            let is_constraint = column::<bool>(row, "is_constraint")?.unwrap_or(false);
            Ok(DependencyEdge {
                referencing_class: if is_constraint {
                    ObjectClass::Constraint
                } else {
                    ObjectClass::Other
                },
                referencing_object: required(row, "objid", &object)?,
                referenced_object: type_id,
            })
        })
    }

    fn lookup_materialized_view(&self, id: Oid) -> CollDepResult<MaterializedViewDescriptor> {
        debug1!("pg_collation_dependencies: lookup materialized view {:?}", id);

        let object = format!("relation {}", id.as_u32());
        let name = select_one(MATVIEW_QUERY, id, |row| {
            let relkind = char_column(row, "relkind", &object)?;
            let name: String = required(row, "relname", &object)?;
            Ok((relkind == 'm').then_some(name))
        })?
        .flatten()
        .ok_or_else(|| CollDepError::not_found("materialized view", id))?;

        let object = format!("rules of materialized view \"{name}\"");
        let rules = select_rows(RULES_QUERY, id, |row| {
            let ev_type = char_column(row, "ev_type", &object)?;
            Ok(RewriteRule {
                event: RuleEvent::from_ev_type(ev_type).ok_or_else(|| {
                    CollDepError::corrupt(&object, format!("unknown ev_type '{ev_type}'"))
                })?,
                is_instead: required(row, "is_instead", &object)?,
                serialized_actions: required(row, "ev_action", &object)?,
            })
        })?;

        Ok(MaterializedViewDescriptor { id, name, rules })
    }

    fn lookup_collation(&self, id: Oid) -> CollDepResult<CollationInfo> {
        let object = format!("collation {}", id.as_u32());
        select_one(COLLATION_QUERY, id, |row| {
            let provider = match char_column(row, "collprovider", &object)? {
                'c' => "libc",
                'i' => "icu",
                'b' => "builtin",
                _ => "default",
            };
            Ok(CollationInfo {
                oid: id.as_u32(),
                name: required(row, "collname", &object)?,
                provider: provider.to_string(),
                version: column(row, "collversion")?,
            })
        })?
        .ok_or_else(|| CollDepError::not_found("collation", id))
    }

    fn lock_relation(&self, relation_id: Oid) -> CollDepResult<()> {
        debug1!("pg_collation_dependencies: AccessShareLock on {:?}", relation_id);
        unsafe {
            pg_sys::LockRelationOid(relation_id, pg_sys::AccessShareLock as pg_sys::LOCKMODE);
        }
        Ok(())
    }

    fn unlock_relation(&self, relation_id: Oid) {
        unsafe {
            pg_sys::UnlockRelationOid(relation_id, pg_sys::AccessShareLock as pg_sys::LOCKMODE);
        }
    }

    fn check_stack(&self) -> CollDepResult<()> {
        if unsafe { pg_sys::stack_is_too_deep() } {
            return Err(CollDepError::StackDepthExceeded {
                context: "resolving collation dependencies (see max_stack_depth)".to_string(),
            });
        }
        Ok(())
    }
}
