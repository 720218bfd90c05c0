//! Expression walker
//!
//! Every node contributes the collations it carries directly plus those
//! reachable from the types it names, then its children are walked.

use pgrx::pg_sys::Oid;

use super::{CollationList, Resolver};
use crate::catalog::Catalog;
use crate::error::{CollDepError, CollDepResult};
use crate::node::{Node, NodeKind, RECORD_TYPE_OID};

impl<C: Catalog + ?Sized> Resolver<'_, C> {
    /// Collations referenced anywhere in an expression or query tree
    pub fn expression_collations(&mut self, node: &Node) -> CollDepResult<CollationList> {
        let mut collations = CollationList::new();
        self.walk(node, &mut collations)?;
        Ok(collations)
    }

    pub(crate) fn walk(&mut self, node: &Node, collations: &mut CollationList) -> CollDepResult<()> {
        // Lists cost no level: a chain of operators is one level per operator
        if node.is_list() {
            for item in &node.children {
                self.walk(item, collations)?;
            }
            return Ok(());
        }
        self.descend(|resolver| resolver.visit(node, collations))
    }

    fn visit(&mut self, node: &Node, collations: &mut CollationList) -> CollDepResult<()> {
        match &node.kind {
            NodeKind::Var { collation, type_id }
            | NodeKind::Const { collation, type_id }
            | NodeKind::Param { collation, type_id } => {
                collations.push(*collation);
                self.add_type_collations(*type_id, collations)?;
            }
            NodeKind::SubscriptingRef {
                collation,
                container_type,
                element_type,
                result_type,
            } => {
                collations.push(*collation);
                for type_id in [*container_type, *element_type, *result_type] {
                    self.add_type_collations(type_id, collations)?;
                }
            }
            NodeKind::FuncExpr {
                result_collation,
                input_collation,
                result_type,
            }
            | NodeKind::OpExpr {
                result_collation,
                input_collation,
                result_type,
                ..
            }
            | NodeKind::MinMaxExpr {
                result_collation,
                input_collation,
                result_type,
            }
            | NodeKind::Aggref {
                result_collation,
                input_collation,
                result_type,
            }
            | NodeKind::WindowFunc {
                result_collation,
                input_collation,
                result_type,
            } => {
                collations.push(*result_collation);
                collations.push(*input_collation);
                self.add_type_collations(*result_type, collations)?;
            }
            NodeKind::ScalarArrayOpExpr { input_collation } => {
                collations.push(*input_collation);
            }
            NodeKind::FieldSelect {
                result_collation,
                result_type,
            }
            | NodeKind::RelabelType {
                result_collation,
                result_type,
            }
            | NodeKind::CoerceViaIo {
                result_collation,
                result_type,
            }
            | NodeKind::ArrayCoerceExpr {
                result_collation,
                result_type,
            }
            | NodeKind::CoerceToDomainValue {
                result_collation,
                result_type,
            }
            | NodeKind::CaseExpr {
                result_collation,
                result_type,
            }
            | NodeKind::CoalesceExpr {
                result_collation,
                result_type,
            } => {
                collations.push(*result_collation);
                self.add_type_collations(*result_type, collations)?;
            }
            NodeKind::ConvertRowtypeExpr { result_type } | NodeKind::SqlValueFunction { result_type } => {
                self.add_type_collations(*result_type, collations)?;
            }
            NodeKind::CollateExpr { collation } | NodeKind::CaseTestExpr { collation } => {
                collations.push(*collation);
            }
            NodeKind::ArrayExpr {
                array_collation,
                array_type,
            } => {
                collations.push(*array_collation);
                self.add_type_collations(*array_type, collations)?;
            }
            NodeKind::RowExpr { row_type } => {
                // Anonymous records have no catalog entry to resolve
                if row_type.as_u32() != RECORD_TYPE_OID {
                    self.add_type_collations(*row_type, collations)?;
                }
            }
            NodeKind::RowCompareExpr { input_collations } => {
                for collation in input_collations {
                    collations.push(*collation);
                }
            }
            NodeKind::CoerceToDomain {
                result_collation,
                result_type,
            } => {
                collations.push(*result_collation);
                self.add_type_collations(*result_type, collations)?;

                // A bare column or literal under the coercion cannot influence the result
                let direct_argument = node
                    .children
                    .first()
                    .is_some_and(|arg| matches!(arg.kind, NodeKind::Var { .. } | NodeKind::Const { .. }));
                if direct_argument {
                    return Ok(());
                }
            }
            NodeKind::TableFunc {
                column_collations,
                column_types,
            }
            | NodeKind::RangeTblFunction {
                column_collations,
                column_types,
            }
            | NodeKind::SetOperationStmt {
                column_collations,
                column_types,
            }
            | NodeKind::CommonTableExpr {
                column_collations,
                column_types,
            } => {
                for collation in column_collations {
                    collations.push(*collation);
                }
                for type_id in column_types {
                    self.add_type_collations(*type_id, collations)?;
                }
            }
            NodeKind::Query | NodeKind::Structural(_) => {}
            NodeKind::Unsupported { tag } => {
                return Err(CollDepError::UnsupportedConstruct { node: tag.clone() });
            }
        }

        for child in &node.children {
            self.walk(child, collations)?;
        }
        Ok(())
    }

    /// Append a type's collations; an invalid type reference contributes nothing
    fn add_type_collations(&mut self, type_id: Oid, collations: &mut CollationList) -> CollDepResult<()> {
        if type_id != Oid::INVALID {
            collations.append(self.type_collations(type_id)?);
        }
        Ok(())
    }
}
