//! Lowering of generic node trees into typed [`Node`]s
//!
//! For each known tag this keeps the collation and type fields the walker
//! reads, and collects as children exactly the fields PostgreSQL's
//! `expression_tree_walker()` / `query_tree_walker()` would descend into.
//! Range table entries are not nodes of their own: their contents are hoisted
//! into the owning query, the way `range_table_walker()` visits them.

use pgrx::pg_sys::Oid;

use super::read::{RawNode, RawValue};
use super::{NestingGuard, Node, NodeKind, StructuralKind};
use crate::error::{CollDepError, CollDepResult};

/// Query fields visited by the query walker
const QUERY_CHILDREN: &[&str] = &[
    "targetList",
    "withCheckOptions",
    "onConflict",
    "mergeActionList",
    "returningList",
    "jointree",
    "setOperations",
    "havingQual",
    "limitOffset",
    "limitCount",
    "cteList",
];

/// Range table entry fields holding expressions or sub-queries
const RTE_CHILDREN: &[&str] = &[
    "tablesample",
    "subquery",
    "joinaliasvars",
    "functions",
    "tablefunc",
    "values_lists",
    "securityQuals",
];

/// Lower a read tree; every nested node or list is charged to `guard`
pub fn lower(value: &RawValue, guard: &mut NestingGuard<'_>) -> CollDepResult<Node> {
    match lower_value(value, guard)? {
        Some(node) => Ok(node),
        // NULL or scalar-only trees hold nothing to walk
        None => Ok(Node::list(Vec::new())),
    }
}

fn lower_value(value: &RawValue, guard: &mut NestingGuard<'_>) -> CollDepResult<Option<Node>> {
    match value {
        RawValue::Node(node) => guard.nested(|guard| lower_node(node, guard)).map(Some),
        RawValue::List(items) => guard
            .nested(|guard| lower_items(items, guard))
            .map(|children| Some(Node::list(children))),
        // Integer/String value nodes and NULL entries
        _ => Ok(None),
    }
}

fn lower_items(items: &[RawValue], guard: &mut NestingGuard<'_>) -> CollDepResult<Vec<Node>> {
    let mut nodes = Vec::with_capacity(items.len());
    for item in items {
        if let Some(node) = lower_value(item, guard)? {
            nodes.push(node);
        }
    }
    Ok(nodes)
}

fn lower_node(node: &RawNode, guard: &mut NestingGuard<'_>) -> CollDepResult<Node> {
    let kind = match node.tag.as_str() {
        "VAR" => NodeKind::Var {
            collation: oid(node, "varcollid")?,
            type_id: oid(node, "vartype")?,
        },
        "CONST" => NodeKind::Const {
            collation: oid(node, "constcollid")?,
            type_id: oid(node, "consttype")?,
        },
        "PARAM" => NodeKind::Param {
            collation: oid(node, "paramcollid")?,
            type_id: oid(node, "paramtype")?,
        },
        "SUBSCRIPTINGREF" => NodeKind::SubscriptingRef {
            collation: oid(node, "refcollid")?,
            container_type: oid(node, "refcontainertype")?,
            element_type: oid(node, "refelemtype")?,
            result_type: oid(node, "refrestype")?,
        },
        "FUNCEXPR" => NodeKind::FuncExpr {
            result_collation: oid(node, "funccollid")?,
            input_collation: oid(node, "inputcollid")?,
            result_type: oid(node, "funcresulttype")?,
        },
        "OPEXPR" | "DISTINCTEXPR" | "NULLIFEXPR" => NodeKind::OpExpr {
            result_collation: oid(node, "opcollid")?,
            input_collation: oid(node, "inputcollid")?,
            result_type: oid(node, "opresulttype")?,
        },
        "SCALARARRAYOPEXPR" => NodeKind::ScalarArrayOpExpr {
            input_collation: oid(node, "inputcollid")?,
        },
        "FIELDSELECT" => NodeKind::FieldSelect {
            result_collation: oid(node, "resultcollid")?,
            result_type: oid(node, "resulttype")?,
        },
        "RELABELTYPE" => NodeKind::RelabelType {
            result_collation: oid(node, "resultcollid")?,
            result_type: oid(node, "resulttype")?,
        },
        "COERCEVIAIO" => NodeKind::CoerceViaIo {
            result_collation: oid(node, "resultcollid")?,
            result_type: oid(node, "resulttype")?,
        },
        "ARRAYCOERCEEXPR" => NodeKind::ArrayCoerceExpr {
            result_collation: oid(node, "resultcollid")?,
            result_type: oid(node, "resulttype")?,
        },
        "COERCETODOMAINVALUE" => NodeKind::CoerceToDomainValue {
            result_collation: oid(node, "collation")?,
            result_type: oid(node, "typeId")?,
        },
        "CONVERTROWTYPEEXPR" => NodeKind::ConvertRowtypeExpr {
            result_type: oid(node, "resulttype")?,
        },
        "COLLATEEXPR" => NodeKind::CollateExpr {
            collation: oid(node, "collOid")?,
        },
        "CASEEXPR" => NodeKind::CaseExpr {
            result_collation: oid(node, "casecollid")?,
            result_type: oid(node, "casetype")?,
        },
        "CASETESTEXPR" => NodeKind::CaseTestExpr {
            collation: oid(node, "collation")?,
        },
        "ARRAYEXPR" | "ARRAY" => NodeKind::ArrayExpr {
            array_collation: oid(node, "array_collid")?,
            array_type: oid(node, "array_typeid")?,
        },
        "ROWEXPR" | "ROW" => NodeKind::RowExpr {
            row_type: oid(node, "row_typeid")?,
        },
        "ROWCOMPAREEXPR" | "ROWCOMPARE" => NodeKind::RowCompareExpr {
            input_collations: oid_list(node, "inputcollids")?,
        },
        "COALESCEEXPR" | "COALESCE" => NodeKind::CoalesceExpr {
            result_collation: oid(node, "coalescecollid")?,
            result_type: oid(node, "coalescetype")?,
        },
        "MINMAXEXPR" | "MINMAX" => NodeKind::MinMaxExpr {
            result_collation: oid(node, "minmaxcollid")?,
            input_collation: oid(node, "inputcollid")?,
            result_type: oid(node, "minmaxtype")?,
        },
        "SQLVALUEFUNCTION" => NodeKind::SqlValueFunction {
            result_type: oid(node, "type")?,
        },
        "COERCETODOMAIN" => NodeKind::CoerceToDomain {
            result_collation: oid(node, "resultcollid")?,
            result_type: oid(node, "resulttype")?,
        },
        "AGGREF" => NodeKind::Aggref {
            result_collation: oid(node, "aggcollid")?,
            input_collation: oid(node, "inputcollid")?,
            result_type: oid(node, "aggtype")?,
        },
        "WINDOWFUNC" => NodeKind::WindowFunc {
            result_collation: oid(node, "wincollid")?,
            input_collation: oid(node, "inputcollid")?,
            result_type: oid(node, "wintype")?,
        },
        "TABLEFUNC" => NodeKind::TableFunc {
            column_collations: oid_list(node, "colcollations")?,
            column_types: oid_list(node, "coltypes")?,
        },
        "RANGETBLFUNCTION" => NodeKind::RangeTblFunction {
            column_collations: oid_list(node, "funccolcollations")?,
            column_types: oid_list(node, "funccoltypes")?,
        },
        "SETOPERATIONSTMT" => NodeKind::SetOperationStmt {
            column_collations: oid_list(node, "colCollations")?,
            column_types: oid_list(node, "colTypes")?,
        },
        "COMMONTABLEEXPR" => NodeKind::CommonTableExpr {
            column_collations: oid_list(node, "ctecolcollations")?,
            column_types: oid_list(node, "ctecoltypes")?,
        },
        "QUERY" => return lower_query(node, guard),
        "JOINEXPR" => NodeKind::Structural(StructuralKind::JoinExpr),
        "FROMEXPR" => NodeKind::Structural(StructuralKind::FromExpr),
        "RANGETBLREF" => NodeKind::Structural(StructuralKind::RangeTblRef),
        "SORTGROUPCLAUSE" => NodeKind::Structural(StructuralKind::SortGroupClause),
        "SUBLINK" => NodeKind::Structural(StructuralKind::SubLink),
        "TABLESAMPLECLAUSE" => NodeKind::Structural(StructuralKind::TableSampleClause),
        "TARGETENTRY" => NodeKind::Structural(StructuralKind::TargetEntry),
        "ALIAS" => NodeKind::Structural(StructuralKind::Alias),
        "RANGEVAR" => NodeKind::Structural(StructuralKind::RangeVar),
        "INTOCLAUSE" => NodeKind::Structural(StructuralKind::IntoClause),
        "NAMEDARGEXPR" => NodeKind::Structural(StructuralKind::NamedArgExpr),
        "BOOLEXPR" => NodeKind::Structural(StructuralKind::BoolExpr),
        "CASEWHEN" | "WHEN" => NodeKind::Structural(StructuralKind::CaseWhen),
        "XMLEXPR" => NodeKind::Structural(StructuralKind::XmlExpr),
        "NULLTEST" => NodeKind::Structural(StructuralKind::NullTest),
        "BOOLEANTEST" => NodeKind::Structural(StructuralKind::BooleanTest),
        other => {
            return Ok(Node::leaf(NodeKind::Unsupported {
                tag: other.to_string(),
            }))
        }
    };

    let children = lower_fields(node, child_fields(&kind), guard)?;
    Ok(Node::with_children(kind, children))
}

/// Fields of a known node that hold walkable sub-expressions
fn child_fields(kind: &NodeKind) -> &'static [&'static str] {
    use StructuralKind as S;
    match kind {
        NodeKind::SubscriptingRef { .. } => {
            &["refupperindexpr", "reflowerindexpr", "refexpr", "refassgnexpr"]
        }
        NodeKind::FuncExpr { .. }
        | NodeKind::OpExpr { .. }
        | NodeKind::ScalarArrayOpExpr { .. }
        | NodeKind::RowExpr { .. }
        | NodeKind::CoalesceExpr { .. }
        | NodeKind::MinMaxExpr { .. }
        | NodeKind::Structural(S::BoolExpr) => &["args"],
        NodeKind::FieldSelect { .. }
        | NodeKind::RelabelType { .. }
        | NodeKind::CoerceViaIo { .. }
        | NodeKind::ConvertRowtypeExpr { .. }
        | NodeKind::CollateExpr { .. }
        | NodeKind::CoerceToDomain { .. }
        | NodeKind::Structural(S::NullTest | S::BooleanTest | S::NamedArgExpr) => &["arg"],
        NodeKind::ArrayCoerceExpr { .. } => &["arg", "elemexpr"],
        NodeKind::CaseExpr { .. } => &["arg", "args", "defresult"],
        NodeKind::ArrayExpr { .. } => &["elements"],
        NodeKind::RowCompareExpr { .. } => &["largs", "rargs"],
        NodeKind::Aggref { .. } => &["aggdirectargs", "args", "aggorder", "aggdistinct", "aggfilter"],
        NodeKind::WindowFunc { .. } => &["args", "aggfilter", "runCondition"],
        NodeKind::TableFunc { .. } => &[
            "ns_uris",
            "docexpr",
            "rowexpr",
            "colexprs",
            "coldefexprs",
            "colvalexprs",
            "passingvalexprs",
        ],
        NodeKind::RangeTblFunction { .. } => &["funcexpr"],
        NodeKind::SetOperationStmt { .. } => &["larg", "rarg"],
        NodeKind::CommonTableExpr { .. } => &["ctequery"],
        NodeKind::Structural(S::JoinExpr) => &["larg", "rarg", "quals"],
        NodeKind::Structural(S::FromExpr) => &["fromlist", "quals"],
        NodeKind::Structural(S::SubLink) => &["testexpr", "subselect"],
        NodeKind::Structural(S::TableSampleClause) => &["args", "repeatable"],
        NodeKind::Structural(S::TargetEntry) => &["expr"],
        NodeKind::Structural(S::CaseWhen) => &["expr", "result"],
        NodeKind::Structural(S::XmlExpr) => &["named_args", "args"],
        NodeKind::Var { .. }
        | NodeKind::Const { .. }
        | NodeKind::Param { .. }
        | NodeKind::CoerceToDomainValue { .. }
        | NodeKind::CaseTestExpr { .. }
        | NodeKind::SqlValueFunction { .. }
        | NodeKind::Query
        | NodeKind::Structural(
            S::RangeTblRef | S::SortGroupClause | S::Alias | S::RangeVar | S::IntoClause | S::List,
        )
        | NodeKind::Unsupported { .. } => &[],
    }
}

fn lower_query(node: &RawNode, guard: &mut NestingGuard<'_>) -> CollDepResult<Node> {
    let mut children = lower_fields(node, QUERY_CHILDREN, guard)?;

    // Only frame offsets of window clauses are expressions worth walking
    if let Some(RawValue::List(clauses)) = node.field("windowClause") {
        for clause in clauses {
            if let RawValue::Node(clause) = clause {
                children.extend(lower_fields(clause, &["startOffset", "endOffset"], guard)?);
            }
        }
    }

    match node.field("rtable") {
        Some(RawValue::List(entries)) => {
            for entry in entries {
                match entry {
                    RawValue::Node(rte) if rte.tag == "RANGETBLENTRY" || rte.tag == "RTE" => {
                        children.extend(lower_fields(rte, RTE_CHILDREN, guard)?);
                    }
                    RawValue::Node(other) => {
                        return Err(CollDepError::corrupt(
                            "serialized query",
                            format!("unexpected {} in range table", other.tag),
                        ));
                    }
                    _ => {}
                }
            }
        }
        None | Some(RawValue::Null) => {}
        Some(_) => {
            return Err(CollDepError::corrupt("serialized query", "range table is not a list"));
        }
    }

    Ok(Node::with_children(NodeKind::Query, children))
}

fn lower_fields(
    node: &RawNode,
    fields: &[&str],
    guard: &mut NestingGuard<'_>,
) -> CollDepResult<Vec<Node>> {
    let mut children = Vec::new();
    for name in fields {
        if let Some(value) = node.field(name) {
            children.extend(lower_value(value, guard)?);
        }
    }
    Ok(children)
}

fn parse_oid(node: &RawNode, field: &str, token: &str) -> CollDepResult<Oid> {
    token.parse::<u32>().map(Oid::from).map_err(|_| {
        CollDepError::corrupt(
            "serialized expression",
            format!("{}.{} is not an OID: {}", node.tag, field, token),
        )
    })
}

/// Read an OID field; absent or NULL means invalid
fn oid(node: &RawNode, field: &str) -> CollDepResult<Oid> {
    match node.field(field) {
        None | Some(RawValue::Null) => Ok(Oid::INVALID),
        Some(RawValue::Token(token)) => parse_oid(node, field, token),
        Some(other) => Err(CollDepError::corrupt(
            "serialized expression",
            format!("{}.{} is not an OID: {:?}", node.tag, field, other),
        )),
    }
}

/// Read an OID list field; absent or NULL means empty
fn oid_list(node: &RawNode, field: &str) -> CollDepResult<Vec<Oid>> {
    match node.field(field) {
        None | Some(RawValue::Null) => Ok(Vec::new()),
        Some(RawValue::OidList(oids)) => Ok(oids.iter().copied().map(Oid::from).collect()),
        // Older writers emit plain lists of integer nodes
        Some(RawValue::List(items)) => items
            .iter()
            .map(|item| match item {
                RawValue::Token(token) => parse_oid(node, field, token),
                other => Err(CollDepError::corrupt(
                    "serialized expression",
                    format!("{}.{} holds a non-OID entry: {:?}", node.tag, field, other),
                )),
            })
            .collect(),
        Some(other) => Err(CollDepError::corrupt(
            "serialized expression",
            format!("{}.{} is not an OID list: {:?}", node.tag, field, other),
        )),
    }
}
