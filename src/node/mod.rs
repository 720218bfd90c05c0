//! Typed expression and query trees
//!
//! Serialized node trees are read into a generic shape by [`read`] and then
//! lowered into [`Node`] by [`lower`]. `NodeKind` is a closed sum type: every
//! node shape the collation walker understands has its own variant carrying
//! just the collation and type references it needs, and everything else
//! becomes [`NodeKind::Unsupported`] so the walker can refuse it loudly.

use pgrx::pg_sys::Oid;

use crate::error::{CollDepError, CollDepResult};

pub mod lower;
pub mod read;

/// OID of the anonymous `record` pseudo-type
pub const RECORD_TYPE_OID: u32 = 2249;

/// Deepest nesting of nodes and lists the reader and the lowering accept
pub const MAX_NESTING_DEPTH: usize = 4000;

/// Nesting bound shared by the reader and the lowering
///
/// Each nested node or list costs one level, and every level first asks the
/// host whether enough native stack is left.
pub struct NestingGuard<'s> {
    depth: usize,
    check_stack: &'s dyn Fn() -> CollDepResult<()>,
}

impl<'s> NestingGuard<'s> {
    pub fn new(check_stack: &'s dyn Fn() -> CollDepResult<()>) -> Self {
        Self { depth: 0, check_stack }
    }

    pub(crate) fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> CollDepResult<T>,
    ) -> CollDepResult<T> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(CollDepError::StackDepthExceeded {
                context: format!("reading an expression nested deeper than {MAX_NESTING_DEPTH} levels"),
            });
        }
        (self.check_stack)()?;

        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }
}

pub(crate) fn no_stack_check() -> CollDepResult<()> {
    Ok(())
}

/// A lowered node and the structural children the tree walkers visit
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub children: Vec<Node>,
}

impl Node {
    pub fn leaf(kind: NodeKind) -> Self {
        Self { kind, children: Vec::new() }
    }

    pub fn with_children(kind: NodeKind, children: Vec<Node>) -> Self {
        Self { kind, children }
    }

    pub fn list(children: Vec<Node>) -> Self {
        Self::with_children(NodeKind::Structural(StructuralKind::List), children)
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, NodeKind::Structural(StructuralKind::List))
    }

    pub fn is_query(&self) -> bool {
        matches!(self.kind, NodeKind::Query)
    }
}

/// Nodes that carry no collation themselves; only their children matter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralKind {
    JoinExpr,
    FromExpr,
    RangeTblRef,
    SortGroupClause,
    SubLink,
    TableSampleClause,
    TargetEntry,
    Alias,
    RangeVar,
    IntoClause,
    NamedArgExpr,
    BoolExpr,
    CaseWhen,
    XmlExpr,
    NullTest,
    BooleanTest,
    List,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Var {
        collation: Oid,
        type_id: Oid,
    },
    Const {
        collation: Oid,
        type_id: Oid,
    },
    Param {
        collation: Oid,
        type_id: Oid,
    },
    /// Array (or other container) subscripting
    SubscriptingRef {
        collation: Oid,
        container_type: Oid,
        element_type: Oid,
        result_type: Oid,
    },
    FuncExpr {
        result_collation: Oid,
        input_collation: Oid,
        result_type: Oid,
    },
    /// Also `DISTINCT` and `NULLIF`, which share the operator layout
    OpExpr {
        result_collation: Oid,
        input_collation: Oid,
        result_type: Oid,
    },
    ScalarArrayOpExpr {
        input_collation: Oid,
    },
    FieldSelect {
        result_collation: Oid,
        result_type: Oid,
    },
    RelabelType {
        result_collation: Oid,
        result_type: Oid,
    },
    CoerceViaIo {
        result_collation: Oid,
        result_type: Oid,
    },
    ArrayCoerceExpr {
        result_collation: Oid,
        result_type: Oid,
    },
    CoerceToDomainValue {
        result_collation: Oid,
        result_type: Oid,
    },
    ConvertRowtypeExpr {
        result_type: Oid,
    },
    /// Explicit `COLLATE` clause
    CollateExpr {
        collation: Oid,
    },
    CaseExpr {
        result_collation: Oid,
        result_type: Oid,
    },
    CaseTestExpr {
        collation: Oid,
    },
    ArrayExpr {
        array_collation: Oid,
        array_type: Oid,
    },
    RowExpr {
        row_type: Oid,
    },
    RowCompareExpr {
        input_collations: Vec<Oid>,
    },
    CoalesceExpr {
        result_collation: Oid,
        result_type: Oid,
    },
    MinMaxExpr {
        result_collation: Oid,
        input_collation: Oid,
        result_type: Oid,
    },
    SqlValueFunction {
        result_type: Oid,
    },
    /// First child, when present, is the coerced argument
    CoerceToDomain {
        result_collation: Oid,
        result_type: Oid,
    },
    Aggref {
        result_collation: Oid,
        input_collation: Oid,
        result_type: Oid,
    },
    WindowFunc {
        result_collation: Oid,
        input_collation: Oid,
        result_type: Oid,
    },
    TableFunc {
        column_collations: Vec<Oid>,
        column_types: Vec<Oid>,
    },
    RangeTblFunction {
        column_collations: Vec<Oid>,
        column_types: Vec<Oid>,
    },
    SetOperationStmt {
        column_collations: Vec<Oid>,
        column_types: Vec<Oid>,
    },
    CommonTableExpr {
        column_collations: Vec<Oid>,
        column_types: Vec<Oid>,
    },
    /// Nested query; children are its walked clauses and range table contents
    Query,
    Structural(StructuralKind),
    /// Node tag the walker does not know how to interpret
    Unsupported {
        tag: String,
    },
}

/// Parse a serialized node tree (`pg_node_tree` text) into a [`Node`]
///
/// Only the fixed nesting bound applies; see [`parse_node_tree_with`].
pub fn parse_node_tree(text: &str) -> CollDepResult<Node> {
    parse_node_tree_with(text, &no_stack_check)
}

/// Parse a serialized node tree, calling `check_stack` at every nesting level
pub fn parse_node_tree_with(
    text: &str,
    check_stack: &dyn Fn() -> CollDepResult<()>,
) -> CollDepResult<Node> {
    let mut guard = NestingGuard::new(check_stack);
    let raw = read::read_node_tree_guarded(text, &mut guard)?;
    lower::lower(&raw, &mut guard)
}
