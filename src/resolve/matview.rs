//! Materialized view resolution

use pgrx::pg_sys::Oid;

use super::{CollationList, Resolver};
use crate::catalog::{Catalog, MaterializedViewDescriptor, RelationLock, RuleEvent};
use crate::error::{CollDepError, CollDepResult};
use crate::node::Node;

impl<C: Catalog + ?Sized> Resolver<'_, C> {
    /// Collation dependencies of a materialized view's defining query
    pub fn matview_dependencies(&mut self, matview_id: Oid) -> CollDepResult<Vec<Oid>> {
        let catalog = self.catalog;
        let _lock = RelationLock::acquire(catalog, matview_id)?;
        let view = catalog.lookup_materialized_view(matview_id)?;
        let query = defining_query(catalog, &view)?;

        let mut collations = CollationList::new();
        self.walk(&query, &mut collations)?;
        Ok(collations.normalize())
    }
}

/// The single SELECT INSTEAD action every materialized view carries
fn defining_query<C: Catalog + ?Sized>(catalog: &C, view: &MaterializedViewDescriptor) -> CollDepResult<Node> {
    let object = format!("materialized view \"{}\"", view.name);

    let rule = match view.rules.as_slice() {
        [] => return Err(CollDepError::corrupt(&object, "missing rewrite information")),
        [rule] => rule,
        _ => return Err(CollDepError::corrupt(&object, "has too many rules")),
    };

    if rule.event != RuleEvent::Select || !rule.is_instead {
        return Err(CollDepError::corrupt(&object, "the rule is not a SELECT INSTEAD OF rule"));
    }

    let actions = catalog.parse_serialized_expression(&rule.serialized_actions)?;
    let mut actions = if actions.is_list() { actions.children } else { vec![actions] };
    if actions.len() != 1 {
        return Err(CollDepError::corrupt(&object, "the rule is not a single action"));
    }

    match actions.pop() {
        Some(query) if query.is_query() => Ok(query),
        _ => Err(CollDepError::corrupt(&object, "the rule action is not a query")),
    }
}

#[cfg(test)]
mod tests {
    use pgrx::pg_sys::Oid;

    use crate::catalog::fixture::{oid, select_instead, FixtureCatalog, LockEvent};
    use crate::catalog::{RewriteRule, RuleEvent};
    use crate::config::ResolveOptions;
    use crate::error::testing::{assert_error_contains, assert_error_sqlstate};
    use crate::resolve::Resolver;

    const VIEW: u32 = 19000;

    /// `SELECT a FROM t` where `a` is `text COLLATE "C"`
    const SELECT_A: &str = "({QUERY :commandType 1 :querySource 0 :canSetTag true \
        :utilityStmt <> :resultRelation 0 :hasAggs false :cteList <> \
        :rtable ({RANGETBLENTRY :alias <> :eref {ALIAS :aliasname t :colnames (\"a\" \"b\")} \
        :rtekind 0 :relid 16400 :relkind r :rellockmode 1 :tablesample <> :perminfoindex 1 \
        :lateral false :inh true :inFromCl true :securityQuals <>}) \
        :rteperminfos <> \
        :jointree {FROMEXPR :fromlist ({RANGETBLREF :rtindex 1}) :quals <>} \
        :mergeActionList <> :targetList ({TARGETENTRY :expr {VAR :varno 1 :varattno 1 \
        :vartype 25 :vartypmod -1 :varcollid 950 :varnullingrels (b) :varlevelsup 0} \
        :resno 1 :resname a :ressortgroupref 0 :resorigtbl 16400 :resorigcol 1 :resjunk false}) \
        :override 0 :onConflict <> :returningList <> :groupClause <> :groupDistinct false \
        :groupingSets <> :havingQual <> :windowClause <> :distinctClause <> :sortClause <> \
        :limitOffset <> :limitCount <> :limitOption 0 :rowMarks <> :setOperations <> \
        :constraintDeps <> :withCheckOptions <> :stmt_location 0 :stmt_len 0})";

    /// `SELECT 1 AS x`
    const SELECT_ONE: &str = "({QUERY :commandType 1 :rtable <> \
        :jointree {FROMEXPR :fromlist <> :quals <>} \
        :targetList ({TARGETENTRY :expr {CONST :consttype 23 :consttypmod -1 :constcollid 0 \
        :constlen 4 :constbyval true :constisnull false :location 7 :constvalue 4 [ 1 0 0 0 ]} \
        :resno 1 :resname x :resjunk false})})";

    fn oids(values: &[u32]) -> Vec<Oid> {
        values.iter().copied().map(oid).collect()
    }

    fn catalog() -> FixtureCatalog {
        let mut catalog = FixtureCatalog::new();
        catalog.scalar(23, 0).scalar(25, 100);
        catalog
    }

    fn resolve(catalog: &FixtureCatalog) -> crate::CollDepResult<Vec<Oid>> {
        Resolver::new(catalog, ResolveOptions::default()).matview_dependencies(oid(VIEW))
    }

    #[test]
    fn test_defining_query_is_walked() {
        let mut catalog = catalog();
        catalog.matview(VIEW, vec![select_instead(SELECT_A)]);

        assert_eq!(resolve(&catalog).unwrap(), oids(&[100, 950]));
        assert_eq!(
            catalog.lock_events(),
            vec![LockEvent::Lock(oid(VIEW)), LockEvent::Unlock(oid(VIEW))]
        );
    }

    #[test]
    fn test_non_collatable_query_is_empty() {
        let mut catalog = catalog();
        catalog.matview(VIEW, vec![select_instead(SELECT_ONE)]);

        assert!(resolve(&catalog).unwrap().is_empty());
    }

    #[test]
    fn test_not_a_matview_is_not_found() {
        let catalog = catalog();

        assert_error_sqlstate(resolve(&catalog), "42704");
        assert!(catalog.locks_balanced());
    }

    #[test]
    fn test_missing_rule_is_corrupt() {
        let mut catalog = catalog();
        catalog.matview(VIEW, Vec::new());

        assert_error_contains(resolve(&catalog), "missing rewrite information");
        assert!(catalog.locks_balanced());
    }

    #[test]
    fn test_too_many_rules_is_corrupt() {
        let mut catalog = catalog();
        catalog.matview(VIEW, vec![select_instead(SELECT_ONE), select_instead(SELECT_ONE)]);

        assert_error_contains(resolve(&catalog), "too many rules");
    }

    #[test]
    fn test_non_select_rule_is_corrupt() {
        let mut catalog = catalog();
        catalog.matview(
            VIEW,
            vec![RewriteRule {
                event: RuleEvent::Update,
                is_instead: true,
                serialized_actions: SELECT_ONE.to_string(),
            }],
        );

        assert_error_contains(resolve(&catalog), "not a SELECT INSTEAD OF rule");
    }

    #[test]
    fn test_non_instead_rule_is_corrupt() {
        let mut catalog = catalog();
        catalog.matview(
            VIEW,
            vec![RewriteRule {
                event: RuleEvent::Select,
                is_instead: false,
                serialized_actions: SELECT_ONE.to_string(),
            }],
        );

        assert_error_sqlstate(resolve(&catalog), "XX001");
    }

    #[test]
    fn test_multiple_actions_are_corrupt() {
        let mut catalog = catalog();
        let actions = format!("{} {}", &SELECT_ONE[..SELECT_ONE.len() - 1], &SELECT_ONE[1..]);
        catalog.matview(VIEW, vec![select_instead(&actions)]);

        assert_error_contains(resolve(&catalog), "not a single action");
    }

    #[test]
    fn test_empty_actions_are_corrupt() {
        let mut catalog = catalog();
        catalog.matview(VIEW, vec![select_instead("<>")]);

        assert_error_contains(resolve(&catalog), "not a single action");
    }
}
