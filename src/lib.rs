use pgrx::prelude::*;
use pgrx::JsonB;

pub mod catalog;
pub mod config;
pub mod error;
pub mod node;
pub mod report;
pub mod resolve;

pub use error::{CollDepError, CollDepResult};

use catalog::spi::SpiCatalog;
use config::ResolveOptions;
use report::DependencyReport;
use resolve::DependentKind;

pg_module_magic!();

/// Initialize the extension
#[pg_guard]
extern "C" fn _PG_init() {
    config::register_gucs();
    pgrx::log!("pg_collation_dependencies: loaded, GUCs registered");
}

/// Get the version of the pg_collation_dependencies extension
#[pg_extern]
fn pg_collation_dependencies_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Collations a constraint's expression and key columns depend on
#[pg_extern]
fn pg_collation_constraint_dependencies(
    constraint_oid: pg_sys::Oid,
) -> TableIterator<'static, (name!(collid, pg_sys::Oid),)> {
    collation_rows(DependentKind::Constraint, constraint_oid)
}

/// Collations an index's key columns, expressions and predicate depend on
#[pg_extern]
fn pg_collation_index_dependencies(
    index_oid: pg_sys::Oid,
) -> TableIterator<'static, (name!(collid, pg_sys::Oid),)> {
    collation_rows(DependentKind::Index, index_oid)
}

/// Collations a materialized view's defining query depends on
#[pg_extern]
fn pg_collation_matview_dependencies(
    matview_oid: pg_sys::Oid,
) -> TableIterator<'static, (name!(collid, pg_sys::Oid),)> {
    collation_rows(DependentKind::MaterializedView, matview_oid)
}

/// Dependency report as JSONB, with collation names, providers and versions
///
/// `objkind` is one of `constraint`, `index` or `matview`.
#[pg_extern]
fn pg_collation_dependencies_report(objid: pg_sys::Oid, objkind: &str) -> JsonB {
    let report = objkind.parse::<DependentKind>().and_then(|kind| {
        DependencyReport::build(&SpiCatalog::new(), ResolveOptions::from_gucs(), kind, objid)
    });

    match report.and_then(|report| report.to_json()) {
        Ok(json) => JsonB(json),
        Err(e) => e.raise(),
    }
}

/// Resolve fully, then hand the rows to PostgreSQL
///
/// Every relation lock taken during resolution is released by the time
/// `resolve` returns, so an error can be raised right away.
fn collation_rows(
    kind: DependentKind,
    id: pg_sys::Oid,
) -> TableIterator<'static, (name!(collid, pg_sys::Oid),)> {
    let collations = match resolve::resolve(&SpiCatalog::new(), ResolveOptions::from_gucs(), kind, id) {
        Ok(collations) => collations,
        Err(e) => {
            debug1!("pg_collation_dependencies: {} {:?} failed: {}", kind, id, e);
            e.raise()
        }
    };

    debug1!(
        "pg_collation_dependencies: {} {:?} depends on {} collation(s)",
        kind,
        id,
        collations.len()
    );
    TableIterator::new(collations.into_iter().map(|collation| (collation,)))
}

#[cfg(any(test, feature = "pg_test"))]
#[pg_schema]
mod tests {
    use pgrx::prelude::*;

    use crate::catalog::spi::SpiCatalog;
    use crate::config::ResolveOptions;
    use crate::error::testing::assert_error_sqlstate;
    use crate::resolve::{resolve, DependentKind};

    const DEFAULT_COLLATION: u32 = 100;
    const C_COLLATION: u32 = 950;
    const POSIX_COLLATION: u32 = 951;

    fn oid_of(query: &str) -> pg_sys::Oid {
        Spi::get_one::<pg_sys::Oid>(query)
            .expect("lookup query failed")
            .expect("object not found")
    }

    fn collations(kind: DependentKind, id: pg_sys::Oid) -> Vec<u32> {
        resolve(&SpiCatalog::new(), ResolveOptions::default(), kind, id)
            .expect("resolution failed")
            .into_iter()
            .map(|collation| collation.as_u32())
            .collect()
    }

    fn create_table() {
        Spi::run("CREATE TABLE t (a text COLLATE \"C\", b int[])").unwrap();
    }

    #[pg_test]
    fn test_version_callable_from_sql() {
        let version = Spi::get_one::<String>("SELECT pg_collation_dependencies_version()")
            .unwrap()
            .unwrap();
        assert_eq!(version, env!("CARGO_PKG_VERSION"));
    }

    #[pg_test]
    fn test_check_constraint_on_collated_column() {
        create_table();
        Spi::run("ALTER TABLE t ADD CONSTRAINT t_a_check CHECK (a <> '')").unwrap();
        let id = oid_of("SELECT oid FROM pg_constraint WHERE conname = 't_a_check'");

        assert_eq!(
            collations(DependentKind::Constraint, id),
            vec![DEFAULT_COLLATION, C_COLLATION]
        );
    }

    #[pg_test]
    fn test_constraint_function_returns_sorted_rows() {
        create_table();
        Spi::run("ALTER TABLE t ADD CONSTRAINT t_a_check CHECK (a <> '' COLLATE \"POSIX\")").unwrap();

        let rows = Spi::get_one::<Vec<i64>>(
            "SELECT array_agg(collid::int8) FROM pg_collation_constraint_dependencies(\
             (SELECT oid FROM pg_constraint WHERE conname = 't_a_check'))",
        )
        .unwrap()
        .unwrap();

        assert!(rows.contains(&i64::from(POSIX_COLLATION)));
        assert!(rows.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[pg_test]
    fn test_index_on_collated_column() {
        create_table();
        Spi::run("CREATE INDEX t_a_idx ON t (a)").unwrap();

        let collid = Spi::get_one::<pg_sys::Oid>(
            "SELECT collid FROM pg_collation_index_dependencies('t_a_idx'::regclass)",
        )
        .unwrap()
        .unwrap();
        assert_eq!(collid.as_u32(), C_COLLATION);
    }

    #[pg_test]
    fn test_index_explicit_collation_wins() {
        create_table();
        Spi::run("CREATE INDEX t_a_posix_idx ON t (a COLLATE \"POSIX\")").unwrap();
        let id = oid_of("SELECT 't_a_posix_idx'::regclass::oid");

        assert_eq!(collations(DependentKind::Index, id), vec![POSIX_COLLATION]);
    }

    #[pg_test]
    fn test_expression_index() {
        create_table();
        Spi::run("CREATE INDEX t_lower_idx ON t (lower(a))").unwrap();
        let id = oid_of("SELECT 't_lower_idx'::regclass::oid");

        assert_eq!(
            collations(DependentKind::Index, id),
            vec![DEFAULT_COLLATION, C_COLLATION]
        );
    }

    #[pg_test]
    fn test_partial_index_predicate() {
        create_table();
        Spi::run("CREATE INDEX t_b_idx ON t (b) WHERE a > 'x' COLLATE \"POSIX\"").unwrap();
        let id = oid_of("SELECT 't_b_idx'::regclass::oid");

        let found = collations(DependentKind::Index, id);
        assert!(found.contains(&C_COLLATION));
        assert!(found.contains(&POSIX_COLLATION));
    }

    #[pg_test]
    fn test_non_collatable_index_is_empty() {
        create_table();
        Spi::run("CREATE INDEX t_b_only_idx ON t (b)").unwrap();
        let id = oid_of("SELECT 't_b_only_idx'::regclass::oid");

        assert!(collations(DependentKind::Index, id).is_empty());
    }

    #[pg_test]
    fn test_domain_inside_composite() {
        Spi::run("CREATE DOMAIN d_posix AS text COLLATE \"POSIX\"").unwrap();
        Spi::run("CREATE TYPE s AS (x d_posix)").unwrap();
        Spi::run("CREATE TABLE ts (v s, CONSTRAINT ts_v_check CHECK ((v).x IS NOT NULL))").unwrap();
        let id = oid_of("SELECT oid FROM pg_constraint WHERE conname = 'ts_v_check'");

        let found = collations(DependentKind::Constraint, id);
        assert!(found.contains(&POSIX_COLLATION));
        assert!(!found.contains(&C_COLLATION));
    }

    #[pg_test]
    fn test_domain_check_constraint_is_followed() {
        Spi::run("CREATE DOMAIN d_chk AS text CHECK (VALUE <> 'x' COLLATE \"POSIX\")").unwrap();
        Spi::run("CREATE TABLE td (v d_chk, CONSTRAINT td_v_check CHECK (length(v) > 0))").unwrap();
        let id = oid_of("SELECT oid FROM pg_constraint WHERE conname = 'td_v_check'");

        assert!(collations(DependentKind::Constraint, id).contains(&POSIX_COLLATION));
    }

    #[pg_test]
    fn test_enum_check_with_enum_literal() {
        Spi::run("CREATE TYPE mood AS ENUM ('sad', 'ok')").unwrap();
        Spi::run("CREATE TABLE te (s mood, CONSTRAINT te_s_check CHECK (s <> 'sad'))").unwrap();
        let id = oid_of("SELECT oid FROM pg_constraint WHERE conname = 'te_s_check'");

        assert!(collations(DependentKind::Constraint, id).is_empty());
    }

    #[pg_test]
    fn test_domain_check_with_domain_literal() {
        Spi::run("CREATE DOMAIN d_lit AS text COLLATE \"POSIX\"").unwrap();
        Spi::run("CREATE TABLE tl (v d_lit, CONSTRAINT tl_v_check CHECK (v <> 'x'::d_lit))").unwrap();
        let id = oid_of("SELECT oid FROM pg_constraint WHERE conname = 'tl_v_check'");

        assert!(collations(DependentKind::Constraint, id).contains(&POSIX_COLLATION));
    }

    #[pg_test]
    fn test_range_over_collated_subtype() {
        Spi::run("CREATE TYPE textrange_c AS RANGE (subtype = text, collation = \"C\")").unwrap();
        Spi::run("CREATE TABLE tr (r textrange_c, CONSTRAINT tr_r_check CHECK (NOT isempty(r)))")
            .unwrap();
        let id = oid_of("SELECT oid FROM pg_constraint WHERE conname = 'tr_r_check'");

        assert!(collations(DependentKind::Constraint, id).contains(&C_COLLATION));
    }

    #[pg_test]
    fn test_matview_query() {
        create_table();
        Spi::run("CREATE MATERIALIZED VIEW mv AS SELECT a FROM t").unwrap();
        let id = oid_of("SELECT 'mv'::regclass::oid");

        assert!(collations(DependentKind::MaterializedView, id).contains(&C_COLLATION));
    }

    #[pg_test]
    fn test_non_collatable_matview_is_empty() {
        Spi::run("CREATE MATERIALIZED VIEW mv_int AS SELECT 1 AS x").unwrap();
        let id = oid_of("SELECT 'mv_int'::regclass::oid");

        assert!(collations(DependentKind::MaterializedView, id).is_empty());
    }

    #[pg_test]
    fn test_table_is_not_a_matview() {
        create_table();
        let id = oid_of("SELECT 't'::regclass::oid");

        let result = resolve(
            &SpiCatalog::new(),
            ResolveOptions::default(),
            DependentKind::MaterializedView,
            id,
        );
        assert_error_sqlstate(result, "42704");
    }

    #[pg_test]
    fn test_unknown_constraint_is_not_found() {
        let result = resolve(
            &SpiCatalog::new(),
            ResolveOptions::default(),
            DependentKind::Constraint,
            pg_sys::Oid::from(1),
        );
        assert_error_sqlstate(result, "42704");
    }

    #[pg_test]
    fn test_report_names_collations() {
        create_table();
        Spi::run("CREATE INDEX t_a_idx ON t (a)").unwrap();

        let report = Spi::get_one::<pgrx::JsonB>(
            "SELECT pg_collation_dependencies_report('t_a_idx'::regclass, 'index')",
        )
        .unwrap()
        .unwrap();

        assert_eq!(report.0["kind"], "index");
        assert_eq!(report.0["collations"][0]["name"], "C");
        assert_eq!(report.0["collations"][0]["oid"], C_COLLATION);
    }

    #[pg_test]
    #[should_panic(expected = "invalid value 'view' for objkind")]
    fn test_report_rejects_unknown_kind() {
        Spi::run("SELECT pg_collation_dependencies_report(0, 'view')").unwrap();
    }

    #[pg_test]
    fn test_max_depth_guc_is_registered() {
        let value = Spi::get_one::<String>("SHOW pg_collation_dependencies.max_depth")
            .unwrap()
            .unwrap();
        assert_eq!(value, "1000");
    }

    #[pg_test]
    fn test_max_depth_guc_is_superuser_only() {
        let (context, max_val) = Spi::get_two::<String, String>(
            "SELECT context::text, max_val FROM pg_settings \
             WHERE name = 'pg_collation_dependencies.max_depth'",
        )
        .unwrap();

        assert_eq!(context.as_deref(), Some("superuser"));
        assert_eq!(max_val.as_deref(), Some("10000"));
    }

    #[pg_test]
    fn test_stack_check_passes_in_a_shallow_call() {
        use crate::catalog::Catalog;

        assert!(SpiCatalog::new().check_stack().is_ok());
    }
}
