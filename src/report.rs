//! JSON dependency report
//!
//! Same resolution as the set-returning functions, with each collation OID
//! expanded into its name, provider and recorded version so a report can be
//! read without joining against `pg_collation`.

use pgrx::pg_sys::Oid;
use serde::Serialize;

use crate::catalog::{Catalog, CollationInfo};
use crate::config::ResolveOptions;
use crate::error::CollDepResult;
use crate::resolve::{resolve, DependentKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyReport {
    pub kind: &'static str,
    pub object: u32,
    pub collations: Vec<CollationInfo>,
}

impl DependencyReport {
    pub fn build<C: Catalog + ?Sized>(
        catalog: &C,
        options: ResolveOptions,
        kind: DependentKind,
        id: Oid,
    ) -> CollDepResult<Self> {
        let collations = resolve(catalog, options, kind, id)?
            .into_iter()
            .map(|collation| catalog.lookup_collation(collation))
            .collect::<CollDepResult<Vec<_>>>()?;

        Ok(Self {
            kind: kind.as_str(),
            object: id.as_u32(),
            collations,
        })
    }

    pub fn to_json(&self) -> CollDepResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::catalog::fixture::{oid, FixtureCatalog};
    use crate::error::testing::assert_error_sqlstate;

    fn catalog() -> FixtureCatalog {
        let mut catalog = FixtureCatalog::new();
        catalog
            .scalar(25, 100)
            .relation(16400, &[(25, 950)])
            .index(18000, 16400, &[(1, 951)], None, None)
            .index(18001, 16400, &[(1, 0)], None, None)
            .collation(100, "default")
            .collation(951, "POSIX");
        catalog
    }

    #[test]
    fn test_report_lists_collation_details() {
        let catalog = catalog();
        let report =
            DependencyReport::build(&catalog, ResolveOptions::default(), DependentKind::Index, oid(18000))
                .unwrap();

        assert_eq!(
            report.to_json().unwrap(),
            json!({
                "kind": "index",
                "object": 18000,
                "collations": [
                    {"oid": 951, "name": "POSIX", "provider": "libc", "version": null}
                ]
            })
        );
    }

    #[test]
    fn test_report_is_sorted_by_oid() {
        let mut catalog = catalog();
        catalog
            .collation(950, "C")
            .index(18002, 16400, &[(1, 951), (0, 0)], Some("({COLLATEEXPR :arg <> :collOid 950})"), None);

        let report =
            DependencyReport::build(&catalog, ResolveOptions::default(), DependentKind::Index, oid(18002))
                .unwrap();
        let oids: Vec<u32> = report.collations.iter().map(|c| c.oid).collect();
        assert_eq!(oids, vec![950, 951]);
    }

    #[test]
    fn test_unknown_collation_is_not_found() {
        let mut catalog = catalog();
        catalog.index(18003, 16400, &[(1, 12345)], None, None);

        let result =
            DependencyReport::build(&catalog, ResolveOptions::default(), DependentKind::Index, oid(18003));
        assert_error_sqlstate(result, "42704");
    }

    #[test]
    fn test_report_for_empty_result() {
        let mut catalog = catalog();
        catalog.scalar(23, 0).relation(16500, &[(23, 0)]).index(18004, 16500, &[(1, 0)], None, None);

        let report =
            DependencyReport::build(&catalog, ResolveOptions::default(), DependentKind::Index, oid(18004))
                .unwrap();
        assert_eq!(report.to_json().unwrap()["collations"], json!([]));
    }
}
