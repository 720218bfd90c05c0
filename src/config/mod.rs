use pgrx::{GucContext, GucFlags, GucRegistry, GucSetting};

/// Default bound on resolver recursion (expression nodes plus type hops)
///
/// The native stack is checked separately at every level, so this only
/// needs to catch runaway type graphs early.
pub const DEFAULT_MAX_DEPTH: i32 = 1000;

/// Smallest accepted value for `pg_collation_dependencies.max_depth`
pub const MIN_MAX_DEPTH: i32 = 16;

/// Largest accepted value for `pg_collation_dependencies.max_depth`
pub const MAX_MAX_DEPTH: i32 = 10_000;

static MAX_DEPTH: GucSetting<i32> = GucSetting::<i32>::new(DEFAULT_MAX_DEPTH);

/// Register the extension's GUCs. Called once from `_PG_init`.
pub fn register_gucs() {
    GucRegistry::define_int_guc(
        "pg_collation_dependencies.max_depth",
        "Maximum recursion depth while resolving collation dependencies.",
        "Each nested expression node and each type, relation or constraint \
         hop counts as one level. Exceeding it aborts the call. \
         max_stack_depth still applies.",
        &MAX_DEPTH,
        MIN_MAX_DEPTH,
        MAX_MAX_DEPTH,
        GucContext::Suset,
        GucFlags::default(),
    );
}

/// Per-call resolver settings, snapshotted from the GUCs at call start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub max_depth: usize,
}

impl ResolveOptions {
    /// Read the current session settings
    pub fn from_gucs() -> Self {
        Self {
            max_depth: usize::try_from(MAX_DEPTH.get()).unwrap_or(DEFAULT_MAX_DEPTH as usize),
        }
    }
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH as usize,
        }
    }
}
