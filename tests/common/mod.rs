//! Shared fixture helpers for pipeline integration tests.

use std::env;
use std::path::PathBuf;

use mlsync::apply::{apply_plan, ApplySummary, ExecPolicy};
use mlsync::directory::{build_groups, build_users, DirectoryGroup, RewriteRules, UserIndex};
use mlsync::nesting::resolve_nesting;
use mlsync::plan::{plan_group, PlanOptions};
use mlsync::roster::ListStore;
use mlsync::udm::read_capture;

fn manifest_dir() -> PathBuf {
    PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into()))
}

/// Load a captured directory fixture from tests/data/{name}.
pub fn fixture_text(name: &str) -> String {
    let path = manifest_dir().join("tests/data").join(name);
    read_capture(&path).expect("fixture missing")
}

/// Build the full directory model from the captured fixtures and run
/// nested-group resolution at the given depth.
pub fn build_model(depth: i32) -> (Vec<DirectoryGroup>, UserIndex) {
    let mut index = UserIndex::build(build_users(&fixture_text("users.txt")));
    let mut groups = build_groups(&fixture_text("groups.txt"), &index, &RewriteRules::default())
        .expect("group records parse");
    resolve_nesting(&mut groups, &mut index, depth);
    (groups, index)
}

/// Plan and apply every list-worthy group in directory order, the way
/// the binary's run loop does.
pub fn reconcile(
    groups: &[DirectoryGroup],
    index: &UserIndex,
    store: &mut dyn ListStore,
    opts: PlanOptions,
) -> ApplySummary {
    let policy = ExecPolicy {
        dry_run: opts.plan_only,
        keep: opts.keep,
        admin: "admin@co.example".to_string(),
    };
    let mut totals = ApplySummary::default();
    for group in groups {
        let Some(plan) = plan_group(group, index, store, opts).expect("plan") else {
            continue;
        };
        let summary = apply_plan(store, &plan, &policy);
        totals.applied += summary.applied;
        totals.suppressed += summary.suppressed;
        totals.failed += summary.failed;
    }
    totals
}

/// Total number of actions a fresh planning pass would still emit.
pub fn pending_actions(
    groups: &[DirectoryGroup],
    index: &UserIndex,
    store: &mut dyn ListStore,
) -> usize {
    groups
        .iter()
        .filter_map(|group| {
            plan_group(group, index, store, PlanOptions::default()).expect("plan")
        })
        .map(|plan| plan.actions.len())
        .sum()
}
