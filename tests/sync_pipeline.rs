//! End-to-end pipeline tests over captured directory output.
//!
//! These run the real parse → model → nesting → plan → apply chain
//! against the in-memory list store and check the run-level properties:
//! membership coverage after one pass, idempotence on the second pass,
//! and the non-destructive and dry-run policies.

mod common;

use common::{build_model, fixture_text, pending_actions, reconcile};
use mlsync::plan::PlanOptions;
use mlsync::roster::{ListStore, MemoryStore};

/// Store state before any reconciliation: alice is already subscribed,
/// eve is a leftover member no directory group accounts for, and the
/// ops list does not exist yet.
fn seeded_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store.seed_identity("Alice Adams", &["alice@co.example"]);
    store.seed_identity("Eve Early", &["eve@co.example"]);
    store.seed_list(
        "eng@co.example",
        &["alice@co.example", "eve@co.example"],
        &[],
    );
    store
}

#[test]
fn base64_display_name_survives_the_pipeline() {
    let (_, index) = build_model(0);
    let bob = index.lookup_primary("bob@co.example").expect("bob");
    assert_eq!(index.get(bob).display_name, "Bob Brön");
}

#[test]
fn one_pass_reaches_full_membership_coverage() {
    let (groups, index) = build_model(1);
    let mut store = seeded_store();

    let summary = reconcile(&groups, &index, &mut store, PlanOptions::default());
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.suppressed, 0);

    // Every resolved member of every list-worthy group holds member
    // role on exactly one of their identity's addresses.
    for group in &groups {
        let Some(list) = group.mail_address.as_deref() else {
            continue;
        };
        let roster = store.roster(list).expect("roster").expect("list exists");
        for member in &group.members {
            let user = index.get(*member);
            let identity = store
                .find_identity(&user.primary_mail)
                .expect("find")
                .unwrap_or_else(|| panic!("no identity for {}", user.primary_mail));
            let member_addresses = identity
                .addresses
                .iter()
                .filter(|addr| roster.is_member(addr))
                .count();
            assert_eq!(
                member_addresses, 1,
                "{} on {list}: expected exactly one member address",
                user.primary_mail
            );
        }
    }

    // The nested ops group folded carol into eng.
    let eng = store.roster("eng@co.example").expect("roster").expect("eng");
    assert!(eng.is_member("carol@co.example"));
    // The leftover member was removed; secondary addresses were
    // whitelisted, not subscribed.
    assert!(!eng.is_member("eve@co.example"));
    assert!(eng.is_non_member("a.alice@co.example"));
    assert!(eng.is_non_member("bob.alt@co.example"));

    // The missing ops list was created with the fixed admin.
    assert_eq!(store.list_admin("ops@co.example"), Some("admin@co.example"));
    let ops = store.roster("ops@co.example").expect("roster").expect("ops");
    assert!(ops.is_member("carol@co.example"));

    // The mail-less interns group never became a list.
    assert!(store.roster("interns@co.example").expect("roster").is_none());
}

#[test]
fn second_pass_plans_nothing() {
    let (groups, index) = build_model(1);
    let mut store = seeded_store();
    // bob is already subscribed, but under a platform-only alias the
    // directory never lists; the first pass migrates that membership.
    store.seed_identity("Bob Brön", &["old.bob@co.example", "bob@co.example"]);
    store.seed_list(
        "eng@co.example",
        &["alice@co.example", "eve@co.example", "old.bob@co.example"],
        &[],
    );

    reconcile(&groups, &index, &mut store, PlanOptions::default());
    assert_eq!(pending_actions(&groups, &index, &mut store), 0);

    let eng = store.roster("eng@co.example").expect("roster").expect("eng");
    assert!(eng.is_member("bob@co.example"));
    assert!(
        !eng.is_non_member("bob@co.example"),
        "migration target must not keep a stale non-member role"
    );
    assert!(eng.is_non_member("old.bob@co.example"));
}

#[test]
fn keep_policy_never_removes_anyone() {
    let (groups, index) = build_model(1);
    let mut store = seeded_store();

    let opts = PlanOptions {
        plan_only: false,
        keep: true,
    };
    reconcile(&groups, &index, &mut store, opts);

    let eng = store.roster("eng@co.example").expect("roster").expect("eng");
    assert!(eng.is_member("eve@co.example"), "keep run must not remove");
    assert!(eng.is_member("bob@co.example"), "additions still run");
}

#[test]
fn dry_run_leaves_the_store_untouched() {
    let (groups, index) = build_model(1);
    let mut store = seeded_store();

    let opts = PlanOptions {
        plan_only: true,
        keep: false,
    };
    let summary = reconcile(&groups, &index, &mut store, opts);
    assert_eq!(summary.applied, 0);
    assert!(summary.suppressed > 0);

    let eng = store.roster("eng@co.example").expect("roster").expect("eng");
    assert!(eng.is_member("eve@co.example"));
    assert!(!eng.is_member("bob@co.example"));
    assert!(store.roster("ops@co.example").expect("roster").is_none());
}

#[test]
fn comment_lines_are_stripped_from_captures() {
    let text = fixture_text("groups.txt");
    assert!(!text.contains('#'));
    assert!(text.starts_with("cn=eng"));
}

#[test]
fn forwarding_depth_subscribes_the_nested_list_itself() {
    let (groups, index) = build_model(-1);
    let mut store = seeded_store();
    store.seed_list("ops@co.example", &[], &[]);

    reconcile(&groups, &index, &mut store, PlanOptions::default());

    let eng = store.roster("eng@co.example").expect("roster").expect("eng");
    assert!(eng.is_member("ops@co.example"), "nested list forwards");
    assert!(
        !eng.is_member("carol@co.example"),
        "nested members are not expanded in forwarding mode"
    );
}
