//! Plan execution.
//!
//! The executor is the only component that mutates external state. It
//! applies a group's action batch in emitted order, honoring two
//! independent suppression flags: dry-run (no mutation at all) and
//! keep (creation and addition run, removal is suppressed). A failed
//! action is reported and skipped; it never aborts the rest of the
//! batch or subsequent groups.

use crate::plan::{GroupPlan, ReconciliationAction};
use crate::roster::{ListStore, MemberRole, RegisterOutcome};

#[derive(Debug, Clone, Default)]
pub struct ExecPolicy {
    /// Plan-only: every action is printed, none is applied.
    pub dry_run: bool,
    /// No-destructive: removal actions are printed, not applied.
    pub keep: bool,
    /// Owner/moderator address for newly created lists.
    pub admin: String,
}

/// Counts for one applied batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: usize,
    pub suppressed: usize,
    pub failed: usize,
}

/// Apply one group's batch against the store.
pub fn apply_plan(
    store: &mut dyn ListStore,
    plan: &GroupPlan,
    policy: &ExecPolicy,
) -> ApplySummary {
    let mut summary = ApplySummary::default();

    for action in &plan.actions {
        if policy.dry_run {
            tracing::info!(list = %plan.list, "dry-run: would {}", describe(action));
            summary.suppressed += 1;
            continue;
        }
        if policy.keep && is_destructive(action) {
            tracing::info!(list = %plan.list, "keep policy: skipping {}", describe(action));
            summary.suppressed += 1;
            continue;
        }
        match apply_one(store, action, &policy.admin) {
            Ok(()) => {
                tracing::debug!(list = %plan.list, "{}", describe(action));
                summary.applied += 1;
            }
            Err(err) => {
                tracing::warn!(list = %plan.list, error = %format!("{err:#}"), "failed to {}", describe(action));
                summary.failed += 1;
            }
        }
    }
    summary
}

fn is_destructive(action: &ReconciliationAction) -> bool {
    matches!(
        action,
        ReconciliationAction::Unsubscribe { .. } | ReconciliationAction::MigrateSubscription { .. }
    )
}

fn apply_one(
    store: &mut dyn ListStore,
    action: &ReconciliationAction,
    admin: &str,
) -> anyhow::Result<()> {
    match action {
        ReconciliationAction::CreateList { list } => store.create_list(list, admin),
        ReconciliationAction::CreateIdentity {
            address,
            display_name,
        } => store.create_identity(address, display_name),
        ReconciliationAction::RegisterAddress { identity, address } => {
            if store.register_address(identity, address)? == RegisterOutcome::AlreadyRegistered {
                tracing::debug!(identity, address, "address already linked");
            }
            Ok(())
        }
        ReconciliationAction::SetPreferredAddress { identity, address } => {
            store.set_preferred_address(identity, address)
        }
        ReconciliationAction::Subscribe {
            list,
            address,
            role,
        } => store.subscribe(list, address, *role),
        ReconciliationAction::Unsubscribe { list, address } => store.unsubscribe(list, address),
        ReconciliationAction::MigrateSubscription {
            list, from, to, ..
        } => {
            // The target may already hold non-member role, either from
            // a previous run or from a whitelist step earlier in this
            // batch; clear it so member role is the only one left.
            store.unsubscribe(list, from)?;
            store.unsubscribe(list, to)?;
            store.subscribe(list, to, MemberRole::Member)?;
            // The vacated address stays known to the list as a
            // whitelisted sender, which is where the next planning
            // pass expects to find it.
            store.subscribe(list, from, MemberRole::NonMember)
        }
    }
}

fn describe(action: &ReconciliationAction) -> String {
    match action {
        ReconciliationAction::CreateList { list } => format!("create list {list}"),
        ReconciliationAction::CreateIdentity { address, .. } => {
            format!("create identity {address}")
        }
        ReconciliationAction::RegisterAddress { identity, address } => {
            format!("register {address} to {identity}")
        }
        ReconciliationAction::SetPreferredAddress { identity, address } => {
            format!("prefer {address} for {identity}")
        }
        ReconciliationAction::Subscribe {
            list,
            address,
            role,
        } => match role {
            MemberRole::Member => format!("subscribe {address} to {list} as member"),
            MemberRole::NonMember => format!("whitelist {address} on {list}"),
        },
        ReconciliationAction::Unsubscribe { list, address } => {
            format!("unsubscribe {address} from {list}")
        }
        ReconciliationAction::MigrateSubscription { list, from, to, .. } => {
            format!("migrate {from} -> {to} on {list}")
        }
    }
}
