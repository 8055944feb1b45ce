//! Reconciliation planning.
//!
//! For each directory group with a list address the planner compares
//! desired membership against the list's current roster and emits an
//! ordered batch of mutation actions. The batch order is fixed and
//! load-bearing: create-list first, then per-user actions in the
//! group's member iteration order, then extra-member cleanup in roster
//! iteration order. Later steps (migration) assume earlier steps
//! (identity creation, address registration) have taken effect within
//! the same batch.
//!
//! Actions are pure data until the executor consumes them; planning
//! never mutates the store or the roster snapshot.

use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::directory::{DirectoryGroup, DirectoryUser, UserIndex};
use crate::roster::{Identity, ListRoster, ListStore, MemberRole};

/// One intended mutation against the identity/list store.
///
/// Identities are referenced by an anchor address: any address known
/// to be registered to them by the time the action executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReconciliationAction {
    CreateList {
        list: String,
    },
    CreateIdentity {
        address: String,
        display_name: String,
    },
    RegisterAddress {
        identity: String,
        address: String,
    },
    SetPreferredAddress {
        identity: String,
        address: String,
    },
    Subscribe {
        list: String,
        address: String,
        role: MemberRole,
    },
    Unsubscribe {
        list: String,
        address: String,
    },
    MigrateSubscription {
        identity: String,
        list: String,
        from: String,
        to: String,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Plan-only run: a missing list is reported but not planned
    /// against, since it cannot be created.
    pub plan_only: bool,
    /// Keep policy: extra members are diagnosed but never removed.
    pub keep: bool,
}

/// The planned batch for one group, ready for the executor.
#[derive(Debug, Serialize)]
pub struct GroupPlan {
    pub list: String,
    pub actions: Vec<ReconciliationAction>,
}

/// Compare one group's resolved membership against the matching list
/// roster and emit the minimal ordered action batch.
///
/// Returns `None` for groups without a mail address (not list-worthy).
pub fn plan_group(
    group: &DirectoryGroup,
    index: &UserIndex,
    store: &mut dyn ListStore,
    opts: PlanOptions,
) -> Result<Option<GroupPlan>> {
    let Some(list) = group.mail_address.clone() else {
        return Ok(None);
    };
    let mut actions = Vec::new();

    let roster = match store.roster(&list)? {
        Some(roster) => roster,
        None => {
            actions.push(ReconciliationAction::CreateList { list: list.clone() });
            if opts.plan_only {
                tracing::info!(list = %list, "list does not exist; membership planning deferred");
                return Ok(Some(GroupPlan { list, actions }));
            }
            // The executor creates the list before any later action in
            // this batch runs, so plan against an empty roster.
            ListRoster::empty(&list)
        }
    };

    let mut desired_primary: BTreeMap<String, String> = BTreeMap::new();
    let mut desired_secondary: BTreeMap<String, String> = BTreeMap::new();

    for user_ref in &group.members {
        let user = index.get(*user_ref);
        desired_primary.insert(fold(&user.primary_mail), user.primary_mail.clone());
        for mail in &user.secondary_mails {
            desired_secondary.insert(fold(mail), mail.clone());
        }

        let (anchor, mut state) = resolve_identity(store, user, &mut actions)?;
        register_missing_addresses(user, &anchor, &mut state, &mut actions);
        ensure_subscription(&list, &roster, &state, &mut actions);
    }

    cleanup_extra_members(
        &list,
        &roster,
        store,
        &desired_primary,
        &desired_secondary,
        opts.keep,
        &mut actions,
    )?;

    Ok(Some(GroupPlan { list, actions }))
}

/// Find the identity for a desired user: primary mail first, then each
/// secondary in order, first match wins. No match plans a creation and
/// models the resulting identity locally so later steps see it.
fn resolve_identity(
    store: &mut dyn ListStore,
    user: &DirectoryUser,
    actions: &mut Vec<ReconciliationAction>,
) -> Result<(String, Identity)> {
    if let Some(identity) = store.find_identity(&user.primary_mail)? {
        return Ok((user.primary_mail.clone(), identity));
    }
    for mail in &user.secondary_mails {
        if let Some(identity) = store.find_identity(mail)? {
            return Ok((mail.clone(), identity));
        }
    }
    actions.push(ReconciliationAction::CreateIdentity {
        address: user.primary_mail.clone(),
        display_name: user.display_name.clone(),
    });
    let state = Identity {
        display_name: user.display_name.clone(),
        addresses: vec![fold(&user.primary_mail)],
        preferred: None,
    };
    Ok((user.primary_mail.clone(), state))
}

/// Plan registration of every known address of the user not yet linked
/// to the identity, then a preferred address if it still has none.
fn register_missing_addresses(
    user: &DirectoryUser,
    anchor: &str,
    state: &mut Identity,
    actions: &mut Vec<ReconciliationAction>,
) {
    let all = std::iter::once(&user.primary_mail).chain(user.secondary_mails.iter());
    for mail in all {
        if !state.owns(mail) {
            actions.push(ReconciliationAction::RegisterAddress {
                identity: anchor.to_string(),
                address: mail.clone(),
            });
            state.addresses.push(fold(mail));
        }
    }
    if state.preferred.is_none() {
        actions.push(ReconciliationAction::SetPreferredAddress {
            identity: anchor.to_string(),
            address: user.primary_mail.clone(),
        });
        state.preferred = Some(fold(&user.primary_mail));
    }
}

/// Exactly one address of the identity must hold member role on the
/// list. A fresh membership goes to the preferred address; if that
/// address currently holds non-member role it is unsubscribed first so
/// the roles never overlap. Every other address without any role is
/// whitelisted as non-member.
fn ensure_subscription(
    list: &str,
    roster: &ListRoster,
    state: &Identity,
    actions: &mut Vec<ReconciliationAction>,
) {
    let current_member = state
        .addresses
        .iter()
        .find(|addr| roster.is_member(addr))
        .cloned();

    // `preferred` is always set by this point.
    let target = state
        .preferred
        .clone()
        .unwrap_or_else(|| state.addresses[0].clone());

    let member_holder = match current_member {
        Some(existing) => existing,
        None => {
            if roster.is_non_member(&target) {
                actions.push(ReconciliationAction::Unsubscribe {
                    list: list.to_string(),
                    address: target.clone(),
                });
            }
            actions.push(ReconciliationAction::Subscribe {
                list: list.to_string(),
                address: target.clone(),
                role: MemberRole::Member,
            });
            target
        }
    };

    for addr in &state.addresses {
        if addr.eq_ignore_ascii_case(&member_holder) || roster.has_any_role(addr) {
            continue;
        }
        actions.push(ReconciliationAction::Subscribe {
            list: list.to_string(),
            address: addr.clone(),
            role: MemberRole::NonMember,
        });
    }
}

/// Classify every currently-subscribed member address that no desired
/// user accounts for. An identity that owns a desired address under a
/// different name is migrated; anything else is removed outright,
/// unless the keep policy is active, in which case only diagnostics are
/// produced. Non-member addresses are never inspected.
fn cleanup_extra_members(
    list: &str,
    roster: &ListRoster,
    store: &mut dyn ListStore,
    desired_primary: &BTreeMap<String, String>,
    desired_secondary: &BTreeMap<String, String>,
    keep: bool,
    actions: &mut Vec<ReconciliationAction>,
) -> Result<()> {
    let mut handled: BTreeSet<String> = BTreeSet::new();

    for member in &roster.members {
        let folded = fold(member);
        if desired_primary.contains_key(&folded)
            || desired_secondary.contains_key(&folded)
            || handled.contains(&folded)
        {
            continue;
        }

        let identity = store.find_identity(member)?;
        let Some(identity) = identity else {
            // Address subscribed without a backing identity.
            if keep {
                tracing::info!(list, address = %member, "keep policy: leaving extra member in place");
            } else {
                actions.push(ReconciliationAction::Unsubscribe {
                    list: list.to_string(),
                    address: member.clone(),
                });
            }
            continue;
        };

        let migration_target = identity
            .addresses
            .iter()
            .find_map(|addr| desired_primary.get(&fold(addr)))
            .or_else(|| {
                identity
                    .addresses
                    .iter()
                    .find_map(|addr| desired_secondary.get(&fold(addr)))
            });

        if let Some(target) = migration_target {
            // Legitimately a member, just subscribed under the wrong
            // address.
            actions.push(ReconciliationAction::MigrateSubscription {
                identity: member.clone(),
                list: list.to_string(),
                from: member.clone(),
                to: target.clone(),
            });
            handled.insert(folded);
            continue;
        }

        if keep {
            tracing::info!(list, address = %member, "keep policy: leaving extra member in place");
            handled.insert(folded);
            continue;
        }

        // Full removal: every address of the identity with any role on
        // this list goes.
        for addr in &identity.addresses {
            if roster.has_any_role(addr) {
                actions.push(ReconciliationAction::Unsubscribe {
                    list: list.to_string(),
                    address: addr.clone(),
                });
                handled.insert(fold(addr));
            }
        }
    }
    Ok(())
}

fn fold(addr: &str) -> String {
    addr.to_ascii_lowercase()
}
