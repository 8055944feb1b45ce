//! Nested group expansion.
//!
//! A directory group may reference other groups whose membership folds
//! into its own. Expansion is depth-limited and cycle-safe: a group
//! already on the current expansion path is never re-entered. Depth 0
//! disables expansion; a negative depth switches to forwarding mode,
//! where each referenced group appears as a single synthetic recipient
//! (its own list address) instead of its expanded membership.

use std::collections::BTreeMap;

use crate::directory::{DirectoryGroup, DirectoryUser, UserIndex, UserRef};

/// Merge nested membership into every group that has a mail address.
///
/// An unresolvable nested-group reference contributes nothing and is
/// reported; it never aborts the run. Dedup on merge is by resolved
/// primary mail, case-insensitive.
pub fn resolve_nesting(groups: &mut [DirectoryGroup], index: &mut UserIndex, depth: i32) {
    if depth == 0 {
        return;
    }

    let by_name: BTreeMap<String, usize> = groups
        .iter()
        .enumerate()
        .map(|(idx, group)| (group.cn.clone(), idx))
        .collect();

    if depth < 0 {
        forward_as_pseudo_users(groups, index, &by_name);
        return;
    }

    // Expansion works from the pre-expansion member lists so the result
    // does not depend on group iteration order.
    let direct: Vec<Vec<UserRef>> = groups.iter().map(|group| group.members.clone()).collect();

    for idx in 0..groups.len() {
        if groups[idx].mail_address.is_none() {
            continue;
        }
        let mut gathered = Vec::new();
        let mut path = vec![idx];
        gather(groups, &by_name, &direct, idx, depth, &mut path, &mut gathered);
        for user in gathered {
            merge_member(&mut groups[idx].members, index, user);
        }
    }
}

fn gather(
    groups: &[DirectoryGroup],
    by_name: &BTreeMap<String, usize>,
    direct: &[Vec<UserRef>],
    idx: usize,
    depth: i32,
    path: &mut Vec<usize>,
    out: &mut Vec<UserRef>,
) {
    if depth <= 0 {
        return;
    }
    for name in &groups[idx].nested_group_refs {
        let Some(&target) = by_name.get(name) else {
            tracing::warn!(group = %groups[idx].cn, nested = %name, "unresolved nested group reference");
            continue;
        };
        if path.contains(&target) {
            // Cycle: the target is already being expanded above us.
            continue;
        }
        out.extend(direct[target].iter().copied());
        path.push(target);
        gather(groups, by_name, direct, target, depth - 1, path, out);
        path.pop();
    }
}

/// Forwarding mode: represent each directly referenced nested group as
/// one synthetic pseudo-user so the outer list relays into the inner
/// list rather than duplicating its subscribers.
fn forward_as_pseudo_users(
    groups: &mut [DirectoryGroup],
    index: &mut UserIndex,
    by_name: &BTreeMap<String, usize>,
) {
    // Resolve the forwarding targets first, then mutate; the second
    // pass needs `&mut groups` while the first reads across groups.
    let mut wanted: Vec<(usize, String)> = Vec::new();
    for (idx, group) in groups.iter().enumerate() {
        if group.mail_address.is_none() {
            continue;
        }
        for name in &group.nested_group_refs {
            let Some(&target) = by_name.get(name) else {
                tracing::warn!(group = %group.cn, nested = %name, "unresolved nested group reference");
                continue;
            };
            match &groups[target].mail_address {
                Some(list_address) => wanted.push((idx, list_address.clone())),
                None => tracing::warn!(
                    group = %group.cn,
                    nested = %name,
                    "nested group has no list address to forward into"
                ),
            }
        }
    }

    for (idx, list_address) in wanted {
        let user = index.lookup_primary(&list_address).unwrap_or_else(|| {
            index.push_synthetic(DirectoryUser {
                uid: list_address.clone(),
                primary_mail: list_address.clone(),
                display_name: format!("{list_address} mailing list"),
                secondary_mails: Vec::new(),
                group_refs: Vec::new(),
            })
        });
        merge_member(&mut groups[idx].members, index, user);
    }
}

fn merge_member(members: &mut Vec<UserRef>, index: &UserIndex, user: UserRef) {
    let mail = &index.get(user).primary_mail;
    let present = members
        .iter()
        .any(|existing| index.get(*existing).primary_mail.eq_ignore_ascii_case(mail));
    if !present {
        members.push(user);
    }
}
