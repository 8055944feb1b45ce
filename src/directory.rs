//! Typed directory model built from parsed record blocks.
//!
//! Users are built first so the index exists; groups are built second so
//! every member reference can be resolved eagerly against it. The index
//! is read-only for the rest of the run and is passed by reference into
//! the resolver and planner; groups hold `UserRef` handles into it,
//! never owned copies.

use anyhow::{bail, Result};
use std::collections::BTreeMap;

use crate::records::{parse_attribute, parse_attribute_first, parse_composite_field, split_blocks};

/// Secondary-address attribute tags, in discovery order.
const SECONDARY_MAIL_TAGS: [&str; 4] = [
    "mailAlternativeAddress",
    "mailForwardAddress",
    "e-mail",
    "mail",
];

/// Placeholder the directory emits for an unset attribute value.
const NONE_SENTINEL: &str = "None";

#[derive(Debug, Clone)]
pub struct DirectoryUser {
    pub uid: String,
    pub primary_mail: String,
    /// Empty string when the directory record has no display name.
    pub display_name: String,
    /// Ordered, case-insensitively de-duplicated; never contains the
    /// primary mail or the directory's `None` placeholder.
    pub secondary_mails: Vec<String>,
    /// Group names the directory claims membership of. Informational
    /// only; the planner works from group member lists instead.
    pub group_refs: Vec<String>,
}

/// Handle into the shared [`UserIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRef(usize);

#[derive(Debug, Clone)]
pub struct DirectoryGroup {
    pub cn: String,
    /// Post-rewrite list address; a group without one is not list-worthy
    /// and is filtered out before reconciliation.
    pub mail_address: Option<String>,
    /// Names of nested groups whose membership folds into this one.
    pub nested_group_refs: Vec<String>,
    /// Mutated exactly once, during nested-group resolution.
    pub members: Vec<UserRef>,
}

impl DirectoryGroup {
    pub fn contains(&self, index: &UserIndex, primary_mail: &str) -> bool {
        self.members
            .iter()
            .any(|user| index.get(*user).primary_mail.eq_ignore_ascii_case(primary_mail))
    }
}

/// Directory-wide user lookup table, built once per run.
///
/// Lookup by primary mail is a binary search over a case-folded sort
/// order. Lookup by secondary mail is a linear scan, the slower path,
/// reserved for the planner's extra-member classification.
pub struct UserIndex {
    users: Vec<DirectoryUser>,
    /// Indices into `users`, sorted by case-folded primary mail. On a
    /// duplicate primary mail only the first-parsed user stays
    /// reachable; the collision is reported, not fatal.
    sorted: Vec<usize>,
}

impl UserIndex {
    pub fn build(users: Vec<DirectoryUser>) -> Self {
        let mut sorted: Vec<usize> = (0..users.len()).collect();
        sorted.sort_by(|a, b| {
            fold(&users[*a].primary_mail)
                .cmp(&fold(&users[*b].primary_mail))
                .then(a.cmp(b))
        });
        sorted.dedup_by(|later, earlier| {
            let dup = fold(&users[*earlier].primary_mail) == fold(&users[*later].primary_mail);
            if dup {
                tracing::warn!(
                    mail = %users[*earlier].primary_mail,
                    kept_uid = %users[*earlier].uid,
                    dropped_uid = %users[*later].uid,
                    "duplicate primary mail across directory users, keeping first"
                );
            }
            dup
        });
        Self { users, sorted }
    }

    pub fn get(&self, user: UserRef) -> &DirectoryUser {
        &self.users[user.0]
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// O(log n) lookup by primary mail, case-insensitive.
    pub fn lookup_primary(&self, addr: &str) -> Option<UserRef> {
        let needle = fold(addr);
        self.sorted
            .binary_search_by(|idx| fold(&self.users[*idx].primary_mail).cmp(&needle))
            .ok()
            .map(|pos| UserRef(self.sorted[pos]))
    }

    /// Lookup by primary mail first, then a linear scan over secondary
    /// mails. Explicitly the slow path.
    pub fn lookup_any(&self, addr: &str) -> Option<UserRef> {
        if let Some(found) = self.lookup_primary(addr) {
            return Some(found);
        }
        self.sorted
            .iter()
            .find(|idx| {
                self.users[**idx]
                    .secondary_mails
                    .iter()
                    .any(|mail| mail.eq_ignore_ascii_case(addr))
            })
            .map(|idx| UserRef(*idx))
    }

    /// Append a synthetic user (nested-list forwarding) after the
    /// initial build. The sort order is repaired in place.
    pub fn push_synthetic(&mut self, user: DirectoryUser) -> UserRef {
        let idx = self.users.len();
        self.users.push(user);
        let key = fold(&self.users[idx].primary_mail);
        let pos = self
            .sorted
            .partition_point(|existing| fold(&self.users[*existing].primary_mail) < key);
        self.sorted.insert(pos, idx);
        UserRef(idx)
    }
}

fn fold(addr: &str) -> String {
    addr.to_ascii_lowercase()
}

/// List-address rewriting applied once per group, in fixed order:
/// exact rename, then domain substitution, then local-part prefix.
#[derive(Debug, Default, Clone)]
pub struct RewriteRules {
    pub renames: BTreeMap<String, String>,
    pub domain: Option<String>,
    pub prefix: Option<String>,
}

impl RewriteRules {
    pub fn apply(&self, addr: &str) -> String {
        let mut addr = match self.renames.get(addr) {
            Some(renamed) => renamed.clone(),
            None => addr.to_string(),
        };
        if let Some(domain) = &self.domain {
            if let Some((local, _)) = addr.split_once('@') {
                addr = format!("{local}@{domain}");
            }
        }
        if let Some(prefix) = &self.prefix {
            addr = format!("{prefix}{addr}");
        }
        addr
    }
}

/// Build one user per record block that carries a `uid=` anchor.
///
/// The primary mail is derived from the anchor line alone: `uid` joined
/// with the `dc` components as `uid@dc1.dc2`. Blocks without the anchor
/// are skipped with a warning, never parsed.
pub fn build_users(text: &str) -> Vec<DirectoryUser> {
    let mut users = Vec::new();
    for block in split_blocks(text) {
        let anchor = block[0];
        let uid = match parse_composite_field(anchor, "uid").into_iter().next() {
            Some(uid) => uid,
            None => {
                tracing::warn!(line = anchor, "skipping record without uid anchor");
                continue;
            }
        };
        let domain = parse_composite_field(anchor, "dc").join(".");
        let primary_mail = format!("{uid}@{domain}");

        let display_name = parse_attribute_first(&block, "displayName")
            .filter(|name| name != NONE_SENTINEL)
            .unwrap_or_default();

        let mut secondary_mails: Vec<String> = Vec::new();
        for tag in SECONDARY_MAIL_TAGS {
            for mail in parse_attribute(&block, tag) {
                if mail == NONE_SENTINEL || mail.eq_ignore_ascii_case(&primary_mail) {
                    continue;
                }
                if secondary_mails
                    .iter()
                    .any(|seen| seen.eq_ignore_ascii_case(&mail))
                {
                    continue;
                }
                secondary_mails.push(mail);
            }
        }

        let group_refs = parse_attribute(&block, "groups")
            .iter()
            .filter_map(|dn| parse_composite_field(dn, "cn").into_iter().next())
            .collect();

        users.push(DirectoryUser {
            uid,
            primary_mail,
            display_name,
            secondary_mails,
            group_refs,
        });
    }
    users
}

/// Build one group per record block that carries a `cn=` anchor.
///
/// Member references are resolved against the index immediately; a
/// member DN that resolves to no known user indicates upstream data
/// corruption and fails the run rather than being dropped silently.
pub fn build_groups(
    text: &str,
    index: &UserIndex,
    rewrite: &RewriteRules,
) -> Result<Vec<DirectoryGroup>> {
    let mut groups = Vec::new();
    for block in split_blocks(text) {
        let anchor = block[0];
        let cn = match parse_composite_field(anchor, "cn").into_iter().next() {
            Some(cn) => cn,
            None => {
                tracing::warn!(line = anchor, "skipping record without cn anchor");
                continue;
            }
        };

        let mail_address = parse_attribute_first(&block, "mailAddress")
            .or_else(|| parse_attribute_first(&block, "mail-address"))
            .filter(|addr| addr != NONE_SENTINEL)
            .map(|addr| rewrite.apply(&addr));

        let mut members = Vec::new();
        for dn in parse_attribute(&block, "users") {
            let Some(uid) = parse_composite_field(&dn, "uid").into_iter().next() else {
                tracing::warn!(group = %cn, member = %dn, "member reference without uid");
                continue;
            };
            let domain = parse_composite_field(&dn, "dc").join(".");
            let mail = format!("{uid}@{domain}");
            match index.lookup_primary(&mail) {
                Some(user) => members.push(user),
                None => bail!("group {cn}: member {mail} not found in directory user index"),
            }
        }

        let nested_group_refs = parse_attribute(&block, "nestedGroup")
            .iter()
            .filter_map(|dn| parse_composite_field(dn, "cn").into_iter().next())
            .collect();

        groups.push(DirectoryGroup {
            cn,
            mail_address,
            nested_group_refs,
            members,
        });
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub const USER_RECORDS: &str = "\
uid=alice,cn=users,dc=co,dc=example
  displayName: Alice Adams
  mailAlternativeAddress: a.alice@co.example
  mail: Alice@CO.example
  groups: cn=eng,cn=groups,dc=co,dc=example

uid=bob,cn=users,dc=co,dc=example
  displayName: Bob Brown
  mailForwardAddress: None

uid=carol,cn=users,dc=co,dc=example
  displayName: Carol Clay
";

    const GROUP_RECORDS: &str = "\
cn=eng,cn=groups,dc=co,dc=example
  mailAddress: eng@co.example
  users: uid=alice,cn=users,dc=co,dc=example
  users: uid=bob,cn=users,dc=co,dc=example

cn=all,cn=groups,dc=co,dc=example
  mailAddress: None
  nestedGroup: cn=eng,cn=groups,dc=co,dc=example
";

    fn index() -> UserIndex {
        UserIndex::build(build_users(USER_RECORDS))
    }

    #[test]
    fn derives_primary_mail_from_anchor() {
        let users = build_users(USER_RECORDS);
        assert_eq!(users.len(), 3);
        assert_eq!(users[0].primary_mail, "alice@co.example");
        assert_eq!(users[0].display_name, "Alice Adams");
    }

    #[test]
    fn secondary_mails_exclude_primary_and_sentinel() {
        let users = build_users(USER_RECORDS);
        // `mail: Alice@CO.example` equals the primary case-insensitively
        // and must not reappear as a secondary.
        assert_eq!(users[0].secondary_mails, vec!["a.alice@co.example"]);
        assert!(users[1].secondary_mails.is_empty());
    }

    #[test]
    fn index_lookup_is_case_insensitive() {
        let index = index();
        let user = index.lookup_primary("ALICE@co.EXAMPLE").expect("alice");
        assert_eq!(index.get(user).uid, "alice");
    }

    #[test]
    fn secondary_lookup_takes_the_slow_path() {
        let index = index();
        let user = index.lookup_any("A.Alice@co.example").expect("alias");
        assert_eq!(index.get(user).uid, "alice");
        assert!(index.lookup_primary("a.alice@co.example").is_none());
    }

    #[test]
    fn duplicate_primary_mail_keeps_first_user() {
        let text = "\
uid=dup,cn=users,dc=co,dc=example
  displayName: First

uid=DUP,cn=users,dc=co,dc=example
  displayName: Second
";
        let index = UserIndex::build(build_users(text));
        let user = index.lookup_primary("dup@co.example").expect("dup");
        assert_eq!(index.get(user).display_name, "First");
    }

    #[test]
    fn groups_resolve_members_against_index() {
        let index = index();
        let groups = build_groups(GROUP_RECORDS, &index, &RewriteRules::default()).expect("groups");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].cn, "eng");
        assert_eq!(groups[0].mail_address.as_deref(), Some("eng@co.example"));
        assert_eq!(groups[0].members.len(), 2);
        assert!(groups[0].contains(&index, "bob@co.example"));
        // `None` sentinel means no list address.
        assert_eq!(groups[1].mail_address, None);
        assert_eq!(groups[1].nested_group_refs, vec!["eng"]);
    }

    #[test]
    fn unresolved_member_reference_is_fatal() {
        let index = index();
        let text = "\
cn=ghost,cn=groups,dc=co,dc=example
  mailAddress: ghost@co.example
  users: uid=nobody,cn=users,dc=co,dc=example
";
        let err = build_groups(text, &index, &RewriteRules::default()).unwrap_err();
        assert!(err.to_string().contains("nobody@co.example"));
    }

    #[test]
    fn rewrite_applies_rename_then_domain_then_prefix() {
        let rewrite = RewriteRules {
            renames: BTreeMap::from([("eng@co.example".to_string(), "dev@co.example".to_string())]),
            domain: Some("lists.example".to_string()),
            prefix: Some("osb-".to_string()),
        };
        assert_eq!(rewrite.apply("eng@co.example"), "osb-dev@lists.example");
        assert_eq!(rewrite.apply("ops@co.example"), "osb-ops@lists.example");
    }

    #[test]
    fn synthetic_user_is_findable_after_push() {
        let mut index = index();
        let count = index.len();
        let user = index.push_synthetic(DirectoryUser {
            uid: "eng@co.example".to_string(),
            primary_mail: "eng@co.example".to_string(),
            display_name: "eng@co.example mailing list".to_string(),
            secondary_mails: Vec::new(),
            group_refs: Vec::new(),
        });
        assert_eq!(index.len(), count + 1);
        assert_eq!(index.lookup_primary("ENG@co.example"), Some(user));
    }
}
