//! List-store interface boundary.
//!
//! The reconciliation core never talks to the mailing-list platform
//! directly; it goes through [`ListStore`]. The production
//! implementation is the Mailman REST client in [`crate::mailman`];
//! [`MemoryStore`] is a complete in-memory implementation used by the
//! test suite and by nothing else.
//!
//! "Address already linked" and "identity not found" are ordinary
//! return values here ([`RegisterOutcome`], `Option<Identity>`), not
//! errors; the planner branches on them.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Subscription role on a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    /// Full posting/subscription status.
    Member,
    /// Restricted/whitelisted posting status; non-member posts inherit
    /// the list's configured default moderation action.
    NonMember,
}

/// Point-in-time member/non-member snapshot of one list.
///
/// Addresses are stored case-folded. The planner never mutates a
/// snapshot: mutations go through the executor and become visible
/// only on the next full run.
#[derive(Debug, Clone, Default)]
pub struct ListRoster {
    pub list_address: String,
    pub members: BTreeSet<String>,
    pub non_members: BTreeSet<String>,
}

impl ListRoster {
    pub fn empty(list_address: &str) -> Self {
        Self {
            list_address: list_address.to_string(),
            ..Self::default()
        }
    }

    pub fn is_member(&self, addr: &str) -> bool {
        self.members.contains(&fold(addr))
    }

    pub fn is_non_member(&self, addr: &str) -> bool {
        self.non_members.contains(&fold(addr))
    }

    pub fn has_any_role(&self, addr: &str) -> bool {
        self.is_member(addr) || self.is_non_member(addr)
    }
}

/// The list platform's representation of a person: one or more
/// registered addresses, at most one of them preferred.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub display_name: String,
    pub addresses: Vec<String>,
    pub preferred: Option<String>,
}

impl Identity {
    pub fn owns(&self, addr: &str) -> bool {
        self.addresses.iter().any(|a| a.eq_ignore_ascii_case(addr))
    }
}

/// Outcome of registering an address to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    AlreadyRegistered,
}

/// External identity/list-store operations, defined only at this
/// boundary. Identities are addressed by any of their registered
/// addresses.
pub trait ListStore {
    /// Current roster of `list`, or `None` when the list does not exist.
    fn roster(&mut self, list: &str) -> Result<Option<ListRoster>>;

    /// Create a list with the fixed default policy: private,
    /// non-advertised, moderated subscription and unsubscription, and
    /// `admin` subscribed as owner and moderator.
    fn create_list(&mut self, list: &str, admin: &str) -> Result<()>;

    fn find_identity(&mut self, address: &str) -> Result<Option<Identity>>;

    fn create_identity(&mut self, primary: &str, display_name: &str) -> Result<()>;

    fn register_address(&mut self, identity: &str, address: &str) -> Result<RegisterOutcome>;

    fn set_preferred_address(&mut self, identity: &str, address: &str) -> Result<()>;

    fn subscribe(&mut self, list: &str, address: &str, role: MemberRole) -> Result<()>;

    /// Remove every role `address` holds on `list`. Removing an address
    /// that holds no role is a no-op, not an error.
    fn unsubscribe(&mut self, list: &str, address: &str) -> Result<()>;
}

fn fold(addr: &str) -> String {
    addr.to_ascii_lowercase()
}

#[derive(Debug, Default, Clone)]
struct MemIdentity {
    display_name: String,
    addresses: Vec<String>,
    preferred: Option<String>,
}

#[derive(Debug, Default, Clone)]
struct MemList {
    admin: String,
    members: BTreeSet<String>,
    non_members: BTreeSet<String>,
}

/// In-memory [`ListStore`] backing the test suite.
#[derive(Debug, Default)]
pub struct MemoryStore {
    identities: Vec<MemIdentity>,
    lists: BTreeMap<String, MemList>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a list with pre-existing member/non-member addresses.
    pub fn seed_list(&mut self, list: &str, members: &[&str], non_members: &[&str]) {
        self.lists.insert(
            fold(list),
            MemList {
                admin: String::new(),
                members: members.iter().map(|a| fold(a)).collect(),
                non_members: non_members.iter().map(|a| fold(a)).collect(),
            },
        );
    }

    /// Seed an identity owning `addresses`, the first being preferred.
    pub fn seed_identity(&mut self, display_name: &str, addresses: &[&str]) {
        self.identities.push(MemIdentity {
            display_name: display_name.to_string(),
            addresses: addresses.iter().map(|a| fold(a)).collect(),
            preferred: addresses.first().map(|a| fold(a)),
        });
    }

    pub fn list_admin(&self, list: &str) -> Option<&str> {
        self.lists.get(&fold(list)).map(|l| l.admin.as_str())
    }

    fn identity_index(&self, address: &str) -> Option<usize> {
        let needle = fold(address);
        self.identities
            .iter()
            .position(|identity| identity.addresses.iter().any(|a| *a == needle))
    }

    fn list_mut(&mut self, list: &str) -> Result<&mut MemList> {
        self.lists
            .get_mut(&fold(list))
            .ok_or_else(|| anyhow!("no such list: {list}"))
    }
}

impl ListStore for MemoryStore {
    fn roster(&mut self, list: &str) -> Result<Option<ListRoster>> {
        Ok(self.lists.get(&fold(list)).map(|entry| ListRoster {
            list_address: fold(list),
            members: entry.members.clone(),
            non_members: entry.non_members.clone(),
        }))
    }

    fn create_list(&mut self, list: &str, admin: &str) -> Result<()> {
        if self.lists.contains_key(&fold(list)) {
            return Err(anyhow!("list already exists: {list}"));
        }
        self.lists.insert(
            fold(list),
            MemList {
                admin: fold(admin),
                ..MemList::default()
            },
        );
        Ok(())
    }

    fn find_identity(&mut self, address: &str) -> Result<Option<Identity>> {
        Ok(self.identity_index(address).map(|idx| {
            let identity = &self.identities[idx];
            Identity {
                display_name: identity.display_name.clone(),
                addresses: identity.addresses.clone(),
                preferred: identity.preferred.clone(),
            }
        }))
    }

    fn create_identity(&mut self, primary: &str, display_name: &str) -> Result<()> {
        if self.identity_index(primary).is_some() {
            return Err(anyhow!("identity already exists for {primary}"));
        }
        self.identities.push(MemIdentity {
            display_name: display_name.to_string(),
            addresses: vec![fold(primary)],
            preferred: None,
        });
        Ok(())
    }

    fn register_address(&mut self, identity: &str, address: &str) -> Result<RegisterOutcome> {
        let idx = self
            .identity_index(identity)
            .ok_or_else(|| anyhow!("no identity owns {identity}"))?;
        let folded = fold(address);
        if self.identities[idx].addresses.contains(&folded) {
            return Ok(RegisterOutcome::AlreadyRegistered);
        }
        if self.identity_index(address).is_some() {
            return Err(anyhow!("{address} is already linked to another identity"));
        }
        self.identities[idx].addresses.push(folded);
        Ok(RegisterOutcome::Registered)
    }

    fn set_preferred_address(&mut self, identity: &str, address: &str) -> Result<()> {
        let idx = self
            .identity_index(identity)
            .ok_or_else(|| anyhow!("no identity owns {identity}"))?;
        let folded = fold(address);
        if !self.identities[idx].addresses.contains(&folded) {
            return Err(anyhow!("{address} is not registered to this identity"));
        }
        self.identities[idx].preferred = Some(folded);
        Ok(())
    }

    fn subscribe(&mut self, list: &str, address: &str, role: MemberRole) -> Result<()> {
        let entry = self.list_mut(list)?;
        let folded = fold(address);
        match role {
            MemberRole::Member => entry.members.insert(folded),
            MemberRole::NonMember => entry.non_members.insert(folded),
        };
        Ok(())
    }

    fn unsubscribe(&mut self, list: &str, address: &str) -> Result<()> {
        let entry = self.list_mut(list)?;
        let folded = fold(address);
        entry.members.remove(&folded);
        entry.non_members.remove(&folded);
        Ok(())
    }
}
