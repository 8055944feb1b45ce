//! Mailman Core REST collaborator.
//!
//! Production [`ListStore`] backed by the Mailman 3 REST API. This is
//! the interface boundary to the list platform: the client translates
//! store operations into REST calls and nothing else: no caching, no
//! retries (the tool is re-run instead), no interpretation beyond
//! mapping 404 to "not found". The test suite runs against the
//! in-memory store; this client is exercised only against a live
//! Mailman instance.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

use crate::roster::{Identity, ListRoster, ListStore, MemberRole, RegisterOutcome};

/// Default Mailman Core REST endpoint.
pub const DEFAULT_URL: &str = "http://localhost:8001/3.1";

pub struct MailmanStore {
    agent: ureq::Agent,
    base: String,
    auth: String,
}

impl MailmanStore {
    pub fn new(base_url: &str, user: &str, password: &str) -> Self {
        let credentials = BASE64.encode(format!("{user}:{password}"));
        Self {
            agent: ureq::Agent::new_with_defaults(),
            base: base_url.trim_end_matches('/').to_string(),
            auth: format!("Basic {credentials}"),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }

    /// GET returning `None` on 404.
    fn get(&self, path: &str) -> Result<Option<Value>> {
        let result = self
            .agent
            .get(self.url(path))
            .header("Authorization", &self.auth)
            .call();
        match result {
            Ok(mut response) => {
                let value = response
                    .body_mut()
                    .read_json::<Value>()
                    .with_context(|| format!("decode response for {path}"))?;
                Ok(Some(value))
            }
            Err(ureq::Error::StatusCode(404)) => Ok(None),
            Err(err) => Err(anyhow!(err)).with_context(|| format!("GET {path}")),
        }
    }

    fn post(&self, path: &str, body: Value) -> Result<()> {
        self.agent
            .post(self.url(path))
            .header("Authorization", &self.auth)
            .send_json(body)
            .map(|_| ())
            .map_err(|err| anyhow!(err))
            .with_context(|| format!("POST {path}"))
    }

    fn patch(&self, path: &str, body: Value) -> Result<()> {
        self.agent
            .patch(self.url(path))
            .header("Authorization", &self.auth)
            .send_json(body)
            .map(|_| ())
            .map_err(|err| anyhow!(err))
            .with_context(|| format!("PATCH {path}"))
    }

    fn delete_link(&self, link: &str) -> Result<()> {
        self.agent
            .delete(link)
            .header("Authorization", &self.auth)
            .call()
            .map(|_| ())
            .map_err(|err| anyhow!(err))
            .with_context(|| format!("DELETE {link}"))
    }

    /// The user id linked to `address`, if any.
    fn user_id_for(&self, address: &str) -> Result<Option<String>> {
        let Some(user) = self.get(&format!("addresses/{address}/user"))? else {
            return Ok(None);
        };
        Ok(user["user_id"].as_str().map(|id| id.to_string()).or_else(|| {
            user["user_id"].as_u64().map(|id| id.to_string())
        }))
    }

    fn roster_entries(&self, list: &str, role: &str) -> Result<Option<Vec<String>>> {
        let Some(page) = self.get(&format!("lists/{list}/roster/{role}"))? else {
            return Ok(None);
        };
        let entries = page["entries"].as_array().cloned().unwrap_or_default();
        Ok(Some(
            entries
                .iter()
                .filter_map(|entry| entry["email"].as_str())
                .map(|email| email.to_ascii_lowercase())
                .collect(),
        ))
    }
}

fn list_id(list: &str) -> String {
    list.replace('@', ".")
}

impl ListStore for MailmanStore {
    fn roster(&mut self, list: &str) -> Result<Option<ListRoster>> {
        let Some(members) = self.roster_entries(list, "member")? else {
            return Ok(None);
        };
        let non_members = self.roster_entries(list, "nonmember")?.unwrap_or_default();
        Ok(Some(ListRoster {
            list_address: list.to_ascii_lowercase(),
            members: members.into_iter().collect(),
            non_members: non_members.into_iter().collect(),
        }))
    }

    fn create_list(&mut self, list: &str, admin: &str) -> Result<()> {
        self.post("lists", json!({ "fqdn_listname": list }))?;
        // Fixed policy for directory-backed lists: private, hidden,
        // moderated joins and leaves.
        self.patch(
            &format!("lists/{list}/config"),
            json!({
                "advertised": false,
                "archive_policy": "private",
                "subscription_policy": "moderate",
                "unsubscription_policy": "moderate",
            }),
        )?;
        for role in ["owner", "moderator"] {
            self.post(
                "members",
                json!({
                    "list_id": list_id(list),
                    "subscriber": admin,
                    "role": role,
                }),
            )?;
        }
        Ok(())
    }

    fn find_identity(&mut self, address: &str) -> Result<Option<Identity>> {
        let Some(user_id) = self.user_id_for(address)? else {
            return Ok(None);
        };
        let user = self
            .get(&format!("users/{user_id}"))?
            .ok_or_else(|| anyhow!("user {user_id} vanished between lookups"))?;
        let addresses = self
            .get(&format!("users/{user_id}/addresses"))?
            .and_then(|page| page["entries"].as_array().cloned())
            .unwrap_or_default()
            .iter()
            .filter_map(|entry| entry["email"].as_str())
            .map(|email| email.to_ascii_lowercase())
            .collect();
        let preferred = self
            .get(&format!("users/{user_id}/preferred_address"))?
            .and_then(|entry| entry["email"].as_str().map(|email| email.to_ascii_lowercase()));
        Ok(Some(Identity {
            display_name: user["display_name"].as_str().unwrap_or_default().to_string(),
            addresses,
            preferred,
        }))
    }

    fn create_identity(&mut self, primary: &str, display_name: &str) -> Result<()> {
        self.post(
            "users",
            json!({ "email": primary, "display_name": display_name }),
        )
    }

    fn register_address(&mut self, identity: &str, address: &str) -> Result<RegisterOutcome> {
        let owner = self
            .user_id_for(identity)?
            .ok_or_else(|| anyhow!("no identity owns {identity}"))?;
        if let Some(existing) = self.user_id_for(address)? {
            if existing == owner {
                return Ok(RegisterOutcome::AlreadyRegistered);
            }
            return Err(anyhow!("{address} is already linked to another identity"));
        }
        self.post(&format!("users/{owner}/addresses"), json!({ "email": address }))?;
        // Directory-sourced addresses are authoritative; skip the
        // confirmation round-trip.
        self.post(&format!("addresses/{address}/verify"), json!({}))?;
        Ok(RegisterOutcome::Registered)
    }

    fn set_preferred_address(&mut self, identity: &str, address: &str) -> Result<()> {
        let owner = self
            .user_id_for(identity)?
            .ok_or_else(|| anyhow!("no identity owns {identity}"))?;
        self.post(
            &format!("users/{owner}/preferred_address"),
            json!({ "email": address }),
        )
    }

    fn subscribe(&mut self, list: &str, address: &str, role: MemberRole) -> Result<()> {
        let role = match role {
            MemberRole::Member => "member",
            MemberRole::NonMember => "nonmember",
        };
        self.post(
            "members",
            json!({
                "list_id": list_id(list),
                "subscriber": address,
                "role": role,
                "pre_verified": true,
                "pre_confirmed": true,
                "pre_approved": true,
            }),
        )
    }

    fn unsubscribe(&mut self, list: &str, address: &str) -> Result<()> {
        let Some(page) = self.get(&format!(
            "members/find?list_id={}&subscriber={address}",
            list_id(list)
        ))?
        else {
            return Ok(());
        };
        let entries = page["entries"].as_array().cloned().unwrap_or_default();
        for entry in entries {
            if let Some(link) = entry["self_link"].as_str() {
                self.delete_link(link)?;
            }
        }
        Ok(())
    }
}
