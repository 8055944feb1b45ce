//! CLI argument parsing.
//!
//! The CLI is intentionally thin: it selects data sources and policy
//! flags for a single reconciliation run without embedding any of the
//! diff logic itself.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use crate::mailman;

/// Command-line surface for one reconciliation run.
#[derive(Parser, Debug)]
#[command(
    name = "mlsync",
    version,
    about = "Mirror directory group membership into mailing list rosters",
    after_help = "Examples:\n  mlsync --dry-run\n  mlsync -n 2 -a admin@lists.example -D lists.example\n  mlsync --users-file users.txt --groups-file groups.txt --json\n  mlsync -k -R staff@co.example=team@co.example"
)]
pub struct RootArgs {
    /// Plan only; print every action without applying any
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// Never remove subscribers; report extra members instead
    #[arg(short = 'k', long)]
    pub keep: bool,

    /// Nested group expansion depth (0 disables, negative forwards
    /// nested lists as single recipients)
    #[arg(short = 'n', long, value_name = "DEPTH", default_value_t = 1, allow_hyphen_values = true)]
    pub nested: i32,

    /// Owner/moderator address for newly created lists
    #[arg(short = 'a', long, value_name = "ADDR")]
    pub admin: Option<String>,

    /// Prefix prepended to the local part of every list address
    #[arg(short = 'p', long, value_name = "PREFIX")]
    pub prefix: Option<String>,

    /// Replace the domain of every list address
    #[arg(short = 'D', long, value_name = "DOMAIN")]
    pub domain: Option<String>,

    /// Exact-match list rename, OLD=NEW (repeatable)
    #[arg(short = 'R', long = "rename", value_name = "OLD=NEW")]
    pub renames: Vec<String>,

    /// Only reconcile these list addresses (repeatable)
    #[arg(short = 'i', long = "include", value_name = "ADDR")]
    pub includes: Vec<String>,

    /// Skip these list addresses (repeatable; wins over --include)
    #[arg(short = 'x', long = "exclude", value_name = "ADDR")]
    pub excludes: Vec<String>,

    /// Read captured `udm users/user list` output instead of querying
    #[arg(long, value_name = "PATH", requires = "groups_file")]
    pub users_file: Option<PathBuf>,

    /// Read captured `udm groups/group list` output instead of querying
    #[arg(long, value_name = "PATH", requires = "users_file")]
    pub groups_file: Option<PathBuf>,

    /// Drop effective privileges to this system user before mutating
    #[arg(short = 'u', long, value_name = "NAME")]
    pub run_as: Option<String>,

    /// Dump the computed plan as JSON to stdout
    #[arg(long)]
    pub json: bool,

    /// Mailman Core REST endpoint
    #[arg(long, value_name = "URL", env = "MLSYNC_REST_URL", default_value = mailman::DEFAULT_URL)]
    pub mailman_url: String,

    /// Mailman REST user
    #[arg(long, value_name = "NAME", env = "MLSYNC_REST_USER", default_value = "restadmin")]
    pub mailman_user: String,

    /// Mailman REST password
    #[arg(long, value_name = "PASS", env = "MLSYNC_REST_PASS", default_value = "restpass")]
    pub mailman_pass: String,

    /// Emit debug-level progress output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Parse one `OLD=NEW` rename pair.
pub fn parse_rename(raw: &str) -> Result<(String, String)> {
    let (old, new) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("invalid rename (expected OLD=NEW): {raw}"))?;
    if old.is_empty() || new.is_empty() {
        return Err(anyhow!("invalid rename (expected OLD=NEW): {raw}"));
    }
    Ok((old.to_string(), new.to_string()))
}
