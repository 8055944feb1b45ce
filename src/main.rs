use anyhow::Result;
use clap::Parser;
use std::collections::BTreeMap;
use tracing_subscriber::EnvFilter;

use mlsync::apply::{apply_plan, ApplySummary, ExecPolicy};
use mlsync::cli::{parse_rename, RootArgs};
use mlsync::directory::{build_groups, build_users, RewriteRules, UserIndex};
use mlsync::mailman::MailmanStore;
use mlsync::nesting::resolve_nesting;
use mlsync::plan::{plan_group, GroupPlan, PlanOptions};
use mlsync::privs::drop_to_user;
use mlsync::udm::DirectorySource;

fn main() -> Result<()> {
    let args = RootArgs::parse();
    init_tracing(args.verbose);
    run(&args)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(args: &RootArgs) -> Result<()> {
    let source = directory_source(args);
    // A failing directory query is the one fatal collaborator: nothing
    // downstream can reconcile against partial data.
    let (users_text, groups_text) = source.load()?;

    let rewrite = rewrite_rules(args)?;
    let mut index = UserIndex::build(build_users(&users_text));
    let mut groups = build_groups(&groups_text, &index, &rewrite)?;
    tracing::info!(
        users = index.len(),
        groups = groups.len(),
        "directory model built"
    );
    resolve_nesting(&mut groups, &mut index, args.nested);

    if let Some(name) = &args.run_as {
        drop_to_user(name)?;
    }

    let mut store = MailmanStore::new(&args.mailman_url, &args.mailman_user, &args.mailman_pass);
    let opts = PlanOptions {
        plan_only: args.dry_run,
        keep: args.keep,
    };

    let mut plans: Vec<GroupPlan> = Vec::new();
    let mut totals = ApplySummary::default();

    for group in &groups {
        let Some(list) = group.mail_address.as_deref() else {
            continue;
        };
        if !selected(list, &args.includes, &args.excludes) {
            tracing::debug!(group = %group.cn, list, "filtered out");
            continue;
        }
        tracing::info!(group = %group.cn, list, members = group.members.len(), "reconciling");

        let Some(plan) = plan_group(group, &index, &mut store, opts)? else {
            continue;
        };
        let policy = ExecPolicy {
            dry_run: args.dry_run,
            keep: args.keep,
            admin: admin_address(args.admin.as_deref(), list),
        };
        let summary = apply_plan(&mut store, &plan, &policy);
        totals.applied += summary.applied;
        totals.suppressed += summary.suppressed;
        totals.failed += summary.failed;
        if args.json {
            plans.push(plan);
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
    }
    tracing::info!(
        applied = totals.applied,
        suppressed = totals.suppressed,
        failed = totals.failed,
        "run complete"
    );
    // Individual action failures are not fatal; the tool is meant to be
    // re-run once the underlying condition clears.
    Ok(())
}

fn directory_source(args: &RootArgs) -> DirectorySource {
    match (&args.users_file, &args.groups_file) {
        (Some(users), Some(groups)) => DirectorySource::Files {
            users: users.clone(),
            groups: groups.clone(),
        },
        _ => DirectorySource::Query,
    }
}

fn rewrite_rules(args: &RootArgs) -> Result<RewriteRules> {
    let mut renames = BTreeMap::new();
    for raw in &args.renames {
        let (old, new) = parse_rename(raw)?;
        renames.insert(old, new);
    }
    Ok(RewriteRules {
        renames,
        domain: args.domain.clone(),
        prefix: args.prefix.clone(),
    })
}

/// Exclusion wins over inclusion; an empty include set selects all.
fn selected(list: &str, includes: &[String], excludes: &[String]) -> bool {
    if excludes.iter().any(|addr| addr.eq_ignore_ascii_case(list)) {
        return false;
    }
    includes.is_empty() || includes.iter().any(|addr| addr.eq_ignore_ascii_case(list))
}

fn admin_address(configured: Option<&str>, list: &str) -> String {
    if let Some(admin) = configured {
        return admin.to_string();
    }
    match list.split_once('@') {
        Some((_, domain)) => format!("admin@{domain}"),
        None => "admin@localhost".to_string(),
    }
}
