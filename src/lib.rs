//! Reconcile directory group membership into mailing list rosters.
//!
//! The pipeline runs leaf-first: raw directory records are parsed into
//! attribute blocks ([`records`]), turned into a typed user/group model
//! ([`directory`]), expanded across nested groups ([`nesting`]), and
//! then diffed against each list's current roster ([`plan`]). The
//! executor ([`apply`]) is the only component that mutates external
//! state, through the [`roster::ListStore`] boundary.
//!
//! The directory is always the source of truth; list-only state is
//! never pushed back.

pub mod apply;
pub mod cli;
pub mod directory;
pub mod mailman;
pub mod nesting;
pub mod plan;
pub mod privs;
pub mod records;
pub mod roster;
pub mod udm;
