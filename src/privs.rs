//! Process privilege de-escalation.
//!
//! The list store is owned by a dedicated system account; when the tool
//! starts as root it drops its effective uid/gid to that account before
//! touching list state. Effective, not real: the directory query may
//! still need the original privileges on a re-run.

use anyhow::{bail, Context, Result};
use std::ffi::CString;

/// Switch effective gid then uid to the given system user.
pub fn drop_to_user(name: &str) -> Result<()> {
    let c_name = CString::new(name).context("user name contains NUL")?;
    // SAFETY: getpwnam returns a pointer into static storage; the
    // fields are copied out before any other libc call.
    let pw = unsafe { libc::getpwnam(c_name.as_ptr()) };
    if pw.is_null() {
        bail!("no such system user: {name}");
    }
    let (uid, gid) = unsafe { ((*pw).pw_uid, (*pw).pw_gid) };

    // Group first; once the uid is gone we may no longer be allowed to
    // change the gid.
    if unsafe { libc::setegid(gid) } != 0 {
        return Err(std::io::Error::last_os_error()).with_context(|| format!("setegid({gid})"));
    }
    if unsafe { libc::seteuid(uid) } != 0 {
        return Err(std::io::Error::last_os_error()).with_context(|| format!("seteuid({uid})"));
    }
    tracing::info!(user = name, uid, gid, "dropped effective privileges");
    Ok(())
}
