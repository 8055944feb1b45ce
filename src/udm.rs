//! Directory query collaborator.
//!
//! The source of truth is the directory management tool, invoked once
//! for users and once for groups; its raw text output feeds the record
//! parser untouched. An offline variant reads pre-captured output from
//! disk, with `#` comment lines stripped. A non-zero exit from the
//! query tool is fatal to the whole run, since everything downstream
//! would reconcile against incomplete data.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

const UDM_BIN: &str = "/usr/sbin/udm";

/// Where directory records come from for this run.
#[derive(Debug, Clone)]
pub enum DirectorySource {
    /// Invoke the directory tool live.
    Query,
    /// Read pre-captured query output from disk.
    Files { users: PathBuf, groups: PathBuf },
}

impl DirectorySource {
    /// Fetch the raw (users, groups) record text.
    pub fn load(&self) -> Result<(String, String)> {
        match self {
            Self::Query => Ok((query("users/user")?, query("groups/group")?)),
            Self::Files { users, groups } => Ok((read_capture(users)?, read_capture(groups)?)),
        }
    }
}

fn query(module: &str) -> Result<String> {
    let output = Command::new(UDM_BIN)
        .args([module, "list"])
        .output()
        .with_context(|| format!("run {UDM_BIN} {module} list"))?;
    if !output.status.success() {
        bail!(
            "udm {module} list exited with {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Read captured query output, dropping `#` comment lines.
///
/// Blank lines are record separators and must survive unchanged.
pub fn read_capture(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read captured directory output {}", path.display()))?;
    let mut kept = String::with_capacity(raw.len());
    for line in raw.lines() {
        if line.starts_with('#') {
            continue;
        }
        kept.push_str(line);
        kept.push('\n');
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn capture_strips_comments_but_keeps_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(
            file,
            "# captured 2024-05-02\nuid=a,dc=x\n  mail: a@x\n\n# next record\nuid=b,dc=x\n"
        )
        .expect("write");

        let text = read_capture(file.path()).expect("read");
        assert_eq!(text, "uid=a,dc=x\n  mail: a@x\n\nuid=b,dc=x\n");
    }

    #[test]
    fn missing_capture_file_is_an_error() {
        let err = read_capture(Path::new("/nonexistent/users.txt")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/users.txt"));
    }
}
