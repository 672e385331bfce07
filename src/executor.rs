//! Artifact Executor
//!
//! Invokes the external crypto toolkit inside a node's working directory
//! and turns the outcome into a [`Freshness`] tag. `ensure` is
//! skip-if-exists: when every expected output is already present the
//! command is not run at all; otherwise the command must exit zero and
//! every expected output must exist afterwards. `run` is for commands
//! whose side effect is a state mutation rather than file creation
//! (revoke, verify).

use crate::errors::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Whether a build step actually produced its output or found it on disk.
///
/// A freshly produced upstream artifact forces the next step to ignore any
/// existing output and regenerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    AlreadyPresent,
    Produced,
}

impl Freshness {
    pub fn is_fresh(self) -> bool {
        matches!(self, Freshness::Produced)
    }
}

pub struct Executor {
    base_path: PathBuf,
}

impl Executor {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Executor {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve (and create, idempotently) the working directory for a
    /// node's relative path.
    pub fn working_dir(&self, relative_path: &str) -> Result<PathBuf> {
        let dir = self.base_path.join(relative_path);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Run `cmd` in the node's working directory unless every expected
    /// output already exists there.
    pub fn ensure(
        &self,
        relative_path: &str,
        cmd: &[String],
        expected: &[String],
    ) -> Result<Freshness> {
        let dir = self.working_dir(relative_path)?;
        if expected.iter().all(|name| dir.join(name).exists()) {
            info!("{} already existed", expected.join(","));
            return Ok(Freshness::AlreadyPresent);
        }
        self.spawn(&dir, cmd)?;
        let missing: Vec<PathBuf> = expected
            .iter()
            .map(|name| dir.join(name))
            .filter(|path| !path.exists())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingOutputs {
                command: display_command(cmd),
                missing,
            });
        }
        info!("{} file(s) created", expected.join(","));
        Ok(Freshness::Produced)
    }

    /// Run `cmd` in the node's working directory with no output gating.
    pub fn run(&self, relative_path: &str, cmd: &[String]) -> Result<()> {
        let dir = self.working_dir(relative_path)?;
        self.spawn(&dir, cmd)
    }

    fn spawn(&self, dir: &Path, cmd: &[String]) -> Result<()> {
        let output = Command::new(&cmd[0])
            .args(&cmd[1..])
            .current_dir(dir)
            .output()?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !stderr.is_empty() {
            debug!("{}", stderr);
        }
        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: display_command(cmd),
                status: output.status,
                stderr,
            });
        }
        Ok(())
    }
}

/// Leading tokens only; the full argv carries key passwords.
fn display_command(cmd: &[String]) -> String {
    cmd.iter()
        .take(2)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_ensure_produces_then_skips() {
        let base = tempfile::tempdir().unwrap();
        let executor = Executor::new(base.path());
        let cmd = sh("echo hello > out.txt");
        let expected = vec!["out.txt".to_string()];

        let first = executor.ensure("node", &cmd, &expected).unwrap();
        assert_eq!(first, Freshness::Produced);
        assert!(first.is_fresh());

        // second call must not rerun the command
        let cmd_would_fail = sh("exit 1");
        let second = executor.ensure("node", &cmd_would_fail, &expected).unwrap();
        assert_eq!(second, Freshness::AlreadyPresent);
    }

    #[test]
    fn test_ensure_surfaces_stderr_on_failure() {
        let base = tempfile::tempdir().unwrap();
        let executor = Executor::new(base.path());
        let cmd = sh("echo broken key >&2; exit 3");
        let err = executor
            .ensure("node", &cmd, &["out.txt".to_string()])
            .unwrap_err();
        match err {
            Error::CommandFailed { stderr, .. } => assert_eq!(stderr, "broken key"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_ensure_detects_missing_outputs() {
        let base = tempfile::tempdir().unwrap();
        let executor = Executor::new(base.path());
        let cmd = sh("true");
        let err = executor
            .ensure("node", &cmd, &["never-created.crt".to_string()])
            .unwrap_err();
        match err {
            Error::MissingOutputs { missing, .. } => {
                assert_eq!(missing.len(), 1);
                assert!(missing[0].ends_with("never-created.crt"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_run_has_no_output_gating() {
        let base = tempfile::tempdir().unwrap();
        let executor = Executor::new(base.path());
        executor.run("node", &sh("true")).unwrap();
        assert!(executor.run("node", &sh("exit 2")).is_err());
    }

    #[test]
    fn test_working_dir_is_created_once() {
        let base = tempfile::tempdir().unwrap();
        let executor = Executor::new(base.path());
        let dir = executor.working_dir("a/b").unwrap();
        assert!(dir.is_dir());
        // idempotent
        assert_eq!(executor.working_dir("a/b").unwrap(), dir);
    }

    #[test]
    fn test_display_command_hides_trailing_args() {
        let cmd = vec![
            "openssl".to_string(),
            "genrsa".to_string(),
            "-passout".to_string(),
            "pass:secret".to_string(),
        ];
        assert_eq!(display_command(&cmd), "openssl genrsa");
    }
}
