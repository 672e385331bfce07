//! Responder Supervisor
//!
//! Owns the single long-running responder process that answers
//! revocation-status queries for the whole forest. There are no partial
//! updates: any tree change that affects certificate validity requires a
//! full restart, a cancel-then-relaunch with no graceful drain.

use crate::errors::Result;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use tracing::{debug, info, warn};

pub struct OcspResponder {
    base_path: PathBuf,
    child: Mutex<Option<Child>>,
}

impl OcspResponder {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        OcspResponder {
            base_path: base_path.into(),
            child: Mutex::new(None),
        }
    }

    /// Launch the responder process. Its diagnostic output is drained into
    /// the log; the process itself runs with no timeout.
    pub fn start(&self, command: &[String]) -> Result<()> {
        let mut child = Command::new(&command[0])
            .args(&command[1..])
            .current_dir(&self.base_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    debug!("ocsp: {}", line);
                }
            });
        }
        info!("OCSP responder started (pid {})", child.id());
        *self.child.lock().unwrap() = Some(child);
        Ok(())
    }

    /// Cancel the current process and launch a new one built from the
    /// current forest snapshot. In-flight queries are abandoned.
    pub fn restart(&self, command: &[String]) -> Result<()> {
        self.stop();
        self.start(command)
    }

    /// Kill the current responder, if any.
    pub fn stop(&self) {
        if let Some(mut child) = self.child.lock().unwrap().take() {
            if let Err(e) = child.kill() {
                warn!("failed to kill OCSP responder: {}", e);
            }
            let _ = child.wait();
            info!("OCSP responder stopped");
        }
    }

    /// Whether the responder process is currently alive.
    pub fn is_running(&self) -> bool {
        let mut guard = self.child.lock().unwrap();
        match guard.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                _ => {
                    guard.take();
                    false
                }
            },
            None => false,
        }
    }
}

impl Drop for OcspResponder {
    fn drop(&mut self) {
        self.stop();
    }
}
