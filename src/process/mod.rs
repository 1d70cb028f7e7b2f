pub mod model;
pub mod system;

use std::fmt;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{Result, UpdateError};
use crate::types::Pid;

pub use model::{model_for, ExplicitTermination, ProcessModel, RestartOutcome, SupervisorRestart};
pub use system::SystemProcesses;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: Pid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessTarget {
    Id(Pid),
    Name(String),
}

impl fmt::Display for ProcessTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessTarget::Id(pid) => write!(f, "pid {}", pid),
            ProcessTarget::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Operating system process access.
pub trait ProcessProvider {
    fn exists(&self, pid: Pid) -> bool;

    fn find_by_name(&self, name: &str) -> Vec<ProcessHandle>;

    fn exists_by_name(&self, name: &str) -> bool {
        !self.find_by_name(name).is_empty()
    }

    /// Stops a process, forcibly if it does not exit on its own. A process
    /// that is already gone is not an error.
    fn kill(&self, pid: Pid) -> Result<()>;

    fn kill_all(&self, name: &str) -> Result<usize> {
        let handles = self.find_by_name(name);
        for handle in &handles {
            debug!(pid = %handle.pid, name = %handle.name, "killing process");
            self.kill(handle.pid)?;
        }
        Ok(handles.len())
    }

    /// Starts `executable` detached, with `working_dir` as its current directory.
    fn spawn(&self, executable: &Path, working_dir: &Path) -> Result<Pid>;
}

/// Stops and starts the application being updated.
pub struct ProcessController {
    provider: Box<dyn ProcessProvider>,
    names: Vec<String>,
    executable: String,
}

impl ProcessController {
    pub fn new(provider: Box<dyn ProcessProvider>, names: Vec<String>, executable: String) -> Self {
        Self {
            provider,
            names,
            executable,
        }
    }

    pub fn exists(&self, target: &ProcessTarget) -> bool {
        match target {
            ProcessTarget::Id(pid) => self.provider.exists(*pid),
            ProcessTarget::Name(name) => self.provider.exists_by_name(name),
        }
    }

    /// True when any process carrying one of the application's names runs.
    pub fn is_running(&self) -> bool {
        self.names
            .iter()
            .any(|name| self.exists(&ProcessTarget::Name(name.clone())))
    }

    /// Logs every running instance of the application.
    pub fn log_running(&self) {
        for name in &self.names {
            for handle in self.provider.find_by_name(name) {
                debug!(pid = %handle.pid, name = %handle.name, "found running instance");
            }
        }
    }

    /// Kills every instance of the application by name and then `pid`.
    pub fn terminate(&self, pid: Pid) -> Result<()> {
        info!(pid = %pid, "killing all running processes");
        for name in &self.names {
            let killed = self.provider.kill_all(name)?;
            if killed > 0 {
                debug!(name = %name, count = killed, "killed by name");
            }
        }
        if self.provider.exists(pid) {
            self.provider.kill(pid)?;
        }
        if self.provider.exists(pid) {
            return Err(UpdateError::Process(format!("{} is still running after kill", pid)));
        }
        Ok(())
    }

    pub fn start(&self, install_dir: &Path) -> Result<Pid> {
        let executable = install_dir.join(&self.executable);
        info!(path = %executable.display(), "starting application");
        if !executable.is_file() {
            warn!(path = %executable.display(), "application executable is missing");
        }
        self.provider.spawn(&executable, install_dir)
    }
}
