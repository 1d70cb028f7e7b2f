use std::path::Path;
use std::thread;

use tracing::{error, info, warn};

use crate::config::model::{ProcessModelKind, RestartPolicy};
use crate::error::{Result, UpdateError};
use crate::process::ProcessController;
use crate::types::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    /// The updater started the application itself.
    Started(Pid),
    /// A service manager brought the application back.
    Supervised,
    /// Nothing to do; the application was already running.
    AlreadyRunning,
}

/// When the application is stopped and who starts it again.
pub trait ProcessModel {
    fn kind(&self) -> ProcessModelKind;

    /// Runs before the installation is backed up.
    fn before_backup(&self, ctl: &ProcessController, pid: Pid) -> Result<()>;

    /// Runs after the backup, right before files are replaced.
    fn before_mirror(&self, ctl: &ProcessController) -> Result<()>;

    /// Brings the application back after the install or a rollback.
    fn restart(&self, ctl: &ProcessController, pid: Pid, install_dir: &Path) -> Result<RestartOutcome>;

    /// Used when the run stops before files were touched.
    fn ensure_running(&self, ctl: &ProcessController, install_dir: &Path) -> Result<RestartOutcome> {
        if ctl.is_running() {
            return Ok(RestartOutcome::AlreadyRunning);
        }
        ctl.start(install_dir).map(RestartOutcome::Started)
    }
}

pub fn model_for(kind: ProcessModelKind, restart: RestartPolicy) -> Box<dyn ProcessModel> {
    match kind {
        ProcessModelKind::Terminate => Box::new(ExplicitTermination),
        ProcessModelKind::Supervisor => Box::new(SupervisorRestart::new(restart)),
    }
}

/// Stop the application before any file is touched and start it when done.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitTermination;

impl ProcessModel for ExplicitTermination {
    fn kind(&self) -> ProcessModelKind {
        ProcessModelKind::Terminate
    }

    fn before_backup(&self, ctl: &ProcessController, pid: Pid) -> Result<()> {
        ctl.terminate(pid)
    }

    fn before_mirror(&self, ctl: &ProcessController) -> Result<()> {
        if ctl.is_running() {
            error!("application was restarted prematurely by an external process");
            return Err(UpdateError::PrematureRestart("application".to_string()));
        }
        Ok(())
    }

    fn restart(&self, ctl: &ProcessController, _pid: Pid, install_dir: &Path) -> Result<RestartOutcome> {
        ctl.start(install_dir).map(RestartOutcome::Started)
    }
}

/// Leave the application running while files are replaced, then stop it and
/// give a service manager the chance to restart it.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorRestart {
    policy: RestartPolicy,
}

impl SupervisorRestart {
    pub fn new(policy: RestartPolicy) -> Self {
        Self { policy }
    }
}

impl ProcessModel for SupervisorRestart {
    fn kind(&self) -> ProcessModelKind {
        ProcessModelKind::Supervisor
    }

    fn before_backup(&self, _ctl: &ProcessController, _pid: Pid) -> Result<()> {
        Ok(())
    }

    fn before_mirror(&self, _ctl: &ProcessController) -> Result<()> {
        Ok(())
    }

    fn restart(&self, ctl: &ProcessController, pid: Pid, install_dir: &Path) -> Result<RestartOutcome> {
        ctl.terminate(pid)?;
        info!(
            attempts = self.policy.attempts,
            interval_ms = self.policy.interval.as_millis() as u64,
            "waiting for external auto-restart"
        );
        for _ in 0..self.policy.attempts {
            thread::sleep(self.policy.interval);
            if ctl.is_running() {
                info!("application was restarted by external process");
                return Ok(RestartOutcome::Supervised);
            }
        }
        warn!("no external restart observed; starting application");
        ctl.start(install_dir).map(RestartOutcome::Started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::FakeProcesses;
    use std::time::Duration;

    fn pid(raw: u32) -> Pid {
        Pid::new(raw).expect("pid")
    }

    fn controller(fake: &FakeProcesses) -> ProcessController {
        ProcessController::new(Box::new(fake.clone()), vec!["Kavita".into()], "Kavita".into())
    }

    fn quick_policy(attempts: u32) -> RestartPolicy {
        RestartPolicy {
            attempts,
            interval: Duration::ZERO,
        }
    }

    #[test]
    fn explicit_termination_stops_then_detects_premature_restart() {
        let fake = FakeProcesses::with(&[(42, "Kavita")]);
        let ctl = controller(&fake);
        let model = ExplicitTermination;

        model.before_backup(&ctl, pid(42)).expect("terminate");
        assert!(!ctl.is_running());
        model.before_mirror(&ctl).expect("nothing restarted");

        fake.edit(|s| {
            s.running.insert(77, "Kavita".to_string());
        });
        assert!(matches!(
            model.before_mirror(&ctl),
            Err(UpdateError::PrematureRestart(_))
        ));
    }

    #[test]
    fn explicit_termination_restart_spawns() {
        let fake = FakeProcesses::with(&[]);
        let outcome = ExplicitTermination
            .restart(&controller(&fake), pid(42), Path::new("/opt/kavita"))
            .expect("restart");
        assert!(matches!(outcome, RestartOutcome::Started(_)));
        assert_eq!(fake.snapshot(|s| s.spawned.len()), 1);
    }

    #[test]
    fn supervisor_restart_waits_for_service_manager() {
        let fake = FakeProcesses::with(&[(42, "Kavita")]);
        fake.edit(|s| s.supervisor_after = Some(3));
        let model = SupervisorRestart::new(quick_policy(10));

        let outcome = model
            .restart(&controller(&fake), pid(42), Path::new("/opt/kavita"))
            .expect("restart");
        assert_eq!(outcome, RestartOutcome::Supervised);
        assert!(fake.snapshot(|s| s.spawned.is_empty()));
        assert!(fake.snapshot(|s| s.killed.contains(&42)));
    }

    #[test]
    fn supervisor_restart_falls_back_to_self_start() {
        let fake = FakeProcesses::with(&[(42, "Kavita")]);
        let model = SupervisorRestart::new(quick_policy(3));

        let outcome = model
            .restart(&controller(&fake), pid(42), Path::new("/opt/kavita"))
            .expect("restart");
        assert!(matches!(outcome, RestartOutcome::Started(_)));
        assert_eq!(fake.snapshot(|s| s.spawned.len()), 1);
    }

    #[test]
    fn supervisor_leaves_app_running_until_restart() {
        let fake = FakeProcesses::with(&[(42, "Kavita")]);
        let ctl = controller(&fake);
        let model = SupervisorRestart::new(quick_policy(1));
        model.before_backup(&ctl, pid(42)).expect("noop");
        model.before_mirror(&ctl).expect("noop");
        assert!(ctl.is_running());
        assert_eq!(
            model.ensure_running(&ctl, Path::new("/opt/kavita")).expect("ensure"),
            RestartOutcome::AlreadyRunning
        );
    }
}
