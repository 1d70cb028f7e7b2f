use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::config::UpdaterConfig;
use crate::disk::{DiskTransfer, FileTransfer, FolderMirror, MirrorResult, PathResolver};
use crate::error::{Result, UpdateError};
use crate::process::{model_for, ProcessController, ProcessModel, ProcessProvider, ProcessTarget, RestartOutcome};
use crate::types::{InstallState, Pid};
use crate::update::backup::{AppDataBackup, BackupAndRestore, SnapshotMarker};
use crate::update::{read_version, UpdateLayout};

#[derive(Debug, Clone)]
pub struct InstallReport {
    pub install_dir: PathBuf,
    pub snapshot: SnapshotMarker,
    pub app_data_files: usize,
    pub mirrored: MirrorResult,
    pub restart: RestartOutcome,
    pub states: Vec<InstallState>,
    pub previous_version: Option<String>,
    pub version: Option<String>,
}

const UNKNOWN_VERSION: &str = "(unknown)";

/// Replaces an installation with the staged package: back up, swap files,
/// roll back on failure and bring the application back.
pub struct InstallOrchestrator<T = DiskTransfer> {
    config: UpdaterConfig,
    resolver: PathResolver,
    processes: ProcessController,
    model: Box<dyn ProcessModel>,
    transfer: T,
}

impl InstallOrchestrator<DiskTransfer> {
    pub fn new(config: UpdaterConfig, provider: Box<dyn ProcessProvider>) -> Self {
        let resolver = PathResolver::default();
        Self::with_transfer(config, provider, resolver, DiskTransfer::new(resolver))
    }
}

impl<T: FileTransfer> InstallOrchestrator<T> {
    pub fn with_transfer(
        config: UpdaterConfig,
        provider: Box<dyn ProcessProvider>,
        resolver: PathResolver,
        transfer: T,
    ) -> Self {
        let processes = ProcessController::new(
            provider,
            config.process_names.clone(),
            config.executable_name(),
        );
        let model = model_for(config.process_model, config.restart);
        Self {
            config,
            resolver,
            processes,
            model,
            transfer,
        }
    }

    pub fn layout_for(&self, install_dir: &Path) -> UpdateLayout {
        UpdateLayout::new(self.config.work_root_for(install_dir))
    }

    pub fn start(&self, install_dir: &Path, pid: i64) -> Result<InstallReport> {
        let mut states = Vec::new();
        info!(install_dir = %install_dir.display(), pid, "installation folder");
        self.enter(&mut states, InstallState::Verifying);
        let (install_dir, pid, layout) = self.verify(install_dir, pid)?;
        let previous_version = read_version(&layout.installed_version_file());
        let version = read_version(&layout.staged_version_file());
        info!(
            from = previous_version.as_deref().unwrap_or(UNKNOWN_VERSION),
            to = version.as_deref().unwrap_or(UNKNOWN_VERSION),
            "updating application"
        );
        self.processes.log_running();

        self.enter(&mut states, InstallState::Terminating);
        if let Err(err) = self.model.before_backup(&self.processes, pid) {
            error!(error = %err, "could not stop the application");
            self.recover(&install_dir);
            return Err(err);
        }

        self.enter(&mut states, InstallState::BackingUp);
        let backups = BackupAndRestore::new(self.resolver, &layout)
            .exclude(layout.within(&install_dir))
            .app_version(previous_version.clone());
        let snapshot = match backups.backup(&install_dir) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(error = %err, "backup failed; installation left unchanged");
                self.recover(&install_dir);
                return Err(match err {
                    err @ UpdateError::Backup(_) => err,
                    other => UpdateError::Backup(other.to_string()),
                });
            }
        };
        let app_data_files =
            AppDataBackup::new(&layout, self.config.app_data.clone()).backup(&install_dir);

        self.model.before_mirror(&self.processes)?;

        self.enter(&mut states, InstallState::Mirroring);
        info!(source = %layout.update_dir().display(), target = %install_dir.display(), "copying new files to target folder");
        let mirror = FolderMirror::with_transfer(self.resolver, &self.transfer)
            .protect(self.config.preserve.iter().map(PathBuf::from))
            .protect(layout.within(&install_dir));
        let mirrored = match mirror.mirror(&layout.update_dir(), &install_dir) {
            Ok(result) => result,
            Err(err) => {
                self.enter(&mut states, InstallState::RollingBack);
                return Err(self.roll_back(&backups, &install_dir, pid, err.to_string()));
            }
        };
        info!(
            copied = mirrored.files_copied,
            deleted = mirrored.files_deleted + mirrored.dirs_deleted,
            "installation updated"
        );
        self.mark_executable(&install_dir);
        if let Some(version) = &version {
            let path = layout.installed_version_file();
            if let Err(err) = fs::write(&path, version) {
                warn!(path = %path.display(), error = %err, "could not record installed version");
            }
        }

        self.enter(&mut states, InstallState::Restarting);
        let restart = match self.model.restart(&self.processes, pid, &install_dir) {
            Ok(outcome) => outcome,
            Err(err) => {
                // Files are in place; fall back to a self-start.
                error!(error = %err, "process control failed after install");
                self.model.ensure_running(&self.processes, &install_dir)?
            }
        };

        self.enter(&mut states, InstallState::Done);
        Ok(InstallReport {
            install_dir,
            snapshot,
            app_data_files,
            mirrored,
            restart,
            states,
            previous_version,
            version,
        })
    }

    fn enter(&self, states: &mut Vec<InstallState>, state: InstallState) {
        info!(state = %state, model = self.model.kind().as_str(), "install state");
        states.push(state);
    }

    fn verify(&self, install_dir: &Path, pid: i64) -> Result<(PathBuf, Pid, UpdateLayout)> {
        let (install_dir, pid) = self.check_preconditions(install_dir, pid)?;
        let layout = self.layout_for(&install_dir);
        info!("verifying update folder");
        if !layout.update_dir().is_dir() {
            return Err(UpdateError::precondition(format!(
                "update folder doesn't exist {}",
                layout.update_dir().display()
            )));
        }
        Ok((install_dir, pid, layout))
    }

    /// Checks the install folder and process id without touching anything.
    /// Returns the install folder with the legacy suffix removed.
    pub fn check_preconditions(&self, install_dir: &Path, pid: i64) -> Result<(PathBuf, Pid)> {
        info!("verifying requirements before update");
        if install_dir.as_os_str().to_string_lossy().trim().is_empty() {
            return Err(UpdateError::precondition("target folder can not be empty"));
        }
        if !install_dir.is_dir() {
            return Err(UpdateError::precondition(format!(
                "target folder doesn't exist {}",
                install_dir.display()
            )));
        }
        let pid = u32::try_from(pid)
            .ok()
            .and_then(Pid::new)
            .ok_or_else(|| UpdateError::precondition(format!("invalid process id {}", pid)))?;
        if !self.processes.exists(&ProcessTarget::Id(pid)) {
            return Err(UpdateError::precondition(format!(
                "process with id {} doesn't exist",
                pid
            )));
        }

        Ok((self.rewrite_legacy(install_dir), pid))
    }

    fn rewrite_legacy(&self, install_dir: &Path) -> PathBuf {
        let Some(suffix) = self.config.legacy_suffix.as_deref() else {
            return install_dir.to_path_buf();
        };
        if !install_dir.ends_with(suffix) {
            return install_dir.to_path_buf();
        }
        match self.resolver.parent_path(install_dir) {
            Some(parent) => {
                info!(folder = %parent.display(), "fixed installation folder");
                parent
            }
            None => install_dir.to_path_buf(),
        }
    }

    fn roll_back(
        &self,
        backups: &BackupAndRestore,
        install_dir: &Path,
        pid: Pid,
        cause: String,
    ) -> UpdateError {
        error!(state = %InstallState::RollingBack, error = %cause, "failed to copy upgrade package to target folder");
        let outcome = match backups.restore(install_dir) {
            Ok(restored) => {
                error!(restored, "rolled back to the previous installation");
                UpdateError::Mirror { cause, restored }
            }
            Err(err) => {
                error!(error = %err, "rollback failed; manual intervention required");
                UpdateError::Rollback {
                    cause,
                    restore: err.to_string(),
                }
            }
        };
        if let Err(err) = self.model.restart(&self.processes, pid, install_dir) {
            error!(error = %err, "could not restart the previous version");
        }
        outcome
    }

    fn recover(&self, install_dir: &Path) {
        match self.model.ensure_running(&self.processes, install_dir) {
            Ok(RestartOutcome::AlreadyRunning) => {}
            Ok(outcome) => info!(?outcome, "previous version running again"),
            Err(err) => error!(error = %err, "could not restart the previous version"),
        }
    }

    #[cfg(unix)]
    fn mark_executable(&self, install_dir: &Path) {
        use std::os::unix::fs::PermissionsExt;
        let executable = install_dir.join(self.config.executable_name());
        if !executable.is_file() {
            return;
        }
        if let Err(err) = std::fs::set_permissions(&executable, std::fs::Permissions::from_mode(0o755)) {
            warn!(path = %executable.display(), error = %err, "could not set executable flag");
        }
    }

    #[cfg(not(unix))]
    fn mark_executable(&self, _install_dir: &Path) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProcessModelKind, RestartPolicy};
    use crate::disk::tree_contents;
    use crate::process::fake::FakeProcesses;
    use crate::types::TransferMode;
    use std::cell::Cell;
    use std::fs;
    use std::io;
    use std::time::Duration;
    use tempfile::TempDir;

    const APP_PID: u32 = 4242;

    fn write(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, data).expect("write");
    }

    struct Fixture {
        _dir: TempDir,
        install: PathBuf,
        config: UpdaterConfig,
        layout: UpdateLayout,
    }

    fn fixture(model: ProcessModelKind) -> Fixture {
        let dir = TempDir::new().expect("tempdir");
        let install = dir.path().join("kavita");
        write(&install, "Kavita", b"binary-v1");
        write(&install, "appsettings.json", b"{\"Port\": 5000}");
        write(&install, "kavita.db", b"user data");
        write(&install, "lib/a.dll", b"a-v1");
        write(&install, "lib/b.dll", b"b-v1");
        write(&install, "lib/obsolete.dll", b"gone in v2");

        let work = dir.path().join("work");
        let layout = UpdateLayout::new(&work);
        let update = layout.update_dir();
        write(&update, "Kavita", b"binary-v2");
        write(&update, "appsettings.json", b"{\"Port\": 5000}");
        write(&update, "lib/a.dll", b"a-v2");
        write(&update, "lib/b.dll", b"b-v2");
        write(&update, "lib/c.dll", b"c-v2");
        write(&update, "kavita.db", b"empty db shipped by mistake");

        let config = UpdaterConfig {
            work_root: Some(work),
            process_model: model,
            restart: RestartPolicy {
                attempts: 2,
                interval: Duration::ZERO,
            },
            ..UpdaterConfig::default()
        };
        Fixture {
            _dir: dir,
            install,
            config,
            layout,
        }
    }

    fn running_app() -> FakeProcesses {
        FakeProcesses::with(&[(APP_PID, "Kavita")])
    }

    /// Copies normally until `fail_after` files went through, then fails.
    struct FailingTransfer {
        inner: DiskTransfer,
        remaining: Cell<usize>,
    }

    impl FailingTransfer {
        fn after(count: usize) -> Self {
            Self {
                inner: DiskTransfer::default(),
                remaining: Cell::new(count),
            }
        }
    }

    impl FileTransfer for FailingTransfer {
        fn transfer(
            &self,
            source: &Path,
            target: &Path,
            mode: TransferMode,
            overwrite: bool,
        ) -> io::Result<TransferMode> {
            let left = self.remaining.get();
            if left == 0 {
                return Err(io::Error::other("disk full"));
            }
            self.remaining.set(left - 1);
            self.inner.transfer(source, target, mode, overwrite)
        }
    }

    #[test]
    fn empty_install_dir_fails_precondition_without_side_effects() {
        let fx = fixture(ProcessModelKind::Terminate);
        let fake = running_app();
        let installer = InstallOrchestrator::new(fx.config.clone(), Box::new(fake.clone()));

        let err = installer.start(Path::new(""), 123).expect_err("precondition");
        assert!(matches!(err, UpdateError::Precondition(_)));
        assert_eq!(err.exit_code(), 2);
        assert!(!fx.layout.backup_dir().exists());
        assert!(fake.snapshot(|s| s.killed.is_empty()));
    }

    #[test]
    fn invalid_or_missing_process_fails_precondition() {
        let fx = fixture(ProcessModelKind::Terminate);
        let installer = InstallOrchestrator::new(fx.config.clone(), Box::new(running_app()));

        for pid in [0, -5, 999] {
            let err = installer.start(&fx.install, pid).expect_err("precondition");
            assert!(matches!(err, UpdateError::Precondition(_)), "pid {}", pid);
        }
        assert!(!fx.layout.backup_dir().exists());
    }

    #[test]
    fn missing_update_folder_fails_precondition() {
        let fx = fixture(ProcessModelKind::Terminate);
        fs::remove_dir_all(fx.layout.update_dir()).expect("remove");
        let installer = InstallOrchestrator::new(fx.config.clone(), Box::new(running_app()));

        let err = installer.start(&fx.install, i64::from(APP_PID)).expect_err("precondition");
        assert!(matches!(err, UpdateError::Precondition(_)));
        assert!(!fx.layout.backup_dir().exists());
    }

    #[test]
    fn explicit_termination_install_succeeds() {
        let fx = fixture(ProcessModelKind::Terminate);
        let fake = running_app();
        let installer = InstallOrchestrator::new(fx.config.clone(), Box::new(fake.clone()));

        let report = installer.start(&fx.install, i64::from(APP_PID)).expect("install");

        assert_eq!(fs::read(fx.install.join("Kavita")).expect("read"), b"binary-v2");
        assert_eq!(fs::read(fx.install.join("lib/c.dll")).expect("read"), b"c-v2");
        assert!(!fx.install.join("lib/obsolete.dll").exists());
        assert_eq!(fs::read(fx.install.join("kavita.db")).expect("read"), b"user data");
        assert_eq!(report.app_data_files, 2);
        assert_eq!(
            fs::read(fx.layout.app_data_dir().join("kavita.db")).expect("read"),
            b"user data"
        );
        assert!(matches!(report.restart, RestartOutcome::Started(_)));
        assert_eq!(
            report.states,
            vec![
                InstallState::Verifying,
                InstallState::Terminating,
                InstallState::BackingUp,
                InstallState::Mirroring,
                InstallState::Restarting,
                InstallState::Done,
            ]
        );
        assert!(fake.snapshot(|s| s.killed.contains(&APP_PID)));
        assert_eq!(fake.snapshot(|s| s.spawned.clone()), vec![fx.install.join("Kavita")]);
    }

    #[cfg(unix)]
    #[test]
    fn executable_flag_is_set_after_mirror() {
        use std::os::unix::fs::PermissionsExt;
        let fx = fixture(ProcessModelKind::Terminate);
        let installer = InstallOrchestrator::new(fx.config.clone(), Box::new(running_app()));
        installer.start(&fx.install, i64::from(APP_PID)).expect("install");
        let mode = fs::metadata(fx.install.join("Kavita")).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn mirror_failure_rolls_back_to_snapshot() {
        let fx = fixture(ProcessModelKind::Terminate);
        let before = tree_contents(&fx.install);
        let fake = running_app();
        let installer = InstallOrchestrator::with_transfer(
            fx.config.clone(),
            Box::new(fake.clone()),
            PathResolver::default(),
            FailingTransfer::after(2),
        );

        let err = installer.start(&fx.install, i64::from(APP_PID)).expect_err("mirror fails");

        assert!(matches!(err, UpdateError::Mirror { .. }), "{}", err);
        assert_ne!(err.exit_code(), 0);
        assert_eq!(tree_contents(&fx.install), before);
        assert_eq!(fake.snapshot(|s| s.spawned.len()), 1);
    }

    #[test]
    fn premature_restart_aborts_before_mirror() {
        let fx = fixture(ProcessModelKind::Terminate);
        let before = tree_contents(&fx.install);
        let fake = running_app();
        fake.edit(|s| s.respawn = Some("Kavita".to_string()));
        let installer = InstallOrchestrator::new(fx.config.clone(), Box::new(fake.clone()));

        let err = installer.start(&fx.install, i64::from(APP_PID)).expect_err("guard");

        assert!(matches!(err, UpdateError::PrematureRestart(_)));
        assert_eq!(tree_contents(&fx.install), before);
        assert!(fx.layout.install_snapshot_dir().join(".snapshot").exists());
        assert!(fake.snapshot(|s| s.spawned.is_empty()));
    }

    #[test]
    fn supervisor_model_self_starts_when_nobody_restarts() {
        let fx = fixture(ProcessModelKind::Supervisor);
        let fake = running_app();
        let installer = InstallOrchestrator::new(fx.config.clone(), Box::new(fake.clone()));

        let report = installer.start(&fx.install, i64::from(APP_PID)).expect("install");

        assert!(matches!(report.restart, RestartOutcome::Started(_)));
        assert!(fake.snapshot(|s| s.killed.contains(&APP_PID)));
        assert_eq!(fs::read(fx.install.join("Kavita")).expect("read"), b"binary-v2");
    }

    #[test]
    fn failed_termination_after_install_still_runs_new_version() {
        let fx = fixture(ProcessModelKind::Supervisor);
        let fake = running_app();
        fake.edit(|s| s.kill_fails = true);
        let installer = InstallOrchestrator::new(fx.config.clone(), Box::new(fake.clone()));

        let report = installer.start(&fx.install, i64::from(APP_PID)).expect("install");

        assert_eq!(report.restart, RestartOutcome::AlreadyRunning);
        assert!(fake.snapshot(|s| s.spawned.is_empty()));
        assert_eq!(fs::read(fx.install.join("Kavita")).expect("read"), b"binary-v2");
    }

    #[test]
    fn legacy_install_suffix_is_rewritten_to_parent() {
        let fx = fixture(ProcessModelKind::Terminate);
        let legacy = fx.install.join("bin").join("Kavita");
        fs::create_dir_all(&legacy).expect("mkdir");
        let installer = InstallOrchestrator::new(fx.config.clone(), Box::new(running_app()));
        assert_eq!(installer.rewrite_legacy(&legacy), fx.install.join("bin"));
        assert_eq!(installer.rewrite_legacy(&fx.install), fx.install);
    }

    #[test]
    fn work_root_inside_install_survives_the_mirror() {
        let mut fx = fixture(ProcessModelKind::Terminate);
        fx.config.work_root = None;
        let layout = UpdateLayout::new(fx.install.join("temp"));
        write(&layout.update_dir(), "Kavita", b"binary-v2");
        let installer = InstallOrchestrator::new(fx.config.clone(), Box::new(running_app()));

        installer.start(&fx.install, i64::from(APP_PID)).expect("install");

        assert!(layout.update_dir().join("Kavita").exists());
        assert!(layout.install_snapshot_dir().join(".snapshot").exists());
        assert!(!layout.install_snapshot_dir().join("temp").exists());
        assert_eq!(fs::read(fx.install.join("kavita.db")).expect("read"), b"user data");
    }

    #[test]
    fn nested_work_root_keeps_snapshot_and_package() {
        let mut fx = fixture(ProcessModelKind::Terminate);
        fx.config.work_root = Some(PathBuf::from("data/updates"));
        let layout = UpdateLayout::new(fx.install.join("data/updates"));
        write(&layout.update_dir(), "Kavita", b"binary-v2");
        write(&layout.update_dir(), "lib/a.dll", b"a-v2");
        let installer = InstallOrchestrator::new(fx.config.clone(), Box::new(running_app()));

        installer.start(&fx.install, i64::from(APP_PID)).expect("install");

        assert!(layout.install_snapshot_dir().join(".snapshot").exists());
        assert_eq!(
            fs::read(layout.install_snapshot_dir().join("Kavita")).expect("read"),
            b"binary-v1"
        );
        assert!(layout.update_dir().join("Kavita").exists());
        assert_eq!(fs::read(fx.install.join("Kavita")).expect("read"), b"binary-v2");
        assert!(!fx.install.join("lib/obsolete.dll").exists());
    }

    #[test]
    fn versions_are_logged_recorded_and_kept_in_snapshot() {
        let fx = fixture(ProcessModelKind::Terminate);
        fs::write(fx.layout.installed_version_file(), "0.7.1\n").expect("write");
        fs::write(fx.layout.staged_version_file(), "0.7.2").expect("write");
        let installer = InstallOrchestrator::new(fx.config.clone(), Box::new(running_app()));

        let report = installer.start(&fx.install, i64::from(APP_PID)).expect("install");

        assert_eq!(report.previous_version.as_deref(), Some("0.7.1"));
        assert_eq!(report.version.as_deref(), Some("0.7.2"));
        assert_eq!(report.snapshot.app_version.as_deref(), Some("0.7.1"));
        assert_eq!(
            read_version(&fx.layout.installed_version_file()).as_deref(),
            Some("0.7.2")
        );
    }

    #[test]
    fn nested_work_root_survives_a_rollback() {
        let mut fx = fixture(ProcessModelKind::Terminate);
        fx.config.work_root = Some(PathBuf::from("data/updates"));
        let layout = UpdateLayout::new(fx.install.join("data/updates"));
        write(&layout.update_dir(), "Kavita", b"binary-v2");
        write(&layout.update_dir(), "lib/a.dll", b"a-v2");
        write(&layout.update_dir(), "lib/b.dll", b"b-v2");
        let installer = InstallOrchestrator::with_transfer(
            fx.config.clone(),
            Box::new(running_app()),
            PathResolver::default(),
            FailingTransfer::after(1),
        );

        let err = installer.start(&fx.install, i64::from(APP_PID)).expect_err("mirror fails");

        assert!(matches!(err, UpdateError::Mirror { .. }), "{}", err);
        assert!(layout.install_snapshot_dir().join(".snapshot").exists());
        assert!(layout.update_dir().join("Kavita").exists());
        assert_eq!(fs::read(fx.install.join("Kavita")).expect("read"), b"binary-v1");
        assert_eq!(fs::read(fx.install.join("lib/a.dll")).expect("read"), b"a-v1");
    }
}
