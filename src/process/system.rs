use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Result, UpdateError};
use crate::process::{ProcessHandle, ProcessProvider};
use crate::types::Pid;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Processes of the host operating system.
#[derive(Debug, Clone)]
pub struct SystemProcesses {
    term_grace: Duration,
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new(Duration::from_millis(5000))
    }
}

impl SystemProcesses {
    pub fn new(term_grace: Duration) -> Self {
        Self { term_grace }
    }

    fn wait_for_exit(&self, pid: Pid, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if !self.exists(pid) {
                return true;
            }
            thread::sleep(POLL_INTERVAL);
        }
        !self.exists(pid)
    }
}

impl ProcessProvider for SystemProcesses {
    fn exists(&self, pid: Pid) -> bool {
        pid_exists(pid)
    }

    fn find_by_name(&self, name: &str) -> Vec<ProcessHandle> {
        let own = std::process::id();
        list_processes()
            .into_iter()
            .filter(|handle| handle.pid.as_u32() != own)
            .filter(|handle| name_matches(&handle.name, name))
            .collect()
    }

    fn kill(&self, pid: Pid) -> Result<()> {
        if !self.exists(pid) {
            debug!(pid = %pid, "process already exited");
            return Ok(());
        }
        request_exit(pid)?;
        if self.wait_for_exit(pid, self.term_grace) {
            debug!(pid = %pid, "process exited");
            return Ok(());
        }
        warn!(pid = %pid, "process ignored termination request; forcing");
        force_exit(pid)?;
        if self.wait_for_exit(pid, KILL_WAIT) {
            Ok(())
        } else {
            Err(UpdateError::Process(format!("{} did not exit", pid)))
        }
    }

    fn spawn(&self, executable: &Path, working_dir: &Path) -> Result<Pid> {
        let mut cmd = Command::new(executable);
        cmd.current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut cmd);
        let child = cmd
            .spawn()
            .map_err(|e| UpdateError::Process(format!("start {}: {}", executable.display(), e)))?;
        let pid = Pid::new(child.id())
            .ok_or_else(|| UpdateError::Process(format!("start {}: no pid", executable.display())))?;
        debug!(pid = %pid, path = %executable.display(), "spawned process");
        Ok(pid)
    }
}

// Executable names compare without a trailing `.exe`; Linux truncates comm
// to 15 bytes.
fn name_matches(found: &str, wanted: &str) -> bool {
    let found = strip_exe(found);
    let wanted = strip_exe(wanted);
    if cfg!(windows) {
        return found.eq_ignore_ascii_case(wanted);
    }
    if found == wanted {
        return true;
    }
    found.len() == 15 && wanted.len() > 15 && wanted.as_bytes().starts_with(found.as_bytes())
}

fn strip_exe(name: &str) -> &str {
    match name.len().checked_sub(4).filter(|&cut| cut > 0) {
        Some(cut) if name.get(cut..).is_some_and(|ext| ext.eq_ignore_ascii_case(".exe")) => &name[..cut],
        _ => name,
    }
}

#[cfg(unix)]
fn pid_exists(pid: Pid) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid.as_u32()) else {
        return false;
    };
    let result = unsafe { libc::kill(raw, 0) };
    if result == 0 {
        return true;
    }
    // EPERM: it exists, we just may not signal it.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(unix)]
fn send_signal(pid: Pid, signal: libc::c_int) -> Result<()> {
    let raw = libc::pid_t::try_from(pid.as_u32())
        .map_err(|_| UpdateError::Process(format!("{} out of range", pid)))?;
    let result = unsafe { libc::kill(raw, signal) };
    if result == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(()),
        Some(libc::EPERM) => Err(UpdateError::Process(format!("{}: permission denied", pid))),
        _ => Err(UpdateError::Process(format!("signal {}: {}", pid, err))),
    }
}

#[cfg(unix)]
fn request_exit(pid: Pid) -> Result<()> {
    send_signal(pid, libc::SIGTERM)
}

#[cfg(unix)]
fn force_exit(pid: Pid) -> Result<()> {
    send_signal(pid, libc::SIGKILL)
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(target_os = "linux")]
fn list_processes() -> Vec<ProcessHandle> {
    let mut found = Vec::new();
    let Ok(proc_dir) = std::fs::read_dir("/proc") else {
        return found;
    };
    for entry in proc_dir {
        let Ok(entry) = entry else {
            continue;
        };
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<u32>().ok())
            .and_then(Pid::new)
        else {
            continue;
        };
        let path = entry.path();
        let comm = std::fs::read_to_string(path.join("comm"))
            .unwrap_or_default()
            .trim()
            .to_string();
        if !comm.is_empty() {
            found.push(ProcessHandle { pid, name: comm });
        }
    }
    found
}

#[cfg(all(unix, not(target_os = "linux")))]
fn list_processes() -> Vec<ProcessHandle> {
    let output = match Command::new("ps").args(["-axo", "pid=,comm="]).output() {
        Ok(output) if output.status.success() => output,
        Ok(_) | Err(_) => return Vec::new(),
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (pid, command) = line.split_once(char::is_whitespace)?;
            let pid = pid.parse::<u32>().ok().and_then(Pid::new)?;
            let name = Path::new(command.trim()).file_name()?.to_string_lossy().to_string();
            Some(ProcessHandle { pid, name })
        })
        .collect()
}

#[cfg(windows)]
fn tasklist(filter: &str) -> Vec<ProcessHandle> {
    let output = match Command::new("tasklist")
        .args(["/FO", "CSV", "/NH", "/FI", filter])
        .output()
    {
        Ok(output) if output.status.success() => output,
        Ok(_) | Err(_) => return Vec::new(),
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let mut fields = line.split("\",\"").map(|f| f.trim_matches('"'));
            let name = fields.next()?.to_string();
            let pid = fields.next()?.parse::<u32>().ok().and_then(Pid::new)?;
            Some(ProcessHandle { pid, name })
        })
        .collect()
}

#[cfg(windows)]
fn list_processes() -> Vec<ProcessHandle> {
    tasklist("STATUS ne UNKNOWN")
}

#[cfg(windows)]
fn pid_exists(pid: Pid) -> bool {
    tasklist(&format!("PID eq {}", pid))
        .iter()
        .any(|handle| handle.pid == pid)
}

#[cfg(windows)]
fn taskkill(pid: Pid, force: bool) -> Result<()> {
    let pid_arg = pid.to_string();
    let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
    if force {
        args.push("/F");
    }
    let status = Command::new("taskkill")
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| UpdateError::Process(format!("taskkill {}: {}", pid, e)))?;
    if status.success() || !pid_exists(pid) {
        Ok(())
    } else {
        Err(UpdateError::Process(format!("taskkill {} exited with {}", pid, status)))
    }
}

#[cfg(windows)]
fn request_exit(pid: Pid) -> Result<()> {
    taskkill(pid, false)
}

#[cfg(windows)]
fn force_exit(pid: Pid) -> Result<()> {
    taskkill(pid, true)
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_without_exe_suffix() {
        assert!(name_matches("Kavita", "Kavita"));
        assert!(name_matches("Kavita.exe", "Kavita"));
        assert!(!name_matches("Kavita.Console", "Kavita"));
    }

    #[test]
    fn non_ascii_process_names_do_not_panic() {
        assert!(!name_matches("aaé€", "Kavita"));
        assert!(!name_matches("€", "Kavita"));
        assert!(name_matches("Kavitaé.exe", "Kavitaé"));
        assert!(name_matches("aaé€", "aaé€"));
    }

    #[cfg(unix)]
    #[test]
    fn truncated_comm_matches_long_name() {
        assert!(name_matches("Kavita.VeryLong", "Kavita.VeryLongName"));
        assert!(!name_matches("Kavita.VeryLong", "Kavita.Other"));
    }

    #[test]
    fn current_process_exists() {
        let own = Pid::new(std::process::id()).expect("pid");
        assert!(SystemProcesses::default().exists(own));
    }
}
