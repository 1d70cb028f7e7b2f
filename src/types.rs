use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(u32);

impl Pid {
    pub fn new(raw: u32) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Pid(raw))
        }
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl FromStr for Pid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value.is_empty() {
            return Err("process id is empty".to_string());
        }
        let raw = value
            .parse::<i64>()
            .map_err(|_| format!("invalid process id {}", value))?;
        if raw < 1 || raw > i64::from(u32::MAX) {
            return Err(format!("invalid process id {}", raw));
        }
        Ok(Pid(raw as u32))
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Intent of a single file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    None,
    Copy,
    Move,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::None => "none",
            TransferMode::Copy => "copy",
            TransferMode::Move => "move",
        }
    }
}

/// How path strings compare on the platform the installer targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathCasing {
    Sensitive,
    Insensitive,
}

impl PathCasing {
    pub fn native() -> Self {
        if cfg!(windows) {
            PathCasing::Insensitive
        } else {
            PathCasing::Sensitive
        }
    }

    pub fn eq_str(&self, a: &str, b: &str) -> bool {
        match self {
            PathCasing::Sensitive => a == b,
            PathCasing::Insensitive => a.to_lowercase() == b.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Verifying,
    Terminating,
    BackingUp,
    Mirroring,
    RollingBack,
    Restarting,
    Done,
}

impl InstallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallState::Verifying => "verifying",
            InstallState::Terminating => "terminating",
            InstallState::BackingUp => "backing-up",
            InstallState::Mirroring => "mirroring",
            InstallState::RollingBack => "rolling-back",
            InstallState::Restarting => "restarting",
            InstallState::Done => "done",
        }
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
