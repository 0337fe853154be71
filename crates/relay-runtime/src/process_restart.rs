//! Restart strategies applied after a successful artifact upgrade.

use std::ffi::OsString;
use std::path::Path;

use crate::relay_error::RelayError;

/// Exit status asking an external supervisor to relaunch the relay.
pub const SUPERVISOR_RESTART_EXIT_CODE: i32 = 75;

/// Replaces the running relay with the artifact at `artifact`.
///
/// Implementations that succeed do not return.
pub trait ProcessRestarter: Send + Sync {
    fn restart(&self, artifact: &Path) -> Result<(), RelayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartStrategy {
    #[default]
    Exec,
    Supervisor,
}

impl RestartStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exec => "exec",
            Self::Supervisor => "supervisor",
        }
    }
}

impl std::str::FromStr for RestartStrategy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "exec" => Ok(Self::Exec),
            "supervisor" => Ok(Self::Supervisor),
            other => Err(format!(
                "unsupported restart strategy '{other}' (expected exec or supervisor)"
            )),
        }
    }
}

/// Builds the restarter for `strategy`; `args` are the original arguments
/// without the program name.
pub fn restarter_for(strategy: RestartStrategy, args: Vec<OsString>) -> Box<dyn ProcessRestarter> {
    match strategy {
        RestartStrategy::Exec => Box::new(ExecRestarter::new(args)),
        RestartStrategy::Supervisor => Box::new(SupervisorExitRestarter),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Re-executes the artifact in place with the original arguments.
pub struct ExecRestarter {
    args: Vec<OsString>,
}

impl ExecRestarter {
    pub fn new(args: Vec<OsString>) -> Self {
        Self { args }
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }
}

impl ProcessRestarter for ExecRestarter {
    #[cfg(unix)]
    fn restart(&self, artifact: &Path) -> Result<(), RelayError> {
        use std::os::unix::process::CommandExt;

        tracing::info!(artifact = %artifact.display(), "re-executing relay");
        let error = std::process::Command::new(artifact).args(&self.args).exec();
        Err(RelayError::Replace(format!(
            "failed to exec {}: {error}",
            artifact.display()
        )))
    }

    #[cfg(not(unix))]
    fn restart(&self, artifact: &Path) -> Result<(), RelayError> {
        tracing::info!(artifact = %artifact.display(), "spawning replacement relay");
        std::process::Command::new(artifact)
            .args(&self.args)
            .spawn()
            .map_err(|error| {
                RelayError::Replace(format!("failed to spawn {}: {error}", artifact.display()))
            })?;
        std::process::exit(0);
    }
}

#[derive(Debug, Clone, Copy, Default)]
/// Exits with [`SUPERVISOR_RESTART_EXIT_CODE`] and leaves the relaunch to a supervisor.
pub struct SupervisorExitRestarter;

impl ProcessRestarter for SupervisorExitRestarter {
    fn restart(&self, artifact: &Path) -> Result<(), RelayError> {
        tracing::info!(
            artifact = %artifact.display(),
            exit_code = SUPERVISOR_RESTART_EXIT_CODE,
            "exiting for supervisor restart"
        );
        std::process::exit(SUPERVISOR_RESTART_EXIT_CODE);
    }
}
