use clap::ValueEnum;

use relay_runtime::RestartStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliRestartStrategy {
    /// Re-execute the upgraded artifact in place.
    Exec,
    /// Exit with status 75 and let a supervisor relaunch.
    Supervisor,
}

impl From<CliRestartStrategy> for RestartStrategy {
    fn from(value: CliRestartStrategy) -> Self {
        match value {
            CliRestartStrategy::Exec => RestartStrategy::Exec,
            CliRestartStrategy::Supervisor => RestartStrategy::Supervisor,
        }
    }
}
