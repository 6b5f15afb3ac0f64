//! Driving the external solver process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use derive_more::{Display, Error};
use log::debug;
use problemo::{Problem, ProblemResult};

use crate::OptionValue;

#[derive(Debug, Display, Error)]
pub enum DriverError {
    #[display("failed to spawn the solver process")]
    Spawn,
}

/// An AMPL-compatible solver executable plus its invocation options.
///
/// The solver is invoked as
///
/// ```text
/// <command> <workdir>/model.nl -AMPL key1=val1 key2=val2 ...
/// ```
///
/// with stdout/stderr inherited from the calling process and no imposed
/// timeout. The working directory holds the `model.nl` / `model.sol` pair;
/// neither file is deleted after a solve, which is handy when debugging.
#[derive(Clone)]
pub struct AmplSolver {
    command: String,
    options: BTreeMap<String, Box<dyn OptionValue>>,
    workdir: PathBuf,
}

impl AmplSolver {
    /// Creates a solver handle for `command`, with the system temporary
    /// directory as the working directory and no options.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            options: BTreeMap::new(),
            workdir: std::env::temp_dir(),
        }
    }

    /// Sets the directory holding the problem/result file pair.
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Adds a solver option (builder form).
    pub fn with_option(mut self, key: impl Into<String>, value: impl OptionValue) -> Self {
        self.set_option(key, value);
        self
    }

    /// Adds or replaces a solver option.
    pub fn set_option(&mut self, key: impl Into<String>, value: impl OptionValue) {
        self.options.insert(key.into(), Box::new(value));
    }

    /// Returns the solver command.
    pub fn get_command(&self) -> &str {
        &self.command
    }

    /// Returns the working directory.
    pub fn get_workdir(&self) -> &Path {
        &self.workdir
    }

    /// The `key=value` arguments appended after `-AMPL`.
    pub(crate) fn option_args(&self) -> Vec<String> {
        self.options
            .iter()
            .map(|(key, value)| format!("{}={}", key, value.as_arg()))
            .collect()
    }

    /// Runs the solver on `problem_file`, waits for it, and returns its
    /// exit code.
    pub(crate) fn run(&self, problem_file: &Path) -> Result<i32, Problem> {
        let mut command = Command::new(&self.command);
        command.arg(problem_file).arg("-AMPL").args(self.option_args());
        debug!("invoking solver: {:?}", command);
        let status = command.status().via(DriverError::Spawn)?;
        Ok(status.code().unwrap_or(-1))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn options_coerce_to_key_value_arguments() {
        let solver = AmplSolver::new("bonmin")
            .with_option("outlev", 1)
            .with_option("tol", 0.5)
            .with_option("print_level", "none")
            .with_option("expect_infeasible_problem", true);
        assert_eq!(
            solver.option_args(),
            vec![
                "expect_infeasible_problem=true",
                "outlev=1",
                "print_level=none",
                "tol=0.5",
            ]
        );
    }

    #[test]
    fn replaced_options_keep_the_last_value() {
        let mut solver = AmplSolver::new("ipopt");
        solver.set_option("max_iter", 100);
        solver.set_option("max_iter", 250);
        assert_eq!(solver.option_args(), vec!["max_iter=250"]);
    }

    #[cfg(unix)]
    #[test]
    fn exit_codes_are_surfaced() {
        let solver = AmplSolver::new("false");
        let code = solver.run(Path::new("model.nl")).unwrap();
        assert_ne!(code, 0);
    }

    #[test]
    fn unknown_commands_fail_to_spawn() {
        let solver = AmplSolver::new("definitely-not-an-installed-solver");
        assert!(solver.run(Path::new("model.nl")).is_err());
    }
}
