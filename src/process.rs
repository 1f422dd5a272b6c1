//! Service command definitions.
//!
//! A `ServiceSpec` is the immutable description of what a supervisor runs:
//! either a list of shell lines chained into one `shell -c` invocation, or a
//! single pre-tokenized argv executed directly. `Invocation` is the composed
//! program and arguments handed to the OS.

use std::path::PathBuf;

use crate::error::SupervisorError;

/// Interpreter used for multi-line services unless overridden.
pub const DEFAULT_SHELL: &str = "bash";

/// Separator placed between shell lines. Each line runs regardless of the
/// previous exit status, inside the same shell session.
const LINE_SEPARATOR: &str = "; ";

/// Immutable command definition for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Name used in logs and error messages.
    name: String,
    /// Non-empty ordered list of command strings.
    commands: Vec<String>,
    /// When true, `commands` is the argv of a directly executed program.
    single_command: bool,
    /// Interpreter for shell mode.
    shell: String,
    /// Working directory override; the home directory otherwise.
    cwd: Option<PathBuf>,
}

/// A fully composed program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl ServiceSpec {
    /// Builds a spec, rejecting an empty command sequence.
    pub fn new<I, S>(
        name: impl Into<String>,
        commands: I,
        single_command: bool,
    ) -> Result<Self, SupervisorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let commands: Vec<String> = commands.into_iter().map(Into::into).collect();
        if commands.is_empty() {
            return Err(SupervisorError::InvalidSpec { name });
        }
        Ok(Self {
            name,
            commands,
            single_command,
            shell: DEFAULT_SHELL.to_string(),
            cwd: None,
        })
    }

    /// Shell-mode spec: lines are chained with `"; "`.
    pub fn shell<I, S>(name: impl Into<String>, lines: I) -> Result<Self, SupervisorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, lines, false)
    }

    /// Direct-exec spec: the strings are the argv.
    pub fn direct<I, S>(name: impl Into<String>, argv: I) -> Result<Self, SupervisorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, argv, true)
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_single_command(&self) -> bool {
        self.single_command
    }

    /// Composes the program and arguments this spec executes.
    pub fn invocation(&self) -> Invocation {
        if self.single_command {
            let (program, args) = self
                .commands
                .split_first()
                .map(|(first, rest)| (first.clone(), rest.to_vec()))
                .unwrap_or_default();
            Invocation { program, args }
        } else {
            Invocation {
                program: self.shell.clone(),
                args: vec!["-c".to_string(), self.commands.join(LINE_SEPARATOR)],
            }
        }
    }

    /// Directory the process starts in: the override, else the home
    /// directory, else the launcher's own working directory.
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.cwd.clone().or_else(dirs::home_dir)
    }
}

impl Invocation {
    /// Shell-quoted rendering for display.
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(1 + self.args.len());
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        shell_words::join(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_mode_joins_lines_into_one_argument() {
        let spec = ServiceSpec::shell("demo", ["cd dir", "echo hi"]).unwrap();
        let invocation = spec.invocation();
        assert_eq!(invocation.program, "bash");
        assert_eq!(invocation.args, vec!["-c", "cd dir; echo hi"]);
    }

    #[test]
    fn single_command_execs_argv_directly() {
        let spec = ServiceSpec::direct("tunnel", ["ssh", "-N", "host"]).unwrap();
        let invocation = spec.invocation();
        assert_eq!(invocation.program, "ssh");
        assert_eq!(invocation.args, vec!["-N", "host"]);
    }

    #[test]
    fn single_line_shell_spec_has_no_separator() {
        let spec = ServiceSpec::shell("one", ["./oop.sh"]).unwrap();
        assert_eq!(spec.invocation().args[1], "./oop.sh");
    }

    #[test]
    fn empty_commands_are_rejected() {
        let err = ServiceSpec::new("empty", Vec::<String>::new(), false).unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidSpec { ref name } if name == "empty"));
        let err = ServiceSpec::direct("empty", Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidSpec { .. }));
    }

    #[test]
    fn shell_override_is_used_for_shell_mode_only() {
        let spec = ServiceSpec::shell("demo", ["true"]).unwrap().with_shell("sh");
        assert_eq!(spec.invocation().program, "sh");
        let spec = ServiceSpec::direct("demo", ["true"]).unwrap().with_shell("sh");
        assert_eq!(spec.invocation().program, "true");
    }

    #[test]
    fn cwd_override_takes_precedence() {
        let spec = ServiceSpec::shell("demo", ["true"]).unwrap().with_cwd("/tmp");
        assert_eq!(spec.working_dir(), Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn display_quotes_arguments() {
        let spec = ServiceSpec::shell("demo", ["cd dir", "echo hi"]).unwrap();
        assert_eq!(spec.invocation().display(), "bash -c 'cd dir; echo hi'");
    }
}
