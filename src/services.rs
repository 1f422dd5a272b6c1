//! The fixed set of services the launcher knows about.
//!
//! Command definitions are compile-time constants. The git sequence is the
//! only one with a variable part: an optional commit message appended to the
//! commit step.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::SupervisorError;
use crate::process::ServiceSpec;

pub const OOP_COMMANDS: &[&str] = &["cd 2019/workshops/oop", "source setenv.sh", "./oop.sh"];

pub const IDE_COMMANDS: &[&str] = &[
    "cd 2019/workshops/oop",
    "source setenv.sh",
    "eclipse -data workspace",
];

pub const TUNNEL_COMMAND: &[&str] = &[
    "ssh",
    "-o",
    "ServerAliveInterval=120",
    "-N",
    "-L",
    "8080:im2ag-vteacher.ujf-grenoble.fr:80",
    "mandelbrot",
];

pub const GIT_COMMANDS: &[&str] = &[
    "cd 2019/workshops/oop",
    "source setenv.sh",
    "git add --all",
    "git commit",
    "git push --all",
];

/// Position of `git commit` in [`GIT_COMMANDS`].
const GIT_COMMIT_STEP: usize = 3;

/// Long-running services with a start/stop toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Oop,
    Ide,
    Tunnel,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [ServiceKind::Oop, ServiceKind::Ide, ServiceKind::Tunnel];

    /// Name used in logs and on the command line.
    pub fn id(self) -> &'static str {
        match self {
            ServiceKind::Oop => "oop",
            ServiceKind::Ide => "ide",
            ServiceKind::Tunnel => "tunnel",
        }
    }

    /// Name used in the running-services summary.
    pub fn label(self) -> &'static str {
        match self {
            ServiceKind::Oop => "OOP service",
            ServiceKind::Ide => "Eclipse",
            ServiceKind::Tunnel => "Dashboard tunnel",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    /// Action offered for the current state.
    pub fn action(self, running: bool) -> &'static str {
        match (self, running) {
            (ServiceKind::Oop, false) => "Start OOP service",
            (ServiceKind::Oop, true) => "Stop OOP service",
            (ServiceKind::Ide, false) => "Launch Eclipse",
            (ServiceKind::Ide, true) => "Kill Eclipse",
            (ServiceKind::Tunnel, false) => "Open dashboard tunnel",
            (ServiceKind::Tunnel, true) => "Close dashboard tunnel",
        }
    }

    pub fn started_message(self) -> &'static str {
        match self {
            ServiceKind::Oop => "OOP service launched",
            ServiceKind::Ide => "Eclipse is launching...",
            ServiceKind::Tunnel => "Dashboard tunnel opened",
        }
    }

    pub fn stopped_message(self) -> &'static str {
        match self {
            ServiceKind::Oop => "OOP service killed",
            ServiceKind::Ide => "Eclipse killed",
            ServiceKind::Tunnel => "Dashboard tunnel closed",
        }
    }

    /// Killing the IDE may lose unsaved work, so it asks first.
    pub fn confirm_stop(self) -> Option<&'static str> {
        match self {
            ServiceKind::Ide => Some(
                "Are you sure you want to kill Eclipse? It may be better to close it in a more regular way.",
            ),
            _ => None,
        }
    }

    pub fn spec(self, options: &SpecOptions) -> Result<ServiceSpec, SupervisorError> {
        let spec = match self {
            ServiceKind::Oop => ServiceSpec::shell(self.id(), OOP_COMMANDS.iter().copied())?,
            ServiceKind::Ide => ServiceSpec::shell(self.id(), IDE_COMMANDS.iter().copied())?,
            ServiceKind::Tunnel => ServiceSpec::direct(self.id(), TUNNEL_COMMAND.iter().copied())?,
        };
        Ok(options.apply(spec))
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Launcher-wide settings applied to every catalog spec.
#[derive(Debug, Clone, Default)]
pub struct SpecOptions {
    pub shell: Option<String>,
    pub home: Option<PathBuf>,
}

impl SpecOptions {
    fn apply(&self, mut spec: ServiceSpec) -> ServiceSpec {
        if let Some(shell) = &self.shell {
            spec = spec.with_shell(shell.clone());
        }
        if let Some(home) = &self.home {
            spec = spec.with_cwd(home.clone());
        }
        spec
    }
}

/// Builds the add/commit/push sequence. A blank message leaves the commit
/// step without `-m`.
pub fn git_spec(
    message: Option<&str>,
    options: &SpecOptions,
) -> Result<ServiceSpec, SupervisorError> {
    let mut commands: Vec<String> = GIT_COMMANDS.iter().map(|line| line.to_string()).collect();
    if let Some(message) = message.map(str::trim).filter(|message| !message.is_empty()) {
        commands[GIT_COMMIT_STEP].push_str(" -m ");
        commands[GIT_COMMIT_STEP].push_str(&double_quote(message));
    }
    Ok(options.apply(ServiceSpec::shell("git", commands)?))
}

/// Wraps `text` in double quotes, escaping what the shell would still expand.
fn double_quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oop_service_runs_through_shell() {
        let spec = ServiceKind::Oop.spec(&SpecOptions::default()).unwrap();
        let invocation = spec.invocation();
        assert_eq!(invocation.program, "bash");
        assert_eq!(
            invocation.args,
            vec!["-c", "cd 2019/workshops/oop; source setenv.sh; ./oop.sh"]
        );
    }

    #[test]
    fn tunnel_execs_ssh_directly() {
        let spec = ServiceKind::Tunnel.spec(&SpecOptions::default()).unwrap();
        assert!(spec.is_single_command());
        let invocation = spec.invocation();
        assert_eq!(invocation.program, "ssh");
        assert_eq!(invocation.args.last().map(String::as_str), Some("mandelbrot"));
    }

    #[test]
    fn options_override_shell_and_home() {
        let options = SpecOptions {
            shell: Some("zsh".to_string()),
            home: Some(PathBuf::from("/home/student")),
        };
        let spec = ServiceKind::Ide.spec(&options).unwrap();
        assert_eq!(spec.invocation().program, "zsh");
        assert_eq!(spec.working_dir(), Some(PathBuf::from("/home/student")));
    }

    #[test]
    fn git_without_message_leaves_commit_bare() {
        let expected = "cd 2019/workshops/oop; source setenv.sh; git add --all; git commit; git push --all";
        let spec = git_spec(None, &SpecOptions::default()).unwrap();
        assert_eq!(spec.invocation().args[1], expected);
        let spec = git_spec(Some("   "), &SpecOptions::default()).unwrap();
        assert_eq!(spec.invocation().args[1], expected);
    }

    #[test]
    fn git_message_is_appended_to_commit_step() {
        let spec = git_spec(Some("Task4, Step3 completed"), &SpecOptions::default()).unwrap();
        assert!(spec
            .invocation()
            .args[1]
            .ends_with("; git commit -m \"Task4, Step3 completed\"; git push --all"));
        assert_eq!(GIT_COMMANDS[GIT_COMMIT_STEP], "git commit");
    }

    #[test]
    fn git_message_escapes_shell_expansion() {
        assert_eq!(double_quote(r#"say "hi" $HOME `x` \n"#), r#""say \"hi\" \$HOME \`x\` \\n""#);
    }

    #[test]
    fn kinds_round_trip_through_ids() {
        for kind in ServiceKind::ALL {
            assert_eq!(ServiceKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(ServiceKind::from_id("git"), None);
    }

    #[test]
    fn only_ide_asks_before_stopping() {
        assert!(ServiceKind::Ide.confirm_stop().is_some());
        assert!(ServiceKind::Oop.confirm_stop().is_none());
        assert!(ServiceKind::Tunnel.confirm_stop().is_none());
    }
}
