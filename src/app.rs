//! Console state.
//!
//! `App` tracks which services are running (from observer notifications),
//! pending y/N confirmations, and the in-flight commit. It never touches a
//! process itself: input lines are turned into `AppAction`s that the main
//! loop executes against the supervisors.

use std::collections::HashSet;

use crate::events::ServiceState;
use crate::services::ServiceKind;

/// Side effect requested by the console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    None,
    Start(ServiceKind),
    Stop(ServiceKind),
    Commit(Option<String>),
    /// Stop every running service and exit once they are gone.
    Shutdown,
}

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Toggle(ServiceKind),
    Commit(Option<String>),
    Status,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

/// Question waiting for a y/N answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Confirm {
    Stop(ServiceKind),
    CommitWithoutMessage,
    Quit,
}

pub const HELP: &str = "\
commands:
  oop               start/stop the OOP service
  ide               launch/kill Eclipse
  tunnel            open/close the dashboard tunnel
  commit [message]  git add + commit + push
  status            show running services
  help              show this help
  quit              stop everything and exit";

pub struct App {
    running: HashSet<ServiceKind>,
    confirm: Option<Confirm>,
    commit_in_progress: bool,
    shutting_down: bool,
    pub should_quit: bool,
    output: Vec<String>,
}

impl App {
    pub fn new() -> Self {
        Self {
            running: HashSet::new(),
            confirm: None,
            commit_in_progress: false,
            shutting_down: false,
            should_quit: false,
            output: Vec::new(),
        }
    }

    pub fn is_running(&self, kind: ServiceKind) -> bool {
        self.running.contains(&kind)
    }

    pub fn running(&self) -> Vec<ServiceKind> {
        ServiceKind::ALL
            .into_iter()
            .filter(|kind| self.running.contains(kind))
            .collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Lines to print since the last call.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    fn say(&mut self, text: impl Into<String>) {
        self.output.push(text.into());
    }

    pub fn on_service_state(&mut self, kind: ServiceKind, state: ServiceState) {
        match state {
            ServiceState::Started => {
                self.running.insert(kind);
                self.say(kind.started_message());
            }
            ServiceState::Stopped => {
                self.running.remove(&kind);
                self.say(kind.stopped_message());
            }
        }
        if !self.shutting_down {
            self.say(summary(&self.running()));
        }
        self.check_shutdown_complete();
    }

    pub fn on_commit_started(&mut self) {
        self.commit_in_progress = true;
        self.say("Commit in progress...");
    }

    pub fn on_commit_finished(&mut self, code: Option<i32>) {
        self.commit_in_progress = false;
        match code {
            Some(0) => self.say("Commit performed !"),
            Some(code) => self.say(format!("Commit failed (exit code {})", code)),
            None => self.say("Commit interrupted"),
        }
        self.check_shutdown_complete();
    }

    /// The commit could not be spawned.
    pub fn on_commit_failed(&mut self, error: &str) {
        self.commit_in_progress = false;
        self.say(format!("error: {}", error));
        self.check_shutdown_complete();
    }

    pub fn on_error(&mut self, error: &str) {
        self.say(format!("error: {}", error));
    }

    /// Enters shutdown. Returns the services that still need stopping.
    pub fn begin_shutdown(&mut self) -> Vec<ServiceKind> {
        self.confirm = None;
        if !self.shutting_down {
            self.shutting_down = true;
            if !self.running.is_empty() || self.commit_in_progress {
                self.say("Stopping services...");
            }
        }
        self.check_shutdown_complete();
        self.running()
    }

    fn check_shutdown_complete(&mut self) {
        if self.shutting_down && self.running.is_empty() && !self.commit_in_progress {
            self.should_quit = true;
        }
    }

    pub fn handle_line(&mut self, line: &str) -> AppAction {
        if self.shutting_down {
            return AppAction::None;
        }
        if let Some(confirm) = self.confirm.take() {
            return self.answer(confirm, line);
        }
        match parse_command(line) {
            ConsoleCommand::Toggle(kind) => self.toggle(kind),
            ConsoleCommand::Commit(message) => self.commit(message),
            ConsoleCommand::Status => {
                self.status();
                AppAction::None
            }
            ConsoleCommand::Help => {
                self.say(HELP);
                AppAction::None
            }
            ConsoleCommand::Quit => self.quit(),
            ConsoleCommand::Empty => AppAction::None,
            ConsoleCommand::Unknown(word) => {
                self.say(format!("unknown command '{}' (type help)", word));
                AppAction::None
            }
        }
    }

    fn toggle(&mut self, kind: ServiceKind) -> AppAction {
        if !self.is_running(kind) {
            return AppAction::Start(kind);
        }
        match kind.confirm_stop() {
            Some(question) => self.ask(Confirm::Stop(kind), question),
            None => AppAction::Stop(kind),
        }
    }

    fn commit(&mut self, message: Option<String>) -> AppAction {
        if self.commit_in_progress {
            self.say("A commit is already in progress");
            return AppAction::None;
        }
        match message {
            Some(message) => AppAction::Commit(Some(message)),
            None => self.ask(
                Confirm::CommitWithoutMessage,
                "Are you sure you want to commit without message?",
            ),
        }
    }

    fn quit(&mut self) -> AppAction {
        if self.running.is_empty() {
            return AppAction::Shutdown;
        }
        let mut question = String::from(
            "Some services are still running, would you like to kill them in order to quit the application?",
        );
        if self.is_running(ServiceKind::Ide) {
            question.push_str(
                " Note: Eclipse is opened, and doing this will kill its process.",
            );
        }
        self.ask(Confirm::Quit, &question)
    }

    fn ask(&mut self, confirm: Confirm, question: &str) -> AppAction {
        self.confirm = Some(confirm);
        self.say(format!("{} [y/N]", question));
        AppAction::None
    }

    fn answer(&mut self, confirm: Confirm, line: &str) -> AppAction {
        if !is_yes(line) {
            self.say("Cancelled");
            return AppAction::None;
        }
        match confirm {
            // The service may have exited while the question was open.
            Confirm::Stop(kind) if self.is_running(kind) => AppAction::Stop(kind),
            Confirm::Stop(_) => AppAction::None,
            Confirm::CommitWithoutMessage => self.commit_confirmed(),
            Confirm::Quit => AppAction::Shutdown,
        }
    }

    fn commit_confirmed(&mut self) -> AppAction {
        if self.commit_in_progress {
            self.say("A commit is already in progress");
            return AppAction::None;
        }
        AppAction::Commit(None)
    }

    fn status(&mut self) {
        for kind in ServiceKind::ALL {
            let state = if self.is_running(kind) { "running" } else { "stopped" };
            let line = format!(
                "{:<8} {:<8} ({})",
                kind.id(),
                state,
                kind.action(self.is_running(kind)).to_lowercase()
            );
            self.say(line);
        }
        if self.commit_in_progress {
            self.say("Commit in progress...");
        }
        self.say(summary(&self.running()));
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

pub fn parse_command(line: &str) -> ConsoleCommand {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    match word.to_ascii_lowercase().as_str() {
        "" => ConsoleCommand::Empty,
        "commit" | "git" => {
            ConsoleCommand::Commit((!rest.is_empty()).then(|| rest.to_string()))
        }
        "status" | "s" => ConsoleCommand::Status,
        "help" | "h" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        "eclipse" => ConsoleCommand::Toggle(ServiceKind::Ide),
        "dashboard" => ConsoleCommand::Toggle(ServiceKind::Tunnel),
        other => match ServiceKind::from_id(other) {
            Some(kind) => ConsoleCommand::Toggle(kind),
            None => ConsoleCommand::Unknown(word.to_string()),
        },
    }
}

fn is_yes(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// One-line summary of the running services.
pub fn summary(running: &[ServiceKind]) -> String {
    if running.is_empty() {
        return "No service running".to_string();
    }
    if ServiceKind::ALL.iter().all(|kind| running.contains(kind)) {
        return "All services are running".to_string();
    }
    let labels: Vec<&str> = ServiceKind::ALL
        .iter()
        .filter(|kind| running.contains(kind))
        .map(|kind| kind.label())
        .collect();
    format!("Running : {}", labels.join(" + "))
}
