//! Application state: the bound pet session, the companion and terminal commands.
//!
//! `AppState` is the single owner of the running session. Every command the
//! user types goes through [`AppState::execute`].

use std::str::FromStr;

use neurolink_core::PetState;
use neurolink_sync::{AutosaveCoordinator, DocumentStore, SaveRequest};
use thiserror::Error;

use crate::companion::Companion;

pub const HELP: &str = "commands: feed | play | clean | sleep | status | save | away | back | \
chat <message> | mission <idea> | hint <puzzle> | retry <attempt> | post <topic> | help | quit";

/// A parsed terminal command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Feed,
    Play,
    Clean,
    Sleep,
    Status,
    Save,
    /// Leave the pet view: stop ticking and periodic saves.
    Away,
    /// Return to the pet view.
    Back,
    Chat(String),
    Mission(String),
    /// Ask for a hint on a puzzle; starts a new puzzle when the text differs.
    Hint(String),
    /// Record a failed attempt at the current puzzle.
    Retry(String),
    Post(String),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}` ({HELP})")]
    Unknown(String),
    #[error("`{0}` needs some text after it")]
    MissingText(&'static str),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let text = |name: &'static str| {
            if rest.is_empty() {
                Err(CommandError::MissingText(name))
            } else {
                Ok(rest.to_string())
            }
        };
        match word.to_ascii_lowercase().as_str() {
            "" => Err(CommandError::Empty),
            "feed" => Ok(Command::Feed),
            "play" => Ok(Command::Play),
            "clean" => Ok(Command::Clean),
            "sleep" => Ok(Command::Sleep),
            "status" => Ok(Command::Status),
            "save" => Ok(Command::Save),
            "away" => Ok(Command::Away),
            "back" => Ok(Command::Back),
            "chat" => text("chat").map(Command::Chat),
            "mission" => text("mission").map(Command::Mission),
            "hint" => text("hint").map(Command::Hint),
            "retry" => text("retry").map(Command::Retry),
            "post" => text("post").map(Command::Post),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "logout" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Map one stdin read to a command.
///
/// Blank lines yield `None`. A closed or failing stdin logs out like `quit`, so
/// the final save still runs.
pub fn command_from_input(line: std::io::Result<Option<String>>) -> Option<Result<Command, CommandError>> {
    match line {
        Ok(Some(line)) if line.trim().is_empty() => None,
        Ok(Some(line)) => Some(line.parse()),
        Ok(None) => Some(Ok(Command::Quit)),
        Err(err) => {
            log::error!("failed to read stdin: {err}");
            Some(Ok(Command::Quit))
        }
    }
}

/// Whether the session loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// One-line summary of the pet.
pub fn status_line(pet: &PetState) -> String {
    format!(
        "{} | lvl {} ({} / {} xp) | hunger {:.0} | happiness {:.0} | energy {:.0} | cleanliness {:.0}",
        pet.name,
        pet.level,
        pet.xp,
        pet.level.saturating_mul(neurolink_core::pet::XP_PER_LEVEL),
        pet.hunger,
        pet.happiness,
        pet.energy,
        pet.cleanliness,
    )
}

pub struct AppState<S: DocumentStore> {
    pub coordinator: AutosaveCoordinator<S>,
    pub companion: Companion,
    /// False while the user is away from the pet view.
    active: bool,
    puzzle: Option<Puzzle>,
}

/// Puzzle being worked on and the attempts that failed so far.
#[derive(Debug, Default)]
struct Puzzle {
    state: String,
    attempts: Vec<String>,
}

impl<S: DocumentStore> AppState<S> {
    pub fn new(coordinator: AutosaveCoordinator<S>, companion: Companion) -> Self {
        Self {
            coordinator,
            companion,
            active: true,
            puzzle: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Advance the simulation by `dt` seconds while the pet view is active.
    pub async fn tick(&self, dt: f64) {
        if self.active {
            self.coordinator.update_pet(|pet| pet.tick(dt)).await;
        }
    }

    /// Run one command and return the text to show.
    pub async fn execute(&mut self, command: Command) -> anyhow::Result<(Flow, String)> {
        let reply = match command {
            Command::Feed => self.act("fed", PetState::feed).await,
            Command::Play => self.act("played with", PetState::play).await,
            Command::Clean => self.act("cleaned", PetState::clean).await,
            Command::Sleep => self.act("put to bed", PetState::sleep).await,
            Command::Status => match self.coordinator.pet().await {
                Some(pet) => status_line(&pet),
                None => "no pet loaded".to_string(),
            },
            Command::Save => match self.coordinator.save_now().await {
                Ok(SaveRequest::NotBound) => "nothing to save".to_string(),
                Ok(_) => "saved".to_string(),
                Err(err) => format!("save failed: {err}"),
            },
            Command::Away => {
                self.active = false;
                self.coordinator.leave().await;
                "see you later! progress is being saved".to_string()
            }
            Command::Back => {
                self.active = true;
                self.coordinator.resume().await;
                "welcome back".to_string()
            }
            Command::Chat(message) => self.companion.chat(&message).await,
            Command::Mission(idea) => self.companion.mission(&idea).await,
            Command::Hint(state) => {
                let puzzle = match self.puzzle.take() {
                    Some(puzzle) if puzzle.state == state => puzzle,
                    _ => Puzzle { state, attempts: Vec::new() },
                };
                let hint = self.companion.puzzle_hint(&puzzle.state, &puzzle.attempts).await;
                self.puzzle = Some(puzzle);
                hint
            }
            Command::Retry(attempt) => match &mut self.puzzle {
                Some(puzzle) => {
                    puzzle.attempts.push(attempt);
                    format!("noted; {} failed attempt(s) so far", puzzle.attempts.len())
                }
                None => "no puzzle yet; type `hint <puzzle>` first".to_string(),
            },
            Command::Post(topic) => self.companion.post_content(&topic).await,
            Command::Help => HELP.to_string(),
            Command::Quit => {
                self.coordinator.end_session().await?;
                return Ok((Flow::Quit, "progress saved, goodbye".to_string()));
            }
        };
        Ok((Flow::Continue, reply))
    }

    async fn act(&self, verb: &str, action: fn(&mut PetState) -> bool) -> String {
        if !self.active {
            return "you are away; type `back` first".to_string();
        }
        match self.coordinator.update_pet(action).await {
            Some(true) => {
                let level = self.coordinator.pet().await.map(|p| p.level).unwrap_or(1);
                format!("you {verb} your pet. level up! now level {level}")
            }
            Some(false) => format!("you {verb} your pet"),
            None => "no pet loaded".to_string(),
        }
    }
}
