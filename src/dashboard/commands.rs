use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::{debug, warn};

use crate::{
    config::AppContext,
    control,
    device::DeviceHandle,
    errors::BntError,
    profile_store::{ProfileError, Slot},
    telemetry::TelemetrySnapshot,
};

// How long a result stays on screen before polling resumes
pub const SETTLE_BASE: Duration = Duration::from_secs(1);
pub const SETTLE_VALIDATION_EXTRA: Duration = Duration::from_secs(1);
pub const SETTLE_LOAD_EXTRA: Duration = Duration::from_secs(1);

const DELETE_KEYS: [char; 4] = ['!', '@', '#', '$'];

// Values the user can type in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    CoreOffset,
    MemOffset,
    PowerLimit,
    FanSpeed,
}

impl PromptKind {
    pub fn label(self) -> &'static str {
        match self {
            PromptKind::CoreOffset => "Enter core clock offset (MHz)",
            PromptKind::MemOffset => "Enter memory clock offset (MHz)",
            PromptKind::PowerLimit => "Enter power limit (W)",
            PromptKind::FanSpeed => "Enter fan speed (30-100%)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    Help,
    ToggleProcesses,
    Prompt(PromptKind),
    AutoFan,
    SaveProfile(Slot),
    LoadProfile(Slot),
    DeleteProfile(Slot),
}

impl Command {
    /// Map a key press to a command. Only `q`, `h` and `i` are live
    /// when the dashboard is read-only.
    pub fn from_key(key: KeyEvent, interactive: bool) -> Option<Command> {
        if is_interrupt(&key) {
            return Some(Command::Quit);
        }

        let command = match key.code {
            KeyCode::Char('q') => Command::Quit,
            KeyCode::Char('h') => Command::Help,
            KeyCode::Char('i') => Command::ToggleProcesses,

            _ if !interactive => return None,

            KeyCode::Char('c') => Command::Prompt(PromptKind::CoreOffset),
            KeyCode::Char('m') => Command::Prompt(PromptKind::MemOffset),
            KeyCode::Char('p') => Command::Prompt(PromptKind::PowerLimit),
            KeyCode::Char('f') => Command::Prompt(PromptKind::FanSpeed),
            KeyCode::Char('a') => Command::AutoFan,

            KeyCode::Char(c @ '1'..='4') => {
                Command::SaveProfile(slot_from_digit(c)?)
            }
            KeyCode::F(n @ 1..=4) => {
                Command::LoadProfile(Slot::new(i64::from(n)).ok()?)
            }
            KeyCode::Char(c) if DELETE_KEYS.contains(&c) => {
                let position = DELETE_KEYS.iter().position(|k| *k == c)?;
                Command::DeleteProfile(Slot::new(position as i64 + 1).ok()?)
            }

            _ => return None,
        };

        Some(command)
    }
}

pub fn is_interrupt(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && key.code == KeyCode::Char('c')
}

fn slot_from_digit(c: char) -> Option<Slot> {
    let digit = c.to_digit(10)?;
    Slot::new(i64::from(digit)).ok()
}

// What a finished command does to the active profile marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveProfile {
    Keep,
    Clear,
    Set(Slot),
    ClearIfActive(Slot),
}

// Result of a mutating command, shown inline for the settle delay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub message: String,
    pub success: bool,
    pub settle: Duration,
    pub active: ActiveProfile,
}

impl Outcome {
    fn from_result(
        result: Result<String, BntError>,
        on_success: ActiveProfile,
    ) -> Self {
        match result {
            Ok(message) => {
                debug!("Command succeeded: {message}");

                Self {
                    message,
                    success: true,
                    settle: SETTLE_BASE,
                    active: on_success,
                }
            }
            Err(err) => {
                warn!("Command failed: {err}");

                let settle = if err.is_validation() {
                    SETTLE_BASE + SETTLE_VALIDATION_EXTRA
                } else {
                    SETTLE_BASE
                };

                Self {
                    message: err.to_string(),
                    success: false,
                    settle,
                    active: ActiveProfile::Keep,
                }
            }
        }
    }
}

/// Apply a typed value. Every error is caught here and turned into
/// the message shown on the dashboard.
pub fn submit(kind: PromptKind, input: &str, ctx: &mut AppContext) -> Outcome {
    let result = apply_value(kind, input, ctx.device.as_mut());

    Outcome::from_result(result, ActiveProfile::Clear)
}

fn apply_value(
    kind: PromptKind,
    input: &str,
    device: &mut dyn DeviceHandle,
) -> Result<String, BntError> {
    let value = control::parse_int(input)?;

    let message = match kind {
        PromptKind::CoreOffset => {
            control::set_core_offset(device, value)?;
            format!("Core clock offset set to {value:+} MHz")
        }
        PromptKind::MemOffset => {
            control::set_mem_offset(device, value)?;
            format!("Memory clock offset set to {value:+} MHz")
        }
        PromptKind::PowerLimit => {
            control::set_power_limit(device, value)?;
            format!("Power limit set to {value} W")
        }
        PromptKind::FanSpeed => {
            let fans = control::set_custom_fan(device, value)?;
            format!("Set {fans} fans to {value}%")
        }
    };

    Ok(message)
}

/// Run a command that acts immediately. Returns `None` for commands that
/// only change the view.
pub fn execute(command: Command, ctx: &mut AppContext) -> Option<Outcome> {
    let outcome = match command {
        Command::AutoFan => {
            let result = control::set_auto_fan(ctx.device.as_mut())
                .map(|fans| format!("Restored automatic control on {fans} fans"))
                .map_err(BntError::from);

            Outcome::from_result(result, ActiveProfile::Clear)
        }
        Command::SaveProfile(slot) => {
            let snapshot = TelemetrySnapshot::capture(ctx.device.as_ref());
            let result = ctx
                .store
                .save(slot, &snapshot)
                .map(|_| format!("Saved current settings to profile {slot}"))
                .map_err(BntError::from);

            Outcome::from_result(result, ActiveProfile::Set(slot))
        }
        Command::LoadProfile(slot) => {
            let result = ctx.store.load(slot, ctx.device.as_mut());

            // A rejected write can leave part of the profile applied
            let partial = matches!(result, Err(ProfileError::DeviceRejected { .. }));

            let result = result
                .map(|slot| format!("Loaded profile {slot}"))
                .map_err(BntError::from);

            let mut outcome = Outcome::from_result(result, ActiveProfile::Set(slot));
            outcome.settle += SETTLE_LOAD_EXTRA;

            if partial {
                outcome.active = ActiveProfile::Clear;
            }

            outcome
        }
        Command::DeleteProfile(slot) => {
            let result: Result<String, BntError> = match ctx.store.delete(slot) {
                Ok(true) => Ok(format!("Deleted profile {slot}")),
                Ok(false) => Err(ProfileError::NotFound(slot).into()),
                Err(err) => Err(err.into()),
            };

            Outcome::from_result(result, ActiveProfile::ClearIfActive(slot))
        }
        Command::Quit
        | Command::Help
        | Command::ToggleProcesses
        | Command::Prompt(_) => return None,
    };

    Some(outcome)
}
