pub mod commands;
pub mod palette;
pub mod ui;

use std::{
    io::{self, Write},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind};
use futures::{Stream, StreamExt};
use ratatui::{Terminal, backend::Backend};
use tokio::{select, time::sleep};
use tracing::{error, info, trace};

use crate::{
    EXIT_DEVICE_INIT, EXIT_USER_QUIT,
    config::AppContext,
    control,
    device::ProcessEntry,
    profile_store::Slot,
    telemetry::{self, TelemetrySnapshot},
};

use self::commands::{ActiveProfile, Command, Outcome, PromptKind};

// Longest value accepted at a prompt
pub const MAX_INPUT_LEN: usize = 12;

const PERSISTENCE_COUNTDOWN: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Monitor,
    Help,
    ProcessInfo,
    ProfileInput(PromptKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: String,
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

// Device readings shown by the current frame
#[derive(Debug, Clone, Default)]
pub struct Readings {
    pub snapshot: TelemetrySnapshot,
    // Only captured while the process view is open
    pub processes: Option<Result<Vec<ProcessEntry>, String>>,
}

impl Readings {
    pub fn capture(ctx: &AppContext, view: View) -> Self {
        let device = ctx.device.as_ref();

        let processes = (view == View::ProcessInfo).then(|| {
            telemetry::capture_processes(device).map_err(|e| e.to_string())
        });

        Self {
            snapshot: TelemetrySnapshot::capture(device),
            processes,
        }
    }
}

/// The dashboard state machine.
///
/// Key handling is kept free of terminal I/O so it can be driven directly;
/// [`run`] owns the polling and drawing.
#[derive(Debug)]
pub struct DashboardState {
    view: View,

    // Profile whose settings are currently applied, None for custom
    active_profile: Option<Slot>,

    reactive_color: bool,
    interactive: bool,
    refresh: Duration,

    // Hold time requested by the last mutating command
    pending_settle: Option<Duration>,

    input: String,
    status: Option<StatusMessage>,
}

impl DashboardState {
    pub fn new(ctx: &mut AppContext) -> Self {
        // Pick up profiles saved by earlier sessions
        ctx.store.refresh();

        Self {
            view: View::Monitor,
            active_profile: None,
            reactive_color: ctx.config.reactive_color,
            interactive: ctx.config.interactive,
            refresh: ctx.config.refresh,
            pending_settle: None,
            input: String::new(),
            status: None,
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn active_profile(&self) -> Option<Slot> {
        self.active_profile
    }

    pub fn reactive_color(&self) -> bool {
        self.reactive_color
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }

    pub fn refresh(&self) -> Duration {
        self.refresh
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn status(&self) -> Option<&StatusMessage> {
        self.status.as_ref()
    }

    // Help and text entry wait for a key without refreshing
    pub fn is_blocking(&self) -> bool {
        matches!(self.view, View::Help | View::ProfileInput(_))
    }

    pub fn take_settle(&mut self) -> Option<Duration> {
        self.pending_settle.take()
    }

    pub fn clear_status(&mut self) {
        self.status = None;
    }

    pub fn handle_key(&mut self, key: KeyEvent, ctx: &mut AppContext) -> Flow {
        // Ignore the release and repeat events some terminals report
        if key.kind != KeyEventKind::Press {
            return Flow::Continue;
        }

        if commands::is_interrupt(&key) {
            return Flow::Quit;
        }

        match self.view {
            View::Help => {
                self.view = View::Monitor;
                Flow::Continue
            }
            View::ProfileInput(kind) => {
                self.handle_input_key(kind, key, ctx);
                Flow::Continue
            }
            View::Monitor | View::ProcessInfo => self.handle_command_key(key, ctx),
        }
    }

    fn handle_command_key(&mut self, key: KeyEvent, ctx: &mut AppContext) -> Flow {
        let Some(command) = Command::from_key(key, self.interactive) else {
            trace!("Ignoring key {:?}", key.code);
            return Flow::Continue;
        };

        trace!("Dashboard command: {:?}", command);

        match command {
            Command::Quit => return Flow::Quit,
            Command::Help => self.view = View::Help,
            Command::ToggleProcesses => {
                self.view = match self.view {
                    View::ProcessInfo => View::Monitor,
                    _ => View::ProcessInfo,
                };
            }
            Command::Prompt(kind) => {
                self.input.clear();
                self.view = View::ProfileInput(kind);
            }
            command => {
                if let Some(outcome) = commands::execute(command, ctx) {
                    self.apply_outcome(outcome);
                }
            }
        }

        Flow::Continue
    }

    fn handle_input_key(
        &mut self,
        kind: PromptKind,
        key: KeyEvent,
        ctx: &mut AppContext,
    ) {
        match key.code {
            KeyCode::Enter => {
                let outcome = commands::submit(kind, &self.input, ctx);

                self.input.clear();
                self.view = View::Monitor;
                self.apply_outcome(outcome);
            }
            KeyCode::Esc => {
                self.input.clear();
                self.view = View::Monitor;
            }
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Char(c) if self.input.chars().count() < MAX_INPUT_LEN => {
                self.input.push(c);
            }
            _ => {}
        }
    }

    fn apply_outcome(&mut self, outcome: Outcome) {
        match outcome.active {
            ActiveProfile::Keep => {}
            ActiveProfile::Clear => self.active_profile = None,
            ActiveProfile::Set(slot) => self.active_profile = Some(slot),
            ActiveProfile::ClearIfActive(slot) => {
                if self.active_profile == Some(slot) {
                    self.active_profile = None;
                }
            }
        }

        self.status = Some(StatusMessage {
            text: outcome.message,
            success: outcome.success,
        });
        self.pending_settle = Some(outcome.settle);
    }
}

/// Start the dashboard: enable persistence when changes are allowed, take
/// over the terminal and run until the user quits.
///
/// Returns the process exit code.
pub async fn start(ctx: &mut AppContext) -> Result<u8> {
    if ctx.config.interactive {
        if let Err(err) = control::enable_persistence(ctx.device.as_mut()) {
            error!("Failed to enable persistence mode: {err}");

            persistence_countdown(&err.to_string()).await?;

            return Ok(EXIT_DEVICE_INIT);
        }
    }

    let mut terminal =
        ratatui::try_init().with_context(|| "Failed to initialize the terminal")?;

    let mut events = EventStream::new();
    let result = run(ctx, &mut terminal, &mut events).await;

    ratatui::restore();

    result.map(|()| EXIT_USER_QUIT)
}

async fn persistence_countdown(reason: &str) -> Result<()> {
    let mut stdout = std::io::stdout();

    writeln!(stdout, "Failed to enable persistence mode: {reason}")?;
    writeln!(stdout, "Interactive mode needs persistence mode (try running as root).")?;

    for remaining in (1..=PERSISTENCE_COUNTDOWN).rev() {
        writeln!(stdout, "Exiting in {remaining}...")?;
        stdout.flush()?;

        sleep(Duration::from_secs(1)).await;
    }

    Ok(())
}

// Poll, draw and dispatch keys until the user quits
pub async fn run<B, S>(
    ctx: &mut AppContext,
    terminal: &mut Terminal<B>,
    events: &mut S,
) -> Result<()>
where
    B: Backend,
    S: Stream<Item = io::Result<Event>> + Unpin,
{
    info!("Dashboard: Running");

    let mut state = DashboardState::new(ctx);
    let mut readings = Readings::capture(ctx, state.view());

    loop {
        terminal.draw(|frame| ui::draw(frame, &state, &readings, ctx))?;

        let event = if state.is_blocking() {
            next_key(events).await?
        } else {
            select! {
                event = next_key(events) => event?,
                _ = sleep(state.refresh()) => {
                    readings = Readings::capture(ctx, state.view());
                    continue;
                }
            }
        };

        // Resize and other non-key events only need a redraw
        let Some(key) = event else {
            continue;
        };

        if state.handle_key(key, ctx) == Flow::Quit {
            info!("Dashboard: Quiting");
            break;
        }

        if let Some(settle) = state.take_settle() {
            readings = Readings::capture(ctx, state.view());
            terminal.draw(|frame| ui::draw(frame, &state, &readings, ctx))?;

            sleep(settle).await;

            state.clear_status();
        }

        if !state.is_blocking() {
            readings = Readings::capture(ctx, state.view());
        }
    }

    Ok(())
}

async fn next_key<S>(events: &mut S) -> Result<Option<KeyEvent>>
where
    S: Stream<Item = io::Result<Event>> + Unpin,
{
    match events.next().await {
        Some(Ok(Event::Key(key))) => Ok(Some(key)),
        Some(Ok(_)) => Ok(None),
        Some(Err(err)) => Err(err).with_context(|| "Failed to read terminal input"),
        None => Err(anyhow!("Terminal input stream closed")),
    }
}

#[cfg(test)]
mod tests {
    use crossterm::event::{KeyEventState, KeyModifiers};
    use futures::stream::{self, BoxStream};
    use ratatui::backend::TestBackend;
    use tempfile::TempDir;
    use tokio::time::Instant;

    use super::*;
    use crate::{
        config::Configuration,
        device::mock::MockDevice,
    };

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        }
    }

    fn context(dir: &TempDir, interactive: bool) -> AppContext {
        context_with(dir, interactive, MockDevice::new())
    }

    fn context_with(dir: &TempDir, interactive: bool, device: MockDevice) -> AppContext {
        let config = Configuration {
            gpu_index: 0,
            refresh: Duration::from_millis(500),
            interactive,
            reactive_color: false,
            no_color: false,
            action: None,
            profile_dir: dir.path().to_path_buf(),
            log_file: None,
        };

        AppContext::new(config, Box::new(device))
    }

    // Each key arrives the given number of milliseconds after the previous one
    fn scripted_keys(script: Vec<(u64, KeyCode)>) -> BoxStream<'static, io::Result<Event>> {
        stream::unfold(script.into_iter(), |mut script| async move {
            let (delay, code) = script.next()?;
            sleep(Duration::from_millis(delay)).await;

            Some((Ok(Event::Key(key(code))), script))
        })
        .boxed()
    }

    struct LoopRun {
        screen: String,
        captures: usize,
        elapsed: Duration,
    }

    // Drive the loop on a test terminal with paused time
    async fn run_script(interactive: bool, script: Vec<(u64, KeyCode)>) -> LoopRun {
        tokio::time::pause();

        let dir = TempDir::new().unwrap();
        let device = MockDevice::new();
        let captures = device.name_reads.clone();
        let mut ctx = context_with(&dir, interactive, device);
        let mut terminal = Terminal::new(TestBackend::new(110, 20)).unwrap();
        let mut events = scripted_keys(script);

        let started = Instant::now();
        run(&mut ctx, &mut terminal, &mut events).await.unwrap();
        let elapsed = started.elapsed();

        let screen = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect();

        LoopRun {
            screen,
            captures: captures.get(),
            elapsed,
        }
    }

    fn type_text(state: &mut DashboardState, ctx: &mut AppContext, text: &str) {
        for c in text.chars() {
            state.handle_key(key(KeyCode::Char(c)), ctx);
        }
    }

    fn slot(id: i64) -> Slot {
        Slot::new(id).unwrap()
    }

    #[test]
    fn starts_in_monitor_with_no_active_profile() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, false);

        let state = DashboardState::new(&mut ctx);

        assert_eq!(state.view(), View::Monitor);
        assert_eq!(state.active_profile(), None);
        assert_eq!(state.refresh(), Duration::from_millis(500));
        assert!(!state.is_blocking());
    }

    #[test]
    fn help_blocks_and_any_key_returns_to_monitor() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, false);
        let mut state = DashboardState::new(&mut ctx);

        state.handle_key(key(KeyCode::Char('h')), &mut ctx);
        assert_eq!(state.view(), View::Help);
        assert!(state.is_blocking());

        assert_eq!(state.handle_key(key(KeyCode::Char('q')), &mut ctx), Flow::Continue);
        assert_eq!(state.view(), View::Monitor);
    }

    #[test]
    fn process_view_toggles_and_keeps_refreshing() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, false);
        let mut state = DashboardState::new(&mut ctx);

        state.handle_key(key(KeyCode::Char('i')), &mut ctx);
        assert_eq!(state.view(), View::ProcessInfo);
        assert!(!state.is_blocking());

        state.handle_key(key(KeyCode::Char('i')), &mut ctx);
        assert_eq!(state.view(), View::Monitor);
    }

    #[test]
    fn quit_key_ends_the_loop_from_any_polling_view() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, false);
        let mut state = DashboardState::new(&mut ctx);

        state.handle_key(key(KeyCode::Char('i')), &mut ctx);

        assert_eq!(state.handle_key(key(KeyCode::Char('q')), &mut ctx), Flow::Quit);
    }

    #[test]
    fn action_keys_are_inert_in_read_only_mode() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, false);
        let mut state = DashboardState::new(&mut ctx);

        for c in ['c', 'm', 'p', 'f', 'a', '1', '!'] {
            state.handle_key(key(KeyCode::Char(c)), &mut ctx);
            assert_eq!(state.view(), View::Monitor);
        }
        state.handle_key(key(KeyCode::F(1)), &mut ctx);

        assert_eq!(state.take_settle(), None);
        assert!(!ctx.store.is_present(slot(1)));
    }

    #[test]
    fn prompt_collects_text_and_applies_on_enter() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, true);
        let mut state = DashboardState::new(&mut ctx);

        state.handle_key(key(KeyCode::Char('p')), &mut ctx);
        assert_eq!(state.view(), View::ProfileInput(PromptKind::PowerLimit));
        assert!(state.is_blocking());

        type_text(&mut state, &mut ctx, "3000");
        state.handle_key(key(KeyCode::Backspace), &mut ctx);
        assert_eq!(state.input(), "300");

        state.handle_key(key(KeyCode::Enter), &mut ctx);

        assert_eq!(state.view(), View::Monitor);
        assert_eq!(state.take_settle(), Some(commands::SETTLE_BASE));
        let status = state.status().unwrap();
        assert!(status.success);
        assert_eq!(status.text, "Power limit set to 300 W");
    }

    #[test]
    fn escape_cancels_the_prompt_without_writing() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, true);
        let mut state = DashboardState::new(&mut ctx);

        state.handle_key(key(KeyCode::Char('c')), &mut ctx);
        type_text(&mut state, &mut ctx, "100");
        state.handle_key(key(KeyCode::Esc), &mut ctx);

        assert_eq!(state.view(), View::Monitor);
        assert_eq!(state.input(), "");
        assert_eq!(state.take_settle(), None);
    }

    #[test]
    fn prompt_input_is_bounded() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, true);
        let mut state = DashboardState::new(&mut ctx);

        state.handle_key(key(KeyCode::Char('m')), &mut ctx);
        type_text(&mut state, &mut ctx, &"9".repeat(MAX_INPUT_LEN + 5));

        assert_eq!(state.input().len(), MAX_INPUT_LEN);
    }

    #[test]
    fn refused_fan_speed_holds_the_message_longer() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, true);
        let mut state = DashboardState::new(&mut ctx);

        state.handle_key(key(KeyCode::Char('f')), &mut ctx);
        type_text(&mut state, &mut ctx, "15");
        state.handle_key(key(KeyCode::Enter), &mut ctx);

        assert_eq!(
            state.take_settle(),
            Some(commands::SETTLE_BASE + commands::SETTLE_VALIDATION_EXTRA)
        );
        assert!(!state.status().unwrap().success);
    }

    #[test]
    fn profile_keys_track_the_active_slot() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, true);
        let mut state = DashboardState::new(&mut ctx);

        state.handle_key(key(KeyCode::Char('2')), &mut ctx);
        assert_eq!(state.active_profile(), Some(slot(2)));
        assert!(ctx.store.is_present(slot(2)));

        // A manual change leaves the profile
        state.handle_key(key(KeyCode::Char('a')), &mut ctx);
        assert_eq!(state.active_profile(), None);

        state.handle_key(key(KeyCode::F(2)), &mut ctx);
        assert_eq!(state.active_profile(), Some(slot(2)));
        assert_eq!(
            state.take_settle(),
            Some(commands::SETTLE_BASE + commands::SETTLE_LOAD_EXTRA)
        );

        state.handle_key(key(KeyCode::Char('@')), &mut ctx);
        assert_eq!(state.active_profile(), None);
        assert!(!ctx.store.is_present(slot(2)));
    }

    #[test]
    fn ctrl_c_quits_even_while_typing() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, true);
        let mut state = DashboardState::new(&mut ctx);

        state.handle_key(key(KeyCode::Char('c')), &mut ctx);

        let mut ctrl_c = key(KeyCode::Char('c'));
        ctrl_c.modifiers = KeyModifiers::CONTROL;

        assert_eq!(state.handle_key(ctrl_c, &mut ctx), Flow::Quit);
    }

    #[test]
    fn key_releases_are_ignored() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir, false);
        let mut state = DashboardState::new(&mut ctx);

        let mut release = key(KeyCode::Char('q'));
        release.kind = KeyEventKind::Release;

        assert_eq!(state.handle_key(release, &mut ctx), Flow::Continue);
    }

    #[test]
    fn readings_include_processes_only_in_process_view() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, false);

        assert!(Readings::capture(&ctx, View::Monitor).processes.is_none());
        assert!(matches!(
            Readings::capture(&ctx, View::ProcessInfo).processes,
            Some(Ok(_))
        ));
    }

    #[tokio::test]
    async fn failed_persistence_is_fatal_in_interactive_mode() {
        let dir = TempDir::new().unwrap();
        let config = Configuration {
            gpu_index: 0,
            refresh: Duration::from_millis(500),
            interactive: true,
            reactive_color: false,
            no_color: true,
            action: None,
            profile_dir: dir.path().to_path_buf(),
            log_file: None,
        };
        let device = MockDevice { reject_writes: true, ..MockDevice::new() };
        let mut ctx = AppContext::new(config, Box::new(device));

        tokio::time::pause();
        let code = start(&mut ctx).await.unwrap();

        assert_eq!(code, EXIT_DEVICE_INIT);
    }

    #[tokio::test]
    async fn idle_monitor_recaptures_on_every_refresh() {
        let result = run_script(false, vec![(1250, KeyCode::Char('q'))]).await;

        // Start-up, then the refreshes at 500 and 1000 ms
        assert_eq!(result.captures, 3);
        assert!(result.elapsed >= Duration::from_millis(1250));
        assert!(result.elapsed < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn help_screen_waits_without_refreshing() {
        let script = vec![
            (100, KeyCode::Char('h')),
            (3000, KeyCode::Char('x')),
            (100, KeyCode::Char('q')),
        ];

        let result = run_script(false, script).await;

        // Start-up and the capture on the way back to the monitor
        assert_eq!(result.captures, 2);
    }

    #[tokio::test]
    async fn prompt_waits_without_refreshing() {
        let script = vec![
            (100, KeyCode::Char('c')),
            (2000, KeyCode::Char('5')),
            (2000, KeyCode::Esc),
            (100, KeyCode::Char('q')),
        ];

        let result = run_script(true, script).await;

        assert_eq!(result.captures, 2);
        assert!(result.elapsed >= Duration::from_millis(4200));
    }

    #[tokio::test]
    async fn status_is_held_for_the_settle_delay_then_cleared() {
        let script = vec![(100, KeyCode::Char('a')), (10, KeyCode::Char('q'))];

        let result = run_script(true, script).await;

        // The next key is only read once the hold is over
        assert!(result.elapsed >= Duration::from_millis(100) + commands::SETTLE_BASE);
        // Start-up, the post-action frame and the one after the hold
        assert_eq!(result.captures, 3);
        assert!(!result.screen.contains("Restored automatic control"));
    }
}
