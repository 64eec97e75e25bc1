//! Application state and main loop.

use crate::event::{self, Event};
use crate::ui;
use aila_core::{AppConfig, AppPaths, Digest, RefreshSchedule};
use anyhow::{Context, Result};
use crossterm::{
    event::{KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Current input mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Help,
}

// ─── App State ───────────────────────────────────────────────────────

pub struct App {
    pub mode: Mode,
    pub running: bool,

    // Digest
    pub digest: Option<Digest>,
    pub show_originals: bool,
    pub scroll: usize,

    // Refresh state
    pub schedule: RefreshSchedule,
    pub last_run: Option<Instant>,
    pub last_poll: Option<Instant>,
    pub refreshing: bool,
    pub status_msg: String,
}

impl App {
    pub fn new(schedule: RefreshSchedule, digest: Option<Digest>) -> Self {
        let last_run = digest
            .as_ref()
            .and_then(|d| last_run_from(d, chrono::Utc::now(), Instant::now()));
        Self {
            mode: Mode::Normal,
            running: true,

            digest,
            show_originals: false,
            scroll: 0,

            schedule,
            last_run,
            last_poll: None,
            refreshing: false,
            status_msg: String::new(),
        }
    }

    pub const fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_add(1);
    }

    pub const fn scroll_up(&mut self) {
        self.scroll = self.scroll.saturating_sub(1);
    }

    /// Whether the schedule asks for a refresh at `now`.
    ///
    /// The schedule is only consulted once per poll interval.
    pub fn refresh_due(&mut self, now: Instant) -> bool {
        if self.refreshing {
            return false;
        }
        if let Some(polled) = self.last_poll
            && now.saturating_duration_since(polled) < self.schedule.poll_interval
        {
            return false;
        }
        self.last_poll = Some(now);
        self.schedule.is_due_at(self.last_run, now)
    }

    /// Record that a refresh is starting.
    pub fn begin_refresh(&mut self, now: Instant) {
        self.refreshing = true;
        self.last_run = Some(now);
        self.status_msg = "Getting data from Aula and running the model...".to_string();
    }

    /// Apply the result of a refresh.
    pub fn finish_refresh(&mut self, result: Result<Digest, String>) {
        self.refreshing = false;
        match result {
            Ok(digest) => {
                self.status_msg = format!("{} new item(s)", digest.items.len());
                self.digest = Some(digest);
                self.scroll = 0;
            }
            Err(e) => self.status_msg = format!("Refresh failed: {e}"),
        }
    }
}

/// Map the time a digest was written onto the monotonic clock.
fn last_run_from(digest: &Digest, now_utc: chrono::DateTime<chrono::Utc>, now: Instant) -> Option<Instant> {
    let age = (now_utc - digest.updated_at).to_std().ok()?;
    now.checked_sub(age)
}

/// File the TUI logs to. The terminal belongs to the display, so log lines
/// go to `logging.file` or else to the daemon log in the state directory.
fn log_target(config: &AppConfig, paths: &AppPaths) -> PathBuf {
    config
        .logging
        .file
        .as_ref()
        .map_or_else(|| aila_core::daemon::log_file_path(&paths.state_dir), PathBuf::from)
}

fn init_logging(config: &AppConfig, paths: &AppPaths) -> Result<()> {
    let path = log_target(config, paths);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening log file {}", path.display()))?;

    let level = config.logging.level.level_filter();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.as_str()))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .write_style(env_logger::WriteStyle::Never)
        .try_init()
        .or_else(|_| Ok(()))
}

// ─── Main loop ───────────────────────────────────────────────────────

pub fn run(config_path: Option<&Path>) -> Result<()> {
    let paths = AppPaths::discover(config_path)?;
    let config = AppConfig::load(&paths, false)?;
    let paths = paths.apply_overrides(&config)?;
    paths.ensure_directories()?;
    init_logging(&config, &paths)?;

    let digest = aila_core::load_last_digest(&paths).unwrap_or_else(|e| {
        log::warn!("ignoring unreadable digest: {e}");
        None
    });
    let mut app = App::new(RefreshSchedule::from_config(&config.schedule), digest);

    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (tx, events) = mpsc::channel();
    event::spawn_event_reader(Duration::from_millis(200), tx.clone());

    while app.running {
        terminal.draw(|f| ui::draw(f, &app))?;

        match events.recv()? {
            Event::Key(key) => {
                if key.kind == KeyEventKind::Press {
                    handle_key(&mut app, key, &config, &paths, &tx);
                }
            }
            Event::Resize => {} // ratatui handles this
            Event::Tick => {
                if app.refresh_due(Instant::now()) {
                    start_refresh(&mut app, &config, &paths, &tx);
                }
            }
            Event::Refreshed(result) => app.finish_refresh(result),
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    Ok(())
}

fn handle_key(
    app: &mut App,
    key: KeyEvent,
    config: &AppConfig,
    paths: &AppPaths,
    tx: &mpsc::Sender<Event>,
) {
    if app.mode == Mode::Help {
        if matches!(key.code, KeyCode::Esc | KeyCode::Char('q' | '?')) {
            app.mode = Mode::Normal;
        }
        return;
    }

    match key.code {
        KeyCode::Char('q') => app.running = false,
        KeyCode::Char('?') => app.mode = Mode::Help,
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(),
        KeyCode::Char('g') => app.scroll = 0,
        KeyCode::Char('o') => {
            app.show_originals = !app.show_originals;
        }
        KeyCode::Char('r') if !app.refreshing => start_refresh(app, config, paths, tx),
        _ => {}
    }
}

/// Run one cycle on its own thread and report back through `tx`.
fn start_refresh(app: &mut App, config: &AppConfig, paths: &AppPaths, tx: &mpsc::Sender<Event>) {
    app.begin_refresh(Instant::now());

    let config = config.clone();
    let paths = paths.clone();
    let tx = tx.clone();
    std::thread::spawn(move || {
        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| e.to_string())
            .and_then(|rt| {
                rt.block_on(aila_core::run_cycle(&config, &paths))
                    .map_err(|e| e.to_string())
            });
        let _ = tx.send(Event::Refreshed(result));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn digest_at(updated_at: chrono::DateTime<Utc>) -> Digest {
        Digest {
            updated_at,
            items: Vec::new(),
            daily_summary: String::new(),
        }
    }

    #[test]
    fn fresh_digest_is_not_due() {
        let now_utc = Utc::now();
        let now = Instant::now() + Duration::from_secs(7200);
        let last = last_run_from(&digest_at(now_utc - chrono::Duration::hours(1)), now_utc, now);
        assert_eq!(last, now.checked_sub(Duration::from_secs(3600)));

        let schedule = RefreshSchedule::default();
        assert!(!schedule.is_due_at(last, now));
    }

    #[test]
    fn logs_go_to_a_file() {
        let paths = AppPaths::discover(Some(Path::new("/nonexistent/aila.toml"))).expect("paths");
        let mut config = AppConfig::default();
        assert_eq!(log_target(&config, &paths), paths.state_dir.join("aila.log"));

        config.logging.file = Some("/var/tmp/aila-tui.log".to_string());
        assert_eq!(log_target(&config, &paths), PathBuf::from("/var/tmp/aila-tui.log"));
    }

    #[test]
    fn without_digest_first_poll_is_due() {
        let mut app = App::new(RefreshSchedule::default(), None);
        let now = Instant::now();
        assert!(app.refresh_due(now));

        app.begin_refresh(now);
        assert!(!app.refresh_due(now + Duration::from_secs(120)));
    }

    #[test]
    fn polling_waits_for_the_interval() {
        let mut app = App::new(RefreshSchedule::default(), None);
        let now = Instant::now();
        app.last_poll = Some(now);
        assert!(!app.refresh_due(now + Duration::from_secs(10)));
        assert!(app.refresh_due(now + Duration::from_secs(60)));
    }

    #[test]
    fn failed_refresh_keeps_old_digest() {
        let mut app = App::new(RefreshSchedule::default(), Some(digest_at(Utc::now())));
        app.begin_refresh(Instant::now());
        app.finish_refresh(Err("authentication failed".to_string()));

        assert!(!app.refreshing);
        assert!(app.digest.is_some());
        assert!(app.status_msg.contains("authentication failed"));
    }
}
