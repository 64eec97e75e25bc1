//! Background daemon that refreshes the digest on a schedule.
//!
//! The daemon wakes up every poll interval and runs a cycle once the
//! configured gap since the previous cycle has passed. Cycles run inline, so
//! two of them never overlap.
//!
//! State files:
//! - `$XDG_STATE_HOME/aila/aila.pid` - daemon PID
//! - `$XDG_STATE_HOME/aila/aila.log` - daemon log output

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;

use crate::CoreError;
use crate::config::AppConfig;
use crate::cycle::run_cycle;
use crate::paths::AppPaths;
use crate::schedule::RefreshSchedule;

const PID_FILE_NAME: &str = "aila.pid";
const LOG_FILE_NAME: &str = "aila.log";

// ─── PID management ──────────────────────────────────────────────────

/// PID file inside `state_dir`.
#[must_use]
pub fn pid_file_path(state_dir: &Path) -> PathBuf {
    state_dir.join(PID_FILE_NAME)
}

/// Log file inside `state_dir`.
#[must_use]
pub fn log_file_path(state_dir: &Path) -> PathBuf {
    state_dir.join(LOG_FILE_NAME)
}

/// Read the daemon PID from the PID file. Returns `None` if no file or invalid.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_pid(state_dir: &Path) -> Result<Option<u32>, CoreError> {
    let path = pid_file_path(state_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(content.trim().parse().ok())
}

/// Write the current process PID to the PID file.
///
/// # Errors
///
/// Returns an error on I/O failure.
pub fn write_pid(state_dir: &Path) -> Result<(), CoreError> {
    std::fs::create_dir_all(state_dir)?;
    std::fs::write(pid_file_path(state_dir), std::process::id().to_string())?;
    Ok(())
}

/// Remove the PID file.
///
/// # Errors
///
/// Returns an error on I/O failure.
pub fn remove_pid(state_dir: &Path) -> Result<(), CoreError> {
    let path = pid_file_path(state_dir);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

/// Check if a process with the given PID exists.
fn process_exists(pid: u32) -> bool {
    send_signal(pid, "-0")
}

/// Send a signal to a process. Returns true if the signal was delivered.
fn send_signal(pid: u32, signal: &str) -> bool {
    std::process::Command::new("kill")
        .args([signal, &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Check if the daemon process is running.
///
/// # Errors
///
/// Returns an error if the PID file cannot be read.
pub fn is_running(state_dir: &Path) -> Result<bool, CoreError> {
    let Some(pid) = read_pid(state_dir)? else {
        return Ok(false);
    };
    Ok(process_exists(pid))
}

/// Stop the running daemon by sending SIGTERM.
///
/// # Errors
///
/// Returns an error if no daemon is running.
pub fn stop_daemon(state_dir: &Path) -> Result<(), CoreError> {
    let Some(pid) = read_pid(state_dir)? else {
        return Err(CoreError::Other("daemon is not running".to_string()));
    };

    if !send_signal(pid, "-TERM") {
        remove_pid(state_dir)?;
        return Err(CoreError::Other(
            "daemon process not found (stale PID file cleaned up)".to_string(),
        ));
    }

    for _ in 0..20 {
        std::thread::sleep(Duration::from_millis(100));
        if !process_exists(pid) {
            return remove_pid(state_dir);
        }
    }

    // A cycle may be mid-request; do not wait for it
    send_signal(pid, "-KILL");
    std::thread::sleep(Duration::from_millis(200));
    remove_pid(state_dir)
}

// ─── Daemon loop ─────────────────────────────────────────────────────

/// Run the daemon loop in the foreground until Ctrl-C.
///
/// A failed cycle is logged and retried once the schedule is due again.
///
/// # Errors
///
/// Returns an error if the PID file cannot be written or removed.
pub async fn run_daemon(config: &AppConfig, paths: &AppPaths) -> Result<(), CoreError> {
    write_pid(&paths.state_dir)?;

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    let schedule = RefreshSchedule::from_config(&config.schedule);
    log::info!(
        "daemon started (pid={}, polling every {}s, refreshing every {}h)",
        std::process::id(),
        schedule.poll_interval.as_secs(),
        schedule.min_gap.as_secs() / 3600
    );

    let mut poll = tokio::time::interval(schedule.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_run: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = poll.tick() => {
                if schedule.is_due(last_run) {
                    last_run = Some(Instant::now());
                    refresh(config, paths).await;
                }
            }
            _ = shutdown_rx.changed() => {
                log::info!("shutdown signal received");
                break;
            }
        }
    }

    remove_pid(&paths.state_dir)?;
    log::info!("daemon stopped");
    Ok(())
}

async fn refresh(config: &AppConfig, paths: &AppPaths) {
    log::info!("refreshing digest...");
    match run_cycle(config, paths).await {
        Ok(digest) => log::info!(
            "digest updated: {} new item(s), important: {}",
            digest.items.len(),
            digest.any_important()
        ),
        Err(e) => log::error!("refresh failed: {e}"),
    }
}

// ─── Login service ───────────────────────────────────────────────────

/// launchd job label.
pub const LAUNCHD_LABEL: &str = "dev.aila.daemon";

/// systemd user unit name.
pub const SYSTEMD_UNIT: &str = "aila.service";

/// The init system that starts the daemon at login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceManager {
    /// macOS launch agent.
    Launchd,
    /// systemd user unit.
    Systemd,
}

impl ServiceManager {
    /// launchd on macOS, systemd elsewhere.
    #[must_use]
    pub const fn for_platform() -> Self {
        if cfg!(target_os = "macos") {
            Self::Launchd
        } else {
            Self::Systemd
        }
    }

    /// Where the unit file is installed below `home`.
    #[must_use]
    pub fn unit_path(self, home: &Path) -> PathBuf {
        match self {
            Self::Launchd => home
                .join("Library/LaunchAgents")
                .join(format!("{LAUNCHD_LABEL}.plist")),
            Self::Systemd => home.join(".config/systemd/user").join(SYSTEMD_UNIT),
        }
    }

    /// Unit file contents that run `binary service run` with output in `log_file`.
    #[must_use]
    pub fn unit_file(self, binary: &str, log_file: &Path) -> String {
        let log_file = log_file.display();
        match self {
            Self::Launchd => format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{LAUNCHD_LABEL}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{binary}</string>
        <string>-v</string>
        <string>service</string>
        <string>run</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
    <key>StandardOutPath</key>
    <string>{log_file}</string>
    <key>StandardErrorPath</key>
    <string>{log_file}</string>
    <key>ProcessType</key>
    <string>Background</string>
</dict>
</plist>
"#
            ),
            Self::Systemd => format!(
                r"[Unit]
Description=aila - daily digest of Aula school messages
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
ExecStart={binary} -v service run
Restart=on-failure
RestartSec=60
StandardOutput=append:{log_file}
StandardError=append:{log_file}

[Install]
WantedBy=default.target
"
            ),
        }
    }

    fn enable_steps(self, unit: &Path) -> Vec<ControlStep> {
        match self {
            Self::Launchd => vec![ControlStep::required(
                "launchctl",
                &["load", "-w", &*unit.to_string_lossy()],
            )],
            Self::Systemd => vec![
                ControlStep::optional("systemctl", &["--user", "daemon-reload"]),
                ControlStep::required("systemctl", &["--user", "enable", "--now", SYSTEMD_UNIT]),
            ],
        }
    }

    fn disable_steps(self, unit: &Path) -> Vec<ControlStep> {
        match self {
            Self::Launchd => vec![ControlStep::optional(
                "launchctl",
                &["unload", "-w", &*unit.to_string_lossy()],
            )],
            Self::Systemd => vec![ControlStep::optional(
                "systemctl",
                &["--user", "disable", "--now", SYSTEMD_UNIT],
            )],
        }
    }
}

/// One call to the service manager's control tool.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ControlStep {
    program: &'static str,
    args: Vec<String>,
    required: bool,
}

impl ControlStep {
    fn required(program: &'static str, args: &[&str]) -> Self {
        Self {
            program,
            args: args.iter().map(|a| (*a).to_string()).collect(),
            required: true,
        }
    }

    fn optional(program: &'static str, args: &[&str]) -> Self {
        Self {
            required: false,
            ..Self::required(program, args)
        }
    }

    fn run(&self) -> Result<(), CoreError> {
        let outcome = std::process::Command::new(self.program).args(&self.args).status();
        match outcome {
            Ok(status) if status.success() => Ok(()),
            _ if !self.required => {
                log::debug!("{} {} did not succeed", self.program, self.args.join(" "));
                Ok(())
            }
            Ok(status) => Err(CoreError::Other(format!(
                "{} {} exited with {status}",
                self.program,
                self.args.join(" ")
            ))),
            Err(e) => Err(CoreError::Other(format!("running {}: {e}", self.program))),
        }
    }
}

/// Write the unit file below `home` and enable it. Returns the unit path.
///
/// # Errors
///
/// Returns an error if the file cannot be written or the manager refuses it.
pub fn install_service(
    manager: ServiceManager,
    home: &Path,
    binary: &str,
    log_file: &Path,
) -> Result<PathBuf, CoreError> {
    let unit = manager.unit_path(home);
    if let Some(dir) = unit.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&unit, manager.unit_file(binary, log_file))?;
    for step in manager.enable_steps(&unit) {
        step.run()?;
    }
    log::info!("installed {:?} service at {}", manager, unit.display());
    Ok(unit)
}

/// Disable the service and remove its unit file. Returns whether a file was removed.
///
/// # Errors
///
/// Returns an error if the unit file exists but cannot be removed.
pub fn uninstall_service(manager: ServiceManager, home: &Path) -> Result<bool, CoreError> {
    let unit = manager.unit_path(home);
    for step in manager.disable_steps(&unit) {
        step.run()?;
    }
    if !unit.exists() {
        return Ok(false);
    }
    std::fs::remove_file(&unit)?;
    if manager == ServiceManager::Systemd {
        ControlStep::optional("systemctl", &["--user", "daemon-reload"]).run()?;
    }
    Ok(true)
}
