//! CLI interface for aila - a daily digest of Aula school messages.

use std::env;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use aila_core::paths::write_default_config;
use aila_core::report;
use aila_core::{AppConfig, AppPaths, Digest, SeenStore, daemon};
use anyhow::{Context as _, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use env_logger::fmt::WriteStyle;
use log::{LevelFilter, debug};

const APP_NAME: &str = "aila";
const REPO_URL: &str = "https://github.com/aila-dev/aila";

fn main() -> anyhow::Result<()> {
    try_main()
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone(), cli.command.creates_config())?;
    ctx.init_logging()?;
    debug!("resolved paths: {:#?}", ctx.paths);

    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Command::Run(cmd) => rt.block_on(handle_run(&ctx, cmd)),
        Command::Show(cmd) => handle_show(&ctx, cmd),
        Command::Login => rt.block_on(handle_login(&ctx)),
        Command::Fetch(cmd) => rt.block_on(handle_fetch(&ctx, cmd)),
        Command::Seen { command } => handle_seen(&ctx, command),
        Command::Service { command } => rt.block_on(handle_service(&ctx, command)),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => {
            handle_completions(shell);
            Ok(())
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "aila",
    author,
    version,
    about = "Daily digest of Aula school messages",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

/// Common CLI options shared across all subcommands.
#[derive(Debug, Clone, Args)]
pub struct CommonOpts {
    /// Override the config file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,
    /// Reduce output to only errors.
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    pub quiet: bool,
    /// Increase logging verbosity (stackable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Enable debug logging.
    #[arg(long, global = true)]
    pub debug: bool,
    /// Enable trace logging.
    #[arg(long, global = true)]
    pub trace: bool,
    /// Output machine-readable JSON.
    #[arg(long, global = true)]
    pub json: bool,
    /// Disable ANSI colors in output.
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    pub no_color: bool,
    /// Control color output.
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    pub color: ColorOption,
    /// Do not change anything on disk.
    #[arg(long = "dry-run", global = true)]
    pub dry_run: bool,
    /// Assume "yes" for interactive prompts.
    #[arg(short = 'y', long = "yes", alias = "force", global = true)]
    pub assume_yes: bool,
}

/// Color output mode.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorOption {
    /// Detect terminal capabilities automatically.
    Auto,
    /// Always emit ANSI color codes.
    Always,
    /// Never emit ANSI color codes.
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in, fetch new posts and messages, and print the digest.
    Run(ReportCommand),
    /// Print the digest from the last run without contacting the portal.
    Show(ReportCommand),
    /// Check that the configured credentials can log in.
    Login,
    /// Log in and fetch posts and message threads without summarizing.
    Fetch(FetchCommand),
    /// Inspect or reset the store of already digested items.
    Seen {
        #[command(subcommand)]
        command: SeenCommand,
    },
    /// Background daemon that refreshes the digest on a schedule.
    Service {
        #[command(subcommand)]
        command: ServiceCommand,
    },
    /// Create config directories and default files.
    Init(InitCommand),
    /// Inspect and manage configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Command {
    /// Whether a missing config file is written with defaults before the
    /// command runs. `init` writes the file itself.
    const fn creates_config(&self) -> bool {
        !matches!(self, Self::Init(_))
    }
}

#[derive(Debug, Clone, Copy, Args)]
struct ReportCommand {
    /// Append the full original texts.
    #[arg(short, long)]
    originals: bool,
}

#[derive(Debug, Clone, Copy, Args)]
struct FetchCommand {
    /// Print the untouched API documents.
    #[arg(long)]
    raw: bool,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum SeenCommand {
    /// List stored post and message ids.
    List,
    /// Forget every stored id so the next run digests everything again.
    Clear,
}

#[derive(Debug, Clone, Copy, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists.
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration (password hidden).
    Show,
    /// Print the resolved config file path.
    Path,
    /// Print all resolved paths.
    Paths,
    /// Print the JSON schema, or write it with an example config.
    Schema {
        /// Write `config.schema.json` and an example `config.toml` into this directory.
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// Regenerate the default configuration file.
    Reset,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ServiceCommand {
    /// Start the background daemon.
    Start,
    /// Stop the background daemon.
    Stop,
    /// Restart the background daemon.
    Restart,
    /// Show daemon status.
    Status,
    /// Install as login service (launchd on macOS, systemd on Linux).
    Enable,
    /// Uninstall the login service.
    Disable,
    /// Run the daemon in the foreground (for debugging).
    Run,
}

// ─── Runtime ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts, create_config: bool) -> Result<Self> {
        let paths = AppPaths::discover(common.config.as_deref())?;
        let config = if create_config {
            AppConfig::load(&paths, common.dry_run)?
        } else {
            AppConfig::load_from_path(&paths.config_file)?
        };
        let paths = paths.apply_overrides(&config)?;
        let ctx = Self {
            common,
            paths,
            config,
        };
        ctx.ensure_directories()?;
        Ok(ctx)
    }

    fn init_logging(&self) -> Result<()> {
        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
        builder.filter_level(self.effective_log_level());

        let write_style = if self.color_disabled(io::stderr().is_terminal()) {
            WriteStyle::Never
        } else if self.color_forced() {
            WriteStyle::Always
        } else {
            WriteStyle::Auto
        };
        builder.write_style(write_style);

        if let Some(ref file) = self.config.logging.file {
            let target = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .with_context(|| format!("opening log file {file}"))?;
            builder
                .target(env_logger::Target::Pipe(Box::new(target)))
                .write_style(WriteStyle::Never);
        }

        builder.try_init().or_else(|err| {
            if self.common.verbose > 0 {
                eprintln!("logger already initialized: {err}");
            }
            Ok(())
        })
    }

    fn color_forced(&self) -> bool {
        matches!(self.common.color, ColorOption::Always) || env::var_os("FORCE_COLOR").is_some()
    }

    fn color_disabled(&self, is_terminal: bool) -> bool {
        self.common.no_color
            || matches!(self.common.color, ColorOption::Never)
            || env::var_os("NO_COLOR").is_some()
            || (!self.color_forced() && !is_terminal)
    }

    /// The configured level unless flags ask for something else.
    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self.config.logging.level.level_filter(),
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn ensure_directories(&self) -> Result<()> {
        if self.common.dry_run {
            self.paths.log_dry_run();
            return Ok(());
        }
        self.paths.ensure_directories()
    }

    fn print_digest(&self, digest: &Digest, originals: bool) -> Result<()> {
        if self.common.json {
            println!(
                "{}",
                serde_json::to_string_pretty(digest).context("serializing digest to JSON")?
            );
            return Ok(());
        }

        let text = report::render(digest, originals);
        if self.color_disabled(io::stdout().is_terminal()) {
            print!("{text}");
        } else {
            // Important items are marked with a leading `*`
            for line in text.lines() {
                if line.starts_with("* ") {
                    println!("{}", bold(line));
                } else {
                    println!("{line}");
                }
            }
        }
        Ok(())
    }
}

// ─── Handlers ────────────────────────────────────────────────────────

async fn handle_run(ctx: &RuntimeContext, cmd: ReportCommand) -> Result<()> {
    if ctx.common.dry_run {
        log::info!("dry-run: would log in, digest new items and update {}", ctx.paths.seen_file.display());
        return Ok(());
    }
    eprintln!("Getting data from Aula and running the model... (this might take a while)");
    let digest = aila_core::run_cycle(&ctx.config, &ctx.paths)
        .await
        .context("refresh cycle failed")?;
    ctx.print_digest(&digest, cmd.originals)
}

fn handle_show(ctx: &RuntimeContext, cmd: ReportCommand) -> Result<()> {
    let digest = aila_core::load_last_digest(&ctx.paths)?.ok_or_else(|| {
        anyhow!("no digest yet at {}. Run 'aila run' first.", ctx.paths.digest_file().display())
    })?;
    ctx.print_digest(&digest, cmd.originals)
}

async fn handle_login(ctx: &RuntimeContext) -> Result<()> {
    let session = aila_core::cycle::login(&ctx.config).await?;
    let outcome = session.outcome();
    if ctx.common.json {
        let json = serde_json::json!({
            "authenticated": true,
            "submissions": outcome.submissions,
            "status": outcome.status.as_u16(),
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!(
            "Logged in after {} form submission(s) (HTTP {}).",
            outcome.submissions, outcome.status
        );
    }
    Ok(())
}

async fn handle_fetch(ctx: &RuntimeContext, cmd: FetchCommand) -> Result<()> {
    let payloads = aila_core::fetch_payloads(&ctx.config).await?;

    if cmd.raw || ctx.common.json {
        let (posts, threads) = payloads.into_raw();
        let json = serde_json::json!({ "posts": posts, "threads": threads });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    println!("{} post(s):", payloads.posts().len());
    for post in payloads.posts() {
        println!(
            "  {}  {}",
            dim(post["timestamp"].as_str().unwrap_or("?")),
            post["title"].as_str().unwrap_or("(untitled)")
        );
    }
    println!("{} thread(s):", payloads.threads().len());
    for thread in payloads.threads() {
        println!(
            "  {}  {}",
            dim(thread["latestMessage"]["sendDateTime"].as_str().unwrap_or("?")),
            thread["subject"].as_str().unwrap_or("(no subject)")
        );
    }
    Ok(())
}

fn handle_seen(ctx: &RuntimeContext, command: SeenCommand) -> Result<()> {
    let mut store = SeenStore::load(&ctx.paths.seen_file);
    match command {
        SeenCommand::List => {
            if ctx.common.json {
                let json = serde_json::json!({
                    "post_ids": store.post_ids().collect::<Vec<_>>(),
                    "message_ids": store.message_ids().collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                println!("store: {}", store.path().display());
                println!("posts:    {}", store.post_ids().collect::<Vec<_>>().join(", "));
                println!("messages: {}", store.message_ids().collect::<Vec<_>>().join(", "));
            }
            Ok(())
        }
        SeenCommand::Clear => {
            if ctx.common.dry_run {
                log::info!("dry-run: would forget {} seen id(s)", store.len());
                return Ok(());
            }
            let count = store.len();
            store.clear();
            store.save()?;
            println!("Forgot {count} seen id(s).");
            Ok(())
        }
    }
}

async fn handle_service(ctx: &RuntimeContext, cmd: ServiceCommand) -> Result<()> {
    let state_dir = &ctx.paths.state_dir;
    match cmd {
        ServiceCommand::Start => service_start(ctx),
        ServiceCommand::Stop => {
            daemon::stop_daemon(state_dir)?;
            println!("Daemon stopped.");
            Ok(())
        }
        ServiceCommand::Restart => {
            if daemon::is_running(state_dir)? {
                daemon::stop_daemon(state_dir)?;
                println!("Daemon stopped.");
            }
            service_start(ctx)
        }
        ServiceCommand::Status => service_status(ctx),
        ServiceCommand::Enable => service_enable(ctx),
        ServiceCommand::Disable => service_disable(ctx),
        ServiceCommand::Run => Ok(daemon::run_daemon(&ctx.config, &ctx.paths).await?),
    }
}

fn service_start(ctx: &RuntimeContext) -> Result<()> {
    let state_dir = &ctx.paths.state_dir;
    if daemon::is_running(state_dir)? {
        println!(
            "Daemon is already running (pid={}).",
            daemon::read_pid(state_dir)?.unwrap_or(0)
        );
        return Ok(());
    }

    let exe =
        std::env::current_exe().map_err(|e| anyhow!("cannot determine executable path: {e}"))?;
    let log_path = daemon::log_file_path(state_dir);
    std::fs::create_dir_all(state_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let child = std::process::Command::new(exe)
        .arg("--config")
        .arg(&ctx.paths.config_file)
        .args(["-v", "service", "run"])
        .stdin(std::process::Stdio::null())
        .stdout(log_file.try_clone()?)
        .stderr(log_file)
        .spawn()?;

    println!("Daemon started (pid={}).", child.id());
    println!("Log: {}", log_path.display());
    Ok(())
}

fn service_status(ctx: &RuntimeContext) -> Result<()> {
    let state_dir = &ctx.paths.state_dir;
    if daemon::is_running(state_dir)? {
        let pid = daemon::read_pid(state_dir)?.unwrap_or(0);
        println!("running  (pid={pid})");
        println!("log:     {}", daemon::log_file_path(state_dir).display());
    } else {
        println!("stopped");
    }

    match aila_core::load_last_digest(&ctx.paths) {
        Ok(Some(digest)) => {
            let updated = digest.updated_at.with_timezone(&chrono::Local);
            println!(
                "digest:  {} ({} item(s))",
                updated.format("%Y-%m-%d %H:%M"),
                digest.items.len()
            );
        }
        Ok(None) => println!("digest:  none"),
        Err(e) => println!("digest:  unreadable ({e})"),
    }
    Ok(())
}

fn service_enable(ctx: &RuntimeContext) -> Result<()> {
    let exe =
        std::env::current_exe().map_err(|e| anyhow!("cannot determine executable path: {e}"))?;
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    let manager = daemon::ServiceManager::for_platform();

    if ctx.common.dry_run {
        log::info!(
            "dry-run: would install {}",
            manager.unit_path(&home).display()
        );
        return Ok(());
    }
    let unit = daemon::install_service(
        manager,
        &home,
        &exe.to_string_lossy(),
        &daemon::log_file_path(&ctx.paths.state_dir),
    )?;
    println!("Service enabled ({manager:?}).");
    println!("Unit: {}", unit.display());
    Ok(())
}

fn service_disable(ctx: &RuntimeContext) -> Result<()> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    let manager = daemon::ServiceManager::for_platform();

    if ctx.common.dry_run {
        log::info!(
            "dry-run: would remove {}",
            manager.unit_path(&home).display()
        );
        return Ok(());
    }
    if daemon::uninstall_service(manager, &home)? {
        println!("Service disabled ({manager:?}).");
    } else {
        println!("Service not installed.");
    }
    Ok(())
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !(cmd.force || ctx.common.assume_yes) {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }
    if ctx.common.dry_run {
        log::info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }
    write_default_config(&ctx.paths.config_file)?;
    println!("Wrote {}", ctx.paths.config_file.display());
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let config = ctx.config.redacted();
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&config).context("serializing config to JSON")?
                );
            } else {
                println!("{config:#?}");
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Paths => {
            if ctx.common.json {
                let paths = serde_json::json!({
                    "config": ctx.paths.config_file,
                    "data": ctx.paths.data_dir,
                    "state": ctx.paths.state_dir,
                    "seen": ctx.paths.seen_file,
                    "digest": ctx.paths.digest_file(),
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&paths).context("serializing paths to JSON")?
                );
            } else {
                println!("{}", ctx.paths);
            }
            Ok(())
        }
        ConfigCommand::Schema { out: None } => {
            println!("{}", aila_core::generate_schema(APP_NAME, REPO_URL)?);
            Ok(())
        }
        ConfigCommand::Schema { out: Some(dir) } => {
            if ctx.common.dry_run {
                log::info!("dry-run: would write schema files to {}", dir.display());
                return Ok(());
            }
            for path in aila_core::write_generated_files(&dir, APP_NAME, REPO_URL)? {
                println!("Wrote {}", path.display());
            }
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                log::info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_completions(shell: Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
}

// ─── Formatting helpers ──────────────────────────────────────────────

fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
