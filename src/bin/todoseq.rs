use std::time::Duration;

use clap::{Parser, Subcommand};
use todoseq::config::{self, keys};
use todoseq::session::interval_for;
use todoseq::storage::repository;
use todoseq::{MutationStats, SyncOptions, SyncReport, TodoSeq, Trigger};
use tokio::time::{Instant, Interval, MissedTickBehavior};

#[derive(Parser)]
#[command(name = "todoseq", about = "Sync Todoist tasks into a Logseq graph")]
struct Cli {
    /// Database path (default: ~/.todoseq/todoseq.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl todoseq::SyncProgress for StderrProgress {
    fn on_fetched(&self, active: usize, completed: usize) {
        eprintln!("Fetched {active} active and {completed} completed tasks");
    }

    fn on_comments_progress(&self, current: usize, total: usize) {
        if current == total {
            eprint!("\r  Fetching comments: {}/{}   \n", current, total);
        } else {
            eprint!("\r  Fetching comments: {}/{}   ", current, total);
        }
    }

    fn on_page_reconciled(&self, page: &str, stats: &MutationStats) {
        if stats.writes() > 0 {
            eprintln!(
                "  {page}: +{} ~{} -{}",
                stats.created, stats.updated, stats.deleted
            );
        }
    }

    fn on_complete(&self, report: &SyncReport) {
        let totals = &report.reconcile.totals;
        eprintln!(
            "Done: {} tasks, {} blocks created, {} updated, {} deleted, {} retained",
            report.tasks, totals.created, totals.updated, totals.deleted, totals.retained
        );
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync now
    Sync {
        #[command(flatten)]
        window: Window,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync periodically until interrupted (SIGHUP requests an immediate run)
    Watch {
        #[command(flatten)]
        window: Window,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show recent sync runs
    Status {
        /// Number of runs to show
        #[arg(long, default_value = "10")]
        limit: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct Window {
    /// Fetch completed tasks since this date (YYYY-MM-DD)
    #[arg(long)]
    since: Option<String>,
    /// Fetch completed tasks from the last N days
    #[arg(long)]
    days: Option<u32>,
}

impl Window {
    fn options(&self) -> anyhow::Result<SyncOptions> {
        let since = self
            .since
            .as_deref()
            .map(|s| {
                todoseq::date_util::parse_local_date(s).ok_or_else(|| {
                    anyhow::anyhow!("invalid --since date '{s}', expected YYYY-MM-DD")
                })
            })
            .transpose()?;
        Ok(SyncOptions {
            since,
            days: self.days,
        })
    }
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show a setting
    Get {
        key: String,
        /// Print secrets unmasked
        #[arg(long)]
        reveal: bool,
    },
    /// Change a setting
    Set { key: String, value: String },
    /// Remove a setting, restoring its default
    Unset { key: String },
    /// List stored settings
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let db = match &cli.db {
        Some(path) => todoseq::Database::open_at(path).await?,
        None => todoseq::Database::open().await?,
    };

    let verbose_setting = db
        .reader()
        .call(|conn| repository::get_config(conn, keys::VERBOSE))
        .await?
        .is_some_and(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"));
    let level = match cli.verbose {
        0 if verbose_setting => "debug",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let app = TodoSeq::new(db);

    match cli.command {
        Commands::Sync { window, json } => {
            let options = window.options()?;
            let report = app
                .sync(Trigger::Manual, &options, &StderrProgress)
                .await?;
            if let (Some(report), true) = (report, json) {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Commands::Watch { window } => {
            let options = window.options()?;
            watch(&app, &options).await?;
        }
        Commands::Config { action } => {
            handle_config(app.db(), action).await?;
        }
        Commands::Status { limit, json } => {
            print_status(&app, limit, json).await?;
        }
    }

    Ok(())
}

/// Requests for an immediate run while watching.
struct ManualRequests {
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl ManualRequests {
    fn new() -> anyhow::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            hangup: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?,
        })
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        {
            if self.hangup.recv().await.is_some() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

fn ticker(period: Duration, first: Instant) -> Interval {
    let mut ticker = tokio::time::interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn watch(app: &TodoSeq, options: &SyncOptions) -> anyhow::Result<()> {
    let config = app.config().await?;
    config.require_todoist_token()?;
    app.session().observe_config(&config);

    let mut manual = ManualRequests::new()?;
    let mut timer = ticker(interval_for(&config), Instant::now());
    eprintln!(
        "Watching: syncing every {} minutes. Press Ctrl-C to stop.",
        interval_for(&config).as_secs() / 60
    );

    loop {
        let trigger = tokio::select! {
            _ = timer.tick() => Trigger::Automatic,
            _ = manual.recv() => Trigger::Manual,
            _ = tokio::signal::ctrl_c() => break,
        };

        let run = app.sync(trigger, options, &StderrProgress);
        tokio::pin!(run);
        let outcome = loop {
            tokio::select! {
                result = &mut run => break Some(result),
                _ = manual.recv() => {
                    if let Err(e) = app.session().begin(Trigger::Manual) {
                        eprintln!("{e}");
                    }
                }
                _ = timer.tick() => {
                    // Ticks during a run are dropped; begin() logs the skip.
                    let _ = app.session().begin(Trigger::Automatic);
                }
                _ = tokio::signal::ctrl_c() => break None,
            }
        };
        match outcome {
            None => {
                eprintln!("Interrupted during a run.");
                return Ok(());
            }
            Some(Err(e)) => eprintln!("Sync failed: {e}"),
            Some(Ok(_)) => {}
        }

        match app.config().await {
            Ok(config) => {
                if app.session().observe_config(&config) {
                    let period = interval_for(&config);
                    timer = ticker(period, Instant::now() + period);
                }
            }
            Err(e) => log::warn!("Keeping previous schedule, config unreadable: {e}"),
        }
    }

    eprintln!("Stopped.");
    Ok(())
}

async fn print_status(app: &TodoSeq, limit: u32, json: bool) -> anyhow::Result<()> {
    let runs = app.recent_runs(limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }
    if runs.is_empty() {
        println!("No sync runs recorded.");
        return Ok(());
    }
    println!(
        "{:>5}  {:<19}  {:<9}  {:<15}  {:>5}  {:>7}  {:>7}  {:>7}  {:>8}",
        "ID", "STARTED", "TRIGGER", "STATUS", "TASKS", "CREATED", "UPDATED", "DELETED", "RETAINED"
    );
    for run in &runs {
        println!(
            "{:>5}  {:<19}  {:<9}  {:<15}  {:>5}  {:>7}  {:>7}  {:>7}  {:>8}",
            run.id,
            run.started_at,
            run.trigger,
            run.status,
            run.tasks,
            run.created,
            run.updated,
            run.deleted,
            run.retained
        );
        if let Some(ref error) = run.error_message {
            println!("       {error}");
        }
    }
    Ok(())
}

async fn handle_config(db: &todoseq::Database, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key, reveal } => {
            let val: Option<String> = db
                .reader()
                .call({
                    let key = key.clone();
                    move |conn| repository::get_config(conn, &key)
                })
                .await?;
            match val {
                Some(v) if config::is_secret(&key) && !reveal => {
                    println!("{key} = {}", config::mask(&v))
                }
                Some(v) => println!("{key} = {v}"),
                None => println!("{key} is not set"),
            }
        }
        ConfigAction::Set { key, value } => {
            config::validate(&key, &value)?;
            db.writer()
                .call(move |conn| {
                    repository::set_config(conn, &key, value.trim())?;
                    Ok::<(), rusqlite::Error>(())
                })
                .await?;
            println!("Config updated.");
        }
        ConfigAction::Unset { key } => {
            let removed = db
                .writer()
                .call({
                    let key = key.clone();
                    move |conn| repository::delete_config(conn, &key)
                })
                .await?;
            if removed {
                println!("{key} removed.");
            } else {
                println!("{key} was not set.");
            }
        }
        ConfigAction::List => {
            let items: Vec<(String, String)> = db
                .reader()
                .call(|conn| repository::list_config(conn))
                .await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    if config::is_secret(&k) {
                        println!("{k} = {}", config::mask(&v));
                    } else {
                        println!("{k} = {v}");
                    }
                }
            }
        }
    }
    Ok(())
}
