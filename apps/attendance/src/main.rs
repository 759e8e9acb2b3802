mod commands;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    load_settings, spawn, AttendanceCommand, AttendanceCoordinator, AttendanceEvent,
    AttendanceState, CommandReply, CoordinatorHandle, LocationDirectory, MissingTokenProvider,
    QueuePolicy, SessionOp, SessionOps, SessionService, Settings, StaticTokenProvider,
    TokenProvider, WorkersRoster,
};
use futures::StreamExt;
use shared::domain::UserId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::{parse_line, Command, HELP};

#[derive(Parser, Debug)]
struct Args {
    /// Settings file; `attendance.toml` in the working directory when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    user_id: Option<i64>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    queue_policy: Option<QueuePolicy>,
}

impl Args {
    fn apply(self, settings: &mut Settings) {
        if let Some(base_url) = self.base_url {
            settings.base_url = base_url;
        }
        if let Some(user_id) = self.user_id {
            settings.user_id = Some(UserId(user_id));
        }
        if let Some(token) = self.token {
            settings.token = Some(token);
        }
        if let Some(policy) = self.queue_policy {
            settings.queue_policy = policy;
        }
    }
}

struct App {
    service: Arc<SessionService>,
    handle: CoordinatorHandle,
    user_id: Option<UserId>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut settings =
        load_settings(args.config.as_deref()).context("failed to load attendance settings")?;
    args.apply(&mut settings);
    settings.validate().context("invalid attendance settings")?;
    info!(base_url = %settings.base_url, policy = ?settings.queue_policy, "attendance starting");

    let tokens: Arc<dyn TokenProvider> = match settings.token.clone() {
        Some(token) => Arc::new(StaticTokenProvider::new(token)),
        None => Arc::new(MissingTokenProvider),
    };
    let service = Arc::new(
        SessionService::with_timeout(&settings.base_url, tokens, settings.request_timeout())
            .context("failed to build http client")?,
    );
    let coordinator =
        AttendanceCoordinator::from_backend(service.clone(), Arc::new(LocationDirectory::new()));
    let (handle, worker) = spawn(coordinator, settings.queue_policy);

    let printer = tokio::spawn(print_events(BroadcastStream::new(handle.subscribe_events())));

    let app = App {
        service,
        handle,
        user_id: settings.user_id,
    };
    app.refresh().await;
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => app.run(command).await,
            Err(err) => println!("{err:#}"),
        }
    }

    drop(app);
    let _ = worker.await;
    printer.abort();
    Ok(())
}

impl App {
    async fn run(&self, command: Command) {
        tracing::debug!(command = command.name(), "attendance: stdin command");
        match command {
            Command::Select(selection) => match self.handle.selection_changed(selection) {
                Ok(true) => {}
                Ok(false) => println!("picker unchanged"),
                Err(err) => println!("select not queued: {err}"),
            },
            Command::Scan(payload) => {
                self.submit(AttendanceCommand::DetectPayload(payload));
            }
            Command::Checkout => self.submit(AttendanceCommand::Checkout),
            Command::Status => print_state(&self.handle.state()),
            Command::Locations => {
                for option in self.handle.directory().options() {
                    println!("  {option}");
                }
            }
            Command::Workers { search, sort } => match self.service.fetch_workers().await {
                Ok(workers) => {
                    let roster = WorkersRoster::new(workers);
                    for worker in roster.filtered(&search, sort) {
                        println!(
                            "  {:<24} {}",
                            worker.name,
                            worker.location_name.as_deref().unwrap_or("-")
                        );
                    }
                }
                Err(err) => println!("workers unavailable: {err}"),
            },
            Command::Stats => self.print_statistics().await,
            Command::Edit {
                session_id,
                location_id,
                check_in,
                check_out,
            } => {
                self.execute(SessionOp::EditSession {
                    session_id,
                    location_id,
                    check_in,
                    check_out,
                })
                .await
            }
            Command::Delete(session_id) => {
                self.execute(SessionOp::DeleteSession(session_id)).await
            }
            Command::Refresh => self.refresh().await,
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
    }

    fn submit(&self, command: AttendanceCommand) {
        let name = command.command_name();
        if let Err(err) = self.handle.submit(command) {
            println!("{name} not queued: {err}");
        }
    }

    async fn refresh(&self) {
        match self.handle.request(AttendanceCommand::RefreshDirectory).await {
            Ok(CommandReply::DirectoryLoaded(count)) => info!(count, "attendance: locations loaded"),
            Ok(CommandReply::Failed(err)) => warn!(error = %err.message, "attendance: location load failed"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "attendance: refresh not queued"),
        }
        let Some(user_id) = self.user_id else {
            warn!("attendance: no user id configured; skipping backend sync");
            return;
        };
        match self.handle.request(AttendanceCommand::Sync(user_id)).await {
            Ok(CommandReply::Transition(_)) => print_state(&self.handle.state()),
            Ok(CommandReply::Failed(err)) => println!("sync failed: {}", err.message),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "attendance: sync not queued"),
        }
    }

    async fn execute(&self, op: SessionOp) {
        match self.service.execute(&op).await {
            Ok(()) => println!("{op:?}: done"),
            Err(err) => println!("{op:?}: {err}"),
        }
    }

    async fn print_statistics(&self) {
        let Some(user_id) = self.user_id else {
            println!("stats need a user id (--user-id or ATTENDANCE_USER_ID)");
            return;
        };
        match self.service.fetch_statistics(user_id).await {
            Ok(entries) => {
                for entry in entries {
                    let until = entry
                        .checkout_timestamp
                        .map_or_else(|| "open".to_string(), |at| at.to_rfc3339());
                    let minutes = entry.duration().map_or(0, |d| d.num_minutes());
                    println!(
                        "  {:<20} {} .. {} ({minutes} min)",
                        entry.location_name,
                        entry.checkin_timestamp.to_rfc3339(),
                        until
                    );
                }
            }
            Err(err) => println!("statistics unavailable: {err}"),
        }
    }
}

fn print_state(state: &AttendanceState) {
    match state {
        AttendanceState::Absent => println!("state: absent"),
        AttendanceState::CheckedIn { location, since } => {
            println!("state: at {} (#{}) since {}", location.name, location.id, since)
        }
    }
}

async fn print_events(mut events: BroadcastStream<AttendanceEvent>) {
    while let Some(event) = events.next().await {
        match event {
            Ok(AttendanceEvent::StateChanged { state, origin }) => {
                print!("[{origin:?}] ");
                print_state(&state);
            }
            Ok(AttendanceEvent::OperationCompleted(outcome)) => match outcome.result {
                Ok(()) => println!("  {:?} ok", outcome.op),
                Err(kind) => println!("  {:?} failed: {kind:?}", outcome.op),
            },
            Ok(AttendanceEvent::Ignored { origin, reason }) => {
                println!("[{origin:?}] ignored: {reason:?}")
            }
            Ok(AttendanceEvent::SyncFailed(err)) => println!("sync failed: {}", err.message),
            Err(err) => warn!(error = %err, "attendance: event stream lagged"),
        }
    }
}

