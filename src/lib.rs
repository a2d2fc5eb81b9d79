// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod logging;
pub mod ratelimit;
pub mod registry;
pub mod session;
pub mod types;

use std::collections::{BTreeSet, HashMap};

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, CliCommand};
use crate::config::{format_duration, load_and_validate, service_root_dir};
use crate::engine::{Orchestrator, ReadinessReport, ReadinessStatus};
use crate::events::SessionEvent;
use crate::registry::CategoryInfo;
use crate::session::SessionId;
use crate::types::SessionStatus;

pub use crate::engine::SessionStats;
pub use crate::errors::OrchestratorError;

/// High-level entry point used by `main.rs`.
///
/// Returns `Ok(true)` when every session it started completed successfully.
pub async fn run(args: CliArgs) -> Result<bool> {
    let config_path = args.config;
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    let service_root = service_root_dir(&config_path);

    let orchestrator = Orchestrator::new(&cfg, service_root.clone());

    if args.dry_run {
        print_dry_run(&orchestrator, &service_root);
        return Ok(true);
    }

    match args.command.unwrap_or(CliCommand::Categories) {
        CliCommand::Categories => {
            print_categories(&orchestrator.list_categories());
            Ok(true)
        }
        CliCommand::Status { json } => {
            let report = orchestrator.readiness();
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_readiness(&report);
            }
            Ok(report.status == ReadinessStatus::Ready)
        }
        CliCommand::Run {
            category,
            index,
            json,
        } => {
            let _collector = orchestrator.spawn_collector();
            let mut events = orchestrator.subscribe();
            let id = orchestrator.start_execution(&category, index)?;
            let all_ok = follow(&orchestrator, &mut events, vec![(id, category)], json).await?;
            orchestrator.shutdown();
            Ok(all_ok)
        }
        CliCommand::RunAll { index, json } => {
            let _collector = orchestrator.spawn_collector();
            let mut events = orchestrator.subscribe();

            let mut started = Vec::new();
            let mut any_rejected = false;
            for (category, result) in orchestrator.start_all(index) {
                match result {
                    Ok(id) => started.push((id, category)),
                    Err(e) => {
                        any_rejected = true;
                        warn!(category = %category, error = %e, "could not start session");
                        let hint = if e.is_retryable() { " (try again later)" } else { "" };
                        eprintln!("[{category}] not started: {e}{hint}");
                    }
                }
            }

            let all_ok = follow(&orchestrator, &mut events, started, json).await?;

            let stats = orchestrator.stats();
            if json {
                println!("{}", serde_json::to_string(&stats)?);
            } else {
                println!(
                    "{} sessions: {} completed, {} failed, {} killed",
                    stats.total, stats.completed, stats.failed, stats.killed
                );
            }
            orchestrator.shutdown();
            Ok(all_ok && !any_rejected)
        }
    }
}

/// Print events of the given sessions until all of them are terminal, then
/// their final snapshots. Ctrl-C kills everything still running.
async fn follow(
    orchestrator: &Orchestrator,
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    sessions: Vec<(SessionId, String)>,
    json: bool,
) -> Result<bool> {
    let labels: HashMap<SessionId, String> = sessions.iter().cloned().collect();
    // Subscribed before starting, so even a spawn failure's events are
    // still queued for us.
    let mut pending: BTreeSet<SessionId> = sessions.iter().map(|(id, _)| *id).collect();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    while !pending.is_empty() {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    let id = event.session_id();
                    let Some(label) = labels.get(&id) else { continue };
                    print_event(label, &event, json)?;
                    if event.is_terminal() {
                        pending.remove(&id);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged; some lines were not printed");
                    pending.retain(|id| is_running(orchestrator, *id));
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                let killed = orchestrator.kill_all_running();
                info!(killed, "interrupted; killing running sessions");
            }
        }
    }

    let mut all_ok = true;
    for (id, label) in &sessions {
        let snapshot = orchestrator.get_status(*id)?;
        all_ok &= snapshot.status == SessionStatus::Completed;
        if json {
            println!("{}", serde_json::to_string(&snapshot)?);
        } else {
            let exit = snapshot
                .exit_code
                .map(|c| format!(" (exit {c})"))
                .unwrap_or_default();
            println!(
                "[{label}] {}{exit} after {}ms",
                snapshot.status, snapshot.duration_ms
            );
        }
    }
    debug!(all_ok, "all followed sessions finished");
    Ok(all_ok)
}

fn is_running(orchestrator: &Orchestrator, id: SessionId) -> bool {
    orchestrator
        .get_status(id)
        .is_ok_and(|s| s.status == SessionStatus::Running)
}

fn print_event(label: &str, event: &SessionEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        SessionEvent::SessionCreated { command, .. } => println!("[{label}] $ {command}"),
        SessionEvent::Output { line, .. } => println!("[{label}] {}", line.text),
        SessionEvent::Error { line, .. } => eprintln!("[{label}] {}", line.text),
        SessionEvent::SessionError { message, .. } => eprintln!("[{label}] error: {message}"),
        SessionEvent::SessionCompleted { .. } | SessionEvent::SessionKilled { .. } => {}
    }
    Ok(())
}

fn print_categories(categories: &[CategoryInfo]) {
    for category in categories {
        if category.description.is_empty() {
            println!("{}", category.name);
        } else {
            println!("{}: {}", category.name, category.description);
        }
        for (index, command) in category.commands.iter().enumerate() {
            println!(
                "  [{index}] {} (timeout {})",
                command.command,
                format_duration(command.timeout)
            );
            if !command.description.is_empty() {
                println!("      {}", command.description);
            }
        }
    }
}

fn print_readiness(report: &ReadinessReport) {
    for command in &report.commands {
        let state = match &command.resolved {
            Some(path) => format!("ready ({})", path.display()),
            None => format!("missing: {}", command.program),
        };
        println!("[{}:{}] {} ... {state}", command.category, command.index, command.command);
    }
    let status = match report.status {
        ReadinessStatus::Ready => "ready",
        ReadinessStatus::Incomplete => "incomplete",
    };
    println!(
        "{status}: {} of {} commands ready, {} missing",
        report.summary.ready, report.summary.total, report.summary.missing
    );
}

fn print_dry_run(orchestrator: &Orchestrator, service_root: &std::path::Path) {
    let settings = orchestrator.settings();
    println!("testvisor dry-run");
    println!("  service root = {}", service_root.display());
    println!("  orchestrator.max_sessions = {}", settings.max_sessions);
    println!(
        "  orchestrator.default_timeout = {}",
        format_duration(settings.default_timeout)
    );
    println!(
        "  orchestrator.grace_period = {}",
        format_duration(settings.grace_period)
    );
    println!("  orchestrator.retention = {}", format_duration(settings.retention));
    println!();

    let categories = orchestrator.list_categories();
    println!("categories ({}):", categories.len());
    print_categories(&categories);

    debug!("dry-run complete (no execution)");
}
