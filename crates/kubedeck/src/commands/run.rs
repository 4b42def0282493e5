//! `run`: keep the selection connected until interrupted.
//!
//! Restores the saved selection, follows kubeconfig edits, and prints
//! every lifecycle event. Lines on stdin drive the live coordinator.

use std::io::BufRead;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use kubedeck_config::watch_set;
use kubedeck_core::{
    ClusterIdentity, Event, EventKind, FsScanner, KubeconfigWatcher, SelectionChange,
    SelectionCoordinator,
};

use crate::cli::{GlobalOpts, OutputFormat, RunArgs};
use crate::commands::{coordinator, load, selection, settings_store, status, util};
use crate::error::CliError;
use crate::output::{self, Tone};

const CONSOLE_BUFFER: usize = 16;

const CONSOLE_HELP: &str = "\
commands:
  status                 state of every selected cluster
  select CLUSTER...      replace the selection
  add CLUSTER...         add to the selection
  deselect CLUSTER...    remove from the selection
  retry CLUSTER          rebuild from fresh credentials and retry auth
  rescan                 re-read the watched kubeconfigs
  quit";

// ── Console commands ────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    Status,
    Select(Vec<ClusterIdentity>),
    Add(Vec<ClusterIdentity>),
    Deselect(Vec<ClusterIdentity>),
    Retry(ClusterIdentity),
    Rescan,
    Help,
    Quit,
}

fn parse_console(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let clusters = words
        .map(|w| w.parse::<ClusterIdentity>().map_err(|e| e.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    let clusters = util::resolve_all(&clusters);

    let needs_clusters = |clusters: Vec<ClusterIdentity>| {
        if clusters.is_empty() {
            Err(format!("{verb}: expected at least one PATH:CONTEXT"))
        } else {
            Ok(clusters)
        }
    };

    let command = match verb {
        "status" | "st" => ConsoleCommand::Status,
        "select" => ConsoleCommand::Select(needs_clusters(clusters)?),
        "add" => ConsoleCommand::Add(needs_clusters(clusters)?),
        "deselect" | "rm" => ConsoleCommand::Deselect(needs_clusters(clusters)?),
        "retry" => match <[ClusterIdentity; 1]>::try_from(clusters) {
            Ok([cluster]) => ConsoleCommand::Retry(cluster),
            Err(_) => return Err("retry: expected exactly one PATH:CONTEXT".into()),
        },
        "rescan" => ConsoleCommand::Rescan,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{other}' (try: help)")),
    };
    Ok(Some(command))
}

/// Forward stdin lines from a plain thread, so a pending read never
/// holds up runtime shutdown.
fn spawn_console() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(CONSOLE_BUFFER);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn next_line(console: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match console {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Run one console command. Returns `false` when the loop should end.
async fn execute(
    command: ConsoleCommand,
    coord: &SelectionCoordinator,
    watcher: &KubeconfigWatcher,
    global: &GlobalOpts,
) -> Result<bool, CliError> {
    match command {
        ConsoleCommand::Status => {
            let entries = status::collect(coord, &status::ProbeResults::new()).await;
            output::print_output(&status::render(&entries, global)?, false);
        }
        ConsoleCommand::Select(clusters) => {
            let report = coord.select(clusters).await?;
            output::print_output(&selection::render_report(&report, global)?, false);
        }
        ConsoleCommand::Add(clusters) => {
            let mut next = coord.selected().await.to_vec();
            next.extend(clusters);
            let report = coord.select(next).await?;
            output::print_output(&selection::render_report(&report, global)?, false);
        }
        ConsoleCommand::Deselect(clusters) => {
            let report = coord.deselect(&clusters, "deselected by user").await?;
            output::print_output(&selection::render_report(&report, global)?, false);
        }
        ConsoleCommand::Retry(cluster) => {
            if coord.retry_auth(&cluster).await? {
                eprintln!("{cluster}: retrying with fresh credentials");
            } else {
                eprintln!("{cluster}: credentials are not invalid, nothing to retry");
            }
        }
        ConsoleCommand::Rescan => {
            let count = watcher.refresh_available().await?;
            eprintln!("{count} contexts available");
        }
        ConsoleCommand::Help => eprintln!("{CONSOLE_HELP}"),
        ConsoleCommand::Quit => return Ok(false),
    }
    Ok(true)
}

// ── Event printing ──────────────────────────────────────────────────

fn describe(kind: &EventKind) -> (String, Tone) {
    match kind {
        EventKind::AuthFailed { reason } => (format!("authentication failed: {reason}"), Tone::Bad),
        EventKind::AuthRecovering { attempt_budget } => (
            format!("recovering credentials ({attempt_budget} attempts)"),
            Tone::Warn,
        ),
        EventKind::AuthRecovered => ("credentials accepted".into(), Tone::Good),
        EventKind::ConnectivityDegraded { failures, reason } => (
            format!("connectivity degraded after {failures} failures: {reason}"),
            Tone::Warn,
        ),
        EventKind::ConnectivityHealthy => ("connectivity restored".into(), Tone::Good),
        EventKind::Rebuilt { cause } => (format!("client rebuilt ({cause})"), Tone::Good),
        EventKind::RebuildFailed { cause, reason } => {
            (format!("rebuild failed ({cause}): {reason}"), Tone::Bad)
        }
        EventKind::SelectionApplied { change, error } => match (change, error) {
            (SelectionChange::Added, _) => ("connected".into(), Tone::Good),
            (SelectionChange::Removed, _) => ("disconnected".into(), Tone::Muted),
            (SelectionChange::Failed, Some(error)) => (format!("could not connect: {error}"), Tone::Bad),
            (SelectionChange::Failed, None) => ("could not connect".into(), Tone::Bad),
        },
        EventKind::ClusterRemoved { reason } => (format!("removed: {reason}"), Tone::Muted),
        EventKind::AvailableClustersChanged { count } => {
            (format!("{count} contexts available"), Tone::Muted)
        }
    }
}

fn format_event(event: &Event, format: OutputFormat, color: bool) -> Result<String, CliError> {
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => Ok(serde_json::to_string(event)?),
        OutputFormat::Table | OutputFormat::Yaml | OutputFormat::Plain => {
            let (text, tone) = describe(&event.kind);
            let at = event.at.format("%H:%M:%S");
            Ok(match &event.cluster {
                Some(cluster) => format!("{at} {cluster} {}", output::paint(&text, tone, color)),
                None => format!("{at} {}", output::paint(&text, tone, color)),
            })
        }
    }
}

fn wanted(event: &Event, only: &[ClusterIdentity]) -> bool {
    match &event.cluster {
        Some(cluster) => only.is_empty() || only.contains(cluster),
        None => true,
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (settings, core) = load(global)?;
    let coord = coordinator(core, settings_store(global), true);
    let watcher = KubeconfigWatcher::new(
        coord.clone(),
        Arc::new(FsScanner),
        watch_set(&settings.watch),
    );
    let only = util::resolve_all(&args.only);
    let color = output::should_color(global.color);

    let mut events = coord.subscribe();
    let result = async {
        watcher.start().await?;
        let report = coord.restore().await?;
        if !global.quiet {
            eprintln!(
                "Watching {} kubeconfig locations, {} clusters connected",
                watcher.watch_set().len(),
                report.added.len()
            );
        }
        event_loop(&coord, &watcher, &mut events, &only, args.no_console, color, global).await
    }
    .await;

    watcher.stop().await;
    coord.shutdown().await;
    result
}

async fn event_loop(
    coord: &SelectionCoordinator,
    watcher: &KubeconfigWatcher,
    events: &mut tokio::sync::broadcast::Receiver<Arc<Event>>,
    only: &[ClusterIdentity],
    no_console: bool,
    color: bool,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut console = (!no_console).then(spawn_console);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            biased;

            _ = &mut interrupt => {
                debug!("interrupted");
                return Ok(());
            }

            line = next_line(&mut console) => {
                let Some(line) = line else {
                    debug!("console closed");
                    console = None;
                    continue;
                };
                match parse_console(&line) {
                    Ok(Some(command)) => match execute(command, coord, watcher, global).await {
                        Ok(true) => {}
                        Ok(false) => return Ok(()),
                        Err(e) => eprintln!("{:?}", miette::Report::new(e)),
                    },
                    Ok(None) => {}
                    Err(message) => eprintln!("{message}"),
                }
            }

            event = events.recv() => match event {
                Ok(event) if wanted(&event, only) && !global.quiet => {
                    output::print_output(&format_event(&event, global.output, color)?, false);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}
