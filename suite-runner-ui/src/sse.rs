//! Server-Sent Events stream and runs directory watcher.

use std::collections::HashSet;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use suite_runner::io::registry::RESULT_FILE;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::{AppState, ChangeEvent};

#[derive(Serialize)]
struct SsePayload<'a> {
    #[serde(rename = "type")]
    event_type: &'static str,
    run_id: &'a str,
}

impl<'a> From<&'a ChangeEvent> for SsePayload<'a> {
    fn from(event: &'a ChangeEvent) -> Self {
        match event {
            ChangeEvent::RunAdded { run_id } => SsePayload {
                event_type: "run_added",
                run_id,
            },
            ChangeEvent::RunCompleted { run_id } => SsePayload {
                event_type: "run_completed",
                run_id,
            },
        }
    }
}

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(change_event) => {
                    let payload = SsePayload::from(&change_event);
                    if let Ok(json) = serde_json::to_string(&payload) {
                        yield Ok(Event::default().event("change").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// Start the runs directory watcher in a background task.
pub fn start_runs_watcher(state: AppState) {
    tokio::spawn(async move {
        if let Err(e) = run_runs_watcher(state).await {
            warn!(error = %e, "runs watcher failed");
        }
    });
}

async fn run_runs_watcher(state: AppState) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<NotifyEvent>(100);

    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.try_send(event);
            }
        },
        notify::Config::default().with_poll_interval(Duration::from_millis(250)),
    )?;

    let runs_dir = state.runs_dir().to_path_buf();
    std::fs::create_dir_all(&runs_dir)?;
    watcher.watch(&runs_dir, RecursiveMode::Recursive)?;
    info!(path = %runs_dir.display(), "watching runs directory");

    let mut known_runs = collect_known_runs(&runs_dir);

    // Batch at a fixed interval so a runner writing continuously cannot starve updates.
    let mut pending_events: Vec<NotifyEvent> = Vec::new();
    let mut flush_tick = tokio::time::interval(Duration::from_millis(250));
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                pending_events.push(event);
            }
            _ = flush_tick.tick() => {
                if pending_events.is_empty() {
                    continue;
                }
                process_events(&runs_dir, &state.event_tx, &pending_events, &mut known_runs);
                pending_events.clear();
            }
        }
    }
}

fn process_events(
    runs_dir: &Path,
    event_tx: &broadcast::Sender<ChangeEvent>,
    events: &[NotifyEvent],
    known_runs: &mut HashSet<String>,
) {
    let mut added: Vec<String> = Vec::new();
    let mut completed: HashSet<String> = HashSet::new();

    for event in events {
        if matches!(event.kind, EventKind::Remove(_)) {
            forget_removed_runs(runs_dir, &event.paths, known_runs);
            continue;
        }
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            continue;
        }
        for path in &event.paths {
            let Some((run_id, file)) = parse_run_path(runs_dir, path) else {
                continue;
            };
            if known_runs.insert(run_id.clone()) {
                added.push(run_id.clone());
            }
            if file.as_deref() == Some(RESULT_FILE) {
                completed.insert(run_id);
            }
        }
    }

    for run_id in added {
        debug!(run_id = %run_id, "broadcasting run added");
        let _ = event_tx.send(ChangeEvent::RunAdded { run_id });
    }
    let mut completed: Vec<String> = completed.into_iter().collect();
    completed.sort();
    for run_id in completed {
        debug!(run_id = %run_id, "broadcasting run completed");
        let _ = event_tx.send(ChangeEvent::RunCompleted { run_id });
    }
}

/// Drop runs whose directory itself was removed, so a recreated id is announced again.
fn forget_removed_runs(runs_dir: &Path, paths: &[PathBuf], known_runs: &mut HashSet<String>) {
    for path in paths {
        if let Some((run_id, None)) = parse_run_path(runs_dir, path) {
            if known_runs.remove(&run_id) {
                debug!(run_id = %run_id, "run removed");
            }
        }
    }
}

fn collect_known_runs(runs_dir: &Path) -> HashSet<String> {
    let Ok(entries) = std::fs::read_dir(runs_dir) else {
        return HashSet::new();
    };
    entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect()
}

/// Split a path below the runs directory into its run id and direct child file name.
fn parse_run_path(runs_dir: &Path, path: &Path) -> Option<(String, Option<String>)> {
    let rel = path.strip_prefix(runs_dir).ok()?;
    let mut components = rel.components();
    let run_id = components.next()?.as_os_str().to_str()?.to_string();
    let file = components
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .map(str::to_string);
    Some((run_id, file))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modify_event(path: PathBuf) -> NotifyEvent {
        NotifyEvent {
            kind: EventKind::Modify(notify::event::ModifyKind::Any),
            paths: vec![path],
            attrs: Default::default(),
        }
    }

    fn remove_event(path: PathBuf) -> NotifyEvent {
        NotifyEvent {
            kind: EventKind::Remove(notify::event::RemoveKind::Any),
            paths: vec![path],
            attrs: Default::default(),
        }
    }

    fn drain(rx: &mut broadcast::Receiver<ChangeEvent>) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[test]
    fn new_run_then_result_emits_added_and_completed() {
        let runs_dir = PathBuf::from("/srv/runs");
        let (tx, mut rx) = broadcast::channel(16);
        let mut known = HashSet::new();

        let events = [
            modify_event(runs_dir.join("20260101_000000_a")),
            modify_event(runs_dir.join("20260101_000000_a").join("console_stdout.txt")),
            modify_event(runs_dir.join("20260101_000000_a").join(RESULT_FILE)),
        ];
        process_events(&runs_dir, &tx, &events, &mut known);

        assert_eq!(
            drain(&mut rx),
            vec![
                ChangeEvent::RunAdded {
                    run_id: "20260101_000000_a".to_string()
                },
                ChangeEvent::RunCompleted {
                    run_id: "20260101_000000_a".to_string()
                },
            ]
        );
    }

    #[test]
    fn known_run_artifacts_emit_nothing() {
        let runs_dir = PathBuf::from("/srv/runs");
        let (tx, mut rx) = broadcast::channel(16);
        let mut known = HashSet::from(["r1".to_string()]);

        let events = [
            modify_event(runs_dir.join("r1").join("log.html")),
            modify_event(PathBuf::from("/elsewhere/r2/result.json")),
        ];
        process_events(&runs_dir, &tx, &events, &mut known);

        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn known_runs_are_collected_from_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join("r1")).expect("mkdir");
        std::fs::write(temp.path().join("stray.txt"), "").expect("write");
        assert_eq!(collect_known_runs(temp.path()), HashSet::from(["r1".to_string()]));
    }

    #[test]
    fn removed_runs_are_forgotten() {
        let runs_dir = PathBuf::from("/srv/runs");
        let (tx, mut rx) = broadcast::channel(16);
        let mut known = HashSet::from(["r1".to_string(), "r2".to_string()]);

        let events = [
            remove_event(runs_dir.join("r1").join("log.html")),
            remove_event(runs_dir.join("r1")),
            remove_event(runs_dir.join("r2").join("result.json")),
        ];
        process_events(&runs_dir, &tx, &events, &mut known);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(known, HashSet::from(["r2".to_string()]));

        process_events(&runs_dir, &tx, &[modify_event(runs_dir.join("r1"))], &mut known);
        assert_eq!(
            drain(&mut rx),
            vec![ChangeEvent::RunAdded {
                run_id: "r1".to_string()
            }]
        );
    }
}
