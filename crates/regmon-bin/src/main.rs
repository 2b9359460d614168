//! regmon entrypoint: a device-word monitor driven by a simulated backend.
use anyhow::Result;
use clap::Parser;
use core_config::{Config, SessionState, load_from, load_state, save_state, state_path};
use core_device::{DeviceAddress, FormatMode, parse};
use core_events::{
    BackendStatus, CommandEvent, EVENT_CHANNEL_CAP, Event, EventSourceRegistry, TickEventSource,
};
use core_sync::{Activity, ViewportController};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, trace, warn};
use tracing_appender::non_blocking::WorkerGuard;

mod commands;
mod console;
mod device;

use console::ConsoleSink;
use device::{PushSimulator, SimulatedDevice};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "regmon", version, about = "Windowed device-word monitor")]
struct Args {
    /// Optional configuration file path (overrides discovery of `regmon.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Initial target address (overrides `monitor.default_target`).
    #[arg(long)]
    target: Option<String>,
    /// Initial display format (overrides `monitor.format`).
    #[arg(long)]
    format: Option<String>,
    /// Disable push delivery; the monitor falls back to polling.
    #[arg(long)]
    no_push: bool,
    /// Make every Nth device read fail.
    #[arg(long, value_name = "N")]
    fail_every: Option<u64>,
    /// Simulated push period in milliseconds.
    #[arg(long, default_value_t = 500)]
    push_interval_ms: u64,
    /// Session file remembering the last display format (defaults to the
    /// platform data dir).
    #[arg(long = "state")]
    state: Option<PathBuf>,
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

struct RuntimeContext {
    config: Config,
    args: Args,
    session_path: Option<PathBuf>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn run(&mut self) -> Result<RuntimeContext> {
        self.configure_logging()?;
        Self::install_panic_hook();

        info!(target: "runtime", "startup");
        let args = Args::parse();
        let config_override = args.config.is_some();
        let mut config = load_from(args.config.clone())?;
        if let Some(target) = &args.target {
            config.file.monitor.default_target = target.clone();
        }
        let session_path = args.state.clone().or_else(state_path);
        let saved_format = session_path
            .as_deref()
            .map(load_state)
            .and_then(|state| state.format);
        if let Some(format) = args.format.clone().or(saved_format) {
            config.file.monitor.format = format;
        }
        if args.no_push {
            config.file.poll.enabled = true;
        }

        info!(
            target: "runtime.startup",
            config_override,
            default_target = config.file.monitor.default_target.as_str(),
            format = config.file.monitor.format.as_str(),
            push = !args.no_push,
            fail_every = args.fail_every,
            max_rendered_rows = config.effective.max_rendered_rows,
            "bootstrap_complete"
        );
        Ok(RuntimeContext {
            config,
            args,
            session_path,
        })
    }

    fn configure_logging(&mut self) -> Result<()> {
        let log_dir = Path::new(".");
        let log_path = log_dir.join("regmon.log");
        if log_path.exists() {
            let _ = std::fs::remove_file(&log_path);
        }

        let file_appender = tracing_appender::rolling::never(log_dir, "regmon.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(_) => {
                self.log_guard = Some(guard);
            }
            Err(_err) => {
                // Global subscriber already installed; drop guard so writer shuts down.
            }
        }

        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

/// Target for `text`; when it does not parse, the letters-only prefix at word
/// zero (or `D0` when there are no letters).
fn resolve_target(text: &str) -> DeviceAddress {
    if let Some(addr) = parse(text) {
        return addr;
    }
    let key: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let key = if key.is_empty() { "D".to_string() } else { key };
    DeviceAddress::new(key, 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopControl {
    Continue,
    Break { reason: ShutdownReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownReason {
    CommandQuit,
    ShutdownEvent,
    ChannelClosed,
}

impl ShutdownReason {
    fn as_str(&self) -> &'static str {
        match self {
            ShutdownReason::CommandQuit => "command_quit",
            ShutdownReason::ShutdownEvent => "shutdown_event",
            ShutdownReason::ChannelClosed => "channel_closed",
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn log_shutdown_stage(reason: ShutdownReason, stage: &'static str) {
    info!(
        target: "runtime.shutdown",
        reason = reason.as_str(),
        stage = stage,
        "shutdown_stage"
    );
}

enum Wake {
    Event(Option<Event>),
    Activity(Activity),
}

struct MonitorRuntime<W: Write> {
    controller: ViewportController<SimulatedDevice, ConsoleSink<W>>,
    default_target: String,
    watched: watch::Sender<Option<DeviceAddress>>,
    session_path: Option<PathBuf>,
    rx: mpsc::Receiver<Event>,
    tx: Option<mpsc::Sender<Event>>,
    source_handles: Vec<tokio::task::JoinHandle<()>>,
}

impl<W: Write> MonitorRuntime<W> {
    fn new(
        controller: ViewportController<SimulatedDevice, ConsoleSink<W>>,
        config: &Config,
        watched: watch::Sender<Option<DeviceAddress>>,
        session_path: Option<PathBuf>,
        tx: mpsc::Sender<Event>,
        rx: mpsc::Receiver<Event>,
        source_handles: Vec<tokio::task::JoinHandle<()>>,
    ) -> Self {
        Self {
            controller,
            default_target: config.file.monitor.default_target.clone(),
            watched,
            session_path,
            rx,
            tx: Some(tx),
            source_handles,
        }
    }

    async fn run(&mut self) -> Result<()> {
        let loop_span = tracing::debug_span!(target: "runtime", "event_loop");
        let _enter_loop = loop_span.enter();

        let mut shutdown_reason = ShutdownReason::ChannelClosed;
        loop {
            let wake = tokio::select! {
                event = self.rx.recv() => Wake::Event(event),
                Some(activity) = self.controller.next_activity() => Wake::Activity(activity),
            };
            let event = match wake {
                Wake::Activity(activity) => {
                    self.controller.handle_activity(activity);
                    continue;
                }
                Wake::Event(None) => break,
                Wake::Event(Some(event)) => event,
            };

            let control = match &event {
                Event::Push(push) => {
                    self.controller.on_push(push);
                    LoopControl::Continue
                }
                Event::Status(status) => self.handle_status(status),
                Event::Scroll(signal) => {
                    self.controller
                        .on_scroll_proximity(signal.distance_from_top, signal.distance_from_bottom);
                    LoopControl::Continue
                }
                Event::Command(cmd) => self.handle_command(cmd),
                Event::Tick => self.handle_tick(),
                Event::Shutdown => LoopControl::Break {
                    reason: ShutdownReason::ShutdownEvent,
                },
            };
            if let LoopControl::Break { reason } = control {
                shutdown_reason = reason;
                break;
            }
        }

        self.rx.close();
        self.finalize_shutdown(shutdown_reason).await;
        Ok(())
    }

    fn select(&mut self, target: DeviceAddress) {
        self.controller.select_target(&target.key, target.addr);
        self.watched.send_replace(Some(target));
    }

    fn handle_status(&mut self, status: &BackendStatus) -> LoopControl {
        info!(target: "runtime.events", status = %status, "backend_status");
        if status.is_running() {
            let target = resolve_target(&self.default_target);
            self.select(target);
        }
        LoopControl::Continue
    }

    fn handle_command(&mut self, cmd: &CommandEvent) -> LoopControl {
        match cmd {
            CommandEvent::SelectTarget(text) => match parse(text) {
                Some(target) => self.select(target),
                None => warn!(target: "runtime.events", text = text.as_str(), "target_parse_failed"),
            },
            CommandEvent::SetFormat(text) => match text.parse::<FormatMode>() {
                Ok(mode) if mode != self.controller.format() => {
                    self.controller.set_format(mode);
                    self.remember_format(mode);
                }
                Ok(_) => {}
                Err(e) => warn!(target: "runtime.events", error = %e, "format_parse_failed"),
            },
            CommandEvent::Clear => {
                self.controller.clear();
                self.watched.send_replace(None);
            }
            CommandEvent::Quit => {
                return LoopControl::Break {
                    reason: ShutdownReason::CommandQuit,
                };
            }
        }
        LoopControl::Continue
    }

    fn remember_format(&self, mode: FormatMode) {
        let Some(path) = &self.session_path else {
            return;
        };
        let state = SessionState {
            format: Some(mode.to_string()),
        };
        if let Err(e) = save_state(path, &state) {
            warn!(target: "config", path = %path.display(), error = %e, "state_save_failed");
        }
    }

    fn handle_tick(&mut self) -> LoopControl {
        let snap = self.controller.metrics_snapshot();
        trace!(
            target: "runtime",
            fetches_issued = snap.fetches_issued,
            fetches_dropped = snap.fetches_dropped,
            fetches_failed = snap.fetches_failed,
            stale_discarded = snap.stale_discarded,
            pushes_applied = snap.pushes_applied,
            pushes_filtered = snap.pushes_filtered,
            polls_applied = snap.polls_applied,
            rows_rendered = snap.rows_rendered,
            rows_evicted = snap.rows_evicted,
            "sync_metrics"
        );
        LoopControl::Continue
    }

    async fn finalize_shutdown(&mut self, reason: ShutdownReason) {
        log_shutdown_stage(reason, "begin");
        if let Some(tx) = self.tx.take() {
            trace!(
                target: "runtime.shutdown",
                reason = reason.as_str(),
                "dropping_runtime_sender"
            );
            drop(tx);
        }

        self.controller.clear();

        while let Some(handle) = self.source_handles.pop() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(Duration::from_millis(200), handle).await {
                Ok(Ok(_)) => trace!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    "event_source_task_stopped"
                ),
                Ok(Err(err)) if err.is_cancelled() => trace!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    "event_source_task_cancelled"
                ),
                Ok(Err(err)) => error!(
                    target: "runtime.shutdown",
                    reason = reason.as_str(),
                    ?err,
                    "event_source_task_error"
                ),
                Err(_) => {
                    warn!(
                        target: "runtime.shutdown",
                        reason = reason.as_str(),
                        "event_source_task_timeout"
                    );
                    abort.abort();
                }
            }
        }

        log_shutdown_stage(reason, "complete");
    }
}

fn initial_format(config: &Config) -> FormatMode {
    config
        .file
        .monitor
        .format
        .parse::<FormatMode>()
        .unwrap_or_else(|e| {
            warn!(target: "config", error = %e, "format_fallback_u16");
            FormatMode::U16
        })
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut startup = AppStartup::new();
    let RuntimeContext {
        config,
        args,
        session_path,
    } = startup.run()?;
    println!("{}", commands::HELP);

    let device = Arc::new(SimulatedDevice::new(
        args.fail_every,
        Duration::from_millis(20),
    ));
    let mut controller = ViewportController::new(
        Arc::clone(&device),
        ConsoleSink::new(std::io::stdout()),
        &config,
    );
    controller.set_push_available(!args.no_push);
    controller.set_format(initial_format(&config));

    let (tx, rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAP);
    let (watched_tx, watched_rx) = watch::channel(None);
    let mut registry = EventSourceRegistry::new();
    registry.register(TickEventSource::new(Duration::from_secs(5)));
    registry.register(commands::stdin_source());
    registry.register(PushSimulator::new(
        device,
        watched_rx,
        Duration::from_millis(args.push_interval_ms.max(1)),
        config.effective.visible_count as usize,
        !args.no_push,
    ));
    let source_handles = registry.spawn_all(&tx);

    let mut runtime = MonitorRuntime::new(
        controller,
        &config,
        watched_tx,
        session_path,
        tx,
        rx,
        source_handles,
    );
    runtime.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn runtime_with_events(
        events: Vec<Event>,
    ) -> (MonitorRuntime<Vec<u8>>, watch::Receiver<Option<DeviceAddress>>) {
        runtime_with_session(events, None)
    }

    fn runtime_with_session(
        events: Vec<Event>,
        session_path: Option<PathBuf>,
    ) -> (MonitorRuntime<Vec<u8>>, watch::Receiver<Option<DeviceAddress>>) {
        let mut config = Config::default();
        config.file.monitor.default_target = "W1A0".into();
        let device = Arc::new(SimulatedDevice::new(None, Duration::ZERO));
        let controller = ViewportController::new(device, ConsoleSink::new(Vec::new()), &config);
        let (tx, rx) = mpsc::channel(16);
        for event in events {
            tx.try_send(event).expect("queue event");
        }
        let (watched_tx, watched_rx) = watch::channel(None);
        (
            MonitorRuntime::new(controller, &config, watched_tx, session_path, tx, rx, Vec::new()),
            watched_rx,
        )
    }

    #[test]
    fn unparsable_default_target_falls_back_to_letters() {
        assert_eq!(resolve_target("D100"), DeviceAddress::new("D", 100));
        assert_eq!(resolve_target("ZR#"), DeviceAddress::new("ZR", 0));
        assert_eq!(resolve_target("  "), DeviceAddress::new("D", 0));
    }

    #[test]
    fn shutdown_reasons_have_stable_names() {
        assert_eq!(ShutdownReason::CommandQuit.to_string(), "command_quit");
        assert_eq!(ShutdownReason::ChannelClosed.as_str(), "channel_closed");
    }

    #[tokio::test]
    async fn running_status_selects_default_target() {
        let (mut runtime, watched) = runtime_with_events(vec![
            Event::Status(BackendStatus::Running),
            Event::Command(CommandEvent::SetFormat("hex".into())),
            Event::Command(CommandEvent::Quit),
        ]);
        runtime.run().await.unwrap();
        assert_eq!(*watched.borrow(), Some(DeviceAddress::new("W", 0x1A)));
        assert_eq!(runtime.controller.format(), FormatMode::Hex);
        // shutdown clears the viewport
        assert!(runtime.controller.target().is_none());
        assert!(runtime.tx.is_none());
    }

    #[tokio::test]
    async fn commands_drive_the_controller() {
        let (mut runtime, watched) = runtime_with_events(vec![
            Event::Command(CommandEvent::SelectTarget("d20".into())),
            Event::Command(CommandEvent::SelectTarget("???".into())),
            Event::Command(CommandEvent::SetFormat("u64".into())),
            Event::Command(CommandEvent::Clear),
            Event::Shutdown,
        ]);
        runtime.run().await.unwrap();
        assert_eq!(*watched.borrow(), None);
        assert_eq!(runtime.controller.format(), FormatMode::U16);
        let out = String::from_utf8(runtime.controller.sink().get_ref().clone()).unwrap();
        assert!(out.contains("== monitoring D20 =="));
        assert!(out.contains("== monitor cleared =="));
    }

    #[tokio::test]
    async fn format_changes_are_remembered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.toml");

        let (mut runtime, _watched) = runtime_with_session(
            vec![
                Event::Command(CommandEvent::SetFormat("u16".into())),
                Event::Command(CommandEvent::Quit),
            ],
            Some(path.clone()),
        );
        runtime.run().await.unwrap();
        assert!(!path.exists(), "unchanged format is not written");

        let (mut runtime, _watched) = runtime_with_session(
            vec![
                Event::Command(CommandEvent::SetFormat("i32".into())),
                Event::Command(CommandEvent::Quit),
            ],
            Some(path.clone()),
        );
        runtime.run().await.unwrap();
        assert_eq!(load_state(&path).format.as_deref(), Some("I32"));
    }
}
