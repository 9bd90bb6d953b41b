//! # Field Node
//!
//! Runs the node lifecycle against simulated peripherals on a host.
//!
//! Deep sleep is a wait on the host: the virtual clock runs `time_scale`
//! times faster than real time, and the armed wake sources decide what ends
//! the wait. The command console reads stdin, or a serial port when one is
//! configured.
//!
//! # Usage
//!
//! ```bash
//! fieldnode [config/default.toml]
//! ```
//!
//! Expected output:
//! ```text
//! INFO fieldnode: Field node v0.1.0 starting...
//! INFO fieldnode::lifecycle::machine: State: Idle -> Joining
//! INFO fieldnode::device::sim: Deep sleep: timer Some(285) s, ext0 Key, ext1 mask 0x30
//! ```

use std::future::Future;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use fieldnode::config::{Config, ConsoleConfig};
use fieldnode::device::sim::{self, SimClock, SimSleep};
use fieldnode::lifecycle::{CommandPort, CycleOutcome, Node};
use fieldnode::retained::RetainedFile;
use fieldnode::serial;
use fieldnode::settings::{ConfigStore, FileBackend};
use fieldnode::signals::InterruptSignals;
use fieldnode::wake::{WakePin, WakeupCause};

/// Configuration used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Capacity of the console line and reply channels
const CONSOLE_QUEUE: usize = 16;

/// What ended a simulated sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Timer,
    Motion,
    /// A console command left the lifecycle with work to do.
    Command,
    Shutdown,
}

/// Host-side view of the simulated hardware.
struct Host {
    clock: SimClock,
    sleep: SimSleep,
    motion_interval_s: u64,
    console_open: bool,
}

impl Host {
    fn real_duration(&self, virtual_s: u64) -> Duration {
        let scale = u64::from(self.clock.time_scale());
        Duration::from_millis(virtual_s.saturating_mul(1000) / scale)
    }

    fn virtual_ms(&self, real: Duration) -> u64 {
        let ms = u64::try_from(real.as_millis()).unwrap_or(u64::MAX);
        ms.saturating_mul(u64::from(self.clock.time_scale()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so console replies on stdout stay readable
    let (log_writer, _log_guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::fmt()
        .with_writer(log_writer)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Field node v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;
    info!("Configuration loaded from {}", config_path);

    let clock = SimClock::new(chrono::Utc::now().timestamp(), config.simulation.time_scale);
    let sleep = SimSleep::new();
    let hw = sim::peripherals(&config.simulation, clock.clone(), sleep.clone());
    let store = ConfigStore::new(Box::new(FileBackend::new(&config.storage.settings_path)));
    let memory = Box::new(RetainedFile::new(&config.storage.retained_path));

    let (line_tx, line_rx) = mpsc::channel(CONSOLE_QUEUE);
    let (reply_tx, reply_rx) = mpsc::channel(CONSOLE_QUEUE);
    spawn_console(&config.console, line_tx, reply_tx.clone(), reply_rx)?;

    let mut host = Host {
        clock,
        sleep,
        motion_interval_s: config.simulation.motion_interval_s,
        console_open: true,
    };

    let mut node = Node::new(config, store, memory, hw, InterruptSignals::new());
    node.set_commands(CommandPort {
        lines: line_rx,
        replies: reply_tx,
    });

    let (mut node, mut outcome) = drive(node, Node::run_cycle).await?;

    loop {
        let mut port = node
            .take_commands()
            .context("Console detached from the node")?;

        let (timer_s, motion) = match &outcome {
            CycleOutcome::Slept(plan) | CycleOutcome::PoweredDown { plan, .. } => {
                (plan.timer_s, plan.listens_for_motion())
            }
            CycleOutcome::Awake { resume_in_s } => (Some(*resume_in_s), false),
            CycleOutcome::Idle => (None, false),
        };
        if let CycleOutcome::PoweredDown { reason, .. } = &outcome {
            warn!("Node powered down ({}), waiting for console or Ctrl+C", reason);
        }

        let wake = nap(&mut node, &mut port, &mut host, timer_s, motion).await;
        node.set_commands(port);

        let next: fn(&mut Node) -> CycleOutcome = match (wake, &outcome) {
            (Wake::Shutdown, _) => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            (Wake::Timer, CycleOutcome::Awake { .. }) => Node::resume,
            (Wake::Timer, _) => {
                host.sleep.set_cause(WakeupCause::Timer);
                Node::run_cycle
            }
            (Wake::Motion, _) => {
                host.sleep.set_cause(WakeupCause::Ext1 {
                    status: WakePin::Motion.mask(),
                });
                Node::run_cycle
            }
            (Wake::Command, _) => Node::run,
        };

        (node, outcome) = drive(node, next).await?;
    }

    info!("Retained state at exit: {:?}", node.retained());
    Ok(())
}

/// Run a blocking lifecycle call off the async runtime.
async fn drive<F>(mut node: Node, f: F) -> Result<(Node, CycleOutcome)>
where
    F: FnOnce(&mut Node) -> CycleOutcome + Send + 'static,
{
    let (node, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = f(&mut node);
        (node, outcome)
    })
    .await
    .context("Lifecycle task failed")?;
    debug!("Cycle ended: {:?}", outcome);
    Ok((node, outcome))
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Wait in simulated sleep until a wake source fires.
///
/// Console lines are executed while waiting. The virtual clock catches up
/// with the real time spent before every command and on return.
async fn nap(
    node: &mut Node,
    port: &mut CommandPort,
    host: &mut Host,
    timer_s: Option<u64>,
    motion: bool,
) -> Wake {
    let started = Instant::now();
    let timer_at = timer_s.map(|s| started + host.real_duration(s));
    let motion_at = (motion && host.motion_interval_s > 0)
        .then(|| started + host.real_duration(host.motion_interval_s));
    let mut advanced_ms = 0u64;

    loop {
        let line = tokio::select! {
            _ = sleep_until(timer_at) => Err(Wake::Timer),
            _ = sleep_until(motion_at) => Err(Wake::Motion),
            line = port.lines.recv(), if host.console_open => Ok(line),
            _ = tokio::signal::ctrl_c() => Err(Wake::Shutdown),
        };

        let wake = match line {
            Err(wake) => Some(wake),
            Ok(Some(line)) => {
                catch_up(host, started, &mut advanced_ms, 0);
                let reply = node.handle_command(&line);
                if port.replies.send(reply).await.is_err() {
                    warn!("Console reply dropped");
                }
                node.has_pending_work().then_some(Wake::Command)
            }
            Ok(None) => {
                info!("Console input closed");
                host.console_open = false;
                None
            }
        };

        if let Some(wake) = wake {
            let floor_ms = match wake {
                Wake::Timer => timer_s.unwrap_or(0).saturating_mul(1000),
                Wake::Motion => host.motion_interval_s.saturating_mul(1000),
                _ => 0,
            };
            catch_up(host, started, &mut advanced_ms, floor_ms);
            debug!("Woken by {:?} after {} virtual ms", wake, advanced_ms);
            return wake;
        }
    }
}

/// Advance the virtual clock to the real time elapsed since `started`, or
/// to `floor_ms` if that is later.
fn catch_up(host: &Host, started: Instant, advanced_ms: &mut u64, floor_ms: u64) {
    let target = host.virtual_ms(started.elapsed()).max(floor_ms);
    if target > *advanced_ms {
        host.clock.advance_ms(target - *advanced_ms);
        *advanced_ms = target;
    }
}

/// Start the console reader and reply writer on stdin/stdout or a serial port.
fn spawn_console(
    config: &ConsoleConfig,
    lines: mpsc::Sender<String>,
    replies_tx: mpsc::Sender<String>,
    replies_rx: mpsc::Receiver<String>,
) -> Result<()> {
    if config.port.is_empty() {
        info!("Console on stdin");
        tokio::spawn(supervise(
            "reader",
            serial::read_lines(tokio::io::stdin(), lines, replies_tx),
        ));
        tokio::spawn(supervise(
            "writer",
            serial::write_replies(tokio::io::stdout(), replies_rx),
        ));
    } else {
        let port = serial::open_port(&config.port, config.baud_rate)?;
        let (reader, writer) = tokio::io::split(port);
        tokio::spawn(supervise(
            "reader",
            serial::read_lines(reader, lines, replies_tx),
        ));
        tokio::spawn(supervise("writer", serial::write_replies(writer, replies_rx)));
    }
    Ok(())
}

async fn supervise<F>(name: &'static str, task: F)
where
    F: Future<Output = fieldnode::error::Result<()>>,
{
    if let Err(e) = task.await {
        error!("Console {} stopped: {}", name, e);
    }
}
