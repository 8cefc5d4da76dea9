use std::{
    cell::Cell,
    fs,
    path::PathBuf,
    rc::Rc,
    time::{Duration, Instant},
};

use anyhow::{Context, bail};
use raven_txn::{
    Change, Instruction, InstructionEvent, ToplevelWindow, WindowHandle, WindowId,
    config::{self, TxnConfig},
    geometry::{Margins, TiledEdges, rect},
    headless::{self, HeadlessWindow},
    instruction::InstructionOptions,
};
use smithay::reexports::calloop::{
    EventLoop,
    timer::{TimeoutAction, Timer},
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Event loop data: the window the scripted client draws into.
struct Replay {
    window: WindowHandle<HeadlessWindow>,
}

fn main() -> anyhow::Result<()> {
    let loaded = config::load()?;
    init_logging(&loaded.config)?;
    if let Some(path) = &loaded.path {
        tracing::info!(path = %path.display(), "using transaction config");
    }

    let mut event_loop: EventLoop<Replay> =
        EventLoop::try_new().context("failed to create event loop")?;
    let window = HeadlessWindow::new(WindowId(1), rect(0, 0, 800, 600), Some(Margins::top(30)))
        .into_handle();
    window.borrow_mut().add_subsurface();
    let mut replay = Replay {
        window: window.clone(),
    };
    let options = InstructionOptions::from(&loaded.config);

    let steps = [
        Change::Map,
        Change::Resize {
            target: rect(100, 100, 400, 300),
            client_initiated: false,
        },
        Change::Tiling(TiledEdges::ALL),
        Change::Unmap,
    ];
    for change in steps {
        let instruction = Instruction::with_options(window.clone(), change, options);
        run(&mut event_loop, &mut replay, &instruction)?;
    }

    let window = window.borrow();
    let current = window.current();
    println!(
        "geometry={:?} tiled={:?} mapped={} final_sizes={:?} outstanding_locks={}",
        current.geometry,
        current.tiled_edges,
        current.mapped,
        window.final_sizes,
        window.surfaces().outstanding(),
    );
    Ok(())
}

/// Drive one instruction to completion, letting a scripted client ack its
/// configure from timers on the event loop.
fn run(
    event_loop: &mut EventLoop<Replay>,
    replay: &mut Replay,
    instruction: &Instruction<HeadlessWindow>,
) -> anyhow::Result<()> {
    let outcome: Rc<Cell<Option<InstructionEvent>>> = Rc::new(Cell::new(None));
    let seen = outcome.clone();
    let _events = instruction.events().connect(move |event| seen.set(Some(*event)));

    instruction.stage()?;
    instruction.request()?;

    if outcome.get().is_none() {
        // First a stale redraw at the old size, then the real ack.
        event_loop
            .handle()
            .insert_source(Timer::from_duration(Duration::from_millis(4)), |_, _, replay| {
                headless::commit(&replay.window);
                TimeoutAction::Drop
            })
            .map_err(|err| anyhow::anyhow!("failed to insert redraw timer: {}", err.error))?;
        event_loop
            .handle()
            .insert_source(Timer::from_duration(Duration::from_millis(12)), |_, _, replay| {
                if let Some(serial) = headless::ack_latest(&replay.window) {
                    tracing::debug!(serial, "client acked configure");
                }
                TimeoutAction::Drop
            })
            .map_err(|err| anyhow::anyhow!("failed to insert ack timer: {}", err.error))?;
    }

    let started = Instant::now();
    while outcome.get().is_none() {
        if started.elapsed() > HANDSHAKE_TIMEOUT {
            bail!("{} timed out waiting for the client", instruction.id());
        }
        event_loop
            .dispatch(Some(Duration::from_millis(16)), replay)
            .context("event loop dispatch failed")?;
    }

    match outcome.get() {
        Some(event @ InstructionEvent::Ready(_)) => {
            tracing::debug!(instruction = %event.id(), "ready, finalizing");
            instruction.finalize()?;
        }
        Some(event @ InstructionEvent::Cancelled(_)) => {
            tracing::info!(instruction = %event.id(), "cancelled");
        }
        None => {}
    }
    tracing::info!(
        instruction = %instruction.id(),
        window = %instruction.window_id(),
        change = ?instruction.change(),
        phase = ?instruction.phase(),
        "instruction done"
    );
    Ok(())
}

fn init_logging(config: &TxnConfig) -> anyhow::Result<()> {
    let log_dir: PathBuf = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("log");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::never(&log_dir, "raven-txn.log");
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(true)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_appender),
        )
        .init();

    let log_file = log_dir.join("raven-txn.log");
    tracing::info!(path = %log_file.display(), "logging initialized");
    Ok(())
}
