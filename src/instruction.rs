//! Per-window transaction instructions.
//!
//! One [`Instruction`] carries one already-decided change to a toplevel
//! through `stage` → `request` → `finalize`. Between `request` and readiness
//! the instruction may be waiting for the client to ack a configure; that
//! wait is a callback on the window's commit signal, never a blocking call.
//! If the window is destroyed before the instruction is ready, every lock it
//! holds is released and [`InstructionEvent::Cancelled`] is emitted instead of
//! [`InstructionEvent::Ready`].

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    config::TxnConfig,
    errors::{Result, TxnError},
    geometry::{
        Geometry, Gravity, TiledEdges, align_with_gravity, expand_with_margins, rect,
        shrink_by_margins,
    },
    locks::{HeldLocks, TreeLocks},
    serial::{UNACKNOWLEDGED, is_acknowledged},
    signal::{Signal, Subscription},
    window::{ToplevelWindow, WindowHandle, WindowId},
};

static NEXT_INSTRUCTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstructionId(u64);

impl InstructionId {
    fn next() -> Self {
        Self(NEXT_INSTRUCTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InstructionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Created,
    Staged,
    Requested,
    Ready,
    Finalized,
    Cancelled,
}

/// What an instruction reports back to the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstructionEvent {
    Ready(InstructionId),
    Cancelled(InstructionId),
}

impl InstructionEvent {
    pub fn id(self) -> InstructionId {
        match self {
            InstructionEvent::Ready(id) | InstructionEvent::Cancelled(id) => id,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    /// Move/resize to `target`, which includes decoration.
    ///
    /// A client-initiated resize adopts a size the client already committed:
    /// no configure is sent and the tree is locked at construction.
    Resize {
        target: Geometry,
        client_initiated: bool,
    },
    Tiling(TiledEdges),
    Gravity(Gravity),
    Map,
    Unmap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstructionOptions {
    pub frame_hint_on_mismatch: bool,
    pub maximize_when_fully_tiled: bool,
}

impl Default for InstructionOptions {
    fn default() -> Self {
        Self {
            frame_hint_on_mismatch: true,
            maximize_when_fully_tiled: true,
        }
    }
}

impl From<&TxnConfig> for InstructionOptions {
    fn from(config: &TxnConfig) -> Self {
        Self {
            frame_hint_on_mismatch: config.frame_hint_on_mismatch,
            maximize_when_fully_tiled: config.maximize_when_fully_tiled,
        }
    }
}

/// One change to one window, driven through `stage`, `request` and
/// `finalize` by the scheduler.
///
/// Dropping it releases whatever locks it still holds. Do not drop it while
/// the window handle is borrowed.
pub struct Instruction<W: ToplevelWindow + 'static> {
    id: InstructionId,
    inner: Rc<RefCell<Inner<W>>>,
    events: Signal<InstructionEvent>,
}

impl<W: ToplevelWindow + 'static> Instruction<W> {
    pub fn new(window: WindowHandle<W>, change: Change) -> Self {
        Self::with_options(window, change, InstructionOptions::default())
    }

    pub fn client_resize(window: WindowHandle<W>, target: Geometry) -> Self {
        Self::new(
            window,
            Change::Resize {
                target,
                client_initiated: true,
            },
        )
    }

    pub fn with_options(
        window: WindowHandle<W>,
        change: Change,
        options: InstructionOptions,
    ) -> Self {
        let id = InstructionId::next();
        let events = Signal::new();
        let (window_id, destroyed) = {
            let window = window.borrow();
            (window.id(), window.destroy_signal())
        };

        let inner: Rc<RefCell<Inner<W>>> = Rc::new_cyclic(|this| {
            let hook = this.clone();
            let on_destroy = destroyed.connect(move |_| {
                if let Some(inner) = hook.upgrade() {
                    Inner::dispatch(&inner, Inner::on_window_destroyed);
                }
            });

            RefCell::new(Inner {
                id,
                this: this.clone(),
                window: window.clone(),
                window_id,
                change,
                options,
                phase: Phase::Created,
                gravity_at_stage: Gravity::default(),
                awaiting: None,
                locks: TreeLocks::default(),
                on_commit: None,
                on_destroy: Some(on_destroy),
                events: events.clone(),
            })
        });

        if let Change::Resize {
            client_initiated: true,
            ..
        } = change
        {
            // The client's commit is already queued; hold it until finalize.
            let mut inner = inner.borrow_mut();
            let mut window = window.borrow_mut();
            lock_soft_tree(&mut inner.locks, &mut *window);
        }

        tracing::trace!(instruction = %id, window = %window_id, ?change, "instruction created");
        Self { id, inner, events }
    }

    pub fn id(&self) -> InstructionId {
        self.id
    }

    pub fn window_id(&self) -> WindowId {
        self.inner.borrow().window_id
    }

    pub fn change(&self) -> Change {
        self.inner.borrow().change
    }

    pub fn phase(&self) -> Phase {
        self.inner.borrow().phase
    }

    /// Serial of the configure currently waited on, if any.
    pub fn awaiting_serial(&self) -> Option<u32> {
        self.inner.borrow().awaiting
    }

    pub fn held_locks(&self) -> HeldLocks {
        self.inner.borrow().locks.held()
    }

    /// Ready/cancel notifications for the scheduler.
    pub fn events(&self) -> &Signal<InstructionEvent> {
        &self.events
    }

    /// Write the desired value into the window's pending state.
    pub fn stage(&self) -> Result<()> {
        self.inner.borrow_mut().stage()
    }

    /// Lock the surface tree and ask the client for the change, or signal
    /// readiness right away when no round-trip is needed.
    pub fn request(&self) -> Result<()> {
        let event = self.inner.borrow_mut().request()?;
        if let Some(event) = event {
            self.events.emit(&event);
        }
        Ok(())
    }

    /// Make the staged value live and release the instruction's locks.
    pub fn finalize(&self) -> Result<()> {
        self.inner.borrow_mut().finalize()
    }
}

impl<W: ToplevelWindow + 'static> fmt::Debug for Instruction<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Instruction")
            .field("id", &self.id)
            .field("window", &inner.window_id)
            .field("change", &inner.change)
            .field("phase", &inner.phase)
            .field("locks", &inner.locks.held())
            .finish()
    }
}

struct Inner<W: ToplevelWindow + 'static> {
    id: InstructionId,
    this: Weak<RefCell<Inner<W>>>,
    window: WindowHandle<W>,
    window_id: WindowId,
    change: Change,
    options: InstructionOptions,
    phase: Phase,
    gravity_at_stage: Gravity,
    awaiting: Option<u32>,
    locks: TreeLocks,
    on_commit: Option<Subscription>,
    on_destroy: Option<Subscription>,
    events: Signal<InstructionEvent>,
}

impl<W: ToplevelWindow + 'static> Inner<W> {
    /// Run a callback-driven step and emit its outcome once no borrow of the
    /// instruction is held, so the scheduler may finalize from its handler.
    fn dispatch(
        inner: &Rc<RefCell<Self>>,
        step: impl FnOnce(&mut Self) -> Option<InstructionEvent>,
    ) {
        let (event, events) = {
            let Ok(mut guard) = inner.try_borrow_mut() else {
                tracing::warn!("instruction busy, dropping re-entrant notification");
                return;
            };
            let event = step(&mut *guard);
            (event, guard.events.clone())
        };
        if let Some(event) = event {
            events.emit(&event);
        }
    }

    fn advance(&mut self, expected: Phase, next: Phase) -> Result<()> {
        if self.phase != expected {
            tracing::warn!(
                instruction = %self.id,
                ?expected,
                found = ?self.phase,
                "instruction phase violation"
            );
            return Err(TxnError::InvalidPhase {
                expected,
                found: self.phase,
            });
        }
        tracing::trace!(instruction = %self.id, from = ?expected, to = ?next, "phase");
        self.phase = next;
        Ok(())
    }

    fn stage(&mut self) -> Result<()> {
        self.advance(Phase::Created, Phase::Staged)?;
        let handle = self.window.clone();
        let mut window = handle.borrow_mut();

        match self.change {
            Change::Resize { target, .. } => {
                tracing::debug!(
                    instruction = %self.id,
                    window = %self.window_id,
                    ?target,
                    "pending: set geometry"
                );
                self.gravity_at_stage = window.pending().gravity;
                window.pending_mut().geometry = target;
            }
            Change::Tiling(edges) => {
                tracing::debug!(
                    instruction = %self.id,
                    window = %self.window_id,
                    ?edges,
                    "pending: set tiled edges"
                );
                window.pending_mut().tiled_edges = edges;
            }
            Change::Gravity(gravity) => {
                tracing::debug!(
                    instruction = %self.id,
                    window = %self.window_id,
                    ?gravity,
                    "pending: set gravity"
                );
                window.pending_mut().gravity = gravity;
            }
            Change::Map => {
                tracing::debug!(instruction = %self.id, window = %self.window_id, "pending: map");
                window.pending_mut().mapped = true;
            }
            Change::Unmap => {
                tracing::debug!(instruction = %self.id, window = %self.window_id, "pending: unmap");
                window.pending_mut().mapped = false;
                // The surfaces may be gone by the time request() runs.
                lock_hard_tree(&mut self.locks, &mut *window);
            }
        }
        Ok(())
    }

    fn request(&mut self) -> Result<Option<InstructionEvent>> {
        self.advance(Phase::Staged, Phase::Requested)?;
        let handle = self.window.clone();
        let mut window = handle.borrow_mut();

        let event = match self.change {
            Change::Resize {
                target,
                client_initiated,
            } => self.request_resize(&mut window, target, client_initiated),
            Change::Tiling(edges) => self.request_tiling(&mut window, edges),
            Change::Gravity(_) => self.ready_with_final_size(&mut window),
            Change::Map => {
                lock_soft_tree(&mut self.locks, &mut *window);
                self.ready_with_final_size(&mut window)
            }
            Change::Unmap => self.ready(),
        };
        Ok(event)
    }

    fn request_resize(
        &mut self,
        window: &mut W,
        target: Geometry,
        client_initiated: bool,
    ) -> Option<InstructionEvent> {
        lock_soft_tree(&mut self.locks, window);
        if client_initiated {
            return self.ready_with_final_size(window);
        }

        let configured = window
            .margins()
            .map_or(target, |margins| shrink_by_margins(target, margins));
        let Some(toplevel) = window.toplevel_mut() else {
            tracing::debug!(
                instruction = %self.id,
                window = %self.window_id,
                "toplevel gone,
                skipping configure"
            );
            return self.ready_with_final_size(window);
        };

        let serial = toplevel.set_size(configured.size);
        window.send_frame();
        tracing::debug!(
            instruction = %self.id,
            window = %self.window_id,
            serial,
            size = ?configured.size,
            "sent size configure"
        );
        self.await_ack(window, serial);
        None
    }

    fn request_tiling(&mut self, window: &mut W, edges: TiledEdges) -> Option<InstructionEvent> {
        lock_soft_tree(&mut self.locks, window);
        let Some(toplevel) = window.toplevel_mut() else {
            tracing::debug!(
                instruction = %self.id,
                window = %self.window_id,
                "toplevel gone,
                skipping configure"
            );
            return self.ready_with_final_size(window);
        };

        if toplevel.pending_tiled() == edges {
            tracing::trace!(instruction = %self.id, ?edges, "tiled edges unchanged");
            return self.ready_with_final_size(window);
        }

        if self.options.maximize_when_fully_tiled {
            toplevel.set_maximized(edges.is_maximized());
        }
        let serial = toplevel.set_tiled(edges);
        window.send_frame();
        tracing::debug!(
            instruction = %self.id,
            window = %self.window_id,
            serial,
            ?edges,
            "sent tiled configure"
        );
        self.await_ack(window, serial);
        None
    }

    fn await_ack(&mut self, window: &W, serial: u32) {
        self.awaiting = Some(serial);
        let this = self.this.clone();
        self.on_commit = Some(window.commit_signal().connect(move |_| {
            if let Some(inner) = this.upgrade() {
                Inner::dispatch(&inner, |inner| inner.on_client_commit(serial));
            }
        }));
    }

    fn on_client_commit(&mut self, target: u32) -> Option<InstructionEvent> {
        if self.phase != Phase::Requested {
            return None;
        }
        let handle = self.window.clone();
        let mut window = handle.borrow_mut();

        let current = window
            .toplevel()
            .map_or(UNACKNOWLEDGED, |toplevel| toplevel.configure_serial());
        // TODO: a client that skips the whole serial range is never matched;
        // the scheduler's timeout is the only way out today.
        if !is_acknowledged(current, target) {
            tracing::trace!(instruction = %self.id, current, target, "commit before ack");
            if self.options.frame_hint_on_mismatch {
                window.send_frame();
            }
            return None;
        }

        tracing::debug!(
            instruction = %self.id,
            window = %self.window_id,
            serial = target,
            "configure acked"
        );
        self.on_commit = None;
        self.awaiting = None;
        lock_hard_tree(&mut self.locks, &mut *window);
        self.ready_with_final_size(&mut window)
    }

    fn ready_with_final_size(&mut self, window: &mut W) -> Option<InstructionEvent> {
        let frame = realized_frame(&*window, self.fallback_frame(window));
        window.emit_final_size(frame.size);
        self.ready()
    }

    fn ready(&mut self) -> Option<InstructionEvent> {
        self.phase = Phase::Ready;
        tracing::trace!(instruction = %self.id, "ready");
        Some(InstructionEvent::Ready(self.id))
    }

    fn fallback_frame(&self, window: &W) -> Geometry {
        match self.change {
            Change::Resize { target, .. } => target,
            _ => window.current().geometry,
        }
    }

    fn finalize(&mut self) -> Result<()> {
        self.advance(Phase::Ready, Phase::Finalized)?;
        self.on_commit = None;
        self.on_destroy = None;
        let handle = self.window.clone();
        let mut window = handle.borrow_mut();

        match self.change {
            Change::Resize { target, .. } => self.apply_geometry(&mut window, target),
            Change::Tiling(edges) => {
                self.locks.unlock_soft_tree(window.surfaces_mut());
                let old_edges = window.current().tiled_edges;
                window.current_mut().tiled_edges = edges;
                window.update_tiled_edges(old_edges);
            }
            Change::Gravity(gravity) => window.current_mut().gravity = gravity,
            Change::Map => {
                window.current_mut().mapped = true;
                self.locks.unlock_soft_tree(window.surfaces_mut());
                window.map();
            }
            Change::Unmap => {
                window.current_mut().mapped = false;
                self.locks.unlock_hard_tree(window.surfaces_mut());
                window.unmap();
            }
        }

        // Buffered client state may apply now that the change is live.
        self.locks.unlock_hard_tree(window.surfaces_mut());
        self.locks.unlock_soft_tree(window.surfaces_mut());
        tracing::debug!(
            instruction = %self.id,
            window = %self.window_id,
            change = ?self.change,
            "applied"
        );
        Ok(())
    }

    fn apply_geometry(&mut self, window: &mut W, target: Geometry) {
        window.damage();
        self.locks.unlock_soft_tree(window.surfaces_mut());

        let frame = realized_frame(&*window, target);
        let geometry = align_with_gravity(target, frame, self.gravity_at_stage);
        window.current_mut().geometry = geometry;

        // Offset the main surface for decoration and client-side shadows.
        let surface_size = window.surface_size();
        window.set_output_geometry(rect(
            geometry.loc.x - frame.loc.x,
            geometry.loc.y - frame.loc.y,
            surface_size.w,
            surface_size.h,
        ));
        window.damage();
    }

    fn on_window_destroyed(&mut self) -> Option<InstructionEvent> {
        if !matches!(
            self.phase,
            Phase::Created | Phase::Staged | Phase::Requested
        ) {
            tracing::trace!(
                instruction = %self.id,
                phase = ?self.phase,
                "destroy after ready,
                ignoring"
            );
            return None;
        }

        tracing::debug!(
            instruction = %self.id,
            window = %self.window_id,
            "window destroyed,
            cancelling"
        );
        self.on_commit = None;
        self.awaiting = None;
        self.release_locks();
        self.phase = Phase::Cancelled;
        self.on_destroy = None;
        Some(InstructionEvent::Cancelled(self.id))
    }

    fn release_locks(&mut self) {
        let handle = self.window.clone();
        let Ok(mut window) = handle.try_borrow_mut() else {
            tracing::warn!(instruction = %self.id, "window busy, surface locks not released");
            return;
        };
        self.locks.unlock_hard_tree(window.surfaces_mut());
        self.locks.unlock_soft_tree(window.surfaces_mut());
    }
}

impl<W: ToplevelWindow + 'static> Drop for Inner<W> {
    fn drop(&mut self) {
        if !self.locks.held().is_empty() {
            self.release_locks();
        }
    }
}

fn lock_soft_tree<W: ToplevelWindow>(locks: &mut TreeLocks, window: &mut W) {
    let tree = window.surface_tree();
    locks.lock_soft_tree(&tree, window.surfaces_mut());
}

fn lock_hard_tree<W: ToplevelWindow>(locks: &mut TreeLocks, window: &mut W) {
    let tree = window.surface_tree();
    locks.lock_hard_tree(&tree, window.surfaces_mut());
}

/// The client's realised box grown by decoration. Without a live toplevel the
/// fallback frame's client size at the origin stands in for it.
fn realized_frame<W: ToplevelWindow>(window: &W, fallback: Geometry) -> Geometry {
    let margins = window.margins();
    let client = match window.toplevel() {
        Some(toplevel) => toplevel.geometry(),
        None => {
            let client = margins.map_or(fallback, |margins| shrink_by_margins(fallback, margins));
            rect(0, 0, client.size.w, client.size.h)
        }
    };
    margins.map_or(client, |margins| expand_with_margins(client, margins))
}
