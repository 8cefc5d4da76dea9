//! In-memory window host.
//!
//! Implements the window, surface and xdg_toplevel collaborators without a
//! Wayland display, for the replay binary and for tests. Client behaviour is
//! scripted through [`ack_configure`], [`commit`] and [`destroy`].

use std::{cell::RefCell, rc::Rc};

use smithay::utils::{Logical, Size};

use crate::{
    geometry::{Geometry, Margins, TiledEdges, rect, shrink_by_margins},
    signal::Signal,
    surface::{LockToken, SurfaceId, SurfaceLocks},
    window::{ToplevelProtocol, ToplevelState, ToplevelWindow, WindowHandle, WindowId},
};

#[derive(Debug, Default)]
struct SurfaceLockState {
    soft: u32,
    hard: Vec<LockToken>,
}

#[derive(Debug)]
struct SurfaceSlot {
    generation: u32,
    state: Option<SurfaceLockState>,
}

/// Arena of surfaces. Removed slots are reused with a bumped generation.
#[derive(Debug, Default)]
pub struct HeadlessSurfaces {
    slots: Vec<SurfaceSlot>,
    next_token: u32,
}

impl HeadlessSurfaces {
    pub fn insert(&mut self) -> SurfaceId {
        if let Some(index) = self.slots.iter().position(|slot| slot.state.is_none()) {
            let slot = &mut self.slots[index];
            slot.generation += 1;
            slot.state = Some(SurfaceLockState::default());
            return SurfaceId {
                index: index as u32,
                generation: slot.generation,
            };
        }

        self.slots.push(SurfaceSlot {
            generation: 0,
            state: Some(SurfaceLockState::default()),
        });
        SurfaceId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    pub fn remove(&mut self, surface: SurfaceId) {
        if let Some(slot) = self.slot_mut(surface) {
            slot.state = None;
        }
    }

    pub fn is_live(&self, surface: SurfaceId) -> bool {
        self.state(surface).is_some()
    }

    pub fn soft_locks(&self, surface: SurfaceId) -> u32 {
        self.state(surface).map_or(0, |state| state.soft)
    }

    pub fn hard_locks(&self, surface: SurfaceId) -> usize {
        self.state(surface).map_or(0, |state| state.hard.len())
    }

    /// Hard plus soft locks held on live surfaces.
    pub fn outstanding(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.state.as_ref())
            .map(|state| state.soft as usize + state.hard.len())
            .sum()
    }

    fn state(&self, surface: SurfaceId) -> Option<&SurfaceLockState> {
        self.slots
            .get(surface.index as usize)
            .filter(|slot| slot.generation == surface.generation)
            .and_then(|slot| slot.state.as_ref())
    }

    fn slot_mut(&mut self, surface: SurfaceId) -> Option<&mut SurfaceSlot> {
        self.slots
            .get_mut(surface.index as usize)
            .filter(|slot| slot.generation == surface.generation && slot.state.is_some())
    }

    fn state_mut(&mut self, surface: SurfaceId) -> Option<&mut SurfaceLockState> {
        self.slot_mut(surface).and_then(|slot| slot.state.as_mut())
    }
}

impl SurfaceLocks for HeadlessSurfaces {
    fn lock(&mut self, surface: SurfaceId) {
        if let Some(state) = self.state_mut(surface) {
            state.soft += 1;
        }
    }

    fn unlock(&mut self, surface: SurfaceId) {
        if let Some(state) = self.state_mut(surface) {
            state.soft = state.soft.saturating_sub(1);
        }
    }

    fn lock_pending(&mut self, surface: SurfaceId) -> Option<LockToken> {
        self.next_token = self.next_token.wrapping_add(1);
        let token = LockToken(self.next_token);
        let state = self.state_mut(surface)?;
        state.hard.push(token);
        Some(token)
    }

    fn unlock_cached(&mut self, surface: SurfaceId, token: LockToken) {
        if let Some(state) = self.state_mut(surface) {
            state.hard.retain(|held| *held != token);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Configure {
    Size {
        serial: u32,
        size: Size<i32, Logical>,
    },
    Maximized {
        serial: u32,
        maximized: bool,
    },
    Tiled {
        serial: u32,
        edges: TiledEdges,
    },
}

impl Configure {
    pub fn serial(self) -> u32 {
        match self {
            Configure::Size { serial, .. }
            | Configure::Maximized { serial, .. }
            | Configure::Tiled { serial, .. } => serial,
        }
    }
}

#[derive(Debug)]
pub struct HeadlessToplevel {
    next_serial: u32,
    acked_serial: u32,
    pending_tiled: TiledEdges,
    geometry: Geometry,
    sent: Vec<Configure>,
}

impl HeadlessToplevel {
    pub fn new(geometry: Geometry) -> Self {
        Self::with_first_serial(geometry, 1)
    }

    /// Start the serial counter somewhere other than 1, e.g. near `u32::MAX`.
    pub fn with_first_serial(geometry: Geometry, first_serial: u32) -> Self {
        Self {
            next_serial: first_serial.max(1),
            acked_serial: 0,
            pending_tiled: TiledEdges::empty(),
            geometry,
            sent: Vec::new(),
        }
    }

    pub fn sent(&self) -> &[Configure] {
        &self.sent
    }

    pub fn last_sent(&self) -> Option<Configure> {
        self.sent.last().copied()
    }

    fn next_serial(&mut self) -> u32 {
        let serial = self.next_serial;
        // Zero is reserved for "never acked".
        self.next_serial = match self.next_serial.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        serial
    }
}

impl ToplevelProtocol for HeadlessToplevel {
    fn set_size(&mut self, size: Size<i32, Logical>) -> u32 {
        let serial = self.next_serial();
        self.sent.push(Configure::Size { serial, size });
        serial
    }

    fn set_maximized(&mut self, maximized: bool) -> u32 {
        let serial = self.next_serial();
        self.sent.push(Configure::Maximized { serial, maximized });
        serial
    }

    fn set_tiled(&mut self, edges: TiledEdges) -> u32 {
        let serial = self.next_serial();
        self.pending_tiled = edges;
        self.sent.push(Configure::Tiled { serial, edges });
        serial
    }

    fn pending_tiled(&self) -> TiledEdges {
        self.pending_tiled
    }

    fn configure_serial(&self) -> u32 {
        self.acked_serial
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }
}

#[derive(Debug)]
pub struct HeadlessWindow {
    id: WindowId,
    pending: ToplevelState,
    current: ToplevelState,
    surfaces: HeadlessSurfaces,
    tree: Vec<SurfaceId>,
    toplevel: Option<HeadlessToplevel>,
    margins: Option<Margins>,
    surface_size: Size<i32, Logical>,
    pub output_geometry: Geometry,
    pub frames_sent: u32,
    pub damage_count: u32,
    pub final_sizes: Vec<Size<i32, Logical>>,
    pub tiled_updates: Vec<(TiledEdges, TiledEdges)>,
    pub map_count: u32,
    pub unmap_count: u32,
    committed: Signal<()>,
    destroyed: Signal<()>,
}

impl HeadlessWindow {
    /// A mapped-to-be window whose frame sits at `geometry`, with one main
    /// surface and a live toplevel that has not acked anything yet.
    pub fn new(id: WindowId, geometry: Geometry, margins: Option<Margins>) -> Self {
        let mut surfaces = HeadlessSurfaces::default();
        let main = surfaces.insert();
        let client = margins.map_or(geometry, |margins| shrink_by_margins(geometry, margins));
        let state = ToplevelState {
            geometry,
            ..ToplevelState::default()
        };

        Self {
            id,
            pending: state,
            current: state,
            surfaces,
            tree: vec![main],
            toplevel: Some(HeadlessToplevel::new(rect(0, 0, client.size.w, client.size.h))),
            margins,
            surface_size: client.size,
            output_geometry: geometry,
            frames_sent: 0,
            damage_count: 0,
            final_sizes: Vec::new(),
            tiled_updates: Vec::new(),
            map_count: 0,
            unmap_count: 0,
            committed: Signal::new(),
            destroyed: Signal::new(),
        }
    }

    pub fn into_handle(self) -> WindowHandle<Self> {
        Rc::new(RefCell::new(self))
    }

    pub fn surfaces(&self) -> &HeadlessSurfaces {
        &self.surfaces
    }

    pub fn tree(&self) -> &[SurfaceId] {
        &self.tree
    }

    pub fn headless_toplevel(&self) -> Option<&HeadlessToplevel> {
        self.toplevel.as_ref()
    }

    pub fn replace_toplevel(&mut self, toplevel: HeadlessToplevel) {
        self.toplevel = Some(toplevel);
    }

    /// Client destroyed its xdg_toplevel but the window object lingers.
    pub fn drop_toplevel(&mut self) {
        self.toplevel = None;
    }

    pub fn add_subsurface(&mut self) -> SurfaceId {
        let surface = self.surfaces.insert();
        self.tree.push(surface);
        surface
    }

    /// Detach and destroy a subsurface, e.g. when the client unmaps it.
    pub fn remove_subsurface(&mut self, surface: SurfaceId) {
        self.tree.retain(|member| *member != surface);
        self.surfaces.remove(surface);
    }
}

impl ToplevelWindow for HeadlessWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn pending(&self) -> &ToplevelState {
        &self.pending
    }

    fn pending_mut(&mut self) -> &mut ToplevelState {
        &mut self.pending
    }

    fn current(&self) -> &ToplevelState {
        &self.current
    }

    fn current_mut(&mut self) -> &mut ToplevelState {
        &mut self.current
    }

    fn surface_tree(&self) -> Vec<SurfaceId> {
        self.tree.clone()
    }

    fn surfaces_mut(&mut self) -> &mut dyn SurfaceLocks {
        &mut self.surfaces
    }

    fn toplevel(&self) -> Option<&dyn ToplevelProtocol> {
        self.toplevel
            .as_ref()
            .map(|toplevel| toplevel as &dyn ToplevelProtocol)
    }

    fn toplevel_mut(&mut self) -> Option<&mut dyn ToplevelProtocol> {
        self.toplevel
            .as_mut()
            .map(|toplevel| toplevel as &mut dyn ToplevelProtocol)
    }

    fn margins(&self) -> Option<Margins> {
        self.margins
    }

    fn send_frame(&mut self) {
        self.frames_sent += 1;
    }

    fn damage(&mut self) {
        self.damage_count += 1;
    }

    fn surface_size(&self) -> Size<i32, Logical> {
        self.surface_size
    }

    fn set_output_geometry(&mut self, geometry: Geometry) {
        self.output_geometry = geometry;
    }

    fn update_tiled_edges(&mut self, old_edges: TiledEdges) {
        self.tiled_updates.push((old_edges, self.current.tiled_edges));
    }

    fn map(&mut self) {
        self.map_count += 1;
    }

    fn unmap(&mut self) {
        self.unmap_count += 1;
    }

    fn emit_final_size(&mut self, size: Size<i32, Logical>) {
        self.final_sizes.push(size);
    }

    fn commit_signal(&self) -> Signal<()> {
        self.committed.clone()
    }

    fn destroy_signal(&self) -> Signal<()> {
        self.destroyed.clone()
    }
}

/// Client commit without acking anything new (a redraw at the old state).
pub fn commit(window: &WindowHandle<HeadlessWindow>) {
    let committed = window.borrow().committed.clone();
    committed.emit(&());
}

/// Client acks `serial` and commits a buffer whose window geometry has `size`.
pub fn ack_configure(
    window: &WindowHandle<HeadlessWindow>,
    serial: u32,
    size: Size<i32, Logical>,
) {
    {
        let mut window = window.borrow_mut();
        if let Some(toplevel) = window.toplevel.as_mut() {
            toplevel.acked_serial = serial;
            toplevel.geometry = rect(0, 0, size.w, size.h);
        }
        window.surface_size = size;
    }
    commit(window);
}

/// Ack the most recent configure at the size it asked for, or at the current
/// size for state-only configures.
pub fn ack_latest(window: &WindowHandle<HeadlessWindow>) -> Option<u32> {
    let (serial, size) = {
        let window = window.borrow();
        let toplevel = window.toplevel.as_ref()?;
        let last = toplevel.last_sent()?;
        let size = toplevel
            .sent
            .iter()
            .rev()
            .find_map(|configure| match configure {
                Configure::Size { size, .. } => Some(*size),
                _ => None,
            })
            .unwrap_or(window.surface_size);
        (last.serial(), size)
    };
    ack_configure(window, serial, size);
    Some(serial)
}

/// The window object goes away. Surfaces stay in the arena so lock state
/// can still be inspected.
pub fn destroy(window: &WindowHandle<HeadlessWindow>) {
    let destroyed = {
        let mut window = window.borrow_mut();
        window.toplevel = None;
        window.destroyed.clone()
    };
    destroyed.emit(&());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_surface_ids_do_not_alias_new_ones() {
        let mut surfaces = HeadlessSurfaces::default();
        let first = surfaces.insert();
        surfaces.lock(first);
        surfaces.remove(first);
        let second = surfaces.insert();

        assert_eq!(first.index, second.index);
        assert_ne!(first, second);
        assert!(!surfaces.is_live(first));
        surfaces.unlock(first);
        assert_eq!(surfaces.soft_locks(second), 0);
        assert_eq!(surfaces.lock_pending(first), None);
    }

    #[test]
    fn unlocking_a_foreign_token_changes_nothing() {
        let mut surfaces = HeadlessSurfaces::default();
        let surface = surfaces.insert();
        let token = surfaces.lock_pending(surface).unwrap();
        surfaces.unlock_cached(surface, LockToken(token.0 + 100));
        assert_eq!(surfaces.hard_locks(surface), 1);
        surfaces.unlock_cached(surface, token);
        surfaces.unlock_cached(surface, token);
        assert_eq!(surfaces.hard_locks(surface), 0);
    }

    #[test]
    fn serial_counter_skips_zero_on_wrap() {
        let mut toplevel = HeadlessToplevel::with_first_serial(rect(0, 0, 10, 10), u32::MAX);
        assert_eq!(toplevel.set_size(Size::from((5, 5))), u32::MAX);
        assert_eq!(toplevel.set_size(Size::from((6, 6))), 1);
    }
}
