use std::{cell::RefCell, fmt, rc::Rc};

use smithay::utils::{Logical, Size};

use crate::{
    geometry::{Geometry, Gravity, Margins, TiledEdges, rect},
    signal::Signal,
    surface::{SurfaceId, SurfaceLocks},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window#{}", self.0)
    }
}

/// The part of a toplevel's state that goes through transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToplevelState {
    pub geometry: Geometry,
    pub tiled_edges: TiledEdges,
    pub gravity: Gravity,
    pub mapped: bool,
}

impl Default for ToplevelState {
    fn default() -> Self {
        Self {
            geometry: rect(0, 0, 0, 0),
            tiled_edges: TiledEdges::empty(),
            gravity: Gravity::default(),
            mapped: false,
        }
    }
}

/// The client-facing xdg_toplevel object of a window.
pub trait ToplevelProtocol {
    /// Send a configure with the new size; returns its serial.
    fn set_size(&mut self, size: Size<i32, Logical>) -> u32;

    fn set_maximized(&mut self, maximized: bool) -> u32;

    fn set_tiled(&mut self, edges: TiledEdges) -> u32;

    /// Tiled edges as last sent (or about to be sent) to the client.
    fn pending_tiled(&self) -> TiledEdges;

    /// The last configure serial the client acked with a commit. Zero until
    /// the first ack.
    fn configure_serial(&self) -> u32;

    /// The client's window geometry, relative to its main surface.
    fn geometry(&self) -> Geometry;
}

/// What an instruction needs from the window it operates on.
///
/// Signals returned by [`commit_signal`](Self::commit_signal) and
/// [`destroy_signal`](Self::destroy_signal) must be emitted while the window
/// is not borrowed, since instruction callbacks borrow it.
///
/// The same holds for dropping an [`Instruction`](crate::Instruction): its
/// remaining locks are released through the window handle, and a window that
/// is borrowed at that moment keeps them.
pub trait ToplevelWindow {
    fn id(&self) -> WindowId;

    fn pending(&self) -> &ToplevelState;
    fn pending_mut(&mut self) -> &mut ToplevelState;
    fn current(&self) -> &ToplevelState;
    fn current_mut(&mut self) -> &mut ToplevelState;

    /// Main surface followed by all descendant subsurfaces, as of now.
    fn surface_tree(&self) -> Vec<SurfaceId>;
    fn surfaces_mut(&mut self) -> &mut dyn SurfaceLocks;

    /// `None` once the client destroyed its xdg_toplevel.
    fn toplevel(&self) -> Option<&dyn ToplevelProtocol>;
    fn toplevel_mut(&mut self) -> Option<&mut dyn ToplevelProtocol>;

    /// Server-side decoration margins, if the window is decorated.
    fn margins(&self) -> Option<Margins>;

    /// Send a frame callback so the client redraws soon.
    fn send_frame(&mut self);
    fn damage(&mut self);

    /// Size of the main surface's committed buffer.
    fn surface_size(&self) -> Size<i32, Logical>;
    /// Where the main surface is placed, including decoration offset.
    fn set_output_geometry(&mut self, geometry: Geometry);

    fn update_tiled_edges(&mut self, old_edges: TiledEdges);
    fn map(&mut self);
    fn unmap(&mut self);

    /// Authoritative on-screen size for this change, including decoration.
    fn emit_final_size(&mut self, size: Size<i32, Logical>);

    fn commit_signal(&self) -> Signal<()>;
    fn destroy_signal(&self) -> Signal<()>;
}

/// Counted reference to a window; each instruction owns one clone.
pub type WindowHandle<W> = Rc<RefCell<W>>;
