use std::fmt;

/// Stable handle to a surface in a window's surface arena.
///
/// The generation changes whenever an arena slot is reused, so a handle to a
/// destroyed surface never aliases a newer one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId {
    pub index: u32,
    pub generation: u32,
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}v{}", self.index, self.generation)
    }
}

/// Token returned when deferring a surface's next double-buffered commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LockToken(pub u32);

/// Lock primitives provided by the surface layer.
///
/// Implementations must accept ids of surfaces that no longer exist and treat
/// every call on them as a no-op.
pub trait SurfaceLocks {
    /// Take a logical lock, keeping the surface's current content on screen.
    fn lock(&mut self, surface: SurfaceId);

    fn unlock(&mut self, surface: SurfaceId);

    /// Defer application of the surface's pending state. Returns `None` when
    /// the surface is gone and there is nothing to lock.
    fn lock_pending(&mut self, surface: SurfaceId) -> Option<LockToken>;

    /// Let the state cached under `token` be applied.
    fn unlock_cached(&mut self, surface: SurfaceId, token: LockToken);
}
