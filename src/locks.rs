//! Lock bookkeeping over a window's surface tree.
//!
//! Soft locks are taken before a configure round-trip so that surfaces which
//! unmap during the wait are still accounted for. Hard locks wrap the
//! surface's own pending-state lock and are only taken once the client has
//! acked, right before the change becomes visible.
//!
//! Both records only hold what was actually acquired, so releasing is always
//! safe to repeat.

use crate::surface::{LockToken, SurfaceId, SurfaceLocks};

#[derive(Debug, Default)]
pub struct TreeLocks {
    soft: Vec<SurfaceId>,
    hard: Vec<(SurfaceId, LockToken)>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeldLocks {
    pub hard: usize,
    pub soft: usize,
}

impl HeldLocks {
    pub fn is_empty(self) -> bool {
        self.hard == 0 && self.soft == 0
    }
}

impl TreeLocks {
    pub fn lock_soft_tree(&mut self, tree: &[SurfaceId], surfaces: &mut dyn SurfaceLocks) {
        for &surface in tree {
            if self.soft.contains(&surface) {
                continue;
            }
            self.soft.push(surface);
            surfaces.lock(surface);
        }
    }

    pub fn unlock_soft_tree(&mut self, surfaces: &mut dyn SurfaceLocks) {
        for surface in self.soft.drain(..) {
            surfaces.unlock(surface);
        }
    }

    pub fn lock_hard_tree(&mut self, tree: &[SurfaceId], surfaces: &mut dyn SurfaceLocks) {
        for &surface in tree {
            if self.hard.iter().any(|(held, _)| *held == surface) {
                continue;
            }
            match surfaces.lock_pending(surface) {
                Some(token) => self.hard.push((surface, token)),
                None => tracing::trace!(%surface, "surface vanished before hard lock"),
            }
        }
    }

    pub fn unlock_hard_tree(&mut self, surfaces: &mut dyn SurfaceLocks) {
        for (surface, token) in self.hard.drain(..) {
            surfaces.unlock_cached(surface, token);
        }
    }

    pub fn held(&self) -> HeldLocks {
        HeldLocks {
            hard: self.hard.len(),
            soft: self.soft.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct CountingSurfaces {
        live: Vec<SurfaceId>,
        soft: HashMap<SurfaceId, i32>,
        hard: HashMap<SurfaceId, Vec<LockToken>>,
        next_token: u32,
    }

    impl CountingSurfaces {
        fn with(count: u32) -> (Self, Vec<SurfaceId>) {
            let ids: Vec<SurfaceId> = (0..count)
                .map(|index| SurfaceId {
                    index,
                    generation: 0,
                })
                .collect();
            let surfaces = Self {
                live: ids.clone(),
                ..Self::default()
            };
            (surfaces, ids)
        }

        fn soft_total(&self) -> i32 {
            self.soft.values().sum()
        }

        fn hard_total(&self) -> usize {
            self.hard.values().map(Vec::len).sum()
        }
    }

    impl SurfaceLocks for CountingSurfaces {
        fn lock(&mut self, surface: SurfaceId) {
            *self.soft.entry(surface).or_default() += 1;
        }

        fn unlock(&mut self, surface: SurfaceId) {
            *self.soft.entry(surface).or_default() -= 1;
        }

        fn lock_pending(&mut self, surface: SurfaceId) -> Option<LockToken> {
            if !self.live.contains(&surface) {
                return None;
            }
            self.next_token += 1;
            let token = LockToken(self.next_token);
            self.hard.entry(surface).or_default().push(token);
            Some(token)
        }

        fn unlock_cached(&mut self, surface: SurfaceId, token: LockToken) {
            if let Some(tokens) = self.hard.get_mut(&surface) {
                tokens.retain(|held| *held != token);
            }
        }
    }

    #[test]
    fn soft_lock_is_idempotent_per_surface() {
        let (mut surfaces, tree) = CountingSurfaces::with(3);
        let mut locks = TreeLocks::default();

        locks.lock_soft_tree(&tree, &mut surfaces);
        locks.lock_soft_tree(&tree, &mut surfaces);

        assert_eq!(surfaces.soft_total(), 3);
        assert_eq!(locks.held(), HeldLocks { hard: 0, soft: 3 });
    }

    #[test]
    fn soft_lock_picks_up_surfaces_added_later() {
        let (mut surfaces, tree) = CountingSurfaces::with(3);
        let mut locks = TreeLocks::default();

        locks.lock_soft_tree(&tree[..1], &mut surfaces);
        locks.lock_soft_tree(&tree, &mut surfaces);

        assert_eq!(surfaces.soft_total(), 3);
    }

    #[test]
    fn repeated_soft_unlock_is_a_no_op() {
        let (mut surfaces, tree) = CountingSurfaces::with(2);
        let mut locks = TreeLocks::default();

        locks.unlock_soft_tree(&mut surfaces);
        locks.lock_soft_tree(&tree, &mut surfaces);
        locks.unlock_soft_tree(&mut surfaces);
        locks.unlock_soft_tree(&mut surfaces);

        assert_eq!(surfaces.soft_total(), 0);
        assert!(locks.held().is_empty());
    }

    #[test]
    fn hard_unlock_releases_each_token_once() {
        let (mut surfaces, tree) = CountingSurfaces::with(2);
        let mut locks = TreeLocks::default();

        locks.lock_hard_tree(&tree, &mut surfaces);
        assert_eq!(surfaces.hard_total(), 2);

        locks.unlock_hard_tree(&mut surfaces);
        locks.unlock_hard_tree(&mut surfaces);
        assert_eq!(surfaces.hard_total(), 0);
        assert!(locks.held().is_empty());
    }

    #[test]
    fn vanished_surface_is_skipped_for_hard_lock() {
        let (mut surfaces, tree) = CountingSurfaces::with(2);
        surfaces.live.retain(|surface| *surface != tree[1]);
        let mut locks = TreeLocks::default();

        locks.lock_hard_tree(&tree, &mut surfaces);

        assert_eq!(locks.held(), HeldLocks { hard: 1, soft: 0 });
    }

    #[test]
    fn hard_lock_twice_does_not_leak_tokens() {
        let (mut surfaces, tree) = CountingSurfaces::with(1);
        let mut locks = TreeLocks::default();

        locks.lock_hard_tree(&tree, &mut surfaces);
        locks.lock_hard_tree(&tree, &mut surfaces);
        locks.unlock_hard_tree(&mut surfaces);

        assert_eq!(surfaces.hard_total(), 0);
    }
}
