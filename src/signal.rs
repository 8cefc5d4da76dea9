//! Single-threaded signals with scoped subscriptions.
//!
//! Everything in the transaction core runs on the compositor's event loop, so
//! callbacks are plain `FnMut` closures behind `Rc`. Dropping the
//! [`Subscription`] returned by [`Signal::connect`] detaches the callback; no
//! callback can run after its subscription is gone.

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

type Slot<T> = Rc<RefCell<dyn FnMut(&T)>>;

struct Slots<T> {
    next_id: u64,
    connected: Vec<(u64, Slot<T>)>,
}

pub struct Signal<T> {
    slots: Rc<RefCell<Slots<T>>>,
}

impl<T: 'static> Signal<T> {
    pub fn new() -> Self {
        Self {
            slots: Rc::new(RefCell::new(Slots {
                next_id: 0,
                connected: Vec::new(),
            })),
        }
    }

    pub fn connect<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&T) + 'static,
    {
        let slot: Slot<T> = Rc::new(RefCell::new(callback));
        let id = {
            let mut slots = self.slots.borrow_mut();
            let id = slots.next_id;
            slots.next_id += 1;
            slots.connected.push((id, slot));
            id
        };

        let weak: Weak<RefCell<Slots<T>>> = Rc::downgrade(&self.slots);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(slots) = weak.upgrade() {
                    slots.borrow_mut().connected.retain(|(slot_id, _)| *slot_id != id);
                }
            })),
        }
    }

    /// Run every connected callback once.
    ///
    /// Callbacks may connect or disconnect (including themselves) while the
    /// signal is being emitted. A callback disconnected by an earlier one in
    /// the same emission is skipped, and a callback that re-emits the signal
    /// it is running from is not re-entered.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<(u64, Slot<T>)> = self
            .slots
            .borrow()
            .connected
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        for (id, slot) in snapshot {
            if !self.is_connected(id) {
                continue;
            }
            let Ok(mut callback) = slot.try_borrow_mut() else {
                tracing::trace!(slot = id, "skipping re-entrant signal emission");
                continue;
            };
            (&mut *callback)(value);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.slots.borrow().connected.len()
    }

    fn is_connected(&self, id: u64) -> bool {
        self.slots
            .borrow()
            .connected
            .iter()
            .any(|(slot_id, _)| *slot_id == id)
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("subscribers", &self.slots.borrow().connected.len())
            .finish()
    }
}

/// A live connection to a [`Signal`]. Detaches on drop.
#[must_use = "dropping a subscription disconnects it immediately"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn disconnect(mut self) {
        self.run_detach();
    }

    fn run_detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("connected", &self.detach.is_some())
            .finish()
    }
}
