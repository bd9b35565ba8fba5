//! Change Bus: synchronous snapshot fan-out.
//!
//! # Responsibility
//! - Deliver every committed graph snapshot to all current subscribers.
//! - Isolate subscribers from each other's failures.
//!
//! # Invariants
//! - Delivery is synchronous and follows subscription order.
//! - A panicking subscriber is logged and skipped; remaining subscribers
//!   still receive the snapshot.
//! - The subscriber list is copied before delivery, so handlers may
//!   subscribe or unsubscribe while a snapshot is in flight. A handler
//!   unsubscribed by an earlier handler is not called for that snapshot.
//! - After `shutdown`, `emit` delivers nothing until new subscribers attach.
//!
//! The bus is single-threaded (`Rc`-based). The composing component creates
//! one instance and hands clones to the store and observers; all clones share
//! one subscriber list.

use crate::model::graph::GraphSnapshot;
use log::{debug, error, warn};
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

/// Identifier returned by `subscribe`.
pub type SubscriberId = u64;

type Handler = Rc<RefCell<dyn FnMut(&Rc<GraphSnapshot>)>>;

#[derive(Default)]
struct BusInner {
    next_id: SubscriberId,
    subscribers: Vec<(SubscriberId, Handler)>,
}

impl BusInner {
    fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.iter().any(|(current, _)| *current == id)
    }
}

/// Publish/subscribe channel carrying graph snapshots.
#[derive(Clone, Default)]
pub struct ChangeBus {
    inner: Rc<RefCell<BusInner>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` and returns its subscription handle.
    ///
    /// Dropping the handle does not unsubscribe; call
    /// `Subscription::unsubscribe` for teardown.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(&Rc<GraphSnapshot>) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        let handler: Handler = Rc::new(RefCell::new(handler));
        inner.subscribers.push((id, handler));
        debug!(
            "event=bus_subscribe module=bus status=ok subscriber_id={} subscribers={}",
            id,
            inner.subscribers.len()
        );
        Subscription {
            id,
            bus: Rc::downgrade(&self.inner),
        }
    }

    /// Removes one subscriber. Returns `false` when it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        remove_subscriber(&self.inner, id)
    }

    /// Delivers `snapshot` to every subscriber and returns how many handlers
    /// completed without panicking.
    pub fn emit(&self, snapshot: Rc<GraphSnapshot>) -> usize {
        let handlers: Vec<(SubscriberId, Handler)> = self.inner.borrow().subscribers.clone();
        let mut delivered = 0;

        for (id, handler) in handlers {
            if !self.inner.borrow().contains(id) {
                continue;
            }
            let Ok(mut callback) = handler.try_borrow_mut() else {
                warn!(
                    "event=bus_emit module=bus status=skip subscriber_id={} reason=reentrant_emit",
                    id
                );
                continue;
            };
            match catch_unwind(AssertUnwindSafe(|| (&mut *callback)(&snapshot))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(
                    "event=bus_emit module=bus status=error subscriber_id={} error_code=subscriber_panicked",
                    id
                ),
            }
        }

        debug!(
            "event=bus_emit module=bus status=ok nodes={} edges={} delivered={}",
            snapshot.nodes.len(),
            snapshot.edges.len(),
            delivered
        );
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    /// Drops every subscriber. Used when the composing component closes.
    pub fn shutdown(&self) {
        let mut inner = self.inner.borrow_mut();
        let dropped = inner.subscribers.len();
        inner.subscribers.clear();
        debug!(
            "event=bus_shutdown module=bus status=ok dropped={}",
            dropped
        );
    }
}

/// Handle for one registered subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    bus: Weak<RefCell<BusInner>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Removes this subscriber. Returns `false` if it was already removed or
    /// the bus no longer exists.
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => remove_subscriber(&inner, self.id),
            None => false,
        }
    }
}

fn remove_subscriber(inner: &Rc<RefCell<BusInner>>, id: SubscriberId) -> bool {
    let mut inner = inner.borrow_mut();
    let before = inner.subscribers.len();
    inner.subscribers.retain(|(current, _)| *current != id);
    before != inner.subscribers.len()
}
