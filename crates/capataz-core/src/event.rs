//! Event bus with a shared, mutable `handled` flag.
//!
//! Every stateful entity (child, group, supervisor) owns an [`EventBus`].
//! A child's bus forwards to its group's, which forwards to the
//! supervisor's, so one `invoke` reaches every level in order:
//!
//! ```text
//! child handlers → group handlers → supervisor handlers
//! ```
//!
//! All handlers of one emission receive the *same* `&mut EventInfo`. A
//! handler that sets `info.handled = true` is visible to every later
//! handler and to the code that called `invoke`.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The child signalled readiness.
pub const READY: &str = "ready";
/// The child process exited.
pub const EXIT: &str = "exit";
/// The child process could not be spawned or failed at runtime.
pub const ERROR: &str = "error";
/// The child sent a message over its channel.
pub const MESSAGE: &str = "message";
/// The child asked for a message to be fanned out.
pub const BROADCAST: &str = "broadcast";
/// Reserved name carrying the supervisor handshake.
pub const HANDSHAKE: &str = "capataz";
/// Handlers attached under this name see every event.
pub const WILDCARD: &str = "*";

/// Names of the events a child can emit.
pub const CHILD_EVENTS: [&str; 5] = [READY, EXIT, ERROR, MESSAGE, BROADCAST];

/// Where an event came from, plus the acknowledgment flag.
///
/// A fresh value is built for each emission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    /// Group of the emitting child.
    pub group: Option<String>,
    /// Port of the emitting child.
    pub port: Option<u16>,
    /// Set by a handler that takes responsibility for this occurrence.
    #[serde(default)]
    pub handled: bool,
}

impl EventInfo {
    /// Info for an event emitted by a child.
    #[must_use]
    pub fn child(group: impl Into<String>, port: u16) -> Self {
        Self {
            group: Some(group.into()),
            port: Some(port),
            handled: false,
        }
    }

    /// Info for an event with no originating child.
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }
}

/// Event-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventData {
    /// No payload.
    None,
    /// The process exited.
    Exit {
        /// Exit code, if it exited normally.
        code: Option<i32>,
        /// Terminating signal number, if any.
        signal: Option<i32>,
        /// The exit followed a stop request.
        expected: bool,
    },
    /// Spawn or runtime failure.
    Error {
        /// Error description.
        error: String,
    },
    /// Payload the child sent over its channel.
    Message {
        /// The decoded payload.
        payload: Value,
    },
    /// Fan-out request from a child.
    Broadcast {
        /// Application event name.
        event: String,
        /// Application payload.
        data: Value,
        /// Deliver to the sender as well.
        include_self: bool,
    },
}

/// An event handler.
///
/// Handlers are compared by identity (`Arc::ptr_eq`) when detached, so
/// keep the `Arc` you attached.
pub type Handler = Arc<dyn Fn(&str, &mut EventInfo, &EventData) + Send + Sync>;

/// Wraps a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&str, &mut EventInfo, &EventData) + Send + Sync + 'static,
{
    Arc::new(f)
}

struct Registration {
    event: String,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    handlers: RwLock<Vec<Registration>>,
    parent: RwLock<Option<EventBus>>,
}

/// Ordered, synchronous event dispatch.
///
/// Cloning yields another reference to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.inner.handlers.read().len())
            .field("has_parent", &self.inner.parent.read().is_some())
            .finish()
    }
}

impl EventBus {
    /// Creates a root bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus that forwards every emission to `parent` after its own
    /// handlers have run.
    #[must_use]
    pub fn with_parent(parent: &Self) -> Self {
        let bus = Self::new();
        *bus.inner.parent.write() = Some(parent.clone());
        bus
    }

    /// Registers `handler` for `event` (or [`WILDCARD`]).
    pub fn attach(&self, event: impl Into<String>, handler: Handler) {
        self.inner.handlers.write().push(Registration {
            event: event.into(),
            handler,
        });
    }

    /// Removes the most recent registration of this exact handler for
    /// `event`. Returns whether anything was removed.
    pub fn detach(&self, event: &str, handler: &Handler) -> bool {
        let mut handlers = self.inner.handlers.write();
        let found = handlers
            .iter()
            .rposition(|r| r.event == event && Arc::ptr_eq(&r.handler, handler));
        match found {
            Some(index) => {
                handlers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of registrations on this bus (not counting the parent).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.handlers.read().len()
    }

    /// Whether this bus has no registrations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls every handler for `event` and [`WILDCARD`] in registration
    /// order, then forwards to the parent bus.
    ///
    /// Handlers may attach or detach during dispatch; the set called is the
    /// one registered when this bus started dispatching.
    pub fn invoke(&self, event: &str, info: &mut EventInfo, data: &EventData) {
        let snapshot: Vec<Handler> = self
            .inner
            .handlers
            .read()
            .iter()
            .filter(|r| r.event == event || r.event == WILDCARD)
            .map(|r| Arc::clone(&r.handler))
            .collect();

        for handler in snapshot {
            handler(event, info, data);
        }

        let parent = self.inner.parent.read().clone();
        if let Some(parent) = parent {
            parent.invoke(event, info, data);
        }
    }

    /// Drops every registration and unlinks the parent.
    pub fn destroy(&self) {
        self.inner.handlers.write().clear();
        *self.inner.parent.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Handler {
        let log = Arc::clone(log);
        handler(move |event, _, _| log.lock().push(format!("{tag}:{event}")))
    }

    #[test]
    fn test_invoke_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(vec![]));
        bus.attach(EXIT, recorder(&log, "a"));
        bus.attach(WILDCARD, recorder(&log, "b"));
        bus.attach(READY, recorder(&log, "c"));
        bus.attach(EXIT, recorder(&log, "d"));

        bus.invoke(EXIT, &mut EventInfo::child("web", 1), &EventData::None);
        assert_eq!(*log.lock(), vec!["a:exit", "b:exit", "d:exit"]);
    }

    #[test]
    fn test_handled_flag_is_shared() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(None));
        bus.attach(
            EXIT,
            handler(|_, info, _| info.handled = true),
        );
        let seen_in = Arc::clone(&seen);
        bus.attach(
            EXIT,
            handler(move |_, info, _| *seen_in.lock() = Some(info.handled)),
        );

        let mut info = EventInfo::child("web", 1);
        bus.invoke(EXIT, &mut info, &EventData::None);
        assert!(info.handled, "caller sees the write");
        assert_eq!(*seen.lock(), Some(true), "later handler sees the write");
    }

    #[test]
    fn test_bubbles_to_parent_after_own_handlers() {
        let root = EventBus::new();
        let mid = EventBus::with_parent(&root);
        let leaf = EventBus::with_parent(&mid);
        let log = Arc::new(Mutex::new(vec![]));
        root.attach(WILDCARD, recorder(&log, "root"));
        mid.attach(WILDCARD, recorder(&log, "mid"));
        leaf.attach(WILDCARD, recorder(&log, "leaf"));

        leaf.invoke(READY, &mut EventInfo::detached(), &EventData::None);
        assert_eq!(*log.lock(), vec!["leaf:ready", "mid:ready", "root:ready"]);
    }

    #[test]
    fn test_detach_by_identity() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(vec![]));
        let a = recorder(&log, "a");
        let twin = recorder(&log, "a");
        bus.attach(EXIT, Arc::clone(&a));
        bus.attach(EXIT, twin);

        assert!(!bus.detach(READY, &a), "wrong event name");
        assert!(bus.detach(EXIT, &a));
        assert!(!bus.detach(EXIT, &a), "already gone");
        assert_eq!(bus.len(), 1);

        bus.invoke(EXIT, &mut EventInfo::detached(), &EventData::None);
        assert_eq!(log.lock().len(), 1, "the twin closure is still attached");
    }

    #[test]
    fn test_handler_may_detach_itself() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let slot: Arc<Mutex<Option<Handler>>> = Arc::new(Mutex::new(None));

        let bus_in = bus.clone();
        let count_in = Arc::clone(&count);
        let slot_in = Arc::clone(&slot);
        let once = handler(move |event, _, _| {
            *count_in.lock() += 1;
            if let Some(me) = slot_in.lock().take() {
                bus_in.detach(event, &me);
            }
        });
        *slot.lock() = Some(Arc::clone(&once));
        bus.attach(EXIT, once);

        bus.invoke(EXIT, &mut EventInfo::detached(), &EventData::None);
        bus.invoke(EXIT, &mut EventInfo::detached(), &EventData::None);
        assert_eq!(*count.lock(), 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_destroy_unlinks() {
        let root = EventBus::new();
        let leaf = EventBus::with_parent(&root);
        let log = Arc::new(Mutex::new(vec![]));
        root.attach(WILDCARD, recorder(&log, "root"));
        leaf.attach(WILDCARD, recorder(&log, "leaf"));

        leaf.destroy();
        leaf.invoke(EXIT, &mut EventInfo::detached(), &EventData::None);
        assert!(log.lock().is_empty());
        assert!(leaf.is_empty());
    }

    #[test]
    fn test_event_data_wire_shape() {
        let data = EventData::Exit {
            code: Some(1),
            signal: None,
            expected: false,
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["kind"], "exit");
        assert_eq!(json["code"], 1);
        assert_eq!(json["expected"], false);
    }
}
