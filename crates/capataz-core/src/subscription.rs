//! Filtered subscriptions to published events.
//!
//! A [`Subscription`] pairs a handler with an event/group/port filter.
//! [`Subscriptions`] is the registry: the supervisor keeps one for
//! in-process subscribers, and each [`crate::sink::EventRelay`] keeps one on
//! the client side.
//!
//! Matching rules, given an event and its info:
//! - an already-handled event only reaches subscriptions registered with
//!   `handled = true`;
//! - `exact` subscriptions need event, group and port to be equal, unset
//!   fields included;
//! - otherwise each unset filter field is a wildcard.
//!
//! The wildcard token `*` is normalised to "unset" at registration.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::event::{EventData, EventInfo, Handler, WILDCARD};

/// Port part of a subscription filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortFilter {
    /// Any port.
    Any,
    /// One port.
    Port(u16),
}

impl From<u16> for PortFilter {
    fn from(port: u16) -> Self {
        Self::Port(port)
    }
}

impl std::str::FromStr for PortFilter {
    type Err = crate::error::SupervisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == WILDCARD {
            return Ok(Self::Any);
        }
        s.parse()
            .map(Self::Port)
            .map_err(|_| crate::error::SupervisorError::config(format!("invalid port filter {s:?}")))
    }
}

/// Filter options for [`Subscriptions::on`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Group to match (`"*"` or unset for any).
    pub group: Option<String>,
    /// Port to match (unset for any).
    pub port: Option<PortFilter>,
    /// Require event, group and port to be equal, unset fields included.
    pub exact: bool,
    /// Also receive events another subscriber already handled.
    pub handled: bool,
}

impl SubscribeOptions {
    /// Options matching everything not yet handled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one group.
    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Restricts to one port (or [`PortFilter::Any`]).
    #[must_use]
    pub fn port(mut self, port: impl Into<PortFilter>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Sets exact matching.
    #[must_use]
    pub const fn exact(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }

    /// Sets whether already-handled events are delivered.
    #[must_use]
    pub const fn handled(mut self, handled: bool) -> Self {
        self.handled = handled;
        self
    }
}

/// What a filter is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EventKey<'a> {
    event: Option<&'a str>,
    group: Option<&'a str>,
    port: Option<u16>,
    handled: bool,
}

/// A handler plus its normalised filter.
#[derive(Clone)]
pub struct Subscription {
    event: Option<String>,
    group: Option<String>,
    port: Option<u16>,
    exact: bool,
    handled: bool,
    handler: Handler,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("group", &self.group)
            .field("port", &self.port)
            .field("exact", &self.exact)
            .field("handled", &self.handled)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Builds a subscription, normalising `*` to "any".
    #[must_use]
    pub fn new(event: &str, options: &SubscribeOptions, handler: Handler) -> Self {
        let event = (event != WILDCARD).then(|| event.to_string());
        let group = options
            .group
            .as_deref()
            .filter(|g| !g.is_empty() && *g != WILDCARD)
            .map(str::to_string);
        let port = match options.port {
            Some(PortFilter::Port(port)) if port != 0 => Some(port),
            _ => None,
        };
        Self {
            event,
            group,
            port,
            exact: options.exact,
            handled: options.handled,
            handler,
        }
    }

    /// Whether an emission of `event` with `info` reaches this subscription.
    #[must_use]
    pub fn matches(&self, event: &str, info: &EventInfo) -> bool {
        self.matches_key(&EventKey {
            event: Some(event),
            group: info.group.as_deref(),
            port: info.port,
            handled: info.handled,
        })
    }

    fn matches_key(&self, key: &EventKey<'_>) -> bool {
        if key.handled && !self.handled {
            return false;
        }

        if self.exact {
            return self.event.as_deref() == key.event
                && self.group.as_deref() == key.group
                && self.port == key.port;
        }

        fn field<T: PartialEq>(filter: Option<T>, value: Option<T>) -> bool {
            filter.is_none() || filter == value
        }

        field(self.event.as_deref(), key.event)
            && field(self.group.as_deref(), key.group)
            && field(self.port, key.port)
    }

    fn key(&self) -> EventKey<'_> {
        EventKey {
            event: self.event.as_deref(),
            group: self.group.as_deref(),
            port: self.port,
            handled: self.handled,
        }
    }

    /// The subscription's handler.
    #[must_use]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

/// Ordered registry of subscriptions.
#[derive(Debug, Default)]
pub struct Subscriptions {
    entries: RwLock<Vec<Subscription>>,
}

impl Subscriptions {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event` (or `"*"`) filtered by `options`.
    pub fn on(&self, event: &str, options: &SubscribeOptions, handler: Handler) {
        self.entries
            .write()
            .push(Subscription::new(event, options, handler));
    }

    /// Removes subscriptions and returns how many went.
    ///
    /// Call shapes:
    /// - `(None, None, Some(h))`: every registration of `h`;
    /// - `(Some(e), None, Some(h))`: registrations of `h` whose filter
    ///   matches `e`;
    /// - `(Some(e), Some(o), Some(h))`: as above with `o` as the filter;
    /// - `(None, None, None)`: everything.
    ///
    /// Walks newest first.
    pub fn remove_listener(
        &self,
        event: Option<&str>,
        options: Option<&SubscribeOptions>,
        handler: Option<&Handler>,
    ) -> usize {
        let default_options = SubscribeOptions::default();
        let template = Subscription::new(
            event.unwrap_or(""),
            options.unwrap_or(&default_options),
            crate::event::handler(|_, _, _| {}),
        );

        let mut entries = self.entries.write();
        let before = entries.len();
        for index in (0..entries.len()).rev() {
            let candidate = &entries[index];
            let same_handler = handler.is_none_or(|h| Arc::ptr_eq(h, &candidate.handler));
            let same_filter = event.is_none() || template.matches_key(&candidate.key());
            if same_handler && same_filter {
                entries.remove(index);
            }
        }
        before - entries.len()
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether there are no registrations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers an emission to every matching subscription in order.
    ///
    /// The handled flag is re-read before each subscriber, so a subscriber
    /// that claims the event hides it from later default subscribers.
    /// Returns how many handlers ran.
    pub fn dispatch(&self, event: &str, info: &mut EventInfo, data: &EventData) -> usize {
        let snapshot: Vec<Subscription> = self.entries.read().clone();
        let mut delivered = 0;
        for subscription in snapshot {
            if subscription.matches(event, info) {
                (subscription.handler)(event, info, data);
                delivered += 1;
            }
        }
        delivered
    }
}
