// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Topic-keyed message bus
//!
//! Dispatch is synchronous but queued. [`MessageBus::publish`] appends to a
//! queue and, when no dispatch is in progress, drains it on the spot. A
//! handler that publishes only enqueues; its message is delivered once the
//! current handler pass has finished, so handlers never recurse into each
//! other and never run re-entrantly.
//!
//! Subscriptions take an exact topic, a prefix pattern ending in `.*`
//! (`"entity.*"`), or `"*"` for every topic.
//!
//! # Examples
//!
//! ```
//! use sim_kernel::bus::{MessageBus, Payload};
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let bus = MessageBus::new();
//! let seen = Rc::new(Cell::new(0));
//!
//! let counter = seen.clone();
//! let sub = bus.subscribe("score.changed", move |_msg| counter.set(counter.get() + 1));
//!
//! bus.publish("score.changed", Payload::None);
//! sub.cancel();
//! bus.publish("score.changed", Payload::None);
//!
//! assert_eq!(seen.get(), 1);
//! ```

use crate::ecs::{ComponentId, Entity, FrameInfo, Tag};
use crate::physics::CollisionEvent;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

/// Topics published by the kernel
pub mod topics {
    /// An entity was created; payload `Entity`
    pub const ENTITY_CREATED: &str = "entity.created";
    /// An entity was destroyed; payload `Entity` with the dead handle
    pub const ENTITY_DESTROYED: &str = "entity.destroyed";
    /// A component was attached; payload `Component`
    pub const COMPONENT_ADDED: &str = "component.added";
    /// A component was detached; payload `Component`
    pub const COMPONENT_REMOVED: &str = "component.removed";
    /// A tag was added; payload `Tag`
    pub const TAG_ADDED: &str = "tag.added";
    /// A tag was removed; payload `Tag`
    pub const TAG_REMOVED: &str = "tag.removed";
    /// Start of a tick, before any system runs; payload `Frame`
    pub const WORLD_PRE_UPDATE: &str = "world.preUpdate";
    /// End of a tick, after every system ran; payload `Frame`
    pub const WORLD_POST_UPDATE: &str = "world.postUpdate";
    /// Two colliders touched; payload `Collision`
    pub const COLLISION_DETECTED: &str = "collision.detected";
}

/// Message body
#[derive(Debug, Clone)]
pub enum Payload {
    /// No body
    None,
    /// An entity handle
    Entity(Entity),
    /// A component membership change
    Component {
        /// The entity whose components changed
        entity: Entity,
        /// The component type
        component: ComponentId,
        /// The component type's name
        name: &'static str,
    },
    /// A tag membership change
    Tag {
        /// The entity whose tags changed
        entity: Entity,
        /// The tag
        tag: Tag,
    },
    /// Frame timing
    Frame(FrameInfo),
    /// A contact between two colliders
    Collision(CollisionEvent),
    /// Anything else
    Custom(Rc<dyn Any>),
}

impl Payload {
    /// Wrap an arbitrary value
    pub fn custom<T: Any>(value: T) -> Self {
        Payload::Custom(Rc::new(value))
    }

    /// Entity the payload is about, if any
    pub fn entity(&self) -> Option<Entity> {
        match self {
            Payload::Entity(entity)
            | Payload::Component { entity, .. }
            | Payload::Tag { entity, .. } => Some(*entity),
            _ => None,
        }
    }

    /// The collision event, if this is one
    pub fn collision(&self) -> Option<&CollisionEvent> {
        match self {
            Payload::Collision(event) => Some(event),
            _ => None,
        }
    }

    /// Downcast a custom payload
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Payload::Custom(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }
}

/// A published message
#[derive(Debug, Clone)]
pub struct Message {
    /// Topic the message was published on
    pub topic: Cow<'static, str>,
    /// Message body
    pub payload: Payload,
}

/// Bus configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BusConfig {
    /// Messages one drain pass may deliver before the rest is discarded
    pub max_messages_per_drain: usize,
}

impl BusConfig {
    /// Set the per-drain message limit
    pub fn with_max_messages_per_drain(mut self, max: usize) -> Self {
        self.max_messages_per_drain = max;
        self
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            max_messages_per_drain: 65_536,
        }
    }
}

/// Bus counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Messages published, fast path included
    pub published: u64,
    /// Handler invocations
    pub delivered: u64,
    /// Messages that matched no subscriber
    pub dropped: u64,
    /// Messages that took the fast path
    pub fast_path: u64,
    /// Messages discarded by the per-drain limit
    pub discarded: u64,
}

struct Handler {
    id: u64,
    active: Cell<bool>,
    callback: RefCell<Box<dyn FnMut(&Message)>>,
}

struct BusInner {
    config: BusConfig,
    exact: RefCell<HashMap<Cow<'static, str>, Vec<Rc<Handler>>>>,
    // (prefix, handler); "*" has the empty prefix
    wildcard: RefCell<Vec<(String, Rc<Handler>)>>,
    queue: RefCell<VecDeque<Message>>,
    dispatching: Cell<bool>,
    next_id: Cell<u64>,
    stats: Cell<BusStats>,
    scratch: RefCell<Vec<Rc<Handler>>>,
}

/// Resets the dispatch flag even if a handler panics
struct DispatchGuard<'a>(&'a Cell<bool>);

impl<'a> DispatchGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        DispatchGuard(flag)
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl BusInner {
    fn bump(&self, f: impl FnOnce(&mut BusStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn remove(&self, id: u64) -> bool {
        let mut removed = false;
        for list in self.exact.borrow_mut().values_mut() {
            list.retain(|handler| {
                let keep = handler.id != id;
                if !keep {
                    handler.active.set(false);
                    removed = true;
                }
                keep
            });
        }
        self.exact.borrow_mut().retain(|_, list| !list.is_empty());
        self.wildcard.borrow_mut().retain(|(_, handler)| {
            let keep = handler.id != id;
            if !keep {
                handler.active.set(false);
                removed = true;
            }
            keep
        });
        removed
    }

    fn deliver(&self, message: &Message) {
        let mut handlers = std::mem::take(&mut *self.scratch.borrow_mut());
        if let Some(list) = self.exact.borrow().get(&*message.topic) {
            handlers.extend(list.iter().cloned());
        }
        for (prefix, handler) in self.wildcard.borrow().iter() {
            if message.topic.starts_with(prefix.as_str()) {
                handlers.push(handler.clone());
            }
        }

        if handlers.is_empty() {
            self.bump(|s| s.dropped += 1);
        }

        let mut delivered = 0;
        for handler in &handlers {
            // cancelled earlier in this pass
            if !handler.active.get() {
                continue;
            }
            match handler.callback.try_borrow_mut() {
                Ok(mut callback) => {
                    callback(message);
                    delivered += 1;
                }
                Err(_) => log::error!(
                    "handler {} re-entered while handling `{}`",
                    handler.id,
                    message.topic
                ),
            }
        }
        self.bump(|s| s.delivered += delivered);

        handlers.clear();
        *self.scratch.borrow_mut() = handlers;
    }

    fn drain(&self) {
        let _guard = DispatchGuard::enter(&self.dispatching);
        let limit = self.config.max_messages_per_drain;
        let mut processed = 0;

        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(message) = next else { break };

            if processed >= limit {
                let remaining = {
                    let mut queue = self.queue.borrow_mut();
                    let n = queue.len() + 1;
                    queue.clear();
                    n
                };
                self.bump(|s| s.discarded += remaining as u64);
                log::error!(
                    "message bus delivered {} messages in one drain; discarding {} more (last topic `{}`)",
                    limit,
                    remaining,
                    message.topic
                );
                break;
            }

            self.deliver(&message);
            processed += 1;
        }
    }
}

/// Shared handle to a message bus
///
/// Clones refer to the same bus. The bus is single-threaded and not `Send`.
#[derive(Clone)]
pub struct MessageBus(Rc<BusInner>);

impl MessageBus {
    /// Create a bus with the default configuration
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    /// Create a bus with the given configuration
    pub fn with_config(config: BusConfig) -> Self {
        MessageBus(Rc::new(BusInner {
            config,
            exact: RefCell::new(HashMap::new()),
            wildcard: RefCell::new(Vec::new()),
            queue: RefCell::new(VecDeque::new()),
            dispatching: Cell::new(false),
            next_id: Cell::new(0),
            stats: Cell::new(BusStats::default()),
            scratch: RefCell::new(Vec::new()),
        }))
    }

    /// Publish a message
    ///
    /// Delivered before this call returns, unless a dispatch is already in
    /// progress; then it is delivered after the current handler pass.
    pub fn publish(&self, topic: impl Into<Cow<'static, str>>, payload: Payload) {
        self.0.bump(|s| s.published += 1);
        self.0.queue.borrow_mut().push_back(Message {
            topic: topic.into(),
            payload,
        });
        if !self.0.dispatching.get() {
            self.0.drain();
        }
    }

    /// Deliver a message without going through the queue
    ///
    /// Falls back to [`MessageBus::publish`] when called from inside a
    /// handler, so the no-re-entrancy guarantee holds either way.
    pub fn fast_publish(&self, topic: &'static str, payload: Payload) {
        if self.0.dispatching.get() {
            self.publish(topic, payload);
            return;
        }
        self.0.bump(|s| {
            s.published += 1;
            s.fast_path += 1;
        });
        {
            let _guard = DispatchGuard::enter(&self.0.dispatching);
            self.0.deliver(&Message {
                topic: Cow::Borrowed(topic),
                payload,
            });
        }
        // handlers may have queued follow-ups
        if !self.0.queue.borrow().is_empty() {
            self.0.drain();
        }
    }

    /// Subscribe to a topic or pattern
    ///
    /// Dropping the returned [`Subscription`] does not unsubscribe.
    pub fn subscribe(
        &self,
        topic: impl Into<Cow<'static, str>>,
        handler: impl FnMut(&Message) + 'static,
    ) -> Subscription {
        let topic = topic.into();
        let id = self.0.next_id.get();
        self.0.next_id.set(id + 1);

        let handler = Rc::new(Handler {
            id,
            active: Cell::new(true),
            callback: RefCell::new(Box::new(handler)),
        });

        if topic == "*" {
            self.0.wildcard.borrow_mut().push((String::new(), handler));
        } else if let Some(prefix) = topic.strip_suffix('*').filter(|p| p.ends_with('.')) {
            self.0
                .wildcard
                .borrow_mut()
                .push((prefix.to_string(), handler));
        } else {
            self.0
                .exact
                .borrow_mut()
                .entry(topic.clone())
                .or_default()
                .push(handler);
        }

        log::trace!("subscription {} on `{}`", id, topic);
        Subscription {
            id,
            topic,
            bus: Rc::downgrade(&self.0),
        }
    }

    /// Cancel a subscription made on this bus
    ///
    /// Returns `false` if it was already cancelled or belongs to another bus.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        if !Weak::ptr_eq(&subscription.bus, &Rc::downgrade(&self.0)) {
            return false;
        }
        self.0.remove(subscription.id)
    }

    /// Number of handlers a message on `topic` would reach
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let exact = self.0.exact.borrow().get(topic).map_or(0, Vec::len);
        let wildcard = self
            .0
            .wildcard
            .borrow()
            .iter()
            .filter(|(prefix, _)| topic.starts_with(prefix.as_str()))
            .count();
        exact + wildcard
    }

    /// Messages waiting in the queue
    pub fn pending(&self) -> usize {
        self.0.queue.borrow().len()
    }

    /// Check whether a handler pass is running
    pub fn is_dispatching(&self) -> bool {
        self.0.dispatching.get()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> BusStats {
        self.0.stats.get()
    }

    /// Configuration the bus was built with
    pub fn config(&self) -> &BusConfig {
        &self.0.config
    }

    /// Check whether two handles refer to the same bus
    pub fn same_bus(&self, other: &MessageBus) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("topics", &self.0.exact.borrow().len())
            .field("wildcards", &self.0.wildcard.borrow().len())
            .field("pending", &self.pending())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Handle to one subscription
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    topic: Cow<'static, str>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Topic or pattern subscribed to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Cancel the subscription; calling it again is a no-op
    pub fn cancel(&self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.remove(self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(bus: &MessageBus, topic: &'static str) -> (Subscription, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let sub = bus.subscribe(topic, move |msg| sink.borrow_mut().push(msg.topic.to_string()));
        (sub, log)
    }

    #[test]
    fn test_publish_reaches_subscriber() {
        let bus = MessageBus::new();
        let (_sub, log) = recorder(&bus, "a");

        bus.publish("a", Payload::None);
        bus.publish("b", Payload::None);

        assert_eq!(*log.borrow(), vec!["a".to_string()]);
        let stats = bus.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_publish_from_handler_is_deferred() {
        let bus = MessageBus::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let inner_bus = bus.clone();
        let o = order.clone();
        let _first = bus.subscribe("first", move |_| {
            o.borrow_mut().push("first:start");
            inner_bus.publish("second", Payload::None);
            o.borrow_mut().push("first:end");
        });
        let o = order.clone();
        let _second = bus.subscribe("second", move |_| o.borrow_mut().push("second"));

        bus.publish("first", Payload::None);

        assert_eq!(*order.borrow(), vec!["first:start", "first:end", "second"]);
        assert_eq!(bus.pending(), 0);
    }

    #[test]
    fn test_self_publishing_handler_is_bounded() {
        let bus = MessageBus::with_config(BusConfig::default().with_max_messages_per_drain(50));
        let count = Rc::new(Cell::new(0));

        let inner_bus = bus.clone();
        let c = count.clone();
        let _sub = bus.subscribe("ping", move |_| {
            c.set(c.get() + 1);
            inner_bus.publish("ping", Payload::None);
        });

        bus.publish("ping", Payload::None);

        assert_eq!(count.get(), 50);
        assert_eq!(bus.pending(), 0);
        assert_eq!(bus.stats().discarded, 1);
    }

    #[test]
    fn test_wildcards() {
        let bus = MessageBus::new();
        let (_entity, entity_log) = recorder(&bus, "entity.*");
        let (_all, all_log) = recorder(&bus, "*");

        bus.publish("entity.created", Payload::None);
        bus.publish("tag.added", Payload::None);

        assert_eq!(*entity_log.borrow(), vec!["entity.created".to_string()]);
        assert_eq!(all_log.borrow().len(), 2);
        assert_eq!(bus.subscriber_count("entity.destroyed"), 2);
        assert_eq!(bus.subscriber_count("entityx"), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = MessageBus::new();
        let (sub, log) = recorder(&bus, "a");

        assert!(bus.unsubscribe(&sub));
        assert!(!bus.unsubscribe(&sub));
        assert!(!sub.cancel());

        bus.publish("a", Payload::None);
        assert!(log.borrow().is_empty());
        assert_eq!(bus.subscriber_count("a"), 0);
    }

    #[test]
    fn test_unsubscribe_from_other_bus_is_rejected() {
        let bus = MessageBus::new();
        let other = MessageBus::new();
        let (sub, _log) = recorder(&bus, "a");
        let (_other_sub, _other_log) = recorder(&other, "a");

        assert!(!other.unsubscribe(&sub));
        assert_eq!(other.subscriber_count("a"), 1);
    }

    #[test]
    fn test_cancel_during_dispatch_skips_handler() {
        let bus = MessageBus::new();
        let hits = Rc::new(Cell::new(0));
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let v = victim.clone();
        let _killer = bus.subscribe("a", move |_| {
            if let Some(sub) = v.borrow().as_ref() {
                sub.cancel();
            }
        });
        let h = hits.clone();
        *victim.borrow_mut() = Some(bus.subscribe("a", move |_| h.set(h.get() + 1)));

        bus.publish("a", Payload::None);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_fast_publish() {
        let bus = MessageBus::new();
        let (_sub, log) = recorder(&bus, "hot");
        let (_follow, follow_log) = recorder(&bus, "follow");

        let inner_bus = bus.clone();
        let _relay = bus.subscribe("hot", move |_| inner_bus.fast_publish("follow", Payload::None));

        bus.fast_publish("hot", Payload::None);

        assert_eq!(log.borrow().len(), 1);
        assert_eq!(follow_log.borrow().len(), 1);
        let stats = bus.stats();
        assert_eq!(stats.fast_path, 1);
        assert_eq!(stats.published, 2);
    }

    #[test]
    fn test_payload_accessors() {
        let entity = Entity::new(4, 2);
        assert_eq!(Payload::Entity(entity).entity(), Some(entity));
        assert_eq!(
            Payload::Tag {
                entity,
                tag: Tag::Player
            }
            .entity(),
            Some(entity)
        );

        let custom = Payload::custom(42u32);
        assert_eq!(custom.downcast_ref::<u32>(), Some(&42));
        assert_eq!(custom.downcast_ref::<i64>(), None);
        assert!(custom.entity().is_none());
    }

    #[test]
    fn test_clones_share_one_bus() {
        let bus = MessageBus::new();
        let clone = bus.clone();
        let (_sub, log) = recorder(&bus, "a");

        clone.publish("a", Payload::None);
        assert_eq!(log.borrow().len(), 1);
        assert!(bus.same_bus(&clone));
    }
}
