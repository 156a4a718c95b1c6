//! # Telemetry Bus
//!
//! In-process publish/subscribe registry keyed by MAVLink message-type tag.
//!
//! The bus decouples the transport listener from every consumer: the listener
//! publishes each decoded message under its type tag, and any number of
//! subscribers (state aggregator, safety supervisor, flight recorder, mission
//! uploader) receive it without knowing about each other.
//!
//! Dispatch snapshots the handler list under a short critical section and
//! invokes handlers outside of it, so a handler may subscribe, unsubscribe or
//! block without deadlocking the bus or affecting the in-flight delivery.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use mavlink::common::MavMessage;
use mavlink::MavHeader;
use tracing::error;

/// Wildcard tag: handlers subscribed under it receive every published message
pub const ALL_MESSAGES: &str = "*";

/// A decoded MAVLink message together with its routing header
#[derive(Debug, Clone)]
pub struct RoutedMessage {
    /// Sender system/component ids and sequence number
    pub header: MavHeader,
    /// The decoded message payload
    pub message: MavMessage,
}

/// Handler capability invoked once per matching message
pub type Handler = Arc<dyn Fn(&RoutedMessage) + Send + Sync>;

/// Identifies one (tag, handler) registration for later removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionToken {
    tag: String,
    id: u64,
}

impl SubscriptionToken {
    /// The tag this subscription was registered under
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

struct Subscription {
    id: u64,
    handler: Handler,
}

/// Publish/subscribe registry for decoded telemetry messages
///
/// Handlers registered under a tag are invoked once per message of that tag,
/// in registration order, for the lifetime of the subscription. Deliveries
/// for a single tag preserve publish order; no ordering is guaranteed between
/// different tags.
pub struct TelemetryBus {
    subscribers: Mutex<HashMap<String, Vec<Subscription>>>,
    next_id: Mutex<u64>,
}

impl Default for TelemetryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
        }
    }

    /// Register `handler` for messages published under `tag`
    ///
    /// Multiple handlers may subscribe to the same tag; they are invoked in
    /// registration order. Subscribe under [`ALL_MESSAGES`] to receive every
    /// message regardless of tag.
    ///
    /// Returns a token identifying exactly this registration; pass it to
    /// [`unsubscribe`](Self::unsubscribe) to remove it again.
    pub fn subscribe(&self, tag: &str, handler: Handler) -> SubscriptionToken {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };

        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers
            .entry(tag.to_string())
            .or_default()
            .push(Subscription { id, handler });

        SubscriptionToken {
            tag: tag.to_string(),
            id,
        }
    }

    /// Remove the registration identified by `token`
    ///
    /// After this call returns the handler receives no further invocations.
    /// A dispatch already in flight completes normally; removal is safe to
    /// call concurrently with publishes.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(list) = subscribers.get_mut(&token.tag) {
            list.retain(|sub| sub.id != token.id);
            if list.is_empty() {
                subscribers.remove(&token.tag);
            }
        }
    }

    /// Deliver `message` to every handler subscribed under `tag`, then to
    /// every wildcard handler
    ///
    /// A handler that panics is isolated: the panic is logged and subsequent
    /// handlers in the same dispatch still run. Nothing propagates back to
    /// the publisher.
    pub fn publish(&self, tag: &str, message: &RoutedMessage) {
        let snapshot: Vec<Handler> = {
            let subscribers = self.subscribers.lock().unwrap();
            let tagged = subscribers.get(tag).into_iter().flatten();
            let wildcard = subscribers.get(ALL_MESSAGES).into_iter().flatten();
            tagged
                .chain(wildcard)
                .map(|sub| Arc::clone(&sub.handler))
                .collect()
        };

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                error!("telemetry handler for {tag} panicked; continuing dispatch");
            }
        }
    }

    /// Number of live registrations under `tag`
    pub fn subscriber_count(&self, tag: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(tag)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::{ATTITUDE_DATA, HEARTBEAT_DATA};

    fn heartbeat() -> RoutedMessage {
        RoutedMessage {
            header: MavHeader {
                system_id: 1,
                component_id: 1,
                sequence: 0,
            },
            message: MavMessage::HEARTBEAT(HEARTBEAT_DATA::default()),
        }
    }

    fn attitude(yaw: f32) -> RoutedMessage {
        RoutedMessage {
            header: MavHeader {
                system_id: 1,
                component_id: 1,
                sequence: 0,
            },
            message: MavMessage::ATTITUDE(ATTITUDE_DATA {
                yaw,
                ..Default::default()
            }),
        }
    }

    fn yaw_of(message: &RoutedMessage) -> f32 {
        match &message.message {
            MavMessage::ATTITUDE(data) => data.yaw,
            other => panic!("expected ATTITUDE, got {:?}", other),
        }
    }

    #[test]
    fn test_handler_receives_messages_in_publish_order() {
        let bus = TelemetryBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        bus.subscribe(
            "ATTITUDE",
            Arc::new(move |msg| sink.lock().unwrap().push(yaw_of(msg))),
        );

        for yaw in [0.1, 0.2, 0.3] {
            bus.publish("ATTITUDE", &attitude(yaw));
        }

        assert_eq!(*seen.lock().unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_handlers_invoked_in_registration_order() {
        let bus = TelemetryBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let sink = Arc::clone(&order);
            bus.subscribe(
                "HEARTBEAT",
                Arc::new(move |_| sink.lock().unwrap().push(label)),
            );
        }

        bus.publish("HEARTBEAT", &heartbeat());
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_wildcard_receives_every_tag() {
        let bus = TelemetryBus::new();
        let tags = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&tags);
        bus.subscribe(
            ALL_MESSAGES,
            Arc::new(move |msg| {
                use mavlink::Message;
                sink.lock().unwrap().push(msg.message.message_name());
            }),
        );

        bus.publish("HEARTBEAT", &heartbeat());
        bus.publish("ATTITUDE", &attitude(0.0));

        assert_eq!(*tags.lock().unwrap(), vec!["HEARTBEAT", "ATTITUDE"]);
    }

    #[test]
    fn test_untagged_publish_reaches_no_handler() {
        let bus = TelemetryBus::new();
        let count = Arc::new(Mutex::new(0));

        let sink = Arc::clone(&count);
        bus.subscribe(
            "SYS_STATUS",
            Arc::new(move |_| *sink.lock().unwrap() += 1),
        );

        bus.publish("HEARTBEAT", &heartbeat());
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[test]
    fn test_unsubscribe_removes_exactly_that_handler() {
        let bus = TelemetryBus::new();
        let kept = Arc::new(Mutex::new(0));
        let removed = Arc::new(Mutex::new(0));

        let sink = Arc::clone(&kept);
        bus.subscribe("HEARTBEAT", Arc::new(move |_| *sink.lock().unwrap() += 1));

        let sink = Arc::clone(&removed);
        let token =
            bus.subscribe("HEARTBEAT", Arc::new(move |_| *sink.lock().unwrap() += 1));

        bus.publish("HEARTBEAT", &heartbeat());
        bus.unsubscribe(token);
        bus.publish("HEARTBEAT", &heartbeat());

        assert_eq!(*kept.lock().unwrap(), 2);
        assert_eq!(*removed.lock().unwrap(), 1);
        assert_eq!(bus.subscriber_count("HEARTBEAT"), 1);
    }

    #[test]
    fn test_panicking_handler_does_not_break_dispatch() {
        let bus = TelemetryBus::new();
        let delivered = Arc::new(Mutex::new(0));

        bus.subscribe("HEARTBEAT", Arc::new(|_| panic!("handler blew up")));

        let sink = Arc::clone(&delivered);
        bus.subscribe("HEARTBEAT", Arc::new(move |_| *sink.lock().unwrap() += 1));

        bus.publish("HEARTBEAT", &heartbeat());
        bus.publish("HEARTBEAT", &heartbeat());

        assert_eq!(*delivered.lock().unwrap(), 2);
    }

    #[test]
    fn test_handler_may_subscribe_during_dispatch() {
        // Handlers run outside the registry lock, so a handler that itself
        // subscribes must not deadlock. The new registration only sees
        // messages published after it was added.
        let bus = Arc::new(TelemetryBus::new());
        let late = Arc::new(Mutex::new(0));

        let bus_inner = Arc::clone(&bus);
        let late_inner = Arc::clone(&late);
        bus.subscribe(
            "HEARTBEAT",
            Arc::new(move |_| {
                let sink = Arc::clone(&late_inner);
                bus_inner.subscribe(
                    "HEARTBEAT",
                    Arc::new(move |_| *sink.lock().unwrap() += 1),
                );
            }),
        );

        bus.publish("HEARTBEAT", &heartbeat());
        assert_eq!(*late.lock().unwrap(), 0);

        bus.publish("HEARTBEAT", &heartbeat());
        assert_eq!(*late.lock().unwrap(), 1);
    }
}
