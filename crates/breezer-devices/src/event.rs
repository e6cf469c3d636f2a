/*!
 * Device events.
 *
 * Sessions and facades publish on a `tokio::sync::broadcast` channel. Events
 * are informational: nobody has to listen and a lagging receiver only loses
 * old events.
 */
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use breezer_core::types::ValueMap;

use crate::session::SessionState;

/// Default capacity of a device event channel
pub const EVENT_CAPACITY: usize = 100;

/// Device event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// The session moved to a new state
    SessionChanged {
        /// Peripheral address
        address: String,
        /// The new state
        state: SessionState,
    },
    /// A status reply was decoded
    StatusUpdated {
        /// Peripheral address
        address: String,
        /// The status mapping
        status: ValueMap,
    },
}

impl DeviceEvent {
    /// Address of the device the event is about
    pub fn address(&self) -> &str {
        match self {
            DeviceEvent::SessionChanged { address, .. } | DeviceEvent::StatusUpdated { address, .. } => {
                address
            }
        }
    }
}

/// Create an event channel
pub fn channel() -> broadcast::Sender<DeviceEvent> {
    broadcast::channel(EVENT_CAPACITY).0
}

/// Publish an event, ignoring the absence of receivers
pub(crate) fn publish(events: &broadcast::Sender<DeviceEvent>, event: DeviceEvent) {
    if events.send(event).is_err() {
        trace!("No event subscribers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let events = channel();
        let mut rx = events.subscribe();

        publish(
            &events,
            DeviceEvent::SessionChanged {
                address: "AA:BB".into(),
                state: SessionState::Disconnected,
            },
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.address(), "AA:BB");
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let events = channel();
        publish(
            &events,
            DeviceEvent::StatusUpdated {
                address: "AA:BB".into(),
                status: ValueMap::new(),
            },
        );
    }
}
