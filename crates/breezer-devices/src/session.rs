/*!
 * Session state machine.
 *
 * A [`Session`] wraps one transport handle with a nesting counter so that
 * logical operations can open and close the link in nested fashion: only
 * the outermost `connect` touches the radio and only the matching last
 * `disconnect` closes it.
 *
 * ```text
 * Disconnected -> Connecting -> Connected { notifications } -> Disconnecting -> Disconnected
 * ```
 *
 * Notifications flow from the transport through a bounded channel; the
 * session polls it with a bounded budget while waiting for a reply.
 */
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use breezer_core::config::{Config, SessionConfig};
use breezer_core::utils::{with_retry, with_timeout, MaxTriesExceeded};

use crate::error::{DeviceError, Result, TransportError};
use crate::event::{self, DeviceEvent};
use crate::frame::{Framing, Reassembler};
use crate::models::{Characteristics, ModelCodec, Request};
use crate::transport::{NotificationSink, Transport};

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No link
    Disconnected,
    /// Opening the link
    Connecting,
    /// Link up
    Connected {
        /// Whether replies are being delivered
        notifications: bool,
    },
    /// Closing the link
    Disconnecting,
}

/// A reference-counted connection to one breezer
pub struct Session {
    transport: Arc<dyn Transport>,
    next_transport: Option<Arc<dyn Transport>>,
    framing: Framing,
    characteristics: Characteristics,
    config: SessionConfig,
    connections: u32,
    state: SessionState,
    notifications: Option<mpsc::Receiver<Bytes>>,
    reassembler: Reassembler,
    generation: u64,
    events: broadcast::Sender<DeviceEvent>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport)
            .field("state", &self.state)
            .field("connections", &self.connections)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Session {
    /// Create a closed session speaking `codec`'s framing over `transport`
    pub fn new(transport: Arc<dyn Transport>, codec: &dyn ModelCodec, config: &Config) -> Self {
        Self {
            transport,
            next_transport: None,
            framing: codec.framing(&config.framing),
            characteristics: codec.characteristics(),
            config: config.session.clone(),
            connections: 0,
            state: SessionState::Disconnected,
            notifications: None,
            reassembler: Reassembler::new(),
            generation: 0,
            events: event::channel(),
        }
    }

    /// Publish session events on `events` instead of a private channel
    pub fn with_events(mut self, events: broadcast::Sender<DeviceEvent>) -> Self {
        self.events = events;
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Nesting depth of open connections
    pub fn connections(&self) -> u32 {
        self.connections
    }

    /// Counter bumped on every real connect and real disconnect
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Address of the current transport
    pub fn address(&self) -> String {
        self.transport.address()
    }

    /// Whether the transport reports a live link
    pub async fn is_connected(&self) -> bool {
        self.transport.is_connected().await
    }

    /// Queue a transport to be used from the next real connect on
    pub fn replace_transport(&mut self, transport: Arc<dyn Transport>) {
        debug!(
            "Queued transport {} to replace {}",
            transport.address(),
            self.transport.address()
        );
        self.next_transport = Some(transport);
        if self.connections == 0 {
            self.apply_pending_transport();
        }
    }

    /// Open the session with notifications enabled
    pub async fn connect(&mut self) -> Result<()> {
        self.connect_with(true).await
    }

    /// Open the session, or join an open one
    ///
    /// Only the outermost call connects the transport. Notifications are
    /// subscribed at most once per real connection.
    pub async fn connect_with(&mut self, notifications: bool) -> Result<()> {
        if self.connections > 0 {
            if notifications && !self.notifications_enabled() {
                self.enable_notifications().await?;
                self.set_state(SessionState::Connected {
                    notifications: true,
                });
            }
            self.connections += 1;
            trace!("Joined session, depth {}", self.connections);
            return Ok(());
        }

        self.apply_pending_transport();
        self.set_state(SessionState::Connecting);

        if let Err(e) = self.open(notifications).await {
            self.notifications = None;
            self.reassembler.reset();
            self.set_state(SessionState::Disconnected);
            return Err(e);
        }

        self.connections = 1;
        self.generation += 1;
        self.set_state(SessionState::Connected { notifications });
        info!("Connected to {}", self.transport.address());
        Ok(())
    }

    async fn open(&mut self, notifications: bool) -> Result<()> {
        let opened = if self.transport.is_connected().await {
            debug!("{} is already connected", self.transport.address());
            false
        } else {
            let transport = &self.transport;
            with_retry(self.config.connect_policy(), "connect", move || transport.connect())
                .await?;
            true
        };

        if notifications {
            if let Err(e) = self.enable_notifications().await {
                // A link opened here must not outlive the failed connect
                if opened {
                    if let Err(close_err) = self.transport.disconnect().await {
                        warn!(
                            "Failed to drop the link to {}: {}",
                            self.transport.address(),
                            close_err
                        );
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn notifications_enabled(&self) -> bool {
        matches!(
            self.state,
            SessionState::Connected {
                notifications: true
            }
        )
    }

    async fn enable_notifications(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::channel(self.config.notification_capacity.max(1));
        self.transport
            .subscribe(self.characteristics.notify, NotificationSink::new(tx))
            .await?;
        self.reassembler.reset();
        self.notifications = Some(rx);
        debug!("Notifications enabled on {}", self.characteristics.notify);
        Ok(())
    }

    /// Leave the session
    ///
    /// Only the call matching the outermost connect closes the transport.
    /// Calling this on a closed session does nothing.
    pub async fn disconnect(&mut self) -> Result<()> {
        match self.connections {
            0 => {
                debug!("Session is already closed");
                Ok(())
            }
            1 => {
                self.connections = 0;
                self.close().await
            }
            _ => {
                self.connections -= 1;
                trace!("Left session, depth {}", self.connections);
                Ok(())
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.set_state(SessionState::Disconnecting);

        let result = if self.transport.is_connected().await {
            self.transport.disconnect().await
        } else {
            debug!("{} already dropped the link", self.transport.address());
            Ok(())
        };

        if let Some(mut rx) = self.notifications.take() {
            let mut unread = 0usize;
            while rx.try_recv().is_ok() {
                unread += 1;
            }
            if unread > 0 {
                debug!("Discarded {} unread notifications", unread);
            }
        }
        self.reassembler.reset();
        self.generation += 1;
        self.apply_pending_transport();
        self.set_state(SessionState::Disconnected);
        info!("Disconnected from {}", self.transport.address());

        result.map_err(DeviceError::from)
    }

    /// Link-level pairing on the current transport
    pub async fn pair_transport(&self) -> Result<()> {
        self.transport.pair().await.map_err(DeviceError::from)
    }

    /// Write a message, frame by frame, each under the write retry policy
    pub async fn send(&mut self, message: &[u8]) -> Result<()> {
        if self.connections == 0 {
            return Err(TransportError::NotConnected.into());
        }

        let frames = self.framing.segment(message);
        trace!("Sending {} bytes in {} frames", message.len(), frames.len());

        let transport = &self.transport;
        let characteristic = self.characteristics.write;
        let policy = self.config.write_policy();
        for frame in &frames {
            with_retry(policy, "write", move || transport.write(characteristic, frame)).await?;
        }
        Ok(())
    }

    /// Wait for the reply to `request`
    ///
    /// Frames are reassembled as they arrive; complete messages that answer
    /// another request are skipped. After `response_polls` empty polls the
    /// partial message is dropped and the wait fails.
    pub async fn await_response(&mut self, request: &Request) -> Result<Bytes> {
        let polls = self.config.response_polls;
        let interval = self.config.poll_interval();
        let Some(rx) = self.notifications.as_mut() else {
            return Err(TransportError::NotConnected.into());
        };

        let mut empty = 0u32;
        while empty < polls {
            match with_timeout(interval, rx.recv()).await {
                Err(_) => {
                    empty += 1;
                    trace!("Nothing received, poll {}/{}", empty, polls);
                }
                Ok(None) => {
                    warn!("Notification channel closed while waiting for a reply");
                    self.reassembler.reset();
                    return Err(TransportError::Disconnected("notification channel closed".into()).into());
                }
                Ok(Some(frame)) => {
                    if let Some(message) = self.framing.accept(&mut self.reassembler, &frame) {
                        if request.is_answered_by(&message) {
                            trace!("Got a {} byte reply", message.len());
                            return Ok(message);
                        }
                        debug!("Skipping a reply to another request");
                    }
                }
            }
        }

        warn!(
            "No reply after {} polls of {:?}, dropping {} buffered bytes",
            polls,
            interval,
            self.reassembler.buffered()
        );
        self.reassembler.reset();
        Err(MaxTriesExceeded {
            operation: "await response".into(),
            attempts: polls,
            last_error: "no reply".into(),
        }
        .into())
    }

    /// Send `request` and wait for its reply
    pub async fn request(&mut self, request: &Request) -> Result<Bytes> {
        self.send(&request.message).await?;
        self.await_response(request).await
    }

    fn apply_pending_transport(&mut self) {
        if let Some(next) = self.next_transport.take() {
            info!("Switching transport to {}", next.address());
            self.transport = next;
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        trace!("Session {:?} -> {:?}", self.state, state);
        self.state = state;
        event::publish(
            &self.events,
            DeviceEvent::SessionChanged {
                address: self.transport.address(),
                state,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Header;
    use crate::models::{codec_for, Model};
    use crate::transport::dummy::DummyTransport;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.session.connect_delay_ms = 5;
        config.session.poll_interval_ms = 10;
        config.session.response_polls = 3;
        config
    }

    fn session(model: Model) -> (Arc<DummyTransport>, Session) {
        let dummy = Arc::new(DummyTransport::new("AA:BB:CC:DD:EE:FF", model));
        let session = Session::new(dummy.clone(), codec_for(model), &fast_config());
        (dummy, session)
    }

    #[tokio::test]
    async fn test_nested_connect_touches_transport_once() {
        let (dummy, mut session) = session(Model::S3);

        session.connect().await.unwrap();
        session.connect().await.unwrap();
        assert_eq!(session.connections(), 2);

        session.disconnect().await.unwrap();
        assert_eq!(dummy.disconnects(), 0);
        session.disconnect().await.unwrap();

        // Stray disconnect
        session.disconnect().await.unwrap();

        assert_eq!(session.connections(), 0);
        assert_eq!(dummy.connects(), 1);
        assert_eq!(dummy.subscribes(), 1);
        assert_eq!(dummy.disconnects(), 1);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_skips_live_link() {
        let (dummy, mut session) = session(Model::S3);
        dummy.connect().await.unwrap();

        session.connect().await.unwrap();
        assert_eq!(dummy.connect_attempts(), 1);
        assert_eq!(dummy.subscribes(), 1);
    }

    #[tokio::test]
    async fn test_connect_is_retried_once() {
        let (dummy, mut session) = session(Model::S3);

        dummy.fail_next_connects(1);
        session.connect().await.unwrap();
        assert_eq!(dummy.connect_attempts(), 2);
        session.disconnect().await.unwrap();

        dummy.fail_next_connects(2);
        let err = session.connect().await.unwrap_err();
        match err {
            DeviceError::MaxTriesExceeded(e) => {
                assert_eq!(e.operation, "connect");
                assert_eq!(e.attempts, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(dummy.connect_attempts(), 4);
        assert_eq!(session.connections(), 0);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_subscribe_drops_opened_link() {
        let (dummy, mut session) = session(Model::S3);

        dummy.fail_next_subscribes(1);
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, DeviceError::Transport(TransportError::Gatt(_))));
        assert_eq!(session.connections(), 0);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!dummy.is_connected().await);
        assert_eq!(dummy.disconnects(), 1);

        session.connect().await.unwrap();
        assert_eq!(dummy.connects(), 2);
        assert!(session.is_connected().await);
    }

    #[tokio::test]
    async fn test_failed_subscribe_keeps_foreign_link() {
        let (dummy, mut session) = session(Model::S3);
        dummy.connect().await.unwrap();

        dummy.fail_next_subscribes(1);
        assert!(session.connect().await.is_err());
        assert!(dummy.is_connected().await);
        assert_eq!(dummy.disconnects(), 0);
    }

    #[tokio::test]
    async fn test_write_budget() {
        let (dummy, mut session) = session(Model::S3);
        let request = codec_for(Model::S3).status_request();
        session.connect().await.unwrap();

        dummy.fail_next_writes(3);
        assert!(session.request(&request).await.is_ok());

        dummy.fail_next_writes(4);
        let err = session.send(&request.message).await.unwrap_err();
        assert!(matches!(err, DeviceError::MaxTriesExceeded(ref e) if e.attempts == 4));
    }

    #[tokio::test]
    async fn test_send_requires_open_session() {
        let (_dummy, mut session) = session(Model::S3);
        let err = session.send(&[0x3d]).await.unwrap_err();
        assert!(matches!(err, DeviceError::Transport(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_lite_request_round_trip() {
        let (dummy, mut session) = session(Model::Lite);
        let codec = codec_for(Model::Lite);
        let request = codec.status_request();

        session.connect().await.unwrap();
        let reply = session.request(&request).await.unwrap();
        session.disconnect().await.unwrap();

        assert_eq!(reply.len(), 0x49);
        assert_eq!(dummy.requests().len(), 1);
        assert_eq!(dummy.written_frames()[0][0], 0x80);
    }

    #[test_log::test(tokio::test)]
    async fn test_silent_device_exhausts_poll_budget() {
        let (dummy, mut session) = session(Model::S4);
        dummy.set_silent(true);
        session.connect().await.unwrap();

        let err = session
            .request(&codec_for(Model::S4).status_request())
            .await
            .unwrap_err();
        match err {
            DeviceError::MaxTriesExceeded(e) => {
                assert_eq!(e.operation, "await response");
                assert_eq!(e.attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_stale_reply_is_skipped() {
        let (dummy, mut session) = session(Model::Lite);
        let codec = codec_for(Model::Lite);
        session.connect().await.unwrap();

        let mut stale = codec.sample_response();
        stale[7..11].copy_from_slice(&[9, 9, 9, 9]);
        for frame in codec.framing(&fast_config().framing).segment(&stale) {
            assert!(dummy.inject(&frame));
        }

        let request = codec.status_request();
        let reply = session.request(&request).await.unwrap();
        assert_eq!(Header::parse(&reply).unwrap().request_id, request.request_id.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_link_ends_the_wait() {
        let (dummy, mut session) = session(Model::S3);
        dummy.set_silent(true);
        session.connect().await.unwrap();
        dummy.drop_link();

        let err = session.await_response(&Request::raw(vec![])).await.unwrap_err();
        assert!(matches!(err, DeviceError::Transport(TransportError::Disconnected(_))));

        // The link is already gone; closing must still succeed
        session.disconnect().await.unwrap();
        assert_eq!(dummy.disconnects(), 0);
    }

    #[tokio::test]
    async fn test_notifications_enabled_once() {
        let (dummy, mut session) = session(Model::S3);

        session.connect_with(false).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected { notifications: false });
        assert_eq!(dummy.subscribes(), 0);

        session.connect_with(true).await.unwrap();
        session.connect_with(true).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected { notifications: true });
        assert_eq!(dummy.subscribes(), 1);
    }

    #[tokio::test]
    async fn test_state_events() {
        let (_dummy, mut session) = session(Model::S3);
        let events = event::channel();
        let mut rx = events.subscribe();
        session = session.with_events(events);

        session.connect().await.unwrap();
        session.disconnect().await.unwrap();

        let mut states = Vec::new();
        while let Ok(DeviceEvent::SessionChanged { state, .. }) = rx.try_recv() {
            states.push(state);
        }
        assert_eq!(
            states,
            vec![
                SessionState::Connecting,
                SessionState::Connected { notifications: true },
                SessionState::Disconnecting,
                SessionState::Disconnected,
            ]
        );
    }

    #[tokio::test]
    async fn test_replace_transport_waits_for_close() {
        let (first, mut session) = session(Model::S3);
        let second = Arc::new(DummyTransport::new("11:22:33:44:55:66", Model::S3));

        session.connect().await.unwrap();
        let generation = session.generation();
        session.replace_transport(second.clone());
        assert_eq!(session.address(), "AA:BB:CC:DD:EE:FF");

        session.disconnect().await.unwrap();
        assert_eq!(session.address(), "11:22:33:44:55:66");
        assert_eq!(session.generation(), generation + 1);

        session.connect().await.unwrap();
        assert_eq!(first.connects(), 1);
        assert_eq!(second.connects(), 1);
    }
}
