/*!
 * In-memory transport.
 *
 * `DummyTransport` plays a breezer without any radio: it reassembles what
 * the driver writes and answers every complete request with the model's
 * recorded status reply. It also records traffic and can be told to fail,
 * which is what the session and facade tests are built on.
 */
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use breezer_core::config::FramingConfig;

use super::{NotificationSink, Transport, TransportResult};
use crate::error::TransportError;
use crate::frame::{Framing, Reassembler};
use crate::models::{codec_for, Model, ModelCodec};

/// Offset of the request id in an outbound message (placeholder included)
const REQUEST_ID_OFFSET: usize = 7;

#[derive(Default)]
struct DummyState {
    connected: bool,
    sink: Option<NotificationSink>,
    reassembler: Reassembler,
    written: Vec<Bytes>,
    requests: Vec<Bytes>,
    reply: Option<Vec<u8>>,
    silent: bool,
    fail_connects: u32,
    fail_writes: u32,
    fail_subscribes: u32,
    connect_attempts: u32,
    connects: u32,
    disconnects: u32,
    subscribes: u32,
    pairs: u32,
}

/// A transport that simulates a breezer in memory
pub struct DummyTransport {
    address: String,
    codec: &'static dyn ModelCodec,
    framing: Framing,
    state: Mutex<DummyState>,
}

impl fmt::Debug for DummyTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("DummyTransport")
            .field("address", &self.address)
            .field("model", &self.codec.model())
            .field("connected", &state.connected)
            .field("requests", &state.requests.len())
            .finish()
    }
}

impl DummyTransport {
    /// Simulate a breezer of `model` with the default framing
    pub fn new(address: impl Into<String>, model: Model) -> Self {
        Self::with_framing(address, model, &FramingConfig::default())
    }

    /// Simulate a breezer of `model` segmenting with `config`
    pub fn with_framing(address: impl Into<String>, model: Model, config: &FramingConfig) -> Self {
        let codec = codec_for(model);
        Self {
            address: address.into(),
            codec,
            framing: codec.framing(config),
            state: Mutex::new(DummyState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, DummyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer with `reply` instead of the recorded sample
    ///
    /// On segmented models `reply` is a message with a placeholder first
    /// byte; its request id is overwritten with the request's.
    pub fn set_reply(&self, reply: Option<Vec<u8>>) {
        self.state().reply = reply;
    }

    /// Stop (or resume) answering requests
    pub fn set_silent(&self, silent: bool) {
        self.state().silent = silent;
    }

    /// Fail the next `count` connection attempts
    pub fn fail_next_connects(&self, count: u32) {
        self.state().fail_connects = count;
    }

    /// Fail the next `count` writes
    pub fn fail_next_writes(&self, count: u32) {
        self.state().fail_writes = count;
    }

    /// Reject the next `count` subscriptions
    pub fn fail_next_subscribes(&self, count: u32) {
        self.state().fail_subscribes = count;
    }

    /// Push a raw notification as if the device had sent it
    pub fn inject(&self, frame: &[u8]) -> bool {
        match &self.state().sink {
            Some(sink) => sink.deliver(frame),
            None => false,
        }
    }

    /// Drop the link from the device side
    pub fn drop_link(&self) {
        let mut state = self.state();
        debug!("Dropping the link to {}", self.address);
        state.connected = false;
        state.sink = None;
        state.reassembler.reset();
    }

    /// Every frame written so far
    pub fn written_frames(&self) -> Vec<Bytes> {
        self.state().written.clone()
    }

    /// Every complete request reassembled so far
    pub fn requests(&self) -> Vec<Bytes> {
        self.state().requests.clone()
    }

    /// Successful connections
    pub fn connects(&self) -> u32 {
        self.state().connects
    }

    /// Connection attempts, failed ones included
    pub fn connect_attempts(&self) -> u32 {
        self.state().connect_attempts
    }

    /// Disconnections requested by the driver
    pub fn disconnects(&self) -> u32 {
        self.state().disconnects
    }

    /// Notification subscriptions
    pub fn subscribes(&self) -> u32 {
        self.state().subscribes
    }

    /// Link-level pairings
    pub fn pairs(&self) -> u32 {
        self.state().pairs
    }

    fn is_pair_request(&self, request: &[u8]) -> bool {
        self.codec
            .pair_request()
            .is_some_and(|pair| pair.message.as_slice() == request)
    }

    fn reply_frames(&self, state: &DummyState, request: &[u8]) -> Vec<Bytes> {
        let mut reply = state
            .reply
            .clone()
            .unwrap_or_else(|| self.codec.sample_response());

        match self.framing {
            Framing::Raw => vec![Bytes::from(reply)],
            Framing::Segmented(_) => {
                // The request is reassembled without its placeholder byte
                let id_range = REQUEST_ID_OFFSET - 1..REQUEST_ID_OFFSET + 3;
                if let (Some(id), Some(slot)) = (
                    request.get(id_range),
                    reply.get_mut(REQUEST_ID_OFFSET..REQUEST_ID_OFFSET + 4),
                ) {
                    slot.copy_from_slice(id);
                }
                self.framing.segment(&reply)
            }
        }
    }
}

#[async_trait]
impl Transport for DummyTransport {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        let mut state = self.state();
        state.connect_attempts += 1;
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(TransportError::Other(format!(
                "simulated connection failure to {}",
                self.address
            )));
        }
        state.connected = true;
        state.connects += 1;
        debug!("Dummy {} connected", self.address);
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let mut state = self.state();
        state.connected = false;
        state.sink = None;
        state.reassembler.reset();
        state.disconnects += 1;
        debug!("Dummy {} disconnected", self.address);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> TransportResult<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if characteristic != self.codec.characteristics().write {
            return Err(TransportError::CharacteristicNotFound(characteristic.to_string()));
        }
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(TransportError::Gatt("simulated write failure".into()));
        }

        state.written.push(Bytes::copy_from_slice(data));
        let framing = self.framing;
        let Some(request) = framing.accept(&mut state.reassembler, data) else {
            return Ok(());
        };
        trace!("Dummy {} got request {:02x?}", self.address, request.as_ref());
        state.requests.push(request.clone());

        if state.silent || self.is_pair_request(&request) {
            return Ok(());
        }

        let frames = self.reply_frames(&state, &request);
        match &state.sink {
            Some(sink) => {
                for frame in &frames {
                    sink.deliver(frame);
                }
            }
            None => warn!("Dummy {} has no subscriber for its reply", self.address),
        }
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid, sink: NotificationSink) -> TransportResult<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if characteristic != self.codec.characteristics().notify {
            return Err(TransportError::CharacteristicNotFound(characteristic.to_string()));
        }
        if state.fail_subscribes > 0 {
            state.fail_subscribes -= 1;
            return Err(TransportError::Gatt("simulated subscription failure".into()));
        }
        state.sink = Some(sink);
        state.subscribes += 1;
        Ok(())
    }

    async fn pair(&self) -> TransportResult<()> {
        self.state().pairs += 1;
        Ok(())
    }
}
