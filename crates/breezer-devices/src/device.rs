/*!
 * Device trait and the breezer facade.
 *
 * [`Breezer`] ties a model codec to a [`Session`] and exposes the three
 * operations callers need: read the status, change some settings, pair.
 * All transport traffic of one breezer is serialized through a single lock,
 * so a `set` and a `get` never interleave on the wire.
 */
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, Instrument};

use breezer_core::config::Config;
use breezer_core::logging::operation_span;
use breezer_core::types::ValueMap;

use crate::error::{DeviceError, Result};
use crate::event::{self, DeviceEvent};
use crate::models::{codec_for, BreezerState, Model, ModelCodec, Settings};
use crate::session::Session;
use crate::transport::Transport;

/// Connection status reported for a live link
pub const STATUS_CONNECTED: &str = "connected";

/// Connection status reported without a link
pub const STATUS_DISCONNECTED: &str = "disc";

/// Device information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Peripheral address at creation
    pub address: String,
    /// Breezer model
    pub model: Model,
    /// Display name
    pub name: String,
}

/// The uniform surface over every supported breezer
#[async_trait]
pub trait Device: Send + Sync + Debug {
    /// Get the device information
    fn info(&self) -> &DeviceInfo;

    /// Get the device model
    fn model(&self) -> Model {
        self.info().model
    }

    /// Open (or join) the connection
    async fn connect(&self) -> Result<()>;

    /// Leave the connection
    async fn disconnect(&self) -> Result<()>;

    /// Read the status mapping
    ///
    /// The last decoded status is reused while the connection that produced
    /// it is still open, unless `skip_cache` is set.
    async fn get(&self, skip_cache: bool) -> Result<ValueMap>;

    /// Change the parameters named in `values`, keeping the others
    async fn set(&self, values: &ValueMap) -> Result<()>;

    /// Pair with the device
    async fn pair(&self) -> Result<()>;

    /// `"connected"` or `"disc"`
    async fn connection_status(&self) -> &'static str;
}

struct Inner {
    session: Session,
    state: BreezerState,
    cached_generation: Option<u64>,
}

impl Inner {
    fn cache_valid(&self) -> bool {
        self.session.connections() > 0 && self.cached_generation == Some(self.session.generation())
    }
}

/// A breezer of any supported model
pub struct Breezer {
    codec: &'static dyn ModelCodec,
    info: DeviceInfo,
    inner: Mutex<Inner>,
    events: broadcast::Sender<DeviceEvent>,
}

impl Debug for Breezer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Breezer")
            .field("model", &self.info.model)
            .field("address", &self.info.address)
            .finish()
    }
}

fn finish<T>(result: Result<T>, closed: Result<()>) -> Result<T> {
    let value = result?;
    closed?;
    Ok(value)
}

impl Breezer {
    /// Create a breezer with the default configuration
    pub fn new(model: Model, transport: Arc<dyn Transport>) -> Self {
        Self::with_config(model, transport, &Config::default())
    }

    /// Create a breezer
    pub fn with_config(model: Model, transport: Arc<dyn Transport>, config: &Config) -> Self {
        let codec = codec_for(model);
        let events = event::channel();
        let address = transport.address();
        let session = Session::new(transport, codec, config).with_events(events.clone());

        Self {
            codec,
            info: DeviceInfo {
                name: format!("Tion {} {}", model, address),
                address,
                model,
            },
            inner: Mutex::new(Inner {
                session,
                state: BreezerState::default(),
                cached_generation: None,
            }),
            events,
        }
    }

    /// Receive session and status events
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Address of the current transport
    pub async fn address(&self) -> String {
        self.inner.lock().await.session.address()
    }

    /// Last known state
    pub async fn state(&self) -> BreezerState {
        self.inner.lock().await.state.clone()
    }

    /// Use `transport` from the next real connect on
    pub async fn replace_transport(&self, transport: Arc<dyn Transport>) {
        self.inner.lock().await.session.replace_transport(transport);
    }

    fn span(&self, operation: &str) -> tracing::Span {
        operation_span(operation, &format!("{} {}", self.info.model, self.info.address))
    }

    /// Apply partial settings
    pub async fn apply(&self, settings: Settings) -> Result<()> {
        let settings = settings.normalized();
        if settings.is_empty() {
            debug!("Nothing to set");
            return Ok(());
        }

        async {
            let mut inner = self.inner.lock().await;
            inner.session.connect().await?;
            let result = self.write_settings(&mut inner, &settings).await;
            inner.cached_generation = None;
            let closed = inner.session.disconnect().await;
            finish(result, closed)
        }
        .instrument(self.span("set"))
        .await
    }

    async fn write_settings(&self, inner: &mut Inner, settings: &Settings) -> Result<()> {
        self.read_status(inner, true).await?;

        let mut merged = inner.state.clone();
        merged.apply(settings);
        let request = self.codec.set_request(&merged);
        inner.session.send(&request.message).await?;
        inner.state = merged;

        // The reply only acknowledges the write
        inner.session.await_response(&request).await?;
        info!("Applied {:?}", settings);
        Ok(())
    }

    async fn read_status(&self, inner: &mut Inner, skip_cache: bool) -> Result<BreezerState> {
        if !skip_cache && inner.cache_valid() {
            debug!("Using the status read on this connection");
            return Ok(inner.state.clone());
        }

        inner.session.connect().await?;
        let result = self.fetch_status(inner).await;
        let closed = inner.session.disconnect().await;
        finish(result, closed)
    }

    async fn fetch_status(&self, inner: &mut Inner) -> Result<BreezerState> {
        let request = self.codec.status_request();
        let reply = inner.session.request(&request).await?;
        self.codec.decode(&reply, &mut inner.state)?;
        inner.cached_generation = Some(inner.session.generation());

        event::publish(
            &self.events,
            DeviceEvent::StatusUpdated {
                address: inner.session.address(),
                status: self.codec.status_map(&inner.state),
            },
        );
        Ok(inner.state.clone())
    }

    async fn pair_steps(&self, session: &mut Session) -> Result<()> {
        session.pair_transport().await?;
        if let Some(request) = self.codec.pair_request() {
            session.send(&request.message).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Device for Breezer {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    async fn connect(&self) -> Result<()> {
        self.inner.lock().await.session.connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.lock().await.session.disconnect().await
    }

    async fn get(&self, skip_cache: bool) -> Result<ValueMap> {
        async {
            let mut inner = self.inner.lock().await;
            let state = self.read_status(&mut inner, skip_cache).await?;
            Ok(self.codec.status_map(&state))
        }
        .instrument(self.span("get"))
        .await
    }

    async fn set(&self, values: &ValueMap) -> Result<()> {
        let settings = Settings::from_map(values)?;
        self.apply(settings).await
    }

    async fn pair(&self) -> Result<()> {
        async {
            let mut inner = self.inner.lock().await;
            let address = inner.session.address();

            let result = match inner.session.connect_with(false).await {
                Ok(()) => {
                    let result = self.pair_steps(&mut inner.session).await;
                    let closed = inner.session.disconnect().await;
                    finish(result, closed)
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    info!("Paired with {}", address);
                    Ok(())
                }
                Err(e) => {
                    error!("Pairing with {} failed: {}", address, e);
                    Err(DeviceError::Pair(e.to_string()))
                }
            }
        }
        .instrument(self.span("pair"))
        .await
    }

    async fn connection_status(&self) -> &'static str {
        if self.inner.lock().await.session.is_connected().await {
            STATUS_CONNECTED
        } else {
            STATUS_DISCONNECTED
        }
    }
}
