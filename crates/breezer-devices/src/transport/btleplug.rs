/*!
 * Transport over the platform BLE stack, via `btleplug`.
 *
 * The peripheral must already be known to the adapter (seen by an earlier
 * scan, or bonded); this transport never scans.
 */
use std::fmt;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, WriteType};
use btleplug::platform::{Manager, Peripheral};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uuid::Uuid;

use breezer_core::utils::spawn_and_log;

use super::{NotificationSink, Transport, TransportResult};
use crate::error::TransportError;

impl From<btleplug::Error> for TransportError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::NotConnected => TransportError::NotConnected,
            btleplug::Error::DeviceNotFound | btleplug::Error::TimedOut(_) => {
                TransportError::Disconnected(err.to_string())
            }
            btleplug::Error::RuntimeError(_) => TransportError::Disconnected(err.to_string()),
            btleplug::Error::NotSupported(_) | btleplug::Error::PermissionDenied => {
                TransportError::Gatt(err.to_string())
            }
            other => TransportError::Other(other.to_string()),
        }
    }
}

/// A breezer reached through `btleplug`
pub struct BtleplugTransport {
    peripheral: Peripheral,
    address: String,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for BtleplugTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BtleplugTransport")
            .field("address", &self.address)
            .finish()
    }
}

impl BtleplugTransport {
    /// Wrap a peripheral
    pub fn new(peripheral: Peripheral) -> Self {
        let address = peripheral.address().to_string();
        Self {
            peripheral,
            address,
            pump: Mutex::new(None),
        }
    }

    /// Look up a peripheral the adapters already know by its address
    pub async fn find(address: &str) -> TransportResult<Self> {
        let manager = Manager::new().await?;
        for adapter in manager.adapters().await? {
            for peripheral in adapter.peripherals().await? {
                if peripheral.address().to_string().eq_ignore_ascii_case(address) {
                    debug!("Found {} on {:?}", address, adapter.adapter_info().await.ok());
                    return Ok(Self::new(peripheral));
                }
            }
        }
        Err(TransportError::Other(format!("{} is not known to any adapter", address)))
    }

    fn characteristic(&self, uuid: Uuid) -> TransportResult<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| TransportError::CharacteristicNotFound(uuid.to_string()))
    }

    fn stop_pump(&self) {
        let handle = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        self.peripheral.connect().await?;
        self.peripheral.discover_services().await?;
        debug!(
            "Discovered {} characteristics on {}",
            self.peripheral.characteristics().len(),
            self.address
        );
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.stop_pump();
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> TransportResult<()> {
        let target = self.characteristic(characteristic)?;
        trace!("Writing {:02x?} to {}", data, characteristic);
        self.peripheral
            .write(&target, data, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid, sink: NotificationSink) -> TransportResult<()> {
        let target = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&target).await?;
        let mut stream = self.peripheral.notifications().await?;

        let handle = spawn_and_log("notification pump", async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                if !sink.deliver(&notification.value) && sink.is_closed() {
                    break;
                }
            }
            Ok::<(), TransportError>(())
        });

        let previous = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }
}
