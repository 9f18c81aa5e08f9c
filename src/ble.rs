use async_trait::async_trait;
use btleplug::{
    api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter},
    platform::{Adapter, Manager, Peripheral},
};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{PowerMeterError, Result},
    types::{DeviceInfo, SessionConfig},
};

/// Receiving end of the bounded notification queue
///
/// Frames arrive in the order the peripheral sent them. An `Err` item means
/// the transport failed mid-stream; a closed channel means the link is gone.
pub type NotificationReceiver = mpsc::Receiver<Result<Bytes>>;

/// How often the peripheral list is re-checked during discovery
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Host-side BLE stack used to find and connect to a power meter
#[async_trait]
pub trait BleHost: Send + Sync {
    /// Connection type produced by [`connect`](Self::connect)
    type Connection: MeterConnection;

    /// Scan for a peripheral whose advertised name equals `device_name`
    ///
    /// # Errors
    ///
    /// Returns [`PowerMeterError::DeviceNotFound`] when no match appears
    /// within `scan_timeout`.
    async fn discover(&self, device_name: &str, scan_timeout: Duration) -> Result<DeviceInfo>;

    /// Connect to a discovered peripheral
    ///
    /// # Errors
    ///
    /// Returns [`PowerMeterError::ConnectionFailed`] or
    /// [`PowerMeterError::Timeout`] when the link cannot be established.
    async fn connect(
        &self,
        device: &DeviceInfo,
        config: &SessionConfig,
    ) -> Result<Self::Connection>;
}

/// An established link to a power meter
///
/// A connection whose owner is dropped before [`close`](Self::close)
/// completes is torn down through
/// [`release_detached`](Self::release_detached).
#[async_trait]
pub trait MeterConnection: Send {
    /// Subscribe to a characteristic, delivering notifications through a
    /// queue holding at most `buffer` frames
    ///
    /// # Errors
    ///
    /// Returns [`PowerMeterError::SubscribeFailed`] if the subscription is refused.
    async fn subscribe(
        &mut self,
        characteristic: Uuid,
        buffer: usize,
    ) -> Result<NotificationReceiver>;

    /// Stop notifications for a characteristic
    ///
    /// # Errors
    ///
    /// Returns [`PowerMeterError::Ble`] if the host stack rejects the request.
    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<()>;

    /// Close the link
    ///
    /// # Errors
    ///
    /// Returns [`PowerMeterError::Ble`] if disconnection fails.
    async fn close(&mut self) -> Result<()>;

    /// Unsubscribe from `subscription` (when given) and close the link
    /// without awaiting
    ///
    /// Called from `Drop` when the owning session is cancelled mid-flight.
    /// Must not block; implementations hand the work to the runtime.
    fn release_detached(&mut self, subscription: Option<Uuid>);
}

/// [`BleHost`] backed by the platform Bluetooth stack via `btleplug`
pub struct BtleplugHost {
    manager: Manager,
    peripherals: Arc<Mutex<HashMap<String, Peripheral>>>,
}

impl BtleplugHost {
    /// Create a new host
    ///
    /// # Errors
    ///
    /// Returns [`PowerMeterError::Ble`] if the Bluetooth manager cannot be initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;

        Ok(Self {
            manager,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn central(&self) -> Result<Adapter> {
        self.manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(PowerMeterError::NoAdapter)
    }

    /// Look for a peripheral advertising exactly `device_name`
    async fn find_by_name(
        central: &Adapter,
        device_name: &str,
    ) -> Result<Option<(Peripheral, DeviceInfo)>> {
        for peripheral in central.peripherals().await? {
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };

            if properties.local_name.as_deref() == Some(device_name) {
                let info = DeviceInfo {
                    name: device_name.to_string(),
                    address: peripheral.address().to_string(),
                    rssi: properties.rssi,
                };
                return Ok(Some((peripheral, info)));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl BleHost for BtleplugHost {
    type Connection = BtleplugConnection;

    async fn discover(&self, device_name: &str, scan_timeout: Duration) -> Result<DeviceInfo> {
        let central = self.central().await?;
        central.start_scan(ScanFilter::default()).await?;
        debug!("Scanning for up to {}ms", scan_timeout.as_millis());

        let scan = timeout(scan_timeout, async {
            loop {
                if let Some(found) = Self::find_by_name(&central, device_name).await? {
                    return Ok::<_, PowerMeterError>(found);
                }
                sleep(SCAN_POLL_INTERVAL).await;
            }
        })
        .await;

        if let Err(e) = central.stop_scan().await {
            warn!("Failed to stop scan: {e}");
        }

        match scan {
            Ok(Ok((peripheral, info))) => {
                self.peripherals
                    .lock()
                    .await
                    .insert(info.address.clone(), peripheral);
                Ok(info)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PowerMeterError::DeviceNotFound {
                name: device_name.to_string(),
            }),
        }
    }

    async fn connect(
        &self,
        device: &DeviceInfo,
        config: &SessionConfig,
    ) -> Result<Self::Connection> {
        let peripheral = self
            .peripherals
            .lock()
            .await
            .get(&device.address)
            .cloned()
            .ok_or_else(|| PowerMeterError::DeviceNotFound {
                name: device.name.clone(),
            })?;

        timeout(config.connect_timeout(), peripheral.connect())
            .await
            .map_err(|_| PowerMeterError::Timeout {
                timeout_ms: config.connect_timeout_ms,
            })?
            .map_err(|e| PowerMeterError::ConnectionFailed(e.to_string()))?;

        let characteristic = match locate_characteristic(&peripheral, config).await {
            Ok(characteristic) => characteristic,
            Err(e) => {
                if let Err(disconnect_err) = peripheral.disconnect().await {
                    warn!("Failed to disconnect after setup error: {disconnect_err}");
                }
                return Err(e);
            }
        };

        info!("Connected to {device}");

        Ok(BtleplugConnection {
            peripheral,
            characteristic,
            forwarder: None,
            subscribed: false,
            closed: false,
        })
    }
}

/// Find the power measurement characteristic inside the cycling power service
async fn locate_characteristic(
    peripheral: &Peripheral,
    config: &SessionConfig,
) -> Result<Characteristic> {
    peripheral
        .discover_services()
        .await
        .map_err(|e| PowerMeterError::ConnectionFailed(format!("Service discovery failed: {e}")))?;

    let services = peripheral.services();
    let service = services
        .iter()
        .find(|s| s.uuid == config.service_uuid)
        .ok_or_else(|| {
            PowerMeterError::ConnectionFailed("Cycling power service not found".to_string())
        })?;

    service
        .characteristics
        .iter()
        .find(|c| c.uuid == config.characteristic_uuid)
        .cloned()
        .ok_or_else(|| {
            PowerMeterError::ConnectionFailed(
                "Power measurement characteristic not found".to_string(),
            )
        })
}

/// Active `btleplug` link to a power meter
pub struct BtleplugConnection {
    peripheral: Peripheral,
    characteristic: Characteristic,
    forwarder: Option<JoinHandle<()>>,
    subscribed: bool,
    closed: bool,
}

impl BtleplugConnection {
    fn stop_forwarder(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

#[async_trait]
impl MeterConnection for BtleplugConnection {
    async fn subscribe(
        &mut self,
        characteristic: Uuid,
        buffer: usize,
    ) -> Result<NotificationReceiver> {
        if characteristic != self.characteristic.uuid {
            return Err(PowerMeterError::SubscribeFailed(format!(
                "Characteristic {characteristic} was not resolved on this device"
            )));
        }

        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| PowerMeterError::SubscribeFailed(e.to_string()))?;

        self.peripheral
            .subscribe(&self.characteristic)
            .await
            .map_err(|e| PowerMeterError::SubscribeFailed(e.to_string()))?;

        let (sender, receiver) = mpsc::channel(buffer);
        self.stop_forwarder();
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                if sender.send(Ok(Bytes::from(notification.value))).await.is_err() {
                    break;
                }
            }
            debug!("Notification stream for {characteristic} ended");
        }));
        self.subscribed = true;

        Ok(receiver)
    }

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<()> {
        self.stop_forwarder();

        if characteristic == self.characteristic.uuid {
            self.subscribed = false;
            self.peripheral.unsubscribe(&self.characteristic).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.stop_forwarder();
        self.closed = true;
        self.peripheral.disconnect().await?;
        Ok(())
    }

    fn release_detached(&mut self, subscription: Option<Uuid>) {
        self.stop_forwarder();
        if self.closed {
            return;
        }
        self.closed = true;
        self.subscribed = false;

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                "No async runtime available, {} left connected",
                self.peripheral.address()
            );
            return;
        };

        let peripheral = self.peripheral.clone();
        let characteristic = subscription
            .filter(|uuid| *uuid == self.characteristic.uuid)
            .map(|_| self.characteristic.clone());
        handle.spawn(async move {
            if let Some(characteristic) = characteristic {
                if let Err(e) = peripheral.unsubscribe(&characteristic).await {
                    warn!("Failed to unsubscribe during teardown: {e}");
                }
            }
            if let Err(e) = peripheral.disconnect().await {
                warn!("Failed to disconnect during teardown: {e}");
            }
        });
    }
}

impl Drop for BtleplugConnection {
    fn drop(&mut self) {
        let subscription = self.subscribed.then_some(self.characteristic.uuid);
        self.release_detached(subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CYCLING_POWER_SERVICE_UUID, POWER_MEASUREMENT_CHAR_UUID};

    #[test]
    fn test_protocol_uuids() {
        assert_eq!(
            CYCLING_POWER_SERVICE_UUID,
            Uuid::parse_str("00001818-0000-1000-8000-00805f9b34fb").unwrap()
        );
        assert_eq!(
            POWER_MEASUREMENT_CHAR_UUID,
            Uuid::parse_str("00002a63-0000-1000-8000-00805f9b34fb").unwrap()
        );
    }
}
