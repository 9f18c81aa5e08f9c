use std::{future::Future, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    ble::{BleHost, BtleplugHost, MeterConnection, NotificationReceiver},
    cadence::CadenceTracker,
    error::{PowerMeterError, Result},
    protocol::decode_frame,
    types::{PowerReading, SessionConfig, SessionSummary, StopReason},
};

/// Destination for decoded readings
pub trait ReadingSink {
    /// Receive one reading
    fn emit(&mut self, reading: &PowerReading);
}

impl<F> ReadingSink for F
where
    F: FnMut(&PowerReading),
{
    fn emit(&mut self, reading: &PowerReading) {
        self(reading);
    }
}

/// Prints one line per reading to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl ReadingSink for ConsoleSink {
    fn emit(&mut self, reading: &PowerReading) {
        println!("{reading}");
    }
}

/// Streams power and cadence readings from one power meter
///
/// A session finds the configured device by name, connects, subscribes to
/// power measurement notifications and decodes them for a bounded window.
/// Notifications are handled one at a time in arrival order, and the
/// session keeps a single [`CadenceTracker`] for its whole lifetime.
///
/// Once a connection exists it is always unsubscribed and closed before
/// `run` returns, whatever the outcome.
///
/// # Examples
///
/// ```no_run
/// use crankpower::{ConsoleSink, PowerMeterSession};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut session = PowerMeterSession::from_env().await?;
///     let summary = session.run(Duration::from_secs(30), &mut ConsoleSink).await?;
///     println!("{} readings", summary.readings_emitted);
///     Ok(())
/// }
/// ```
pub struct PowerMeterSession<H: BleHost> {
    host: H,
    config: SessionConfig,
    tracker: CadenceTracker,
}

impl PowerMeterSession<BtleplugHost> {
    /// Create a session on the platform Bluetooth stack, configured from the environment
    ///
    /// # Errors
    ///
    /// Returns [`PowerMeterError::Ble`] if the Bluetooth manager cannot be initialized.
    pub async fn from_env() -> Result<Self> {
        let host = BtleplugHost::new().await?;
        Ok(Self::new(host, SessionConfig::from_env()))
    }
}

impl<H: BleHost> PowerMeterSession<H> {
    /// Create a session over the given host stack
    #[must_use]
    pub const fn new(host: H, config: SessionConfig) -> Self {
        Self {
            host,
            config,
            tracker: CadenceTracker::new(),
        }
    }

    /// Session configuration
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Cadence tracker state
    #[must_use]
    pub const fn tracker(&self) -> &CadenceTracker {
        &self.tracker
    }

    /// Decode one notification into a reading
    ///
    /// Frames too short to carry power produce nothing. Crank data, when
    /// present, is fed to the session's cadence tracker.
    pub fn handle_frame(&mut self, frame: &[u8]) -> Option<PowerReading> {
        let Some(decoded) = decode_frame(frame) else {
            debug!(len = frame.len(), "Skipping short power measurement frame");
            return None;
        };

        let cadence_rpm = decoded.crank.and_then(|event| self.tracker.observe(event));

        Some(PowerReading {
            power_watts: decoded.power.power_watts,
            cadence_rpm,
        })
    }

    /// Collect readings for the configured collection duration
    ///
    /// # Errors
    ///
    /// See [`run_until`](Self::run_until).
    pub async fn run_configured<S>(&mut self, sink: &mut S) -> Result<SessionSummary>
    where
        S: ReadingSink + ?Sized,
    {
        let duration = self.config.collection_duration;
        self.run(duration, sink).await
    }

    /// Collect readings for `duration`
    ///
    /// # Errors
    ///
    /// See [`run_until`](Self::run_until).
    pub async fn run<S>(&mut self, duration: Duration, sink: &mut S) -> Result<SessionSummary>
    where
        S: ReadingSink + ?Sized,
    {
        self.run_until(duration, sink, std::future::pending()).await
    }

    /// Collect readings for `duration`, or until `shutdown` completes
    ///
    /// # Errors
    ///
    /// - [`PowerMeterError::InvalidConfig`] if the configuration is rejected
    /// - [`PowerMeterError::DeviceNotFound`] if discovery finds no matching device
    /// - [`PowerMeterError::ConnectionFailed`] or [`PowerMeterError::Timeout`] if connecting fails
    /// - [`PowerMeterError::SubscribeFailed`] if notifications cannot be enabled
    /// - [`PowerMeterError::Notification`] or [`PowerMeterError::Disconnected`] if the
    ///   notification stream fails mid-collection
    pub async fn run_until<S, F>(
        &mut self,
        duration: Duration,
        sink: &mut S,
        shutdown: F,
    ) -> Result<SessionSummary>
    where
        S: ReadingSink + ?Sized,
        F: Future<Output = ()>,
    {
        self.config.validate()?;

        let device_name = self.config.device_name.clone();
        info!("Searching for {device_name}...");
        let device = match self
            .host
            .discover(&device_name, self.config.scan_timeout())
            .await
        {
            Ok(device) => device,
            Err(e) => {
                error!("{device_name} not found: {e}");
                return Err(e);
            }
        };
        info!("Found: {device}");

        info!("Connecting...");
        let connection = self.host.connect(&device, &self.config).await.map_err(|e| {
            error!("Failed to connect to {device}: {e}");
            e
        })?;
        let mut connection = ConnectionGuard::new(connection);

        let characteristic = self.config.characteristic_uuid;
        let notifications = match connection
            .subscribe(characteristic, self.config.notification_buffer)
            .await
        {
            Ok(notifications) => notifications,
            Err(e) => {
                error!("Failed to subscribe to {characteristic}: {e}");
                if let Err(close_err) = connection.release().await {
                    warn!("Failed to close connection: {close_err}");
                }
                return Err(e);
            }
        };

        info!("Starting {} seconds data collection...", duration.as_secs());
        let outcome = self.collect(notifications, duration, sink, shutdown).await;
        let cleanup = connection.release().await;

        match outcome {
            Ok(summary) => {
                if let Err(cleanup_err) = cleanup {
                    warn!("Cleanup after collection failed: {cleanup_err}");
                }
                info!(
                    readings = summary.readings_emitted,
                    skipped = summary.frames_skipped,
                    "Collection finished ({})",
                    summary.stop_reason
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(cleanup_err) = cleanup {
                    warn!("Cleanup after failed collection also failed: {cleanup_err}");
                }
                Err(e)
            }
        }
    }

    async fn collect<S, F>(
        &mut self,
        mut notifications: NotificationReceiver,
        duration: Duration,
        sink: &mut S,
        shutdown: F,
    ) -> Result<SessionSummary>
    where
        S: ReadingSink + ?Sized,
        F: Future<Output = ()>,
    {
        let mut summary = SessionSummary::new();
        let deadline = sleep(duration);
        tokio::pin!(deadline);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!("Collection cancelled");
                    summary.stop_reason = StopReason::Cancelled;
                    break;
                }
                () = &mut deadline => break,
                notification = notifications.recv() => match notification {
                    Some(Ok(frame)) => {
                        summary.frames_received += 1;
                        match self.handle_frame(&frame) {
                            Some(reading) => {
                                summary.readings_emitted += 1;
                                if reading.cadence_rpm.is_some() {
                                    summary.cadence_readings += 1;
                                }
                                sink.emit(&reading);
                            }
                            None => summary.frames_skipped += 1,
                        }
                    }
                    Some(Err(e)) => {
                        error!("Notification stream failed: {e}");
                        return Err(e);
                    }
                    None => {
                        warn!("Notification stream closed before collection finished");
                        return Err(PowerMeterError::Disconnected);
                    }
                },
            }
        }

        Ok(summary)
    }
}

/// Owns a connection for the length of a run
///
/// Each teardown step is issued at most once. Whatever has not been issued
/// when the guard is dropped goes through
/// [`MeterConnection::release_detached`].
struct ConnectionGuard<C: MeterConnection> {
    connection: C,
    subscription: Option<Uuid>,
    open: bool,
}

impl<C: MeterConnection> ConnectionGuard<C> {
    const fn new(connection: C) -> Self {
        Self {
            connection,
            subscription: None,
            open: true,
        }
    }

    async fn subscribe(
        &mut self,
        characteristic: Uuid,
        buffer: usize,
    ) -> Result<NotificationReceiver> {
        let notifications = self.connection.subscribe(characteristic, buffer).await?;
        self.subscription = Some(characteristic);
        Ok(notifications)
    }

    /// Unsubscribe (if subscribed) then close, attempting both even if the first fails
    async fn release(&mut self) -> Result<()> {
        let unsubscribed = match self.subscription.take() {
            Some(characteristic) => {
                let result = self.connection.unsubscribe(characteristic).await;
                if let Err(e) = &result {
                    warn!("Failed to unsubscribe from {characteristic}: {e}");
                }
                result
            }
            None => Ok(()),
        };

        if !self.open {
            return unsubscribed;
        }
        self.open = false;
        let closed = self.connection.close().await;
        unsubscribed.and(closed)
    }
}

impl<C: MeterConnection> Drop for ConnectionGuard<C> {
    fn drop(&mut self) {
        if self.open {
            warn!("Session dropped before cleanup, releasing connection in the background");
            self.open = false;
            self.connection.release_detached(self.subscription.take());
        }
    }
}
