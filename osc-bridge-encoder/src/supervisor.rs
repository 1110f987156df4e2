//! Supervised access to the encoder link.
//!
//! [`ConnectionSupervisor`] is the only path to the device. It serializes
//! every exchange behind one FIFO mutex (the RTU line is half-duplex),
//! reconnects with bounded retries, tracks consecutive failures to move the
//! link between connected, degraded and disconnected, and runs a background
//! loop that keeps retrying a lost link and probes an idle one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use osc_bridge_common::{LinkSnapshot, LinkState};
use tokio::sync::{Mutex, Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ModbusConfig, SerialConfig};
use crate::error::{LinkError, TransportError};
use crate::link::{Connector, RegisterTransport};

/// Reconnect, retry and probe policy.
#[derive(Debug, Clone)]
pub struct SupervisorPolicy {
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub background_retry_interval: Duration,
    pub call_attempts: u32,
    pub call_backoff: Duration,
    pub call_timeout: Duration,
    pub degrade_after: u32,
    pub disconnect_after: u32,
    pub probe_interval: Duration,
    pub probe_register: u16,
}

impl SupervisorPolicy {
    pub fn from_config(modbus: &ModbusConfig, serial: &SerialConfig) -> Self {
        Self {
            max_retries: modbus.max_retries,
            retry_interval: modbus.retry_interval(),
            background_retry_interval: modbus.background_retry_interval(),
            call_attempts: modbus.call_attempts,
            call_backoff: modbus.call_backoff(),
            call_timeout: serial.timeout(),
            degrade_after: modbus.degrade_after,
            disconnect_after: modbus.disconnect_after,
            probe_interval: modbus.health_check_interval(),
            probe_register: modbus.probe_register,
        }
    }
}

/// A register operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    ReadHolding { address: u16, count: u16 },
    WriteSingle { address: u16, value: u16 },
}

type Slot = Option<Box<dyn RegisterTransport>>;

#[derive(Debug, Default)]
struct Health {
    consecutive_failures: u32,
    calls_total: u64,
    failures_total: u64,
    reconnects: u64,
    last_success: i64,
    last_error: Option<String>,
}

/// Owns the device link and arbitrates access to it.
pub struct ConnectionSupervisor {
    connector: Box<dyn Connector>,
    policy: SupervisorPolicy,
    /// The open transport. Holding this lock is holding the line.
    slot: Mutex<Slot>,
    health: Mutex<Health>,
    /// Set when a full reconnect cycle failed; cleared on success.
    exhausted: AtomicBool,
    state: watch::Sender<LinkState>,
    wake: Notify,
    epoch: Instant,
    last_activity_ms: AtomicU64,
    last_attempt_ms: AtomicU64,
}

impl ConnectionSupervisor {
    pub fn new(connector: impl Connector, policy: SupervisorPolicy) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            connector: Box::new(connector),
            policy,
            slot: Mutex::new(None),
            health: Mutex::new(Health::default()),
            exhausted: AtomicBool::new(false),
            state,
            wake: Notify::new(),
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            last_attempt_ms: AtomicU64::new(0),
        }
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Receive every link state transition.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Health counters and state.
    pub async fn snapshot(&self) -> LinkSnapshot {
        let health = self.health.lock().await;
        LinkSnapshot {
            state: self.state(),
            consecutive_failures: health.consecutive_failures,
            calls_total: health.calls_total,
            failures_total: health.failures_total,
            reconnects: health.reconnects,
            last_success: health.last_success,
            last_error: health.last_error.clone(),
        }
    }

    /// Read `count` holding registers.
    pub async fn read_holding(&self, address: u16, count: u16) -> Result<Vec<u16>, LinkError> {
        self.call(Request::ReadHolding { address, count }).await
    }

    /// Write one holding register.
    pub async fn write_single(&self, address: u16, value: u16) -> Result<(), LinkError> {
        self.call(Request::WriteSingle { address, value })
            .await
            .map(|_| ())
    }

    /// Perform one register operation.
    ///
    /// Callers queue in arrival order. A disconnected link is reconnected
    /// first unless a reconnect cycle has already been exhausted, in which
    /// case the call fails fast and the background loop keeps trying.
    pub async fn call(&self, request: Request) -> Result<Vec<u16>, LinkError> {
        if self.state() == LinkState::Disconnected && self.exhausted.load(Ordering::Acquire) {
            return Err(self.unavailable().await);
        }

        let mut slot = self.slot.lock().await;
        if slot.is_none() {
            if self.exhausted.load(Ordering::Acquire) {
                return Err(self.unavailable().await);
            }
            self.reconnect_cycle(&mut slot).await?;
        }

        self.exchange(&mut slot, request).await
    }

    /// Drop the current link and run a fresh reconnect cycle.
    pub async fn force_reconnect(&self) -> Result<LinkState, LinkError> {
        let mut slot = self.slot.lock().await;
        if slot.take().is_some() {
            info!("Dropping link for requested reconnect");
        }
        self.exhausted.store(false, Ordering::Release);
        self.reconnect_cycle(&mut slot).await?;
        Ok(self.state())
    }

    /// Background maintenance until cancelled: retries a lost link and
    /// probes an idle one.
    pub async fn supervise(self: Arc<Self>, cancel: CancellationToken) {
        info!(link = %self.connector.describe(), "Link supervisor started");

        loop {
            let delay = tokio::select! {
                _ = cancel.cancelled() => break,
                delay = self.maintain() => delay,
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!("Link supervisor stopped");
    }

    /// One maintenance step. Returns how long to wait before the next one.
    async fn maintain(&self) -> Duration {
        if self.state().is_up() {
            let idle = self.idle_for();
            if idle < self.policy.probe_interval {
                return self.policy.probe_interval - idle;
            }
            // Never queue behind application calls just to probe.
            if let Ok(mut slot) = self.slot.try_lock()
                && slot.is_some()
            {
                let probe = Request::ReadHolding {
                    address: self.policy.probe_register,
                    count: 1,
                };
                match self.exchange(&mut slot, probe).await {
                    Ok(_) => debug!("Health probe ok"),
                    Err(e) => warn!(error = %e, "Health probe failed"),
                }
            }
            return self.policy.probe_interval;
        }

        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return self.policy.probe_interval;
        }

        if !self.exhausted.load(Ordering::Acquire) {
            let _ = self.reconnect_cycle(&mut slot).await;
            return self.policy.background_retry_interval;
        }

        let since = self.millis_since(&self.last_attempt_ms);
        let interval = self.policy.background_retry_interval;
        if since < interval {
            return interval - since;
        }

        debug!("Background reconnect attempt");
        match self.open().await {
            Ok(transport) => {
                *slot = Some(transport);
                self.on_connected().await;
            }
            Err(e) => debug!(error = %e, "Background reconnect failed"),
        }
        interval
    }

    async fn reconnect_cycle(&self, slot: &mut Slot) -> Result<(), LinkError> {
        self.set_state(LinkState::Connecting);
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_retries {
            match self.open().await {
                Ok(transport) => {
                    *slot = Some(transport);
                    self.on_connected().await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max = self.policy.max_retries,
                        error = %e,
                        "Connect attempt failed"
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < self.policy.max_retries {
                tokio::time::sleep(self.policy.retry_interval).await;
            }
        }

        self.exhausted.store(true, Ordering::Release);
        self.health.lock().await.last_error = Some(last_error.clone());
        self.set_state(LinkState::Disconnected);
        Err(LinkError::LinkUnavailable(format!(
            "reconnect failed after {} attempt(s): {}",
            self.policy.max_retries, last_error
        )))
    }

    /// Open a transport and check it with a probe read.
    async fn open(&self) -> Result<Box<dyn RegisterTransport>, TransportError> {
        self.last_attempt_ms.store(self.now_ms(), Ordering::Relaxed);

        let mut transport = tokio::time::timeout(self.policy.call_timeout, self.connector.connect())
            .await
            .map_err(|_| TransportError::Timeout)??;

        tokio::time::timeout(
            self.policy.call_timeout,
            transport.read_holding(self.policy.probe_register, 1),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        Ok(transport)
    }

    async fn on_connected(&self) {
        self.exhausted.store(false, Ordering::Release);
        {
            let mut health = self.health.lock().await;
            health.reconnects += 1;
            health.consecutive_failures = 0;
            health.last_success = chrono::Utc::now().timestamp_millis();
        }
        self.touch_activity();
        self.set_state(LinkState::Connected);
    }

    async fn exchange(&self, slot: &mut Slot, request: Request) -> Result<Vec<u16>, LinkError> {
        let attempts = self.policy.call_attempts;

        for attempt in 1..=attempts {
            let Some(transport) = slot.as_mut() else {
                return Err(LinkError::LinkUnavailable("link lost".to_string()));
            };

            self.touch_activity();
            let result = tokio::time::timeout(self.policy.call_timeout, perform(transport, request))
                .await
                .unwrap_or(Err(TransportError::Timeout));

            match result {
                Ok(values) => {
                    self.record_success().await;
                    return Ok(values);
                }
                Err(TransportError::Exception(e)) => {
                    // The device answered, so the link itself is fine.
                    self.record_success().await;
                    return Err(LinkError::DeviceException(e));
                }
                Err(e) if e.is_link_loss() => {
                    self.record_failure(&e).await;
                    self.mark_lost(slot, &e);
                    return Err(LinkError::LinkUnavailable(e.to_string()));
                }
                Err(e) => {
                    if self.record_failure(&e).await {
                        self.mark_lost(slot, &e);
                        return Err(LinkError::LinkUnavailable(format!(
                            "link dropped after repeated failures: {}",
                            e
                        )));
                    }
                    debug!(attempt, attempts, error = %e, "Exchange failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.call_backoff * attempt).await;
                    }
                }
            }
        }

        Err(LinkError::TransportTimeout { attempts })
    }

    async fn record_success(&self) {
        {
            let mut health = self.health.lock().await;
            health.calls_total += 1;
            health.consecutive_failures = 0;
            health.last_success = chrono::Utc::now().timestamp_millis();
        }
        if self.state() == LinkState::Degraded {
            self.set_state(LinkState::Connected);
        }
    }

    /// Count a failed exchange. Returns true when the link should be torn down.
    async fn record_failure(&self, error: &TransportError) -> bool {
        let failures = {
            let mut health = self.health.lock().await;
            health.calls_total += 1;
            health.failures_total += 1;
            health.consecutive_failures += 1;
            health.last_error = Some(error.to_string());
            health.consecutive_failures
        };

        if failures >= self.policy.disconnect_after {
            return true;
        }
        if failures >= self.policy.degrade_after && self.state() == LinkState::Connected {
            self.set_state(LinkState::Degraded);
        }
        false
    }

    fn mark_lost(&self, slot: &mut Slot, error: &TransportError) {
        *slot = None;
        self.exhausted.store(false, Ordering::Release);
        warn!(error = %error, "Link lost");
        self.set_state(LinkState::Disconnected);
        self.wake.notify_one();
    }

    async fn unavailable(&self) -> LinkError {
        let last = self.health.lock().await.last_error.clone();
        LinkError::LinkUnavailable(match last {
            Some(e) => format!("link down, retrying in background: {}", e),
            None => "link down, retrying in background".to_string(),
        })
    }

    fn set_state(&self, next: LinkState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });

        if changed {
            match next {
                LinkState::Connected => info!(link = %self.connector.describe(), "Link connected"),
                LinkState::Connecting => info!("Link connecting"),
                LinkState::Degraded => warn!("Link degraded"),
                LinkState::Disconnected => warn!("Link disconnected"),
            }
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn millis_since(&self, mark: &AtomicU64) -> Duration {
        Duration::from_millis(self.now_ms().saturating_sub(mark.load(Ordering::Relaxed)))
    }

    fn touch_activity(&self) {
        self.last_activity_ms.store(self.now_ms(), Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        self.millis_since(&self.last_activity_ms)
    }
}

async fn perform(
    transport: &mut Box<dyn RegisterTransport>,
    request: Request,
) -> Result<Vec<u16>, TransportError> {
    match request {
        Request::ReadHolding { address, count } => {
            let values = transport.read_holding(address, count).await?;
            if values.len() != usize::from(count) {
                return Err(TransportError::Protocol(format!(
                    "expected {} register(s), got {}",
                    count,
                    values.len()
                )));
            }
            Ok(values)
        }
        Request::WriteSingle { address, value } => {
            transport.write_single(address, value).await?;
            Ok(Vec::new())
        }
    }
}
