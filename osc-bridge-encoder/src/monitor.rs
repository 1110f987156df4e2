//! Per-session monitor tasks.
//!
//! A monitor polls the encoder on a fixed interval and pushes samples to its
//! session's return address. The session registry owns the monitor handle;
//! the task only holds a cancellation token and asks the registry before
//! every emission, which also filters duplicate samples.

use std::sync::Arc;
use std::time::{Duration, Instant};

use osc_bridge_common::{ErrorKind, OutputFormat};
use osc_bridge_framework::{
    Emission, MIN_INTERVAL, MonitorHandle, MonitorInfo, OscTransmitter, SessionKey,
    SessionRegistry, UnknownTask,
};
use rosc::OscType;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::format::{self, SampleSource};
use crate::poller::EncoderPoller;

/// Path of link-status notices and task-ended notices.
pub const STATUS_PATH: &str = "encoder/status";

/// Settings shared by every monitor task.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub device_name: String,
    pub slave_address: u8,
    /// Minimum spacing of link-unavailable notices.
    pub degraded_notice: Duration,
    /// Consecutive non-link failures that end a task.
    pub max_consecutive_errors: u32,
}

/// Starts and stops monitor tasks.
#[derive(Clone)]
pub struct MonitorScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<SessionRegistry>,
    poller: Arc<EncoderPoller>,
    transmitter: OscTransmitter,
    settings: MonitorSettings,
    shutdown: CancellationToken,
}

/// Result of a start request.
#[derive(Debug, Clone)]
pub struct Started {
    pub info: MonitorInfo,
    /// The monitor this one replaced, if any.
    pub replaced: Option<MonitorInfo>,
}

impl MonitorScheduler {
    /// Monitors are children of `shutdown` and stop with it.
    pub fn new(
        registry: Arc<SessionRegistry>,
        poller: Arc<EncoderPoller>,
        transmitter: OscTransmitter,
        settings: MonitorSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                poller,
                transmitter,
                settings,
                shutdown,
            }),
        }
    }

    /// Start a monitor for `session`, replacing any running one.
    ///
    /// Returns as soon as the task is spawned; samples arrive on their own.
    pub async fn start(
        &self,
        session: SessionKey,
        interval: Duration,
        format: OutputFormat,
    ) -> Started {
        let handle = MonitorHandle::new(interval, format, &self.inner.shutdown);
        let info = handle.info().clone();
        let cancel = handle.token();

        let replaced = self.inner.registry.install_monitor(session, handle).await;
        if let Some(old) = &replaced {
            info!(session = %session, task_id = %old.id, "Replacing monitor");
        }
        info!(
            session = %session,
            task_id = %info.id,
            interval_ms = interval.as_millis() as u64,
            format = %format,
            "Monitor started"
        );

        let inner = self.inner.clone();
        tokio::spawn(inner.run(session, info.clone(), cancel));

        Started { info, replaced }
    }

    /// Stop the session's monitor, optionally only if it is `task_id`.
    pub async fn stop(
        &self,
        session: SessionKey,
        task_id: Option<Uuid>,
    ) -> Result<Option<MonitorInfo>, UnknownTask> {
        let stopped = self.inner.registry.stop_monitor(session, task_id).await?;
        if let Some(info) = &stopped {
            info!(session = %session, task_id = %info.id, "Monitor stopped");
        }
        Ok(stopped)
    }

    /// Every running monitor.
    pub async fn list(&self) -> Vec<(SessionKey, MonitorInfo)> {
        self.inner.registry.monitors().await
    }
}

impl Inner {
    async fn run(self: Arc<Self>, session: SessionKey, info: MonitorInfo, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(info.interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let source = SampleSource {
            device_name: &self.settings.device_name,
            slave_address: self.settings.slave_address,
            task_id: info.id,
        };
        let path = format::data_path(info.format);
        let mut errors = 0u32;
        let mut last_notice: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // An exchange in flight is allowed to finish; cancellation is
            // observed at the next tick or by the registry below.
            let result = self.poller.poll().await;

            match result {
                Ok(sample) => {
                    last_notice = None;
                    match self
                        .registry
                        .record_emission(session, info.id, sample.fingerprint())
                        .await
                    {
                        Emission::Send(target) => {
                            match format::render(info.format, &sample, source) {
                                Ok(args) => {
                                    errors = 0;
                                    if let Err(e) =
                                        self.transmitter.send_device(target, path, args).await
                                    {
                                        warn!(task_id = %info.id, error = %e, "Monitor send failed");
                                    }
                                }
                                Err(e) => {
                                    errors += 1;
                                    warn!(task_id = %info.id, error = %e, "Failed to render sample");
                                }
                            }
                        }
                        Emission::Duplicate => {
                            errors = 0;
                        }
                        Emission::Stale => break,
                    }
                }
                Err(e) if e.is_link_down() => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let due = last_notice.is_none_or(|at| at.elapsed() >= self.settings.degraded_notice);
                    if due {
                        debug!(task_id = %info.id, error = %e, "Link unavailable during monitor");
                        self.notify(session, ErrorKind::LinkUnavailable.as_str(), &e.to_string())
                            .await;
                        last_notice = Some(Instant::now());
                    }
                }
                Err(e) => {
                    errors += 1;
                    warn!(task_id = %info.id, error = %e, errors, "Monitor read failed");
                }
            }

            if errors >= self.settings.max_consecutive_errors {
                error!(
                    session = %session,
                    task_id = %info.id,
                    errors,
                    "Monitor stopped after repeated failures"
                );
                if !cancel.is_cancelled() {
                    self.notify(session, "monitor_stopped", &info.id.to_string())
                        .await;
                }
                break;
            }
        }

        self.registry.release_monitor(session, info.id).await;
        debug!(session = %session, task_id = %info.id, "Monitor task exited");
    }

    async fn notify(&self, session: SessionKey, status: &str, message: &str) {
        let Some(target) = self.registry.get(session).await.map(|s| s.return_addr) else {
            return;
        };
        let args = vec![
            OscType::String(status.to_string()),
            OscType::String(message.to_string()),
        ];
        if let Err(e) = self.transmitter.send_device(target, STATUS_PATH, args).await {
            warn!(error = %e, "Failed to send monitor notice");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderConfig;
    use crate::encoder::EncoderModel;
    use crate::registers;
    use crate::simulated::SimulatedEncoder;
    use crate::supervisor::{ConnectionSupervisor, SupervisorPolicy};
    use osc_bridge_framework::packet::decode_datagram;
    use osc_bridge_framework::OscMessage;
    use tokio::net::UdpSocket;

    struct Harness {
        sim: SimulatedEncoder,
        registry: Arc<SessionRegistry>,
        scheduler: MonitorScheduler,
        client: UdpSocket,
        key: SessionKey,
    }

    async fn harness(max_errors: u32) -> Harness {
        let sim = SimulatedEncoder::new(4096, 100, 1);
        let policy = SupervisorPolicy {
            max_retries: 1,
            retry_interval: Duration::from_millis(5),
            background_retry_interval: Duration::from_secs(60),
            call_attempts: 1,
            call_backoff: Duration::from_millis(1),
            call_timeout: Duration::from_millis(50),
            degrade_after: 3,
            disconnect_after: 6,
            probe_interval: Duration::from_secs(30),
            probe_register: registers::DEVICE_ADDRESS,
        };
        let link = Arc::new(ConnectionSupervisor::new(sim.clone(), policy));
        let poller = Arc::new(EncoderPoller::new(
            link,
            EncoderModel::new(&EncoderConfig::default()),
        ));

        let registry = Arc::new(SessionRegistry::new(None, OutputFormat::Osc));
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let transmitter = OscTransmitter::new(socket, "rig");
        let settings = MonitorSettings {
            device_name: "rig".to_string(),
            slave_address: 1,
            degraded_notice: Duration::from_secs(5),
            max_consecutive_errors: max_errors,
        };
        let scheduler = MonitorScheduler::new(
            registry.clone(),
            poller,
            transmitter,
            settings,
            CancellationToken::new(),
        );

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let key = client.local_addr().unwrap();
        registry.touch(key).await;

        Harness {
            sim,
            registry,
            scheduler,
            client,
            key,
        }
    }

    async fn recv(client: &UdpSocket, within: Duration) -> Option<OscMessage> {
        let mut buf = [0u8; 2048];
        let (len, _) = tokio::time::timeout(within, client.recv_from(&mut buf))
            .await
            .ok()?
            .ok()?;
        decode_datagram(&buf[..len]).ok()?.into_iter().next()
    }

    #[tokio::test]
    async fn test_duplicates_are_suppressed() {
        let h = harness(5).await;
        h.scheduler
            .start(h.key, Duration::from_millis(20), OutputFormat::Osc)
            .await;

        let first = recv(&h.client, Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.addr, "/rig/encoder/data");
        assert_eq!(first.args.len(), 8);

        // Nothing moves, so nothing more is sent.
        assert!(recv(&h.client, Duration::from_millis(120)).await.is_none());

        h.sim.set_position(2048).await;
        let changed = recv(&h.client, Duration::from_secs(1)).await.unwrap();
        assert_eq!(changed.args[6], OscType::Int(2048));
    }

    #[tokio::test]
    async fn test_restart_leaves_one_task() {
        let h = harness(5).await;
        let first = h
            .scheduler
            .start(h.key, Duration::from_millis(20), OutputFormat::Osc)
            .await;
        let second = h
            .scheduler
            .start(h.key, Duration::from_millis(30), OutputFormat::Text)
            .await;

        assert_eq!(second.replaced.map(|m| m.id), Some(first.info.id));
        let monitors = h.scheduler.list().await;
        assert_eq!(monitors.len(), 1);
        assert_eq!(monitors[0].1.id, second.info.id);
        assert_eq!(monitors[0].1.format, OutputFormat::Text);

        let message = recv(&h.client, Duration::from_secs(1)).await.unwrap();
        assert_eq!(message.addr, "/rig/text");
    }

    #[tokio::test]
    async fn test_stop_silences_monitor() {
        let h = harness(5).await;
        h.sim.set_speed(100).await;
        let started = h
            .scheduler
            .start(h.key, Duration::from_millis(20), OutputFormat::Osc)
            .await;
        assert!(recv(&h.client, Duration::from_secs(1)).await.is_some());

        let stopped = h.scheduler.stop(h.key, None).await.unwrap();
        assert_eq!(stopped.map(|m| m.id), Some(started.info.id));

        // Drain anything sent before the stop landed.
        tokio::time::sleep(Duration::from_millis(60)).await;
        while recv(&h.client, Duration::from_millis(10)).await.is_some() {}
        assert!(recv(&h.client, Duration::from_millis(100)).await.is_none());
    }

    #[tokio::test]
    async fn test_link_loss_sends_notice_and_keeps_running() {
        let h = harness(5).await;
        h.scheduler
            .start(h.key, Duration::from_millis(20), OutputFormat::Osc)
            .await;
        recv(&h.client, Duration::from_secs(1)).await.unwrap();

        h.sim.set_offline(true).await;
        let notice = recv(&h.client, Duration::from_secs(1)).await.unwrap();
        assert_eq!(notice.addr, "/rig/encoder/status");
        assert_eq!(notice.args[0], OscType::String("link_unavailable".into()));

        // Throttled: no second notice right away, and the task is alive.
        assert!(recv(&h.client, Duration::from_millis(100)).await.is_none());
        assert_eq!(h.scheduler.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_bad_readings_end_task() {
        let h = harness(2).await;
        h.sim.set_position(9999).await;
        h.scheduler
            .start(h.key, Duration::from_millis(10), OutputFormat::Osc)
            .await;

        let notice = recv(&h.client, Duration::from_secs(1)).await.unwrap();
        assert_eq!(notice.args[0], OscType::String("monitor_stopped".into()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.registry.monitors().await.is_empty());
    }
}
