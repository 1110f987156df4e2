//! Client session tracking.
//!
//! One [`Session`] exists per client socket address. The registry is the
//! sole owner of session records and of each session's monitor handle;
//! monitor tasks only hold a cancellation token and consult the registry
//! before every emission.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use osc_bridge_common::OutputFormat;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Sessions are keyed by the client's source address.
pub type SessionKey = SocketAddr;

/// Hash of the observable content of an emitted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Fingerprint any hashable value.
    pub fn of<T: Hash>(value: &T) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        Self(hasher.finish())
    }
}

/// Public description of a running monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorInfo {
    pub id: Uuid,
    pub interval: Duration,
    pub format: OutputFormat,
    /// Start time (millis since epoch).
    pub started_at: i64,
}

/// A monitor registration: its description plus the token that stops it.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    info: MonitorInfo,
    cancel: CancellationToken,
}

impl MonitorHandle {
    /// Create a handle whose token is a child of `parent`, so shutting down
    /// the parent stops the monitor too.
    pub fn new(interval: Duration, format: OutputFormat, parent: &CancellationToken) -> Self {
        Self {
            info: MonitorInfo {
                id: Uuid::new_v4(),
                interval,
                format,
                started_at: chrono::Utc::now().timestamp_millis(),
            },
            cancel: parent.child_token(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.info.id
    }

    pub fn info(&self) -> &MonitorInfo {
        &self.info
    }

    /// Token the monitor task observes between ticks.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Snapshot of a session record.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub key: SessionKey,
    /// Where replies and monitor data are sent.
    pub return_addr: SocketAddr,
    pub created_at: Instant,
    pub last_seen: Instant,
    /// Format used when a monitor is started without one.
    pub format: OutputFormat,
    pub monitor: Option<MonitorInfo>,
}

#[derive(Debug)]
struct SessionEntry {
    return_addr: SocketAddr,
    created_at: Instant,
    last_seen: Instant,
    format: OutputFormat,
    monitor: Option<MonitorHandle>,
    last_fingerprint: Option<Fingerprint>,
}

impl SessionEntry {
    fn snapshot(&self, key: SessionKey) -> Session {
        Session {
            key,
            return_addr: self.return_addr,
            created_at: self.created_at,
            last_seen: self.last_seen,
            format: self.format,
            monitor: self.monitor.as_ref().map(|m| m.info.clone()),
        }
    }

    fn take_monitor(&mut self) -> Option<MonitorInfo> {
        let handle = self.monitor.take()?;
        handle.cancel();
        self.last_fingerprint = None;
        Some(handle.info)
    }
}

/// What a monitor task should do with a freshly computed sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    /// Send to this address.
    Send(SocketAddr),
    /// Same content as the last emission; skip it.
    Duplicate,
    /// The task is no longer the session's monitor; exit.
    Stale,
}

/// A stop request named a task this session is not running.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no monitor task {requested} for this session")]
pub struct UnknownTask {
    pub requested: Uuid,
    pub current: Option<Uuid>,
}

/// Registry of client sessions.
///
/// All mutation goes through one async mutex, so `touch` and
/// `expire_stale` interleave rather than race.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, SessionEntry>>,
    return_port: Option<u16>,
    default_format: OutputFormat,
}

impl SessionRegistry {
    /// Create a registry.
    ///
    /// Replies go to the client IP at `return_port`, or to the source port
    /// when `return_port` is `None`.
    pub fn new(return_port: Option<u16>, default_format: OutputFormat) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            return_port,
            default_format,
        }
    }

    fn return_addr_for(&self, key: SessionKey) -> SocketAddr {
        SocketAddr::new(key.ip(), self.return_port.unwrap_or(key.port()))
    }

    /// Create or refresh the session for a client.
    pub async fn touch(&self, key: SessionKey) -> Session {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.entry(key).or_insert_with(|| {
            tracing::info!(session = %key, "New client session");
            SessionEntry {
                return_addr: self.return_addr_for(key),
                created_at: now,
                last_seen: now,
                format: self.default_format,
                monitor: None,
                last_fingerprint: None,
            }
        });
        entry.last_seen = now;
        entry.snapshot(key)
    }

    pub async fn get(&self, key: SessionKey) -> Option<Session> {
        let sessions = self.sessions.lock().await;
        sessions.get(&key).map(|entry| entry.snapshot(key))
    }

    pub async fn all(&self) -> Vec<Session> {
        let sessions = self.sessions.lock().await;
        sessions
            .iter()
            .map(|(key, entry)| entry.snapshot(*key))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Return addresses of every session, for broadcasts.
    pub async fn return_addresses(&self) -> Vec<SocketAddr> {
        let sessions = self.sessions.lock().await;
        sessions.values().map(|entry| entry.return_addr).collect()
    }

    /// Remove sessions idle for longer than `ttl` as of `now`, cancelling
    /// their monitors. Returns the removed keys.
    pub async fn expire_stale(&self, now: Instant, ttl: Duration) -> Vec<SessionKey> {
        let mut sessions = self.sessions.lock().await;
        let stale: Vec<SessionKey> = sessions
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_seen) > ttl)
            .map(|(key, _)| *key)
            .collect();

        for key in &stale {
            if let Some(mut entry) = sessions.remove(key) {
                let monitor = entry.take_monitor();
                tracing::info!(
                    session = %key,
                    monitor = ?monitor.map(|m| m.id),
                    "Session expired"
                );
            }
        }

        stale
    }

    /// Set the default output format for a session.
    pub async fn set_format(&self, key: SessionKey, format: OutputFormat) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&key) {
            Some(entry) => {
                entry.format = format;
                true
            }
            None => false,
        }
    }

    /// Install a monitor, cancelling and returning any previous one.
    ///
    /// The session is created if it expired since the command arrived.
    pub async fn install_monitor(
        &self,
        key: SessionKey,
        handle: MonitorHandle,
    ) -> Option<MonitorInfo> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.entry(key).or_insert_with(|| SessionEntry {
            return_addr: self.return_addr_for(key),
            created_at: now,
            last_seen: now,
            format: self.default_format,
            monitor: None,
            last_fingerprint: None,
        });

        let previous = entry.take_monitor();
        entry.format = handle.info.format;
        entry.monitor = Some(handle);
        previous
    }

    /// Stop the session's monitor.
    ///
    /// With `task_id`, only a matching monitor is stopped. Returns the stopped
    /// monitor, or `None` when nothing was running.
    pub async fn stop_monitor(
        &self,
        key: SessionKey,
        task_id: Option<Uuid>,
    ) -> Result<Option<MonitorInfo>, UnknownTask> {
        let mut sessions = self.sessions.lock().await;
        let Some(entry) = sessions.get_mut(&key) else {
            return match task_id {
                Some(requested) => Err(UnknownTask {
                    requested,
                    current: None,
                }),
                None => Ok(None),
            };
        };

        let current = entry.monitor.as_ref().map(MonitorHandle::id);
        match (task_id, current) {
            (Some(requested), current) if Some(requested) != current => {
                Err(UnknownTask { requested, current })
            }
            _ => Ok(entry.take_monitor()),
        }
    }

    /// Drop a monitor registration from the task side, if it is still current.
    pub async fn release_monitor(&self, key: SessionKey, task_id: Uuid) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&key) {
            Some(entry) if entry.monitor.as_ref().map(MonitorHandle::id) == Some(task_id) => {
                entry.take_monitor();
                true
            }
            _ => false,
        }
    }

    /// Decide whether a monitor should emit a sample with this fingerprint,
    /// recording it when it should.
    pub async fn record_emission(
        &self,
        key: SessionKey,
        task_id: Uuid,
        fingerprint: Fingerprint,
    ) -> Emission {
        let mut sessions = self.sessions.lock().await;
        let Some(entry) = sessions.get_mut(&key) else {
            return Emission::Stale;
        };

        match &entry.monitor {
            Some(handle) if handle.id() == task_id && !handle.cancel.is_cancelled() => {}
            _ => return Emission::Stale,
        }

        if entry.last_fingerprint == Some(fingerprint) {
            Emission::Duplicate
        } else {
            entry.last_fingerprint = Some(fingerprint);
            Emission::Send(entry.return_addr)
        }
    }

    /// Every running monitor with its session.
    pub async fn monitors(&self) -> Vec<(SessionKey, MonitorInfo)> {
        let sessions = self.sessions.lock().await;
        sessions
            .iter()
            .filter_map(|(key, entry)| entry.monitor.as_ref().map(|m| (*key, m.info.clone())))
            .collect()
    }

    /// Cancel every monitor and drop every session. Returns the return
    /// addresses of the dropped sessions.
    pub async fn clear(&self) -> Vec<SocketAddr> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .drain()
            .map(|(_, mut entry)| {
                entry.take_monitor();
                entry.return_addr
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn handle(parent: &CancellationToken) -> MonitorHandle {
        MonitorHandle::new(Duration::from_millis(500), OutputFormat::Osc, parent)
    }

    #[tokio::test]
    async fn test_touch_creates_then_refreshes() {
        let registry = SessionRegistry::new(Some(9999), OutputFormat::Osc);

        let first = registry.touch(addr(5000)).await;
        assert_eq!(first.return_addr, addr(9999));
        assert_eq!(registry.len().await, 1);

        let second = registry.touch(addr(5000)).await;
        assert_eq!(second.created_at, first.created_at);
        assert!(second.last_seen >= first.last_seen);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_return_to_source_port() {
        let registry = SessionRegistry::new(None, OutputFormat::Text);
        let session = registry.touch(addr(5123)).await;
        assert_eq!(session.return_addr, addr(5123));
        assert_eq!(session.format, OutputFormat::Text);
    }

    #[tokio::test]
    async fn test_expire_stale_cancels_monitor() {
        let registry = SessionRegistry::new(None, OutputFormat::Osc);
        let root = CancellationToken::new();
        let ttl = Duration::from_secs(300);

        registry.touch(addr(1)).await;
        registry.touch(addr(2)).await;
        let monitor = handle(&root);
        let token = monitor.token();
        registry.install_monitor(addr(1), monitor).await;

        // Nothing is stale yet.
        assert!(registry.expire_stale(Instant::now(), ttl).await.is_empty());

        let later = Instant::now() + ttl + Duration::from_secs(1);
        let mut expired = registry.expire_stale(later, ttl).await;
        expired.sort();
        assert_eq!(expired, vec![addr(1), addr(2)]);
        assert!(token.is_cancelled());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_touch_keeps_session_alive() {
        let registry = SessionRegistry::new(None, OutputFormat::Osc);
        let ttl = Duration::from_millis(50);

        registry.touch(addr(1)).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        registry.touch(addr(1)).await;

        assert!(registry.expire_stale(Instant::now(), ttl).await.is_empty());
        assert!(registry.get(addr(1)).await.is_some());
    }

    #[tokio::test]
    async fn test_install_replaces_previous_monitor() {
        let registry = SessionRegistry::new(None, OutputFormat::Osc);
        let root = CancellationToken::new();
        registry.touch(addr(1)).await;

        let first = handle(&root);
        let first_token = first.token();
        let first_id = first.id();
        assert!(registry.install_monitor(addr(1), first).await.is_none());

        let second = MonitorHandle::new(Duration::from_secs(1), OutputFormat::Json, &root);
        let second_id = second.id();
        let replaced = registry.install_monitor(addr(1), second).await;

        assert_eq!(replaced.map(|m| m.id), Some(first_id));
        assert!(first_token.is_cancelled());

        let monitors = registry.monitors().await;
        assert_eq!(monitors.len(), 1);
        assert_eq!(monitors[0].1.id, second_id);
        assert_eq!(monitors[0].1.interval, Duration::from_secs(1));
        assert_eq!(
            registry.get(addr(1)).await.unwrap().format,
            OutputFormat::Json
        );
    }

    #[tokio::test]
    async fn test_stop_monitor_by_id() {
        let registry = SessionRegistry::new(None, OutputFormat::Osc);
        let root = CancellationToken::new();
        let monitor = handle(&root);
        let id = monitor.id();
        registry.install_monitor(addr(1), monitor).await;

        let wrong = Uuid::new_v4();
        let err = registry.stop_monitor(addr(1), Some(wrong)).await.unwrap_err();
        assert_eq!(err.current, Some(id));

        let stopped = registry.stop_monitor(addr(1), Some(id)).await.unwrap();
        assert_eq!(stopped.map(|m| m.id), Some(id));

        // Stopping again is a no-op.
        assert_eq!(registry.stop_monitor(addr(1), None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_record_emission_suppresses_duplicates() {
        let registry = SessionRegistry::new(None, OutputFormat::Osc);
        let root = CancellationToken::new();
        let monitor = handle(&root);
        let id = monitor.id();
        registry.install_monitor(addr(1), monitor).await;

        let a = Fingerprint::of(&(1i8, 100i64, 0i64, 0i64));
        let b = Fingerprint::of(&(1i8, 101i64, 0i64, 0i64));

        assert_eq!(
            registry.record_emission(addr(1), id, a).await,
            Emission::Send(addr(1))
        );
        assert_eq!(
            registry.record_emission(addr(1), id, a).await,
            Emission::Duplicate
        );
        assert_eq!(
            registry.record_emission(addr(1), id, b).await,
            Emission::Send(addr(1))
        );
    }

    #[tokio::test]
    async fn test_replaced_task_is_stale() {
        let registry = SessionRegistry::new(None, OutputFormat::Osc);
        let root = CancellationToken::new();
        let old = handle(&root);
        let old_id = old.id();
        registry.install_monitor(addr(1), old).await;
        let new = handle(&root);
        let new_id = new.id();
        registry.install_monitor(addr(1), new).await;

        let fp = Fingerprint::of(&0u8);
        assert_eq!(
            registry.record_emission(addr(1), old_id, fp).await,
            Emission::Stale
        );
        // The new task always emits its first sample.
        assert_eq!(
            registry.record_emission(addr(1), new_id, fp).await,
            Emission::Send(addr(1))
        );
        assert!(!registry.release_monitor(addr(1), old_id).await);
        assert!(registry.release_monitor(addr(1), new_id).await);
        assert!(registry.monitors().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_cancels_everything() {
        let registry = SessionRegistry::new(Some(9000), OutputFormat::Osc);
        let root = CancellationToken::new();
        let monitor = handle(&root);
        let token = monitor.token();
        registry.install_monitor(addr(1), monitor).await;
        registry.touch(addr(2)).await;

        let targets = registry.clear().await;
        assert_eq!(targets.len(), 2);
        assert!(token.is_cancelled());
        assert!(registry.is_empty().await);
    }
}
