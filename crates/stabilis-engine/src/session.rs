//! Session registry.
//!
//! Each session owns one [`StabilityMonitor`] behind its own mutex, so ticks
//! of different sessions run in parallel and never share mutable state. The
//! map itself sits behind an `RwLock`: lookups take the read lock, creation
//! takes the write lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::{MonitorConfig, QueueingConfig};
use crate::decision::ModeDecision;
use crate::error::{EngineError, Result};
use crate::metrics::EngineMetrics;
use crate::monitor::{IngestOutcome, StabilityMonitor, TickRecord};
use crate::samples::Observation;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

type SharedMonitor = Arc<Mutex<StabilityMonitor>>;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SharedMonitor>>,
    /// Used for sessions created implicitly by `ingest`.
    default_queueing: QueueingConfig,
    monitor: MonitorConfig,
    metrics: EngineMetrics,
}

impl SessionRegistry {
    pub fn new(default_queueing: QueueingConfig, monitor: MonitorConfig) -> Result<Self> {
        default_queueing.validate()?;
        monitor.validate()?;
        Ok(Self {
            sessions: RwLock::new(HashMap::new()),
            default_queueing,
            monitor,
            metrics: EngineMetrics::new(),
        })
    }

    #[must_use]
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn monitor_config(&self) -> &MonitorConfig {
        &self.monitor
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Sorted ids of all live sessions.
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Create a session. Returns `false` if it already existed, in which
    /// case its configuration is rebound when still possible.
    pub fn create(&self, id: SessionId, queueing: QueueingConfig) -> Result<bool> {
        if let Some(existing) = self.lookup(&id) {
            existing.lock().rebind_queueing(queueing)?;
            return Ok(false);
        }
        self.get_or_create(&id, queueing)?;
        Ok(true)
    }

    fn lookup(&self, id: &SessionId) -> Option<SharedMonitor> {
        self.sessions.read().get(id).cloned()
    }

    fn session(&self, id: &SessionId) -> Result<SharedMonitor> {
        self.lookup(id)
            .ok_or_else(|| EngineError::UnknownSession(id.clone()))
    }

    fn get_or_create(&self, id: &SessionId, queueing: QueueingConfig) -> Result<SharedMonitor> {
        // Fast path: already registered.
        if let Some(m) = self.lookup(id) {
            return Ok(m);
        }
        let fresh = StabilityMonitor::new(queueing, self.monitor)?;
        let mut sessions = self.sessions.write();
        let entry = sessions.entry(id.clone()).or_insert_with(|| {
            EngineMetrics::inc(&self.metrics.sessions_created);
            Arc::new(Mutex::new(fresh))
        });
        Ok(Arc::clone(entry))
    }

    /// Store one observation, creating the session with the default
    /// queueing configuration if needed.
    pub fn ingest(
        &self,
        id: &SessionId,
        observation: impl Into<Observation>,
    ) -> Result<IngestOutcome> {
        let session = self.get_or_create(id, self.default_queueing)?;
        let outcome = session.lock().ingest(observation);
        match &outcome {
            Ok(IngestOutcome::Accepted) => EngineMetrics::inc(&self.metrics.samples_ingested),
            Ok(IngestOutcome::Clamped) => {
                EngineMetrics::inc(&self.metrics.samples_ingested);
                EngineMetrics::inc(&self.metrics.samples_clamped);
            }
            Err(EngineError::StaleInput { .. }) => EngineMetrics::inc(&self.metrics.samples_stale),
            Err(_) => {}
        }
        outcome
    }

    /// Run one tick at the newest time the session has seen.
    pub fn evaluate(&self, id: &SessionId, queueing: &QueueingConfig) -> Result<ModeDecision> {
        self.tick_with(id, queueing, None)
    }

    /// Run one tick at an explicit time.
    pub fn evaluate_at(
        &self,
        id: &SessionId,
        queueing: &QueueingConfig,
        now: f64,
    ) -> Result<ModeDecision> {
        self.tick_with(id, queueing, Some(now))
    }

    fn tick_with(
        &self,
        id: &SessionId,
        queueing: &QueueingConfig,
        now: Option<f64>,
    ) -> Result<ModeDecision> {
        let session = self.get_or_create(id, *queueing)?;
        let mut monitor = session.lock();
        monitor.rebind_queueing(*queueing)?;
        let now = now.unwrap_or_else(|| monitor.default_tick_time());
        match monitor.tick(now) {
            Ok(decision) => {
                EngineMetrics::inc(&self.metrics.ticks_evaluated);
                if !decision.valid {
                    EngineMetrics::inc(&self.metrics.ticks_degraded);
                }
                if monitor.latest().is_some_and(|r| r.anomaly.is_anomaly()) {
                    EngineMetrics::inc(&self.metrics.anomalies_flagged);
                }
                Ok(decision)
            }
            Err(e) => {
                EngineMetrics::inc(&self.metrics.ticks_rejected);
                Err(e)
            }
        }
    }

    /// Copy of the tick records with `from_t ≤ t ≤ to_t`, oldest first.
    pub fn get_trajectory(&self, id: &SessionId, from_t: f64, to_t: f64) -> Result<Vec<TickRecord>> {
        let session = self.session(id)?;
        let monitor = session.lock();
        Ok(monitor.trajectory(from_t, to_t).cloned().collect())
    }

    /// Run `f` with shared access to one session's monitor.
    pub fn with_session<R>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&StabilityMonitor) -> R,
    ) -> Result<R> {
        let session = self.session(id)?;
        let monitor = session.lock();
        Ok(f(&monitor))
    }

    /// Drop a session and its trajectory. Returns whether it existed.
    pub fn remove(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().remove(id).is_some();
        if removed {
            EngineMetrics::inc(&self.metrics.sessions_removed);
        }
        removed
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            default_queueing: QueueingConfig::default(),
            monitor: MonitorConfig::default(),
            metrics: EngineMetrics::new(),
        }
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.session_ids())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::ArrivalSample;

    fn id(s: &str) -> SessionId {
        SessionId::new(s)
    }

    #[test]
    fn unknown_session_trajectory_errors() {
        let reg = SessionRegistry::default();
        let err = reg.get_trajectory(&id("nope"), 0.0, 1.0).unwrap_err();
        assert_eq!(err, EngineError::UnknownSession(id("nope")));
        assert_eq!(err.to_string(), "unknown session: nope");
    }

    #[test]
    fn ingest_creates_session() {
        let reg = SessionRegistry::default();
        reg.ingest(&id("a"), ArrivalSample::background(1.0, 10.0))
            .unwrap();
        assert!(reg.contains(&id("a")));
        assert_eq!(reg.metrics().snapshot().sessions_created, 1);
        assert_eq!(reg.metrics().snapshot().samples_ingested, 1);
    }

    #[test]
    fn evaluate_uses_latest_sample_time() {
        let reg = SessionRegistry::default();
        let s = id("a");
        for t in 1..=10 {
            reg.ingest(&s, ArrivalSample::background(f64::from(t), 50.0))
                .unwrap();
        }
        let d = reg.evaluate(&s, &QueueingConfig::default()).unwrap();
        assert_eq!(d.timestamp, 10.0);
        let traj = reg.get_trajectory(&s, 0.0, 100.0).unwrap();
        assert_eq!(traj.len(), 1);
        assert!((traj[0].snapshot.arrival_rate - 50.0).abs() < 1e-12);
    }

    #[test]
    fn config_change_after_first_tick_is_rejected() {
        let reg = SessionRegistry::default();
        let s = id("a");
        reg.evaluate_at(&s, &QueueingConfig::default(), 0.0).unwrap();
        let other = QueueingConfig {
            service_rate: 50.0,
            ..QueueingConfig::default()
        };
        let err = reg.evaluate_at(&s, &other, 1.0).unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
        assert_eq!(reg.get_trajectory(&s, 0.0, 10.0).unwrap().len(), 1);
    }

    #[test]
    fn rejected_tick_is_counted() {
        let reg = SessionRegistry::default();
        let s = id("a");
        let q = QueueingConfig::default();
        reg.evaluate_at(&s, &q, 5.0).unwrap();
        assert!(reg.evaluate_at(&s, &q, 4.0).is_err());
        let m = reg.metrics().snapshot();
        assert_eq!(m.ticks_evaluated, 1);
        assert_eq!(m.ticks_rejected, 1);
    }

    #[test]
    fn stale_ingest_is_counted() {
        let reg = SessionRegistry::default();
        let s = id("a");
        reg.ingest(&s, ArrivalSample::background(100.0, 1.0)).unwrap();
        assert!(reg.ingest(&s, ArrivalSample::background(1.0, 1.0)).is_err());
        assert_eq!(reg.metrics().snapshot().samples_stale, 1);
    }

    #[test]
    fn remove_and_ids() {
        let reg = SessionRegistry::default();
        let q = QueueingConfig::default();
        assert!(reg.create(id("b"), q).unwrap());
        assert!(reg.create(id("a"), q).unwrap());
        assert!(!reg.create(id("a"), q).unwrap());
        assert_eq!(reg.session_ids(), vec![id("a"), id("b")]);
        assert!(reg.remove(&id("a")));
        assert!(!reg.remove(&id("a")));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.metrics().snapshot().sessions_removed, 1);
    }

    #[test]
    fn sessions_tick_in_parallel() {
        let reg = Arc::new(SessionRegistry::default());
        let q = QueueingConfig::default();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || {
                    let s = SessionId::new(format!("s{i}"));
                    for t in 1..=20 {
                        reg.ingest(&s, ArrivalSample::background(f64::from(t), 100.0))
                            .unwrap();
                        reg.evaluate(&s, &q).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.len(), 4);
        assert_eq!(reg.metrics().snapshot().ticks_evaluated, 80);
        for s in reg.session_ids() {
            assert_eq!(reg.get_trajectory(&s, 0.0, 100.0).unwrap().len(), 20);
        }
    }
}
