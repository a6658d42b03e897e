//! Time-stamped observations and the bounded, time-ordered buffer that holds
//! them between ticks.
//!
//! Samples may arrive out of order; they are placed by binary search so that
//! every window slice is sorted. Anything older than the retention horizon is
//! dropped and counted instead of stored.

use crate::error::sanitize_non_negative;

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Shape of an injected anomalous arrival component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistributionKind {
    Gaussian,
    Exponential,
    Poisson,
    Pareto,
}

impl DistributionKind {
    pub const ALL: [Self; 4] = [
        Self::Gaussian,
        Self::Exponential,
        Self::Poisson,
        Self::Pareto,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gaussian => "gaussian",
            Self::Exponential => "exponential",
            Self::Poisson => "poisson",
            Self::Pareto => "pareto",
        }
    }

    /// Parse a distribution name (case-insensitive). Unknown names are `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gaussian" | "normal" => Some(Self::Gaussian),
            "exponential" | "exp" => Some(Self::Exponential),
            "poisson" => Some(Self::Poisson),
            "pareto" => Some(Self::Pareto),
            _ => None,
        }
    }
}

/// Which traffic component produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficTag {
    Background,
    Anomalous(DistributionKind),
}

impl TrafficTag {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Anomalous(kind) => kind.as_str(),
        }
    }

    #[must_use]
    pub const fn is_anomalous(self) -> bool {
        matches!(self, Self::Anomalous(_))
    }
}

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

/// Anything that sits on the timeline.
pub trait Timestamped {
    fn timestamp(&self) -> f64;
}

/// Transactions offered to the service at `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrivalSample {
    pub timestamp: f64,
    pub count: f64,
    pub is_anomalous: bool,
    pub tag: TrafficTag,
}

impl ArrivalSample {
    #[must_use]
    pub const fn background(timestamp: f64, count: f64) -> Self {
        Self {
            timestamp,
            count,
            is_anomalous: false,
            tag: TrafficTag::Background,
        }
    }

    #[must_use]
    pub const fn anomalous(timestamp: f64, count: f64, kind: DistributionKind) -> Self {
        Self {
            timestamp,
            count,
            is_anomalous: true,
            tag: TrafficTag::Anomalous(kind),
        }
    }
}

/// Observed service time of one transaction (seconds).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceTimeSample {
    pub timestamp: f64,
    pub seconds: f64,
}

/// End-to-end processing latency (milliseconds), and whether the request
/// was rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySample {
    pub timestamp: f64,
    pub millis: f64,
    pub blocked: bool,
}

/// Host resource utilization, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub timestamp: f64,
    pub cpu: f64,
    pub ram: f64,
}

impl ResourceSample {
    /// Combined utilization `U = max(cpu, ram)`.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        self.cpu.max(self.ram)
    }
}

impl Timestamped for ArrivalSample {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

impl Timestamped for ServiceTimeSample {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

impl Timestamped for LatencySample {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

impl Timestamped for ResourceSample {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// One ingested observation of any kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    Arrival(ArrivalSample),
    ServiceTime(ServiceTimeSample),
    Latency(LatencySample),
    Resource(ResourceSample),
}

impl Observation {
    #[must_use]
    pub fn timestamp(&self) -> f64 {
        match self {
            Self::Arrival(s) => s.timestamp,
            Self::ServiceTime(s) => s.timestamp,
            Self::Latency(s) => s.timestamp,
            Self::Resource(s) => s.timestamp,
        }
    }

    /// Clamp non-finite or negative measured values to 0.
    ///
    /// Returns `true` if anything was clamped.
    pub fn sanitize(&mut self) -> bool {
        match self {
            Self::Arrival(s) => {
                let (v, bad) = sanitize_non_negative(s.count);
                s.count = v;
                bad
            }
            Self::ServiceTime(s) => {
                let (v, bad) = sanitize_non_negative(s.seconds);
                s.seconds = v;
                bad
            }
            Self::Latency(s) => {
                let (v, bad) = sanitize_non_negative(s.millis);
                s.millis = v;
                bad
            }
            Self::Resource(s) => {
                let (cpu, bad_cpu) = sanitize_non_negative(s.cpu);
                let (ram, bad_ram) = sanitize_non_negative(s.ram);
                s.cpu = cpu;
                s.ram = ram;
                bad_cpu || bad_ram
            }
        }
    }
}

impl From<ArrivalSample> for Observation {
    fn from(s: ArrivalSample) -> Self {
        Self::Arrival(s)
    }
}

impl From<ServiceTimeSample> for Observation {
    fn from(s: ServiceTimeSample) -> Self {
        Self::ServiceTime(s)
    }
}

impl From<LatencySample> for Observation {
    fn from(s: LatencySample) -> Self {
        Self::Latency(s)
    }
}

impl From<ResourceSample> for Observation {
    fn from(s: ResourceSample) -> Self {
        Self::Resource(s)
    }
}

// ---------------------------------------------------------------------------
// Buffer
// ---------------------------------------------------------------------------

/// Timestamp-sorted sample store with a moving retention horizon.
#[derive(Debug, Clone)]
pub struct SampleBuffer<T> {
    samples: Vec<T>,
    horizon: f64,
    stale_dropped: u64,
}

impl<T: Timestamped> SampleBuffer<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            horizon: f64::NEG_INFINITY,
            stale_dropped: 0,
        }
    }

    /// Insert in timestamp order. Samples strictly older than the horizon are
    /// dropped; returns whether the sample was kept.
    pub fn insert(&mut self, sample: T) -> bool {
        let ts = sample.timestamp();
        if ts < self.horizon {
            self.stale_dropped += 1;
            return false;
        }
        let idx = self.samples.partition_point(|s| s.timestamp() <= ts);
        self.samples.insert(idx, sample);
        true
    }

    /// Move the horizon forward (never backward) and evict what fell behind it.
    pub fn advance_horizon(&mut self, horizon: f64) {
        if horizon <= self.horizon {
            return;
        }
        self.horizon = horizon;
        let cut = self.samples.partition_point(|s| s.timestamp() < horizon);
        self.samples.drain(..cut);
    }

    /// Samples with `now - width < t <= now`.
    #[must_use]
    pub fn window(&self, now: f64, width: f64) -> &[T] {
        let lo = self.samples.partition_point(|s| s.timestamp() <= now - width);
        let hi = self.samples.partition_point(|s| s.timestamp() <= now);
        &self.samples[lo..hi.max(lo)]
    }

    #[must_use]
    pub fn latest_timestamp(&self) -> Option<f64> {
        self.samples.last().map(Timestamped::timestamp)
    }

    #[must_use]
    pub fn horizon(&self) -> f64 {
        self.horizon
    }

    #[must_use]
    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.samples
    }
}

impl<T: Timestamped> Default for SampleBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrival(t: f64) -> ArrivalSample {
        ArrivalSample::background(t, 1.0)
    }

    #[test]
    fn out_of_order_inserts_are_sorted() {
        let mut buf = SampleBuffer::new();
        for t in [3.0, 1.0, 2.0, 5.0, 4.0] {
            assert!(buf.insert(arrival(t)));
        }
        let ts: Vec<f64> = buf.as_slice().iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn window_is_half_open_on_the_left() {
        let mut buf = SampleBuffer::new();
        for t in 0..=10 {
            buf.insert(arrival(f64::from(t)));
        }
        let w = buf.window(10.0, 5.0);
        let ts: Vec<f64> = w.iter().map(|s| s.timestamp).collect();
        assert_eq!(ts, vec![6.0, 7.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn window_before_any_sample_is_empty() {
        let mut buf = SampleBuffer::new();
        buf.insert(arrival(100.0));
        assert!(buf.window(50.0, 10.0).is_empty());
    }

    #[test]
    fn horizon_evicts_and_rejects_stale() {
        let mut buf = SampleBuffer::new();
        for t in 0..10 {
            buf.insert(arrival(f64::from(t)));
        }
        buf.advance_horizon(5.0);
        assert_eq!(buf.len(), 5);
        assert!(!buf.insert(arrival(4.5)));
        assert_eq!(buf.stale_dropped(), 1);
        assert!(buf.insert(arrival(5.0)));
    }

    #[test]
    fn horizon_never_moves_backward() {
        let mut buf: SampleBuffer<ArrivalSample> = SampleBuffer::new();
        buf.advance_horizon(10.0);
        buf.advance_horizon(3.0);
        assert_eq!(buf.horizon(), 10.0);
    }

    #[test]
    fn sanitize_clamps_counts() {
        let mut obs = Observation::from(ArrivalSample::background(1.0, f64::NAN));
        assert!(obs.sanitize());
        match obs {
            Observation::Arrival(s) => assert_eq!(s.count, 0.0),
            _ => unreachable!(),
        }
        let mut ok = Observation::from(ServiceTimeSample {
            timestamp: 1.0,
            seconds: 0.01,
        });
        assert!(!ok.sanitize());
    }

    #[test]
    fn resource_utilization_is_max() {
        let r = ResourceSample {
            timestamp: 0.0,
            cpu: 0.4,
            ram: 0.7,
        };
        assert_eq!(r.utilization(), 0.7);
    }

    #[test]
    fn distribution_names_parse() {
        for kind in DistributionKind::ALL {
            assert_eq!(DistributionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(DistributionKind::parse("uniform"), None);
        assert_eq!(
            TrafficTag::Anomalous(DistributionKind::Pareto).as_str(),
            "pareto"
        );
        assert!(!TrafficTag::Background.is_anomalous());
    }
}
