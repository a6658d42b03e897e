//! BLAKE3 fingerprints over the IEEE-754 bit patterns of tick results.
//!
//! Two runs with the same configuration, seed and samples must produce the
//! same fingerprint; any bit-level drift in a snapshot or vector changes it.

use crate::monitor::TickRecord;
use crate::queueing::QueueingSnapshot;
use crate::vrps::StabilityVector;

/// 32-byte BLAKE3 digest.
pub type Fingerprint = [u8; 32];

fn put_f64(h: &mut blake3::Hasher, x: f64) {
    h.update(&x.to_bits().to_le_bytes());
}

fn hash_snapshot(h: &mut blake3::Hasher, s: &QueueingSnapshot) {
    for x in [
        s.arrival_rate,
        s.offered_load,
        s.utilization,
        s.wait_probability,
        s.blocking_probability,
        s.loss_fraction,
        s.expected_wait,
        s.expected_time_to_failure,
        s.expected_queue_length,
        s.throughput,
        s.service_cv2,
    ] {
        put_f64(h, x);
    }
    h.update(&[u8::from(s.input_clamped)]);
}

fn hash_vector(h: &mut blake3::Hasher, v: &StabilityVector) {
    for x in v.components {
        put_f64(h, x);
    }
    put_f64(h, v.sust);
    put_f64(h, v.anomaly_ratio);
    h.update(&[v.status.index()]);
}

#[must_use]
pub fn snapshot_fingerprint(snapshot: &QueueingSnapshot) -> Fingerprint {
    let mut h = blake3::Hasher::new();
    hash_snapshot(&mut h, snapshot);
    *h.finalize().as_bytes()
}

/// Fingerprint of a whole trajectory: time, snapshot, vector and decision of
/// every record, in order.
#[must_use]
pub fn trajectory_fingerprint(records: &[TickRecord]) -> Fingerprint {
    let mut h = blake3::Hasher::new();
    h.update(&(records.len() as u64).to_le_bytes());
    for r in records {
        put_f64(&mut h, r.timestamp);
        hash_snapshot(&mut h, &r.snapshot);
        hash_vector(&mut h, &r.vector);
        h.update(&[
            r.decision.mode.number(),
            u8::from(r.decision.valid),
            r.decision.triggering_component.index() as u8,
        ]);
    }
    *h.finalize().as_bytes()
}

/// Lowercase hex rendering.
#[must_use]
pub fn to_hex(fp: &Fingerprint) -> String {
    fp.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueingConfig;
    use crate::queueing::{LossAccumulator, QueueingModel};

    fn snap(lambda: f64) -> QueueingSnapshot {
        let m = QueueingModel::new(QueueingConfig::default()).unwrap();
        m.snapshot(lambda, &[], lambda, &mut LossAccumulator::new())
    }

    #[test]
    fn same_input_same_fingerprint() {
        assert_eq!(snapshot_fingerprint(&snap(500.0)), snapshot_fingerprint(&snap(500.0)));
    }

    #[test]
    fn one_ulp_changes_fingerprint() {
        let a = snap(500.0);
        let mut b = a;
        b.utilization = f64::from_bits(a.utilization.to_bits() + 1);
        assert_ne!(snapshot_fingerprint(&a), snapshot_fingerprint(&b));
    }

    #[test]
    fn empty_trajectory_is_stable() {
        assert_eq!(trajectory_fingerprint(&[]), trajectory_fingerprint(&[]));
        assert_eq!(to_hex(&trajectory_fingerprint(&[])).len(), 64);
    }
}
