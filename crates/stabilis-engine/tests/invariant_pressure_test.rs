use std::sync::Arc;
use std::thread;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use stabilis_engine::config::{MarkovConfig, MonitorConfig, QueueingConfig, VrpsConfig};
use stabilis_engine::fingerprint::{snapshot_fingerprint, trajectory_fingerprint};
use stabilis_engine::markov::MarkovState;
use stabilis_engine::queueing::{LossAccumulator, estimate_arrival_rate};
use stabilis_engine::samples::{ArrivalSample, DistributionKind};
use stabilis_engine::traffic_flow::{AnomalyParams, AnomalyShape, BackgroundParams};
use stabilis_engine::vrps::VrpsInputs;
use stabilis_engine::{
    MarkovStateTracker, QueueingModel, SessionId, SessionRegistry, StabilityMonitor,
    StabilityVectorCalculator, TickRecord, TrafficFlowModel,
};

const SEEDS: [u64; 4] = [1, 2, 3, 4];

fn random_queue(rng: &mut ChaCha8Rng) -> QueueingConfig {
    QueueingConfig {
        server_count: rng.random_range(1..=32),
        queue_capacity: rng.random_range(0..=2000),
        service_rate: rng.random_range(1.0..500.0),
        rho_threshold: rng.random_range(0.05..0.99),
        ..QueueingConfig::default()
    }
}

#[test]
fn utilization_is_monotone_in_lambda() {
    for seed in SEEDS {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        for _ in 0..50 {
            let q = QueueingModel::new(random_queue(&mut rng)).expect("valid config");
            let mut prev = -1.0;
            let mut lambda = 0.0;
            for _ in 0..100 {
                lambda += rng.random_range(0.0..50.0);
                let rho = q.utilization(lambda);
                assert!(rho >= prev, "seed={seed}: rho {rho} < {prev} at lambda={lambda}");
                prev = rho;
            }
        }
    }
}

#[test]
fn blocking_is_non_decreasing_in_lambda() {
    for seed in SEEDS {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        for _ in 0..50 {
            let cfg = random_queue(&mut rng);
            let q = QueueingModel::new(cfg).expect("valid config");
            let cap = cfg.capacity();
            let mut prev = 0.0;
            for i in 0..=200 {
                let lambda = cap * 1.5 * f64::from(i) / 200.0;
                let (_, p_block) = q.blocking(lambda);
                assert!(
                    p_block >= prev - 1e-12,
                    "seed={seed}: P_block fell from {prev} to {p_block} at lambda={lambda} ({cfg:?})"
                );
                assert!((0.0..=1.0).contains(&p_block));
                prev = p_block;
            }
        }
    }
}

#[test]
fn transition_rows_stay_stochastic() {
    for seed in SEEDS {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut tracker = MarkovStateTracker::new(MarkovConfig::default()).expect("valid");
        for step in 0..2_000 {
            let from = MarkovState::ALL[rng.random_range(0..4)];
            let to = MarkovState::ALL[rng.random_range(0..4)];
            tracker.update_transition(from, to);
            for row in tracker.matrix().rows() {
                let sum: f64 = row.iter().sum();
                assert!((sum - 1.0).abs() < 1e-12, "seed={seed} step={step}: row sums to {sum}");
                assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
            }
        }
        let pi = tracker.stationary_distribution();
        let total: f64 = pi.distribution.iter().sum();
        assert!((total - 1.0).abs() < 1e-9, "seed={seed}");
        let delta = tracker.contraction_coefficient();
        assert!((0.0..=1.0).contains(&delta));
    }
}

#[test]
fn vector_stays_in_unit_interval_under_pathological_inputs() {
    let calc = StabilityVectorCalculator::new(VrpsConfig::default()).expect("valid");
    let extremes = [
        f64::NAN,
        f64::INFINITY,
        f64::NEG_INFINITY,
        -1e300,
        -1.0,
        0.0,
        0.5,
        1.0,
        1e6,
        1e300,
    ];
    for seed in SEEDS {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        for _ in 0..2_000 {
            let mut pick = || extremes[rng.random_range(0..extremes.len())];
            let inputs = VrpsInputs {
                processing_time_ms: Some(pick()),
                utilization: pick(),
                blocking_probability: pick(),
                resource_utilization: pick(),
                anomalous_count: pick(),
                background_count: pick(),
            };
            let v = calc.compute(&inputs);
            for (i, x) in v.components.iter().enumerate() {
                assert!((0.0..=1.0).contains(x), "seed={seed}: component {i} = {x} for {inputs:?}");
            }
            assert!((0.0..=1.0).contains(&v.sust), "seed={seed}: sust {} for {inputs:?}", v.sust);
        }
    }
}

fn flow(kind: DistributionKind) -> TrafficFlowModel {
    TrafficFlowModel::new(
        BackgroundParams::default(),
        AnomalyParams {
            shape: AnomalyShape::default_for(kind),
            ..AnomalyParams::default()
        },
    )
    .expect("valid flow")
}

fn replay(kind: DistributionKind, seed: u64) -> Vec<TickRecord> {
    let samples = flow(kind).sample(0.0, 400.0, 1.0, seed).expect("sampling");
    let mut m = StabilityMonitor::new(QueueingConfig::default(), MonitorConfig::default())
        .expect("valid monitor");
    let mut next_tick = 10.0;
    for s in samples {
        while s.timestamp > next_tick {
            m.tick(next_tick).expect("tick");
            next_tick += 10.0;
        }
        m.ingest(s).expect("ingest");
    }
    m.tick(next_tick).expect("final tick");
    m.records().iter().cloned().collect()
}

#[test]
fn fixed_seed_reproduces_trajectory_bit_for_bit() {
    for kind in DistributionKind::ALL {
        for seed in SEEDS {
            let a = replay(kind, seed);
            let b = replay(kind, seed);
            assert_eq!(
                trajectory_fingerprint(&a),
                trajectory_fingerprint(&b),
                "{kind:?} seed={seed}"
            );
        }
    }
    assert_ne!(
        trajectory_fingerprint(&replay(DistributionKind::Gaussian, 1)),
        trajectory_fingerprint(&replay(DistributionKind::Gaussian, 2))
    );
}

#[test]
fn reaggregation_reproduces_snapshot() {
    let samples = flow(DistributionKind::Pareto).sample(180.0, 280.0, 0.5, 7).expect("sampling");
    let q = QueueingModel::new(QueueingConfig::default()).expect("valid");
    let snap = |s: &[ArrivalSample]| {
        let lambda = estimate_arrival_rate(s, 100.0);
        q.snapshot(lambda, &[], lambda * 100.0, &mut LossAccumulator::new())
    };
    let again = flow(DistributionKind::Pareto).sample(180.0, 280.0, 0.5, 7).expect("sampling");
    assert_eq!(
        snapshot_fingerprint(&snap(samples.as_slice())),
        snapshot_fingerprint(&snap(again.as_slice()))
    );
}

#[test]
fn parallel_sessions_match_sequential_runs() {
    let registry = Arc::new(SessionRegistry::default());
    let q = QueueingConfig::default();
    let handles: Vec<_> = SEEDS
        .iter()
        .map(|&seed| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let id = SessionId::new(format!("seed-{seed}"));
                let samples = flow(DistributionKind::Exponential)
                    .sample(0.0, 400.0, 1.0, seed)
                    .expect("sampling");
                let mut next_tick = 10.0;
                for s in samples {
                    while s.timestamp > next_tick {
                        registry.evaluate_at(&id, &q, next_tick).expect("tick");
                        next_tick += 10.0;
                    }
                    registry.ingest(&id, s).expect("ingest");
                }
                registry.evaluate_at(&id, &q, next_tick).expect("final tick");
            })
        })
        .collect();
    for h in handles {
        h.join().expect("worker panicked");
    }
    for seed in SEEDS {
        let id = SessionId::new(format!("seed-{seed}"));
        let parallel = registry.get_trajectory(&id, f64::NEG_INFINITY, f64::INFINITY).expect("session");
        let sequential = replay(DistributionKind::Exponential, seed);
        assert_eq!(
            trajectory_fingerprint(&parallel),
            trajectory_fingerprint(&sequential),
            "seed={seed}"
        );
    }
}
