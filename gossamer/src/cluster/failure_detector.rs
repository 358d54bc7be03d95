use crate::core::{DetectorConfig, Distribution};
use parking_lot::Mutex;
use statrs::distribution::{Exponential, Normal, Univariate};
use std::collections::VecDeque;
use std::fmt::Debug;
use tracing::error;

const EPSILON: f64 = 1e-12;
const MIN_STD_DEV: f64 = 0.1;

struct Window {
  capacity: usize,
  intervals: VecDeque<u64>,
  sum: u64,
  sum_squares: u128,
  latest: Option<u64>,
}
impl Window {
  fn push(&mut self, interval: u64) {
    while self.intervals.len() >= self.capacity {
      match self.intervals.pop_back() {
        Some(last) => {
          self.sum -= last;
          self.sum_squares -= last as u128 * last as u128;
        }
        None => break,
      }
    }
    self.intervals.push_front(interval);
    self.sum += interval;
    self.sum_squares += interval as u128 * interval as u128;
  }

  fn mean(&self) -> f64 {
    self.sum as f64 / self.intervals.len() as f64
  }

  // Sample standard deviation, zero below two samples.
  fn std_dev(&self) -> f64 {
    let n = self.intervals.len() as u128;
    if n < 2 {
      return 0.0;
    }
    let sum = self.sum as u128;
    let numerator = (n * self.sum_squares).saturating_sub(sum * sum);
    (numerator as f64 / (n * (n - 1)) as f64).sqrt()
  }
}

/// Phi accrual failure detection for a single member.
///
/// Keeps the gaps between the most recent heartbeats in a sliding window and, given the current
/// time, reports how surprising the silence since the last heartbeat is. A phi of 1 means roughly
/// a 10% chance the member is still alive, 2 means 1%, and so on. All times are milliseconds.
pub struct FailureDetector {
  minimum_samples: usize,
  distribution: Distribution,
  window: Mutex<Window>,
}
impl FailureDetector {
  pub fn new(config: DetectorConfig) -> FailureDetector {
    FailureDetector {
      minimum_samples: config.minimum_samples,
      distribution: config.distribution,
      window: Mutex::new(Window {
        capacity: config.window_size.max(1),
        intervals: VecDeque::new(),
        sum: 0,
        sum_squares: 0,
        latest: None,
      }),
    }
  }

  /// Records a heartbeat that arrived at `now`. Heartbeats that are not strictly later than the
  /// last accepted one are ignored.
  pub fn record_heartbeat(&self, now: u64) {
    let mut window = self.window.lock();
    match window.latest {
      Some(latest) if now <= latest => return,
      Some(latest) => window.push(now - latest),
      None => {}
    }
    window.latest = Some(now);
  }

  /// The suspicion level at `now`, or `None` while there is not enough history to say anything.
  pub fn compute_phi_measure(&self, now: u64) -> Option<f64> {
    let window = self.window.lock();
    let latest = window.latest?;
    if window.intervals.is_empty() || window.intervals.len() < self.minimum_samples {
      return None;
    }
    let delta = now.saturating_sub(latest) as f64;
    let mean = window.mean();
    let probability = match self.distribution {
      Distribution::Normal => {
        let std_dev = window.std_dev().max(MIN_STD_DEV);
        Normal::new(mean, std_dev).map(|d| d.cdf(delta))
      }
      Distribution::Exponential => Exponential::new(1.0 / mean).map(|d| d.cdf(delta)),
    };
    let probability = match probability {
      Ok(p) if p.is_finite() => p,
      Ok(p) => {
        error!("non-finite probability {} for mean {} and delta {}", p, mean, delta);
        return None;
      }
      Err(e) => {
        error!("cannot build {:?} distribution with mean {}: {}", self.distribution, mean, e);
        return None;
      }
    };
    let probability = if 1.0 - probability < EPSILON { 1.0 } else { probability };
    Some(-(1.0 - probability).log10())
  }

  pub fn samples(&self) -> usize {
    self.window.lock().intervals.len()
  }

  pub fn latest(&self) -> Option<u64> {
    self.window.lock().latest
  }

  pub fn mean(&self) -> Option<f64> {
    let window = self.window.lock();
    if window.intervals.is_empty() {
      None
    } else {
      Some(window.mean())
    }
  }

  pub fn std_dev(&self) -> Option<f64> {
    let window = self.window.lock();
    if window.intervals.is_empty() {
      None
    } else {
      Some(window.std_dev())
    }
  }
}
impl Debug for FailureDetector {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FailureDetector")
      .field("distribution", &self.distribution)
      .field("samples", &self.samples())
      .field("mean", &self.mean())
      .field("std_dev", &self.std_dev())
      .finish()
  }
}

#[cfg(test)]
use rand::rngs::SmallRng;
#[cfg(test)]
use rand::{Rng, SeedableRng};

#[cfg(test)]
fn detector(minimum_samples: usize, distribution: Distribution) -> FailureDetector {
  FailureDetector::new(DetectorConfig {
    window_size: 1000,
    minimum_samples: minimum_samples,
    distribution: distribution,
  })
}

#[cfg(test)]
fn jittered_schedule(begin: u64, end: u64, step: u64, seed: u64) -> Vec<u64> {
  let mut rng = SmallRng::seed_from_u64(seed);
  let half = step as i64 / 4;
  (begin..end)
    .step_by(step as usize)
    .map(|t| (t as i64 + rng.gen_range(-half..half)).max(0) as u64)
    .collect()
}

#[test]
fn test_record_heartbeat_ignores_stale_timestamps() {
  let fd = detector(1, Distribution::Normal);
  fd.record_heartbeat(1000);
  fd.record_heartbeat(1100);
  assert_eq!(fd.samples(), 1);
  fd.record_heartbeat(1100);
  fd.record_heartbeat(1050);
  assert_eq!(fd.samples(), 1);
  assert_eq!(fd.latest(), Some(1100));
  fd.record_heartbeat(1300);
  assert_eq!(fd.samples(), 2);
  assert_eq!(fd.mean(), Some(150.0));
}

#[test]
fn test_phi_needs_minimum_samples() {
  let fd = detector(5, Distribution::Normal);
  assert_eq!(fd.compute_phi_measure(0), None);
  for i in 0..5 {
    fd.record_heartbeat(i * 100);
    assert_eq!(fd.compute_phi_measure(i * 100 + 50), None);
  }
  fd.record_heartbeat(500);
  assert_eq!(fd.samples(), 5);
  assert!(fd.compute_phi_measure(550).is_some());
}

#[test]
fn test_phi_at_mean_delta() {
  let fd = detector(1, Distribution::Normal);
  let values = jittered_schedule(0, 10000, 100, 7);
  for v in &values {
    fd.record_heartbeat(*v);
  }
  let mean = fd.mean().unwrap();
  let last = *values.last().unwrap();
  let phi = fd.compute_phi_measure(last + mean.round() as u64).unwrap();
  assert!((phi - -(0.5f64).log10()).abs() < 0.1, "phi was {}", phi);
}

#[test]
fn test_phi_grows_with_silence() {
  let threshold = 10.0;
  let fd = detector(1, Distribution::Normal);
  let values = jittered_schedule(0, 10000, 100, 11);
  for v in &values {
    fd.record_heartbeat(*v);
  }
  let last = *values.last().unwrap();
  assert!(fd.compute_phi_measure(last + 100).unwrap() < threshold);
  let mut previous = 0.0;
  for silence in (100..=2000).step_by(50) {
    let phi = fd.compute_phi_measure(last + silence).unwrap();
    assert!(phi >= previous, "phi dropped from {} to {} at {}", previous, phi, silence);
    previous = phi;
  }
  assert!(previous >= threshold);
  assert!(previous.is_infinite());
}

#[test]
fn test_exponential_phi() {
  let fd = detector(1, Distribution::Exponential);
  for v in jittered_schedule(0, 10000, 100, 13) {
    fd.record_heartbeat(v);
  }
  let last = fd.latest().unwrap();
  let mean = fd.mean().unwrap();
  let phi = fd.compute_phi_measure(last + 100).unwrap();
  assert!(phi < 10.0);
  let expected = 100.0 / (mean * std::f64::consts::LN_10);
  assert!((phi - expected).abs() < 1e-6, "phi {} expected {}", phi, expected);
  assert!(fd.compute_phi_measure(last + 10000).unwrap() > phi);
}

#[test]
fn test_window_evicts_oldest() {
  let fd = FailureDetector::new(DetectorConfig {
    window_size: 3,
    minimum_samples: 1,
    distribution: Distribution::Normal,
  });
  for t in [0, 1000, 1010, 1020, 1030].iter() {
    fd.record_heartbeat(*t);
  }
  assert_eq!(fd.samples(), 3);
  assert_eq!(fd.mean(), Some(10.0));
  assert_eq!(fd.std_dev(), Some(0.0));
  let phi = fd.compute_phi_measure(1040).unwrap();
  assert!((phi - -(0.5f64).log10()).abs() < 1e-9);
}
