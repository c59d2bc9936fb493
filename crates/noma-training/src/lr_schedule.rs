//! Cosine annealing learning rate schedule.
//!
//! `lr(t) = eta_min + (base_lr - eta_min) * (1 + cos(pi * t / t_max)) / 2`,
//! stepped once at the end of every epoch.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Cosine decay from `base_lr` to `eta_min` over `t_max` epochs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CosineAnnealingScheduler {
    base_lr: f64,
    eta_min: f64,
    t_max: usize,
    epoch: usize,
}

impl CosineAnnealingScheduler {
    pub fn new(base_lr: f64, t_max: usize) -> Self {
        Self {
            base_lr,
            eta_min: 0.0,
            t_max,
            epoch: 0,
        }
    }

    pub fn with_eta_min(mut self, eta_min: f64) -> Self {
        self.eta_min = eta_min;
        self
    }

    /// Learning rate after `epoch` steps. Past `t_max` it stays at `eta_min`.
    pub fn lr_at(&self, epoch: usize) -> f64 {
        if self.t_max == 0 {
            return self.base_lr;
        }
        let progress = (epoch as f64 / self.t_max as f64).min(1.0);
        self.eta_min + (self.base_lr - self.eta_min) * (1.0 + (PI * progress).cos()) / 2.0
    }

    /// Learning rate for the current epoch.
    pub fn current_lr(&self) -> f64 {
        self.lr_at(self.epoch)
    }

    /// Advance one epoch.
    pub fn step(&mut self) {
        self.epoch += 1;
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_base_lr() {
        let scheduler = CosineAnnealingScheduler::new(3e-4, 12);
        assert_eq!(scheduler.current_lr(), 3e-4);
    }

    #[test]
    fn test_halfway_is_half() {
        let mut scheduler = CosineAnnealingScheduler::new(1e-3, 10);
        for _ in 0..5 {
            scheduler.step();
        }
        assert!((scheduler.current_lr() - 5e-4).abs() < 1e-12);
    }

    #[test]
    fn test_reaches_eta_min() {
        let scheduler = CosineAnnealingScheduler::new(1e-3, 4);
        assert!(scheduler.lr_at(4).abs() < 1e-12);
        assert!(scheduler.lr_at(9).abs() < 1e-12);

        let floored = CosineAnnealingScheduler::new(1e-3, 4).with_eta_min(1e-5);
        assert!((floored.lr_at(4) - 1e-5).abs() < 1e-12);
    }

    #[test]
    fn test_monotonically_decreasing() {
        let scheduler = CosineAnnealingScheduler::new(1e-2, 12);
        let lrs: Vec<f64> = (0..=12).map(|t| scheduler.lr_at(t)).collect();
        assert!(lrs.windows(2).all(|w| w[1] <= w[0]));
    }
}
