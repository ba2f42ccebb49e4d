use crate::train::train_config::{EarlyStoppingConfig, PlateauConfig};

/// Counts epochs without a strict improvement in validation loss.
pub struct EarlyStopping {
    patience: usize,
    best: f64,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(config: &EarlyStoppingConfig) -> Self {
        EarlyStopping { patience: config.patience, best: f64::INFINITY, wait: 0 }
    }

    /// Records one epoch. Returns `true` when training should stop.
    pub fn observe(&mut self, val_loss: f64) -> bool {
        if val_loss < self.best {
            self.best = val_loss;
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        self.wait >= self.patience
    }
}

/// Lowers the learning rate when validation loss plateaus.
///
/// Runs independently of `EarlyStopping`; the counter resets after each
/// reduction.
pub struct ReduceOnPlateau {
    patience: usize,
    factor: f64,
    min_lr: f64,
    min_delta: f64,
    best: f64,
    wait: usize,
}

impl ReduceOnPlateau {
    pub fn new(config: &PlateauConfig) -> Self {
        ReduceOnPlateau {
            patience: config.patience,
            factor: config.factor,
            min_lr: config.min_lr,
            min_delta: config.min_delta,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// Records one epoch at learning rate `lr`. Returns the new rate when a
    /// reduction is due.
    pub fn observe(&mut self, val_loss: f64, lr: f64) -> Option<f64> {
        if val_loss < self.best - self.min_delta {
            self.best = val_loss;
            self.wait = 0;
            return None;
        }
        self.wait += 1;
        if self.wait < self.patience || lr <= self.min_lr {
            return None;
        }
        self.wait = 0;
        Some((lr * self.factor).max(self.min_lr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_stopping_fires_after_patience() {
        let mut stop = EarlyStopping::new(&EarlyStoppingConfig { patience: 2, restore_best: true });
        assert!(!stop.observe(1.0));
        assert!(!stop.observe(0.9));
        assert!(!stop.observe(0.95));
        assert!(stop.observe(0.9));
    }

    #[test]
    fn improvement_resets_early_stopping() {
        let mut stop = EarlyStopping::new(&EarlyStoppingConfig { patience: 2, restore_best: true });
        stop.observe(1.0);
        stop.observe(1.1);
        assert!(!stop.observe(0.5));
        assert!(!stop.observe(0.6));
    }

    #[test]
    fn plateau_halves_and_floors() {
        let config = PlateauConfig { patience: 1, factor: 0.5, min_lr: 0.3, min_delta: 0.0 };
        let mut plateau = ReduceOnPlateau::new(&config);
        assert_eq!(plateau.observe(1.0, 1.0), None);
        assert_eq!(plateau.observe(1.0, 1.0), Some(0.5));
        assert_eq!(plateau.observe(1.0, 0.5), Some(0.3));
        assert_eq!(plateau.observe(1.0, 0.3), None);
    }

    #[test]
    fn plateau_counter_resets_after_reduction() {
        let config = PlateauConfig { patience: 3, ..PlateauConfig::default() };
        let mut plateau = ReduceOnPlateau::new(&config);
        plateau.observe(1.0, 1e-3);
        assert_eq!(plateau.observe(1.0, 1e-3), None);
        assert_eq!(plateau.observe(1.0, 1e-3), None);
        assert_eq!(plateau.observe(1.0, 1e-3), Some(5e-4));
        assert_eq!(plateau.observe(1.0, 5e-4), None);
        assert_eq!(plateau.observe(1.0, 5e-4), None);
        assert_eq!(plateau.observe(1.0, 5e-4), Some(2.5e-4));
    }
}
