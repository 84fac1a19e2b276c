//! Learning-rate reduction when a maximized metric plateaus.

/// Tracks the best validation score seen so far and cuts the learning rate by
/// `factor` after `patience` consecutive non-improving observations.
///
/// One instance carries a single patience state for the whole run: mid-epoch
/// and end-of-epoch observations feed the same counter, so frequent mid-epoch
/// checks make reductions correspondingly more eager.
#[derive(Debug, Clone)]
pub struct ReduceOnPlateau {
    lr: f64,
    factor: f64,
    patience: u32,
    min_lr: f64,
    bad_steps: u32,
    best: Option<f64>,
}

impl ReduceOnPlateau {
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            factor: 0.1,
            patience: 5,
            min_lr: 0.0,
            bad_steps: 0,
            best: None,
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_patience(mut self, patience: u32) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Observes one metric value (higher is better) and returns the learning
    /// rate to use from here on.
    pub fn step(&mut self, metric: f64) -> f64 {
        let improved = match self.best {
            Some(best) => metric > best,
            None => true,
        };
        if improved {
            self.best = Some(metric);
            self.bad_steps = 0;
        } else {
            self.bad_steps += 1;
            if self.bad_steps > self.patience {
                self.lr = (self.lr * self.factor).max(self.min_lr);
                self.bad_steps = 0;
            }
        }
        self.lr
    }
}
