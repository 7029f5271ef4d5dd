use anyhow::{bail, Result};

/// Running generator/discriminator loss sums over one pass of a dataset.
pub struct EpochAccumulator {
    gen_sum: f64,
    disc_sum: f64,
    batches: i64,
}

impl EpochAccumulator {
    pub fn new() -> EpochAccumulator {
        EpochAccumulator {
            gen_sum: 0.0,
            disc_sum: 0.0,
            batches: 0,
        }
    }

    pub fn add(&mut self, gen_loss: f64, disc_loss: f64) {
        if !gen_loss.is_finite() || !disc_loss.is_finite() {
            log::warn!(
                "non-finite loss observed in batch {}: generator {gen_loss}, discriminator {disc_loss}",
                self.batches + 1
            );
        }
        self.gen_sum += gen_loss;
        self.disc_sum += disc_loss;
        self.batches += 1;
    }

    pub fn batches(&self) -> i64 {
        self.batches
    }

    /// Batch-count-normalized means. A zero batch count means the dataset
    /// yielded nothing, which is a misconfiguration, not a NaN.
    pub fn mean(&self) -> Result<(f64, f64)> {
        if self.batches == 0 {
            bail!("no batches were processed; the dataset is empty");
        }
        let n = self.batches as f64;
        Ok((self.gen_sum / n, self.disc_sum / n))
    }
}

/// Per-epoch loss means accumulated across the whole run, for reporting.
#[derive(Debug, Default)]
pub struct LossHistory {
    pub train_gen: Vec<f64>,
    pub train_disc: Vec<f64>,
    pub val_gen: Vec<f64>,
    pub val_disc: Vec<f64>,
}

impl LossHistory {
    pub fn push_epoch(&mut self, train: (f64, f64), val: (f64, f64)) {
        self.train_gen.push(train.0);
        self.train_disc.push(train.1);
        self.val_gen.push(val.0);
        self.val_disc.push(val.1);
    }

    pub fn epochs(&self) -> usize {
        self.train_gen.len()
    }
}

/// Model checkpoints and sample images are persisted on the very first epoch
/// and every 5th epoch after that (1-indexed epochs 1, 5, 10, ...).
pub fn is_snapshot_epoch(epoch: i64) -> bool {
    epoch == 0 || (epoch + 1) % 5 == 0
}
