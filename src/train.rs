use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tch::nn::OptimizerConfig;
use tch::{nn, Device, Tensor};
use tqdm::tqdm;

use crate::data::InpaintDataset;
use crate::discriminator::Discriminator;
use crate::generator::Generator;
use crate::loss::{discriminator_loss, generator_loss, Layout, WEIGHT_ADV, WEIGHT_L2};
use crate::metrics::{is_snapshot_epoch, EpochAccumulator, LossHistory};
use crate::report::{self, ProgressGif};

/// The generator's Adam runs at this multiple of the discriminator's learning
/// rate, to keep the generator competitive.
pub const GEN_LR_MULTIPLIER: f64 = 10.0;

pub struct TrainConfig {
    pub epochs: i64,
    pub overlap: i64,
    pub lr: f64,
    pub layout: Layout,
    pub save_dir: PathBuf,
    pub resume_from: Option<PathBuf>,
}

/// One adversarial training step: exactly one discriminator update followed
/// by exactly one generator update on the same batch. Returns the observed
/// (generator, discriminator) losses.
#[allow(clippy::too_many_arguments)]
pub fn take_step(
    images: &Tensor,
    real_centers: &Tensor,
    overlap: i64,
    layout: Layout,
    generator: &Generator,
    discriminator: &Discriminator,
    gen_vs: &mut nn::VarStore,
    disc_vs: &mut nn::VarStore,
    opt_gen: &mut nn::Optimizer,
    opt_disc: &mut nn::Optimizer,
) -> (f64, f64) {
    // 'fDx' in paper, train the discriminator
    disc_vs.unfreeze();
    gen_vs.freeze();
    let (disc_loss, fake_output) = {
        let real_output = real_centers.apply_t(discriminator, true);
        let generated_centers = images.apply_t(generator, false).copy().detach();
        let fake_output = generated_centers.apply_t(discriminator, true);
        (
            discriminator_loss(&real_output, &fake_output),
            fake_output,
        )
    };
    opt_disc.backward_step(&disc_loss);

    // 'fGx' in paper, train the generator. The adversarial term reuses the
    // discriminator's verdict from before its own update.
    disc_vs.freeze();
    gen_vs.unfreeze();
    let stale_fake_output = fake_output.detach();
    let gen_loss = {
        let generated_centers = images.apply_t(generator, true);
        generator_loss(
            &stale_fake_output,
            real_centers,
            &generated_centers,
            overlap,
            layout,
            WEIGHT_L2,
            WEIGHT_ADV,
        )
    };
    opt_gen.backward_step(&gen_loss);

    (gen_loss.double_value(&[]), disc_loss.double_value(&[]))
}

/// Calculates both losses without training: both models in inference mode,
/// no gradients, no parameter or optimizer mutation.
pub fn calc_losses(
    images: &Tensor,
    real_centers: &Tensor,
    overlap: i64,
    layout: Layout,
    generator: &Generator,
    discriminator: &Discriminator,
) -> (f64, f64) {
    tch::no_grad(|| {
        let generated_centers = images.apply_t(generator, false);
        let real_output = real_centers.apply_t(discriminator, false);
        let fake_output = generated_centers.apply_t(discriminator, false);
        let disc_loss = discriminator_loss(&real_output, &fake_output);
        let gen_loss = generator_loss(
            &fake_output,
            real_centers,
            &generated_centers,
            overlap,
            layout,
            WEIGHT_L2,
            WEIGHT_ADV,
        );
        (gen_loss.double_value(&[]), disc_loss.double_value(&[]))
    })
}

/// Persists both models' weights keyed by epoch index.
pub fn save_checkpoint(
    gen_vs: &nn::VarStore,
    disc_vs: &nn::VarStore,
    dir: &Path,
    epoch: i64,
) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create checkpoint dir {}", dir.display()))?;
    gen_vs.save(dir.join(format!("gen_epoch_{epoch}.pt")))?;
    disc_vs.save(dir.join(format!("disc_epoch_{epoch}.pt")))?;
    Ok(())
}

/// Loads the highest-epoch checkpoint pair found in `dir` into the given
/// variable stores and returns that epoch index.
pub fn load_latest_checkpoint(
    gen_vs: &mut nn::VarStore,
    disc_vs: &mut nn::VarStore,
    dir: &Path,
) -> Result<i64> {
    let mut latest: Option<i64> = None;
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read checkpoint dir {}", dir.display()))?;
    for entry in entries {
        let name = match entry?.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        let epoch = name
            .strip_prefix("gen_epoch_")
            .and_then(|rest| rest.strip_suffix(".pt"))
            .and_then(|digits| digits.parse::<i64>().ok());
        if let Some(epoch) = epoch {
            if dir.join(format!("disc_epoch_{epoch}.pt")).is_file()
                && latest.map_or(true, |best| epoch > best)
            {
                latest = Some(epoch);
            }
        }
    }
    let Some(epoch) = latest else {
        bail!("no checkpoint pair found in {}", dir.display());
    };
    gen_vs.load(dir.join(format!("gen_epoch_{epoch}.pt")))?;
    disc_vs.load(dir.join(format!("disc_epoch_{epoch}.pt")))?;
    Ok(epoch)
}

/// Trains the context encoder, checkpointing and dumping sample images on the
/// snapshot cadence, and plots the training/validation loss histories after
/// the final epoch.
pub fn train(
    train_dataset: &InpaintDataset,
    val_dataset: &InpaintDataset,
    config: &TrainConfig,
) -> Result<LossHistory> {
    let device = Device::cuda_if_available();

    let mut gen_vs = nn::VarStore::new(device);
    let generator = Generator::new(gen_vs.root());
    let mut opt_gen =
        nn::adam(0.9, 0.999, 0.).build(&gen_vs, config.lr * GEN_LR_MULTIPLIER)?;

    let mut disc_vs = nn::VarStore::new(device);
    let discriminator = Discriminator::new(disc_vs.root());
    let mut opt_disc = nn::adam(0.9, 0.999, 0.).build(&disc_vs, config.lr)?;

    if let Some(dir) = &config.resume_from {
        let epoch = load_latest_checkpoint(&mut gen_vs, &mut disc_vs, dir)?;
        log::info!("resumed weights from epoch {epoch} checkpoint in {}", dir.display());
    }

    let checkpoint_dir = config.save_dir.join("training_checkpoints");
    let mut history = LossHistory::default();
    let mut progress = ProgressGif::new();

    for epoch in 0..config.epochs {
        let start = Instant::now();

        let mut train_acc = EpochAccumulator::new();
        let mut last_train_batch: Option<(Tensor, Tensor)> = None;
        for (image_batch, center_batch) in tqdm(train_dataset.batches(device)) {
            let (gen_loss, disc_loss) = take_step(
                &image_batch,
                &center_batch,
                config.overlap,
                config.layout,
                &generator,
                &discriminator,
                &mut gen_vs,
                &mut disc_vs,
                &mut opt_gen,
                &mut opt_disc,
            );
            train_acc.add(gen_loss, disc_loss);
            last_train_batch = Some((image_batch, center_batch));
        }

        if is_snapshot_epoch(epoch) {
            if let Some((images, centers)) = &last_train_batch {
                if let Err(err) = report::save_pictures(
                    images,
                    centers,
                    &generator,
                    epoch,
                    "train",
                    &config.save_dir,
                    1,
                ) {
                    log::warn!("skipping train sample dump for epoch {epoch}: {err:#}");
                }
                if let Err(err) = progress.push_frame(&generator, images) {
                    log::warn!("skipping progress frame for epoch {epoch}: {err:#}");
                }
            }
        }

        let mut val_acc = EpochAccumulator::new();
        let mut last_val_batch: Option<(Tensor, Tensor)> = None;
        for (image_batch, center_batch) in val_dataset.batches(device) {
            let (gen_loss, disc_loss) = calc_losses(
                &image_batch,
                &center_batch,
                config.overlap,
                config.layout,
                &generator,
                &discriminator,
            );
            val_acc.add(gen_loss, disc_loss);
            last_val_batch = Some((image_batch, center_batch));
        }

        if is_snapshot_epoch(epoch) {
            if let Err(err) = save_checkpoint(&gen_vs, &disc_vs, &checkpoint_dir, epoch) {
                log::warn!("skipping checkpoint for epoch {epoch}: {err:#}");
            }
            if let Some((images, centers)) = &last_val_batch {
                if let Err(err) = report::save_pictures(
                    images,
                    centers,
                    &generator,
                    epoch,
                    "val",
                    &config.save_dir,
                    1,
                ) {
                    log::warn!("skipping val sample dump for epoch {epoch}: {err:#}");
                }
            }
        }

        let (train_gen, train_disc) = train_acc
            .mean()
            .context("training dataset yielded no batches")?;
        let (val_gen, val_disc) = val_acc
            .mean()
            .context("validation dataset yielded no batches")?;
        history.push_epoch((train_gen, train_disc), (val_gen, val_disc));

        log::info!(
            "Time for epoch {} is {:.1} sec",
            epoch + 1,
            start.elapsed().as_secs_f64()
        );
        log::info!("Generator - Training loss {train_gen:.5} --- Validation loss {val_gen:.5}");
        log::info!(
            "Discriminator - Training loss {train_disc:.5} --- Validation loss {val_disc:.5}"
        );
    }

    if let Err(err) = report::plot_loss(&history, &config.save_dir) {
        log::warn!("failed to plot loss histories: {err:#}");
    }
    if let Err(err) = report::write_loss_csv(&history, &config.save_dir.join("loss_history.csv")) {
        log::warn!("failed to write loss history: {err:#}");
    }
    if !progress.is_empty() {
        if let Err(err) = progress.write(&config.save_dir.join("progress.gif")) {
            log::warn!("failed to write progress gif: {err:#}");
        }
    }

    Ok(history)
}
