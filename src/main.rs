use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use tch::Device;

mod data;
mod discriminator;
mod generator;
mod loss;
mod metrics;
mod report;
mod train;

use data::InpaintDataset;
use loss::Layout;
use train::TrainConfig;

#[derive(Parser, Debug)]
#[command(version, about = "Context-encoder inpainting GAN via Rust.", long_about = None)]
struct Args {
    /// Directory of training images
    train_data_path: PathBuf,
    /// Directory of validation images
    val_data_path: PathBuf,
    /// Size of overlap (in pixels) of the predicted image in the real image
    #[arg(long, default_value_t = 7)]
    overlap: i64,
    #[arg(long, default_value_t = 64)]
    batch_size: i64,
    #[arg(long, default_value_t = 50)]
    epochs: i64,
    /// Learning rate for the discriminator's Adam optimizer; the generator
    /// runs at 10x this rate
    #[arg(long, default_value_t = 2e-4)]
    lr: f64,
    /// Shuffle the real centers against the inputs once, as a sanity check
    /// that the model is learning at all
    #[arg(long, default_value_t = false)]
    shuffle_labels: bool,
    /// ith run of the day
    #[arg(long, default_value_t = 1)]
    run_number: i64,
    /// Load the latest model checkpoint from a previous run's
    /// training_checkpoints directory before training
    #[arg(long)]
    resume: Option<PathBuf>,
    /// Reuse the run directory if it already exists
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let device = Device::cuda_if_available();
    println!("Use Device: {device:?}");
    println!("--------");

    data::validate_overlap(args.overlap)?;

    let today = Local::now().date_naive();
    let save_dir = if args.shuffle_labels {
        PathBuf::from(format!("Run_shuffled_{today}_{}", args.run_number))
    } else {
        PathBuf::from(format!("Run_{today}_{}", args.run_number))
    };
    if save_dir.exists() {
        if !args.overwrite {
            bail!(
                "the directory this run would write to ({}) already exists; pass --overwrite to reuse it",
                save_dir.display()
            );
        }
    } else {
        fs::create_dir_all(&save_dir)
            .with_context(|| format!("failed to create run dir {}", save_dir.display()))?;
    }

    report::write_run_info(
        &save_dir.join("run_info.txt"),
        args.run_number,
        &args.train_data_path,
        &args.val_data_path,
        args.overlap,
        args.batch_size,
        args.shuffle_labels,
        args.epochs,
        args.lr,
    )?;

    println!("Run Dir: {}", save_dir.display());
    println!("Overlap: {}", args.overlap);
    println!("Batch Size: {}", args.batch_size);
    println!("Epochs: {}", args.epochs);
    println!("Learning Rate: {}", args.lr);
    println!("Labels Shuffled: {}", args.shuffle_labels);
    println!("--------");

    println!("Loading Dataset...");
    let train_dataset = InpaintDataset::from_dir(
        &args.train_data_path,
        args.overlap,
        args.batch_size,
        args.shuffle_labels,
    )?;
    let val_dataset = InpaintDataset::from_dir(
        &args.val_data_path,
        args.overlap,
        args.batch_size,
        args.shuffle_labels,
    )?;
    println!(
        "Training samples: {} ({} batches)",
        train_dataset.num_samples(),
        train_dataset.num_batches()
    );
    println!(
        "Validation samples: {} ({} batches)",
        val_dataset.num_samples(),
        val_dataset.num_batches()
    );
    println!("--------");

    let config = TrainConfig {
        epochs: args.epochs,
        overlap: args.overlap,
        lr: args.lr,
        layout: Layout::ChannelFirst,
        save_dir,
        resume_from: args.resume,
    };
    println!("Train Epochs...");
    train::train(&train_dataset, &val_dataset, &config)?;

    Ok(())
}
