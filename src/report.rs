use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use gif::{Encoder, Frame, Repeat};
use tch::{Device, Kind, Tensor};

use crate::data::MASK_SIZE;
use crate::generator::Generator;
use crate::metrics::LossHistory;

const CHART_W: usize = 640;
const PANEL_H: usize = 240;
const MARGIN: usize = 24;

const BLACK: [u8; 3] = [0, 0, 0];
const RED: [u8; 3] = [220, 40, 40];
const BLUE: [u8; 3] = [40, 40, 220];

/// Plain-text record of the run's hyperparameters, written once at run start.
#[allow(clippy::too_many_arguments)]
pub fn write_run_info(
    path: &Path,
    run_number: i64,
    train_data_path: &Path,
    val_data_path: &Path,
    overlap: i64,
    batch_size: i64,
    shuffle_labels: bool,
    epochs: i64,
    lr: f64,
) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("failed to create run info file {}", path.display()))?;
    writeln!(file, "Context Encoder Hyperparameters: Run {run_number}")?;
    writeln!(file, "Training data found at: {}", train_data_path.display())?;
    writeln!(file, "Validation data found at: {}", val_data_path.display())?;
    writeln!(file, "Overlap: {overlap}")?;
    writeln!(file, "Batch Size: {batch_size}")?;
    writeln!(file, "Labels Shuffled: {shuffle_labels}")?;
    writeln!(file, "Epochs: {epochs}")?;
    writeln!(file, "Learning Rate: {lr}")?;
    Ok(())
}

/// Dumps generated-vs-real center pairs for the first `num_pictures` samples
/// of a batch, one PNG per sample, generated center on top.
pub fn save_pictures(
    image_batch: &Tensor,
    center_batch: &Tensor,
    generator: &Generator,
    epoch: i64,
    split: &str,
    save_dir: &Path,
    num_pictures: i64,
) -> Result<()> {
    let generated = tch::no_grad(|| image_batch.apply_t(generator, false));
    let generated = (generated + 1.0) / 2.0 * 255.0;
    let reals = (center_batch + 1.0) / 2.0 * 255.0;
    let count = num_pictures.min(image_batch.size()[0]);
    for i in 0..count {
        let pair = Tensor::cat(&[generated.get(i), reals.get(i)], 1)
            .clamp(0.0, 255.0)
            .to_device(Device::Cpu);
        let path = save_dir.join(format!("{split}_epoch_{epoch}_{i}.png"));
        tch::vision::image::save(&pair, &path)
            .with_context(|| format!("failed to save sample image {}", path.display()))?;
    }
    Ok(())
}

fn set_pixel(buf: &mut [u8], x: usize, y: usize, color: [u8; 3]) {
    let i = (y * CHART_W + x) * 3;
    buf[i..i + 3].copy_from_slice(&color);
}

fn draw_segment(buf: &mut [u8], from: (usize, usize), to: (usize, usize), color: [u8; 3]) {
    let (x0, y0) = (from.0 as i64, from.1 as i64);
    let (x1, y1) = (to.0 as i64, to.1 as i64);
    let steps = (x1 - x0).abs().max((y1 - y0).abs()).max(1);
    for s in 0..=steps {
        let x = x0 + (x1 - x0) * s / steps;
        let y = y0 + (y1 - y0) * s / steps;
        set_pixel(buf, x as usize, y as usize, color);
    }
}

fn series_range(series: &[&[f64]]) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for values in series {
        for &v in values.iter().filter(|v| v.is_finite()) {
            lo = lo.min(v);
            hi = hi.max(v);
        }
    }
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if lo == hi {
        return (lo - 0.5, hi + 0.5);
    }
    (lo, hi)
}

fn draw_series(buf: &mut [u8], panel_y0: usize, values: &[f64], lo: f64, hi: f64, color: [u8; 3]) {
    let span_x = CHART_W - 2 * MARGIN;
    let span_y = PANEL_H - 2 * MARGIN;
    let denom = values.len().saturating_sub(1).max(1);
    let mut prev: Option<(usize, usize)> = None;
    for (i, &v) in values.iter().enumerate() {
        if !v.is_finite() {
            prev = None;
            continue;
        }
        let x = MARGIN + i * span_x / denom;
        let norm = (v - lo) / (hi - lo);
        let y = panel_y0 + PANEL_H - MARGIN - (norm * span_y as f64) as usize;
        if let Some(p) = prev {
            draw_segment(buf, p, (x, y), color);
        } else {
            set_pixel(buf, x, y, color);
        }
        prev = Some((x, y));
    }
}

fn draw_panel(buf: &mut [u8], panel_y0: usize, train: &[f64], val: &[f64]) {
    let (lo, hi) = series_range(&[train, val]);
    let left = MARGIN;
    let right = CHART_W - MARGIN;
    let top = panel_y0 + MARGIN;
    let bottom = panel_y0 + PANEL_H - MARGIN;
    draw_segment(buf, (left, bottom), (right, bottom), BLACK);
    draw_segment(buf, (left, top), (left, bottom), BLACK);
    draw_series(buf, panel_y0, train, lo, hi, RED);
    draw_series(buf, panel_y0, val, lo, hi, BLUE);
}

/// Renders the four loss histories as two stacked line charts (generator on
/// top, discriminator below; training in red, validation in blue).
pub fn plot_loss(history: &LossHistory, save_dir: &Path) -> Result<()> {
    let height = 2 * PANEL_H;
    let mut buf = vec![255u8; CHART_W * height * 3];
    draw_panel(&mut buf, 0, &history.train_gen, &history.val_gen);
    draw_panel(&mut buf, PANEL_H, &history.train_disc, &history.val_disc);
    let chart = Tensor::from_slice(&buf)
        .reshape([height as i64, CHART_W as i64, 3])
        .permute_copy([2, 0, 1]);
    let path = save_dir.join("loss_history.png");
    tch::vision::image::save(&chart, &path)
        .with_context(|| format!("failed to save loss chart {}", path.display()))?;
    Ok(())
}

pub fn write_loss_csv(history: &LossHistory, path: &Path) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("failed to create loss history file {}", path.display()))?;
    writeln!(file, "epoch,train_gen,train_disc,val_gen,val_disc")?;
    for epoch in 0..history.epochs() {
        writeln!(
            file,
            "{},{},{},{},{}",
            epoch,
            history.train_gen[epoch],
            history.train_disc[epoch],
            history.val_gen[epoch],
            history.val_disc[epoch],
        )?;
    }
    Ok(())
}

/// Collects one generated center per snapshot epoch and writes them out as an
/// animation of the generator's progress over the run.
pub struct ProgressGif {
    frames: Vec<Vec<u8>>,
}

impl ProgressGif {
    pub fn new() -> ProgressGif {
        ProgressGif { frames: Vec::new() }
    }

    pub fn push_frame(&mut self, generator: &Generator, image_batch: &Tensor) -> Result<()> {
        let generated = tch::no_grad(|| image_batch.narrow(0, 0, 1).apply_t(generator, false));
        let frame = ((generated.squeeze_dim(0) + 1.0) / 2.0 * 255.0)
            .clamp(0.0, 255.0)
            .permute_copy([1, 2, 0])
            .to_device(Device::Cpu)
            .to_kind(Kind::Uint8)
            .flat_view();
        let numel = (3 * MASK_SIZE * MASK_SIZE) as usize;
        let mut data = vec![0u8; numel];
        frame.copy_data(&mut data, numel);
        self.frames.push(data);
        Ok(())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut encoder = Encoder::new(&mut file, MASK_SIZE as u16, MASK_SIZE as u16, &[])?;
        encoder.set_repeat(Repeat::Infinite)?;
        for data in &self.frames {
            let frame = Frame::from_rgb(MASK_SIZE as u16, MASK_SIZE as u16, data);
            encoder.write_frame(&frame)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_csv_lists_one_row_per_epoch() {
        let mut history = LossHistory::default();
        history.push_epoch((1.0, 2.0), (3.0, 4.0));
        history.push_epoch((0.5, 1.5), (2.5, 3.5));
        let dir = std::env::temp_dir().join(format!("ctx-enc-csv-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("loss_history.csv");
        write_loss_csv(&history, &path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "epoch,train_gen,train_disc,val_gen,val_disc");
        assert_eq!(lines[1], "0,1,2,3,4");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn chart_range_ignores_non_finite_values() {
        let (lo, hi) = series_range(&[&[1.0, f64::NAN, 3.0], &[2.0, f64::INFINITY]]);
        assert_eq!((lo, hi), (1.0, 3.0));
        // all-bad and constant series still produce a drawable range
        let (lo, hi) = series_range(&[&[f64::NAN]]);
        assert!(lo < hi);
        let (lo, hi) = series_range(&[&[2.0, 2.0]]);
        assert!(lo < 2.0 && hi > 2.0);
    }

    #[test]
    fn segments_stay_inside_the_buffer() {
        let mut buf = vec![255u8; CHART_W * 2 * PANEL_H * 3];
        draw_panel(&mut buf, 0, &[1.0, 0.5, 0.25], &[2.0, 1.0, 0.5]);
        draw_panel(&mut buf, PANEL_H, &[1.0], &[f64::NAN]);
        // something was drawn
        assert!(buf.iter().any(|&b| b != 255));
    }
}
