use std::path::Path;

use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use rand::thread_rng;
use tch::data::Iter2;
use tch::{Device, Kind, Tensor};

pub const IMG_SIZE: i64 = 128;
pub const MASK_SIZE: i64 = IMG_SIZE / 2;

/// Paired dataset of masked input images and their real center regions, both
/// normalized to [-1, 1]. The pairing is positional: index i in the image
/// tensor corresponds to index i in the center tensor.
pub struct InpaintDataset {
    images: Tensor,
    centers: Tensor,
    batch_size: i64,
}

/// Extracts the MASK_SIZE x MASK_SIZE center chunk of every image and zeroes
/// the center region of the input, minus an `overlap`-wide ring on each side.
/// Input is a float tensor of shape (N, C, IMG_SIZE, IMG_SIZE) in [0, 1].
pub fn mask_images(images: &Tensor, overlap: i64) -> Result<(Tensor, Tensor)> {
    validate_overlap(overlap)?;
    let start = IMG_SIZE - (MASK_SIZE * 3) / 2;
    let centers = images
        .narrow(2, start, MASK_SIZE)
        .narrow(3, start, MASK_SIZE)
        .copy();
    let masked = images.copy();
    let hole = MASK_SIZE - 2 * overlap;
    let mut fill = masked
        .narrow(2, start + overlap, hole)
        .narrow(3, start + overlap, hole);
    let _ = fill.fill_(0.0);
    Ok((masked, centers))
}

pub fn validate_overlap(overlap: i64) -> Result<()> {
    if overlap < 0 {
        bail!("overlap must be non-negative, got {overlap}");
    }
    if 2 * overlap >= MASK_SIZE {
        bail!("overlap {overlap} leaves no region to fill in a {MASK_SIZE}x{MASK_SIZE} center");
    }
    Ok(())
}

impl InpaintDataset {
    pub fn new(images: Tensor, centers: Tensor, batch_size: i64) -> Result<InpaintDataset> {
        if batch_size <= 0 {
            bail!("batch size must be positive, got {batch_size}");
        }
        let (n_images, n_centers) = (images.size()[0], centers.size()[0]);
        if n_images != n_centers {
            bail!("image/center count mismatch: {n_images} images vs {n_centers} centers");
        }
        if n_images == 0 {
            bail!("dataset contains no images");
        }
        Ok(InpaintDataset {
            images,
            centers,
            batch_size,
        })
    }

    /// Loads every image under `path`, resized to IMG_SIZE x IMG_SIZE, and
    /// splits each into a masked input and its real center. With
    /// `shuffle_labels` the centers are permuted once, decorrelating the
    /// pairs, to check whether the model learns anything at all.
    pub fn from_dir<P: AsRef<Path>>(
        path: P,
        overlap: i64,
        batch_size: i64,
        shuffle_labels: bool,
    ) -> Result<InpaintDataset> {
        let path = path.as_ref();
        let raw = tch::vision::image::load_dir(path, IMG_SIZE, IMG_SIZE)
            .with_context(|| format!("failed to load images from {}", path.display()))?;
        let scaled = raw.to_kind(Kind::Float) / 255.0;
        let (masked, centers) = mask_images(&scaled, overlap)?;
        let images = masked * 2.0 - 1.0;
        let mut centers = centers * 2.0 - 1.0;
        if shuffle_labels {
            let mut indexes: Vec<i64> = (0..images.size()[0]).collect();
            indexes.shuffle(&mut thread_rng());
            centers = centers.index_select(0, &Tensor::from_slice(&indexes));
        }
        InpaintDataset::new(images, centers, batch_size)
    }

    /// Sequential batches in stored order, partial final batch included.
    /// Restartable: each call yields a fresh pass over the same data.
    pub fn batches(&self, device: Device) -> Iter2 {
        let mut iter = Iter2::new(&self.images, &self.centers, self.batch_size);
        iter.return_smaller_last_batch().to_device(device);
        iter
    }

    pub fn num_samples(&self) -> i64 {
        self.images.size()[0]
    }

    pub fn num_batches(&self) -> i64 {
        (self.num_samples() + self.batch_size - 1) / self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_images(n: i64) -> Tensor {
        Tensor::ones([n, 3, IMG_SIZE, IMG_SIZE], (Kind::Float, Device::Cpu))
    }

    #[test]
    fn masking_extracts_the_center_and_zeroes_the_hole() {
        let overlap = 7;
        let (masked, centers) = mask_images(&unit_images(2), overlap).unwrap();
        assert_eq!(centers.size(), vec![2, 3, MASK_SIZE, MASK_SIZE]);
        assert_eq!(masked.size(), vec![2, 3, IMG_SIZE, IMG_SIZE]);
        // centers come from the unmasked source
        assert_eq!(centers.min().double_value(&[]), 1.0);

        let start = IMG_SIZE - (MASK_SIZE * 3) / 2;
        let hole = MASK_SIZE - 2 * overlap;
        let interior = masked
            .narrow(2, start + overlap, hole)
            .narrow(3, start + overlap, hole);
        assert_eq!(interior.abs().max().double_value(&[]), 0.0);
        // the overlap ring and the surround are untouched
        let ring = masked.narrow(2, start, overlap).narrow(3, start, MASK_SIZE);
        assert_eq!(ring.min().double_value(&[]), 1.0);
        assert_eq!(masked.narrow(2, 0, start).min().double_value(&[]), 1.0);
    }

    #[test]
    fn zero_overlap_masks_the_whole_center() {
        let (masked, _) = mask_images(&unit_images(1), 0).unwrap();
        let start = IMG_SIZE - (MASK_SIZE * 3) / 2;
        let region = masked
            .narrow(2, start, MASK_SIZE)
            .narrow(3, start, MASK_SIZE);
        assert_eq!(region.abs().max().double_value(&[]), 0.0);
    }

    #[test]
    fn invalid_overlap_is_rejected() {
        assert!(validate_overlap(-1).is_err());
        assert!(validate_overlap(MASK_SIZE / 2).is_err());
        assert!(validate_overlap(0).is_ok());
        assert!(validate_overlap(7).is_ok());
    }

    #[test]
    fn construction_rejects_mismatched_or_empty_pairs() {
        let images = Tensor::zeros([4, 3, IMG_SIZE, IMG_SIZE], (Kind::Float, Device::Cpu));
        let centers = Tensor::zeros([3, 3, MASK_SIZE, MASK_SIZE], (Kind::Float, Device::Cpu));
        assert!(InpaintDataset::new(images, centers, 2).is_err());

        let images = Tensor::zeros([0, 3, IMG_SIZE, IMG_SIZE], (Kind::Float, Device::Cpu));
        let centers = Tensor::zeros([0, 3, MASK_SIZE, MASK_SIZE], (Kind::Float, Device::Cpu));
        assert!(InpaintDataset::new(images, centers, 2).is_err());
    }

    #[test]
    fn batches_cover_the_dataset_in_stored_order() {
        let images = Tensor::arange(5, (Kind::Float, Device::Cpu))
            .reshape([5, 1, 1, 1])
            .expand([5, 3, IMG_SIZE, IMG_SIZE], false)
            .copy();
        let centers = Tensor::arange(5, (Kind::Float, Device::Cpu))
            .reshape([5, 1, 1, 1])
            .expand([5, 3, MASK_SIZE, MASK_SIZE], false)
            .copy();
        let dataset = InpaintDataset::new(images, centers, 2).unwrap();
        assert_eq!(dataset.num_batches(), 3);

        for _ in 0..2 {
            let mut seen = 0i64;
            let mut batch_sizes = vec![];
            for (images, centers) in dataset.batches(Device::Cpu) {
                assert_eq!(images.size()[0], centers.size()[0]);
                // stored order: the first sample of this batch is the next index
                assert_eq!(images.double_value(&[0, 0, 0, 0]), seen as f64);
                assert_eq!(centers.double_value(&[0, 0, 0, 0]), seen as f64);
                batch_sizes.push(images.size()[0]);
                seen += images.size()[0];
            }
            assert_eq!(seen, 5);
            assert_eq!(batch_sizes, vec![2, 2, 1]);
        }
    }
}
