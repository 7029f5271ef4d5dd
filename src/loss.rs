use tch::{Reduction, Tensor};

/// Default weighting of the reconstruction term against the adversarial term.
pub const WEIGHT_L2: f64 = 0.9;
pub const WEIGHT_ADV: f64 = 0.1;

/// The overlap border is weighted this much more heavily than the interior.
pub const OVERLAP_WEIGHT: f64 = 10.0;

/// Memory layout of image tensors, selecting which axes carry height and width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// NCHW
    ChannelFirst,
    /// NHWC
    ChannelLast,
}

impl Layout {
    pub fn spatial_axes(self) -> (i64, i64) {
        match self {
            Layout::ChannelFirst => (2, 3),
            Layout::ChannelLast => (1, 2),
        }
    }
}

fn bce_with_logits(output: &Tensor, target: &Tensor) -> Tensor {
    output.binary_cross_entropy_with_logits::<Tensor>(target, None, None, Reduction::Mean)
}

/// Interior of the center region, excluding a border of width `overlap` on each side.
fn center_region(t: &Tensor, overlap: i64, layout: Layout) -> Tensor {
    let (h_axis, w_axis) = layout.spatial_axes();
    let size = t.size();
    let (h, w) = (size[h_axis as usize], size[w_axis as usize]);
    t.narrow(h_axis, overlap, h - 2 * overlap)
        .narrow(w_axis, overlap, w - 2 * overlap)
}

/// An `overlap` x `overlap` corner square, top-left or bottom-right.
fn overlap_corner(t: &Tensor, overlap: i64, layout: Layout, bottom_right: bool) -> Tensor {
    let (h_axis, w_axis) = layout.spatial_axes();
    let size = t.size();
    let (h, w) = (size[h_axis as usize], size[w_axis as usize]);
    let (h0, w0) = if bottom_right {
        (h - overlap, w - overlap)
    } else {
        (0, 0)
    };
    t.narrow(h_axis, h0, overlap).narrow(w_axis, w0, overlap)
}

/// Discriminator loss: binary cross entropy of its predictions on real centers
/// against all ones, plus binary cross entropy of its predictions on generated
/// centers against all zeros. Both outputs are raw logits of shape
/// (batch_size, 1, 1, 1), reduced by mean over the batch.
pub fn discriminator_loss(real_output: &Tensor, fake_output: &Tensor) -> Tensor {
    let real_loss = bce_with_logits(real_output, &real_output.ones_like());
    let fake_loss = bce_with_logits(fake_output, &fake_output.zeros_like());
    real_loss + fake_loss
}

/// Generator loss: weighted sum of an adversarial term (how well the generator
/// is tricking the discriminator) and an L2 reconstruction term between the
/// generated and real centers.
///
/// With a nonzero `overlap`, the reconstruction term is split between the
/// interior of the center and the top-left/bottom-right overlap squares, with
/// the squares weighted `OVERLAP_WEIGHT` times more heavily.
pub fn generator_loss(
    fake_output: &Tensor,
    y_true: &Tensor,
    y_pred: &Tensor,
    overlap: i64,
    layout: Layout,
    weight_l2: f64,
    weight_adv: f64,
) -> Tensor {
    let adv_loss = bce_with_logits(fake_output, &fake_output.ones_like());
    let l2_loss = if overlap != 0 {
        let center_loss = center_region(y_pred, overlap, layout)
            .mse_loss(&center_region(y_true, overlap, layout), Reduction::Mean);
        let left_loss = overlap_corner(y_pred, overlap, layout, false).mse_loss(
            &overlap_corner(y_true, overlap, layout, false),
            Reduction::Mean,
        );
        let right_loss = overlap_corner(y_pred, overlap, layout, true).mse_loss(
            &overlap_corner(y_true, overlap, layout, true),
            Reduction::Mean,
        );
        center_loss + OVERLAP_WEIGHT * (left_loss + right_loss)
    } else {
        y_pred.mse_loss(y_true, Reduction::Mean)
    };
    weight_l2 * l2_loss + weight_adv * adv_loss
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Kind;

    fn logit(value: f32) -> Tensor {
        Tensor::from_slice(&[value]).reshape([1, 1, 1, 1])
    }

    #[test]
    fn discriminator_loss_matches_hand_computed_reference() {
        // real logit 2.0 vs ones: ln(1 + e^-2); fake logit 2.0 vs zeros: ln(1 + e^2)
        let loss = discriminator_loss(&logit(2.0), &logit(2.0));
        let expected = (1f64 + (-2f64).exp()).ln() + (1f64 + 2f64.exp()).ln();
        assert!((loss.double_value(&[]) - expected).abs() < 1e-5);
        assert!((loss.double_value(&[]) - 2.2539).abs() < 1e-3);

        // a discriminator that gets both right pays only the two small terms
        let loss = discriminator_loss(&logit(2.0), &logit(-2.0));
        let expected = 2.0 * (1f64 + (-2f64).exp()).ln();
        assert!((loss.double_value(&[]) - expected).abs() < 1e-5);
    }

    #[test]
    fn discriminator_loss_is_non_negative() {
        for (real, fake) in [(5.0, -5.0), (-3.0, 3.0), (0.0, 0.0)] {
            let loss = discriminator_loss(&logit(real), &logit(fake));
            assert!(loss.double_value(&[]) >= 0.0);
        }
    }

    #[test]
    fn generator_loss_without_overlap_reduces_to_weighted_mse() {
        let y_true = Tensor::zeros([1, 4, 4, 3], (Kind::Float, tch::Device::Cpu));
        let y_pred = y_true.ones_like();
        // fake logit 0.0 vs ones: ln 2
        let adv = 2f64.ln();
        let loss = generator_loss(
            &logit(0.0),
            &y_true,
            &y_pred,
            0,
            Layout::ChannelLast,
            WEIGHT_L2,
            WEIGHT_ADV,
        );
        let expected = 0.9 * 1.0 + 0.1 * adv;
        assert!((loss.double_value(&[]) - expected).abs() < 1e-5);
    }

    #[test]
    fn generator_loss_with_overlap_weights_the_corner_squares() {
        // 10x10 with overlap 2: center is 6x6, each corner square 2x2, all
        // off by 1.0, so center MSE = left MSE = right MSE = 1.0
        let y_true = Tensor::zeros([1, 3, 10, 10], (Kind::Float, tch::Device::Cpu));
        let y_pred = y_true.ones_like();
        let loss = generator_loss(
            &logit(0.0),
            &y_true,
            &y_pred,
            2,
            Layout::ChannelFirst,
            WEIGHT_L2,
            WEIGHT_ADV,
        );
        let expected = 0.9 * (1.0 + 10.0 * (1.0 + 1.0)) + 0.1 * 2f64.ln();
        assert!((loss.double_value(&[]) - expected).abs() < 1e-5);
    }

    #[test]
    fn overlap_regions_exclude_the_remaining_border() {
        // Perturb only the border outside the three scored regions (e.g. the
        // top-right corner): the reconstruction term must stay zero.
        let y_true = Tensor::zeros([1, 3, 10, 10], (Kind::Float, tch::Device::Cpu));
        let y_pred = y_true.copy();
        let mut top_right = y_pred.narrow(2, 0, 2).narrow(3, 8, 2);
        let _ = top_right.fill_(5.0);
        let loss = generator_loss(
            &logit(0.0),
            &y_true,
            &y_pred,
            2,
            Layout::ChannelFirst,
            WEIGHT_L2,
            WEIGHT_ADV,
        );
        let adv_only = 0.1 * 2f64.ln();
        assert!((loss.double_value(&[]) - adv_only).abs() < 1e-5);
    }

    #[test]
    fn overlap_slices_are_disjoint_and_layout_independent() {
        let n: i64 = 3 * 10 * 10;
        let nchw =
            Tensor::arange(n, (Kind::Float, tch::Device::Cpu)).reshape([1, 3, 10, 10]) / n as f64;
        let nhwc = nchw.permute([0, 2, 3, 1]);
        let zeros_nchw = nchw.zeros_like();
        let zeros_nhwc = nhwc.zeros_like();

        let first = generator_loss(
            &logit(1.0),
            &zeros_nchw,
            &nchw,
            3,
            Layout::ChannelFirst,
            WEIGHT_L2,
            WEIGHT_ADV,
        );
        let last = generator_loss(
            &logit(1.0),
            &zeros_nhwc,
            &nhwc,
            3,
            Layout::ChannelLast,
            WEIGHT_L2,
            WEIGHT_ADV,
        );
        assert!((first.double_value(&[]) - last.double_value(&[])).abs() < 1e-6);

        // center 4x4 and the two 3x3 corners never overlap on a 10x10 region
        let center = center_region(&nchw, 3, Layout::ChannelFirst);
        let left = overlap_corner(&nchw, 3, Layout::ChannelFirst, false);
        let right = overlap_corner(&nchw, 3, Layout::ChannelFirst, true);
        assert_eq!(center.size(), vec![1, 3, 4, 4]);
        assert_eq!(left.size(), vec![1, 3, 3, 3]);
        assert_eq!(right.size(), vec![1, 3, 3, 3]);
        let l0 = left.double_value(&[0, 0, 0, 0]);
        let r0 = right.double_value(&[0, 0, 0, 0]);
        let c0 = center.double_value(&[0, 0, 0, 0]);
        assert!(l0 < c0 && c0 < r0);
    }
}
