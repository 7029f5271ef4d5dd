use tch::{nn, Tensor};

/// Center discriminator: maps a 64x64 (real or generated) center to a single
/// raw logit per sample, shape (batch_size, 1, 1, 1). The losses work on
/// logits, so there is no final sigmoid.
#[derive(Debug)]
pub struct Discriminator {
    net: nn::SequentialT,
}

impl Discriminator {
    pub fn new(path: nn::Path) -> Discriminator {
        let dim_hidden = 64;
        let down = nn::ConvConfig {
            stride: 2,
            padding: 1,
            ..Default::default()
        };
        let net = nn::seq_t()
            .add(nn::conv2d(&path / "Conv2d_1", 3, dim_hidden, 4, down))
            .add_fn(|x| x.leaky_relu())
            .add(nn::conv2d(&path / "Conv2d_2", dim_hidden, dim_hidden * 2, 4, down))
            .add(nn::batch_norm2d(&path / "batch_norm2d_2", dim_hidden * 2, Default::default()))
            .add_fn(|x| x.leaky_relu())
            .add(nn::conv2d(&path / "Conv2d_3", dim_hidden * 2, dim_hidden * 4, 4, down))
            .add(nn::batch_norm2d(&path / "batch_norm2d_3", dim_hidden * 4, Default::default()))
            .add_fn(|x| x.leaky_relu())
            .add(nn::conv2d(&path / "Conv2d_4", dim_hidden * 4, dim_hidden * 8, 4, down))
            .add(nn::batch_norm2d(&path / "batch_norm2d_4", dim_hidden * 8, Default::default()))
            .add_fn(|x| x.leaky_relu())
            .add(nn::conv2d(&path / "Conv2d_5", dim_hidden * 8, 1,
                            4, nn::ConvConfig { stride: 1, padding: 0, ..Default::default() }));
        Discriminator { net }
    }
}

impl nn::ModuleT for Discriminator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.net.forward_t(xs, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn emits_one_logit_per_sample() {
        let vs = nn::VarStore::new(Device::Cpu);
        let discriminator = Discriminator::new(vs.root());
        let centers = Tensor::zeros([3, 3, 64, 64], (Kind::Float, Device::Cpu));
        let verdicts = centers.apply_t(&discriminator, false);
        assert_eq!(verdicts.size(), vec![3, 1, 1, 1]);
    }
}
