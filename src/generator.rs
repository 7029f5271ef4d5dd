use tch::{nn, Tensor};

/// Context-encoder generator: encodes the masked 128x128 image down to a
/// 1x1 bottleneck and decodes it into the missing 64x64 center.
#[derive(Debug)]
pub struct Generator {
    net: nn::SequentialT,
}

impl Generator {
    pub fn new(path: nn::Path) -> Generator {
        let dim_hidden = 64;
        let dim_latent = 1024;
        let down = nn::ConvConfig {
            stride: 2,
            padding: 1,
            ..Default::default()
        };
        let up = nn::ConvTransposeConfig {
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
            .add(nn::conv2d(&path / "Conv2d_5", dim_hidden * 8, dim_hidden * 8, 4, down))
            .add(nn::batch_norm2d(&path / "batch_norm2d_5", dim_hidden * 8, Default::default()))
            .add_fn(|x| x.leaky_relu())
            .add(nn::conv2d(&path / "Conv2d_6", dim_hidden * 8, dim_latent,
                            4, nn::ConvConfig { stride: 1, padding: 0, ..Default::default() }))
            .add_fn(|x| x.leaky_relu())
            .add(nn::conv_transpose2d(&path / "ConvTranspose2d_1", dim_latent, dim_hidden * 8,
                            4, nn::ConvTransposeConfig { stride: 1, padding: 0, ..Default::default() }))
            .add(nn::batch_norm2d(&path / "batch_norm2d_6", dim_hidden * 8, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::conv_transpose2d(&path / "ConvTranspose2d_2", dim_hidden * 8, dim_hidden * 4, 4, up))
            .add(nn::batch_norm2d(&path / "batch_norm2d_7", dim_hidden * 4, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::conv_transpose2d(&path / "ConvTranspose2d_3", dim_hidden * 4, dim_hidden * 2, 4, up))
            .add(nn::batch_norm2d(&path / "batch_norm2d_8", dim_hidden * 2, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::conv_transpose2d(&path / "ConvTranspose2d_4", dim_hidden * 2, dim_hidden, 4, up))
            .add(nn::batch_norm2d(&path / "batch_norm2d_9", dim_hidden, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::conv_transpose2d(&path / "ConvTranspose2d_5", dim_hidden, 3, 4, up))
            .add_fn(|x| x.tanh());
        Generator { net }
    }
}

impl nn::ModuleT for Generator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.net.forward_t(xs, train)
    }
}
