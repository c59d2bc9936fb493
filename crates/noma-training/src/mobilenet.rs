//! MobileNet-V3 Small feature extractor.
//!
//! Architecture (Howard et al., 2019), small variant:
//! - Stem: 3x3 conv, stride 2, 16 channels, hard-swish
//! - 11 inverted residual blocks, some with squeeze-and-excitation
//! - 1x1 conv to 576 channels, global average pooling
//! - Linear 576 -> 1024, hard-swish, dropout 0.2
//!
//! The terminal classification layer is not part of this module; the
//! classifier attaches its own head to the 1024-wide features.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{activation::relu, backend::Backend, Tensor},
};

/// Width of the features produced by [`MobileNetV3Small::forward`].
pub const FEATURE_WIDTH: usize = 1024;

const STEM_CHANNELS: usize = 16;
const LAST_CONV_CHANNELS: usize = 576;
const DROPOUT: f64 = 0.2;
const BN_EPSILON: f64 = 1e-3;
const BN_MOMENTUM: f64 = 0.01;

/// `(kernel, expanded, out, squeeze_excite, hard_swish, stride)` per block.
const BLOCKS: [(usize, usize, usize, bool, bool, usize); 11] = [
    (3, 16, 16, true, false, 2),
    (3, 72, 24, false, false, 2),
    (3, 88, 24, false, false, 1),
    (5, 96, 40, true, true, 2),
    (5, 240, 40, true, true, 1),
    (5, 240, 40, true, true, 1),
    (5, 120, 48, true, true, 1),
    (5, 144, 48, true, true, 1),
    (5, 288, 96, true, true, 2),
    (5, 576, 96, true, true, 1),
    (5, 576, 96, true, true, 1),
];

pub fn hard_swish<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clone() * hard_sigmoid(x)
}

pub fn hard_sigmoid<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.add_scalar(3.0).clamp(0.0, 6.0).div_scalar(6.0)
}

/// Round `value` to a multiple of 8 without dropping more than 10%.
fn make_divisible(value: usize) -> usize {
    let divisor = 8;
    let rounded = ((value + divisor / 2) / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * value as f64 {
        rounded + divisor
    } else {
        rounded
    }
}

fn conv2d<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    groups: usize,
    device: &B::Device,
) -> Conv2d<B> {
    let padding = (kernel - 1) / 2;
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_groups(groups)
        .with_bias(false)
        .init(device)
}

fn batch_norm<B: Backend>(channels: usize, device: &B::Device) -> BatchNorm<B, 2> {
    BatchNormConfig::new(channels)
        .with_epsilon(BN_EPSILON)
        .with_momentum(BN_MOMENTUM)
        .init(device)
}

/// Convolution, batch norm, then ReLU or hard-swish.
#[derive(Module, Debug)]
pub struct ConvNormActivation<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    hard_swish: bool,
}

impl<B: Backend> ConvNormActivation<B> {
    pub fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        groups: usize,
        hard_swish: bool,
        device: &B::Device,
    ) -> Self {
        Self {
            conv: conv2d(channels, kernel, stride, groups, device),
            norm: batch_norm(channels[1], device),
            hard_swish,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.norm.forward(self.conv.forward(x));
        if self.hard_swish {
            hard_swish(x)
        } else {
            relu(x)
        }
    }
}

/// Linear 1x1 projection with batch norm and no activation.
#[derive(Module, Debug)]
pub struct ConvNorm<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvNorm<B> {
    pub fn new(channels: [usize; 2], device: &B::Device) -> Self {
        Self {
            conv: conv2d(channels, 1, 1, 1, device),
            norm: batch_norm(channels[1], device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(self.conv.forward(x))
    }
}

/// Channel attention: pool, squeeze, excite, rescale.
#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    pool: AdaptiveAvgPool2d,
    fc1: Conv2d<B>,
    fc2: Conv2d<B>,
}

impl<B: Backend> SqueezeExcitation<B> {
    pub fn new(channels: usize, squeeze: usize, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: Conv2dConfig::new([channels, squeeze], [1, 1]).init(device),
            fc2: Conv2dConfig::new([squeeze, channels], [1, 1]).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.pool.forward(x.clone());
        let scale = relu(self.fc1.forward(scale));
        let scale = hard_sigmoid(self.fc2.forward(scale));
        x * scale
    }
}

/// Expand (optional), depthwise, squeeze-excite (optional), project.
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvNormActivation<B>>,
    depthwise: ConvNormActivation<B>,
    squeeze_excite: Option<SqueezeExcitation<B>>,
    project: ConvNorm<B>,
    use_residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        kernel: usize,
        expanded: usize,
        out_channels: usize,
        squeeze_excite: bool,
        hard_swish: bool,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let expand = (expanded != in_channels).then(|| {
            ConvNormActivation::new([in_channels, expanded], 1, 1, 1, hard_swish, device)
        });
        let depthwise =
            ConvNormActivation::new([expanded, expanded], kernel, stride, expanded, hard_swish, device);
        let squeeze_excite = squeeze_excite
            .then(|| SqueezeExcitation::new(expanded, make_divisible(expanded / 4), device));

        Self {
            expand,
            depthwise,
            squeeze_excite,
            project: ConvNorm::new([expanded, out_channels], device),
            use_residual: stride == 1 && in_channels == out_channels,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input.clone();
        if let Some(expand) = &self.expand {
            x = expand.forward(x);
        }
        x = self.depthwise.forward(x);
        if let Some(se) = &self.squeeze_excite {
            x = se.forward(x);
        }
        x = self.project.forward(x);

        if self.use_residual {
            x + input
        } else {
            x
        }
    }
}

/// MobileNet-V3 Small without its terminal classification layer.
#[derive(Module, Debug)]
pub struct MobileNetV3Small<B: Backend> {
    stem: ConvNormActivation<B>,
    blocks: Vec<InvertedResidual<B>>,
    last_conv: ConvNormActivation<B>,
    pool: AdaptiveAvgPool2d,
    pre_classifier: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> MobileNetV3Small<B> {
    pub fn new(device: &B::Device) -> Self {
        let stem = ConvNormActivation::new([3, STEM_CHANNELS], 3, 2, 1, true, device);

        let mut in_channels = STEM_CHANNELS;
        let blocks = BLOCKS
            .iter()
            .map(|&(kernel, expanded, out, se, hs, stride)| {
                let block =
                    InvertedResidual::new(in_channels, kernel, expanded, out, se, hs, stride, device);
                in_channels = out;
                block
            })
            .collect();

        Self {
            stem,
            blocks,
            last_conv: ConvNormActivation::new(
                [in_channels, LAST_CONV_CHANNELS],
                1,
                1,
                1,
                true,
                device,
            ),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            pre_classifier: LinearConfig::new(LAST_CONV_CHANNELS, FEATURE_WIDTH).init(device),
            dropout: DropoutConfig::new(DROPOUT).init(),
        }
    }

    /// `[batch, 3, H, W]` images to `[batch, FEATURE_WIDTH]` features.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.stem.forward(input);
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.pool.forward(self.last_conv.forward(x));
        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = hard_swish(self.pre_classifier.forward(x));
        self.dropout.forward(x)
    }
}
