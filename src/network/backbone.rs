use std::path::PathBuf;

use rand::{rngs::StdRng, SeedableRng};
use serde::{Serialize, Deserialize};
use tracing::{info, warn};

use crate::error::{FoodError, Result};
use crate::layers::conv::{Conv2d, ConvActivation};
use crate::math::tensor::ImageTensor;
use crate::network::pretrained;

/// One strided convolution stage of a plain backbone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub filters: usize,
    pub stride: usize,
}

/// Layer layout of the feature extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Architecture {
    /// MobileNetV2: stem, 17 inverted residual blocks and a 1x1 head
    /// convolution. Importable from ImageNet checkpoints.
    MobileNetV2 { width_multiplier: f32 },
    /// Strided 3x3 convolutions with ReLU. Seeded weights only; meant for
    /// smoke runs on small inputs.
    Plain { kernel_size: usize, stages: Vec<StageSpec> },
}

/// Per-channel input normalization applied before the first convolution.
/// Pixels arrive in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// ImageNet statistics used by torchvision and timm checkpoints.
    pub const IMAGENET: Normalization = Normalization { mean: [0.485, 0.456, 0.406], std: [0.229, 0.224, 0.225] };
    pub const IDENTITY: Normalization = Normalization { mean: [0.0; 3], std: [1.0; 3] };
}

/// Architecture and weight source of the frozen feature extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackboneSpec {
    /// Square input resolution in pixels.
    pub input_size: usize,
    pub architecture: Architecture,
    pub normalization: Normalization,
    /// ImageNet weights as `.safetensors`, torchvision or timm naming.
    pub pretrained_weights: Option<PathBuf>,
    /// Fail instead of falling back to seeded weights when the pretrained
    /// file is missing.
    pub require_pretrained: bool,
    /// Seed for the fallback weights.
    pub seed: u64,
}

impl Default for BackboneSpec {
    fn default() -> Self {
        BackboneSpec {
            input_size: 224,
            architecture: Architecture::MobileNetV2 { width_multiplier: 1.0 },
            normalization: Normalization::IMAGENET,
            pretrained_weights: Some(PathBuf::from("weights/mobilenet_v2.safetensors")),
            require_pretrained: false,
            seed: 42,
        }
    }
}

impl BackboneSpec {
    /// A small seeded conv stack with no pretrained file.
    pub fn plain(input_size: usize, stages: Vec<StageSpec>) -> BackboneSpec {
        BackboneSpec {
            input_size,
            architecture: Architecture::Plain { kernel_size: 3, stages },
            normalization: Normalization::IDENTITY,
            pretrained_weights: None,
            require_pretrained: false,
            seed: 42,
        }
    }
}

/// Where the backbone weights came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum WeightOrigin {
    Pretrained { path: PathBuf },
    /// Random He initialization. Features carry no transferred knowledge.
    Seeded { seed: u64 },
}

/// MobileNetV2 inverted residual: optional 1x1 expansion, 3x3 depthwise,
/// linear 1x1 projection, identity shortcut when shapes allow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvertedResidual {
    pub expand: Option<Conv2d>,
    pub depthwise: Conv2d,
    pub project: Conv2d,
    pub residual: bool,
}

impl InvertedResidual {
    fn forward(&self, input: &ImageTensor) -> Result<ImageTensor> {
        let hidden = match &self.expand {
            Some(expand) => self.depthwise.forward(&expand.forward(input)?)?,
            None => self.depthwise.forward(input)?,
        };
        let mut out = self.project.forward(&hidden)?;
        if self.residual {
            if out.shape() != input.shape() {
                return Err(FoodError::shape(format!("{:?}", input.shape()), format!("{:?}", out.shape())));
            }
            out += input;
        }
        Ok(out)
    }

    fn convs(&self) -> impl Iterator<Item = &Conv2d> {
        self.expand.iter().chain([&self.depthwise, &self.project])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "block", rename_all = "snake_case")]
pub enum Block {
    Conv(Conv2d),
    InvertedResidual(InvertedResidual),
}

impl Block {
    fn forward(&self, input: &ImageTensor) -> Result<ImageTensor> {
        match self {
            Block::Conv(conv) => conv.forward(input),
            Block::InvertedResidual(block) => block.forward(input),
        }
    }

    fn convs(&self) -> Box<dyn Iterator<Item = &Conv2d> + '_> {
        match self {
            Block::Conv(conv) => Box::new(std::iter::once(conv)),
            Block::InvertedResidual(block) => Box::new(block.convs()),
        }
    }
}

/// `(expansion, channels, repeats, first stride)` per MobileNetV2 stage.
pub(crate) const MOBILENET_V2_STAGES: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

/// Rounds a scaled channel count to a multiple of 8, never dropping more
/// than 10% below the unrounded value.
pub(crate) fn make_divisible(value: f32, divisor: usize) -> usize {
    let d = divisor as f32;
    let mut rounded = (((value + d / 2.0) / d).floor() * d).max(d) as usize;
    if (rounded as f32) < 0.9 * value {
        rounded += divisor;
    }
    rounded
}

/// Geometry of one inverted residual block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct BlockShape {
    pub stage: usize,
    pub position: usize,
    pub in_channels: usize,
    pub hidden: usize,
    pub out_channels: usize,
    pub stride: usize,
}

impl BlockShape {
    pub fn expands(&self) -> bool {
        self.hidden != self.in_channels
    }

    pub fn residual(&self) -> bool {
        self.stride == 1 && self.in_channels == self.out_channels
    }
}

/// Channel plan of a MobileNetV2 at `width`: stem channels, blocks and
/// head channels.
pub(crate) fn mobilenet_v2_layout(width: f32) -> (usize, Vec<BlockShape>, usize) {
    let stem = make_divisible(32.0 * width, 8);
    let head = make_divisible(1280.0 * width.max(1.0), 8);
    let mut blocks = Vec::new();
    let mut in_channels = stem;
    for (stage, &(t, c, n, s)) in MOBILENET_V2_STAGES.iter().enumerate() {
        let out_channels = make_divisible(c as f32 * width, 8);
        for position in 0..n {
            blocks.push(BlockShape {
                stage,
                position,
                in_channels,
                hidden: in_channels * t,
                out_channels,
                stride: if position == 0 { s } else { 1 },
            });
            in_channels = out_channels;
        }
    }
    (stem, blocks, head)
}

/// Frozen convolutional feature extractor.
///
/// There is no gradient path through the backbone: only `feature_map` is
/// exposed, so training can never modify these weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backbone {
    input_size: usize,
    normalization: Normalization,
    blocks: Vec<Block>,
    origin: WeightOrigin,
}

impl Backbone {
    /// Imports the pretrained file when it exists. A missing file falls
    /// back to seeded weights with a warning, or fails when
    /// `require_pretrained` is set.
    pub fn from_spec(spec: &BackboneSpec) -> Result<Backbone> {
        if spec.input_size == 0 {
            return Err(FoodError::config("backbone input size must be positive"));
        }
        let path = match &spec.pretrained_weights {
            Some(path) if path.is_file() => path,
            Some(path) => {
                if spec.require_pretrained {
                    return Err(FoodError::config(format!("pretrained weights {} not found", path.display())));
                }
                warn!(
                    path = %path.display(),
                    "pretrained weights not found; using seeded backbone, features will not transfer"
                );
                return Backbone::seeded(spec);
            }
            None => {
                if spec.require_pretrained {
                    return Err(FoodError::config("pretrained weights required but none configured"));
                }
                return Backbone::seeded(spec);
            }
        };

        let width = match &spec.architecture {
            Architecture::MobileNetV2 { width_multiplier } => *width_multiplier,
            Architecture::Plain { .. } => {
                return Err(FoodError::config("only the mobilenet_v2 architecture imports pretrained weights"))
            }
        };
        let blocks = pretrained::load_mobilenet_v2(path, width)?;
        let backbone = Backbone {
            input_size: spec.input_size,
            normalization: spec.normalization,
            blocks,
            origin: WeightOrigin::Pretrained { path: path.clone() },
        };
        backbone.validate()?;
        info!(path = %path.display(), params = backbone.parameter_count(), "loaded pretrained backbone");
        Ok(backbone)
    }

    /// Deterministic He-initialized weights derived from `spec.seed`.
    pub fn seeded(spec: &BackboneSpec) -> Result<Backbone> {
        if spec.input_size == 0 {
            return Err(FoodError::config("backbone input size must be positive"));
        }
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let blocks = match &spec.architecture {
            Architecture::MobileNetV2 { width_multiplier } => {
                if !(*width_multiplier > 0.0) {
                    return Err(FoodError::config("width multiplier must be positive"));
                }
                let (stem, shapes, head) = mobilenet_v2_layout(*width_multiplier);
                let mut blocks = vec![Block::Conv(Conv2d::he(3, stem, 3, 2, 1, ConvActivation::Relu6, &mut rng))];
                for shape in &shapes {
                    let expand = shape.expands().then(|| {
                        Conv2d::he(shape.in_channels, shape.hidden, 1, 1, 1, ConvActivation::Relu6, &mut rng)
                    });
                    let depthwise = Conv2d::he(shape.hidden, shape.hidden, 3, shape.stride, shape.hidden, ConvActivation::Relu6, &mut rng);
                    let project = Conv2d::he(shape.hidden, shape.out_channels, 1, 1, 1, ConvActivation::Linear, &mut rng);
                    blocks.push(Block::InvertedResidual(InvertedResidual { expand, depthwise, project, residual: shape.residual() }));
                }
                let last = shapes.last().map(|s| s.out_channels).unwrap_or(stem);
                blocks.push(Block::Conv(Conv2d::he(last, head, 1, 1, 1, ConvActivation::Relu6, &mut rng)));
                blocks
            }
            Architecture::Plain { kernel_size, stages } => {
                let mut in_channels = 3;
                let mut blocks = Vec::with_capacity(stages.len());
                for stage in stages {
                    if stage.filters == 0 || stage.stride == 0 {
                        return Err(FoodError::config("backbone stages need positive filters and stride"));
                    }
                    blocks.push(Block::Conv(Conv2d::he(
                        in_channels,
                        stage.filters,
                        *kernel_size,
                        stage.stride,
                        1,
                        ConvActivation::Relu,
                        &mut rng,
                    )));
                    in_channels = stage.filters;
                }
                blocks
            }
        };
        Ok(Backbone {
            input_size: spec.input_size,
            normalization: spec.normalization,
            blocks,
            origin: WeightOrigin::Seeded { seed: spec.seed },
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn origin(&self) -> &WeightOrigin {
        &self.origin
    }

    pub fn is_pretrained(&self) -> bool {
        matches!(self.origin, WeightOrigin::Pretrained { .. })
    }

    /// Channels of the final feature map (3 for an empty stack).
    pub fn feature_dim(&self) -> usize {
        self.blocks
            .iter()
            .rev()
            .flat_map(|b| b.convs().last())
            .map(|c| c.out_channels)
            .next()
            .unwrap_or(3)
    }

    pub fn parameter_count(&self) -> usize {
        self.blocks.iter().flat_map(Block::convs).map(Conv2d::parameter_count).sum()
    }

    /// Checks that consecutive convolutions agree on channel counts.
    pub fn validate(&self) -> Result<()> {
        let mut channels = 3;
        for conv in self.blocks.iter().flat_map(Block::convs) {
            conv.validate()?;
            if conv.in_channels != channels {
                return Err(FoodError::shape(
                    format!("convolution with {} input channels", channels),
                    format!("convolution with {} input channels", conv.in_channels),
                ));
            }
            channels = conv.out_channels;
        }
        if self.normalization.std.iter().any(|s| !(*s > 0.0)) {
            return Err(FoodError::artifact("normalization std must be positive"));
        }
        Ok(())
    }

    fn normalize(&self, image: &ImageTensor) -> ImageTensor {
        let Normalization { mean, std } = self.normalization;
        if self.normalization == Normalization::IDENTITY {
            return image.clone();
        }
        let mut out = image.clone();
        for y in 0..out.height() {
            for x in 0..out.width() {
                for (c, v) in out.pixel_mut(y, x).iter_mut().enumerate() {
                    *v = (*v - mean[c]) / std[c];
                }
            }
        }
        out
    }

    /// Runs the network over one `input_size × input_size × 3` image.
    pub fn feature_map(&self, image: &ImageTensor) -> Result<ImageTensor> {
        let expected = [self.input_size, self.input_size, 3];
        if image.shape() != expected {
            return Err(FoodError::shape(format!("{:?}", expected), format!("{:?}", image.shape())));
        }
        let mut current = self.normalize(image);
        for block in &self.blocks {
            current = block.forward(&current)?;
        }
        Ok(current)
    }
}
