//! Import of ImageNet MobileNetV2 checkpoints stored as `.safetensors`.
//!
//! Two tensor naming schemes are recognised: torchvision
//! (`features.0.0.weight`, ...) and timm (`conv_stem.weight`,
//! `blocks.i.j.conv_dw.weight`, ...). Batch normalization is folded into
//! each convolution on import; classifier tensors are ignored.

use std::collections::HashMap;
use std::path::Path;

use safetensors::{tensor::Dtype, SafeTensors};
use tracing::debug;

use crate::error::{FoodError, Result};
use crate::layers::conv::{BatchNorm, Conv2d, ConvActivation};
use crate::network::backbone::{mobilenet_v2_layout, Block, BlockShape, InvertedResidual};

/// Epsilon of the batch-norm layers in both torchvision and timm.
const BN_EPS: f32 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Schema {
    Torchvision,
    Timm,
}

/// Tensor name prefixes of one convolution and the batch norm after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConvSlot {
    pub conv: String,
    pub bn: String,
}

impl ConvSlot {
    fn new(conv: impl Into<String>, bn: impl Into<String>) -> Self {
        ConvSlot { conv: conv.into(), bn: bn.into() }
    }
}

/// Slots of one inverted residual block.
pub(crate) struct BlockSlots {
    pub expand: Option<ConvSlot>,
    pub depthwise: ConvSlot,
    pub project: ConvSlot,
}

impl Schema {
    fn detect<'a>(mut names: impl Iterator<Item = &'a str>) -> Option<Schema> {
        names.find_map(|name| match name {
            "features.0.0.weight" => Some(Schema::Torchvision),
            "conv_stem.weight" => Some(Schema::Timm),
            _ => None,
        })
    }

    pub fn stem(self) -> ConvSlot {
        match self {
            Schema::Torchvision => ConvSlot::new("features.0.0", "features.0.1"),
            Schema::Timm => ConvSlot::new("conv_stem", "bn1"),
        }
    }

    /// `index` counts blocks across all stages, starting at 0.
    pub fn block(self, index: usize, shape: &BlockShape) -> BlockSlots {
        match self {
            Schema::Torchvision => {
                let p = format!("features.{}.conv", index + 1);
                if shape.expands() {
                    BlockSlots {
                        expand: Some(ConvSlot::new(format!("{p}.0.0"), format!("{p}.0.1"))),
                        depthwise: ConvSlot::new(format!("{p}.1.0"), format!("{p}.1.1")),
                        project: ConvSlot::new(format!("{p}.2"), format!("{p}.3")),
                    }
                } else {
                    BlockSlots {
                        expand: None,
                        depthwise: ConvSlot::new(format!("{p}.0.0"), format!("{p}.0.1")),
                        project: ConvSlot::new(format!("{p}.1"), format!("{p}.2")),
                    }
                }
            }
            Schema::Timm => {
                let p = format!("blocks.{}.{}", shape.stage, shape.position);
                if shape.expands() {
                    BlockSlots {
                        expand: Some(ConvSlot::new(format!("{p}.conv_pw"), format!("{p}.bn1"))),
                        depthwise: ConvSlot::new(format!("{p}.conv_dw"), format!("{p}.bn2")),
                        project: ConvSlot::new(format!("{p}.conv_pwl"), format!("{p}.bn3")),
                    }
                } else {
                    BlockSlots {
                        expand: None,
                        depthwise: ConvSlot::new(format!("{p}.conv_dw"), format!("{p}.bn1")),
                        project: ConvSlot::new(format!("{p}.conv_pw"), format!("{p}.bn2")),
                    }
                }
            }
        }
    }

    pub fn head(self, blocks: usize) -> ConvSlot {
        match self {
            Schema::Torchvision => ConvSlot::new(format!("features.{}.0", blocks + 1), format!("features.{}.1", blocks + 1)),
            Schema::Timm => ConvSlot::new("conv_head", "bn2"),
        }
    }
}

/// Decoded f32 tensors by name.
struct TensorStore<'a> {
    source: &'a Path,
    tensors: HashMap<String, (Vec<usize>, Vec<f32>)>,
}

impl<'a> TensorStore<'a> {
    fn read(source: &'a Path, bytes: &[u8]) -> Result<Self> {
        let st = SafeTensors::deserialize(bytes)
            .map_err(|e| FoodError::artifact(format!("{}: not a safetensors file: {}", source.display(), e)))?;
        let mut tensors = HashMap::new();
        for (name, view) in st.tensors() {
            let data = view.data();
            let values: Vec<f32> = match view.dtype() {
                Dtype::F32 => data.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect(),
                Dtype::F16 => data.chunks_exact(2).map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32()).collect(),
                Dtype::BF16 => data.chunks_exact(2).map(|b| half::bf16::from_le_bytes([b[0], b[1]]).to_f32()).collect(),
                other => {
                    debug!(tensor = %name, dtype = ?other, "skipping non-float tensor");
                    continue;
                }
            };
            tensors.insert(name, (view.shape().to_vec(), values));
        }
        Ok(TensorStore { source, tensors })
    }

    fn take(&mut self, name: &str, shape: &[usize]) -> Result<Vec<f32>> {
        let (actual, values) = self.tensors.remove(name).ok_or_else(|| {
            FoodError::artifact(format!("{}: missing tensor {}", self.source.display(), name))
        })?;
        if actual != shape {
            return Err(FoodError::shape(
                format!("{} with shape {:?}", name, shape),
                format!("{:?}", actual),
            ));
        }
        Ok(values)
    }

    fn batch_norm(&mut self, prefix: &str, channels: usize) -> Result<BatchNorm> {
        Ok(BatchNorm {
            gamma: self.take(&format!("{prefix}.weight"), &[channels])?,
            beta: self.take(&format!("{prefix}.bias"), &[channels])?,
            mean: self.take(&format!("{prefix}.running_mean"), &[channels])?,
            var: self.take(&format!("{prefix}.running_var"), &[channels])?,
            eps: BN_EPS,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn conv(
        &mut self,
        slot: &ConvSlot,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        activation: ConvActivation,
    ) -> Result<Conv2d> {
        let shape = [out_channels, in_channels / groups, kernel_size, kernel_size];
        let oihw = self.take(&format!("{}.weight", slot.conv), &shape)?;
        let mut conv = Conv2d::from_oihw(in_channels, out_channels, kernel_size, stride, groups, activation, &oihw)?;
        conv.fold_batch_norm(&self.batch_norm(&slot.bn, out_channels)?)?;
        Ok(conv)
    }
}

/// Reads a MobileNetV2 checkpoint at `width` into backbone blocks.
pub(crate) fn load_mobilenet_v2(path: &Path, width: f32) -> Result<Vec<Block>> {
    let bytes = std::fs::read(path)?;
    let mut store = TensorStore::read(path, &bytes)?;
    let schema = Schema::detect(store.tensors.keys().map(String::as_str)).ok_or_else(|| {
        FoodError::artifact(format!("{}: not a torchvision or timm MobileNetV2 checkpoint", path.display()))
    })?;
    debug!(path = %path.display(), schema = ?schema, tensors = store.tensors.len(), "reading checkpoint");

    let (stem, shapes, head) = mobilenet_v2_layout(width);
    let mut blocks = Vec::with_capacity(shapes.len() + 2);
    blocks.push(Block::Conv(store.conv(&schema.stem(), 3, stem, 3, 2, 1, ConvActivation::Relu6)?));

    for (index, shape) in shapes.iter().enumerate() {
        let slots = schema.block(index, shape);
        let expand = match &slots.expand {
            Some(slot) => Some(store.conv(slot, shape.in_channels, shape.hidden, 1, 1, 1, ConvActivation::Relu6)?),
            None => None,
        };
        let depthwise = store.conv(&slots.depthwise, shape.hidden, shape.hidden, 3, shape.stride, shape.hidden, ConvActivation::Relu6)?;
        let project = store.conv(&slots.project, shape.hidden, shape.out_channels, 1, 1, 1, ConvActivation::Linear)?;
        blocks.push(Block::InvertedResidual(InvertedResidual { expand, depthwise, project, residual: shape.residual() }));
    }

    let last = shapes.last().map(|s| s.out_channels).unwrap_or(stem);
    blocks.push(Block::Conv(store.conv(&schema.head(shapes.len()), last, head, 1, 1, 1, ConvActivation::Relu6)?));

    let leftover: Vec<&String> = store.tensors.keys().filter(|k| !k.starts_with("classifier")).collect();
    if !leftover.is_empty() {
        debug!(count = leftover.len(), "checkpoint tensors not used by the backbone");
    }
    Ok(blocks)
}
