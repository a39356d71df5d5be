//! BLIP captioning and VQA models exported to TorchScript.
//!
//! An exported module exposes a `generate` method. The captioning export takes
//! `(pixel_values, max_new_tokens)`, the VQA export takes
//! `(pixel_values, input_ids, attention_mask, max_new_tokens)`. Both return the
//! generated token ids, shaped `[1, L]` or `[L]`.

use super::{CaptionEngine, VqaEngine};
use anyhow::{anyhow, bail, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::Path;
use std::sync::Mutex;
use tch::{Device, IValue, Kind, Tensor};
use tokenizers::Tokenizer;
use tracing::*;

/// Per-channel mean used by the BLIP image processor
pub const IMAGE_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];

/// Per-channel std used by the BLIP image processor
pub const IMAGE_STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

const GENERATE: &str = "generate";

/// Parse the configured device name
pub fn parse_device(name: &str) -> Result<Device> {
    match name.to_lowercase().as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Ok(Device::Cuda(0)),
        "auto" => Ok(Device::cuda_if_available()),
        other => Err(anyhow!("unknown device {other:?}: expected cpu, cuda or auto")),
    }
}

/// Resize, rescale and normalize an image into a CHW buffer
pub fn pixel_values(image: &RgbImage, size: u32) -> Vec<f32> {
    let resized = imageops::resize(image, size, size, FilterType::CatmullRom);
    let plane = (size * size) as usize;
    let mut data = vec![0f32; 3 * plane];

    for (x, y, pixel) in resized.enumerate_pixels() {
        let offset = (y * size + x) as usize;
        for c in 0..3 {
            data[c * plane + offset] = (pixel[c] as f32 / 255.0 - IMAGE_MEAN[c]) / IMAGE_STD[c];
        }
    }

    data
}

/// A loaded TorchScript export plus the tokenizer that goes with it
#[derive(Debug)]
pub struct BlipModule {
    name: String,

    /// Calls into the module are serialized
    module: Mutex<tch::CModule>,

    tokenizer: Tokenizer,
    device: Device,
    image_size: u32,
}

impl BlipModule {
    pub fn load(model: &Path, tokenizer: &Path, device: Device, image_size: u32) -> Result<Self> {
        if !model.exists() {
            bail!("model not found: {}", model.display());
        }
        if !tokenizer.exists() {
            bail!("tokenizer not found: {}", tokenizer.display());
        }

        let module = tch::CModule::load_on_device(model, device)?;
        let tokenizer = Tokenizer::from_file(tokenizer)
            .map_err(|e| anyhow!("failed to load tokenizer {}: {e}", tokenizer.display()))?;

        let name = model
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "blip".into());

        info!(
            "loaded {name} on {device:?} ({} tokens in vocabulary)",
            tokenizer.get_vocab_size(true)
        );

        Ok(BlipModule {
            name,
            module: Mutex::new(module),
            tokenizer,
            device,
            image_size,
        })
    }

    fn image_tensor(&self, image: &RgbImage) -> Tensor {
        let size = self.image_size as i64;
        Tensor::from_slice(&pixel_values(image, self.image_size))
            .view([1, 3, size, size])
            .to_device(self.device)
    }

    /// Tokenize a question into `(input_ids, attention_mask)`, both `[1, L]`
    fn question_tensors(&self, question: &str) -> Result<(Tensor, Tensor)> {
        let encoding = self
            .tokenizer
            .encode(question, true)
            .map_err(|e| anyhow!("failed to tokenize question: {e}"))?;

        let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();

        Ok((
            Tensor::from_slice(&ids).unsqueeze(0).to_device(self.device),
            Tensor::from_slice(&mask).unsqueeze(0).to_device(self.device),
        ))
    }

    /// Run the module's `generate` method and decode its output
    fn generate(&self, inputs: &[IValue]) -> Result<String> {
        let output = {
            let module = self
                .module
                .lock()
                .map_err(|e| anyhow!("{} is unusable: {e}", self.name))?;
            tch::no_grad(|| module.method_is(GENERATE, inputs))?
        };

        let ids = match output {
            IValue::Tensor(t) => t,
            other => bail!("{} returned {other:?} instead of a tensor", self.name),
        };
        let ids = match ids.dim() {
            1 => ids,
            2 => ids.get(0),
            n => bail!("{} returned a {n}-d tensor of token ids", self.name),
        };
        let ids = Vec::<i64>::try_from(&ids.to_kind(Kind::Int64).to_device(Device::Cpu))?;

        self.decode(&ids)
    }

    fn decode(&self, ids: &[i64]) -> Result<String> {
        let ids: Vec<u32> = ids.iter().filter_map(|&id| u32::try_from(id).ok()).collect();
        let text = self
            .tokenizer
            .decode(&ids, true)
            .map_err(|e| anyhow!("failed to decode {} output: {e}", self.name))?;
        Ok(text.trim().to_string())
    }
}

/// `BlipForConditionalGeneration`, e.g. Salesforce/blip-image-captioning-base
#[derive(Debug)]
pub struct BlipCaptioner(BlipModule);

impl BlipCaptioner {
    pub fn load(model: &Path, tokenizer: &Path, device: Device, image_size: u32) -> Result<Self> {
        Ok(BlipCaptioner(BlipModule::load(model, tokenizer, device, image_size)?))
    }
}

impl CaptionEngine for BlipCaptioner {
    #[tracing::instrument(skip(self, image))]
    fn caption(&self, image: &RgbImage, max_new_tokens: usize) -> Result<String> {
        let pixels = self.0.image_tensor(image);
        self.0.generate(&[
            IValue::Tensor(pixels),
            IValue::Int(max_new_tokens as i64),
        ])
    }

    fn name(&self) -> &str {
        &self.0.name
    }
}

/// `BlipForQuestionAnswering`, e.g. Salesforce/blip-vqa-base
#[derive(Debug)]
pub struct BlipVqa(BlipModule);

impl BlipVqa {
    pub fn load(model: &Path, tokenizer: &Path, device: Device, image_size: u32) -> Result<Self> {
        Ok(BlipVqa(BlipModule::load(model, tokenizer, device, image_size)?))
    }
}

impl VqaEngine for BlipVqa {
    #[tracing::instrument(skip(self, image))]
    fn answer(&self, image: &RgbImage, question: &str, max_new_tokens: usize) -> Result<String> {
        let pixels = self.0.image_tensor(image);
        let (input_ids, attention_mask) = self.0.question_tensors(question)?;
        self.0.generate(&[
            IValue::Tensor(pixels),
            IValue::Tensor(input_ids),
            IValue::Tensor(attention_mask),
            IValue::Int(max_new_tokens as i64),
        ])
    }

    fn name(&self) -> &str {
        &self.0.name
    }
}
