//! The pretrained models the analyzer drives. Both are loaded once at startup
//! and shared read-only between requests through an `Engines` context.

use crate::config::{GenerationSettings, Settings};
use anyhow::Result;
use image::RgbImage;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;

pub mod blip;

/// Produces a free-form description of an image
pub trait CaptionEngine: Send + Sync {
    fn caption(&self, image: &RgbImage, max_new_tokens: usize) -> Result<String>;

    /// Model name shown to users
    fn name(&self) -> &str;
}

/// Answers a natural-language question about an image
pub trait VqaEngine: Send + Sync {
    fn answer(&self, image: &RgbImage, question: &str, max_new_tokens: usize) -> Result<String>;

    /// Model name shown to users
    fn name(&self) -> &str;
}

/// Caps on generated tokens per engine call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationLimits {
    pub caption: usize,
    pub open_question: usize,
    pub binary_question: usize,
}

impl Default for GenerationLimits {
    fn default() -> Self {
        GenerationSettings::default().into()
    }
}

impl From<GenerationSettings> for GenerationLimits {
    fn from(settings: GenerationSettings) -> Self {
        GenerationLimits {
            caption: settings.caption_max_new_tokens,
            open_question: settings.open_max_new_tokens,
            binary_question: settings.binary_max_new_tokens,
        }
    }
}

/// Long-lived handle to both engines, passed by reference to every request
#[derive(Clone)]
pub struct Engines {
    pub captioner: Arc<dyn CaptionEngine>,
    pub vqa: Arc<dyn VqaEngine>,
    pub limits: GenerationLimits,
}

impl Debug for Engines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engines")
            .field("captioner", &self.captioner.name())
            .field("vqa", &self.vqa.name())
            .field("limits", &self.limits)
            .finish()
    }
}

impl Engines {
    pub fn new(
        captioner: Arc<dyn CaptionEngine>,
        vqa: Arc<dyn VqaEngine>,
        limits: GenerationLimits,
    ) -> Self {
        Engines {
            captioner,
            vqa,
            limits,
        }
    }

    /// Load the BLIP captioning and VQA models named in the settings
    pub fn load(settings: &Settings) -> Result<Self> {
        let models = &settings.models;
        let device = blip::parse_device(&models.device)?;

        info!("loading caption model {:?}", models.caption_model);
        let captioner = blip::BlipCaptioner::load(
            &models.caption_model,
            &models.caption_tokenizer,
            device,
            models.image_size,
        )?;

        info!("loading vqa model {:?}", models.vqa_model);
        let vqa = blip::BlipVqa::load(
            &models.vqa_model,
            &models.vqa_tokenizer,
            device,
            models.image_size,
        )?;

        let engines = Engines::new(
            Arc::new(captioner),
            Arc::new(vqa),
            settings.generation.clone().into(),
        );
        info!("engines ready: {engines:?}");
        Ok(engines)
    }
}
