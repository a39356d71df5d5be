use crate::engine::GenerationLimits;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A base 64 image with optional size hints from the client
#[derive(Deserialize, Serialize)]
pub struct B64Image {
    pub image: String,

    /// Accepted for compatibility and ignored; the decoded image's own size
    /// is used
    pub height: Option<u32>,

    /// Ignored, see `height`
    pub width: Option<u32>,
}

impl Debug for B64Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "B64Image {{ img: <data>, height: {:?}, width: {:?} }}",
            self.height, self.width
        )
    }
}

/// Either a bare base 64 string or a `B64Image` object
#[derive(Deserialize)]
#[serde(untagged)]
pub enum ImagePayload {
    Bare(String),
    Image(B64Image),
}

impl Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImagePayload::Bare(_) => write!(f, "Bare(<data>)"),
            ImagePayload::Image(image) => write!(f, "Image({image:?})"),
        }
    }
}

impl ImagePayload {
    /// The encoded data, `None` when blank
    pub fn data(&self) -> Option<&str> {
        let data = match self {
            ImagePayload::Bare(data) => data,
            ImagePayload::Image(image) => &image.image,
        };
        match data.trim().is_empty() {
            true => None,
            false => Some(data),
        }
    }
}

/// Body of `POST /analyze`. Every field may be omitted
#[derive(Deserialize, Debug, Default)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub image: Option<ImagePayload>,

    #[serde(default)]
    pub open_question: String,

    #[serde(default)]
    pub binary_question: String,
}

/// A pair of example questions offered by the page
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExampleQuestions {
    pub open_question: String,
    pub binary_question: String,
}

/// Example questions, applied to whichever image is currently selected
pub const EXAMPLES: [(&str, &str); 3] = [
    ("What is happening in this image?", "Is there a person in the image?"),
    ("What type of building is shown?", "Is the image outdoors?"),
    ("What is the dominant color in the image?", "Is there a car in the image?"),
];

pub fn examples() -> Vec<ExampleQuestions> {
    EXAMPLES
        .iter()
        .map(|(open, binary)| ExampleQuestions {
            open_question: open.to_string(),
            binary_question: binary.to_string(),
        })
        .collect()
}

/// Which model serves each output
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ModelsResponse {
    pub caption_model: String,
    pub vqa_model: String,
    pub caption_max_new_tokens: usize,
    pub open_max_new_tokens: usize,
    pub binary_max_new_tokens: usize,
}

impl ModelsResponse {
    pub fn new(caption_model: &str, vqa_model: &str, limits: GenerationLimits) -> Self {
        ModelsResponse {
            caption_model: caption_model.into(),
            vqa_model: vqa_model.into(),
            caption_max_new_tokens: limits.caption,
            open_max_new_tokens: limits.open_question,
            binary_max_new_tokens: limits.binary_question,
        }
    }
}
