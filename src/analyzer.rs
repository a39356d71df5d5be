//! Turns one uploaded image and two optional questions into a caption, a
//! free-form answer and a yes/no label.

use crate::engine::Engines;
use crate::picture::InputImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::*;

/// Caption returned when the request carries no image
pub const NO_IMAGE_PLACEHOLDER: &str = "No image provided.";

/// A question with surrounding whitespace removed. Blank questions are skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Question<'a>(&'a str);

impl<'a> Question<'a> {
    pub fn parse(text: &'a str) -> Option<Self> {
        let text = text.trim();
        match text.is_empty() {
            true => None,
            false => Some(Question(text)),
        }
    }

    pub fn as_str(&self) -> &'a str {
        self.0
    }
}

/// Yes/no reading of a VQA answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryLabel {
    Positive,
    Negative,
}

impl BinaryLabel {
    /// Positive iff the answer contains "yes", ignoring case
    pub fn from_answer(answer: &str) -> Self {
        match answer.to_lowercase().contains("yes") {
            true => BinaryLabel::Positive,
            false => BinaryLabel::Negative,
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            BinaryLabel::Positive => "1  (Yes)",
            BinaryLabel::Negative => "0  (No)",
        }
    }
}

impl fmt::Display for BinaryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// The three outputs shown to the user. Skipped outputs are empty strings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub caption: String,
    pub open_answer: String,
    pub binary_label: String,
}

impl Analysis {
    pub fn no_image() -> Self {
        Analysis {
            caption: NO_IMAGE_PLACEHOLDER.into(),
            ..Default::default()
        }
    }

    pub fn into_triple(self) -> (String, String, String) {
        (self.caption, self.open_answer, self.binary_label)
    }
}

/// An engine call that failed, tagged with the output it was computing
#[derive(Debug)]
pub enum AnalysisError {
    Caption(anyhow::Error),
    OpenQuestion(anyhow::Error),
    BinaryQuestion(anyhow::Error),
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisError::Caption(e) => write!(f, "captioning failed: {e:#}"),
            AnalysisError::OpenQuestion(e) => write!(f, "open question failed: {e:#}"),
            AnalysisError::BinaryQuestion(e) => write!(f, "binary question failed: {e:#}"),
        }
    }
}

impl std::error::Error for AnalysisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AnalysisError::Caption(e)
            | AnalysisError::OpenQuestion(e)
            | AnalysisError::BinaryQuestion(e) => Some(&**e),
        }
    }
}

/// Caption the image, then answer whichever questions are present.
///
/// Without an image no engine is called and the placeholder triple is
/// returned. Engine calls run one after another; the first failure aborts the
/// analysis.
#[tracing::instrument(skip(engines, image), fields(image = ?image.map(|i| (i.width(), i.height()))))]
pub fn analyze(
    engines: &Engines,
    image: Option<&InputImage>,
    open_question: &str,
    binary_question: &str,
) -> Result<Analysis, AnalysisError> {
    let image = match image {
        Some(image) => image.rgb(),
        None => {
            debug!("no image provided, skipping all engines");
            return Ok(Analysis::no_image());
        }
    };
    let limits = engines.limits;

    let caption = engines
        .captioner
        .caption(image, limits.caption)
        .map_err(AnalysisError::Caption)?;
    debug!("caption: {caption:?}");

    let open_answer = match Question::parse(open_question) {
        Some(question) => {
            let answer = engines
                .vqa
                .answer(image, question.as_str(), limits.open_question)
                .map_err(AnalysisError::OpenQuestion)?;
            debug!("open answer: {answer:?}");
            answer
        }
        None => String::new(),
    };

    let binary_label = match Question::parse(binary_question) {
        Some(question) => {
            let answer = engines
                .vqa
                .answer(image, question.as_str(), limits.binary_question)
                .map_err(AnalysisError::BinaryQuestion)?;
            let label = BinaryLabel::from_answer(&answer);
            debug!("binary answer {answer:?} read as {label:?}");
            label.marker().to_string()
        }
        None => String::new(),
    };

    info!("finished analysis");

    Ok(Analysis {
        caption,
        open_answer,
        binary_label,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test::{engines, FakeCaptioner, FakeVqa};
    use image::{Rgb, RgbImage};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn red_car() -> InputImage {
        RgbImage::from_pixel(8, 6, Rgb([200, 10, 10])).into()
    }

    fn car_vqa() -> FakeVqa {
        FakeVqa::with_answers(&[
            ("what color is the car?", "red"),
            ("is there a car in the image?", "yes"),
            ("is it raining?", "no"),
        ])
    }

    #[test]
    fn test_question_presence() {
        assert_eq!(Question::parse(""), None);
        assert_eq!(Question::parse("   "), None);
        assert_eq!(Question::parse("\t\n "), None);
        assert_eq!(Question::parse("  is it red? ").unwrap().as_str(), "is it red?");
    }

    #[test]
    fn test_binary_label_is_case_insensitive() {
        for answer in ["Yes", "YES", "yes", "yes, clearly"] {
            assert_eq!(BinaryLabel::from_answer(answer), BinaryLabel::Positive, "{answer}");
        }
        for answer in ["no", "not sure", ""] {
            assert_eq!(BinaryLabel::from_answer(answer), BinaryLabel::Negative, "{answer}");
        }
    }

    #[test]
    fn test_binary_label_is_a_substring_match() {
        // no other heuristic: "eyes" contains "yes"
        assert_eq!(BinaryLabel::from_answer("eyes"), BinaryLabel::Positive);
        assert_eq!(BinaryLabel::Positive.to_string(), "1  (Yes)");
        assert_eq!(BinaryLabel::Negative.to_string(), "0  (No)");
    }

    #[test]
    fn test_no_image_calls_no_engine() {
        let captioner = Arc::new(FakeCaptioner::default());
        let vqa = Arc::new(car_vqa());
        let engines = engines(captioner.clone(), vqa.clone());

        for (open, binary) in [("", ""), ("what color is the car?", "is there a car in the image?")] {
            let analysis = analyze(&engines, None, open, binary).unwrap();
            assert_eq!(
                analysis.into_triple(),
                ("No image provided.".to_string(), String::new(), String::new())
            );
        }
        assert_eq!(captioner.calls.load(Ordering::SeqCst), 0);
        assert!(vqa.calls().is_empty());
    }

    #[test]
    fn test_blank_questions_only_caption() {
        let captioner = Arc::new(FakeCaptioner::default());
        let vqa = Arc::new(car_vqa());
        let engines = engines(captioner.clone(), vqa.clone());

        let analysis = analyze(&engines, Some(&red_car()), "   ", "").unwrap();
        assert_eq!(analysis.caption, "a 8x6 picture (50)");
        assert_eq!(analysis.open_answer, "");
        assert_eq!(analysis.binary_label, "");
        assert_eq!(captioner.calls.load(Ordering::SeqCst), 1);
        assert!(vqa.calls().is_empty());
    }

    #[test]
    fn test_red_car() {
        let vqa = Arc::new(car_vqa());
        let engines = engines(Arc::default(), vqa.clone());

        let analysis = analyze(
            &engines,
            Some(&red_car()),
            "what color is the car?",
            "is there a car in the image?",
        )
        .unwrap();
        assert!(!analysis.caption.is_empty());
        assert_eq!(analysis.open_answer, "red");
        assert_eq!(analysis.binary_label, BinaryLabel::Positive.marker());

        // open question first, binary question with the short limit
        assert_eq!(
            vqa.calls(),
            vec![
                ("what color is the car?".to_string(), 50),
                ("is there a car in the image?".to_string(), 10),
            ]
        );
    }

    #[test]
    fn test_questions_are_trimmed_before_asking() {
        let vqa = Arc::new(car_vqa());
        let engines = engines(Arc::default(), vqa.clone());

        let analysis = analyze(&engines, Some(&red_car()), "", "  is it raining?\n").unwrap();
        assert_eq!(analysis.open_answer, "");
        assert_eq!(analysis.binary_label, "0  (No)");
        assert_eq!(vqa.calls(), vec![("is it raining?".to_string(), 10)]);
    }

    #[test]
    fn test_binary_label_is_always_a_marker() {
        let engines = engines(Arc::default(), Arc::new(car_vqa()));
        let image = red_car();

        for question in ["is there a car in the image?", "is it raining?", "something odd"] {
            let label = analyze(&engines, Some(&image), "", question)
                .unwrap()
                .binary_label;
            assert!(label == "1  (Yes)" || label == "0  (No)", "{label}");
        }
    }

    #[test]
    fn test_idempotent() {
        let engines = engines(Arc::default(), Arc::new(car_vqa()));
        let image = red_car();

        let first = analyze(&engines, Some(&image), "what color is the car?", "is it raining?");
        let second = analyze(&engines, Some(&image), "what color is the car?", "is it raining?");
        assert_eq!(first.unwrap(), second.unwrap());
    }

    #[test]
    fn test_caption_failure_aborts() {
        let captioner = Arc::new(FakeCaptioner {
            fail: true,
            ..Default::default()
        });
        let vqa = Arc::new(car_vqa());
        let engines = engines(captioner, vqa.clone());

        let err = analyze(&engines, Some(&red_car()), "what color is the car?", "").unwrap_err();
        assert!(matches!(err, AnalysisError::Caption(_)));
        assert!(err.to_string().contains("caption model unavailable"));
        assert!(vqa.calls().is_empty());
    }

    #[test]
    fn test_vqa_failure_names_the_question() {
        let vqa = Arc::new(FakeVqa {
            fail: true,
            ..Default::default()
        });
        let engines = engines(Arc::default(), vqa);

        let err = analyze(&engines, Some(&red_car()), "", "is it raining?").unwrap_err();
        assert!(matches!(err, AnalysisError::BinaryQuestion(_)));

        let err = analyze(&engines, Some(&red_car()), "what color?", "is it raining?").unwrap_err();
        assert!(matches!(err, AnalysisError::OpenQuestion(_)));
        assert!(err.to_string().starts_with("open question failed"));
    }
}
