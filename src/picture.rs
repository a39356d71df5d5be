//! Uploaded images, decoded and converted to 3-channel RGB

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, RgbImage};
use std::fmt::Debug;

/// An image received with a request. Only format conversion happens here;
/// resizing and normalization belong to the engines
#[derive(Clone, PartialEq)]
pub struct InputImage {
    rgb: RgbImage,
}

impl Debug for InputImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "InputImage {{ img: <data>, width: {}, height: {} }}",
            self.rgb.width(),
            self.rgb.height()
        )
    }
}

impl InputImage {
    /// Decode encoded image bytes (png, jpeg, ...)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("could not decode image")?;
        Ok(image.into())
    }

    /// Decode a base 64 image, with or without a `data:<mime>;base64,` prefix
    pub fn from_base64(data: &str) -> Result<Self> {
        let data = strip_data_url(data.trim());
        let bytes = general_purpose::STANDARD
            .decode(data)
            .map_err(|e| anyhow!("invalid base 64 image: {e}"))?;
        Self::from_bytes(&bytes)
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.rgb
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }
}

impl From<DynamicImage> for InputImage {
    fn from(image: DynamicImage) -> Self {
        InputImage {
            rgb: image.into_rgb8(),
        }
    }
}

impl From<RgbImage> for InputImage {
    fn from(rgb: RgbImage) -> Self {
        InputImage { rgb }
    }
}

fn strip_data_url(data: &str) -> &str {
    match data.strip_prefix("data:") {
        Some(rest) => match rest.split_once(";base64,") {
            Some((_, payload)) => payload,
            None => data,
        },
        None => data,
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use base64::Engine as _;
    use image::{ImageOutputFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    /// A small png with transparency, encoded as base 64
    pub fn get_test_image_b64() -> String {
        let img = RgbaImage::from_fn(4, 3, |x, y| Rgba([x as u8 * 60, y as u8 * 80, 200, 128]));
        let mut data = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut data), ImageOutputFormat::Png)
            .unwrap();
        general_purpose::STANDARD.encode(data)
    }

    #[test]
    fn test_decode_converts_to_rgb() {
        let image = InputImage::from_base64(&get_test_image_b64()).unwrap();
        assert_eq!((image.width(), image.height()), (4, 3));
        assert_eq!(image.rgb().get_pixel(1, 2).0, [60, 160, 200]);
    }

    #[test]
    fn test_grayscale_is_expanded() {
        let gray = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(2, 2, image::Luma([7])));
        let image = InputImage::from(gray);
        assert_eq!(image.rgb().get_pixel(0, 0).0, [7, 7, 7]);
    }

    #[test]
    fn test_data_url_prefix() {
        let url = format!("data:image/png;base64,{}", get_test_image_b64());
        assert!(InputImage::from_base64(&url).is_ok());
    }

    #[test]
    fn test_bad_input() {
        assert!(InputImage::from_base64("not base64 at all!").is_err());
        let not_an_image = general_purpose::STANDARD.encode(b"hello");
        assert!(InputImage::from_base64(&not_an_image).is_err());
    }
}
