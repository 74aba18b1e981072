use std::io::Cursor;

use base64::prelude::*;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ImageFormat, RgbImage, RgbaImage};
use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid image data: {0}")]
    Undecodable(#[source] image::ImageError),
    #[error("Unsupported image format. Must be RGB or grayscale.")]
    UnsupportedChannels(u8),
    #[error("Empty image")]
    Empty,
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("JPEG encode failed: {0}")]
    Jpeg(#[source] image::ImageError),
    #[error("PNG encode failed: {0}")]
    Png(#[source] image::ImageError),
    #[error("frame buffer does not match its dimensions")]
    InvalidFrame,
}

/// Decode uploaded bytes into an RGB frame.
///
/// Grayscale and RGBA are converted; gray+alpha is rejected.
pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    let image = image::load_from_memory(bytes).map_err(DecodeError::Undecodable)?;
    let channels = image.color().channel_count();
    if channels == 2 {
        return Err(DecodeError::UnsupportedChannels(channels));
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(DecodeError::Empty);
    }
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(Frame::new(rgb.into_raw(), width, height, 3))
}

pub fn to_rgb_image(frame: &Frame) -> Option<RgbImage> {
    RgbImage::from_raw(frame.width(), frame.height(), frame.data().to_vec())
}

/// Resize to exactly `width` x `height`.
pub fn resize(frame: &Frame, width: u32, height: u32) -> Option<Frame> {
    let src = to_rgb_image(frame)?;
    let scaled = image::imageops::resize(&src, width, height, FilterType::Triangle);
    Some(Frame::new(scaled.into_raw(), width, height, 3))
}

/// Shrink so the longest side is at most `max_side`, keeping aspect ratio.
/// Frames already within bounds are returned unchanged.
pub fn fit_within(frame: Frame, max_side: u32) -> Frame {
    let longest = frame.longest_side();
    if max_side == 0 || longest <= max_side {
        return frame;
    }
    let scale = max_side as f64 / longest as f64;
    let width = ((frame.width() as f64 * scale).round() as u32).max(1);
    let height = ((frame.height() as f64 * scale).round() as u32).max(1);
    match resize(&frame, width, height) {
        Some(scaled) => scaled,
        None => frame,
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(EncodeError::Jpeg)?;
    Ok(buffer)
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, EncodeError> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(EncodeError::Png)?;
    Ok(buffer)
}

/// `data:<mime>;base64,<payload>`
pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64_STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayAlphaImage, GrayImage, LumaA, Rgba};

    fn encode<P>(image: &image::ImageBuffer<P, Vec<u8>>) -> Vec<u8>
    where
        P: image::PixelWithColorType<Subpixel = u8>,
    {
        let mut buffer = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_decode_rgb_png() {
        let img = RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30]));
        let frame = decode(&encode(&img)).unwrap();
        assert_eq!((frame.width(), frame.height(), frame.channels()), (4, 3, 3));
        assert_eq!(&frame.data()[..3], &[10, 20, 30]);
    }

    #[test]
    fn test_decode_converts_grayscale_and_rgba() {
        let gray = GrayImage::from_pixel(2, 2, image::Luma([77]));
        assert_eq!(&decode(&encode(&gray)).unwrap().data()[..3], &[77, 77, 77]);

        let rgba = RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 4]));
        let frame = decode(&encode(&rgba)).unwrap();
        assert_eq!(frame.channels(), 3);
        assert_eq!(&frame.data()[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_decode_rejects_gray_alpha() {
        let img = GrayAlphaImage::from_pixel(2, 2, LumaA([1, 2]));
        assert!(matches!(
            decode(&encode(&img)),
            Err(DecodeError::UnsupportedChannels(2))
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode(b"definitely not an image"),
            Err(DecodeError::Undecodable(_))
        ));
    }

    #[test]
    fn test_fit_within_keeps_aspect_ratio() {
        let frame = fit_within(Frame::black(1280, 720), 640);
        assert_eq!((frame.width(), frame.height()), (640, 360));

        let small = fit_within(Frame::black(320, 240), 640);
        assert_eq!((small.width(), small.height()), (320, 240));
    }

    #[test]
    fn test_jpeg_round_trip_dimensions() {
        let img = RgbImage::new(16, 8);
        let jpeg = encode_jpeg(&img, 70).unwrap();
        let decoded = decode(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn test_data_url_prefix() {
        let url = data_url("image/png", &encode_png(&RgbaImage::new(1, 1)).unwrap());
        assert!(url.starts_with("data:image/png;base64,iVBORw0KGgo"));
    }
}
