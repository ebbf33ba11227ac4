//! Image handlers operating on decoded pixel buffers.

use image::imageops::FilterType;
use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};

use crate::capabilities::{Arguments, CapabilityError};
use crate::convert::{NativeValue, PixelBuffer};

/// `image.grayscale`: `image` → `image` with one luma channel (alpha kept).
pub fn grayscale_handler(args: Arguments) -> Result<Vec<NativeValue>, CapabilityError> {
    let buffer = args.image("image")?;
    Ok(vec![NativeValue::Image(grayscale(buffer))])
}

/// `image.resize`: `image`, `width`, `height`, `maintain_aspect_ratio`,
/// `resampling_method` → `resized_image`.
pub fn resize_handler(args: Arguments) -> Result<Vec<NativeValue>, CapabilityError> {
    let buffer = args.image("image")?;
    let width = dimension(&args, "width", 512)?;
    let height = dimension(&args, "height", 512)?;
    let keep_aspect = match args.get("maintain_aspect_ratio") {
        Some(_) => args.boolean("maintain_aspect_ratio")?,
        None => true,
    };
    let filter = match args.get("resampling_method") {
        Some(_) => filter_for(args.text("resampling_method")?),
        None => FilterType::Lanczos3,
    };
    let (width, height) = if keep_aspect {
        fit_within(buffer.width(), buffer.height(), width, height)
    } else {
        (width, height)
    };
    Ok(vec![NativeValue::Image(resize(buffer, width, height, filter)?)])
}

fn dimension(args: &Arguments, name: &str, default: u32) -> Result<u32, CapabilityError> {
    match args.get(name) {
        Some(_) => u32::try_from(args.integer(name)?)
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| CapabilityError::failed(format!("'{}' must be positive", name))),
        None => Ok(default),
    }
}

fn filter_for(name: &str) -> FilterType {
    match name.to_ascii_uppercase().as_str() {
        "NEAREST" => FilterType::Nearest,
        "BILINEAR" => FilterType::Triangle,
        "BICUBIC" => FilterType::CatmullRom,
        _ => FilterType::Lanczos3,
    }
}

/// Largest size with the source aspect ratio inside `width × height`.
pub fn fit_within(src_w: u32, src_h: u32, width: u32, height: u32) -> (u32, u32) {
    if src_w == 0 || src_h == 0 {
        return (width, height);
    }
    let aspect = src_w as f64 / src_h as f64;
    if width as f64 / height as f64 > aspect {
        (((height as f64 * aspect) as u32).max(1), height)
    } else {
        (width, ((width as f64 / aspect) as u32).max(1))
    }
}

/// ITU-R 601 luma, matching the usual "L" conversion.
pub fn grayscale(buffer: &PixelBuffer) -> PixelBuffer {
    let (height, width, channels) = buffer.shape();
    if channels <= 2 {
        return buffer.clone();
    }
    let keep_alpha = channels == 4;
    let mut data = Vec::with_capacity(buffer.data().len() / channels as usize * 2);
    for px in buffer.pixels() {
        let luma = (px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114 + 500) / 1000;
        data.push(luma.min(255) as u8);
        if keep_alpha {
            data.push(px[3]);
        }
    }
    let out_channels = if keep_alpha { 2 } else { 1 };
    PixelBuffer::new(height, width, out_channels, data).unwrap_or_else(|| buffer.clone())
}

/// Resample a buffer, keeping its channel layout.
pub fn resize(
    buffer: &PixelBuffer,
    width: u32,
    height: u32,
    filter: FilterType,
) -> Result<PixelBuffer, CapabilityError> {
    let image = to_dynamic(buffer)
        .ok_or_else(|| CapabilityError::failed("pixel buffer has an unsupported layout"))?;
    let resized = image.resize_exact(width, height, filter);
    let channels = buffer.channels();
    let data = match channels {
        1 => resized.into_luma8().into_raw(),
        2 => resized.into_luma_alpha8().into_raw(),
        3 => resized.into_rgb8().into_raw(),
        _ => resized.into_rgba8().into_raw(),
    };
    PixelBuffer::new(height, width, channels, data)
        .ok_or_else(|| CapabilityError::failed("resized buffer has unexpected size"))
}

fn to_dynamic(buffer: &PixelBuffer) -> Option<DynamicImage> {
    let (h, w, c) = buffer.shape();
    let data = buffer.data().to_vec();
    let image = match c {
        1 => DynamicImage::ImageLuma8(GrayImage::from_raw(w, h, data)?),
        2 => DynamicImage::ImageLumaA8(GrayAlphaImage::from_raw(w, h, data)?),
        3 => DynamicImage::ImageRgb8(RgbImage::from_raw(w, h, data)?),
        4 => DynamicImage::ImageRgba8(RgbaImage::from_raw(w, h, data)?),
        _ => return None,
    };
    Some(image)
}
