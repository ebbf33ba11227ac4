//! Base64 media payloads: data-URI headers, MIME sniffing and image codecs.

use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use image::codecs::png::PngEncoder;
use image::{ColorType, ExtendedColorType, ImageEncoder};
use once_cell::sync::Lazy;
use regex::Regex;

use super::value::PixelBuffer;

/// Fallback MIME type for unrecognised payloads.
pub const OCTET_STREAM: &str = "application/octet-stream";

static DATA_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^data:(?P<mime>[A-Za-z0-9!#$&^_.+-]+/[A-Za-z0-9!#$&^_.+-]+)?(?P<params>(?:;[^;,]*)*),")
        .expect("data URI pattern is valid")
});

/// A wire payload split into its optional MIME header and raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    /// MIME type from the data-URI header, if one was present.
    pub declared_mime: Option<String>,
    pub bytes: Vec<u8>,
}

impl MediaPayload {
    /// MIME type from the header, else sniffed from the bytes.
    pub fn mime(&self) -> String {
        self.declared_mime
            .clone()
            .unwrap_or_else(|| sniff_mime(&self.bytes).to_string())
    }
}

/// Why a wire payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("data URI header must declare ';base64'")]
    NotBase64Uri,
    #[error("payload is not valid base64")]
    InvalidBase64,
    #[error("payload is not a decodable image: {0}")]
    InvalidImage(String),
    #[error("pixel buffer cannot be encoded: {0}")]
    Encode(String),
}

/// Split an optional `data:<mime>;base64,` header off a wire string.
///
/// Returns the declared MIME type (if any) and the base64 body.
pub fn split_data_uri(wire: &str) -> Result<(Option<String>, &str), MediaError> {
    if !wire.starts_with("data:") {
        return Ok((None, wire));
    }
    let caps = DATA_URI.captures(wire).ok_or(MediaError::NotBase64Uri)?;
    let params = caps.name("params").map(|m| m.as_str()).unwrap_or_default();
    if !params.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
        return Err(MediaError::NotBase64Uri);
    }
    let mime = caps.name("mime").map(|m| m.as_str().to_ascii_lowercase());
    let body_start = caps.get(0).map(|m| m.end()).unwrap_or_default();
    Ok((mime, &wire[body_start..]))
}

/// Decode a wire string (optionally data-URI prefixed) into bytes.
pub fn decode_payload(wire: &str) -> Result<MediaPayload, MediaError> {
    let (declared_mime, body) = split_data_uri(wire)?;
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .or_else(|_| STANDARD_NO_PAD.decode(compact.as_bytes()))
        .map_err(|_| MediaError::InvalidBase64)?;
    Ok(MediaPayload {
        declared_mime,
        bytes,
    })
}

/// Encode bytes as a base64 data URI.
pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Guess a MIME type from magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => "video/mp4",
        [0x1A, 0x45, 0xDF, 0xA3, ..] => "video/webm",
        [b'%', b'P', b'D', b'F', ..] => "application/pdf",
        _ => OCTET_STREAM,
    }
}

/// File extension (without dot) to use for a MIME type.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let ext = match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "application/pdf" => "pdf",
        "application/json" => "json",
        "text/plain" => "txt",
        _ => return None,
    };
    Some(ext)
}

/// MIME type implied by a file's extension.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => return None,
    };
    Some(mime)
}

/// Decode an encoded image (PNG, JPEG, GIF, WebP) into a pixel buffer.
///
/// Gray, gray+alpha, RGB and RGBA sources keep their channel count; deeper
/// or exotic colour types are narrowed to 8-bit RGB(A).
pub fn decode_image(bytes: &[u8]) -> Result<PixelBuffer, MediaError> {
    let img = image::load_from_memory(bytes).map_err(|e| MediaError::InvalidImage(e.to_string()))?;
    let (width, height) = (img.width(), img.height());
    let (channels, data) = match img.color() {
        ColorType::L8 => (1, img.into_luma8().into_raw()),
        ColorType::La8 => (2, img.into_luma_alpha8().into_raw()),
        ColorType::Rgb8 => (3, img.into_rgb8().into_raw()),
        ColorType::Rgba8 => (4, img.into_rgba8().into_raw()),
        other if other.has_alpha() => (4, img.into_rgba8().into_raw()),
        _ => (3, img.into_rgb8().into_raw()),
    };
    PixelBuffer::new(height, width, channels, data)
        .ok_or_else(|| MediaError::InvalidImage("decoded size mismatch".to_string()))
}

/// Encode a pixel buffer as PNG bytes. Lossless, so decoding restores it.
pub fn encode_png(buffer: &PixelBuffer) -> Result<Vec<u8>, MediaError> {
    let color = match buffer.channels() {
        1 => ExtendedColorType::L8,
        2 => ExtendedColorType::La8,
        3 => ExtendedColorType::Rgb8,
        4 => ExtendedColorType::Rgba8,
        n => return Err(MediaError::Encode(format!("{} channels", n))),
    };
    let mut out = Cursor::new(Vec::new());
    PngEncoder::new(&mut out)
        .write_image(buffer.data(), buffer.width(), buffer.height(), color)
        .map_err(|e| MediaError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}
