//! Native values handed to and returned from capability callables.

use std::path::PathBuf;

use serde_json::{Map, Number, Value};

/// An in-memory image: `height × width × channels` bytes, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    height: u32,
    width: u32,
    channels: u8,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Build a buffer, checking that `data` has exactly `h * w * c` bytes.
    ///
    /// Only 1 (gray), 2 (gray+alpha), 3 (RGB) and 4 (RGBA) channels are valid.
    pub fn new(height: u32, width: u32, channels: u8, data: Vec<u8>) -> Option<Self> {
        let expected = height as usize * width as usize * channels as usize;
        if !(1..=4).contains(&channels) || data.len() != expected {
            return None;
        }
        Some(Self {
            height,
            width,
            channels,
            data,
        })
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// `(height, width, channels)`.
    pub fn shape(&self) -> (u32, u32, u8) {
        (self.height, self.width, self.channels)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Channel value at (`row`, `col`, `channel`).
    pub fn get(&self, row: u32, col: u32, channel: u8) -> Option<u8> {
        if row >= self.height || col >= self.width || channel >= self.channels {
            return None;
        }
        let idx = (row as usize * self.width as usize + col as usize) * self.channels as usize
            + channel as usize;
        self.data.get(idx).copied()
    }

    /// Iterate over pixels as channel slices.
    pub fn pixels(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.channels as usize)
    }
}

/// A converted argument or a callable's output.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Decoded `image` payload.
    Image(PixelBuffer),
    /// Path to a file (`video`/`file` payloads, or files a callable produced).
    Path(PathBuf),
    /// Structured objects and lists.
    Json(Value),
}

impl NativeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Human-readable name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Image(_) => "image",
            Self::Path(_) => "path",
            Self::Json(Value::Array(_)) => "list",
            Self::Json(_) => "object",
        }
    }

    /// JSON form of a non-media value; media variants yield `None`.
    pub fn scalar_json(&self) -> Option<Value> {
        let value = match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Integer(i) => Value::Number((*i).into()),
            Self::Float(f) => Number::from_f64(*f).map(Value::Number)?,
            Self::String(s) => Value::String(s.clone()),
            Self::Json(v) => v.clone(),
            Self::Image(_) | Self::Path(_) => return None,
        };
        Some(value)
    }
}

impl From<&str> for NativeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for NativeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for NativeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for NativeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for NativeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<PixelBuffer> for NativeValue {
    fn from(value: PixelBuffer) -> Self {
        Self::Image(value)
    }
}

impl From<Map<String, Value>> for NativeValue {
    fn from(value: Map<String, Value>) -> Self {
        Self::Json(Value::Object(value))
    }
}
