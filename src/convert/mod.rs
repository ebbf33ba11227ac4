//! # Type / Binary Converter
//!
//! Bidirectional mapping between wire values (JSON scalars, containers and
//! base64 media payloads) and the [`NativeValue`]s capability callables work
//! with.
//!
//! - [`value`]: native value model, including the [`PixelBuffer`] image type
//! - [`media`]: data-URI parsing, MIME detection and image codecs
//! - [`scope`]: temp files owned by one conversion
//! - [`converter`]: the descriptor-driven [`Converter`]

pub mod converter;
pub mod media;
pub mod scope;
pub mod value;

pub use converter::{check_value, Converter};
pub use media::MediaError;
pub use scope::{clear_temp_dir, TempScope};
pub use value::{NativeValue, PixelBuffer};
