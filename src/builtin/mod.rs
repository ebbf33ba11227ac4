//! Native handlers shipped with the server.
//!
//! Manifests bind to these by name (`handler: text.summarize`). The sample
//! bundles under `custom_apis/` use them.

pub mod imaging;
pub mod text;

use crate::capabilities::{FnCapability, HandlerCatalog};

/// Register every built-in handler.
pub fn register(catalog: &mut HandlerCatalog) {
    catalog.register(
        "text.summarize",
        FnCapability::blocking(1, text::summarize_handler).shared(),
    );
    catalog.register(
        "text.analyze",
        FnCapability::blocking(1, text::analyze_handler).shared(),
    );
    catalog.register(
        "image.grayscale",
        FnCapability::blocking(1, imaging::grayscale_handler).shared(),
    );
    catalog.register(
        "image.resize",
        FnCapability::blocking(1, imaging::resize_handler).shared(),
    );
}
