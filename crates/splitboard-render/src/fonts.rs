#![forbid(unsafe_code)]

//! The process-wide font registry.
//!
//! Fonts are registered once at startup and referenced by index from text
//! orders for the rest of the process lifetime. The table is append-only
//! and bounded: the wire form encodes the index as a single decimal digit.
//! Index 0 always holds the built-in default, and any out-of-range lookup
//! falls back to it.

use std::sync::Arc;

use splitboard_core::order::{FontId, MAX_FONTS};

use crate::canvas::{BuiltinFont, Font};

/// A registered font, shareable across threads.
pub type SharedFont = Arc<dyn Font + Send + Sync>;

/// Returned by [`FontRegistry::register`] when all slots are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryFull;

impl std::fmt::Display for RegistryFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "font registry already holds {MAX_FONTS} fonts")
    }
}

impl std::error::Error for RegistryFull {}

/// Append-only table of registered fonts.
pub struct FontRegistry {
    fonts: Vec<SharedFont>,
}

impl FontRegistry {
    /// A registry holding the built-in default font at index 0.
    pub fn with_default() -> Self {
        Self {
            fonts: vec![Arc::new(BuiltinFont::new()) as SharedFont],
        }
    }

    /// Register a font, returning its handle.
    pub fn register(&mut self, font: SharedFont) -> Result<FontId, RegistryFull> {
        if self.fonts.len() >= MAX_FONTS {
            return Err(RegistryFull);
        }
        self.fonts.push(font);
        Ok(FontId(self.fonts.len() - 1))
    }

    /// Look up a font. Out-of-range handles fall back to the default.
    pub fn get(&self, id: FontId) -> &SharedFont {
        self.fonts.get(id.0).unwrap_or(&self.fonts[0])
    }

    /// Number of registered fonts.
    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    /// Never true; index 0 is always populated.
    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self::with_default()
    }
}
