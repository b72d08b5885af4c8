//! Overlay and archetype catalog.
//!
//! Display metadata for the live overlays and the generative archetypes.
//! Embedded at compile time from `contrib/catalog/*.toml`.

use crate::geometry::OverlayVariant;
use serde::Deserialize;
use std::fmt;
use std::sync::OnceLock;

const OVERLAYS_TOML: &str = include_str!("../../../contrib/catalog/overlays.toml");
const ARCHETYPES_TOML: &str = include_str!("../../../contrib/catalog/archetypes.toml");

static CATALOG: OnceLock<Catalog> = OnceLock::new();

/// Which part of the body an overlay dresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Head,
    Neck,
    Face,
    Full,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Head => "HEAD",
            Self::Neck => "NECK",
            Self::Face => "FACE",
            Self::Full => "FULL",
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverlayInfo {
    pub id: String,
    pub name: String,
    pub category: Category,
    pub description: String,
    pub historical_snippet: String,
}

/// A style the generative service can transmute a portrait into.
#[derive(Debug, Clone, Deserialize)]
pub struct Archetype {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Appended to the image-edit instruction.
    pub prompt_modifier: String,
}

#[derive(Debug, Default, Deserialize)]
struct OverlayFile {
    #[serde(default)]
    overlay: Vec<OverlayInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct ArchetypeFile {
    #[serde(default)]
    archetype: Vec<Archetype>,
}

#[derive(Debug, Default)]
struct Catalog {
    overlays: Vec<OverlayInfo>,
    archetypes: Vec<Archetype>,
}

fn catalog() -> &'static Catalog {
    CATALOG.get_or_init(|| {
        let overlays = toml::from_str::<OverlayFile>(OVERLAYS_TOML).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "bad overlay catalog TOML");
            OverlayFile::default()
        });
        let archetypes = toml::from_str::<ArchetypeFile>(ARCHETYPES_TOML).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "bad archetype catalog TOML");
            ArchetypeFile::default()
        });
        Catalog {
            overlays: overlays.overlay,
            archetypes: archetypes.archetype,
        }
    })
}

/// All overlays with catalog entries, in display order.
pub fn overlays() -> &'static [OverlayInfo] {
    &catalog().overlays
}

/// Catalog entry for a variant. `None` has no entry.
pub fn overlay_info(variant: OverlayVariant) -> Option<&'static OverlayInfo> {
    overlays().iter().find(|o| o.id == variant.id())
}

pub fn archetypes() -> &'static [Archetype] {
    &catalog().archetypes
}

/// Look up an archetype by id, case-insensitively.
pub fn lookup_archetype(id: &str) -> Option<&'static Archetype> {
    archetypes().iter().find(|a| a.id.eq_ignore_ascii_case(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_drawable_variant_has_entry() {
        for variant in OverlayVariant::ALL {
            let info = overlay_info(variant);
            if variant == OverlayVariant::None {
                assert!(info.is_none());
            } else {
                let info = info.unwrap_or_else(|| panic!("no catalog entry for {variant}"));
                assert!(!info.historical_snippet.is_empty());
            }
        }
    }

    #[test]
    fn test_categories() {
        assert_eq!(overlay_info(OverlayVariant::Collar).unwrap().category, Category::Neck);
        assert_eq!(overlay_info(OverlayVariant::FullMask).unwrap().category, Category::Full);
        assert_eq!(overlay_info(OverlayVariant::HeaddressCrown).unwrap().name, "Cap Crown");
    }

    #[test]
    fn test_five_archetypes() {
        assert_eq!(archetypes().len(), 5);
        let pharaoh = lookup_archetype("PHARAOH").unwrap();
        assert_eq!(pharaoh.name, "The Pharaoh");
        assert!(pharaoh.prompt_modifier.contains("Nemes"));
        assert!(lookup_archetype("scribe").is_none());
    }
}
