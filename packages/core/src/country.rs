//! Country identity shared by the registry and the stats providers.
//!
//! The slug produced by [`slugify`] is the only join key between the two,
//! so every code path that needs one goes through this function.

use serde::{Deserialize, Serialize};

/// A country as the upstream provider names it, plus its join slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CountryRef {
    pub name: String,
    pub slug: String,
}

impl CountryRef {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let slug = slugify(&name);
        Self { name, slug }
    }
}

/// Normalize a country name into its slug: lowercase, each space replaced by
/// a hyphen. Surrounding whitespace is trimmed first.
///
/// Already-slugged input maps to itself, so callers may pass either a
/// display name or a slug.
pub fn slugify(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "-")
}
