use std::collections::HashMap;

pub const BASIC: &str = "basic";
pub const PRO: &str = "pro";
pub const ENTERPRISE: &str = "enterprise";

const MAX_CATEGORY_LEN: usize = 64;

/// Maps store product ids to license categories.
///
/// Resolution never fails: products missing from the configured map fall back
/// to a fixed rule on the last character of the id (`1` -> basic, `2` -> pro,
/// anything else -> enterprise). Existing storefronts depend on that rule, so
/// it must not change.
#[derive(Debug, Clone, Default)]
pub struct CategoryResolver {
    map: HashMap<String, String>,
}

impl CategoryResolver {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn resolve(&self, product_id: &str) -> String {
        if let Some(category) = self.map.get(product_id) {
            tracing::debug!(product_id = %product_id, category = %category, "Mapped product to category");
            return category.clone();
        }

        let category = fallback_category(product_id);
        tracing::info!(
            product_id = %product_id,
            category = %category,
            "Product not in category map, using fallback"
        );
        category.to_string()
    }
}

fn fallback_category(product_id: &str) -> &'static str {
    if product_id.ends_with('1') {
        BASIC
    } else if product_id.ends_with('2') {
        PRO
    } else {
        ENTERPRISE
    }
}

/// Whether `name` is acceptable as a category on the admin and CLI surfaces.
pub fn is_valid_category(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_CATEGORY_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}
