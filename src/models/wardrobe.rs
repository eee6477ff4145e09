use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog data for a single wardrobe item, as handlers see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemProfile {
    pub id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub brand: Option<String>,
    pub colors: Vec<String>,
    pub notes: Option<String>,
}

/// An outfit plus the profiles of its member items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutfitContext {
    pub id: Uuid,
    pub title: Option<String>,
    pub occasion: Option<String>,
    pub items: Vec<ItemProfile>,
}

/// Attributes inferred from an item photo by the `infer_item` handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferredAttributes {
    pub category: String,
    pub subcategory: Option<String>,
    pub colors: Vec<String>,
    pub pattern: Option<String>,
    pub material: Option<String>,
    #[serde(default)]
    pub seasons: Vec<String>,
    pub formality: Option<String>,
}

/// Fields read off a garment care label by the `extract_label` handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelFields {
    pub brand: Option<String>,
    pub size: Option<String>,
    pub fabric_composition: Option<String>,
    #[serde(default)]
    pub care_instructions: Vec<String>,
}

/// Outfit proposed by the `generate_outfit` handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutfitSelection {
    pub item_ids: Vec<Uuid>,
    pub rationale: String,
}

/// Output of the image-rendering handlers: a key resolvable through the
/// catalog's image storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedImage {
    pub image_key: String,
}

/// Constraints accepted by `generate_outfit` in the job input payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutfitConstraints {
    pub occasion: Option<String>,
    pub season: Option<String>,
    pub max_items: Option<usize>,
}
