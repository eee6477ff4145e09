use std::collections::BTreeMap;

use serde::Deserialize;

use super::{require_item_subject, HandlerError, HandlerOutput};
use crate::db::catalog::WardrobeCatalog;
use crate::models::job::{Confidence, Job};
use crate::models::wardrobe::InferredAttributes;
use crate::services::ai::ModelClient;

const INFER_PROMPT: &str = concat!(
    "Analyze this clothing item photo and return ONLY valid JSON of the form ",
    r#"{"attributes": {"category": string, "subcategory": string|null, "#,
    r#""colors": [string], "pattern": string|null, "material": string|null, "#,
    r#""seasons": [string], "formality": string|null}, "#,
    r#""confidence": {<attribute name>: number in [0,1]}}. "#,
    "Use lowercase values. Do not invent attributes you cannot see."
);

#[derive(Deserialize)]
struct InferResponse {
    attributes: InferredAttributes,
    #[serde(default)]
    confidence: BTreeMap<String, f64>,
}

/// Infer garment attributes (category, colors, material, ...) from an
/// item's main photo, with per-field confidence.
pub async fn run(
    job: &Job,
    catalog: &dyn WardrobeCatalog,
    model: &dyn ModelClient,
) -> Result<HandlerOutput, HandlerError> {
    let item_id = require_item_subject(job)?;

    let image = catalog
        .item_image(item_id, "main")
        .await?
        .ok_or_else(|| HandlerError::Fatal("item has no main image to analyze".into()))?;

    // Owner-supplied context sharpens ambiguous photos.
    let mut prompt = INFER_PROMPT.to_string();
    if let Some(profile) = catalog.item_profile(item_id).await? {
        prompt.push_str(&format!("\nThe owner calls this item \"{}\".", profile.name));
        if let Some(notes) = &profile.notes {
            prompt.push_str(&format!(" Owner notes: {notes}"));
        }
    }

    let raw = model.complete_json(&prompt, &[image]).await?;

    let parsed: InferResponse = serde_json::from_value(raw).map_err(|e| {
        HandlerError::Fatal(format!("model response did not match attribute schema: {e}"))
    })?;

    let output = serde_json::to_value(&parsed.attributes)
        .map_err(|e| HandlerError::Fatal(format!("unserializable output: {e}")))?;

    Ok(HandlerOutput {
        output,
        confidence: Some(Confidence::from_fields(parsed.confidence)),
        model_name: model.model_name().to_string(),
    })
}
