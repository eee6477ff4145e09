use std::collections::BTreeMap;

use serde::Deserialize;

use super::{require_item_subject, HandlerError, HandlerOutput};
use crate::db::catalog::WardrobeCatalog;
use crate::models::job::{Confidence, Job};
use crate::models::wardrobe::LabelFields;
use crate::services::ai::ModelClient;

const EXTRACT_PROMPT: &str = concat!(
    "Read this garment care label photo and return ONLY valid JSON of the form ",
    r#"{"label": {"brand": string|null, "size": string|null, "#,
    r#""fabric_composition": string|null, "care_instructions": [string]}, "#,
    r#""confidence": {<field name>: number in [0,1]}}. "#,
    "Transcribe exactly what is printed; use null for unreadable fields."
);

#[derive(Deserialize)]
struct ExtractResponse {
    label: LabelFields,
    #[serde(default)]
    confidence: BTreeMap<String, f64>,
}

/// Transcribe brand, size, fabric and care instructions from an item's
/// label photo (falling back to the main photo).
pub async fn run(
    job: &Job,
    catalog: &dyn WardrobeCatalog,
    model: &dyn ModelClient,
) -> Result<HandlerOutput, HandlerError> {
    let item_id = require_item_subject(job)?;

    let image = match catalog.item_image(item_id, "label").await? {
        Some(bytes) => bytes,
        None => catalog
            .item_image(item_id, "main")
            .await?
            .ok_or_else(|| HandlerError::Fatal("item has no label or main image".into()))?,
    };

    let raw = model.complete_json(EXTRACT_PROMPT, &[image]).await?;

    let parsed: ExtractResponse = serde_json::from_value(raw).map_err(|e| {
        HandlerError::Fatal(format!("model response did not match label schema: {e}"))
    })?;

    let output = serde_json::to_value(&parsed.label)
        .map_err(|e| HandlerError::Fatal(format!("unserializable output: {e}")))?;

    Ok(HandlerOutput {
        output,
        confidence: Some(Confidence::from_fields(parsed.confidence)),
        model_name: model.model_name().to_string(),
    })
}
