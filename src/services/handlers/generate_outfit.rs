use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Deserialize;
use uuid::Uuid;

use super::{require_outfit_subject, HandlerError, HandlerOutput};
use crate::db::catalog::WardrobeCatalog;
use crate::models::job::{Confidence, Job};
use crate::models::wardrobe::{OutfitConstraints, OutfitSelection};
use crate::services::ai::ModelClient;

#[derive(Deserialize)]
struct OutfitResponse {
    item_ids: Vec<Uuid>,
    rationale: String,
    #[serde(default)]
    confidence: BTreeMap<String, f64>,
}

fn build_prompt(
    inventory: &[crate::models::wardrobe::ItemProfile],
    constraints: &OutfitConstraints,
) -> String {
    let mut prompt = String::from(
        "You are a stylist. Pick a coherent outfit from this wardrobe inventory.\n\
         Inventory (one item per line, id | name | category | colors):\n",
    );
    for item in inventory {
        let _ = writeln!(
            prompt,
            "{} | {} | {} | {}",
            item.id,
            item.name,
            item.category.as_deref().unwrap_or("?"),
            item.colors.join(",")
        );
    }
    if let Some(occasion) = &constraints.occasion {
        let _ = writeln!(prompt, "Occasion: {occasion}");
    }
    if let Some(season) = &constraints.season {
        let _ = writeln!(prompt, "Season: {season}");
    }
    if let Some(max) = constraints.max_items {
        let _ = writeln!(prompt, "Use at most {max} items.");
    }
    prompt.push_str(concat!(
        "Return ONLY valid JSON of the form ",
        r#"{"item_ids": [uuid], "rationale": string, "#,
        r#""confidence": {"selection": number in [0,1]}}. "#,
        "Every id must come from the inventory above."
    ));
    prompt
}

/// Compose an outfit from the wardrobe inventory under the constraints
/// carried in the job input.
pub async fn run(
    job: &Job,
    catalog: &dyn WardrobeCatalog,
    model: &dyn ModelClient,
) -> Result<HandlerOutput, HandlerError> {
    require_outfit_subject(job)?;

    let constraints: OutfitConstraints = if job.input.is_null() {
        OutfitConstraints::default()
    } else {
        serde_json::from_value(job.input.clone())
            .map_err(|e| HandlerError::Fatal(format!("malformed outfit constraints: {e}")))?
    };

    let inventory = catalog.wardrobe_items().await?;
    if inventory.is_empty() {
        return Err(HandlerError::Fatal(
            "wardrobe is empty; nothing to compose an outfit from".into(),
        ));
    }

    let raw = model
        .complete_json(&build_prompt(&inventory, &constraints), &[])
        .await?;

    let parsed: OutfitResponse = serde_json::from_value(raw).map_err(|e| {
        HandlerError::Fatal(format!("model response did not match outfit schema: {e}"))
    })?;

    // An id outside the inventory is a model contract failure, not a
    // transient glitch.
    for id in &parsed.item_ids {
        if !inventory.iter().any(|item| item.id == *id) {
            return Err(HandlerError::Fatal(format!(
                "model selected item {id} which is not in the wardrobe"
            )));
        }
    }
    if parsed.item_ids.is_empty() {
        return Err(HandlerError::Fatal("model selected no items".into()));
    }

    let output = serde_json::to_value(OutfitSelection {
        item_ids: parsed.item_ids,
        rationale: parsed.rationale,
    })
    .map_err(|e| HandlerError::Fatal(format!("unserializable output: {e}")))?;

    Ok(HandlerOutput {
        output,
        confidence: Some(Confidence::from_fields(parsed.confidence)),
        model_name: model.model_name().to_string(),
    })
}
