use std::fmt::Write as _;

use super::{require_image_bytes, require_outfit_subject, HandlerError, HandlerOutput};
use crate::db::catalog::WardrobeCatalog;
use crate::models::job::Job;
use crate::models::wardrobe::RenderedImage;
use crate::services::ai::ModelClient;

/// Render a composite visualization of an outfit from its member items'
/// photos.
pub async fn run(
    job: &Job,
    catalog: &dyn WardrobeCatalog,
    model: &dyn ModelClient,
) -> Result<HandlerOutput, HandlerError> {
    let outfit_id = require_outfit_subject(job)?;

    let context = catalog
        .outfit_context(outfit_id)
        .await?
        .ok_or_else(|| HandlerError::Fatal("outfit not found".into()))?;

    if context.items.is_empty() {
        return Err(HandlerError::Fatal("outfit has no items".into()));
    }

    let mut references = Vec::new();
    for item in &context.items {
        if let Some(bytes) = catalog.item_image(item.id, "main").await? {
            references.push(bytes);
        }
    }
    if references.is_empty() {
        return Err(HandlerError::Fatal(
            "no outfit member has an image to visualize".into(),
        ));
    }

    let mut prompt = String::from(
        "Render these garments worn together as one outfit on a neutral \
         studio background, full-body flat-lay style. Pieces:\n",
    );
    for item in &context.items {
        let _ = writeln!(
            prompt,
            "- {} ({})",
            item.name,
            item.category.as_deref().unwrap_or("clothing")
        );
    }
    if let Some(occasion) = &context.occasion {
        let _ = writeln!(prompt, "Styled for: {occasion}");
    }

    let rendered = model.render_image(&prompt, &references).await?;
    require_image_bytes(&rendered)?;

    let image_key = catalog.save_rendered_image(job.subject, &rendered).await?;

    let output = serde_json::to_value(RenderedImage { image_key })
        .map_err(|e| HandlerError::Fatal(format!("unserializable output: {e}")))?;

    Ok(HandlerOutput {
        output,
        confidence: None,
        model_name: model.model_name().to_string(),
    })
}
