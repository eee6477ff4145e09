use super::{require_image_bytes, require_item_subject, HandlerError, HandlerOutput};
use crate::db::catalog::WardrobeCatalog;
use crate::models::job::Job;
use crate::models::wardrobe::RenderedImage;
use crate::services::ai::ModelClient;

const RENDER_PROMPT: &str = concat!(
    "Render this garment as a standardized catalog product photo: ",
    "front view, flat lighting, neutral light-gray background, ",
    "no mannequin or person, garment centered and filling the frame."
);

/// Produce a standardized catalog photo for an item from its uploaded
/// main image.
pub async fn run(
    job: &Job,
    catalog: &dyn WardrobeCatalog,
    model: &dyn ModelClient,
) -> Result<HandlerOutput, HandlerError> {
    let item_id = require_item_subject(job)?;

    let source = catalog
        .item_image(item_id, "main")
        .await?
        .ok_or_else(|| HandlerError::Fatal("item has no main image to catalog".into()))?;

    let rendered = model.render_image(RENDER_PROMPT, &[source]).await?;
    require_image_bytes(&rendered)?;

    let image_key = catalog.save_rendered_image(job.subject, &rendered).await?;

    let output = serde_json::to_value(RenderedImage { image_key })
        .map_err(|e| HandlerError::Fatal(format!("unserializable output: {e}")))?;

    // Image renders carry no confidence scoring; they auto-succeed.
    Ok(HandlerOutput {
        output,
        confidence: None,
        model_name: model.model_name().to_string(),
    })
}
