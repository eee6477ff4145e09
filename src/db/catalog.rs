use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::db::store::StoreError;
use crate::models::job::SubjectRef;
use crate::models::wardrobe::{ItemProfile, OutfitContext};

/// Read access to the wardrobe domain data the handlers need, plus
/// persistence for images the handlers render. Kept narrow so the job
/// subsystem stays decoupled from the rest of the catalog schema.
#[async_trait]
pub trait WardrobeCatalog: Send + Sync {
    async fn item_profile(&self, item_id: Uuid) -> Result<Option<ItemProfile>, StoreError>;

    /// Image bytes of the given kind ("main" or "label") for an item.
    async fn item_image(&self, item_id: Uuid, kind: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn outfit_context(&self, outfit_id: Uuid) -> Result<Option<OutfitContext>, StoreError>;

    /// Every item in the wardrobe; inventory for outfit generation.
    async fn wardrobe_items(&self) -> Result<Vec<ItemProfile>, StoreError>;

    /// Persist a handler-rendered image, returning a key the UI can
    /// resolve later.
    async fn save_rendered_image(
        &self,
        subject: SubjectRef,
        bytes: &[u8],
    ) -> Result<String, StoreError>;
}

fn item_from_row(row: &PgRow) -> Result<ItemProfile, StoreError> {
    Ok(ItemProfile {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        subcategory: row.try_get("subcategory")?,
        brand: row.try_get("brand")?,
        colors: row.try_get("colors")?,
        notes: row.try_get("notes")?,
    })
}

const ITEM_COLUMNS: &str = "id, name, category, subcategory, brand, colors, notes";

/// Postgres-backed wardrobe catalog.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WardrobeCatalog for PgCatalog {
    async fn item_profile(&self, item_id: Uuid) -> Result<Option<ItemProfile>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE id = $1"
        ))
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn item_image(&self, item_id: Uuid, kind: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let bytes: Option<Vec<u8>> = sqlx::query_scalar(
            r#"
            SELECT bytes FROM item_images
            WHERE item_id = $1 AND kind = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(item_id)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;

        Ok(bytes)
    }

    async fn outfit_context(&self, outfit_id: Uuid) -> Result<Option<OutfitContext>, StoreError> {
        let outfit = sqlx::query("SELECT id, title, occasion FROM outfits WHERE id = $1")
            .bind(outfit_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(outfit) = outfit else {
            return Ok(None);
        };

        let rows = sqlx::query(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM items
            JOIN outfit_items ON outfit_items.item_id = items.id
            WHERE outfit_items.outfit_id = $1
            "#,
        ))
        .bind(outfit_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(OutfitContext {
            id: outfit.try_get("id")?,
            title: outfit.try_get("title")?,
            occasion: outfit.try_get("occasion")?,
            items: rows.iter().map(item_from_row).collect::<Result<_, _>>()?,
        }))
    }

    async fn wardrobe_items(&self) -> Result<Vec<ItemProfile>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM items ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    async fn save_rendered_image(
        &self,
        subject: SubjectRef,
        bytes: &[u8],
    ) -> Result<String, StoreError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO rendered_images (subject_kind, subject_id, bytes)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(subject.kind())
        .bind(subject.id())
        .bind(bytes)
        .fetch_one(&self.pool)
        .await?;

        Ok(format!("rendered/{id}"))
    }
}
