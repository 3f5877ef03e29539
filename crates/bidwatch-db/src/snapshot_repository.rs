use bidwatch_core::error::AppError;
use bidwatch_core::models::Listing;
use bidwatch_core::traits::SnapshotStore;
use sqlx::{PgPool, Pool, Postgres};

/// Snapshot persistence in PostgreSQL.
///
/// The `listings` table holds exactly the last saved snapshot; `position`
/// preserves its order. A save replaces the table contents inside one
/// transaction, so readers never see a partially written snapshot.
#[derive(Clone)]
pub struct PgSnapshotStore {
    pool: Pool<Postgres>,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Number of listings in the stored snapshot.
    pub async fn count(&self) -> Result<i64, AppError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM listings")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(row.0)
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: String,
    title: String,
    agency: String,
    category: String,
    status: String,
    detail_url: String,
    description: Option<String>,
}

impl From<ListingRow> for Listing {
    fn from(row: ListingRow) -> Self {
        Listing {
            id: row.id,
            title: row.title,
            agency: row.agency,
            category: row.category,
            status: row.status,
            detail_url: row.detail_url,
            description: row.description,
        }
    }
}

impl SnapshotStore for PgSnapshotStore {
    async fn load(&self) -> Result<Vec<Listing>, AppError> {
        let rows = sqlx::query_as::<_, ListingRow>(
            r#"
            SELECT id, title, agency, category, status, detail_url, description
            FROM listings
            ORDER BY position
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save(&self, listings: &[Listing]) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        sqlx::query("DELETE FROM listings")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        for (position, listing) in listings.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO listings (id, position, title, agency, category, status, detail_url, description)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(&listing.id)
            .bind(position as i32)
            .bind(&listing.title)
            .bind(&listing.agency)
            .bind(&listing.category)
            .bind(&listing.status)
            .bind(&listing.detail_url)
            .bind(&listing.description)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(count = listings.len(), "Snapshot saved to PostgreSQL");
        Ok(())
    }
}
