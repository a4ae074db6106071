use crate::{
    app::Product,
    dialect::{CurrentDialect, CurrentRow, Dialect},
};
use chrono::{DateTime, SecondsFormat, Utc};
pub use sqlx::Pool;
use sqlx::{
    FromRow, Row,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;
use thiserror::Error;

pub use crate::dialect::Db;

/// Opens a connection pool for `url`, creating the database file if needed.
///
/// In-memory databases live as long as their connection, so they get a pool
/// of exactly one connection that is never recycled.
pub async fn connect(url: &str) -> Result<Pool<Db>, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = if url.contains(":memory:") || url.contains("mode=memory") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new()
    };

    pool.connect_with(options).await
}

/// Renders a timestamp the way it is stored: fixed-width RFC 3339 in UTC,
/// so that text order is chronological order.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &CurrentRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let raw: String = row.try_get(column)?;

    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
}

impl FromRow<'_, CurrentRow> for Product {
    fn from_row(row: &CurrentRow) -> Result<Self, sqlx::Error> {
        Ok(Product {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            price: row.try_get("price")?,
            image: row.try_get("image")?,
            created_at: parse_timestamp(row, "created_at")?,
            updated_at: parse_timestamp(row, "updated_at")?,
        })
    }
}

/// A record store for products.
///
/// This struct wraps an SQLx connection pool. Statements come from the
/// current [`Dialect`], so the methods here stay dialect agnostic.
/// Failures are returned as-is; nothing is retried.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Db>,
}

impl Database {
    /// Wraps `pool` after making sure the schema exists.
    pub async fn with_migration(pool: Pool<Db>) -> Result<Self, DatabaseError> {
        CurrentDialect::migration(&pool)
            .await
            .map_err(|e| DatabaseError::MigrationFailed { source: e })?;

        Ok(Self { pool })
    }

    /// Inserts a new product and returns the id the database assigned.
    ///
    /// The `id` field of `product` is ignored.
    pub async fn insert_product(&self, product: &Product) -> Result<i64, DatabaseError> {
        let stmt = CurrentDialect::insert_product_statement();

        sqlx::query_scalar(&stmt)
            .bind(&product.name)
            .bind(&product.description)
            .bind(product.price)
            .bind(&product.image)
            .bind(format_timestamp(&product.created_at))
            .bind(format_timestamp(&product.updated_at))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryFailed {
                operation: DbOperation::InsertProduct {
                    name: product.name.clone(),
                },
                sql: stmt.to_string(),
                source: e,
            })
    }

    /// Overwrites the stored product with the same id.
    ///
    /// Returns `false` when no such product exists.
    pub async fn update_product(&self, product: &Product) -> Result<bool, DatabaseError> {
        let stmt = CurrentDialect::update_product_statement();

        let result = sqlx::query(&stmt)
            .bind(&product.name)
            .bind(&product.description)
            .bind(product.price)
            .bind(&product.image)
            .bind(format_timestamp(&product.updated_at))
            .bind(product.id)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryFailed {
                operation: DbOperation::UpdateProduct { id: product.id },
                sql: stmt.to_string(),
                source: e,
            })?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_product(&self, id: i64) -> Result<Option<Product>, DatabaseError> {
        let stmt = CurrentDialect::query_product_statement();

        sqlx::query_as(&stmt)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryFailed {
                operation: DbOperation::QueryProduct { id },
                sql: stmt.to_string(),
                source: e,
            })
    }

    /// Returns every product, newest first.
    pub async fn list_products(&self) -> Result<Vec<Product>, DatabaseError> {
        let stmt = CurrentDialect::query_products_statement();

        sqlx::query_as(&stmt)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryFailed {
                operation: DbOperation::QueryProducts,
                sql: stmt.to_string(),
                source: e,
            })
    }

    /// Deletes a product row. Returns `false` when there was nothing to delete.
    pub async fn delete_product(&self, id: i64) -> Result<bool, DatabaseError> {
        let stmt = CurrentDialect::delete_product_statement();

        let result = sqlx::query(&stmt)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryFailed {
                operation: DbOperation::DeleteProduct { id },
                sql: stmt.to_string(),
                source: e,
            })?;

        Ok(result.rows_affected() > 0)
    }
}

/// Represents errors that can occur during database operations.
///
/// Each variant includes contextual information to assist with debugging and error handling.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A general SQL query failure, with the operation and SQL that failed.
    #[error("Query failed during {operation:?}: sql={sql}")]
    QueryFailed {
        operation: DbOperation,
        sql: String,
        #[source]
        source: sqlx::Error,
    },

    /// The schema could not be created.
    #[error("Failed to run migration")]
    MigrationFailed {
        #[source]
        source: sqlx::Error,
    },
}

/// Enum representing the kind of database operation being performed,
/// used for attaching context to [`DatabaseError::QueryFailed`].
#[derive(Debug)]
pub enum DbOperation {
    /// INSERT INTO products
    InsertProduct { name: String },
    /// UPDATE products WHERE id = ...
    UpdateProduct { id: i64 },
    /// SELECT ... FROM products WHERE id = ...
    QueryProduct { id: i64 },
    /// SELECT ... FROM products ORDER BY created_at
    QueryProducts,
    /// DELETE FROM products WHERE id = ...
    DeleteProduct { id: i64 },
}

#[cfg(test)]
mod tests {
    use crate::{
        app::Product,
        database::{Database, connect, format_timestamp},
    };
    use chrono::{DateTime, Duration, Utc};
    use std::str::FromStr;

    /// Returns a migrated database backed by an in-memory SQLite pool.
    async fn get_db() -> Database {
        let pool = connect("sqlite::memory:").await.unwrap();
        Database::with_migration(pool).await.unwrap()
    }

    fn product(name: &str, created_at: DateTime<Utc>) -> Product {
        Product {
            id: 0,
            name: name.to_string(),
            description: Some("desc".to_string()),
            price: Some(9.99),
            image: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Verifies that `Database::with_migration` can be called multiple times
    /// on the same pool without error.
    #[tokio::test]
    async fn test_migration_idempotency() {
        let pool = connect("sqlite::memory:").await.unwrap();

        Database::with_migration(pool.clone()).await.unwrap();
        Database::with_migration(pool.clone()).await.unwrap();
    }

    #[test]
    fn test_format_timestamp() {
        let at = DateTime::from_str("2025-05-02T01:18:49.678809123Z").unwrap();

        assert_eq!("2025-05-02T01:18:49.678809Z", format_timestamp(&at));
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = get_db().await;
        let now = DateTime::from_str("2025-05-02T01:18:49.678809Z").unwrap();

        let id = db.insert_product(&product("Lamp", now)).await.unwrap();
        let stored = db.get_product(id).await.unwrap().unwrap();

        assert_eq!(Product { id, ..product("Lamp", now) }, stored);
        assert_eq!(None, db.get_product(id + 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_update() {
        let db = get_db().await;
        let now = Utc::now();

        let id = db.insert_product(&product("Lamp", now)).await.unwrap();
        let mut stored = db.get_product(id).await.unwrap().unwrap();
        stored.name = "Desk lamp".to_string();
        stored.price = None;
        stored.image = Some("https://example.com/lamp.png".to_string());

        assert!(db.update_product(&stored).await.unwrap());
        assert_eq!(stored, db.get_product(id).await.unwrap().unwrap());

        stored.id = id + 100;
        assert!(!db.update_product(&stored).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let db = get_db().await;
        let base = Utc::now();

        let a = db.insert_product(&product("A", base)).await.unwrap();
        let b = db
            .insert_product(&product("B", base + Duration::seconds(1)))
            .await
            .unwrap();
        // Same instant as B: the later id comes first.
        let c = db
            .insert_product(&product("C", base + Duration::seconds(1)))
            .await
            .unwrap();

        let ids: Vec<i64> = db
            .list_products()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();

        assert_eq!(vec![c, b, a], ids);
    }

    #[tokio::test]
    async fn test_delete() {
        let db = get_db().await;

        let id = db.insert_product(&product("Lamp", Utc::now())).await.unwrap();

        assert!(db.delete_product(id).await.unwrap());
        assert!(!db.delete_product(id).await.unwrap());
        assert_eq!(None, db.get_product(id).await.unwrap());
    }
}
