//! # SQL Dialect Module
//!
//! This module defines the `Dialect` trait, which abstracts over the differences in
//! SQL syntax across database systems. Higher-level code in [`crate::database`]
//! only asks the dialect for statements and never spells SQL itself.
//!
//! The current SQL dialect is chosen at compile time by feature flags. When the
//! `sqlite` feature is enabled, `CurrentDialect` is `sqlite::SqliteDialect`.

#[cfg(feature = "sqlite")]
mod sqlite;

/// The current SQL dialect used at compile time, determined by feature flags.
#[cfg(feature = "sqlite")]
pub type CurrentDialect = sqlite::SqliteDialect;

#[cfg(feature = "sqlite")]
pub type Db = sqlx::Sqlite;

#[cfg(feature = "sqlite")]
pub type CurrentRow = sqlx::sqlite::SqliteRow;

/// Columns of the `products` table in the order every SELECT returns them.
const PRODUCT_COLUMNS: &str = "id, name, description, price, image, created_at, updated_at";

/// A trait for SQL dialects to support database-specific query generation.
pub trait Dialect {
    /// Returns the SQL placeholder for the 1-based parameter index `idx`.
    ///
    /// SQLite uses `?` and ignores the index.
    fn placeholder(idx: usize) -> String;

    /// Returns the statement inserting a product and returning its new id.
    ///
    /// Binds: name, description, price, image, created_at, updated_at.
    fn insert_product_statement() -> String {
        format!(
            r#"INSERT INTO products (name, description, price, image, created_at, updated_at)
            VALUES ({}, {}, {}, {}, {}, {}) RETURNING id"#,
            Self::placeholder(1),
            Self::placeholder(2),
            Self::placeholder(3),
            Self::placeholder(4),
            Self::placeholder(5),
            Self::placeholder(6),
        )
    }

    /// Returns the statement overwriting the mutable columns of a product.
    ///
    /// Binds: name, description, price, image, updated_at, id.
    fn update_product_statement() -> String {
        format!(
            r#"UPDATE products
            SET name = {}, description = {}, price = {}, image = {}, updated_at = {}
            WHERE id = {}"#,
            Self::placeholder(1),
            Self::placeholder(2),
            Self::placeholder(3),
            Self::placeholder(4),
            Self::placeholder(5),
            Self::placeholder(6),
        )
    }

    fn query_product_statement() -> String {
        format!(
            "SELECT {} FROM products WHERE id = {}",
            PRODUCT_COLUMNS,
            Self::placeholder(1)
        )
    }

    /// Returns the statement listing every product, newest first.
    ///
    /// Products created within the same instant are ordered by id.
    fn query_products_statement() -> String {
        format!(
            "SELECT {} FROM products ORDER BY created_at DESC, id DESC",
            PRODUCT_COLUMNS
        )
    }

    fn delete_product_statement() -> String {
        format!("DELETE FROM products WHERE id = {}", Self::placeholder(1))
    }

    /// Creates the schema. Must be safe to run repeatedly.
    async fn migration(pool: &sqlx::Pool<Db>) -> Result<(), sqlx::Error>;
}
