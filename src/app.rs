//! # Product Operations Module
//!
//! This module provides the operations behind the product API: creating,
//! reading, listing, updating and deleting products together with the image
//! each of them may carry.
//!
//! ## Provided Structures
//!
//! - **CreateProductCommand** / **UpdateProductCommand**: builder-style
//!   requests that validate their form, resolve the image and persist the
//!   result.
//! - **Product**: the stored record.
//!
//! ## Image lifecycle
//!
//! Blob and record writes are not transactional. A command writes the new
//! blob first and the record second; if the record write fails the new blob
//! is removed again. A blob replaced by a new one is deleted only after the
//! record write succeeded, and failing to delete it is logged, not returned.
//!
//! ## Error Handling
//!
//! [`AppError`] wraps storage and database failures, validation errors and
//! missing products.

use crate::{
    database::{Database, DatabaseError},
    form::ProductForm,
    image::{ImageInput, ImagePolicy, ImageRef, is_owned, resolve_image},
    storage::{BlobStore, StorageError},
};
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use validator::ValidationErrors;

/// A product as stored and returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: Option<f64>,
    /// A blob store key or a literal URL.
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Represents a request to create a product.
///
/// Use builder-style methods to fill in the form, then call `execute()`.
#[derive(Debug, Default)]
pub struct CreateProductCommand {
    pub form: ProductForm,
    pub policy: ImagePolicy,
}

impl CreateProductCommand {
    /// Creates a command for a product called `name`.
    pub fn new<T: Into<String>>(name: T) -> Self {
        Self::from_form(ProductForm {
            name: Some(name.into()),
            ..Default::default()
        })
    }

    /// Wraps an already collected form, e.g. from an HTTP request.
    pub fn from_form(form: ProductForm) -> Self {
        CreateProductCommand {
            form,
            policy: ImagePolicy::default(),
        }
    }

    pub fn with_description<T: Into<String>>(mut self, description: T) -> Self {
        self.form.description = Some(Some(description.into()));
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.form.price = Some(Some(price.to_string()));
        self
    }

    pub fn with_image(mut self, image: ImageInput) -> Self {
        self.form.image = image;
        self
    }

    pub fn with_policy(mut self, policy: ImagePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Validates the form, stores the image if one was given and inserts the product.
    ///
    /// # Returns
    ///
    /// The created `Product` with its assigned id, or an `AppError`.
    pub async fn execute(self, storage: &dyn BlobStore, db: &Database) -> Result<Product, AppError> {
        let form = self
            .form
            .into_valid(&self.policy)
            .map_err(AppError::Validation)?;

        let resolution = resolve_image(storage, form.image, None, &self.policy)?;

        let created_at = now();
        let mut product = Product {
            id: 0,
            name: form.name,
            description: form.description.flatten(),
            price: form.price.flatten(),
            image: resolution.image.clone().map(ImageRef::into_string),
            created_at,
            updated_at: created_at,
        };

        product.id = match db.insert_product(&product).await {
            Ok(id) => id,
            Err(e) => {
                discard_new_blob(storage, resolution.image.as_ref());
                return Err(e.into());
            }
        };

        tracing::info!(id = product.id, image = ?product.image, "created product");

        Ok(product)
    }
}

/// Represents a request to update an existing product.
///
/// `name` is always replaced. `description`, `price` and `image` are only
/// touched when the form carries them.
#[derive(Debug)]
pub struct UpdateProductCommand {
    pub id: i64,
    pub form: ProductForm,
    pub policy: ImagePolicy,
}

impl UpdateProductCommand {
    pub fn new<T: Into<String>>(id: i64, name: T) -> Self {
        Self::from_form(
            id,
            ProductForm {
                name: Some(name.into()),
                ..Default::default()
            },
        )
    }

    pub fn from_form(id: i64, form: ProductForm) -> Self {
        UpdateProductCommand {
            id,
            form,
            policy: ImagePolicy::default(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.form.description = Some(description);
        self
    }

    pub fn with_price(mut self, price: Option<f64>) -> Self {
        self.form.price = Some(price.map(|p| p.to_string()));
        self
    }

    pub fn with_image(mut self, image: ImageInput) -> Self {
        self.form.image = image;
        self
    }

    pub fn with_policy(mut self, policy: ImagePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Applies the update.
    ///
    /// A missing product is reported before the form is validated, so
    /// nothing is written for it.
    pub async fn execute(self, storage: &dyn BlobStore, db: &Database) -> Result<Product, AppError> {
        let mut product = find_product(db, self.id).await?;

        let form = self
            .form
            .into_valid(&self.policy)
            .map_err(AppError::Validation)?;

        let resolution = resolve_image(
            storage,
            form.image,
            product.image.as_deref(),
            &self.policy,
        )?;

        product.name = form.name;
        if let Some(description) = form.description {
            product.description = description;
        }
        if let Some(price) = form.price {
            product.price = price;
        }
        if let Some(image) = resolution.image.clone() {
            product.image = Some(image.into_string());
        }
        product.updated_at = now();

        let updated = match db.update_product(&product).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::NotFound { id: product.id }),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = updated {
            discard_new_blob(storage, resolution.image.as_ref());
            return Err(e);
        }

        if let Some(stale) = resolution.stale {
            delete_blob(storage, &stale);
        }

        tracing::info!(id = product.id, image = ?product.image, "updated product");

        Ok(product)
    }
}

/// Retrieves a product by id.
///
/// # Errors
///
/// `AppError::NotFound` if there is no such product.
pub async fn find_product(db: &Database, id: i64) -> Result<Product, AppError> {
    db.get_product(id)
        .await?
        .ok_or(AppError::NotFound { id })
}

/// Returns all products, newest first.
pub async fn list_products(db: &Database) -> Result<Vec<Product>, AppError> {
    Ok(db.list_products().await?)
}

/// Deletes a product and, when it owns one, its stored image.
///
/// The image is removed first; failing to remove it does not stop the
/// record from being deleted.
pub async fn remove_product(
    storage: &dyn BlobStore,
    db: &Database,
    id: i64,
) -> Result<Product, AppError> {
    let product = find_product(db, id).await?;

    if let Some(image) = product.image.as_deref() {
        if is_owned(storage, image) {
            delete_blob(storage, image);
        }
    }

    if !db.delete_product(id).await? {
        return Err(AppError::NotFound { id });
    }

    tracing::info!(id, "deleted product");

    Ok(product)
}

/// The current time, truncated to the precision timestamps are stored with.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Best-effort blob deletion.
fn delete_blob(storage: &dyn BlobStore, key: &str) {
    if let Err(e) = storage.delete(key) {
        tracing::warn!(key, error = %e, "failed to delete stored image");
    }
}

/// Compensates for a blob written before a failed record write.
fn discard_new_blob(storage: &dyn BlobStore, image: Option<&ImageRef>) {
    if let Some(ImageRef::Stored(key)) = image {
        delete_blob(storage, key);
    }
}

/// Error types within the application, encapsulating storage, database and request errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("product not found: {id}")]
    NotFound { id: i64 },
}

#[cfg(test)]
mod tests {
    use crate::{
        app::{
            AppError, CreateProductCommand, UpdateProductCommand, find_product, list_products,
            remove_product,
        },
        database::{Database, connect},
        image::{ImageInput, ImagePolicy, UploadedFile},
        storage::{BlobStore, LocalStorage, StorageError},
    };
    use base64::{Engine, engine::general_purpose::STANDARD};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const PNG: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52,
    ];

    /// Local storage that records every key it was asked to delete.
    #[derive(Debug)]
    struct RecordingStorage {
        inner: LocalStorage,
        deleted: Mutex<Vec<String>>,
    }

    impl BlobStore for RecordingStorage {
        fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
            self.inner.put(key, bytes)
        }

        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.inner.get(key)
        }

        fn exists(&self, key: &str) -> Result<bool, StorageError> {
            self.inner.exists(key)
        }

        fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.deleted.lock().unwrap().push(key.to_string());
            self.inner.delete(key)
        }
    }

    async fn setup() -> (TempDir, RecordingStorage, Database) {
        let tmp_dir = TempDir::new().unwrap();
        let storage = RecordingStorage {
            inner: LocalStorage::new(tmp_dir.path().to_path_buf()),
            deleted: Mutex::new(vec![]),
        };
        let pool = connect("sqlite::memory:").await.unwrap();
        let db = Database::with_migration(pool).await.unwrap();

        (tmp_dir, storage, db)
    }

    fn png_upload() -> ImageInput {
        ImageInput::Upload(UploadedFile {
            bytes: PNG.to_vec(),
            content_type: Some("image/png".to_string()),
            file_name: Some("lamp.png".to_string()),
        })
    }

    #[tokio::test]
    async fn test_create_with_upload() {
        let (_dir, storage, db) = setup().await;

        let product = CreateProductCommand::new("Lamp")
            .with_description("A lamp")
            .with_price(19.5)
            .with_image(png_upload())
            .execute(&storage, &db)
            .await
            .unwrap();

        let key = product.image.clone().unwrap();
        assert!(storage.exists(&key).unwrap());
        assert_eq!(Some(19.5), product.price);
        assert_eq!(product, find_product(&db, product.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_without_image() {
        let (_dir, storage, db) = setup().await;

        let product = CreateProductCommand::new("Lamp")
            .execute(&storage, &db)
            .await
            .unwrap();

        assert_eq!(None, product.image);
        assert_eq!(None, product.description);
        assert_eq!(None, product.price);
    }

    #[tokio::test]
    async fn test_create_with_invalid_data_url_drops_image() {
        let (_dir, storage, db) = setup().await;

        let product = CreateProductCommand::new("Lamp")
            .with_image(ImageInput::text("data:image/png;base64,%%%"))
            .execute(&storage, &db)
            .await
            .unwrap();

        assert_eq!(None, product.image);

        let strict = CreateProductCommand::new("Lamp")
            .with_image(ImageInput::text("data:image/png;base64,%%%"))
            .with_policy(ImagePolicy {
                strict_data_urls: true,
                ..Default::default()
            })
            .execute(&storage, &db)
            .await;

        assert!(matches!(strict, Err(AppError::Validation(_))));
        assert_eq!(1, list_products(&db).await.unwrap().len());
    }

    #[tokio::test]
    async fn test_create_invalid_form_writes_nothing() {
        let (dir, storage, db) = setup().await;

        let result = CreateProductCommand::new("")
            .with_image(png_upload())
            .execute(&storage, &db)
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(list_products(&db).await.unwrap().is_empty());
        assert!(!dir.path().join("products").exists());
    }

    #[tokio::test]
    async fn test_update_replaces_stored_image() {
        let (_dir, storage, db) = setup().await;

        let created = CreateProductCommand::new("Lamp")
            .with_price(10.0)
            .with_image(png_upload())
            .execute(&storage, &db)
            .await
            .unwrap();
        let old_key = created.image.clone().unwrap();

        let updated = UpdateProductCommand::new(created.id, "Desk lamp")
            .with_image(png_upload())
            .execute(&storage, &db)
            .await
            .unwrap();
        let new_key = updated.image.clone().unwrap();

        assert_ne!(old_key, new_key);
        assert!(!storage.exists(&old_key).unwrap());
        assert!(storage.exists(&new_key).unwrap());
        assert_eq!("Desk lamp", updated.name);
        // Fields missing from the form are left alone.
        assert_eq!(Some(10.0), updated.price);
        assert_eq!(updated, find_product(&db, created.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_data_url_replaces_stored_image() {
        let (_dir, storage, db) = setup().await;

        let created = CreateProductCommand::new("Lamp")
            .with_image(png_upload())
            .execute(&storage, &db)
            .await
            .unwrap();
        let old_key = created.image.clone().unwrap();

        let data_url = format!("data:image/gif;base64,{}", STANDARD.encode(b"GIF89a"));
        let updated = UpdateProductCommand::new(created.id, "Lamp")
            .with_image(ImageInput::text(data_url))
            .execute(&storage, &db)
            .await
            .unwrap();
        let new_key = updated.image.unwrap();

        assert!(new_key.starts_with("products/img_") && new_key.ends_with(".gif"));
        assert_eq!(Some(b"GIF89a".to_vec()), storage.get(&new_key).unwrap());
        assert!(!storage.exists(&old_key).unwrap());
    }

    #[tokio::test]
    async fn test_update_with_url_keeps_old_blob() {
        let (_dir, storage, db) = setup().await;

        let created = CreateProductCommand::new("Lamp")
            .with_image(png_upload())
            .execute(&storage, &db)
            .await
            .unwrap();
        let old_key = created.image.clone().unwrap();

        let updated = UpdateProductCommand::new(created.id, "Lamp")
            .with_image(ImageInput::text("https://cdn.example.com/lamp.png"))
            .execute(&storage, &db)
            .await
            .unwrap();

        assert_eq!(
            Some("https://cdn.example.com/lamp.png".to_string()),
            updated.image
        );
        assert!(storage.exists(&old_key).unwrap());
        assert!(storage.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_fields() {
        let (_dir, storage, db) = setup().await;

        let created = CreateProductCommand::new("Lamp")
            .with_description("old")
            .with_price(10.0)
            .with_image(ImageInput::text("https://example.com/a.png"))
            .execute(&storage, &db)
            .await
            .unwrap();

        let updated = UpdateProductCommand::new(created.id, "Lamp")
            .with_description(None)
            .with_price(Some(12.0))
            .execute(&storage, &db)
            .await
            .unwrap();

        assert_eq!(None, updated.description);
        assert_eq!(Some(12.0), updated.price);
        assert_eq!(created.image, updated.image);
        assert_eq!(created.created_at, updated.created_at);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn test_update_missing_product() {
        let (dir, storage, db) = setup().await;

        let result = UpdateProductCommand::new(42, "Lamp")
            .with_image(png_upload())
            .execute(&storage, &db)
            .await;

        assert!(matches!(result, Err(AppError::NotFound { id: 42 })));
        assert!(!dir.path().join("products").exists());
    }

    #[tokio::test]
    async fn test_remove_product_deletes_owned_blob() {
        let (_dir, storage, db) = setup().await;

        let created = CreateProductCommand::new("Lamp")
            .with_image(png_upload())
            .execute(&storage, &db)
            .await
            .unwrap();
        let key = created.image.clone().unwrap();

        let removed = remove_product(&storage, &db, created.id).await.unwrap();

        assert_eq!(created, removed);
        assert!(!storage.exists(&key).unwrap());
        assert!(matches!(
            find_product(&db, created.id).await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_product_with_url_skips_storage() {
        let (_dir, storage, db) = setup().await;

        let created = CreateProductCommand::new("Lamp")
            .with_image(ImageInput::text("http://unreachable.invalid/lamp.png"))
            .execute(&storage, &db)
            .await
            .unwrap();

        remove_product(&storage, &db, created.id).await.unwrap();

        assert!(storage.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stored_key_of_another_product_is_rejected() {
        let (_dir, storage, db) = setup().await;

        let lamp = CreateProductCommand::new("Lamp")
            .with_image(png_upload())
            .execute(&storage, &db)
            .await
            .unwrap();
        let lamp_key = lamp.image.clone().unwrap();

        let created = CreateProductCommand::new("Desk")
            .with_image(ImageInput::text(lamp_key.clone()))
            .execute(&storage, &db)
            .await;
        assert!(matches!(created, Err(AppError::Validation(_))));

        let desk = CreateProductCommand::new("Desk")
            .with_image(ImageInput::text("https://example.com/desk.png"))
            .execute(&storage, &db)
            .await
            .unwrap();
        let updated = UpdateProductCommand::new(desk.id, "Desk")
            .with_image(ImageInput::text(lamp_key.clone()))
            .execute(&storage, &db)
            .await;
        assert!(matches!(updated, Err(AppError::Validation(_))));

        remove_product(&storage, &db, desk.id).await.unwrap();

        assert!(storage.exists(&lamp_key).unwrap());
        assert_eq!(lamp, find_product(&db, lamp.id).await.unwrap());
        assert!(storage.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_echoing_own_key_keeps_blob() {
        let (_dir, storage, db) = setup().await;

        let lamp = CreateProductCommand::new("Lamp")
            .with_image(png_upload())
            .execute(&storage, &db)
            .await
            .unwrap();
        let key = lamp.image.clone().unwrap();

        let updated = UpdateProductCommand::new(lamp.id, "Lamp")
            .with_image(ImageInput::text(key.clone()))
            .execute(&storage, &db)
            .await
            .unwrap();

        assert_eq!(Some(key.clone()), updated.image);
        assert!(storage.exists(&key).unwrap());
    }

    #[tokio::test]
    async fn test_remove_missing_product() {
        let (_dir, storage, db) = setup().await;

        assert!(matches!(
            remove_product(&storage, &db, 7).await,
            Err(AppError::NotFound { id: 7 })
        ));
        assert!(storage.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_products_newest_first() {
        let (_dir, storage, db) = setup().await;

        let mut ids = vec![];
        for name in ["A", "B", "C"] {
            let product = CreateProductCommand::new(name)
                .execute(&storage, &db)
                .await
                .unwrap();
            ids.push(product.id);
        }
        ids.reverse();

        let listed: Vec<i64> = list_products(&db)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();

        assert_eq!(ids, listed);
    }
}
