//! # Product Catalog
//!
//! This crate provides a small product catalog: CRUD over product records,
//! each of which may carry one image. An image arrives as a file upload, as a
//! base64 `data:` URL, or as a reference to an external URL. Uploaded and
//! decoded images are written to a blob store; external URLs are stored
//! verbatim and never fetched.
//!
//! ## Features
//!
//! - **Image resolution**: classify the incoming image field and store it
//!   where needed ([`image`]).
//! - **Cleanup**: blobs replaced by a new stored image, or left behind by a
//!   deleted product, are removed on a best-effort basis.
//! - **Validation**: request payloads are validated with field-level messages
//!   ([`form`]).
//!
//! ## Usage
//!
//! The entry points are the command structs in [`app`], which provide
//! chaining methods to build a request and an async `execute`.
//!
//! ```no_run
//! use catalog::app::CreateProductCommand;
//! use catalog::database::Database;
//! use catalog::image::ImageInput;
//! use catalog::storage::LocalStorage;
//!
//! async fn add_lamp(storage: &LocalStorage, db: &Database) {
//!     let command = CreateProductCommand::new("Lamp")
//!         .with_price(19.99)
//!         .with_image(ImageInput::text("https://example.com/lamp.png"));
//!
//!     match command.execute(storage, db).await {
//!         Ok(product) => println!("Created product {}", product.id),
//!         Err(error) => eprintln!("Failed to create product: {}", error),
//!     }
//! }
//! ```

pub mod app;
pub mod config;
pub mod database;
mod dialect;
pub mod form;
pub mod image;
pub mod parser;
pub mod storage;

pub mod prelude {
    pub use crate::app::{
        AppError, CreateProductCommand, Product, UpdateProductCommand, find_product,
        list_products, remove_product,
    };
    pub use crate::config::AppConfig;
    pub use crate::database::{Database, connect};
    pub use crate::image::{ImageInput, ImagePolicy, UploadedFile};
    pub use crate::storage::{BlobStore, LocalStorage};
}
