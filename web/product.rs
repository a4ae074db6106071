use crate::AppState;
use axum::{
    Form, Json,
    body::Bytes,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::BytesMut;
use catalog::{
    app::{self, AppError, CreateProductCommand, Product, UpdateProductCommand},
    form::{ProductForm, error, first_message, messages},
    image::{ImageInput, UploadedFile},
    storage::{BlobStore, StorageError},
};
use futures::TryStreamExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use validator::ValidationErrors;

/// A product form read from a JSON, urlencoded or multipart body.
pub struct ProductPayload(pub ProductForm);

impl<S> FromRequest<S> for ProductPayload
where
    S: Send + Sync,
{
    type Rejection = ProductError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| rejected(e.status(), e.body_text()))?;
            return Ok(ProductPayload(read_multipart(multipart).await?));
        }

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| rejected(e.status(), e.body_text()))?;
            let mut form = ProductForm::default();
            for (name, value) in fields {
                apply_text(&mut form, &name, value);
            }
            return Ok(ProductPayload(form));
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| rejected(e.status(), e.body_text()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(ProductPayload(ProductForm::default()));
        }

        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| ProductError::BadRequest(format!("Malformed JSON body: {e}")))?;
        let Value::Object(fields) = value else {
            return Err(ProductError::BadRequest(
                "The request body must be a JSON object.".to_string(),
            ));
        };

        let mut form = ProductForm::default();
        let mut errors = ValidationErrors::new();
        for (name, value) in fields {
            let text = match (name.as_str(), value) {
                (_, Value::Null) => String::new(),
                (_, Value::String(s)) => s,
                // Booleans and the like fall through to the numeric check.
                ("price", other) => other.to_string(),
                (field, _) => {
                    if let Some(field) = TEXT_FIELDS.iter().find(|f| **f == field) {
                        errors.add(
                            *field,
                            error("string", format!("The {field} field must be a string.")),
                        );
                    }
                    continue;
                }
            };
            apply_text(&mut form, &name, text);
        }

        if !errors.is_empty() {
            return Err(AppError::Validation(errors).into());
        }

        Ok(ProductPayload(form))
    }
}

/// Fields that only accept strings (or null) in a JSON body.
const TEXT_FIELDS: [&str; 3] = ["name", "description", "image"];

/// Maps an extractor rejection, keeping the 413 of an over-limit body.
fn rejected(status: StatusCode, message: String) -> ProductError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ProductError::PayloadTooLarge(message)
    } else {
        ProductError::BadRequest(message)
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<ProductForm, ProductError> {
    let mut form = ProductForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| rejected(e.status(), e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "image" && field.file_name().is_some() {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);

            let mut data = BytesMut::new();
            let mut stream = field.into_stream();
            while let Some(chunk) = stream
                .try_next()
                .await
                .map_err(|e| rejected(e.status(), e.body_text()))?
            {
                data.extend_from_slice(&chunk);
            }

            // Browsers send an empty file part when no file was chosen.
            form.image = if data.is_empty() {
                ImageInput::Absent
            } else {
                ImageInput::Upload(UploadedFile {
                    bytes: data.freeze().to_vec(),
                    content_type,
                    file_name,
                })
            };
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| rejected(e.status(), e.body_text()))?;
        apply_text(&mut form, &name, text);
    }

    Ok(form)
}

/// Sets a form field from request text. Values are trimmed and empty strings count as null.
fn apply_text(form: &mut ProductForm, name: &str, value: String) {
    let value = value.trim().to_string();
    let nullable = (!value.is_empty()).then(|| value.clone());

    match name {
        "name" => form.name = Some(value),
        "description" => form.description = Some(nullable),
        "price" => form.price = Some(nullable),
        "image" => form.image = ImageInput::text(value),
        _ => {} // ignore
    }
}

/// Parses a route id. Anything that is not an integer cannot name a product.
fn parse_id(raw: &str) -> Result<i64, ProductError> {
    raw.parse()
        .map_err(|_| ProductError::NotFound(raw.to_string()))
}

pub async fn get_products(State(state): State<AppState>) -> Result<Json<Vec<Product>>, ProductError> {
    Ok(Json(app::list_products(&state.db).await?))
}

pub async fn post_product(
    State(state): State<AppState>,
    ProductPayload(form): ProductPayload,
) -> Result<(StatusCode, Json<Product>), ProductError> {
    let product = CreateProductCommand::from_form(form)
        .with_policy(state.policy.clone())
        .execute(state.storage.as_ref(), &state.db)
        .await?;

    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Product>, ProductError> {
    let id = parse_id(&id)?;

    Ok(Json(app::find_product(&state.db, id).await?))
}

pub async fn put_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ProductPayload(form): ProductPayload,
) -> Result<Json<Product>, ProductError> {
    let id = parse_id(&id)?;

    let product = UpdateProductCommand::from_form(id, form)
        .with_policy(state.policy.clone())
        .execute(state.storage.as_ref(), &state.db)
        .await?;

    Ok(Json(product))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ProductError> {
    let id = parse_id(&id)?;

    app::remove_product(state.storage.as_ref(), &state.db, id).await?;

    Ok(Json(MessageResponse {
        message: "Product deleted successfully".to_string(),
    }))
}

/// Serves a stored blob with a content type sniffed from its bytes.
pub async fn get_storage(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ProductError> {
    let bytes = match state.storage.get(&key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) | Err(StorageError::InvalidKey { .. }) => {
            return Err(ProductError::NotFound(key));
        }
        Err(e) => return Err(AppError::Storage(e).into()),
    };

    let mime = infer::get(&bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream");

    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}

#[derive(Serialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize, Debug)]
struct ValidationResponse {
    message: String,
    errors: BTreeMap<String, Vec<String>>,
}

#[derive(Debug)]
pub enum ProductError {
    App(AppError),

    /// A route id or storage key that names nothing.
    NotFound(String),

    BadRequest(String),

    /// The body exceeded the configured size limit.
    PayloadTooLarge(String),
}

impl From<AppError> for ProductError {
    fn from(value: AppError) -> Self {
        ProductError::App(value)
    }
}

impl IntoResponse for ProductError {
    fn into_response(self) -> Response {
        let not_found = |what: String| {
            (
                StatusCode::NOT_FOUND,
                Json(MessageResponse {
                    message: format!("No query results for product {what}"),
                }),
            )
                .into_response()
        };

        match self {
            ProductError::App(AppError::Validation(errors)) => {
                let errors = messages(&errors);
                let message = first_message(&errors)
                    .unwrap_or("The given data was invalid.")
                    .to_string();

                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(ValidationResponse { message, errors }),
                )
                    .into_response()
            }
            ProductError::App(AppError::NotFound { id }) => not_found(id.to_string()),
            ProductError::App(error) => {
                tracing::error!(%error, "request failed");

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(MessageResponse {
                        message: "Server Error".to_string(),
                    }),
                )
                    .into_response()
            }
            ProductError::NotFound(what) => not_found(what),
            ProductError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(MessageResponse { message })).into_response()
            }
            ProductError::PayloadTooLarge(message) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(MessageResponse { message }),
            )
                .into_response(),
        }
    }
}
