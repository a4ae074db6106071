//! # Image Input Resolver
//!
//! Turns the image field of a create or update request into the reference a
//! product stores. The field arrives as an [`ImageInput`]:
//!
//! - an uploaded file, stored under a fresh `products/` key;
//! - a `data:image/<ext>;base64,` URL, decoded and stored under
//!   `products/img_<unique>.<ext>`;
//! - any other text, kept verbatim as an [`ImageRef::External`] (absolute
//!   URLs are never fetched);
//! - nothing, which leaves the current reference alone.
//!
//! When a freshly stored blob replaces a blob the product owned, the old key
//! is reported in [`Resolution::stale`] so the caller can delete it once the
//! record write went through.

use crate::{
    app::AppError,
    form,
    parser::parse_data_url,
    storage::{BlobStore, decoded_key, upload_key},
};
use base64::{
    Engine,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use std::borrow::Cow;
use validator::ValidationErrors;

/// Standard alphabet, padding optional.
const DATA_URL_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A file received as part of a multipart request.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    /// Content type declared by the client.
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

/// The image field of a request, classified once at the boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ImageInput {
    #[default]
    Absent,
    Upload(UploadedFile),
    Text(String),
}

impl ImageInput {
    /// Wraps a text value; blank text counts as absent.
    pub fn text<T: Into<String>>(value: T) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            ImageInput::Absent
        } else {
            ImageInput::Text(value)
        }
    }
}

/// What a product's `image` column refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageRef {
    /// A key in the blob store.
    Stored(String),
    /// A literal string, normally an absolute URL, that is never fetched.
    External(String),
}

impl ImageRef {
    pub fn as_str(&self) -> &str {
        match self {
            ImageRef::Stored(s) | ImageRef::External(s) => s,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            ImageRef::Stored(s) | ImageRef::External(s) => s,
        }
    }
}

/// Limits applied while resolving image input.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePolicy {
    pub max_upload_bytes: usize,
    /// Fail on undecodable data URLs instead of dropping the image.
    pub strict_data_urls: bool,
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self {
            max_upload_bytes: crate::config::DEFAULT_MAX_UPLOAD_BYTES,
            strict_data_urls: false,
        }
    }
}

impl From<&crate::config::AppConfig> for ImagePolicy {
    fn from(config: &crate::config::AppConfig) -> Self {
        Self {
            max_upload_bytes: config.max_upload_bytes,
            strict_data_urls: config.strict_data_urls,
        }
    }
}

/// Outcome of [`resolve_image`].
#[derive(Debug, Default, PartialEq)]
pub struct Resolution {
    /// The new reference, or `None` to keep whatever the product has.
    pub image: Option<ImageRef>,
    /// A previously owned blob that the new reference replaces.
    pub stale: Option<String>,
}

/// Resolves `input` into the reference to store.
///
/// `previous` is the product's current reference (`None` on create). New
/// blobs are written to `storage` here; stale blobs are only reported.
///
/// # Errors
///
/// - `AppError::Validation` for an upload that is not an image or is larger
///   than `policy.max_upload_bytes`, for text naming a blob the product does
///   not already reference, or for an undecodable data URL when
///   `policy.strict_data_urls` is set.
/// - `AppError::Storage` if writing the new blob fails.
pub fn resolve_image(
    storage: &dyn BlobStore,
    input: ImageInput,
    previous: Option<&str>,
    policy: &ImagePolicy,
) -> Result<Resolution, AppError> {
    let image = match input {
        ImageInput::Absent => None,
        ImageInput::Upload(file) => {
            if file.bytes.len() > policy.max_upload_bytes {
                return Err(invalid_image(
                    "max",
                    form::upload_too_large_message(policy.max_upload_bytes),
                ));
            }
            let ext = upload_extension(&file).ok_or_else(|| {
                invalid_image("image", "The image field must be an image.")
            })?;
            let key = upload_key(ext);
            storage.put(&key, &file.bytes)?;
            Some(ImageRef::Stored(key))
        }
        ImageInput::Text(text) => match parse_data_url(&text) {
            Ok(data_url) => match decode_payload(data_url.payload) {
                Some(bytes) => {
                    let key = decoded_key(&data_url.extension);
                    storage.put(&key, &bytes)?;
                    Some(ImageRef::Stored(key))
                }
                None if policy.strict_data_urls => {
                    return Err(invalid_image(
                        "base64",
                        "The image field must contain valid base64 data.",
                    ));
                }
                None => {
                    tracing::warn!(
                        extension = %data_url.extension,
                        "dropping image: data URL payload is not valid base64"
                    );
                    None
                }
            },
            // Echoing the current reference back changes nothing.
            Err(_) if previous == Some(text.as_str()) => None,
            Err(_) if is_url(&text) => Some(ImageRef::External(text)),
            Err(_) => {
                // A stored key may only be set by the resolver itself.
                if storage.exists(&text).unwrap_or(false) {
                    return Err(invalid_image(
                        "foreign",
                        "The image field must not reference another stored image.",
                    ));
                }
                tracing::debug!("storing non-URL image reference verbatim");
                Some(ImageRef::External(text))
            }
        },
    };

    let stale = match (&image, previous) {
        (Some(ImageRef::Stored(_)), Some(previous)) if is_owned(storage, previous) => {
            Some(previous.to_string())
        }
        _ => None,
    };

    Ok(Resolution { image, stale })
}

/// Returns whether `reference` names a blob present in `storage`.
///
/// URLs are never owned. Lookup failures count as not owned.
pub fn is_owned(storage: &dyn BlobStore, reference: &str) -> bool {
    if reference.is_empty() || is_url(reference) {
        return false;
    }

    match storage.exists(reference) {
        Ok(exists) => exists,
        Err(e) => {
            tracing::warn!(key = reference, error = %e, "could not check stored image");
            false
        }
    }
}

/// Returns whether `value` is an absolute URL with a scheme and a host.
pub fn is_url(value: &str) -> bool {
    url::Url::parse(value)
        .map(|url| url.host_str().is_some_and(|host| !host.is_empty()))
        .unwrap_or(false)
}

/// Sniffs an upload and returns the file extension of its image type.
pub fn upload_extension(file: &UploadedFile) -> Option<&'static str> {
    let declared_image = file
        .content_type
        .as_deref()
        .is_none_or(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"));
    if !declared_image {
        return None;
    }

    infer::get(&file.bytes)
        .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .map(|kind| kind.extension())
}

/// Decodes a data URL payload. Whitespace is ignored; empty output is a failure.
fn decode_payload(payload: &str) -> Option<Vec<u8>> {
    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    DATA_URL_ENGINE
        .decode(compact)
        .ok()
        .filter(|bytes| !bytes.is_empty())
}

fn invalid_image(code: &'static str, message: impl Into<Cow<'static, str>>) -> AppError {
    let mut errors = ValidationErrors::new();
    errors.add("image", form::error(code, message));
    AppError::Validation(errors)
}
