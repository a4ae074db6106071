//! Product request payloads and their validation.
//!
//! A [`ProductForm`] holds the raw fields of a create or update request. The
//! outer `Option` of `description` and `price` records whether the field was
//! sent at all, the inner one whether it was sent as null.

use crate::image::{ImageInput, ImagePolicy, upload_extension};
use std::{borrow::Cow, collections::BTreeMap};
use validator::{Validate, ValidationError, ValidationErrors};

/// Field names in the order their messages are reported.
const FIELDS: [&str; 4] = ["name", "description", "price", "image"];

#[derive(Debug, Default, Validate)]
pub struct ProductForm {
    #[validate(
        required(message = "The name field is required."),
        length(
            max = 255,
            message = "The name field must not be greater than 255 characters."
        )
    )]
    pub name: Option<String>,

    pub description: Option<Option<String>>,

    /// Raw price text; must parse as a finite number when present.
    pub price: Option<Option<String>>,

    pub image: ImageInput,
}

/// A form that passed validation.
#[derive(Debug)]
pub struct ValidForm {
    pub name: String,
    pub description: Option<Option<String>>,
    pub price: Option<Option<f64>>,
    pub image: ImageInput,
}

impl ProductForm {
    /// Validates every field and collects all failures.
    pub fn into_valid(mut self, policy: &ImagePolicy) -> Result<ValidForm, ValidationErrors> {
        // A blank name counts as missing.
        self.name = self.name.filter(|name| !name.trim().is_empty());

        let mut errors = match self.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };

        let price = match self.price {
            Some(Some(raw)) => match parse_price(&raw) {
                Some(price) => Some(Some(price)),
                None => {
                    errors.add(
                        "price",
                        error("numeric", "The price field must be a number."),
                    );
                    None
                }
            },
            Some(None) => Some(None),
            None => None,
        };

        if let ImageInput::Upload(file) = &self.image {
            if upload_extension(file).is_none() {
                errors.add("image", error("image", "The image field must be an image."));
            }
            if file.bytes.len() > policy.max_upload_bytes {
                errors.add(
                    "image",
                    error("max", upload_too_large_message(policy.max_upload_bytes)),
                );
            }
        }

        match self.name {
            Some(name) if errors.is_empty() => Ok(ValidForm {
                name,
                description: self.description,
                price,
                image: self.image,
            }),
            _ => Err(errors),
        }
    }
}

pub fn upload_too_large_message(max_upload_bytes: usize) -> String {
    format!(
        "The image field must not be greater than {} kilobytes.",
        max_upload_bytes / 1024
    )
}

fn parse_price(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|p| p.is_finite())
}

/// Builds a validation error carrying a human readable message.
pub fn error(code: &'static str, message: impl Into<Cow<'static, str>>) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

/// Flattens validation errors into `field -> messages`.
pub fn messages(errors: &ValidationErrors) -> BTreeMap<String, Vec<String>> {
    errors
        .field_errors()
        .into_iter()
        .map(|(field, errors)| {
            let messages = errors
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            (field.to_string(), messages)
        })
        .collect()
}

/// The message reported first, following the field order of the form.
pub fn first_message(messages: &BTreeMap<String, Vec<String>>) -> Option<&str> {
    FIELDS
        .iter()
        .filter_map(|field| messages.get(*field))
        .chain(messages.values())
        .find_map(|m| m.first())
        .map(String::as_str)
}
