//! # Data URL Parser Module
//!
//! Recognizes image data URLs of the form `data:image/<ext>;base64,<payload>`.
//! Only the prefix is validated here; the payload is returned untouched and
//! decoded by the image resolver.
//!
//! ```rust
//! # use catalog::parser::parse_data_url;
//! let url = parse_data_url("data:image/PNG;base64,iVBORw0KGgo=").unwrap();
//! assert_eq!("png", url.extension);
//! assert_eq!("iVBORw0KGgo=", url.payload);
//! ```

use nom::{
    IResult, Parser,
    bytes::complete::{tag as t, take_while1},
    combinator::rest,
    sequence::delimited,
};

/// A data URL split into its image extension and base64 payload.
#[derive(Debug, PartialEq)]
pub struct DataUrl<'a> {
    /// The subtype after `image/`, lowercased.
    pub extension: String,
    /// Everything after the first comma.
    pub payload: &'a str,
}

// <data_url> ::= "data:image/" <ext> ";base64," <payload>
// <ext>      ::= word characters (A-Z a-z 0-9 _)
pub fn parse_data_url(input: &str) -> Result<DataUrl<'_>, ParseErrorDetail> {
    let (_, url) = data_url(input).map_err(|e| match e {
        nom::Err::Error(e) | nom::Err::Failure(e) => e,
        nom::Err::Incomplete(_) => ParseErrorDetail {
            kind: ParseErrorKind::NotDataUrl,
            location: "<incomplete>".to_string(),
        },
    })?;

    Ok(url)
}

fn data_url(input: &str) -> IResult<&str, DataUrl<'_>, ParseErrorDetail> {
    let is_word_char = |c: char| c.is_ascii_alphanumeric() || c == '_';

    let parsed: IResult<&str, (&str, &str), ParseErrorDetail> = (
        delimited(t("data:image/"), take_while1(is_word_char), t(";base64,")),
        rest,
    )
        .parse(input);
    let (input, (ext, payload)) = parsed?;

    Ok((
        input,
        DataUrl {
            extension: ext.to_ascii_lowercase(),
            payload,
        },
    ))
}

#[derive(Debug, PartialEq)]
pub enum ParseErrorKind {
    NotDataUrl,
}

#[derive(Debug, PartialEq)]
pub struct ParseErrorDetail {
    pub kind: ParseErrorKind,
    pub location: String,
}

impl nom::error::ParseError<&str> for ParseErrorDetail {
    fn from_error_kind(input: &str, _kind: nom::error::ErrorKind) -> Self {
        ParseErrorDetail {
            kind: ParseErrorKind::NotDataUrl,
            location: input.to_string(),
        }
    }

    fn append(_input: &str, _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}
