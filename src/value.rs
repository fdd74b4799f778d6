//! Boundary values: the closed set of argument kinds an operation can take or
//! produce.
//!
//! [`Value`] is what actually crosses into an operation. Inputs are converted to
//! a `Value` by [`OptionValue::serialize`](crate::OptionValue::serialize);
//! outputs come back as a `Value` and are written into a caller-held [`Slot`] by
//! [`OptionValue::deserialize`](crate::OptionValue::deserialize).
//!
//! | Kind | Payload | Parsed from an option string |
//! |---|---|---|
//! | `Bool` | `bool` | `true`/`false`/`yes`/`no`/`1`/`0`, or a bare flag |
//! | `Int` | `i64` | decimal integer |
//! | `Double` | `f64` | decimal float |
//! | `String` | `String` | verbatim |
//! | `Blob` | [`Blob`] | no |
//! | `Image` | [`Image`] | no |
//! | `DoubleArray` | `Vec<f64>` | space-separated floats |
//! | `ImageArray` | `Vec<Image>` | no |
//! | `Interpolator` | [`Interpolator`] | registered name |

use crate::blob::Blob;
use crate::error::{Error, Result};
use crate::image::Image;
use crate::interpolate::Interpolator;
use crate::registry::Registry;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    Bool,
    Int,
    Double,
    String,
    Blob,
    Image,
    DoubleArray,
    ImageArray,
    Interpolator,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Double => "double",
            Kind::String => "string",
            Kind::Blob => "blob",
            Kind::Image => "image",
            Kind::DoubleArray => "array-double",
            Kind::ImageArray => "array-image",
            Kind::Interpolator => "interpolate",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// One argument value as an operation sees it.
///
/// The lifetime is only ever shorter than `'static` for blobs that borrow
/// caller-owned bytes; everything an operation produces is `Value<'static>`.
#[derive(Debug, Clone)]
pub enum Value<'a> {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Blob(Blob<'a>),
    Image(Image),
    DoubleArray(Vec<f64>),
    ImageArray(Vec<Image>),
    Interpolator(Interpolator),
}

impl<'a> Value<'a> {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Double(_) => Kind::Double,
            Value::String(_) => Kind::String,
            Value::Blob(_) => Kind::Blob,
            Value::Image(_) => Kind::Image,
            Value::DoubleArray(_) => Kind::DoubleArray,
            Value::ImageArray(_) => Kind::ImageArray,
            Value::Interpolator(_) => Kind::Interpolator,
        }
    }

    /// Detach from any borrowed bytes, copying them if needed.
    pub fn into_static(self) -> Value<'static> {
        match self {
            Value::Bool(v) => Value::Bool(v),
            Value::Int(v) => Value::Int(v),
            Value::Double(v) => Value::Double(v),
            Value::String(v) => Value::String(v),
            Value::Blob(blob) => Value::Blob(blob.into_static()),
            Value::Image(image) => Value::Image(image),
            Value::DoubleArray(v) => Value::DoubleArray(v),
            Value::ImageArray(v) => Value::ImageArray(v),
            Value::Interpolator(v) => Value::Interpolator(v),
        }
    }

    /// The first image this value refers to, if any.
    pub(crate) fn first_image(&self) -> Option<&Image> {
        match self {
            Value::Image(image) => Some(image),
            Value::ImageArray(images) => images.first(),
            _ => None,
        }
    }
}

impl Value<'static> {
    /// Parse the textual form used in option strings (`name.jpg[Q=90,strip]`).
    ///
    /// `text` is `None` for a bare flag, which is only meaningful for booleans.
    pub fn parse(registry: &Registry, kind: Kind, text: Option<&str>) -> Result<Self> {
        let Some(text) = text.map(str::trim) else {
            return match kind {
                Kind::Bool => Ok(Value::Bool(true)),
                other => Err(Error::InvalidOptionUse(format!(
                    "a {other} argument needs a value"
                ))),
            };
        };
        let unparsable =
            || Error::InvalidOptionUse(format!("cannot parse {text:?} as a {kind} value"));
        match kind {
            Kind::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
                _ => Err(unparsable()),
            },
            Kind::Int => text.parse().map(Value::Int).map_err(|_| unparsable()),
            Kind::Double => text.parse().map(Value::Double).map_err(|_| unparsable()),
            Kind::String => Ok(Value::String(text.to_string())),
            Kind::DoubleArray => text
                .split_whitespace()
                .map(|part| part.parse::<f64>().map_err(|_| unparsable()))
                .collect::<Result<Vec<_>>>()
                .map(Value::DoubleArray),
            Kind::Interpolator => Interpolator::from_registry(registry, text).map(Value::Interpolator),
            Kind::Blob | Kind::Image | Kind::ImageArray => Err(Error::InvalidOptionUse(format!(
                "a {kind} argument cannot be set from an option string"
            ))),
        }
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Blob(blob) => write!(f, "{blob}"),
            Value::Image(image) => write!(f, "{image}"),
            Value::DoubleArray(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::ImageArray(images) => {
                let parts: Vec<String> = images.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Interpolator(interpolator) => write!(f, "{interpolator}"),
        }
    }
}

/// Caller-held write-back location for one output argument.
///
/// Cloning a slot shares it: the clone handed to an output option and the one
/// the caller keeps see the same contents. A slot is filled at most once.
#[derive(Debug)]
pub struct Slot<T>(Arc<Mutex<Option<T>>>);

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    pub fn is_filled(&self) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Whether `other` is a clone of this slot.
    pub fn same(&self, other: &Slot<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Move the value out, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub(crate) fn fill(&self, name: &str, value: T) -> Result<()> {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return Err(Error::InvalidOptionUse(format!(
                "output {name} has already been written"
            )));
        }
        *guard = Some(value);
        Ok(())
    }
}

impl<T: Clone> Slot<T> {
    pub fn get(&self) -> Option<T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}
