//! The operation registry: the authority on which operations exist and which
//! arguments each one takes.
//!
//! An [`Operation`] declares its arguments as a list of [`ArgumentSpec`]s and
//! does its work in [`Operation::build`] against an [`Arguments`] structure
//! that the dispatcher has already filled and validated. The registry
//! snapshots each operation's declaration into a [`Schema`] the first time
//! the operation is looked at, and reuses that snapshot afterwards.
//!
//! Loaders and savers additionally publish a [`ForeignSpec`], which is what
//! [`resolve`](crate::resolve) searches when mapping a file name, suffix or
//! buffer to an operation name.
//!
//! The built-in operations live in:
//! - [`foreign`]: `*load`, `*load_buffer`, `*save`, `*save_buffer` per format
//! - [`geometry`]: copy, embed, extract_area, flip, rot, resize, affine, thumbnail_image
//! - [`arithmetic`]: invert, avg, max, getpoint, bandjoin, hasalpha

pub mod arithmetic;
pub mod foreign;
pub mod geometry;

use crate::blob::Blob;
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::image::{Header, Image};
use crate::interpolate::Interpolator;
use crate::runtime::{HandleKind, Runtime};
use crate::value::{Direction, Kind, Value};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Resampling kernels available as [`Interpolator`]s.
const INTERPOLATORS: &[(&str, FilterType)] = &[
    ("nearest", FilterType::Nearest),
    ("bilinear", FilterType::Triangle),
    ("bicubic", FilterType::CatmullRom),
    ("gaussian", FilterType::Gaussian),
    ("lanczos3", FilterType::Lanczos3),
];

/// Failure reported by an operation. The text reaches the caller verbatim as
/// [`Error::OperationFailed`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct OperationError(pub String);

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<image::ImageError> for OperationError {
    fn from(e: image::ImageError) -> Self {
        Self(e.to_string())
    }
}

impl From<std::io::Error> for OperationError {
    fn from(e: std::io::Error) -> Self {
        Self(e.to_string())
    }
}

/// Declaration of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArgumentSpec {
    pub name: &'static str,
    pub kind: Kind,
    pub direction: Direction,
    pub required: bool,
    pub description: &'static str,
}

impl ArgumentSpec {
    pub const fn required(name: &'static str, kind: Kind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            direction: Direction::Input,
            required: true,
            description,
        }
    }

    pub const fn optional(name: &'static str, kind: Kind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            direction: Direction::Input,
            required: false,
            description,
        }
    }

    pub const fn output(name: &'static str, kind: Kind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            direction: Direction::Output,
            required: true,
            description,
        }
    }
}

/// Snapshot of an operation's declared arguments.
#[derive(Debug, Clone, Serialize)]
pub struct Schema {
    pub operation: &'static str,
    pub description: &'static str,
    pub arguments: Vec<ArgumentSpec>,
}

impl Schema {
    fn snapshot(operation: &dyn Operation) -> Self {
        Self {
            operation: operation.name(),
            description: operation.description(),
            arguments: operation.arguments(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ArgumentSpec> {
        self.arguments.iter().find(|a| a.name == name)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &ArgumentSpec> {
        self.arguments
            .iter()
            .filter(|a| a.direction == Direction::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &ArgumentSpec> {
        self.arguments
            .iter()
            .filter(|a| a.direction == Direction::Output)
    }

    fn unknown(&self, name: &str) -> Error {
        Error::UnknownArgument {
            operation: self.operation.to_string(),
            argument: name.to_string(),
        }
    }

    /// Check that `name` is a declared argument with this direction and kind.
    pub fn check(&self, name: &str, direction: Direction, kind: Kind) -> Result<&ArgumentSpec> {
        let spec = self.get(name).ok_or_else(|| self.unknown(name))?;
        if spec.direction != direction {
            return Err(Error::InvalidOptionUse(format!(
                "{} argument {name} is an {}, not an {direction}",
                self.operation, spec.direction
            )));
        }
        if spec.kind != kind {
            return Err(Error::kind_mismatch(name, spec.kind, kind));
        }
        Ok(spec)
    }
}

/// Whether a foreign operation reads or writes, and from/to where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignRole {
    Load,
    Save,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignTarget {
    File,
    Buffer,
}

/// How a loader or saver is found by suffix or content.
#[derive(Debug, Clone, Copy)]
pub struct ForeignSpec {
    pub role: ForeignRole,
    pub target: ForeignTarget,
    /// Lowercase suffixes without the dot.
    pub suffixes: &'static [&'static str],
    /// Container format recognised when sniffing a buffer.
    pub format: ImageFormat,
    /// Higher wins when several operations claim the same input.
    pub priority: i32,
}

/// An operation that can be invoked by name.
///
/// Implementations must be stateless or internally synchronised: the registry
/// is shared by every thread that uses the runtime.
pub trait Operation: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Declared arguments. Called once per runtime, when the schema is first needed.
    fn arguments(&self) -> Vec<ArgumentSpec>;

    fn foreign(&self) -> Option<ForeignSpec> {
        None
    }

    /// Run the operation. Every required input is present and every input has
    /// the declared kind by the time this is called.
    fn build(&self, args: &mut Arguments<'_>) -> Result<(), OperationError>;
}

pub struct Registry {
    operations: BTreeMap<&'static str, Arc<dyn Operation>>,
    schemas: Mutex<HashMap<&'static str, Arc<Schema>>>,
}

impl Registry {
    /// A registry with no operations. Interpolators are always available.
    pub fn empty() -> Self {
        Self {
            operations: BTreeMap::new(),
            schemas: Mutex::new(HashMap::new()),
        }
    }

    /// Every built-in operation.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        foreign::register(&mut registry);
        geometry::register(&mut registry);
        arithmetic::register(&mut registry);
        registry
    }

    /// Add an operation, replacing any existing one with the same name.
    pub fn register(&mut self, operation: impl Operation + 'static) {
        let name = operation.name();
        self.operations.insert(name, Arc::new(operation));
        self.schemas
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Operation>> {
        self.operations
            .get(name)
            .cloned()
            .ok_or_else(|| Error::OperationNotFound(name.to_string()))
    }

    /// The cached schema of `name`, snapshotted on first use.
    pub fn schema(&self, name: &str) -> Result<Arc<Schema>> {
        let operation = self.lookup(name)?;
        let mut schemas = self.schemas.lock().unwrap_or_else(PoisonError::into_inner);
        let schema = schemas
            .entry(operation.name())
            .or_insert_with(|| Arc::new(Schema::snapshot(operation.as_ref())));
        Ok(Arc::clone(schema))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.operations.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Loaders and savers with the given role and target, highest priority first.
    pub fn foreign(&self, role: ForeignRole, target: ForeignTarget) -> Vec<(&'static str, ForeignSpec)> {
        let mut found: Vec<(&'static str, ForeignSpec)> = self
            .operations
            .iter()
            .filter_map(|(name, op)| op.foreign().map(|spec| (*name, spec)))
            .filter(|(_, spec)| spec.role == role && spec.target == target)
            .collect();
        found.sort_by(|a, b| b.1.priority.cmp(&a.1.priority).then(a.0.cmp(b.0)));
        found
    }

    pub fn interpolator(&self, name: &str) -> Option<(&'static str, FilterType)> {
        INTERPOLATORS
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name.trim()))
            .copied()
    }

    pub fn interpolator_names(&self) -> Vec<&'static str> {
        INTERPOLATORS.iter().map(|(name, _)| *name).collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// The argument structure of one call.
///
/// The dispatcher fills the inputs; the operation reads them through the
/// typed getters and publishes results with [`set_output`](Self::set_output).
/// Native resources an operation creates are allocated through
/// [`new_image`](Self::new_image) and [`new_blob`](Self::new_blob) so the
/// runtime accounts for them. Dropping the structure releases every value it
/// still holds, whichever way the call ended.
pub struct Arguments<'a> {
    runtime: &'a Runtime,
    schema: Arc<Schema>,
    inputs: HashMap<&'static str, Value<'a>>,
    outputs: HashMap<&'static str, Value<'static>>,
}

impl<'a> Arguments<'a> {
    pub(crate) fn new(runtime: &'a Runtime, schema: Arc<Schema>) -> Self {
        Self {
            runtime,
            schema,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.schema.operation
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.runtime.config()
    }

    /// Bind an input, replacing any earlier binding of the same name.
    pub(crate) fn set_input(&mut self, name: &str, value: Value<'a>) -> Result<()> {
        let spec = self.schema.check(name, Direction::Input, value.kind())?;
        self.inputs.insert(spec.name, value);
        Ok(())
    }

    /// The first required input that has not been bound.
    pub(crate) fn missing_required(&self) -> Option<&'static str> {
        self.schema
            .inputs()
            .find(|spec| spec.required && !self.inputs.contains_key(spec.name))
            .map(|spec| spec.name)
    }

    pub(crate) fn take_output(&mut self, name: &str) -> Option<Value<'static>> {
        self.outputs.remove(name)
    }

    /// Publish a result. `name` must be a declared output of matching kind.
    pub fn set_output(&mut self, name: &str, value: Value<'static>) -> Result<(), OperationError> {
        let spec = self
            .schema
            .check(name, Direction::Output, value.kind())
            .map_err(|e| OperationError(e.to_string()))?;
        self.outputs.insert(spec.name, value);
        Ok(())
    }

    /// Wrap freshly computed pixels as a runtime-accounted image.
    ///
    /// The image takes the header of the first input image.
    pub fn new_image(&self, pixels: DynamicImage) -> Image {
        self.new_image_with_header(pixels, self.input_header())
    }

    pub fn new_image_with_header(&self, pixels: DynamicImage, header: Header) -> Image {
        Image::wrap(self.runtime, pixels, header)
    }

    /// Header of the first bound input image, in schema order.
    pub fn input_header(&self) -> Header {
        self.schema
            .inputs()
            .find_map(|spec| match self.inputs.get(spec.name) {
                Some(Value::Image(image)) => Some(image.header()),
                Some(Value::ImageArray(images)) => images.first().map(Image::header),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Wrap freshly allocated bytes as a runtime-accounted blob.
    pub fn new_blob(&self, bytes: Vec<u8>) -> Blob<'static> {
        Blob::allocated(bytes, self.runtime.handles().acquire(HandleKind::Blob))
    }

    fn missing(&self, name: &str) -> OperationError {
        OperationError(format!("parameter {name} not set"))
    }

    fn wrong_kind(&self, name: &str, kind: Kind) -> OperationError {
        OperationError(format!("parameter {name} is not a {kind}"))
    }

    fn value(&self, name: &str) -> Option<&Value<'a>> {
        self.inputs.get(name)
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, OperationError> {
        match self.value(name) {
            None => Ok(default),
            Some(Value::Bool(v)) => Ok(*v),
            Some(_) => Err(self.wrong_kind(name, Kind::Bool)),
        }
    }

    pub fn int_opt(&self, name: &str) -> Result<Option<i64>, OperationError> {
        match self.value(name) {
            None => Ok(None),
            Some(Value::Int(v)) => Ok(Some(*v)),
            Some(_) => Err(self.wrong_kind(name, Kind::Int)),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64, OperationError> {
        self.int_opt(name)?.ok_or_else(|| self.missing(name))
    }

    pub fn int_or(&self, name: &str, default: i64) -> Result<i64, OperationError> {
        Ok(self.int_opt(name)?.unwrap_or(default))
    }

    pub fn double_opt(&self, name: &str) -> Result<Option<f64>, OperationError> {
        match self.value(name) {
            None => Ok(None),
            Some(Value::Double(v)) => Ok(Some(*v)),
            Some(_) => Err(self.wrong_kind(name, Kind::Double)),
        }
    }

    pub fn double(&self, name: &str) -> Result<f64, OperationError> {
        self.double_opt(name)?.ok_or_else(|| self.missing(name))
    }

    pub fn string_opt(&self, name: &str) -> Result<Option<&str>, OperationError> {
        match self.value(name) {
            None => Ok(None),
            Some(Value::String(v)) => Ok(Some(v.as_str())),
            Some(_) => Err(self.wrong_kind(name, Kind::String)),
        }
    }

    pub fn string(&self, name: &str) -> Result<&str, OperationError> {
        self.string_opt(name)?.ok_or_else(|| self.missing(name))
    }

    pub fn blob(&self, name: &str) -> Result<&[u8], OperationError> {
        match self.value(name) {
            None => Err(self.missing(name)),
            Some(Value::Blob(blob)) => Ok(blob.as_bytes()),
            Some(_) => Err(self.wrong_kind(name, Kind::Blob)),
        }
    }

    pub fn image(&self, name: &str) -> Result<&Image, OperationError> {
        match self.value(name) {
            None => Err(self.missing(name)),
            Some(Value::Image(image)) => Ok(image),
            Some(_) => Err(self.wrong_kind(name, Kind::Image)),
        }
    }

    pub fn double_array_opt(&self, name: &str) -> Result<Option<&[f64]>, OperationError> {
        match self.value(name) {
            None => Ok(None),
            Some(Value::DoubleArray(v)) => Ok(Some(v.as_slice())),
            Some(_) => Err(self.wrong_kind(name, Kind::DoubleArray)),
        }
    }

    pub fn double_array(&self, name: &str) -> Result<&[f64], OperationError> {
        self.double_array_opt(name)?.ok_or_else(|| self.missing(name))
    }

    pub fn image_array(&self, name: &str) -> Result<&[Image], OperationError> {
        match self.value(name) {
            None => Err(self.missing(name)),
            Some(Value::ImageArray(v)) => Ok(v.as_slice()),
            Some(_) => Err(self.wrong_kind(name, Kind::ImageArray)),
        }
    }

    /// The named interpolator, or the runtime default when unset.
    pub fn interpolator_or_default(&self, name: &str) -> Result<Interpolator, OperationError> {
        match self.value(name) {
            None => Ok(self.runtime.default_interpolator()),
            Some(Value::Interpolator(v)) => Ok(*v),
            Some(_) => Err(self.wrong_kind(name, Kind::Interpolator)),
        }
    }
}
