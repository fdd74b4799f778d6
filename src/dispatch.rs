//! Invoking an operation by name.
//!
//! [`call`] and [`call_with_option_string`] run one operation synchronously:
//!
//! 1. look the operation up (`OperationNotFound`)
//! 2. bind every input option by name against the cached schema
//!    (`UnknownArgument`, `InvalidOptionUse`) and check every output option
//!    names a declared output with an empty slot no other output shares
//! 3. bind the raw option string (last value per name), skipping names
//!    already bound structurally
//! 4. check required inputs, then invoke (`OperationFailed`)
//! 5. on success, collect every requested output and only then write them
//!    into their slots
//!
//! The argument structure is dropped on every exit path, releasing whatever
//! handles it still holds.
//!
//! Output images inherit the call history of the first input image and then
//! record this call. A call that produces no image, or fails, is recorded on
//! the first input image instead.

use crate::error::{Error, Result};
use crate::events::CallEvent;
use crate::image::Image;
use crate::options::{OptionSet, parse_option_string};
use crate::registry::{Arguments, OperationError};
use crate::runtime::Runtime;
use crate::value::{Direction, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Run `operation` with the given options.
pub fn call(runtime: &Runtime, operation: &str, options: &OptionSet<'_>) -> Result<()> {
    call_with_option_string(runtime, operation, options, "")
}

/// Run `operation` with the given options plus a raw `key=value,...` string.
///
/// When the option string and the option set both name an argument, the
/// option set wins.
pub fn call_with_option_string(
    runtime: &Runtime,
    operation: &str,
    options: &OptionSet<'_>,
    option_string: &str,
) -> Result<()> {
    runtime.ensure_running()?;
    let op = runtime.registry().lookup(operation)?;
    let schema = runtime.registry().schema(operation)?;
    let mut args = Arguments::new(runtime, Arc::clone(&schema));

    let mut source: Option<Image> = None;
    for option in options.inputs() {
        let value = option.serialize()?;
        if source.is_none() {
            source = value.first_image().cloned();
        }
        args.set_input(option.name(), value)?;
    }
    let outputs: Vec<_> = options.outputs().collect();
    for (i, option) in outputs.iter().enumerate() {
        schema.check(option.name(), Direction::Output, option.kind())?;
        if option.is_filled() {
            return Err(Error::InvalidOptionUse(format!(
                "output {} already holds a value",
                option.name()
            )));
        }
        if let Some(earlier) = outputs[..i].iter().find(|o| o.shares_slot(option)) {
            return Err(Error::InvalidOptionUse(format!(
                "outputs {} and {} share one slot",
                earlier.name(),
                option.name()
            )));
        }
    }

    let mut rendered = options.render_inputs();
    for (name, text) in last_write_wins(parse_option_string(option_string)?) {
        if options.get(&name).is_some_and(|o| o.is_input()) {
            debug!(operation, argument = %name, "option string value ignored, set structurally");
            continue;
        }
        let spec = schema.get(&name).ok_or_else(|| Error::UnknownArgument {
            operation: operation.to_string(),
            argument: name.clone(),
        })?;
        let value = Value::parse(runtime.registry(), spec.kind, text.as_deref())?;
        rendered.push(format!("{name}={value}"));
        args.set_input(&name, value)?;
    }

    let event = CallEvent::from_rendered(operation, rendered);
    debug!(call = %event, "dispatch");

    let outcome = match args.missing_required() {
        Some(name) => Err(OperationError(format!("parameter {name} not set"))),
        None => op.build(&mut args),
    };
    if let Err(OperationError(message)) = outcome {
        return Err(failure(runtime, operation, event, source.as_ref(), message));
    }

    let mut produced = Vec::new();
    for option in outputs {
        match args.take_output(option.name()) {
            Some(value) => produced.push((option, value)),
            None => {
                let message = format!("output {} was not produced", option.name());
                return Err(failure(runtime, operation, event, source.as_ref(), message));
            }
        }
    }
    runtime.record_call(operation, true);

    let event = Arc::new(event);
    let history = source.as_ref().map(|s| s.call_event_log()).unwrap_or_default();
    let mut logged = false;
    for (option, value) in produced {
        let images: &[Image] = match &value {
            Value::Image(image) => std::slice::from_ref(image),
            Value::ImageArray(images) => images,
            _ => &[],
        };
        for image in images {
            image.copy_events(&history);
            image.push_event(Arc::clone(&event));
            logged = true;
        }
        option.deserialize(value)?;
    }
    if !logged {
        if let Some(source) = &source {
            source.push_event(event);
        }
    }
    Ok(())
}

/// Count a failed call, record it on the source image and build the error.
fn failure(
    runtime: &Runtime,
    operation: &str,
    event: CallEvent,
    source: Option<&Image>,
    message: String,
) -> Error {
    runtime.record_call(operation, false);
    warn!(call = %event, error = %message, "operation failed");
    if let Some(source) = source {
        source.push_event(Arc::new(event.failed(&message)));
    }
    Error::operation_failed(operation, message)
}

/// Collapse repeated names to one entry holding the last value, at the
/// position the name first appeared.
fn last_write_wins(pairs: Vec<(String, Option<String>)>) -> Vec<(String, Option<String>)> {
    let mut resolved: Vec<(String, Option<String>)> = Vec::with_capacity(pairs.len());
    for (name, text) in pairs {
        match resolved.iter_mut().find(|(known, _)| *known == name) {
            Some(entry) => entry.1 = text,
            None => resolved.push((name, text)),
        }
    }
    resolved
}
