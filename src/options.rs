//! Named, directed arguments and the ordered sets they are assembled into.
//!
//! An [`OptionValue`] is either an input carrying a [`Value`], or an output
//! carrying a caller-held [`Slot`] that is filled after the call succeeds. Its
//! kind is fixed at construction. An [`OptionSet`] keeps at most one option
//! per name: merging an option whose name is already present replaces it in
//! place, so the set's order stays the order in which names were first seen.

use crate::blob::Blob;
use crate::error::{Error, Result};
use crate::image::Image;
use crate::interpolate::Interpolator;
use crate::value::{Direction, Kind, Slot, Value};
use std::fmt;

/// Typed write-back location of an output option.
#[derive(Debug, Clone)]
pub enum OutputSlot {
    Bool(Slot<bool>),
    Int(Slot<i64>),
    Double(Slot<f64>),
    String(Slot<String>),
    Blob(Slot<Blob<'static>>),
    Image(Slot<Image>),
    DoubleArray(Slot<Vec<f64>>),
    ImageArray(Slot<Vec<Image>>),
}

impl OutputSlot {
    pub fn kind(&self) -> Kind {
        match self {
            OutputSlot::Bool(_) => Kind::Bool,
            OutputSlot::Int(_) => Kind::Int,
            OutputSlot::Double(_) => Kind::Double,
            OutputSlot::String(_) => Kind::String,
            OutputSlot::Blob(_) => Kind::Blob,
            OutputSlot::Image(_) => Kind::Image,
            OutputSlot::DoubleArray(_) => Kind::DoubleArray,
            OutputSlot::ImageArray(_) => Kind::ImageArray,
        }
    }

    fn is_filled(&self) -> bool {
        match self {
            OutputSlot::Bool(slot) => slot.is_filled(),
            OutputSlot::Int(slot) => slot.is_filled(),
            OutputSlot::Double(slot) => slot.is_filled(),
            OutputSlot::String(slot) => slot.is_filled(),
            OutputSlot::Blob(slot) => slot.is_filled(),
            OutputSlot::Image(slot) => slot.is_filled(),
            OutputSlot::DoubleArray(slot) => slot.is_filled(),
            OutputSlot::ImageArray(slot) => slot.is_filled(),
        }
    }

    fn shares(&self, other: &OutputSlot) -> bool {
        match (self, other) {
            (OutputSlot::Bool(a), OutputSlot::Bool(b)) => a.same(b),
            (OutputSlot::Int(a), OutputSlot::Int(b)) => a.same(b),
            (OutputSlot::Double(a), OutputSlot::Double(b)) => a.same(b),
            (OutputSlot::String(a), OutputSlot::String(b)) => a.same(b),
            (OutputSlot::Blob(a), OutputSlot::Blob(b)) => a.same(b),
            (OutputSlot::Image(a), OutputSlot::Image(b)) => a.same(b),
            (OutputSlot::DoubleArray(a), OutputSlot::DoubleArray(b)) => a.same(b),
            (OutputSlot::ImageArray(a), OutputSlot::ImageArray(b)) => a.same(b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
enum Payload<'a> {
    Input(Value<'a>),
    Output(OutputSlot),
}

/// One named argument, directed into or out of an operation.
#[derive(Debug, Clone)]
pub struct OptionValue<'a> {
    name: String,
    payload: Payload<'a>,
}

impl<'a> OptionValue<'a> {
    pub fn input(name: impl Into<String>, value: Value<'a>) -> Self {
        Self {
            name: name.into(),
            payload: Payload::Input(value),
        }
    }

    pub fn output(name: impl Into<String>, slot: OutputSlot) -> Self {
        Self {
            name: name.into(),
            payload: Payload::Output(slot),
        }
    }

    pub fn input_bool(name: impl Into<String>, value: bool) -> Self {
        Self::input(name, Value::Bool(value))
    }

    pub fn input_int(name: impl Into<String>, value: i64) -> Self {
        Self::input(name, Value::Int(value))
    }

    pub fn input_double(name: impl Into<String>, value: f64) -> Self {
        Self::input(name, Value::Double(value))
    }

    pub fn input_string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::input(name, Value::String(value.into()))
    }

    pub fn input_blob(name: impl Into<String>, blob: Blob<'a>) -> Self {
        Self::input(name, Value::Blob(blob))
    }

    pub fn input_image(name: impl Into<String>, image: &Image) -> Self {
        Self::input(name, Value::Image(image.clone()))
    }

    pub fn input_double_array(name: impl Into<String>, values: &[f64]) -> Self {
        Self::input(name, Value::DoubleArray(values.to_vec()))
    }

    pub fn input_image_array(name: impl Into<String>, images: &[Image]) -> Self {
        Self::input(name, Value::ImageArray(images.to_vec()))
    }

    pub fn input_interpolator(name: impl Into<String>, interpolator: Interpolator) -> Self {
        Self::input(name, Value::Interpolator(interpolator))
    }

    pub fn output_bool(name: impl Into<String>, slot: &Slot<bool>) -> Self {
        Self::output(name, OutputSlot::Bool(slot.clone()))
    }

    pub fn output_int(name: impl Into<String>, slot: &Slot<i64>) -> Self {
        Self::output(name, OutputSlot::Int(slot.clone()))
    }

    pub fn output_double(name: impl Into<String>, slot: &Slot<f64>) -> Self {
        Self::output(name, OutputSlot::Double(slot.clone()))
    }

    pub fn output_string(name: impl Into<String>, slot: &Slot<String>) -> Self {
        Self::output(name, OutputSlot::String(slot.clone()))
    }

    pub fn output_blob(name: impl Into<String>, slot: &Slot<Blob<'static>>) -> Self {
        Self::output(name, OutputSlot::Blob(slot.clone()))
    }

    pub fn output_image(name: impl Into<String>, slot: &Slot<Image>) -> Self {
        Self::output(name, OutputSlot::Image(slot.clone()))
    }

    pub fn output_double_array(name: impl Into<String>, slot: &Slot<Vec<f64>>) -> Self {
        Self::output(name, OutputSlot::DoubleArray(slot.clone()))
    }

    pub fn output_image_array(name: impl Into<String>, slot: &Slot<Vec<Image>>) -> Self {
        Self::output(name, OutputSlot::ImageArray(slot.clone()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        match self.payload {
            Payload::Input(_) => Direction::Input,
            Payload::Output(_) => Direction::Output,
        }
    }

    pub fn kind(&self) -> Kind {
        match &self.payload {
            Payload::Input(value) => value.kind(),
            Payload::Output(slot) => slot.kind(),
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction() == Direction::Input
    }

    /// The boundary value of an input option.
    ///
    /// Handles are shared rather than copied, so serializing the same option
    /// twice never duplicates a native resource.
    pub fn serialize(&self) -> Result<Value<'a>> {
        match &self.payload {
            Payload::Input(value) => Ok(value.clone()),
            Payload::Output(_) => Err(Error::wrong_direction(&self.name, Direction::Input)),
        }
    }

    /// Write a produced value into this output option's slot.
    ///
    /// Fails if this is an input, if the kinds differ, or if the slot already
    /// holds a value.
    pub fn deserialize(&self, value: Value<'_>) -> Result<()> {
        let Payload::Output(slot) = &self.payload else {
            return Err(Error::wrong_direction(&self.name, Direction::Output));
        };
        let name = self.name.as_str();
        match (slot, value) {
            (OutputSlot::Bool(slot), Value::Bool(v)) => slot.fill(name, v),
            (OutputSlot::Int(slot), Value::Int(v)) => slot.fill(name, v),
            (OutputSlot::Double(slot), Value::Double(v)) => slot.fill(name, v),
            (OutputSlot::String(slot), Value::String(v)) => slot.fill(name, v),
            (OutputSlot::Blob(slot), Value::Blob(v)) => slot.fill(name, v.into_static()),
            (OutputSlot::Image(slot), Value::Image(v)) => slot.fill(name, v),
            (OutputSlot::DoubleArray(slot), Value::DoubleArray(v)) => slot.fill(name, v),
            (OutputSlot::ImageArray(slot), Value::ImageArray(v)) => slot.fill(name, v),
            (slot, value) => Err(Error::kind_mismatch(name, slot.kind(), value.kind())),
        }
    }

    /// Whether both options are outputs writing to the same slot.
    pub(crate) fn shares_slot(&self, other: &OptionValue<'_>) -> bool {
        match (&self.payload, &other.payload) {
            (Payload::Output(a), Payload::Output(b)) => a.shares(b),
            _ => false,
        }
    }

    /// Whether an output's slot already holds a value. Always false for inputs.
    pub(crate) fn is_filled(&self) -> bool {
        match &self.payload {
            Payload::Input(_) => false,
            Payload::Output(slot) => slot.is_filled(),
        }
    }
}

impl fmt::Display for OptionValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Input(value) => write!(f, "{}={}", self.name, value),
            Payload::Output(slot) => write!(f, "{}->{}", self.name, slot.kind()),
        }
    }
}

/// Ordered, unique-by-name collection of options for one call.
#[derive(Debug, Clone, Default)]
pub struct OptionSet<'a> {
    options: Vec<OptionValue<'a>>,
}

impl<'a> OptionSet<'a> {
    /// Build a set; duplicate names resolve last-write-wins.
    pub fn new(options: impl IntoIterator<Item = OptionValue<'a>>) -> Self {
        Self::default().with(options)
    }

    /// Merge `more` into this set. An option whose name is already present
    /// replaces the existing one at its original position; new names are
    /// appended in the order given.
    pub fn with(mut self, more: impl IntoIterator<Item = OptionValue<'a>>) -> Self {
        for option in more {
            self.set(option);
        }
        self
    }

    /// Merge a single option in place.
    pub fn set(&mut self, option: OptionValue<'a>) {
        match self.options.iter_mut().find(|o| o.name == option.name) {
            Some(existing) => *existing = option,
            None => self.options.push(option),
        }
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue<'a>> {
        self.options.iter().find(|o| o.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OptionValue<'a>> {
        self.options.iter()
    }

    pub fn inputs(&self) -> impl Iterator<Item = &OptionValue<'a>> {
        self.options.iter().filter(|o| o.is_input())
    }

    pub fn outputs(&self) -> impl Iterator<Item = &OptionValue<'a>> {
        self.options.iter().filter(|o| !o.is_input())
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// `name=value` for every input, in set order.
    pub fn render_inputs(&self) -> Vec<String> {
        self.inputs().map(|o| o.to_string()).collect()
    }
}

impl<'a> FromIterator<OptionValue<'a>> for OptionSet<'a> {
    fn from_iter<I: IntoIterator<Item = OptionValue<'a>>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl<'s, 'a> IntoIterator for &'s OptionSet<'a> {
    type Item = &'s OptionValue<'a>;
    type IntoIter = std::slice::Iter<'s, OptionValue<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.options.iter()
    }
}

/// Split a raw option string such as `[Q=90,strip]` into `(name, value)`
/// pairs. Surrounding brackets are optional; a bare name has no value.
pub fn parse_option_string(raw: &str) -> Result<Vec<(String, Option<String>)>> {
    let trimmed = raw.trim();
    let inner = match trimmed.strip_prefix('[') {
        Some(rest) => rest.strip_suffix(']').ok_or_else(|| {
            Error::InvalidOptionUse(format!("unterminated option string {raw:?}"))
        })?,
        None => trimmed,
    };

    let mut pairs = Vec::new();
    for part in inner.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (name, value) = match part.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim().to_string())),
            None => (part, None),
        };
        if name.is_empty() {
            return Err(Error::InvalidOptionUse(format!(
                "missing argument name in {raw:?}"
            )));
        }
        pairs.push((name.to_string(), value));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_of(set: &OptionSet<'_>, name: &str) -> i64 {
        match set.get(name).unwrap().serialize().unwrap() {
            Value::Int(v) => v,
            other => panic!("{name} is not an int: {other:?}"),
        }
    }

    #[test]
    fn primitive_values_survive_serialize_then_deserialize() {
        let b = Slot::new();
        let i = Slot::new();
        let d = Slot::new();
        let s = Slot::new();
        let pairs = [
            (OptionValue::input_bool("b", true), OptionValue::output_bool("b", &b)),
            (OptionValue::input_int("i", 42), OptionValue::output_int("i", &i)),
            (OptionValue::input_double("d", 42.2), OptionValue::output_double("d", &d)),
            (OptionValue::input_string("s", "hi"), OptionValue::output_string("s", &s)),
        ];
        for (input, output) in &pairs {
            output.deserialize(input.serialize().unwrap()).unwrap();
        }
        assert_eq!(b.get(), Some(true));
        assert_eq!(i.get(), Some(42));
        assert_eq!(d.get(), Some(42.2));
        assert_eq!(s.get(), Some("hi".to_string()));
    }

    #[test]
    fn serialize_on_output_is_invalid_use() {
        let slot: Slot<i64> = Slot::new();
        let option = OptionValue::output_int("i", &slot);
        assert!(matches!(option.serialize(), Err(Error::InvalidOptionUse(_))));
    }

    #[test]
    fn deserialize_on_input_is_invalid_use() {
        let option = OptionValue::input_int("i", 1);
        assert!(matches!(
            option.deserialize(Value::Int(2)),
            Err(Error::InvalidOptionUse(_))
        ));
    }

    #[test]
    fn deserialize_kind_mismatch_is_invalid_use() {
        let slot: Slot<i64> = Slot::new();
        let option = OptionValue::output_int("i", &slot);
        assert!(matches!(
            option.deserialize(Value::Double(1.0)),
            Err(Error::InvalidOptionUse(_))
        ));
        assert!(!slot.is_filled());
    }

    #[test]
    fn deserialize_twice_fails_fast() {
        let slot: Slot<i64> = Slot::new();
        let option = OptionValue::output_int("i", &slot);
        option.deserialize(Value::Int(1)).unwrap();
        assert!(option.is_filled());
        assert!(option.deserialize(Value::Int(2)).is_err());
        assert_eq!(slot.get(), Some(1));
    }

    #[test]
    fn blob_output_detaches_from_borrowed_bytes() {
        let slot = Slot::new();
        let option = OptionValue::output_blob("buffer", &slot);
        {
            let bytes = vec![1u8, 2, 3];
            option
                .deserialize(Value::Blob(Blob::borrowed(&bytes)))
                .unwrap();
        }
        assert_eq!(slot.take().unwrap().to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn kind_and_direction_are_fixed_by_constructor() {
        let slot: Slot<Vec<f64>> = Slot::new();
        let out = OptionValue::output_double_array("out_array", &slot);
        assert_eq!(out.kind(), Kind::DoubleArray);
        assert_eq!(out.direction(), Direction::Output);
        let input = OptionValue::input_double_array("background", &[0.0, 0.0, 0.0]);
        assert_eq!(input.kind(), Kind::DoubleArray);
        assert!(input.is_input());
    }

    #[test]
    fn with_overrides_by_name_and_keeps_first_position() {
        let set = OptionSet::new([OptionValue::input_int("A", 1)]).with([
            OptionValue::input_int("A", 2),
            OptionValue::input_int("B", 3),
        ]);
        let names: Vec<&str> = set.iter().map(|o| o.name()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(int_of(&set, "A"), 2);
        assert_eq!(int_of(&set, "B"), 3);
    }

    #[test]
    fn new_resolves_duplicates() {
        let set = OptionSet::new([
            OptionValue::input_int("x", 1),
            OptionValue::input_int("y", 2),
            OptionValue::input_int("x", 3),
        ]);
        assert_eq!(set.len(), 2);
        assert_eq!(int_of(&set, "x"), 3);
        assert_eq!(set.render_inputs(), vec!["x=3", "y=2"]);
    }

    #[test]
    fn override_may_change_direction() {
        let slot: Slot<i64> = Slot::new();
        let set = OptionSet::new([OptionValue::input_int("x", 1)])
            .with([OptionValue::output_int("x", &slot)]);
        assert_eq!(set.inputs().count(), 0);
        assert_eq!(set.outputs().count(), 1);
    }

    #[test]
    fn display_marks_outputs() {
        let slot: Slot<Image> = Slot::new();
        assert_eq!(OptionValue::output_image("out", &slot).to_string(), "out->image");
        assert_eq!(OptionValue::input_bool("crop", false).to_string(), "crop=false");
    }

    #[test]
    fn option_string_forms() {
        assert!(parse_option_string("").unwrap().is_empty());
        assert_eq!(
            parse_option_string("[Q=90,strip]").unwrap(),
            vec![("Q".to_string(), Some("90".to_string())), ("strip".to_string(), None)]
        );
        assert_eq!(
            parse_option_string(" compression = 9 ").unwrap(),
            vec![("compression".to_string(), Some("9".to_string()))]
        );
    }

    #[test]
    fn option_string_errors() {
        assert!(parse_option_string("[Q=90").is_err());
        assert!(parse_option_string("=90").is_err());
    }
}
