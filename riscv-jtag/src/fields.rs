//! Declarative bit-field layouts for hardware registers.
//!
//! A [`BitField`] is a static table of [`FieldSpec`]s. One field of the base layout may be marked
//! as the selector: its raw value picks an [`Overlay`] whose fields are merged over the base
//! layout when decoding or encoding. This is how the `COMMAND` register of the Debug Module
//! changes shape with `cmdtype`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors raised while decoding or encoding a register value.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("unknown field {0:?}")]
    UnknownField(String),
    #[error("value {value:#x} of field {field} matches no member of its enumeration")]
    UnknownEnumValue { field: &'static str, value: u64 },
    #[error("{name:?} is not a member of the enumeration of field {field}")]
    UnknownEnumName { field: &'static str, name: String },
    #[error("value {value:#x} does not fit into the {length} bit field {field}")]
    ValueOutOfRange {
        field: &'static str,
        value: u64,
        length: u32,
    },
    #[error("field {field} cannot hold {value}")]
    TypeMismatch {
        field: &'static str,
        value: FieldValue,
    },
}

/// What to do with an enumerated field whose value matches no member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    /// Fail with [`FieldError::UnknownEnumValue`].
    Strict,
    /// Decode as [`FieldValue::Unknown`].
    #[default]
    Lenient,
}

/// A named set of values for an enumerated field.
#[derive(Debug, PartialEq, Eq)]
pub struct FieldEnum {
    pub name: &'static str,
    pub members: &'static [(&'static str, u64)],
}

impl FieldEnum {
    pub fn value_of(&self, member: &str) -> Option<u64> {
        self.members
            .iter()
            .find(|(name, _)| *name == member)
            .map(|(_, value)| *value)
    }

    pub fn name_of(&self, value: u64) -> Option<&'static str> {
        self.members
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(name, _)| *name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Plain,
    Enum(&'static FieldEnum),
}

/// Position and interpretation of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub offset: u32,
    pub length: u32,
    pub kind: FieldKind,
    pub selector: bool,
}

impl FieldSpec {
    pub const fn new(name: &'static str, offset: u32, length: u32) -> Self {
        Self {
            name,
            offset,
            length,
            kind: FieldKind::Plain,
            selector: false,
        }
    }

    /// A single bit field, decoded as a boolean.
    pub const fn flag(name: &'static str, offset: u32) -> Self {
        Self::new(name, offset, 1)
    }

    pub const fn enumerated(mut self, values: &'static FieldEnum) -> Self {
        self.kind = FieldKind::Enum(values);
        self
    }

    /// Marks this field as the overlay selector of its layout.
    pub const fn selector(mut self) -> Self {
        self.selector = true;
        self
    }

    fn mask(&self) -> u64 {
        if self.length >= 64 {
            u64::MAX
        } else {
            (1 << self.length) - 1
        }
    }

    fn extract(&self, value: u64) -> u64 {
        (value >> self.offset) & self.mask()
    }

    fn decode(&self, raw: u64, mode: DecodeMode) -> Result<FieldValue, FieldError> {
        match self.kind {
            FieldKind::Enum(values) => match values.name_of(raw) {
                Some(name) => Ok(FieldValue::Enum(name)),
                None if mode == DecodeMode::Lenient => Ok(FieldValue::Unknown(raw)),
                None => Err(FieldError::UnknownEnumValue {
                    field: self.name,
                    value: raw,
                }),
            },
            FieldKind::Plain if self.length == 1 => Ok(FieldValue::Bool(raw != 0)),
            FieldKind::Plain => Ok(FieldValue::Int(raw)),
        }
    }

    /// Converts `value` to the raw bits of this field.
    fn normalize(&self, value: &FieldValue) -> Result<u64, FieldError> {
        let raw = match (value, self.kind) {
            (FieldValue::Bool(bit), FieldKind::Plain) if self.length == 1 => u64::from(*bit),
            (FieldValue::Int(raw) | FieldValue::Unknown(raw), _) => *raw,
            (FieldValue::Enum(name), FieldKind::Enum(values)) => {
                values
                    .value_of(name)
                    .ok_or_else(|| FieldError::UnknownEnumName {
                        field: self.name,
                        name: name.to_string(),
                    })?
            }
            _ => {
                return Err(FieldError::TypeMismatch {
                    field: self.name,
                    value: value.clone(),
                })
            }
        };

        if raw & !self.mask() != 0 {
            return Err(FieldError::ValueOutOfRange {
                field: self.name,
                value: raw,
                length: self.length,
            });
        }
        Ok(raw)
    }
}

/// Fields that replace or extend the base layout when the selector has a given value.
#[derive(Debug, PartialEq, Eq)]
pub struct Overlay {
    pub name: &'static str,
    pub selector_value: u64,
    pub fields: &'static [FieldSpec],
}

/// A decoded or to-be-encoded field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Bool(bool),
    Int(u64),
    Enum(&'static str),
    /// An enumerated field holding a value with no named member.
    Unknown(u64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(bit) => write!(f, "{bit}"),
            FieldValue::Int(value) => write!(f, "{value:#x}"),
            FieldValue::Enum(name) => f.write_str(name),
            FieldValue::Unknown(value) => write!(f, "<unknown {value:#x}>"),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(bit: bool) -> Self {
        FieldValue::Bool(bit)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(value.into())
    }
}

impl From<u16> for FieldValue {
    fn from(value: u16) -> Self {
        FieldValue::Int(value.into())
    }
}

impl From<&'static str> for FieldValue {
    fn from(name: &'static str) -> Self {
        FieldValue::Enum(name)
    }
}

/// The decoded fields of one register value, in layout order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    overlay: Option<&'static str>,
    entries: Vec<(&'static str, u64, FieldValue)>,
}

impl FieldMap {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entry(name).map(|(_, _, value)| value)
    }

    /// The raw bits of a field.
    pub fn raw(&self, name: &str) -> Option<u64> {
        self.entry(name).map(|(_, raw, _)| *raw)
    }

    /// `true` if the field exists and is non-zero.
    pub fn flag(&self, name: &str) -> bool {
        self.raw(name).is_some_and(|raw| raw != 0)
    }

    /// Name of the overlay merged in by the selector, if any.
    pub fn overlay(&self) -> Option<&'static str> {
        self.overlay
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> + '_ {
        self.entries.iter().map(|(name, _, value)| (*name, value))
    }

    fn entry(&self, name: &str) -> Option<&(&'static str, u64, FieldValue)> {
        self.entries.iter().find(|(n, _, _)| *n == name)
    }

    fn insert(&mut self, name: &'static str, raw: u64, value: FieldValue) {
        match self.entries.iter_mut().find(|(n, _, _)| *n == name) {
            Some(entry) => *entry = (name, raw, value),
            None => self.entries.push((name, raw, value)),
        }
    }
}

impl fmt::Display for FieldMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, (name, value)) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        f.write_str("}")
    }
}

/// A register layout: base fields plus overlays keyed by the selector's raw value.
#[derive(Debug, PartialEq, Eq)]
pub struct BitField {
    fields: &'static [FieldSpec],
    overlays: &'static [Overlay],
}

impl BitField {
    pub const fn new(fields: &'static [FieldSpec]) -> Self {
        Self {
            fields,
            overlays: &[],
        }
    }

    pub const fn with_overlays(mut self, overlays: &'static [Overlay]) -> Self {
        self.overlays = overlays;
        self
    }

    /// Looks up a field of the base layout.
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    fn selector(&self) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|field| field.selector)
    }

    fn overlay_for(&self, selector_value: u64) -> Option<&'static Overlay> {
        self.overlays
            .iter()
            .find(|overlay| overlay.selector_value == selector_value)
    }

    /// Resolves `name` in the base layout merged with `overlay`.
    fn resolve(
        &self,
        overlay: Option<&'static Overlay>,
        name: &str,
    ) -> Option<&'static FieldSpec> {
        overlay
            .and_then(|overlay| overlay.fields.iter().find(|field| field.name == name))
            .or_else(|| self.field(name))
    }

    /// Decodes `value`, leniently.
    pub fn decode(&self, value: u64) -> Result<FieldMap, FieldError> {
        self.decode_with(value, DecodeMode::Lenient)
    }

    /// Decodes every base field, then merges the overlay picked by the selector, if any.
    ///
    /// A selector value with no overlay leaves the base fields only.
    pub fn decode_with(&self, value: u64, mode: DecodeMode) -> Result<FieldMap, FieldError> {
        let mut map = FieldMap::default();

        for field in self.fields {
            let raw = field.extract(value);
            map.insert(field.name, raw, field.decode(raw, mode)?);
        }

        let overlay = self
            .selector()
            .and_then(|selector| self.overlay_for(selector.extract(value)));
        if let Some(overlay) = overlay {
            map.overlay = Some(overlay.name);
            for field in overlay.fields {
                let raw = field.extract(value);
                map.insert(field.name, raw, field.decode(raw, mode)?);
            }
        }

        Ok(map)
    }

    /// Writes `fields` into `initial` and returns the result.
    ///
    /// The overlay is chosen by the selector field if it is among `fields`, otherwise by the
    /// selector bits already present in `initial`.
    pub fn encode(&self, initial: u64, fields: &[(&str, FieldValue)]) -> Result<u64, FieldError> {
        let overlay = match self.selector() {
            Some(selector) => {
                let selected = fields
                    .iter()
                    .find(|(name, _)| *name == selector.name)
                    .map(|(_, value)| selector.normalize(value))
                    .transpose()?
                    .unwrap_or_else(|| selector.extract(initial));
                self.overlay_for(selected)
            }
            None => None,
        };

        let mut value = initial;
        for (name, field_value) in fields {
            let field = self
                .resolve(overlay, name)
                .ok_or_else(|| FieldError::UnknownField(name.to_string()))?;
            let raw = field.normalize(field_value)?;

            value &= !(field.mask() << field.offset);
            value |= raw << field.offset;
        }

        Ok(value)
    }
}
