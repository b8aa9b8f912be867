//! Columnar component batches.
//!
//! A [`ComponentBatch`] is one named, typed column of N instances backed by an
//! Arrow array. The set of value types is closed ([`ValueTypeTag`]); the set
//! of archetypes and components is open: anything implementing
//! [`AsComponents`] can be logged.

use std::fmt;
use std::sync::Arc;

use arrow::array::{
    new_empty_array, Array, ArrayRef, BinaryArray, BooleanArray, FixedSizeListArray,
    Float32Array, Float64Array, Int32Array, Int64Array, StringArray, UInt32Array, UInt64Array,
    UInt8Array,
};
use arrow::datatypes::{DataType, Field, FieldRef};
use arrow::util::display::{ArrayFormatter, FormatOptions};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VislogError};

/// Element type of a component batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueTypeTag {
    Bool,
    UInt8,
    UInt32,
    UInt64,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Binary,
    Vec2F32,
    Vec3F32,
    Vec4F32,
}

impl ValueTypeTag {
    pub const ALL: [ValueTypeTag; 13] = [
        ValueTypeTag::Bool,
        ValueTypeTag::UInt8,
        ValueTypeTag::UInt32,
        ValueTypeTag::UInt64,
        ValueTypeTag::Int32,
        ValueTypeTag::Int64,
        ValueTypeTag::Float32,
        ValueTypeTag::Float64,
        ValueTypeTag::Utf8,
        ValueTypeTag::Binary,
        ValueTypeTag::Vec2F32,
        ValueTypeTag::Vec3F32,
        ValueTypeTag::Vec4F32,
    ];

    /// The Arrow type a batch with this tag must have.
    pub fn data_type(&self) -> DataType {
        match self {
            ValueTypeTag::Bool => DataType::Boolean,
            ValueTypeTag::UInt8 => DataType::UInt8,
            ValueTypeTag::UInt32 => DataType::UInt32,
            ValueTypeTag::UInt64 => DataType::UInt64,
            ValueTypeTag::Int32 => DataType::Int32,
            ValueTypeTag::Int64 => DataType::Int64,
            ValueTypeTag::Float32 => DataType::Float32,
            ValueTypeTag::Float64 => DataType::Float64,
            ValueTypeTag::Utf8 => DataType::Utf8,
            ValueTypeTag::Binary => DataType::Binary,
            ValueTypeTag::Vec2F32 => DataType::FixedSizeList(vec_item_field(), 2),
            ValueTypeTag::Vec3F32 => DataType::FixedSizeList(vec_item_field(), 3),
            ValueTypeTag::Vec4F32 => DataType::FixedSizeList(vec_item_field(), 4),
        }
    }

    pub fn from_data_type(data_type: &DataType) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|tag| &tag.data_type() == data_type)
    }
}

impl fmt::Display for ValueTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueTypeTag::Bool => "bool",
            ValueTypeTag::UInt8 => "u8",
            ValueTypeTag::UInt32 => "u32",
            ValueTypeTag::UInt64 => "u64",
            ValueTypeTag::Int32 => "i32",
            ValueTypeTag::Int64 => "i64",
            ValueTypeTag::Float32 => "f32",
            ValueTypeTag::Float64 => "f64",
            ValueTypeTag::Utf8 => "utf8",
            ValueTypeTag::Binary => "binary",
            ValueTypeTag::Vec2F32 => "vec2f32",
            ValueTypeTag::Vec3F32 => "vec3f32",
            ValueTypeTag::Vec4F32 => "vec4f32",
        };
        f.write_str(name)
    }
}

fn vec_item_field() -> FieldRef {
    Arc::new(Field::new("item", DataType::Float32, false))
}

/// A Rust value that maps onto one [`ValueTypeTag`].
pub trait ComponentValue: Sized {
    const TYPE_TAG: ValueTypeTag;

    fn to_arrow(values: Vec<Self>) -> ArrayRef;
}

macro_rules! impl_primitive_component_value {
    ($ty:ty, $tag:expr, $array:ty) => {
        impl ComponentValue for $ty {
            const TYPE_TAG: ValueTypeTag = $tag;

            fn to_arrow(values: Vec<Self>) -> ArrayRef {
                Arc::new(<$array>::from(values))
            }
        }
    };
}

impl_primitive_component_value!(bool, ValueTypeTag::Bool, BooleanArray);
impl_primitive_component_value!(u8, ValueTypeTag::UInt8, UInt8Array);
impl_primitive_component_value!(u32, ValueTypeTag::UInt32, UInt32Array);
impl_primitive_component_value!(u64, ValueTypeTag::UInt64, UInt64Array);
impl_primitive_component_value!(i32, ValueTypeTag::Int32, Int32Array);
impl_primitive_component_value!(i64, ValueTypeTag::Int64, Int64Array);
impl_primitive_component_value!(f32, ValueTypeTag::Float32, Float32Array);
impl_primitive_component_value!(f64, ValueTypeTag::Float64, Float64Array);

impl ComponentValue for String {
    const TYPE_TAG: ValueTypeTag = ValueTypeTag::Utf8;

    fn to_arrow(values: Vec<Self>) -> ArrayRef {
        Arc::new(StringArray::from_iter_values(values))
    }
}

impl<'a> ComponentValue for &'a str {
    const TYPE_TAG: ValueTypeTag = ValueTypeTag::Utf8;

    fn to_arrow(values: Vec<Self>) -> ArrayRef {
        Arc::new(StringArray::from_iter_values(values))
    }
}

impl ComponentValue for Vec<u8> {
    const TYPE_TAG: ValueTypeTag = ValueTypeTag::Binary;

    fn to_arrow(values: Vec<Self>) -> ArrayRef {
        Arc::new(BinaryArray::from_iter_values(values))
    }
}

macro_rules! impl_vec_component_value {
    ($n:literal, $tag:expr) => {
        impl ComponentValue for [f32; $n] {
            const TYPE_TAG: ValueTypeTag = $tag;

            fn to_arrow(values: Vec<Self>) -> ArrayRef {
                let flat: Vec<f32> = values.into_iter().flatten().collect();
                Arc::new(FixedSizeListArray::new(
                    vec_item_field(),
                    $n,
                    Arc::new(Float32Array::from(flat)),
                    None,
                ))
            }
        }
    };
}

impl_vec_component_value!(2, ValueTypeTag::Vec2F32);
impl_vec_component_value!(3, ValueTypeTag::Vec3F32);
impl_vec_component_value!(4, ValueTypeTag::Vec4F32);

/// Identifies one field: `{archetype, component, value type}`.
///
/// The derived ordering is the order in which batches appear on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub archetype: Option<String>,
    pub component: String,
    pub component_type: ValueTypeTag,
}

impl ComponentDescriptor {
    pub fn new(component: impl Into<String>, component_type: ValueTypeTag) -> Self {
        Self {
            archetype: None,
            component: component.into(),
            component_type,
        }
    }

    pub fn with_archetype(mut self, archetype: impl Into<String>) -> Self {
        self.archetype = Some(archetype.into());
        self
    }
}

impl fmt::Display for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.archetype {
            Some(archetype) => write!(f, "{}:{}", archetype, self.component),
            None => f.write_str(&self.component),
        }
    }
}

/// One immutable column of component instances.
///
/// A zero-length batch is an explicit clear of that component.
#[derive(Debug, Clone)]
pub struct ComponentBatch {
    descriptor: ComponentDescriptor,
    array: ArrayRef,
}

impl ComponentBatch {
    /// Wrap an existing Arrow array, checking it against the declared type.
    pub fn try_new(descriptor: ComponentDescriptor, array: ArrayRef) -> Result<Self> {
        let expected = descriptor.component_type.data_type();
        if array.data_type() != &expected {
            return Err(VislogError::TypeMismatch {
                component: descriptor.to_string(),
                declared: descriptor.component_type,
                actual: array.data_type().to_string(),
            });
        }
        Ok(Self { descriptor, array })
    }

    /// Build from typed values under an explicit descriptor.
    pub fn from_values<T, I>(descriptor: ComponentDescriptor, values: I) -> Result<Self>
    where
        T: ComponentValue,
        I: IntoIterator<Item = T>,
    {
        if descriptor.component_type != T::TYPE_TAG {
            return Err(VislogError::TypeMismatch {
                component: descriptor.to_string(),
                declared: descriptor.component_type,
                actual: T::TYPE_TAG.to_string(),
            });
        }
        let array = T::to_arrow(values.into_iter().collect());
        Ok(Self { descriptor, array })
    }

    /// Build from typed values, taking the value type from `T`.
    pub fn new<T, I>(component: impl Into<String>, values: I) -> Self
    where
        T: ComponentValue,
        I: IntoIterator<Item = T>,
    {
        Self {
            descriptor: ComponentDescriptor::new(component, T::TYPE_TAG),
            array: T::to_arrow(values.into_iter().collect()),
        }
    }

    /// A zero-length batch that clears `descriptor`.
    pub fn cleared(descriptor: ComponentDescriptor) -> Self {
        let array = new_empty_array(&descriptor.component_type.data_type());
        Self { descriptor, array }
    }

    pub fn with_archetype(mut self, archetype: impl Into<String>) -> Self {
        self.descriptor.archetype = Some(archetype.into());
        self
    }

    pub fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    pub fn array(&self) -> &ArrayRef {
        &self.array
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    /// Render up to `max` instances for human consumption.
    pub fn display_values(&self, max: usize) -> String {
        let formatter = match ArrayFormatter::try_new(self.array.as_ref(), &FormatOptions::default())
        {
            Ok(f) => f,
            Err(e) => return format!("<{e}>"),
        };
        let shown: Vec<String> = (0..self.len().min(max))
            .map(|i| formatter.value(i).to_string())
            .collect();
        if self.len() > max {
            format!("[{}, … +{}]", shown.join(", "), self.len() - max)
        } else {
            format!("[{}]", shown.join(", "))
        }
    }
}

impl PartialEq for ComponentBatch {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor && self.array.to_data() == other.array.to_data()
    }
}

/// Anything that can be turned into a set of component batches.
pub trait AsComponents {
    fn as_component_batches(&self) -> Vec<ComponentBatch>;
}

impl AsComponents for ComponentBatch {
    fn as_component_batches(&self) -> Vec<ComponentBatch> {
        vec![self.clone()]
    }
}

impl AsComponents for [ComponentBatch] {
    fn as_component_batches(&self) -> Vec<ComponentBatch> {
        self.to_vec()
    }
}

impl<const N: usize> AsComponents for [ComponentBatch; N] {
    fn as_component_batches(&self) -> Vec<ComponentBatch> {
        self.to_vec()
    }
}

impl AsComponents for Vec<ComponentBatch> {
    fn as_component_batches(&self) -> Vec<ComponentBatch> {
        self.clone()
    }
}

/// A named bundle of component batches, as produced by [`ArchetypeBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub struct Archetype {
    name: String,
    batches: Vec<ComponentBatch>,
}

impl Archetype {
    pub fn builder(name: impl Into<String>) -> ArchetypeBuilder {
        ArchetypeBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn batches(&self) -> &[ComponentBatch] {
        &self.batches
    }

    /// The same fields, each replaced by a zero-length clear batch.
    pub fn cleared(&self) -> Archetype {
        Archetype {
            name: self.name.clone(),
            batches: self
                .batches
                .iter()
                .map(|b| ComponentBatch::cleared(b.descriptor().clone()))
                .collect(),
        }
    }
}

impl AsComponents for Archetype {
    fn as_component_batches(&self) -> Vec<ComponentBatch> {
        self.batches.clone()
    }
}

/// Accumulates the fields of one archetype.
///
/// Setting a component twice keeps the last value.
#[derive(Debug, Clone)]
pub struct ArchetypeBuilder {
    name: String,
    batches: Vec<ComponentBatch>,
}

impl ArchetypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batches: Vec::new(),
        }
    }

    pub fn with<T, I>(self, component: impl Into<String>, values: I) -> Self
    where
        T: ComponentValue,
        I: IntoIterator<Item = T>,
    {
        self.with_batch(ComponentBatch::new(component, values))
    }

    pub fn try_with_array(
        self,
        component: impl Into<String>,
        component_type: ValueTypeTag,
        array: ArrayRef,
    ) -> Result<Self> {
        let batch = ComponentBatch::try_new(ComponentDescriptor::new(component, component_type), array)?;
        Ok(self.with_batch(batch))
    }

    pub fn with_cleared(self, component: impl Into<String>, component_type: ValueTypeTag) -> Self {
        self.with_batch(ComponentBatch::cleared(ComponentDescriptor::new(
            component,
            component_type,
        )))
    }

    /// Add a prebuilt batch; its archetype is set to this builder's name.
    pub fn with_batch(mut self, batch: ComponentBatch) -> Self {
        let batch = batch.with_archetype(self.name.clone());
        self.batches
            .retain(|b| b.descriptor().component != batch.descriptor().component);
        self.batches.push(batch);
        self
    }

    pub fn build(self) -> Archetype {
        Archetype {
            name: self.name,
            batches: self.batches,
        }
    }
}
