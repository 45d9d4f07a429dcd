//! serde helpers implementing the JSON mapping of the wire messages.

use serde::Deserialize;
use serde::de::{self, Deserializer};
use serde::Serializer;

/// Fields at their zero value are left out of the output.
pub fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntOrString {
    Int(i64),
    Str(String),
}

/// `int32` field: accepts `10`, `"10"` and `null`.
pub fn lenient_i32<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match Option::<IntOrString>::deserialize(deserializer)? {
        None => return Ok(0),
        Some(IntOrString::Int(v)) => v,
        Some(IntOrString::Str(s)) => s.trim().parse::<i64>().map_err(de::Error::custom)?,
    };
    i32::try_from(value).map_err(|_| de::Error::custom(format!("{value} is out of range for int32")))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<String>),
    One(String),
}

/// `repeated string` field: accepts a list, a single string or `null`.
/// Query strings carry a single value for a repeated field when it occurs once.
pub fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::Many(values)) => values,
        Some(OneOrMany::One(value)) => vec![value],
    })
}

/// A prost enumeration with protobuf value names.
pub trait ProtoEnum: Sized + Copy + TryFrom<i32> + Into<i32> {
    fn as_str_name(&self) -> &'static str;
    fn from_str_name(name: &str) -> Option<Self>;
}

/// Implements [`ProtoEnum`] for a generated enumeration.
macro_rules! proto_enum {
    ($ty:ty) => {
        impl $crate::proto::json::ProtoEnum for $ty {
            fn as_str_name(&self) -> &'static str {
                <$ty>::as_str_name(self)
            }

            fn from_str_name(name: &str) -> Option<Self> {
                <$ty>::from_str_name(name)
            }
        }
    };
}
pub(crate) use proto_enum;

/// Enum fields are written as their value name; unknown numbers as numbers.
pub fn serialize_enum<E, S>(value: &i32, serializer: S) -> Result<S::Ok, S::Error>
where
    E: ProtoEnum,
    S: Serializer,
{
    match E::try_from(*value) {
        Ok(known) => serializer.serialize_str(known.as_str_name()),
        Err(_) => serializer.serialize_i32(*value),
    }
}

pub fn deserialize_enum<'de, E, D>(deserializer: D) -> Result<i32, D::Error>
where
    E: ProtoEnum,
    D: Deserializer<'de>,
{
    match Option::<IntOrString>::deserialize(deserializer)? {
        None => Ok(0),
        Some(IntOrString::Int(v)) => {
            i32::try_from(v).map_err(|_| de::Error::custom(format!("enum value {v} is out of range")))
        }
        Some(IntOrString::Str(name)) => E::from_str_name(&name)
            .map(Into::into)
            .ok_or_else(|| de::Error::custom(format!("unknown enum value '{name}'"))),
    }
}
