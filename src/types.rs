//! Core types shared by the store interface, the wire protocol, and sessions.

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Length in bytes of an object identifier.
pub const OBJECT_ID_LEN: usize = 24;

/// Fixed-width object identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub [u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// Build an id from a slice, `None` unless it is exactly 24 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; OBJECT_ID_LEN] = bytes.try_into().ok()?;
        Some(ObjectId(arr))
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl<'de> Visitor<'de> for IdVisitor {
            type Value = ObjectId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a {}-byte binary object id", OBJECT_ID_LEN)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<ObjectId, E> {
                ObjectId::from_slice(v).ok_or_else(|| E::invalid_length(v.len(), &self))
            }
        }

        deserializer.deserialize_bytes(IdVisitor)
    }
}

/// Client-chosen query identifier, unique among live subscriptions of one connection.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(pub u64);

impl fmt::Debug for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryId({})", self.0)
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-chosen request identifier used to correlate acks and errors.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

/// Identifier assigned to each accepted connection.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position range of an object. Both ends are inclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PosRange {
    pub start: i64,
    pub end: i64,
}

impl PosRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }
}

/// Dynamically typed value carried in attributes and data slots.
///
/// Mirrors the MessagePack data model. Unsigned integers that fit in an
/// `i64` always decode as [`Value::Int`], so equality is independent of
/// which integer width the peer chose.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::UInt(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bin(_) => "bin",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bin(v)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::UInt(u) => serializer.serialize_u64(*u),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Bin(b) => serializer.serialize_bytes(b),
            Value::Array(items) => items.serialize(serializer),
            Value::Map(map) => map.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a MessagePack value")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
                Ok(Value::Nil)
            }

            fn visit_none<E: de::Error>(self) -> Result<Value, E> {
                Ok(Value::Nil)
            }

            fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Value, D2::Error> {
                Value::deserialize(d)
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
                Ok(Value::Bool(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
                Ok(Value::Int(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
                Ok(i64::try_from(v).map(Value::Int).unwrap_or(Value::UInt(v)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
                Ok(Value::Float(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
                Ok(Value::Str(v.to_owned()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
                Ok(Value::Str(v))
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
                Ok(Value::Bin(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Value, E> {
                Ok(Value::Bin(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(1024));
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(Value::Array(items))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
                let mut map = BTreeMap::new();
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Serde adapter for optional binary payloads (`bin` or `nil` on the wire).
pub(crate) mod opt_bin {
    use super::Value;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_bytes(bytes),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Nil => Ok(None),
            Value::Bin(bytes) => Ok(Some(bytes)),
            other => Err(D::Error::custom(format!(
                "expected binary payload, got {}",
                other.kind_name()
            ))),
        }
    }
}

/// Full state of one object as held by the store.
///
/// Used both as the input to `create` and as the snapshot the store hands
/// out on `get` and change notifications.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectSnapshot {
    pub id: ObjectId,
    pub parent: Option<ObjectId>,
    pub pos: PosRange,
    pub tags: BTreeSet<String>,
    pub attr: BTreeMap<String, Value>,
    pub data: BTreeMap<String, Value>,
    pub bindata: Option<Vec<u8>>,
}

impl ObjectSnapshot {
    /// A root object with no tags, attributes, data, or payload.
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            parent: None,
            pos: PosRange::default(),
            tags: BTreeSet::new(),
            attr: BTreeMap::new(),
            data: BTreeMap::new(),
            bindata: None,
        }
    }

    pub fn with_parent(mut self, parent: ObjectId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_pos(mut self, start: i64, end: i64) -> Self {
        self.pos = PosRange::new(start, end);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attr.insert(key.into(), value.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_bindata(mut self, bytes: Vec<u8>) -> Self {
        self.bindata = Some(bytes);
        self
    }

    /// Sorted data keys, as reported in object replies.
    pub fn data_keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }
}

/// One change applied to an existing object.
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectUpdate {
    SetAttr(String, Value),
    RemoveAttr(String),
    SetData(String, Value),
    RemoveData(String),
    AddTag(String),
    RemoveTag(String),
    SetPos(PosRange),
    SetBinData(Option<Vec<u8>>),
}

/// A standing filtered listing of one parent's children.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListQuery {
    /// Parent whose children are listed (`None` lists root objects).
    pub parent: Option<ObjectId>,
    /// Lower bound on the object's end position.
    pub pos_start: Option<i64>,
    /// Upper bound on the object's start position.
    pub pos_end: Option<i64>,
    /// Disjunction of tag sets; an empty filter matches every object.
    pub tags: Vec<BTreeSet<String>>,
}

impl ListQuery {
    pub fn children_of(parent: Option<ObjectId>) -> Self {
        Self {
            parent,
            ..Default::default()
        }
    }

    /// Check whether an object belongs to this query's visible set.
    pub fn matches(&self, object: &ObjectSnapshot) -> bool {
        if object.parent != self.parent {
            return false;
        }
        if let Some(start) = self.pos_start {
            if object.pos.end < start {
                return false;
            }
        }
        if let Some(end) = self.pos_end {
            if object.pos.start > end {
                return false;
            }
        }
        self.tags.is_empty()
            || self
                .tags
                .iter()
                .any(|set| set.iter().all(|tag| object.tags.contains(tag)))
    }
}

/// Incremental change to a list query's visible set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListDiff {
    /// Objects that became visible or changed while visible, in delivery order.
    pub new: Vec<ObjectSnapshot>,
    /// Objects that are no longer visible.
    pub gone: Vec<ObjectId>,
}

impl ListDiff {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.gone.is_empty()
    }
}
