//! Execution state value tree
//!
//! [`StateValue`] is the payload captured by a checkpoint. It is an owned tree
//! of maps, sequences and scalars with no references back into the caller's
//! objects, so a snapshot can never observe later mutations of live state.

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::{self, Formatter};

/// A serialization-neutral execution state value
///
/// Maps are ordered by key, which makes the canonical encoding independent of
/// insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum StateValue {
    /// Absent value
    #[default]
    Null,
    /// Boolean scalar
    Bool(bool),
    /// Signed integer scalar
    Int(i64),
    /// Floating point scalar (must be finite to be encoded)
    Float(f64),
    /// UTF-8 string scalar
    String(String),
    /// Ordered sequence
    Seq(Vec<StateValue>),
    /// Key-ordered mapping
    Map(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Deepest container nesting that still decodes
    ///
    /// The decoder stops at 128 levels; anything deeper could be stored but
    /// never restored.
    pub const MAX_DEPTH: usize = 100;

    /// Empty mapping
    #[inline]
    #[must_use]
    pub fn map() -> Self {
        Self::Map(BTreeMap::new())
    }

    /// Empty sequence
    #[inline]
    #[must_use]
    pub fn seq() -> Self {
        Self::Seq(Vec::new())
    }

    /// Builder-style insert for mappings
    ///
    /// Non-map values are replaced by a fresh map holding only the new entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert into a mapping, returning the previous value for the key
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<StateValue>,
    ) -> Option<StateValue> {
        if !matches!(self, Self::Map(_)) {
            *self = Self::map();
        }
        match self {
            Self::Map(entries) => entries.insert(key.into(), value.into()),
            _ => None,
        }
    }

    /// Append to a sequence
    ///
    /// Non-sequence values are replaced by a fresh sequence.
    pub fn push(&mut self, value: impl Into<StateValue>) {
        if !matches!(self, Self::Seq(_)) {
            *self = Self::seq();
        }
        if let Self::Seq(items) = self {
            items.push(value.into());
        }
    }

    /// Lookup a key in a mapping
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        match self {
            Self::Map(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Mutable lookup of a key in a mapping
    pub fn get_mut(&mut self, key: &str) -> Option<&mut StateValue> {
        match self {
            Self::Map(entries) => entries.get_mut(key),
            _ => None,
        }
    }

    /// Walk a dotted path through nested maps (`"plan.units"`)
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&StateValue> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |value, segment| value.get(segment))
    }

    /// Explicit recursive clone
    ///
    /// Every node of the returned tree is freshly allocated; nothing is shared
    /// with `self`. This is the copy-on-write primitive used when a checkpoint
    /// is taken and when a restored state is handed back to a caller.
    #[must_use]
    pub fn deep_clone(&self) -> Self {
        match self {
            Self::Null => Self::Null,
            Self::Bool(b) => Self::Bool(*b),
            Self::Int(i) => Self::Int(*i),
            Self::Float(f) => Self::Float(*f),
            Self::String(s) => Self::String(s.as_str().to_owned()),
            Self::Seq(items) => Self::Seq(items.iter().map(Self::deep_clone).collect()),
            Self::Map(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.as_str().to_owned(), v.deep_clone()))
                    .collect(),
            ),
        }
    }

    /// Short type name for diagnostics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Seq(_) => "seq",
            Self::Map(_) => "map",
        }
    }

    /// Check that the tree has a canonical encoding that decodes again
    ///
    /// # Errors
    /// Returns [`StateError::NonFiniteFloat`] or [`StateError::TooDeep`]
    /// naming the first offending path.
    pub fn validate(&self) -> Result<(), StateError> {
        fn walk(value: &StateValue, path: &mut String, depth: usize) -> Result<(), StateError> {
            match value {
                StateValue::Float(f) if !f.is_finite() => Err(StateError::NonFiniteFloat {
                    path: path.clone(),
                }),
                StateValue::Seq(_) | StateValue::Map(_) if depth >= StateValue::MAX_DEPTH => {
                    Err(StateError::TooDeep {
                        path: path.clone(),
                        limit: StateValue::MAX_DEPTH,
                    })
                }
                StateValue::Seq(items) => {
                    for (i, item) in items.iter().enumerate() {
                        let len = path.len();
                        path.push_str(&format!("[{i}]"));
                        walk(item, path, depth + 1)?;
                        path.truncate(len);
                    }
                    Ok(())
                }
                StateValue::Map(entries) => {
                    for (key, item) in entries {
                        let len = path.len();
                        path.push('.');
                        path.push_str(key);
                        walk(item, path, depth + 1)?;
                        path.truncate(len);
                    }
                    Ok(())
                }
                _ => Ok(()),
            }
        }

        walk(self, &mut String::from("$"), 0)
    }

    /// Canonical byte encoding (compact JSON, keys sorted)
    ///
    /// Two trees that compare equal always encode to identical bytes.
    ///
    /// # Errors
    /// Fails if the tree contains a non-finite float or nests deeper than
    /// [`StateValue::MAX_DEPTH`].
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, StateError> {
        self.validate()?;
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a tree from its canonical encoding
    ///
    /// # Errors
    /// Fails if `bytes` are not a valid encoding.
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Number of nodes in the tree (including `self`)
    #[must_use]
    pub fn node_count(&self) -> usize {
        match self {
            Self::Seq(items) => 1 + items.iter().map(Self::node_count).sum::<usize>(),
            Self::Map(entries) => 1 + entries.values().map(Self::node_count).sum::<usize>(),
            _ => 1,
        }
    }
}

impl Serialize for StateValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::Seq(items) => items.serialize(serializer),
            Self::Map(entries) => entries.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for StateValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StateValueVisitor;

        impl<'de> Visitor<'de> for StateValueVisitor {
            type Value = StateValue;

            fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map, sequence or scalar state value")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(StateValue::Null)
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(StateValue::Null)
            }

            fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
            where
                D: Deserializer<'de>,
            {
                StateValue::deserialize(deserializer)
            }

            fn visit_bool<E: de::Error>(self, value: bool) -> Result<Self::Value, E> {
                Ok(StateValue::Bool(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
                Ok(StateValue::Int(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
                Ok(i64::try_from(value).map_or(StateValue::Float(value as f64), StateValue::Int))
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
                Ok(StateValue::Float(value))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                Ok(StateValue::String(value.to_owned()))
            }

            fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
                Ok(StateValue::String(value))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(StateValue::Seq(items))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = BTreeMap::new();
                while let Some((key, value)) = map.next_entry::<String, StateValue>()? {
                    entries.insert(key, value);
                }
                Ok(StateValue::Map(entries))
            }
        }

        deserializer.deserialize_any(StateValueVisitor)
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for StateValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<StateValue>> From<Vec<T>> for StateValue {
    fn from(value: Vec<T>) -> Self {
        Self::Seq(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<StateValue>> From<Option<T>> for StateValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<BTreeMap<String, StateValue>> for StateValue {
    fn from(value: BTreeMap<String, StateValue>) -> Self {
        Self::Map(value)
    }
}

impl From<serde_json::Value> for StateValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Seq(items.into_iter().map(Self::from).collect()),
            Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&StateValue> for serde_json::Value {
    fn from(value: &StateValue) -> Self {
        use serde_json::Value;
        match value {
            StateValue::Null => Value::Null,
            StateValue::Bool(b) => Value::Bool(*b),
            StateValue::Int(i) => Value::from(*i),
            StateValue::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            StateValue::String(s) => Value::String(s.clone()),
            StateValue::Seq(items) => Value::Array(items.iter().map(Value::from).collect()),
            StateValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Errors produced while encoding or decoding state values
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// NaN or infinity somewhere in the tree
    #[error("non-finite float at {path}")]
    NonFiniteFloat { path: String },

    /// Containers nested past [`StateValue::MAX_DEPTH`]
    #[error("state nested deeper than {limit} levels at {path}")]
    TooDeep { path: String, limit: usize },

    /// Encoding or decoding failed
    #[error("state encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> StateValue {
        StateValue::map()
            .with("phase_id", "compile")
            .with("status", "running")
            .with("attempt", 2)
            .with("ratio", 0.75)
            .with(
                "data",
                StateValue::map().with("key1", "value1").with("key2", vec![1, 2, 3]),
            )
    }

    #[test]
    fn insert_replaces_scalar_with_map() {
        let mut value = StateValue::Int(1);
        value.insert("a", true);
        assert_eq!(value.get("a"), Some(&StateValue::Bool(true)));
    }

    #[test]
    fn get_path_walks_nested_maps() {
        let value = sample();
        assert_eq!(
            value.get_path("data.key1"),
            Some(&StateValue::String("value1".into()))
        );
        assert!(value.get_path("data.missing").is_none());
        assert_eq!(value.get_path(""), Some(&value));
    }

    #[test]
    fn deep_clone_is_independent() {
        let original = sample();
        let mut copy = original.deep_clone();
        assert_eq!(original, copy);

        copy.get_mut("data").unwrap().insert("key1", "changed");
        assert_ne!(original, copy);
        assert_eq!(
            original.get_path("data.key1"),
            Some(&StateValue::String("value1".into()))
        );
    }

    #[test]
    fn canonical_bytes_sort_keys() {
        let a = StateValue::map().with("b", 1).with("a", 2);
        let b = StateValue::map().with("a", 2).with("b", 1);
        let bytes = a.canonical_bytes().unwrap();
        assert_eq!(bytes, b.canonical_bytes().unwrap());
        assert_eq!(bytes, br#"{"a":2,"b":1}"#.to_vec());
    }

    #[test]
    fn canonical_round_trip_preserves_scalar_kinds() {
        let value = StateValue::map()
            .with("float", 1.0)
            .with("int", 1)
            .with("null", StateValue::Null)
            .with("neg", -42);
        let decoded = StateValue::from_canonical_bytes(&value.canonical_bytes().unwrap()).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(decoded.get("float").unwrap().kind(), "float");
        assert_eq!(decoded.get("int").unwrap().kind(), "int");
    }

    #[test]
    fn non_finite_float_is_rejected_with_path() {
        let value = StateValue::map().with("metrics", vec![StateValue::Float(1.0), StateValue::Float(f64::NAN)]);
        let err = value.canonical_bytes().unwrap_err();
        match err {
            StateError::NonFiniteFloat { path } => assert_eq!(path, "$.metrics[1]"),
            other => panic!("unexpected error: {other}"),
        }
    }

    fn nested(depth: usize) -> StateValue {
        (0..depth).fold(StateValue::Int(1), |inner, _| StateValue::map().with("n", inner))
    }

    #[test]
    fn nesting_limit_is_inclusive() {
        let deepest = nested(StateValue::MAX_DEPTH);
        let bytes = deepest.canonical_bytes().unwrap();
        assert_eq!(StateValue::from_canonical_bytes(&bytes).unwrap(), deepest);

        match nested(StateValue::MAX_DEPTH + 1).validate().unwrap_err() {
            StateError::TooDeep { path, limit } => {
                assert_eq!(limit, StateValue::MAX_DEPTH);
                assert_eq!(path, format!("${}", ".n".repeat(StateValue::MAX_DEPTH)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn json_value_conversion_round_trips() {
        let json = serde_json::json!({"a": [1, 2.5, "x", null, true], "b": {"c": -1}});
        let value = StateValue::from(json.clone());
        assert_eq!(serde_json::Value::from(&value), json);
    }

    #[test]
    fn node_count_counts_every_node() {
        let value = StateValue::map().with("a", vec![1, 2]).with("b", StateValue::Null);
        assert_eq!(value.node_count(), 5);
    }

    #[test]
    fn malformed_bytes_fail_to_decode() {
        assert!(StateValue::from_canonical_bytes(b"{\"a\":").is_err());
    }
}
