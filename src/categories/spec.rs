//! Raw category specifications as written in a manifest.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A category reference inside a calculation.
///
/// Three shapes are accepted:
///
/// ```yaml
/// categories:
///   - pose                              # single name
///   - [left_hand, right_hand]           # anonymous list
///   - hands: [left_hand, right_hand]    # named mapping, one category per key
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategorySpec {
    /// A leaf name or the name of a category definition.
    Single(String),
    /// An anonymous group; displayed as the members joined with `+`.
    List(Vec<String>),
    /// Inline named groups, kept in document order.
    Named(Vec<(String, Vec<String>)>),
}

impl CategorySpec {
    /// Convenience constructor for an inline named group.
    pub fn named(name: impl Into<String>, members: &[&str]) -> Self {
        CategorySpec::Named(vec![(
            name.into(),
            members.iter().map(|m| m.to_string()).collect(),
        )])
    }
}

impl From<&str> for CategorySpec {
    fn from(name: &str) -> Self {
        CategorySpec::Single(name.to_string())
    }
}

impl Serialize for CategorySpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CategorySpec::Single(name) => serializer.serialize_str(name),
            CategorySpec::List(members) => members.serialize(serializer),
            CategorySpec::Named(groups) => {
                let mut map = serializer.serialize_map(Some(groups.len()))?;
                for (name, members) in groups {
                    map.serialize_entry(name, members)?;
                }
                map.end()
            }
        }
    }
}

/// A member list that may be written as a single string.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(name) => vec![name],
            OneOrMany::Many(names) => names,
        }
    }
}

struct CategorySpecVisitor;

impl<'de> Visitor<'de> for CategorySpecVisitor {
    type Value = CategorySpec;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a category name, a list of names, or a mapping of name to names")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Ok(CategorySpec::Single(value.to_string()))
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
        Ok(CategorySpec::Single(value))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut members = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(member) = seq.next_element::<String>()? {
            members.push(member);
        }
        Ok(CategorySpec::List(members))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut groups = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((name, members)) = map.next_entry::<String, OneOrMany>()? {
            groups.push((name, members.into()));
        }
        Ok(CategorySpec::Named(groups))
    }
}

impl<'de> Deserialize<'de> for CategorySpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(CategorySpecVisitor)
    }
}

/// Named category definitions, possibly referencing each other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CategoryDefinitions {
    definitions: BTreeMap<String, Vec<String>>,
}

impl CategoryDefinitions {
    /// Creates an empty definition set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a definition.
    pub fn define<I, S>(mut self, name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(name, members);
        self
    }

    /// Inserts (or replaces) a definition in place.
    pub fn insert<I, S>(&mut self, name: impl Into<String>, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.definitions
            .insert(name.into(), members.into_iter().map(Into::into).collect());
    }

    /// Returns the members of a definition, if it exists.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.definitions.get(name).map(Vec::as_slice)
    }

    /// Returns true if `name` is a defined category.
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Iterates over definition names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl<'de> Deserialize<'de> for CategoryDefinitions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, OneOrMany>::deserialize(deserializer)?;
        Ok(Self {
            definitions: raw.into_iter().map(|(k, v)| (k, v.into())).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_all_spec_shapes() {
        let yaml = r#"
- pose
- [left_hand, right_hand]
- hands: [left_hand, right_hand]
  face: face
"#;
        let specs: Vec<CategorySpec> = serde_yaml::from_str(yaml).expect("parse specs");
        assert_eq!(specs[0], CategorySpec::Single("pose".to_string()));
        assert_eq!(
            specs[1],
            CategorySpec::List(vec!["left_hand".to_string(), "right_hand".to_string()])
        );
        assert_eq!(
            specs[2],
            CategorySpec::Named(vec![
                (
                    "hands".to_string(),
                    vec!["left_hand".to_string(), "right_hand".to_string()]
                ),
                ("face".to_string(), vec!["face".to_string()]),
            ])
        );
    }

    #[test]
    fn test_named_spec_keeps_document_order() {
        let specs: CategorySpec =
            serde_json::from_str(r#"{"zeta": ["a"], "alpha": ["b"]}"#).expect("parse");
        match specs {
            CategorySpec::Named(groups) => {
                let names: Vec<&str> = groups.iter().map(|(n, _)| n.as_str()).collect();
                assert_eq!(names, vec!["zeta", "alpha"]);
            }
            other => panic!("expected named spec, got {:?}", other),
        }
    }

    #[test]
    fn test_spec_serialization_matches_input_shape() {
        let spec = CategorySpec::named("hands", &["left_hand", "right_hand"]);
        let json = serde_json::to_string(&spec).expect("serialize");
        assert_eq!(json, r#"{"hands":["left_hand","right_hand"]}"#);

        let single = serde_json::to_string(&CategorySpec::from("pose")).expect("serialize");
        assert_eq!(single, r#""pose""#);
    }

    #[test]
    fn test_definitions_accept_single_member() {
        let defs: CategoryDefinitions =
            serde_yaml::from_str("body: pose\nhands: [left_hand, right_hand]\n").expect("parse");
        assert_eq!(defs.get("body"), Some(&["pose".to_string()][..]));
        assert_eq!(defs.get("hands").map(|m| m.len()), Some(2));
        assert_eq!(defs.len(), 2);
    }
}
