use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// A value that survives normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<&Scalar> for Value {
    fn from(scalar: &Scalar) -> Self {
        match scalar {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::from(*i),
            Scalar::Text(s) => Value::String(s.clone()),
        }
    }
}

impl From<Option<String>> for Scalar {
    fn from(value: Option<String>) -> Self {
        value.map_or(Scalar::Null, Scalar::Text)
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// Shape of a single entity field as seen by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Scalar(Scalar),
    Nested,
    Collection,
}

/// Entities that can be reduced to a flat, comparable projection.
///
/// Implementors list every field they carry. Nested objects and collections
/// are reported by shape only, the normalizer never looks inside them.
pub trait Normalize {
    fn fields(&self) -> Vec<(&'static str, Field)>;
}

pub type Projection = BTreeMap<&'static str, Scalar>;

/// Reduces an entity to its scalar fields, minus anything named in `exclude`.
pub fn normalize<T: Normalize + ?Sized>(entity: &T, exclude: &[&str]) -> Projection {
    entity
        .fields()
        .into_iter()
        .filter(|(name, _)| !exclude.contains(name))
        .filter_map(|(name, field)| match field {
            Field::Scalar(value) => Some((name, value)),
            Field::Nested | Field::Collection => None,
        })
        .collect()
}

pub fn projection_to_json(projection: &Projection) -> Value {
    Value::Object(
        projection
            .iter()
            .map(|(name, value)| (name.to_string(), Value::from(value)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sample {
        name: Option<String>,
        flag: bool,
    }

    impl Normalize for Sample {
        fn fields(&self) -> Vec<(&'static str, Field)> {
            vec![
                ("id", Field::Scalar(Scalar::Int(7))),
                ("name", Field::Scalar(self.name.clone().into())),
                ("flag", Field::Scalar(self.flag.into())),
                ("owner", Field::Nested),
                ("tags", Field::Collection),
            ]
        }
    }

    #[test]
    fn test_strips_nested_and_collections() {
        let sample = Sample {
            name: Some("alpha".into()),
            flag: true,
        };
        let projection = normalize(&sample, &[]);

        assert_eq!(projection.len(), 3);
        assert_eq!(projection["id"], Scalar::Int(7));
        assert_eq!(projection["name"], Scalar::Text("alpha".into()));
        assert!(!projection.contains_key("owner"));
        assert!(!projection.contains_key("tags"));
    }

    #[test]
    fn test_excluded_and_unknown_names() {
        let sample = Sample {
            name: None,
            flag: false,
        };
        let projection = normalize(&sample, &["flag", "does_not_exist"]);

        assert_eq!(projection.keys().copied().collect::<Vec<_>>(), ["id", "name"]);
        assert_eq!(projection["name"], Scalar::Null);
    }

    #[test]
    fn test_json_shape() {
        let sample = Sample {
            name: None,
            flag: true,
        };
        let json = projection_to_json(&normalize(&sample, &[]));

        assert_eq!(
            json,
            serde_json::json!({ "id": 7, "name": null, "flag": true })
        );
    }
}
