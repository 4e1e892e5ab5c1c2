//! Type descriptors and value sanitization at the client trust boundary.
//!
//! Every argument a client supplies to a game function passes through
//! [`sanitize`] against the function's declared [`TypeDescriptor`] before any
//! game logic sees it. Coercion is lenient where a value is salvageable
//! (numbers from strings, booleans from numbers) and strict where it is not.

use serde_json::{Map, Number, Value};

use crate::errors::InvalidArgument;

/// The declared type of an attribute, argument or return value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    Boolean,
    Int,
    Float,
    String,
    /// One of a fixed set of allowed values.
    Literal(Vec<Value>),
    List(Box<TypeDescriptor>),
    Map {
        key: Box<TypeDescriptor>,
        value: Box<TypeDescriptor>,
    },
    /// A reference to a live game object of (a subclass of) `class`.
    GameObject { class: String, nullable: bool },
}

impl TypeDescriptor {
    pub fn list_of(inner: TypeDescriptor) -> Self {
        TypeDescriptor::List(Box::new(inner))
    }

    pub fn map_of(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        TypeDescriptor::Map {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    pub fn object(class: &str) -> Self {
        TypeDescriptor::GameObject {
            class: class.to_string(),
            nullable: false,
        }
    }

    pub fn nullable_object(class: &str) -> Self {
        TypeDescriptor::GameObject {
            class: class.to_string(),
            nullable: true,
        }
    }

    /// The zero value used when neither the client nor a schema default
    /// supplies one.
    pub fn zero_value(&self) -> Value {
        match self {
            TypeDescriptor::Boolean => Value::Bool(false),
            TypeDescriptor::Int => Value::from(0),
            TypeDescriptor::Float => Value::from(0.0),
            TypeDescriptor::String => Value::String(String::new()),
            TypeDescriptor::Literal(values) => {
                values.first().cloned().unwrap_or(Value::Null)
            }
            TypeDescriptor::List(_) => Value::Array(Vec::new()),
            TypeDescriptor::Map { .. } => Value::Object(Map::new()),
            TypeDescriptor::GameObject { .. } => Value::Null,
        }
    }
}

/// Resolves game-object references during sanitization. Implemented by the
/// game state so descriptors stay plain data.
pub trait ObjectLookup {
    /// The concrete class name of a live object, or `None` if the id is
    /// unknown.
    fn type_of(&self, id: &str) -> Option<String>;
    /// Whether `class` is `ancestor` or inherits from it.
    fn is_subclass(&self, class: &str, ancestor: &str) -> bool;
}

/// Validates and coerces one client-supplied value against a descriptor.
///
/// Returns the normalized value on success. Game-object references come back
/// as `{"id": ...}` regardless of how the client spelled them.
pub fn sanitize(
    descriptor: &TypeDescriptor,
    value: &Value,
    objects: &dyn ObjectLookup,
) -> Result<Value, InvalidArgument> {
    match descriptor {
        TypeDescriptor::Boolean => sanitize_boolean(value),
        TypeDescriptor::Int => sanitize_int(value),
        TypeDescriptor::Float => sanitize_float(value),
        TypeDescriptor::String => sanitize_string(value),
        TypeDescriptor::Literal(allowed) => {
            if allowed.contains(value) {
                Ok(value.clone())
            } else {
                Err(InvalidArgument::new(
                    "",
                    format!("{value} is not one of the allowed values"),
                ))
            }
        }
        TypeDescriptor::List(inner) => {
            let Value::Array(items) = value else {
                return Err(InvalidArgument::new("", "expected a list"));
            };
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(sanitize(inner, item, objects).map_err(|e| e.nested(&i.to_string()))?);
            }
            Ok(Value::Array(out))
        }
        TypeDescriptor::Map { key, value: val } => {
            let Value::Object(entries) = value else {
                return Err(InvalidArgument::new("", "expected a mapping"));
            };
            let mut out = Map::new();
            for (k, v) in entries {
                let clean_key = sanitize(key, &Value::String(k.clone()), objects)
                    .map_err(|e| e.nested(k))?;
                let clean_key = match clean_key {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                out.insert(clean_key, sanitize(val, v, objects).map_err(|e| e.nested(k))?);
            }
            Ok(Value::Object(out))
        }
        TypeDescriptor::GameObject { class, nullable } => {
            sanitize_object(class, *nullable, value, objects)
        }
    }
}

fn sanitize_boolean(value: &Value) -> Result<Value, InvalidArgument> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::Number(n) => Ok(Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0)),
        Value::String(s) => match s.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(InvalidArgument::new("", "expected a boolean")),
        },
        _ => Err(InvalidArgument::new("", "expected a boolean")),
    }
}

fn sanitize_int(value: &Value) -> Result<Value, InvalidArgument> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::from(f.trunc() as i64))
            } else {
                Err(InvalidArgument::new("", "expected an int"))
            }
        }
        Value::Bool(b) => Ok(Value::from(i64::from(*b))),
        Value::String(s) => s
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| Value::from(f.trunc() as i64))
            .ok_or_else(|| InvalidArgument::new("", "expected an int")),
        _ => Err(InvalidArgument::new("", "expected an int")),
    }
}

fn sanitize_float(value: &Value) -> Result<Value, InvalidArgument> {
    let float = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    };
    float
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| InvalidArgument::new("", "expected a float"))
}

fn sanitize_string(value: &Value) -> Result<Value, InvalidArgument> {
    match value {
        Value::String(s) => Ok(Value::String(s.clone())),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        _ => Err(InvalidArgument::new("", "expected a string")),
    }
}

fn sanitize_object(
    class: &str,
    nullable: bool,
    value: &Value,
    objects: &dyn ObjectLookup,
) -> Result<Value, InvalidArgument> {
    let id = match value {
        Value::Null => {
            return if nullable {
                Ok(Value::Null)
            } else {
                Err(InvalidArgument::new("", format!("expected a {class}")))
            };
        }
        Value::String(id) => id.clone(),
        Value::Object(map) => match map.get("id") {
            Some(Value::String(id)) => id.clone(),
            _ => {
                return Err(InvalidArgument::new(
                    "",
                    format!("expected a reference to a {class}"),
                ))
            }
        },
        _ => {
            return Err(InvalidArgument::new(
                "",
                format!("expected a reference to a {class}"),
            ))
        }
    };
    let Some(actual) = objects.type_of(&id) else {
        return Err(InvalidArgument::new(
            "",
            format!("no game object with id {id}"),
        ));
    };
    if !objects.is_subclass(&actual, class) {
        return Err(InvalidArgument::new(
            "",
            format!("game object {id} is a {actual}, not a {class}"),
        ));
    }
    Ok(serde_json::json!({ "id": id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct FakeObjects {
        types: HashMap<String, String>,
    }

    impl FakeObjects {
        fn new(pairs: &[(&str, &str)]) -> Self {
            Self {
                types: pairs
                    .iter()
                    .map(|(id, ty)| (id.to_string(), ty.to_string()))
                    .collect(),
            }
        }
    }

    impl ObjectLookup for FakeObjects {
        fn type_of(&self, id: &str) -> Option<String> {
            self.types.get(id).cloned()
        }

        fn is_subclass(&self, class: &str, ancestor: &str) -> bool {
            class == ancestor || ancestor == "GameObject"
        }
    }

    fn no_objects() -> FakeObjects {
        FakeObjects::new(&[])
    }

    #[test]
    fn ints_coerce_from_floats_and_strings() {
        let objects = no_objects();
        assert_eq!(
            sanitize(&TypeDescriptor::Int, &json!(3.9), &objects).unwrap(),
            json!(3)
        );
        assert_eq!(
            sanitize(&TypeDescriptor::Int, &json!("12"), &objects).unwrap(),
            json!(12)
        );
        assert!(sanitize(&TypeDescriptor::Int, &json!("pants"), &objects).is_err());
        assert!(sanitize(&TypeDescriptor::Int, &json!(null), &objects).is_err());
    }

    #[test]
    fn booleans_coerce_from_numbers() {
        let objects = no_objects();
        assert_eq!(
            sanitize(&TypeDescriptor::Boolean, &json!(2), &objects).unwrap(),
            json!(true)
        );
        assert_eq!(
            sanitize(&TypeDescriptor::Boolean, &json!(0), &objects).unwrap(),
            json!(false)
        );
        assert!(sanitize(&TypeDescriptor::Boolean, &json!([1]), &objects).is_err());
    }

    #[test]
    fn lists_report_the_failing_index() {
        let objects = no_objects();
        let descriptor = TypeDescriptor::list_of(TypeDescriptor::Int);
        let err = sanitize(&descriptor, &json!([1, "two", 3]), &objects).unwrap_err();
        assert_eq!(err.path, "1");
    }

    #[test]
    fn object_refs_resolve_and_check_class() {
        let objects = FakeObjects::new(&[("4", "Player"), ("7", "Tile")]);
        let descriptor = TypeDescriptor::object("Player");

        let clean = sanitize(&descriptor, &json!({"id": "4"}), &objects).unwrap();
        assert_eq!(clean, json!({"id": "4"}));

        // Bare id strings are accepted and normalized.
        let clean = sanitize(&descriptor, &json!("4"), &objects).unwrap();
        assert_eq!(clean, json!({"id": "4"}));

        assert!(sanitize(&descriptor, &json!({"id": "7"}), &objects).is_err());
        assert!(sanitize(&descriptor, &json!({"id": "99"}), &objects).is_err());
    }

    #[test]
    fn nullability_is_respected() {
        let objects = no_objects();
        let nullable = TypeDescriptor::nullable_object("Player");
        let required = TypeDescriptor::object("Player");
        assert_eq!(sanitize(&nullable, &json!(null), &objects).unwrap(), json!(null));
        assert!(sanitize(&required, &json!(null), &objects).is_err());
    }

    #[test]
    fn literals_require_membership() {
        let objects = no_objects();
        let descriptor = TypeDescriptor::Literal(vec![json!("rock"), json!("paper")]);
        assert_eq!(
            sanitize(&descriptor, &json!("rock"), &objects).unwrap(),
            json!("rock")
        );
        assert!(sanitize(&descriptor, &json!("scissors"), &objects).is_err());
    }

    #[test]
    fn maps_sanitize_keys_and_values() {
        let objects = no_objects();
        let descriptor = TypeDescriptor::map_of(TypeDescriptor::String, TypeDescriptor::Int);
        let clean = sanitize(&descriptor, &json!({"a": "1", "b": 2.7}), &objects).unwrap();
        assert_eq!(clean, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn floats_reject_non_numeric_text() {
        let objects = no_objects();
        assert_eq!(
            sanitize(&TypeDescriptor::Float, &json!("2.5"), &objects).unwrap(),
            json!(2.5)
        );
        assert!(sanitize(&TypeDescriptor::Float, &json!("fast"), &objects).is_err());
    }
}
