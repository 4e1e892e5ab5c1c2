//! Game schemas: the typed shape of a game's objects, attributes and
//! functions.
//!
//! Authors declare raw schemas with parent class names; [`GameSchema::resolve`]
//! flattens the inheritance chains up front so runtime lookups never walk
//! parents. Malformed inheritance (unknown or cyclic parents) is a
//! configuration error and fails construction outright.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::errors::ServerError;
use crate::sanitize::TypeDescriptor;

/// One attribute of a game object class.
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub descriptor: TypeDescriptor,
    /// Initial value when object construction does not supply one.
    pub default: Option<Value>,
}

impl AttributeSchema {
    pub fn new(descriptor: TypeDescriptor) -> Self {
        Self {
            descriptor,
            default: None,
        }
    }

    pub fn with_default(descriptor: TypeDescriptor, default: Value) -> Self {
        Self {
            descriptor,
            default: Some(default),
        }
    }
}

/// One declared argument of a game function.
#[derive(Debug, Clone)]
pub struct ArgSchema {
    pub name: String,
    pub descriptor: TypeDescriptor,
    /// Used when the client omits the argument. Omitting a defaultless
    /// argument is an invalid run.
    pub default: Option<Value>,
}

impl ArgSchema {
    pub fn required(name: &str, descriptor: TypeDescriptor) -> Self {
        Self {
            name: name.to_string(),
            descriptor,
            default: None,
        }
    }

    pub fn optional(name: &str, descriptor: TypeDescriptor, default: Value) -> Self {
        Self {
            name: name.to_string(),
            descriptor,
            default: Some(default),
        }
    }
}

/// One callable function on a game object class (or on the AI).
#[derive(Debug, Clone)]
pub struct FunctionSchema {
    pub args: Vec<ArgSchema>,
    pub returns: TypeDescriptor,
    /// The value reported for a vetoed, unsanitary or timed-out call.
    pub invalid_value: Value,
}

/// One game object class, pre- or post-resolution.
#[derive(Debug, Clone, Default)]
pub struct GameObjectSchema {
    pub parent: Option<String>,
    pub attributes: BTreeMap<String, AttributeSchema>,
    pub functions: BTreeMap<String, FunctionSchema>,
}

/// A fully resolved game schema. Every class carries the union of its own
/// and all ancestors' attributes and functions.
#[derive(Debug)]
pub struct GameSchema {
    objects: BTreeMap<String, GameObjectSchema>,
}

impl GameSchema {
    /// Flattens inheritance. Child declarations shadow a parent's declaration
    /// of the same name.
    pub fn resolve(raw: BTreeMap<String, GameObjectSchema>) -> Result<Self, ServerError> {
        let mut objects = BTreeMap::new();
        for (name, schema) in &raw {
            let mut resolved = schema.clone();
            let mut visited: HashSet<&str> = HashSet::new();
            visited.insert(name.as_str());

            let mut parent_name = schema.parent.as_deref();
            while let Some(parent) = parent_name {
                if !visited.insert(parent) {
                    return Err(ServerError::Config(format!(
                        "schema inheritance cycle through '{parent}'"
                    )));
                }
                let parent_schema = raw.get(parent).ok_or_else(|| {
                    ServerError::Config(format!(
                        "'{name}' inherits from unknown class '{parent}'"
                    ))
                })?;
                for (attr, attr_schema) in &parent_schema.attributes {
                    resolved
                        .attributes
                        .entry(attr.clone())
                        .or_insert_with(|| attr_schema.clone());
                }
                for (func, func_schema) in &parent_schema.functions {
                    resolved
                        .functions
                        .entry(func.clone())
                        .or_insert_with(|| func_schema.clone());
                }
                parent_name = parent_schema.parent.as_deref();
            }
            objects.insert(name.clone(), resolved);
        }
        Ok(Self { objects })
    }

    pub fn object(&self, name: &str) -> Option<&GameObjectSchema> {
        self.objects.get(name)
    }

    /// Looks up a function on a class. Inherited functions are already
    /// flattened in, so this is a direct lookup.
    pub fn function(&self, class: &str, function: &str) -> Option<&FunctionSchema> {
        self.objects.get(class)?.functions.get(function)
    }

    /// Whether `class` is `ancestor` or transitively inherits from it.
    pub fn is_subclass(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class);
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.objects.get(name).and_then(|s| s.parent.as_deref());
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn class(parent: Option<&str>) -> GameObjectSchema {
        GameObjectSchema {
            parent: parent.map(str::to_string),
            ..Default::default()
        }
    }

    fn raw_with_attr(parent: Option<&str>, attr: &str) -> GameObjectSchema {
        let mut schema = class(parent);
        schema.attributes.insert(
            attr.to_string(),
            AttributeSchema::new(TypeDescriptor::String),
        );
        schema
    }

    #[test]
    fn resolution_unions_ancestor_attributes() {
        let mut raw = BTreeMap::new();
        raw.insert("GameObject".into(), raw_with_attr(None, "id"));
        raw.insert(
            "Unit".into(),
            raw_with_attr(Some("GameObject"), "health"),
        );
        raw.insert("Knight".into(), raw_with_attr(Some("Unit"), "shield"));

        let schema = GameSchema::resolve(raw).unwrap();
        let knight = schema.object("Knight").unwrap();
        assert!(knight.attributes.contains_key("id"));
        assert!(knight.attributes.contains_key("health"));
        assert!(knight.attributes.contains_key("shield"));
    }

    #[test]
    fn child_declarations_shadow_parent_ones() {
        let mut parent = class(None);
        parent.attributes.insert(
            "speed".into(),
            AttributeSchema::with_default(TypeDescriptor::Int, json!(1)),
        );
        let mut child = class(Some("Base"));
        child.attributes.insert(
            "speed".into(),
            AttributeSchema::with_default(TypeDescriptor::Int, json!(5)),
        );

        let mut raw = BTreeMap::new();
        raw.insert("Base".into(), parent);
        raw.insert("Fast".into(), child);

        let schema = GameSchema::resolve(raw).unwrap();
        let speed = &schema.object("Fast").unwrap().attributes["speed"];
        assert_eq!(speed.default, Some(json!(5)));
    }

    #[test]
    fn inheritance_cycle_is_a_config_error() {
        let mut raw = BTreeMap::new();
        raw.insert("A".into(), class(Some("B")));
        raw.insert("B".into(), class(Some("A")));

        let err = GameSchema::resolve(raw).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn unknown_parent_is_a_config_error() {
        let mut raw = BTreeMap::new();
        raw.insert("Orphan".into(), class(Some("Ghost")));

        let err = GameSchema::resolve(raw).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn subclass_walk_follows_parent_chain() {
        let mut raw = BTreeMap::new();
        raw.insert("GameObject".into(), class(None));
        raw.insert("Unit".into(), class(Some("GameObject")));
        raw.insert("Knight".into(), class(Some("Unit")));

        let schema = GameSchema::resolve(raw).unwrap();
        assert!(schema.is_subclass("Knight", "GameObject"));
        assert!(schema.is_subclass("Knight", "Knight"));
        assert!(!schema.is_subclass("Unit", "Knight"));
        assert!(!schema.is_subclass("Missing", "GameObject"));
    }
}
