//! Entity type registry
//!
//! Maps an entity type token such as `Post` to the schema file that
//! describes it and the collection its documents live in.

use std::collections::HashMap;

/// Where an entity type's schema and documents live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityBinding {
    /// Schema file name (without extension) under `<schemas>/core/`
    pub schema_key: String,
    /// Data collection for documents of this type
    pub collection: String,
}

/// Entity type → binding table with a naming-convention fallback
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    overrides: HashMap<String, EntityBinding>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an explicit binding for `entity_type`
    pub fn register(
        &mut self,
        entity_type: impl Into<String>,
        schema_key: impl Into<String>,
        collection: impl Into<String>,
    ) -> &mut Self {
        self.overrides.insert(
            entity_type.into(),
            EntityBinding {
                schema_key: schema_key.into(),
                collection: collection.into(),
            },
        );
        self
    }

    /// Resolve a type token, deriving a binding when none is registered
    pub fn resolve(&self, entity_type: &str) -> EntityBinding {
        if let Some(binding) = self.overrides.get(entity_type) {
            return binding.clone();
        }
        let key = entity_type.to_lowercase();
        EntityBinding {
            collection: pluralize(&key),
            schema_key: key,
        }
    }
}

/// English-ish plural of a lower-case noun
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }

    let consonant_y = word.ends_with('y')
        && !word[..word.len() - 1].ends_with(&['a', 'e', 'i', 'o', 'u'][..]);
    if consonant_y {
        return format!("{}ies", &word[..word.len() - 1]);
    }

    let sibilant = ["s", "x", "z", "ch", "sh"]
        .iter()
        .any(|suffix| word.ends_with(suffix));
    if sibilant {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("post"), "posts");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("status"), "statuses");
        assert_eq!(pluralize("match"), "matches");
    }

    #[test]
    fn test_resolve_derives_from_type_token() {
        let registry = EntityRegistry::new();
        let binding = registry.resolve("Category");
        assert_eq!(binding.schema_key, "category");
        assert_eq!(binding.collection, "categories");
    }

    #[test]
    fn test_register_overrides_convention() {
        let mut registry = EntityRegistry::new();
        registry.register("Person", "person", "people");
        assert_eq!(registry.resolve("Person").collection, "people");
        assert_eq!(registry.resolve("Post").collection, "posts");
    }
}
