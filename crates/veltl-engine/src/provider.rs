// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::Error;
use crate::value::{Callable, Value};

/// Registry mapping provider namespace names (`util`-style objects) to the
/// values the host injects. The evaluator consults it when a reference is
/// not found in any scope; it needs nothing from a provider beyond ordinary
/// member-read and call semantics.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    map: Rc<IndexMap<String, Value>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns a new builder for constructing registries.
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::new()
    }

    /// Looks up a provider namespace by name.
    pub fn resolve(&self, name: &str) -> Option<Value> {
        self.map.get(name).cloned()
    }

    /// Reports whether the registry holds no providers.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates the registered namespaces in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.map.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Helper for constructing registries before freezing them into an
/// immutable shared map.
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    map: IndexMap<String, Value>,
}

impl ProviderRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider namespace under the given name.
    pub fn register(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.map.insert(name.into(), value);
        self
    }

    /// Finalises the builder into an immutable registry.
    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            map: Rc::new(self.map),
        }
    }
}

/// Starts a builder for a provider object: a map whose members are plain
/// values and host callables.
pub fn provider_object() -> ProviderObjectBuilder {
    ProviderObjectBuilder::default()
}

/// Builds callable-bearing maps for injection as provider namespaces.
#[derive(Default)]
pub struct ProviderObjectBuilder {
    map: IndexMap<String, Value>,
}

impl ProviderObjectBuilder {
    /// Adds a callable member.
    pub fn method<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, Error> + 'static,
    {
        self.map.insert(name.into(), Value::Callable(Callable::new(func)));
        self
    }

    /// Adds a plain data member.
    pub fn property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.map.insert(name.into(), value);
        self
    }

    pub fn build(self) -> Value {
        Value::Map(self.map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_registered_namespaces() {
        let mut builder = ProviderRegistry::builder();
        builder.register("util", provider_object().property("version", Value::int(1)).build());
        let registry = builder.build();

        assert!(registry.resolve("util").is_some());
        assert!(registry.resolve("input").is_none());
    }

    #[test]
    fn provider_methods_are_callable() {
        let object = provider_object()
            .method("upper", |args| {
                let text = args.first().map(Value::display_string).unwrap_or_default();
                Ok(Value::String(text.to_uppercase()))
            })
            .build();

        let Value::Map(map) = object else {
            panic!("expected map");
        };
        let Value::Callable(callable) = &map["upper"] else {
            panic!("expected callable");
        };
        let result = callable.invoke(&[Value::string("abc")]).unwrap();
        assert!(matches!(result, Value::String(s) if s == "ABC"));
    }
}
