#![forbid(unsafe_code)]
// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Embedding layer for `veltl-engine`.
//!
//! Where [`veltl_engine::Template`] stops at the first error, the [`Engine`]
//! here follows the collect-don't-throw contract an embedding host wants:
//! every render returns a [`RenderOutcome`] whose `errors` list is non-empty
//! exactly when the render failed (in which case `output` is empty). The
//! builder carries the configuration surface — space-gobbling mode, provider
//! registry, resource loader — so call sites stay declarative.

use std::rc::Rc;

pub use veltl_engine::{
    compile, enable_telemetry, provider_object, tokenize, Ast, Callable, Context, DotChain,
    Error, Evaluator, LoadedResource, MissingRef, Number, ProviderObjectBuilder, ProviderRegistry,
    ProviderRegistryBuilder, ResourceLoader, SpaceGobbling, Template, Token, TokenKind, Value,
};

/// Result of one render call: either output, or a non-empty error list and
/// empty output. Partial output is never returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    pub output: String,
    pub errors: Vec<String>,
}

impl RenderOutcome {
    fn failure(errors: Vec<String>) -> Self {
        Self {
            output: String::new(),
            errors,
        }
    }

    /// Reports whether the render produced usable output.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Configured rendering front door.
#[derive(Clone, Default)]
pub struct Engine {
    mode: SpaceGobbling,
    providers: ProviderRegistry,
    loader: Option<Rc<dyn ResourceLoader>>,
}

impl Engine {
    /// An engine with default gobbling, no providers and no loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new builder for configuring engines.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Returns the configured space-gobbling mode.
    pub fn mode(&self) -> SpaceGobbling {
        self.mode
    }

    /// Renders template source against an ordered context, collecting all
    /// diagnostics instead of stopping at the first.
    pub fn render(&self, source: &str, context: &Context) -> RenderOutcome {
        let ast = match compile(source, self.mode) {
            Ok(ast) => ast,
            Err(errors) => {
                return RenderOutcome::failure(
                    errors.iter().map(ToString::to_string).collect(),
                );
            }
        };
        let mut evaluator = Evaluator::new(&self.providers, self.loader.as_deref(), self.mode);
        match evaluator.evaluate(&ast, context) {
            Ok(output) => RenderOutcome {
                output,
                errors: Vec::new(),
            },
            Err(err) => RenderOutcome::failure(vec![err.to_string()]),
        }
    }

    /// Renders against a JSON object, converting it into the ordered
    /// context form first.
    pub fn render_json(&self, source: &str, data: &serde_json::Value) -> RenderOutcome {
        self.render(source, &context_from_json(data))
    }
}

/// Builder for [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    mode: SpaceGobbling,
    providers: ProviderRegistryBuilder,
    loader: Option<Rc<dyn ResourceLoader>>,
}

impl EngineBuilder {
    /// Selects the whitespace-gobbling mode.
    pub fn space_gobbling(mut self, mode: SpaceGobbling) -> Self {
        self.mode = mode;
        self
    }

    /// Registers one provider namespace.
    pub fn provider(mut self, name: impl Into<String>, value: Value) -> Self {
        self.providers.register(name, value);
        self
    }

    /// Installs the resource loader backing `#parse` and `#include`.
    pub fn loader(mut self, loader: Rc<dyn ResourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            mode: self.mode,
            providers: self.providers.build(),
            loader: self.loader,
        }
    }
}

/// Converts a JSON object into the ordered context the engine renders
/// against; non-object values yield an empty context.
pub fn context_from_json(data: &serde_json::Value) -> Context {
    let mut context = Context::new();
    if let serde_json::Value::Object(object) = data {
        for (key, value) in object {
            context.insert(key.clone(), Value::from_json(value));
        }
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_collects_parse_errors_with_empty_output() {
        let engine = Engine::new();
        let outcome = engine.render("#if($a)open", &Context::new());
        assert!(!outcome.is_ok());
        assert!(outcome.output.is_empty());
        assert!(outcome.errors[0].contains("missing #end"));
    }

    #[test]
    fn render_json_exposes_object_members() {
        let engine = Engine::new();
        let outcome = engine.render_json(
            "Hello $user.name!",
            &serde_json::json!({"user": {"name": "Vela"}}),
        );
        assert!(outcome.is_ok());
        assert_eq!(outcome.output, "Hello Vela!");
    }

    #[test]
    fn builder_wires_mode_and_providers() {
        let engine = Engine::builder()
            .space_gobbling(SpaceGobbling::None)
            .provider(
                "util",
                provider_object()
                    .method("echo", |args| {
                        Ok(args.first().cloned().unwrap_or(Value::Null))
                    })
                    .build(),
            )
            .build();
        assert_eq!(engine.mode(), SpaceGobbling::None);

        let outcome = engine.render("$util.echo(\"x\")", &Context::new());
        assert_eq!(outcome.output, "x");
    }
}
