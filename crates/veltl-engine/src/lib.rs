#![forbid(unsafe_code)]
// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Velocity-dialect template engine: lexer, parser, CST→AST mapper with
//! space gobbling, and a tree-walking evaluator with byte-exact whitespace
//! semantics.
//!
//! The pipeline runs strictly top to bottom — [`lexer`] → parser → mapper →
//! [`Evaluator`] — with one sanctioned loop: `#evaluate` re-enters the
//! pipeline on a runtime-produced string. [`Template`] bundles the pipeline
//! behind a parse/render pair; embedding layers that want collected
//! diagnostics instead of a first error use [`compile`] directly.

pub mod ast;
mod cst;
mod error;
pub mod eval;
pub mod lexer;
mod mapper;
mod output;
mod parser;
mod provider;
mod resource;
mod scope;
mod telemetry;
pub mod value;

pub use ast::{
    Ast, BinaryOp, Directive, DirectiveKind, ElseIfBranch, Expression, ForEachDirective,
    IfDirective, Interpolation, Literal, MacroDirective, MacroInvocation, ObjectProperty, Segment,
    SetDirective, Span, UnaryOp,
};
pub use error::Error;
pub use eval::Evaluator;
pub use lexer::{tokenize, Token, TokenKind};
pub use provider::{
    provider_object, ProviderObjectBuilder, ProviderRegistry, ProviderRegistryBuilder,
};
pub use resource::{LoadedResource, ResourceLoader};
pub use telemetry::enable as enable_telemetry;
pub use value::{Callable, DotChain, MissingRef, Number, Value};

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered variable bindings a template is rendered against.
pub type Context = IndexMap<String, Value>;

/// Whitespace-normalization mode around directives.
///
/// `None` reproduces the source verbatim, `Bc` re-emits leading indentation
/// but never trailing newlines, `Lines` and `Structured` suppress both for
/// directives that stand alone on their line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceGobbling {
    None,
    Bc,
    #[default]
    Lines,
    Structured,
}

/// Compiles template source into an AST, accumulating every diagnostic the
/// parser can recover past. A non-empty error list means the template must
/// not be rendered.
pub fn compile(source: &str, mode: SpaceGobbling) -> Result<Ast, Vec<Error>> {
    let tokens = lexer::tokenize(source).map_err(|err| vec![err])?;
    let (cst, errors) = parser::parse(&tokens);
    if !errors.is_empty() {
        return Err(errors);
    }
    match cst {
        Some(cst) => Ok(mapper::to_ast(&cst, mode)),
        None => Err(vec![Error::parse("failed to parse template", None)]),
    }
}

/// Parsed template with associated AST and original source.
#[derive(Clone)]
pub struct Template {
    name: String,
    source: String,
    ast: Ast,
    mode: SpaceGobbling,
    providers: ProviderRegistry,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Template {
    /// Parses template source with the default gobbling mode and no
    /// providers.
    pub fn parse_str(name: &str, source: &str) -> Result<Self, Error> {
        Self::parse_with_providers(name, source, SpaceGobbling::default(), ProviderRegistry::empty())
    }

    /// Parses template source with an explicit gobbling mode.
    pub fn parse_with_mode(name: &str, source: &str, mode: SpaceGobbling) -> Result<Self, Error> {
        Self::parse_with_providers(name, source, mode, ProviderRegistry::empty())
    }

    /// Parses template source and associates it with a provider registry.
    pub fn parse_with_providers(
        name: &str,
        source: &str,
        mode: SpaceGobbling,
        providers: ProviderRegistry,
    ) -> Result<Self, Error> {
        let ast = compile(source, mode).map_err(|errors| {
            errors
                .into_iter()
                .next()
                .unwrap_or_else(|| Error::parse("failed to parse template", None))
        })?;
        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
            ast,
            mode,
            providers,
        })
    }

    /// Returns the original template name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the original template source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns a reference to the mapped AST.
    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// Returns the space-gobbling mode the template was mapped with.
    pub fn mode(&self) -> SpaceGobbling {
        self.mode
    }

    /// Returns a clone of the provider registry in use.
    pub fn providers(&self) -> ProviderRegistry {
        self.providers.clone()
    }

    /// Replaces the provider registry associated with this template.
    pub fn set_providers(&mut self, providers: ProviderRegistry) {
        self.providers = providers;
    }

    /// Consumes the template and returns a new instance with the provided
    /// registry.
    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    /// Renders the template against the provided context.
    pub fn render(&self, context: &Context) -> Result<String, Error> {
        self.render_internal(context, None)
    }

    /// Renders with a resource loader backing `#parse` and `#include`.
    pub fn render_with_loader(
        &self,
        context: &Context,
        loader: &dyn ResourceLoader,
    ) -> Result<String, Error> {
        self.render_internal(context, Some(loader))
    }

    fn render_internal(
        &self,
        context: &Context,
        loader: Option<&dyn ResourceLoader>,
    ) -> Result<String, Error> {
        let started = std::time::Instant::now();
        let mut evaluator = Evaluator::new(&self.providers, loader, self.mode);
        let result = evaluator.evaluate(&self.ast, context);
        telemetry::record_render(&self.name, started.elapsed(), result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(entries: &[(&str, Value)]) -> Context {
        let mut map = Context::new();
        for (name, value) in entries {
            map.insert((*name).to_string(), value.clone());
        }
        map
    }

    #[test]
    fn renders_with_custom_provider() {
        let mut builder = ProviderRegistry::builder();
        builder.register(
            "util",
            provider_object()
                .method("upper", |args| {
                    let text = args.first().map(Value::display_string).unwrap_or_default();
                    Ok(Value::String(text.to_uppercase()))
                })
                .build(),
        );
        let template = Template::parse_with_providers(
            "test",
            "$util.upper($name)!",
            SpaceGobbling::Lines,
            builder.build(),
        )
        .unwrap();

        let rendered = template
            .render(&context(&[("name", Value::string("vela"))]))
            .unwrap();
        assert_eq!(rendered, "VELA!");
    }

    #[test]
    fn parse_error_on_missing_end() {
        let err = Template::parse_str("bad", "#if($a)never closed").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.to_string().contains("missing #end"));
    }

    #[test]
    fn gobbling_modes_change_directive_line_handling() {
        let source = "Hello\n#set($x = 1)\nWorld";
        let cases = [
            (SpaceGobbling::None, "Hello\n\nWorld"),
            (SpaceGobbling::Bc, "Hello\nWorld"),
            (SpaceGobbling::Lines, "Hello\nWorld"),
            (SpaceGobbling::Structured, "Hello\nWorld"),
        ];
        for (mode, expected) in cases {
            let template = Template::parse_with_mode("modes", source, mode).unwrap();
            let rendered = template.render(&Context::new()).unwrap();
            assert_eq!(rendered, expected, "mode {mode:?}");
        }
    }

    #[test]
    fn indented_directive_lines_disappear_in_lines_mode() {
        let source = "a\n  #set($x = 1)\nb";
        let template = Template::parse_with_mode("indent", source, SpaceGobbling::Lines).unwrap();
        assert_eq!(template.render(&Context::new()).unwrap(), "a\nb");

        let verbatim = Template::parse_with_mode("indent", source, SpaceGobbling::None).unwrap();
        assert_eq!(verbatim.render(&Context::new()).unwrap(), "a\n  \nb");
    }

    #[test]
    fn provider_errors_propagate_to_the_caller() {
        let mut builder = ProviderRegistry::builder();
        builder.register(
            "util",
            provider_object()
                .method("explode", |_args| {
                    Err(Error::render("status 500: boom", None))
                })
                .build(),
        );
        let template = Template::parse_with_providers(
            "boom",
            "$util.explode()",
            SpaceGobbling::Lines,
            builder.build(),
        )
        .unwrap();

        let err = template.render(&Context::new()).unwrap_err();
        assert!(err.to_string().contains("status 500"));
    }

    #[test]
    fn same_template_renders_identically_twice() {
        let template =
            Template::parse_str("twice", "#foreach($i in [1..3])$i#end").unwrap();
        let first = template.render(&Context::new()).unwrap();
        let second = template.render(&Context::new()).unwrap();
        assert_eq!(first, "123");
        assert_eq!(first, second);
    }

    #[test]
    fn accessors_expose_parse_inputs() {
        let template = Template::parse_str("name", "text").unwrap();
        assert_eq!(template.name(), "name");
        assert_eq!(template.source(), "text");
        assert_eq!(template.mode(), SpaceGobbling::Lines);
        assert_eq!(template.ast().segments.len(), 1);
    }

    #[test]
    fn space_gobbling_deserializes_from_lowercase_names() {
        let mode: SpaceGobbling = serde_json::from_str("\"bc\"").unwrap();
        assert_eq!(mode, SpaceGobbling::Bc);
        assert_eq!(serde_json::to_string(&SpaceGobbling::Lines).unwrap(), "\"lines\"");
    }
}
