// SPDX-License-Identifier: Apache-2.0 OR MIT
//! End-to-end wiring of provider namespaces and the resource loader seam.

use std::collections::HashMap;
use std::rc::Rc;

use veltl_core::{
    provider_object, Context, Engine, Error, LoadedResource, ResourceLoader, Value,
};

/// In-memory loader backing `#parse`/`#include` in these tests; the engine
/// itself never touches the filesystem.
struct MapLoader {
    files: HashMap<String, String>,
}

impl MapLoader {
    fn new(entries: &[(&str, &str)]) -> Self {
        let files = entries
            .iter()
            .map(|(name, content)| ((*name).to_string(), (*content).to_string()))
            .collect();
        Self { files }
    }
}

impl ResourceLoader for MapLoader {
    fn exists(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    fn load(&self, name: &str, _encoding: &str) -> Result<LoadedResource, Error> {
        let content = self
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| Error::render(format!("resource not found: {name}"), None))?;
        Ok(LoadedResource {
            content,
            last_modified: None,
        })
    }
}

fn context(entries: &[(&str, Value)]) -> Context {
    let mut map = Context::new();
    for (name, value) in entries {
        map.insert((*name).to_string(), value.clone());
    }
    map
}

#[test]
fn provider_namespace_resolves_members_and_methods() {
    let engine = Engine::builder()
        .provider(
            "util",
            provider_object()
                .method("toUpper", |args| {
                    let text = args.first().map(Value::display_string).unwrap_or_default();
                    Ok(Value::String(text.to_uppercase()))
                })
                .property("version", Value::string("1.0"))
                .build(),
        )
        .build();

    let outcome = engine.render(
        "$util.toUpper($name) v$util.version",
        &context(&[("name", Value::string("world"))]),
    );
    assert!(outcome.is_ok(), "errors: {:?}", outcome.errors);
    assert_eq!(outcome.output, "WORLD v1.0");
}

#[test]
fn context_binding_shadows_provider_of_same_name() {
    let engine = Engine::builder()
        .provider(
            "ctx",
            provider_object()
                .property("requestId", Value::string("req-42"))
                .build(),
        )
        .build();

    let from_provider = engine.render("$ctx.requestId", &Context::new());
    assert_eq!(from_provider.output, "req-42");

    let shadowed = engine.render(
        "$ctx.requestId",
        &context(&[(
            "ctx",
            provider_object()
                .property("requestId", Value::string("local"))
                .build(),
        )]),
    );
    assert_eq!(shadowed.output, "local");
}

#[test]
fn provider_error_with_status_surfaces_in_errors() {
    let engine = Engine::builder()
        .provider(
            "util",
            provider_object()
                .method("explode", |_args| Err(Error::render("status 502: upstream", None)))
                .build(),
        )
        .build();

    let outcome = engine.render("$util.explode()", &Context::new());
    assert!(!outcome.is_ok());
    assert!(outcome.output.is_empty());
    assert!(outcome.errors[0].contains("status 502"));
}

#[test]
fn parse_directive_renders_resource_in_caller_scope() {
    let loader = MapLoader::new(&[("greeting.vtl", "Hello $name!")]);
    let engine = Engine::builder().loader(Rc::new(loader)).build();

    let outcome = engine.render(
        "#parse('greeting.vtl') done",
        &context(&[("name", Value::string("World"))]),
    );
    assert!(outcome.is_ok(), "errors: {:?}", outcome.errors);
    assert_eq!(outcome.output, "Hello World! done");
}

#[test]
fn include_directive_appends_content_verbatim() {
    let loader = MapLoader::new(&[("raw.vtl", "keep $name as-is")]);
    let engine = Engine::builder().loader(Rc::new(loader)).build();

    let outcome = engine.render("#include('raw.vtl')", &Context::new());
    assert!(outcome.is_ok(), "errors: {:?}", outcome.errors);
    assert_eq!(outcome.output, "keep $name as-is");
}

#[test]
fn missing_resource_reports_render_error() {
    let loader = MapLoader::new(&[]);
    let engine = Engine::builder().loader(Rc::new(loader)).build();

    let outcome = engine.render("#parse('nope.vtl')", &Context::new());
    assert!(!outcome.is_ok());
    assert!(outcome.errors[0].contains("resource not found"));
}

#[test]
fn parse_and_include_without_loader_are_no_ops() {
    let engine = Engine::new();
    let outcome = engine.render("a#parse('x.vtl')b#include('y.vtl')c", &Context::new());
    assert!(outcome.is_ok(), "errors: {:?}", outcome.errors);
    assert_eq!(outcome.output, "abc");
}
