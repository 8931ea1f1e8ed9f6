// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value as Json;
use veltl_core::Engine;

#[derive(Debug, Deserialize)]
struct Fixture {
    name: String,
    template: String,
    #[serde(default)]
    data: Json,
    #[serde(default)]
    expected: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[test]
fn test_cases_render_like_reference() {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let root = manifest_dir
        .parent()
        .expect("workspace root missing")
        .parent()
        .expect("workspace root missing again");
    let path = root.join("test-cases/veltl-core.json");
    let bytes = fs::read(&path).expect("test cases file missing");
    let cases: Vec<Fixture> = serde_json::from_slice(&bytes).expect("invalid test cases json");

    let engine = Engine::new();
    for case in cases {
        let outcome = engine.render_json(&case.template, &case.data);

        match case.error {
            Some(expected_error) => {
                assert!(
                    !outcome.is_ok(),
                    "{} expected error '{}' but rendered '{}'",
                    case.name,
                    expected_error,
                    outcome.output
                );
                assert!(outcome.output.is_empty(), "{} kept partial output", case.name);
                assert!(
                    outcome
                        .errors
                        .iter()
                        .any(|err| err.contains(&expected_error)),
                    "{} expected error containing '{}', got {:?}",
                    case.name,
                    expected_error,
                    outcome.errors
                );
            }
            None => {
                assert!(
                    outcome.is_ok(),
                    "render {} failed: {:?}",
                    case.name,
                    outcome.errors
                );
                let expected = case.expected.unwrap_or_default();
                assert_eq!(
                    outcome.output, expected,
                    "fixture {} rendered incorrectly",
                    case.name
                );
            }
        }
    }
}
