// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Cross-mode whitespace matrix: each template is rendered in all four
//! space-gobbling modes and compared byte for byte.

use veltl_engine::{Context, SpaceGobbling, Template};

const MODES: [SpaceGobbling; 4] = [
    SpaceGobbling::None,
    SpaceGobbling::Bc,
    SpaceGobbling::Lines,
    SpaceGobbling::Structured,
];

fn render(source: &str, mode: SpaceGobbling) -> String {
    Template::parse_with_mode("gobbling", source, mode)
        .expect("parse failed")
        .render(&Context::new())
        .expect("render failed")
}

fn assert_matrix(source: &str, expected: [&str; 4]) {
    for (mode, expected) in MODES.into_iter().zip(expected) {
        assert_eq!(
            render(source, mode),
            expected,
            "template {source:?} in mode {mode:?}"
        );
    }
}

#[test]
fn directive_alone_on_its_line() {
    assert_matrix(
        "Hello\n#set($x = 1)\nWorld",
        ["Hello\n\nWorld", "Hello\nWorld", "Hello\nWorld", "Hello\nWorld"],
    );
}

#[test]
fn indented_directive_line() {
    assert_matrix(
        "a\n  #set($x = 1)\nb",
        ["a\n  \nb", "a\n  b", "a\nb", "a\nb"],
    );
}

#[test]
fn directive_preceded_by_content() {
    assert_matrix("X #set($a = 1)\nY", ["X \nY", "X Y", "X \nY", "X \nY"]);
}

#[test]
fn block_directive_with_body_lines() {
    assert_matrix(
        "#if(true)\nyes\n#end\nafter",
        ["\nyes\n\nafter", "yes\nafter", "yes\nafter", "yes\nafter"],
    );
}

#[test]
fn every_mode_is_deterministic() {
    let source = "#foreach($i in [1..2])\n- $i\n#end\ndone";
    for mode in MODES {
        assert_eq!(render(source, mode), render(source, mode), "mode {mode:?}");
    }
}
