// SPDX-License-Identifier: Apache-2.0 OR MIT
//! CST → AST mapping and whitespace normalization.
//!
//! Mapping runs as ordered passes:
//!
//! 1. structural conversion of every CST production into its AST node,
//!    unescaping string literals and escaped directives;
//! 2. prefix/postfix extraction over the top-level sequence and recursively
//!    inside every directive body — leading indentation moves into the
//!    directive's `prefix`, the trailing whitespace-and-newline run into its
//!    `postfix` (macro definitions are exempt on both sides);
//! 3. block bodies lose a single leading newline so the block's opening line
//!    never reintroduces a blank line (skipped in `none` mode).
//!
//! Whether prefix/postfix are re-emitted is the evaluator's job; it depends
//! only on the space-gobbling mode and the `content_before` flag recorded
//! here. The pass order is load-bearing: extraction must see sibling
//! adjacency over the full segment list, which is only known after parsing.

use crate::ast::{
    Ast, BinaryOp, Directive, DirectiveKind, ElseIfBranch, Expression, ForEachDirective,
    IfDirective, Interpolation, Literal, MacroDirective, MacroInvocation, ObjectProperty, Segment,
    SetDirective, UnaryOp,
};
use crate::cst::{
    CstDirective, CstExpr, CstInterpolation, CstPrimaryBase, CstSegment, CstSuffix, CstTemplate,
};
use crate::lexer::{Token, TokenKind};
use crate::SpaceGobbling;

/// Maps a concrete syntax tree into the evaluation-ready AST, applying the
/// whitespace passes for the given space-gobbling mode.
pub fn to_ast(cst: &CstTemplate, mode: SpaceGobbling) -> Ast {
    let segments = map_segments(&cst.segments);
    Ast::new(shape_segments(segments, mode))
}

// ---- pass 1: structural conversion ----

fn map_segments(segments: &[CstSegment]) -> Vec<Segment> {
    segments.iter().map(map_segment).collect()
}

fn map_segment(segment: &CstSegment) -> Segment {
    match segment {
        CstSegment::Text(tokens) => Segment::Text(text_value(tokens)),
        CstSegment::Interpolation(interp) => Segment::Interpolation(map_interpolation(interp)),
        CstSegment::Directive(directive) => Segment::Directive(map_directive(directive)),
    }
}

fn text_value(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        if token.kind == TokenKind::EscapedDirective {
            out.push_str(&unescape_directive(&token.text));
        } else {
            out.push_str(&token.text);
        }
    }
    out
}

/// `\#end` → `#end`, `\\#end` → `\#end`: one escaping backslash is consumed,
/// every remaining pair collapses to a single backslash.
fn unescape_directive(text: &str) -> String {
    let hash = text.find('#').unwrap_or(0);
    let mut out = String::new();
    for _ in 0..hash.saturating_sub(1) / 2 {
        out.push('\\');
    }
    out.push_str(&text[hash..]);
    out
}

fn map_interpolation(interp: &CstInterpolation) -> Interpolation {
    match interp {
        CstInterpolation::Braced { expr, .. } => Interpolation {
            expr: map_expr(expr),
            braced: true,
        },
        CstInterpolation::Chain {
            reference,
            suffixes,
        } => Interpolation {
            expr: apply_suffixes(reference_expr(reference), suffixes),
            braced: false,
        },
    }
}

fn map_directive(directive: &CstDirective) -> Directive {
    let kind = match directive {
        CstDirective::If(node) => DirectiveKind::If(IfDirective {
            condition: map_expr(&node.condition),
            then_body: map_segments(&node.then_body),
            else_if_branches: node
                .else_if_branches
                .iter()
                .map(|(condition, body)| ElseIfBranch {
                    condition: map_expr(condition),
                    body: map_segments(body),
                })
                .collect(),
            else_body: node.else_body.as_deref().map(map_segments),
        }),
        CstDirective::Set(node) => DirectiveKind::Set(SetDirective {
            name: reference_name(&node.variable).0,
            value: map_expr(&node.value),
        }),
        CstDirective::ForEach(node) => DirectiveKind::ForEach(ForEachDirective {
            name: reference_name(&node.variable).0,
            iterable: map_expr(&node.iterable),
            body: map_segments(&node.body),
            else_body: node.else_body.as_deref().map(map_segments),
        }),
        CstDirective::Break(_) => DirectiveKind::Break,
        CstDirective::Stop(_) => DirectiveKind::Stop,
        CstDirective::Macro(node) => DirectiveKind::Macro(MacroDirective {
            name: node.name.text.clone(),
            params: node
                .params
                .iter()
                .map(|param| reference_name(param).0)
                .collect(),
            body: map_segments(&node.body),
        }),
        CstDirective::MacroCall(node) => DirectiveKind::MacroCall(MacroInvocation {
            name: node.name.text.trim_start_matches('#').to_string(),
            args: node.args.iter().map(map_expr).collect(),
            parenthesized: node.parenthesized,
        }),
        CstDirective::Evaluate { expr, .. } => DirectiveKind::Evaluate(map_expr(expr)),
        CstDirective::Parse { expr, .. } => DirectiveKind::Parse(map_expr(expr)),
        CstDirective::Include { expr, .. } => DirectiveKind::Include(map_expr(expr)),
    };
    Directive::new(kind)
}

fn map_expr(expr: &CstExpr) -> Expression {
    match expr {
        CstExpr::Ternary {
            condition,
            then_expr,
            else_expr,
        } => Expression::Ternary {
            condition: Box::new(map_expr(condition)),
            then_expr: Box::new(map_expr(then_expr)),
            else_expr: Box::new(map_expr(else_expr)),
        },
        CstExpr::Binary { op, left, right } => Expression::Binary {
            op: binary_op(op.kind),
            left: Box::new(map_expr(left)),
            right: Box::new(map_expr(right)),
        },
        CstExpr::Unary { op, operand } => Expression::Unary {
            op: unary_op(op.kind),
            operand: Box::new(map_expr(operand)),
        },
        CstExpr::Primary(primary) => {
            let base = match &primary.base {
                CstPrimaryBase::Literal(token) => Expression::Literal(map_literal(token)),
                CstPrimaryBase::Reference(token) => reference_expr(token),
                CstPrimaryBase::Object { properties, .. } => Expression::Object(
                    properties
                        .iter()
                        .map(|(key, value)| ObjectProperty {
                            key: key.text.clone(),
                            value: map_expr(value),
                        })
                        .collect(),
                ),
                CstPrimaryBase::Array { elements, .. } => {
                    Expression::Array(elements.iter().map(map_expr).collect())
                }
                CstPrimaryBase::RangeLiteral { start, end, .. } => Expression::Range {
                    start: Box::new(map_expr(start)),
                    end: Box::new(map_expr(end)),
                },
                CstPrimaryBase::Paren(inner) => map_expr(inner),
            };
            apply_suffixes(base, &primary.suffixes)
        }
    }
}

fn apply_suffixes(mut expr: Expression, suffixes: &[CstSuffix]) -> Expression {
    for suffix in suffixes {
        expr = match suffix {
            CstSuffix::Member { property } => Expression::Member {
                object: Box::new(expr),
                property: property.text.clone(),
            },
            CstSuffix::Call { args, .. } => Expression::Call {
                callee: Box::new(expr),
                args: args.iter().map(map_expr).collect(),
            },
            CstSuffix::Index { index, .. } => Expression::Index {
                object: Box::new(expr),
                index: Box::new(map_expr(index)),
            },
        };
    }
    expr
}

fn reference_expr(token: &Token) -> Expression {
    let (name, quiet) = reference_name(token);
    Expression::Variable { name, quiet }
}

fn reference_name(token: &Token) -> (String, bool) {
    if let Some(rest) = token.text.strip_prefix("$!") {
        (rest.to_string(), true)
    } else if let Some(rest) = token.text.strip_prefix('$') {
        (rest.to_string(), false)
    } else {
        (token.text.clone(), false)
    }
}

fn map_literal(token: &Token) -> Literal {
    match token.kind {
        TokenKind::StringLiteral => {
            let text = &token.text;
            let double_quoted = text.starts_with('"');
            let quote = if double_quoted { '"' } else { '\'' };
            let inner = text
                .strip_prefix(quote)
                .map(|rest| rest.strip_suffix(quote).unwrap_or(rest))
                .unwrap_or(text);
            let doubled: String = [quote, quote].iter().collect();
            Literal::Str {
                value: inner.replace(&doubled, &quote.to_string()),
                raw: inner.to_string(),
                double_quoted,
            }
        }
        TokenKind::NumberLiteral => Literal::Number {
            value: token.text.parse().unwrap_or(0.0),
            float: token.text.contains(['.', 'e', 'E']),
        },
        TokenKind::BoolLiteral => Literal::Bool(token.text == "true"),
        _ => Literal::Null,
    }
}

fn binary_op(kind: TokenKind) -> BinaryOp {
    match kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Mod => BinaryOp::Rem,
        TokenKind::Eq => BinaryOp::Eq,
        TokenKind::Ne => BinaryOp::Ne,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Le => BinaryOp::Le,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Ge => BinaryOp::Ge,
        TokenKind::And => BinaryOp::And,
        _ => BinaryOp::Or,
    }
}

fn unary_op(kind: TokenKind) -> UnaryOp {
    match kind {
        TokenKind::Not => UnaryOp::Not,
        TokenKind::Plus => UnaryOp::Plus,
        _ => UnaryOp::Minus,
    }
}

// ---- pass 2: whitespace extraction ----

fn shape_segments(mut segments: Vec<Segment>, mode: SpaceGobbling) -> Vec<Segment> {
    for segment in &mut segments {
        if let Segment::Directive(directive) = segment {
            shape_directive_bodies(directive, mode);
        }
    }
    extract_prefix_postfix(segments)
}

fn shape_directive_bodies(directive: &mut Directive, mode: SpaceGobbling) {
    match &mut directive.kind {
        DirectiveKind::If(node) => {
            node.then_body = shape_block_body(std::mem::take(&mut node.then_body), mode);
            for branch in &mut node.else_if_branches {
                branch.body = shape_block_body(std::mem::take(&mut branch.body), mode);
            }
            if let Some(body) = node.else_body.take() {
                node.else_body = Some(shape_block_body(body, mode));
            }
        }
        DirectiveKind::ForEach(node) => {
            node.body = shape_block_body(std::mem::take(&mut node.body), mode);
            if let Some(body) = node.else_body.take() {
                node.else_body = Some(shape_block_body(body, mode));
            }
        }
        DirectiveKind::Macro(node) => {
            node.body = shape_block_body(std::mem::take(&mut node.body), mode);
        }
        _ => {}
    }
}

fn shape_block_body(body: Vec<Segment>, mode: SpaceGobbling) -> Vec<Segment> {
    let mut shaped = shape_segments(body, mode);
    if mode != SpaceGobbling::None {
        strip_leading_newline(&mut shaped);
    }
    shaped
}

fn extract_prefix_postfix(mut segments: Vec<Segment>) -> Vec<Segment> {
    let mut result: Vec<Segment> = Vec::new();
    let mut idx = 0;
    while idx < segments.len() {
        if matches!(segments[idx], Segment::Directive(_)) {
            let placeholder = Segment::Text(String::new());
            let Segment::Directive(mut directive) =
                std::mem::replace(&mut segments[idx], placeholder)
            else {
                unreachable!("checked directive above");
            };

            if !matches!(directive.kind, DirectiveKind::Macro(_)) {
                if let Some(Segment::Text(prev)) = result.last_mut() {
                    if let Some(split) = trailing_indent(prev) {
                        directive.prefix = Some(prev[split..].to_string());
                        prev.truncate(split);
                        if prev.is_empty() {
                            result.pop();
                        }
                    }
                }
                if let Some(Segment::Text(next)) = segments.get_mut(idx + 1) {
                    if let Some(len) = leading_gobble(next) {
                        directive.postfix = Some(next[..len].to_string());
                        next.drain(..len);
                    }
                }
            }

            // the directive is first on its line when whatever precedes it
            // ends in a newline: nothing at all, text ending with one, or a
            // directive whose claimed postfix supplies one
            directive.content_before = match result.last() {
                None => false,
                Some(Segment::Text(text)) => !text.ends_with('\n'),
                Some(Segment::Directive(prev)) => prev.postfix.is_none(),
                Some(_) => true,
            };
            result.push(Segment::Directive(directive));
        } else {
            let placeholder = Segment::Text(String::new());
            match std::mem::replace(&mut segments[idx], placeholder) {
                Segment::Text(text) if text.is_empty() => {}
                other => result.push(other),
            }
        }
        idx += 1;
    }
    result
}

/// Byte index where a trailing spaces-and-tabs run begins, provided the run
/// is non-empty and sits at the start of the string or right after a
/// newline. This is the indentation a directive claims as its prefix.
fn trailing_indent(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = bytes.len();
    while i > 0 && (bytes[i - 1] == b' ' || bytes[i - 1] == b'\t') {
        i -= 1;
    }
    if i == bytes.len() {
        return None;
    }
    if i == 0 || bytes[i - 1] == b'\n' {
        Some(i)
    } else {
        None
    }
}

/// Length of a leading `[ \t]*\r?\n` run; whitespace without a newline is
/// not a postfix.
fn leading_gobble(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    if i + 1 < bytes.len() && bytes[i] == b'\r' && bytes[i + 1] == b'\n' {
        Some(i + 2)
    } else if i < bytes.len() && bytes[i] == b'\n' {
        Some(i + 1)
    } else {
        None
    }
}

fn strip_leading_newline(segments: &mut Vec<Segment>) {
    let replacement: Option<String> = match segments.first() {
        Some(Segment::Text(text)) => text
            .strip_prefix("\r\n")
            .or_else(|| text.strip_prefix('\n'))
            .map(str::to_string),
        _ => None,
    };
    if let Some(rest) = replacement {
        if rest.is_empty() {
            segments.remove(0);
        } else if let Some(Segment::Text(text)) = segments.first_mut() {
            *text = rest;
        }
    }
}
