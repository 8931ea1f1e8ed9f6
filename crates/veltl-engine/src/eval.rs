// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::cell::Cell;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::ast::{
    Ast, BinaryOp, Directive, DirectiveKind, Expression, ForEachDirective, Literal,
    MacroInvocation, Segment, UnaryOp,
};
use crate::error::Error;
use crate::output::OutputBuffer;
use crate::provider::ProviderRegistry;
use crate::resource::ResourceLoader;
use crate::scope::{MacroDefinition, MacroTable, ScopeManager};
use crate::value::{
    is_float_tagged, is_truthy, loose_cmp, loose_eq, to_number, Callable, Number, Value,
};
use crate::{lexer, mapper, parser, SpaceGobbling};

/// Ceiling for `#evaluate`/`#parse`/string-interpolation nesting; the
/// dialect itself puts no bound on template-authored recursion.
const MAX_NESTED_RENDERS: usize = 16;

/// Tree-walking evaluator. Holds the mutable run state of a single render
/// (scope chain, break/stop flags, output buffer) and must not be reused
/// across renders.
pub struct Evaluator<'a> {
    scopes: ScopeManager,
    macros: MacroTable,
    output: OutputBuffer,
    providers: &'a ProviderRegistry,
    loader: Option<&'a dyn ResourceLoader>,
    mode: SpaceGobbling,
    should_break: Rc<Cell<bool>>,
    should_stop: Rc<Cell<bool>>,
    json_output: bool,
    nested_depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        providers: &'a ProviderRegistry,
        loader: Option<&'a dyn ResourceLoader>,
        mode: SpaceGobbling,
    ) -> Self {
        Self {
            scopes: ScopeManager::new(),
            macros: MacroTable::default(),
            output: OutputBuffer::new(),
            providers,
            loader,
            mode,
            should_break: Rc::new(Cell::new(false)),
            should_stop: Rc::new(Cell::new(false)),
            json_output: false,
            nested_depth: 0,
        }
    }

    /// Renders a mapped template against the given context.
    pub fn evaluate(
        &mut self,
        ast: &Ast,
        context: &IndexMap<String, Value>,
    ) -> Result<String, Error> {
        let providers = self.providers;
        for (name, value) in providers.iter() {
            self.scopes.set(name, value.clone());
        }
        for (name, value) in context {
            self.scopes.set(name, value.clone());
        }
        self.json_output = detect_json_template(ast);
        self.eval_segments(&ast.segments)?;
        Ok(self.output.take())
    }

    fn eval_segments(&mut self, segments: &[Segment]) -> Result<(), Error> {
        let mut gobble_newline = false;
        for segment in segments {
            if self.should_stop.get() || self.should_break.get() {
                break;
            }
            match segment {
                Segment::Text(text) => {
                    let mut slice = text.as_str();
                    if gobble_newline {
                        if let Some(rest) = slice.strip_prefix("\r\n") {
                            slice = rest;
                        } else if let Some(rest) = slice.strip_prefix('\n') {
                            slice = rest;
                        }
                    }
                    self.output.push_str(slice);
                    gobble_newline = false;
                }
                Segment::Interpolation(interp) => {
                    let value = self.eval_expr(&interp.expr)?;
                    self.emit_interpolation(&value, interp.braced);
                    gobble_newline = false;
                }
                Segment::Directive(directive) => {
                    self.eval_directive(directive)?;
                    // a gobbling directive that claimed no postfix of its
                    // own still swallows one immediately following newline;
                    // macro definitions keep their surroundings verbatim
                    gobble_newline = self.mode != SpaceGobbling::None
                        && directive.postfix.is_none()
                        && !matches!(directive.kind, DirectiveKind::Macro(_));
                }
            }
        }
        Ok(())
    }

    fn eval_directive(&mut self, directive: &Directive) -> Result<(), Error> {
        let (emit_prefix, emit_postfix) = match self.mode {
            SpaceGobbling::None => (true, true),
            SpaceGobbling::Bc => (true, false),
            SpaceGobbling::Lines | SpaceGobbling::Structured => {
                (directive.content_before, directive.content_before)
            }
        };
        if emit_prefix {
            if let Some(prefix) = &directive.prefix {
                self.output.push_str(prefix);
            }
        }
        self.exec_directive(&directive.kind)?;
        if emit_postfix && !self.should_stop.get() {
            if let Some(postfix) = &directive.postfix {
                self.output.push_str(postfix);
            }
        }
        Ok(())
    }

    fn exec_directive(&mut self, kind: &DirectiveKind) -> Result<(), Error> {
        crate::telemetry::record_directive(kind.name());
        match kind {
            DirectiveKind::If(node) => {
                let condition = self.eval_expr(&node.condition)?;
                if is_truthy(&condition) {
                    return self.eval_segments(&node.then_body);
                }
                for branch in &node.else_if_branches {
                    let value = self.eval_expr(&branch.condition)?;
                    if is_truthy(&value) {
                        return self.eval_segments(&branch.body);
                    }
                }
                if let Some(body) = &node.else_body {
                    return self.eval_segments(body);
                }
                Ok(())
            }
            DirectiveKind::Set(node) => {
                let value = self.eval_expr(&node.value)?;
                self.scopes.set(&node.name, value);
                Ok(())
            }
            DirectiveKind::ForEach(node) => self.exec_foreach(node),
            DirectiveKind::Break => {
                self.should_break.set(true);
                Ok(())
            }
            DirectiveKind::Stop => {
                self.should_stop.set(true);
                Ok(())
            }
            DirectiveKind::Macro(node) => {
                self.macros
                    .define(&node.name, node.params.clone(), node.body.clone());
                Ok(())
            }
            DirectiveKind::MacroCall(call) => self.exec_macro_call(call),
            DirectiveKind::Evaluate(expr) => {
                let value = self.eval_expr(expr)?;
                let source = value.display_string();
                self.render_fragment(&source)
            }
            DirectiveKind::Parse(expr) => {
                let Some(loader) = self.loader else {
                    return Ok(());
                };
                let name = self.eval_expr(expr)?.display_string();
                if !loader.exists(&name) {
                    return Err(Error::render(format!("resource not found: {name}"), None));
                }
                let resource = loader.load(&name, "UTF-8")?;
                self.render_fragment(&resource.content)
            }
            DirectiveKind::Include(expr) => {
                let Some(loader) = self.loader else {
                    return Ok(());
                };
                let name = self.eval_expr(expr)?.display_string();
                if !loader.exists(&name) {
                    return Err(Error::render(format!("resource not found: {name}"), None));
                }
                let resource = loader.load(&name, "UTF-8")?;
                self.output.push_str(&resource.content);
                Ok(())
            }
        }
    }

    fn exec_foreach(&mut self, node: &ForEachDirective) -> Result<(), Error> {
        let iterable = self.eval_expr(&node.iterable)?;
        let items: Option<Vec<Value>> = match iterable {
            Value::Array(items) => Some(items),
            Value::Map(map) => Some(map.into_values().collect()),
            _ => None,
        };
        match items {
            Some(items) if !items.is_empty() => {
                self.scopes.push();
                let result = self.run_foreach(node, items);
                // scope pop and flag reset run on every exit path, so
                // break/stop cannot leak a frame or poison an outer loop
                self.scopes.pop();
                self.should_break.set(false);
                result
            }
            _ => {
                if let Some(body) = &node.else_body {
                    self.eval_segments(body)?;
                }
                Ok(())
            }
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn run_foreach(&mut self, node: &ForEachDirective, items: Vec<Value>) -> Result<(), Error> {
        let total = items.len();
        for (index, item) in items.into_iter().enumerate() {
            if self.should_stop.get() || self.should_break.get() {
                break;
            }
            self.scopes.set(&node.name, item);
            let loop_object = self.loop_object(index, total);
            self.scopes.set("foreach", loop_object);
            self.scopes.set("velocityCount", Value::int(index as i64 + 1));
            self.eval_segments(&node.body)?;
        }
        Ok(())
    }

    /// The `$foreach` value: index/count/first/last/hasNext plus a `stop()`
    /// capability wired to this render's break flag.
    #[allow(clippy::cast_possible_wrap)]
    fn loop_object(&self, index: usize, total: usize) -> Value {
        let mut map = IndexMap::new();
        map.insert("index".to_string(), Value::int(index as i64));
        map.insert("count".to_string(), Value::int(index as i64 + 1));
        map.insert("first".to_string(), Value::Bool(index == 0));
        map.insert("last".to_string(), Value::Bool(index + 1 == total));
        map.insert("hasNext".to_string(), Value::Bool(index + 1 < total));
        let flag = Rc::clone(&self.should_break);
        map.insert(
            "stop".to_string(),
            Value::Callable(Callable::new(move |_args| {
                flag.set(true);
                Ok(Value::Null)
            })),
        );
        Value::Map(map)
    }

    fn exec_macro_call(&mut self, call: &MacroInvocation) -> Result<(), Error> {
        match self.macros.get(&call.name) {
            Some(def) => {
                let mut args: SmallVec<[Value; 4]> = SmallVec::new();
                for arg in &call.args {
                    args.push(self.eval_expr(arg)?);
                }
                self.scopes.push();
                let result = self.run_macro(&def, &args);
                self.scopes.pop();
                result
            }
            None => {
                // unknown invocations render as their literal source text
                let literal = invocation_source(call);
                self.output.push_str(&literal);
                Ok(())
            }
        }
    }

    fn run_macro(&mut self, def: &MacroDefinition, args: &[Value]) -> Result<(), Error> {
        for (idx, param) in def.params.iter().enumerate() {
            let value = args.get(idx).cloned().unwrap_or(Value::Null);
            self.scopes.set(param, value);
        }
        self.eval_segments(&def.body)
    }

    /// Re-parses a runtime-produced string as a template and evaluates it
    /// against the same scope chain and output buffer as the caller.
    fn render_fragment(&mut self, source: &str) -> Result<(), Error> {
        if self.nested_depth >= MAX_NESTED_RENDERS {
            return Err(Error::render(
                "nested template evaluation exceeds depth limit",
                None,
            ));
        }
        let ast = compile_fragment(source, self.mode)?;
        self.nested_depth += 1;
        let result = self.eval_segments(&ast.segments);
        self.nested_depth -= 1;
        result
    }

    /// Like [`render_fragment`](Self::render_fragment) but captures the
    /// output instead of appending it; used for double-quoted string
    /// interpolation.
    fn render_fragment_to_string(&mut self, source: &str) -> Result<String, Error> {
        let saved_output = std::mem::take(&mut self.output);
        let saved_json = self.json_output;
        self.json_output = false;
        let result = self.render_fragment(source);
        self.json_output = saved_json;
        let rendered = self.output.take();
        self.output = saved_output;
        result.map(|()| rendered)
    }

    // ---- expressions ----

    fn eval_expr(&mut self, expr: &Expression) -> Result<Value, Error> {
        match expr {
            Expression::Literal(literal) => Ok(self.eval_literal(literal)),
            Expression::Variable { name, quiet } => Ok(self.eval_variable(name, *quiet)),
            Expression::Member { object, property } => self.eval_member(expr, object, property),
            Expression::Call { callee, args } => self.eval_call(callee, args),
            Expression::Index { object, index } => self.eval_index(expr, object, index),
            Expression::Object(properties) => {
                let mut map = IndexMap::new();
                for property in properties {
                    let value = self.eval_expr(&property.value)?;
                    map.insert(property.key.clone(), value);
                }
                Ok(Value::Map(map))
            }
            Expression::Array(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval_expr(element)?);
                }
                Ok(Value::Array(items))
            }
            Expression::Range { start, end } => {
                let from = to_number(&self.eval_expr(start)?);
                let to = to_number(&self.eval_expr(end)?);
                if !from.is_finite() || !to.is_finite() {
                    return Ok(Value::Array(Vec::new()));
                }
                #[allow(clippy::cast_possible_truncation)]
                let (from, to) = (from.trunc() as i64, to.trunc() as i64);
                let mut items = Vec::new();
                let mut current = from;
                while current <= to {
                    items.push(Value::int(current));
                    current += 1;
                }
                Ok(Value::Array(items))
            }
            Expression::Binary { op, left, right } => {
                let left = self.eval_expr(left)?;
                let right = self.eval_expr(right)?;
                Ok(apply_binary(*op, left, right))
            }
            Expression::Unary { op, operand } => {
                let operand = self.eval_expr(operand)?;
                Ok(apply_unary(*op, operand))
            }
            Expression::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                let condition = self.eval_expr(condition)?;
                if is_truthy(&condition) {
                    self.eval_expr(then_expr)
                } else {
                    self.eval_expr(else_expr)
                }
            }
        }
    }

    fn eval_literal(&mut self, literal: &Literal) -> Value {
        match literal {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number { value, float } => Value::Number(Number {
                value: *value,
                float: *float,
            }),
            Literal::Str {
                value,
                double_quoted,
                ..
            } => {
                // double-quoted strings are themselves little templates;
                // single-quoted strings are inert
                if *double_quoted && (value.contains('$') || value.contains('#')) {
                    match self.render_fragment_to_string(value) {
                        Ok(rendered) => Value::String(rendered),
                        Err(_) => Value::String(value.clone()),
                    }
                } else {
                    Value::String(value.clone())
                }
            }
        }
    }

    fn eval_variable(&mut self, name: &str, quiet: bool) -> Value {
        if let Some(value) = self.scopes.get(name) {
            return value.clone();
        }
        if let Some(value) = self.providers.resolve(name) {
            return value;
        }
        let text = if quiet {
            format!("$!{name}")
        } else {
            format!("${name}")
        };
        Value::missing(text, quiet)
    }

    fn eval_member(
        &mut self,
        whole: &Expression,
        object: &Expression,
        property: &str,
    ) -> Result<Value, Error> {
        let value = self.eval_expr(object)?;
        Ok(match value {
            Value::MissingRef(missing) => {
                Value::missing(format!("{}.{property}", missing.text), missing.quiet)
            }
            Value::DotChain(chain) => Value::chain(format!("{}.{property}", chain.text)),
            Value::Null => Value::missing(expression_source(whole), base_is_quiet(whole)),
            primitive @ (Value::Bool(_) | Value::Number(_) | Value::String(_)) => {
                Value::chain(format!("{}.{property}", primitive.display_string()))
            }
            Value::Map(map) => {
                if let Some(member) = map.get(property) {
                    member.clone()
                } else if property == "size" {
                    size_callable(map.len())
                } else {
                    Value::missing(expression_source(whole), base_is_quiet(whole))
                }
            }
            Value::Array(items) => {
                if property == "size" {
                    size_callable(items.len())
                } else {
                    Value::missing(expression_source(whole), base_is_quiet(whole))
                }
            }
            Value::Callable(_) => Value::missing(expression_source(whole), base_is_quiet(whole)),
        })
    }

    fn eval_call(&mut self, callee: &Expression, args: &[Expression]) -> Result<Value, Error> {
        let target = self.eval_expr(callee)?;
        let mut evaluated: SmallVec<[Value; 4]> = SmallVec::new();
        for arg in args {
            evaluated.push(self.eval_expr(arg)?);
        }
        match target {
            Value::Callable(callable) => callable.invoke(&evaluated),
            Value::DotChain(chain) => Ok(Value::chain(format!("{}()", chain.text))),
            Value::MissingRef(missing) => {
                Ok(Value::missing(format!("{}()", missing.text), missing.quiet))
            }
            _ => Ok(Value::string("")),
        }
    }

    fn eval_index(
        &mut self,
        whole: &Expression,
        object: &Expression,
        index: &Expression,
    ) -> Result<Value, Error> {
        let target = self.eval_expr(object)?;
        let key = self.eval_expr(index)?;
        Ok(match target {
            Value::MissingRef(missing) => Value::missing(
                format!("{}[{}]", missing.text, key.display_string()),
                missing.quiet,
            ),
            Value::DotChain(chain) => {
                Value::chain(format!("{}[{}]", chain.text, key.display_string()))
            }
            Value::Array(items) => match key {
                Value::Number(n) if n.value >= 0.0 && n.value.fract() == 0.0 => {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let idx = n.value as usize;
                    if idx < items.len() {
                        items[idx].clone()
                    } else {
                        Value::missing(expression_source(whole), base_is_quiet(whole))
                    }
                }
                _ => Value::missing(expression_source(whole), base_is_quiet(whole)),
            },
            Value::Map(map) => {
                if let Value::String(name) = &key {
                    map.get(name).cloned().unwrap_or_else(|| {
                        Value::missing(expression_source(whole), base_is_quiet(whole))
                    })
                } else {
                    Value::missing(expression_source(whole), base_is_quiet(whole))
                }
            }
            _ => Value::missing(expression_source(whole), base_is_quiet(whole)),
        })
    }

    // ---- interpolation output ----

    fn emit_interpolation(&mut self, value: &Value, braced: bool) {
        match value {
            Value::MissingRef(missing) => {
                if !missing.quiet {
                    if braced {
                        self.output.push_str(&braced_fallback(&missing.text));
                    } else {
                        self.output.push_str(&missing.text);
                    }
                }
            }
            Value::DotChain(chain) => self.output.push_str(&chain.text),
            Value::Null => {}
            other => {
                if self.json_output {
                    let serialized = json_interpolation(other);
                    self.output.push_str(&serialized);
                } else {
                    self.output.push_value(other);
                }
            }
        }
    }
}

// ---- free helpers ----

fn compile_fragment(source: &str, mode: SpaceGobbling) -> Result<Ast, Error> {
    let tokens = lexer::tokenize(source)
        .map_err(|err| Error::render(format!("sub-template lex failed: {err}"), err.span()))?;
    let (cst, errors) = parser::parse(&tokens);
    if let Some(first) = errors.first() {
        return Err(Error::render(
            format!("sub-template parse failed: {first}"),
            first.span(),
        ));
    }
    let cst = cst.ok_or_else(|| Error::render("sub-template parse failed", None))?;
    Ok(mapper::to_ast(&cst, mode))
}

#[allow(clippy::cast_possible_wrap)]
fn size_callable(len: usize) -> Value {
    Value::Callable(Callable::new(move |_args| Ok(Value::int(len as i64))))
}

fn detect_json_template(ast: &Ast) -> bool {
    for segment in &ast.segments {
        match segment {
            Segment::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let first = trimmed.as_bytes()[0];
                return first == b'{' || first == b'[';
            }
            Segment::Interpolation(interp) => {
                return matches!(interp.expr, Expression::Object(_) | Expression::Array(_));
            }
            Segment::Directive(_) => return false,
        }
    }
    false
}

fn braced_fallback(text: &str) -> String {
    let inner = text
        .strip_prefix("$!")
        .or_else(|| text.strip_prefix('$'))
        .unwrap_or(text);
    format!("${{{inner}}}")
}

fn json_interpolation(value: &Value) -> String {
    if let Value::String(s) = value {
        let trimmed = s.trim();
        if is_json_literal(trimmed) {
            return s.clone();
        }
        return serde_json::to_string(s).unwrap_or_default();
    }
    serde_json::to_string(&value.to_json()).unwrap_or_default()
}

fn is_json_literal(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.is_empty() {
        return false;
    }
    let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
    if (first == b'"' && last == b'"')
        || (first == b'{' && last == b'}')
        || (first == b'[' && last == b']')
    {
        return true;
    }
    if value == "true" || value == "false" || value == "null" {
        return true;
    }
    value.parse::<f64>().is_ok()
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Value {
    let left = normalize_operand(left);
    let right = normalize_operand(right);
    match op {
        BinaryOp::Add => {
            // string context wins over numeric addition
            if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                Value::String(format!(
                    "{}{}",
                    left.display_string(),
                    right.display_string()
                ))
            } else {
                numeric(op, &left, &right)
            }
        }
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => numeric(op, &left, &right),
        BinaryOp::Eq => Value::Bool(loose_eq(&left, &right)),
        BinaryOp::Ne => Value::Bool(!loose_eq(&left, &right)),
        BinaryOp::Lt => Value::Bool(matches!(
            loose_cmp(&left, &right),
            Some(std::cmp::Ordering::Less)
        )),
        BinaryOp::Le => Value::Bool(matches!(
            loose_cmp(&left, &right),
            Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(matches!(
            loose_cmp(&left, &right),
            Some(std::cmp::Ordering::Greater)
        )),
        BinaryOp::Ge => Value::Bool(matches!(
            loose_cmp(&left, &right),
            Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
        )),
        BinaryOp::And => Value::Bool(is_truthy(&left) && is_truthy(&right)),
        BinaryOp::Or => Value::Bool(is_truthy(&left) || is_truthy(&right)),
    }
}

fn numeric(op: BinaryOp, left: &Value, right: &Value) -> Value {
    let a = to_number(left);
    let b = to_number(right);
    let float_tag = is_float_tagged(left) || is_float_tagged(right);
    match op {
        BinaryOp::Add => number_result(a + b, float_tag),
        BinaryOp::Sub => number_result(a - b, float_tag),
        BinaryOp::Mul => number_result(a * b, float_tag),
        BinaryOp::Div => {
            if b == 0.0 {
                Value::int(0)
            } else {
                number_result(a / b, float_tag)
            }
        }
        BinaryOp::Rem => {
            if b == 0.0 {
                Value::int(0)
            } else {
                number_result(a % b, float_tag)
            }
        }
        _ => Value::Null,
    }
}

fn number_result(value: f64, float_tag: bool) -> Value {
    if float_tag || !value.is_finite() || value.fract() != 0.0 {
        Value::float(value)
    } else {
        #[allow(clippy::cast_possible_truncation)]
        Value::int(value as i64)
    }
}

fn apply_unary(op: UnaryOp, operand: Value) -> Value {
    let operand = normalize_operand(operand);
    match op {
        UnaryOp::Not => Value::Bool(!is_truthy(&operand)),
        UnaryOp::Plus => number_result(to_number(&operand), is_float_tagged(&operand)),
        UnaryOp::Minus => number_result(-to_number(&operand), is_float_tagged(&operand)),
    }
}

fn normalize_operand(value: Value) -> Value {
    match value {
        Value::MissingRef(_) => Value::Null,
        Value::DotChain(chain) => Value::String(chain.text),
        other => other,
    }
}

/// Reconstructs the literal source form of a reference chain; this is what
/// an unresolved chain prints.
fn expression_source(expr: &Expression) -> String {
    match expr {
        Expression::Literal(literal) => literal_source(literal),
        Expression::Variable { name, quiet } => {
            if *quiet {
                format!("$!{name}")
            } else {
                format!("${name}")
            }
        }
        Expression::Member { object, property } => {
            format!("{}.{property}", expression_source(object))
        }
        Expression::Call { callee, args } => {
            let rendered: Vec<String> = args.iter().map(expression_source).collect();
            format!("{}({})", expression_source(callee), rendered.join(", "))
        }
        Expression::Index { object, index } => {
            format!(
                "{}[{}]",
                expression_source(object),
                expression_source(index)
            )
        }
        Expression::Object(properties) => {
            let rendered: Vec<String> = properties
                .iter()
                .map(|p| format!("{}: {}", p.key, expression_source(&p.value)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        Expression::Array(elements) => {
            let rendered: Vec<String> = elements.iter().map(expression_source).collect();
            format!("[{}]", rendered.join(", "))
        }
        Expression::Range { start, end } => {
            format!(
                "[{}..{}]",
                expression_source(start),
                expression_source(end)
            )
        }
        Expression::Binary { op, left, right } => {
            format!(
                "{} {op} {}",
                expression_source(left),
                expression_source(right)
            )
        }
        Expression::Unary { op, operand } => {
            let symbol = match op {
                UnaryOp::Not => "!",
                UnaryOp::Plus => "+",
                UnaryOp::Minus => "-",
            };
            format!("{symbol}{}", expression_source(operand))
        }
        Expression::Ternary {
            condition,
            then_expr,
            else_expr,
        } => {
            format!(
                "{} ? {} : {}",
                expression_source(condition),
                expression_source(then_expr),
                expression_source(else_expr)
            )
        }
    }
}

fn literal_source(literal: &Literal) -> String {
    match literal {
        Literal::Null => "null".to_string(),
        Literal::Bool(b) => b.to_string(),
        Literal::Number { value, float } => Number {
            value: *value,
            float: *float,
        }
        .display(),
        Literal::Str {
            raw, double_quoted, ..
        } => {
            if *double_quoted {
                format!("\"{raw}\"")
            } else {
                format!("'{raw}'")
            }
        }
    }
}

fn invocation_source(call: &MacroInvocation) -> String {
    if call.parenthesized {
        let rendered: Vec<String> = call.args.iter().map(expression_source).collect();
        format!("#{}({})", call.name, rendered.join(", "))
    } else {
        format!("#{}", call.name)
    }
}

/// Whether the chain's base reference used the quiet form; quietness
/// propagates to every sentinel the chain produces.
fn base_is_quiet(expr: &Expression) -> bool {
    match expr {
        Expression::Variable { quiet, .. } => *quiet,
        Expression::Member { object, .. } | Expression::Index { object, .. } => {
            base_is_quiet(object)
        }
        Expression::Call { callee, .. } => base_is_quiet(callee),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;

    fn render_with(source: &str, vars: &[(&str, Value)]) -> String {
        let ast = compile(source, SpaceGobbling::Lines).expect("compile failed");
        let providers = ProviderRegistry::empty();
        let mut evaluator = Evaluator::new(&providers, None, SpaceGobbling::Lines);
        let mut context = IndexMap::new();
        for (name, value) in vars {
            context.insert((*name).to_string(), value.clone());
        }
        evaluator.evaluate(&ast, &context).expect("render failed")
    }

    fn render(source: &str) -> String {
        render_with(source, &[])
    }

    #[test]
    fn plain_text_renders_unchanged() {
        assert_eq!(render("just text, nothing else"), "just text, nothing else");
    }

    #[test]
    fn foreach_over_range_keeps_lines_tight() {
        let out = render("#foreach($i in [1..3])\nItem:$i\n#end");
        assert_eq!(out, "Item:1\nItem:2\nItem:3\n");
    }

    #[test]
    fn if_else_adds_no_blank_lines() {
        let template = "#if($cond)\nyes\n#else\nno\n#end";
        assert_eq!(
            render_with(template, &[("cond", Value::Bool(true))]),
            "yes\n"
        );
        assert_eq!(
            render_with(template, &[("cond", Value::Bool(false))]),
            "no\n"
        );
    }

    #[test]
    fn undefined_reference_prints_literally_quiet_prints_nothing() {
        assert_eq!(render("Hello $missing"), "Hello $missing");
        assert_eq!(render("Hello $!missing"), "Hello ");
        assert_eq!(render("${$missing}"), "${missing}");
    }

    #[test]
    fn missing_property_chain_prints_itself() {
        let user = Value::Map(IndexMap::new());
        assert_eq!(
            render_with("$user.missing", &[("user", user.clone())]),
            "$user.missing"
        );
        assert_eq!(render_with("$!user.missing", &[("user", user)]), "");
    }

    #[test]
    fn chain_on_primitive_degrades_to_dot_chain() {
        assert_eq!(
            render_with("$ref.unknownProp", &[("ref", Value::string("hello"))]),
            "hello.unknownProp"
        );
        assert_eq!(
            render_with("$ref.f()", &[("ref", Value::int(2))]),
            "2.f()"
        );
    }

    #[test]
    fn operator_precedence_matches_arithmetic() {
        assert_eq!(render("#set($x = 2 + 3 * 4)$x"), "14");
        assert_eq!(render("#set($x = (2 + 3) * 4)$x"), "20");
    }

    #[test]
    fn division_and_modulo_by_zero_fall_back_to_zero() {
        assert_eq!(render("#set($x = 5 / 0)$x"), "0");
        assert_eq!(render("#set($x = 5 % 0)$x"), "0");
    }

    #[test]
    fn float_tagged_whole_numbers_keep_decimal() {
        assert_eq!(render("#set($x = 1.5 + 1.5)$x"), "3.0");
        assert_eq!(render("#set($x = 3.0)$x"), "3.0");
        assert_eq!(render("#set($x = 6 / 2)$x"), "3");
        assert_eq!(render("#set($x = 5 / 2)$x"), "2.5");
    }

    #[test]
    fn string_concatenation_wins_over_numeric_addition() {
        assert_eq!(render("#set($x = \"a\" + 1)$x"), "a1");
        assert_eq!(render("#set($x = 1 + 2)$x"), "3");
    }

    #[test]
    fn foreach_loop_object_counts_and_flags() {
        let out = render(
            "#foreach($i in [1..3])$foreach.count:$foreach.first:$foreach.last;#end",
        );
        assert_eq!(out, "1:true:false;2:false:false;3:false:true;");
    }

    #[test]
    fn velocity_count_is_one_based() {
        assert_eq!(render("#foreach($i in [5..7])$velocityCount#end"), "123");
    }

    #[test]
    fn break_stops_only_the_inner_loop() {
        let out = render(
            "#foreach($i in [1..2])#foreach($j in [1..9])$j#if($j == 2)#break#end#end;#end",
        );
        assert_eq!(out, "12;12;");
    }

    #[test]
    fn foreach_stop_capability_halts_loop() {
        let out = render("#foreach($i in [1..9])$i#if($i == 3)$foreach.stop()#end#end");
        assert_eq!(out, "123");
    }

    #[test]
    fn stop_truncates_all_remaining_output() {
        let out = render("before #foreach($i in [1..9])$i#if($i == 2)#stop#end#end after");
        assert_eq!(out, "before 12");
    }

    #[test]
    fn foreach_else_runs_for_empty_or_missing_iterables() {
        assert_eq!(
            render_with(
                "#foreach($i in $items)x#else none#end",
                &[("items", Value::Array(Vec::new()))]
            ),
            " none"
        );
        assert_eq!(render("#foreach($i in $gone)x#else none#end"), " none");
    }

    #[test]
    fn macro_assignments_stay_local() {
        let out = render(
            "#set($x = \"outer\")#macro(m)#set($x = \"inner\")$x#end#m()$x",
        );
        assert_eq!(out, "innerouter");
    }

    #[test]
    fn macro_parameters_bind_arguments() {
        let out = render("#macro(greet $who)Hello $who!#end#greet(\"World\")");
        assert_eq!(out, "Hello World!");
    }

    #[test]
    fn unknown_macro_invocation_prints_source() {
        assert_eq!(render("#history"), "#history");
        assert_eq!(render("#frob(1, 2)"), "#frob(1, 2)");
    }

    #[test]
    fn double_quoted_strings_interpolate_single_quoted_do_not() {
        let vars = [("name", Value::string("World"))];
        assert_eq!(
            render_with("#set($x = \"Hello, $name\")$x", &vars),
            "Hello, World"
        );
        assert_eq!(
            render_with("#set($x = 'Hello, $name')$x", &vars),
            "Hello, $name"
        );
    }

    #[test]
    fn evaluate_shares_scope_and_output() {
        let out = render("#set($src = '#set($y = 7)y=$y')#evaluate($src)/$y");
        assert_eq!(out, "y=7/7");
    }

    #[test]
    fn evaluate_depth_is_bounded() {
        let ast = compile(
            "#set($src = '#evaluate($src)')#evaluate($src)",
            SpaceGobbling::Lines,
        )
        .expect("compile failed");
        let providers = ProviderRegistry::empty();
        let mut evaluator = Evaluator::new(&providers, None, SpaceGobbling::Lines);
        let err = evaluator
            .evaluate(&ast, &IndexMap::new())
            .expect_err("expected depth error");
        assert!(err.to_string().contains("depth"));
    }

    #[test]
    fn json_output_mode_serializes_interpolations() {
        let out = render_with(
            "{ \"name\": $name, \"count\": $count }",
            &[("name", Value::string("x\"y")), ("count", Value::int(3))],
        );
        assert_eq!(out, "{ \"name\": \"x\\\"y\", \"count\": 3 }");
    }

    #[test]
    fn ternary_takes_only_one_branch() {
        assert_eq!(render("#set($x = 1 > 0 ? \"yes\" : \"no\")$x"), "yes");
    }

    #[test]
    fn size_accessor_counts_elements() {
        let items = Value::Array(vec![Value::int(1), Value::int(2)]);
        assert_eq!(render_with("$items.size()", &[("items", items)]), "2");
    }

    #[test]
    fn rendering_twice_yields_identical_output() {
        let source = "#foreach($i in [1..2])$i#end";
        assert_eq!(render(source), render(source));
    }
}
