// SPDX-License-Identifier: Apache-2.0 OR MIT
use crate::ast::Span;
use crate::cst::{
    CstDirective, CstExpr, CstForEach, CstIf, CstInterpolation, CstMacro, CstMacroCall,
    CstPrimary, CstPrimaryBase, CstSegment, CstSet, CstSuffix, CstTemplate,
};
use crate::error::Error;
use crate::lexer::{Token, TokenKind};

/// Parses a token stream into a concrete syntax tree.
///
/// Diagnostics are accumulated rather than thrown: a malformed directive or
/// expression records an error and parsing resumes at the next plausible
/// segment boundary. Only a missing `#end` (where no recovery rule exists)
/// aborts without a CST.
pub fn parse(tokens: &[Token]) -> (Option<CstTemplate>, Vec<Error>) {
    let mut parser = Parser {
        tokens,
        pos: 0,
        errors: Vec::new(),
        fatal: false,
    };
    let template = parser.template();
    let Parser { errors, fatal, .. } = parser;
    if fatal {
        (None, errors)
    } else {
        (Some(template), errors)
    }
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    errors: Vec<Error>,
    fatal: bool,
}

/// Token kinds that open a non-text segment; everything else joins a text run.
fn is_segment_start(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::If
            | TokenKind::ElseIf
            | TokenKind::Else
            | TokenKind::End
            | TokenKind::Set
            | TokenKind::ForEach
            | TokenKind::Break
            | TokenKind::Stop
            | TokenKind::Macro
            | TokenKind::Evaluate
            | TokenKind::Parse
            | TokenKind::Include
            | TokenKind::MacroCall
            | TokenKind::DollarRef
            | TokenKind::QuietRef
            | TokenKind::InterpStart
    )
}

impl<'t> Parser<'t> {
    fn template(&mut self) -> CstTemplate {
        let mut segments = Vec::new();
        while let Some(kind) = self.peek_kind() {
            match kind {
                TokenKind::ElseIf | TokenKind::Else | TokenKind::End => {
                    let token = self.tokens[self.pos].clone();
                    self.errors.push(Error::parse_with_span(
                        format!("unexpected {}", token.text),
                        token.span,
                    ));
                    self.pos += 1;
                }
                _ => match self.segment() {
                    Ok(segment) => segments.push(segment),
                    Err(err) => {
                        self.errors.push(err);
                        if self.fatal {
                            break;
                        }
                        // resume after the offending token
                        self.pos += 1;
                    }
                },
            }
        }
        CstTemplate { segments }
    }

    fn segment(&mut self) -> Result<CstSegment, Error> {
        let kind = match self.peek_kind() {
            Some(kind) => kind,
            None => return Err(Error::parse("unexpected end of input", None)),
        };
        match kind {
            TokenKind::If => self.if_directive().map(CstSegment::Directive),
            TokenKind::Set => self.set_directive().map(CstSegment::Directive),
            TokenKind::ForEach => self.foreach_directive().map(CstSegment::Directive),
            TokenKind::Break => {
                let token = self.bump();
                Ok(CstSegment::Directive(CstDirective::Break(token.span)))
            }
            TokenKind::Stop => {
                let token = self.bump();
                Ok(CstSegment::Directive(CstDirective::Stop(token.span)))
            }
            TokenKind::Macro => self.macro_directive().map(CstSegment::Directive),
            TokenKind::MacroCall => self.macro_invocation().map(CstSegment::Directive),
            TokenKind::Evaluate | TokenKind::Parse | TokenKind::Include => {
                self.unary_directive(kind).map(CstSegment::Directive)
            }
            TokenKind::DollarRef | TokenKind::QuietRef => {
                let reference = self.bump();
                let end = reference.span.end;
                let suffixes = self.suffixes(end)?;
                Ok(CstSegment::Interpolation(CstInterpolation::Chain {
                    reference,
                    suffixes,
                }))
            }
            TokenKind::InterpStart => {
                let open = self.bump();
                self.skip_trivia();
                let expr = self.expression()?;
                self.skip_trivia();
                let close = self.expect(TokenKind::RCurly, "'}'")?;
                Ok(CstSegment::Interpolation(CstInterpolation::Braced {
                    expr,
                    span: Span::new(open.span.start, close.span.end),
                }))
            }
            _ => Ok(self.text_run()),
        }
    }

    fn text_run(&mut self) -> CstSegment {
        let mut tokens = Vec::new();
        while let Some(kind) = self.peek_kind() {
            if is_segment_start(kind) {
                break;
            }
            tokens.push(self.bump());
        }
        CstSegment::Text(tokens)
    }

    /// Parses segments up to the next `#end`, `#elseif` or `#else` at this
    /// nesting level. Running out of input here is the one unrecoverable
    /// parse failure.
    fn block_body(&mut self) -> Result<Vec<CstSegment>, Error> {
        let mut segments = Vec::new();
        loop {
            match self.peek_kind() {
                None => {
                    self.fatal = true;
                    return Err(Error::parse("missing #end before end of input", None));
                }
                Some(TokenKind::End) | Some(TokenKind::ElseIf) | Some(TokenKind::Else) => {
                    return Ok(segments);
                }
                Some(_) => segments.push(self.segment()?),
            }
        }
    }

    fn if_directive(&mut self) -> Result<CstDirective, Error> {
        let start = self.expect(TokenKind::If, "#if")?;
        let condition = self.parenthesized_expr()?;
        let then_body = self.block_body()?;

        let mut else_if_branches = Vec::new();
        while self.peek_kind() == Some(TokenKind::ElseIf) {
            self.pos += 1;
            let branch_condition = self.parenthesized_expr()?;
            let branch_body = self.block_body()?;
            else_if_branches.push((branch_condition, branch_body));
        }

        let mut else_body = None;
        if self.peek_kind() == Some(TokenKind::Else) {
            self.pos += 1;
            else_body = Some(self.block_body()?);
        }

        let end = self.expect(TokenKind::End, "#end")?;
        Ok(CstDirective::If(CstIf {
            condition,
            then_body,
            else_if_branches,
            else_body,
            span: Span::new(start.span.start, end.span.end),
        }))
    }

    fn set_directive(&mut self) -> Result<CstDirective, Error> {
        let start = self.expect(TokenKind::Set, "#set")?;
        self.skip_trivia();
        self.expect(TokenKind::LParen, "'('")?;
        self.skip_trivia();
        let variable = self.expect_reference()?;
        self.skip_trivia();
        self.expect(TokenKind::Assign, "'='")?;
        self.skip_trivia();
        let value = self.expression()?;
        self.skip_trivia();
        let close = self.expect(TokenKind::RParen, "')'")?;
        Ok(CstDirective::Set(CstSet {
            variable,
            value,
            span: Span::new(start.span.start, close.span.end),
        }))
    }

    fn foreach_directive(&mut self) -> Result<CstDirective, Error> {
        let start = self.expect(TokenKind::ForEach, "#foreach")?;
        self.skip_trivia();
        self.expect(TokenKind::LParen, "'('")?;
        self.skip_trivia();
        let variable = self.expect_reference()?;
        self.in_separator()?;
        let iterable = self.expression()?;
        self.skip_trivia();
        self.expect(TokenKind::RParen, "')'")?;

        let body = self.block_body()?;
        if self.peek_kind() == Some(TokenKind::ElseIf) {
            let token = self.tokens[self.pos].clone();
            return Err(Error::parse_with_span(
                "unexpected #elseif inside #foreach",
                token.span,
            ));
        }
        let mut else_body = None;
        if self.peek_kind() == Some(TokenKind::Else) {
            self.pos += 1;
            else_body = Some(self.block_body()?);
        }
        let end = self.expect(TokenKind::End, "#end")?;
        Ok(CstDirective::ForEach(CstForEach {
            variable,
            iterable,
            body,
            else_body,
            span: Span::new(start.span.start, end.span.end),
        }))
    }

    /// The `in` of `#foreach` arrives either as the dedicated keyword token
    /// or, depending on surrounding spacing, as a literal text run whose
    /// trimmed content is `in`.
    fn in_separator(&mut self) -> Result<(), Error> {
        self.skip_trivia();
        match self.current() {
            Some(token) if token.kind == TokenKind::InKeyword => {
                self.pos += 1;
                Ok(())
            }
            Some(token) if token.kind == TokenKind::Text && token.text.trim() == "in" => {
                self.pos += 1;
                self.skip_trivia();
                Ok(())
            }
            Some(token) if token.kind == TokenKind::Identifier && token.text == "in" => {
                self.pos += 1;
                self.skip_trivia();
                Ok(())
            }
            Some(token) => Err(Error::parse_with_span(
                format!("expected 'in' in #foreach, found '{}'", token.text),
                token.span,
            )),
            None => Err(Error::parse("expected 'in' in #foreach", None)),
        }
    }

    fn macro_directive(&mut self) -> Result<CstDirective, Error> {
        let start = self.expect(TokenKind::Macro, "#macro")?;
        self.skip_trivia();
        self.expect(TokenKind::LParen, "'('")?;
        self.skip_trivia();
        let name = self.expect(TokenKind::Identifier, "macro name")?;
        let mut params = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek_kind() == Some(TokenKind::Comma) {
                self.pos += 1;
                continue;
            }
            match self.peek_kind() {
                Some(TokenKind::DollarRef) | Some(TokenKind::QuietRef) => {
                    params.push(self.bump());
                }
                _ => break,
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.block_body()?;
        let end = self.expect(TokenKind::End, "#end")?;
        Ok(CstDirective::Macro(CstMacro {
            name,
            params,
            body,
            span: Span::new(start.span.start, end.span.end),
        }))
    }

    fn macro_invocation(&mut self) -> Result<CstDirective, Error> {
        let name = self.expect(TokenKind::MacroCall, "macro invocation")?;
        let mut args = Vec::new();
        let mut parenthesized = false;
        let mut end = name.span.end;

        // arguments only when the parenthesis is glued to the name
        if self.peek_kind() == Some(TokenKind::LParen)
            && self.tokens[self.pos].span.start == name.span.end
        {
            parenthesized = true;
            self.pos += 1;
            self.skip_trivia();
            while self.peek_kind() != Some(TokenKind::RParen) {
                if self.peek_kind().is_none() {
                    return Err(Error::parse("unterminated macro invocation", None));
                }
                args.push(self.expression()?);
                self.skip_trivia();
                while self.peek_kind() == Some(TokenKind::Comma) {
                    self.pos += 1;
                    self.skip_trivia();
                }
            }
            let close = self.expect(TokenKind::RParen, "')'")?;
            end = close.span.end;
        }

        Ok(CstDirective::MacroCall(CstMacroCall {
            name: name.clone(),
            args,
            parenthesized,
            span: Span::new(name.span.start, end),
        }))
    }

    fn unary_directive(&mut self, kind: TokenKind) -> Result<CstDirective, Error> {
        let start = self.expect(kind, "directive")?;
        let expr = self.parenthesized_expr()?;
        let span = Span::new(start.span.start, self.previous_end());
        Ok(match kind {
            TokenKind::Evaluate => CstDirective::Evaluate { expr, span },
            TokenKind::Parse => CstDirective::Parse { expr, span },
            _ => CstDirective::Include { expr, span },
        })
    }

    fn parenthesized_expr(&mut self) -> Result<CstExpr, Error> {
        self.skip_trivia();
        self.expect(TokenKind::LParen, "'('")?;
        self.skip_trivia();
        let expr = self.expression()?;
        self.skip_trivia();
        self.expect(TokenKind::RParen, "')'")?;
        Ok(expr)
    }

    // ---- expressions, lowest precedence first ----

    fn expression(&mut self) -> Result<CstExpr, Error> {
        self.ternary()
    }

    fn ternary(&mut self) -> Result<CstExpr, Error> {
        let condition = self.logical_or()?;
        self.skip_trivia();
        if self.peek_kind() == Some(TokenKind::Question) {
            self.pos += 1;
            self.skip_trivia();
            let then_expr = self.expression()?;
            self.skip_trivia();
            self.expect(TokenKind::Colon, "':'")?;
            self.skip_trivia();
            let else_expr = self.expression()?;
            return Ok(CstExpr::Ternary {
                condition: Box::new(condition),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            });
        }
        Ok(condition)
    }

    fn logical_or(&mut self) -> Result<CstExpr, Error> {
        let mut left = self.logical_and()?;
        loop {
            self.skip_trivia();
            if self.peek_kind() == Some(TokenKind::Or) {
                let op = self.bump();
                self.skip_trivia();
                let right = self.logical_and()?;
                left = binary(op, left, right);
            } else {
                return Ok(left);
            }
        }
    }

    fn logical_and(&mut self) -> Result<CstExpr, Error> {
        let mut left = self.equality()?;
        loop {
            self.skip_trivia();
            if self.peek_kind() == Some(TokenKind::And) {
                let op = self.bump();
                self.skip_trivia();
                let right = self.equality()?;
                left = binary(op, left, right);
            } else {
                return Ok(left);
            }
        }
    }

    fn equality(&mut self) -> Result<CstExpr, Error> {
        let mut left = self.relational()?;
        loop {
            self.skip_trivia();
            match self.peek_kind() {
                Some(TokenKind::Eq) | Some(TokenKind::Ne) => {
                    let op = self.bump();
                    self.skip_trivia();
                    let right = self.relational()?;
                    left = binary(op, left, right);
                }
                _ => return Ok(left),
            }
        }
    }

    fn relational(&mut self) -> Result<CstExpr, Error> {
        let mut left = self.additive()?;
        loop {
            self.skip_trivia();
            match self.peek_kind() {
                Some(TokenKind::Lt)
                | Some(TokenKind::Le)
                | Some(TokenKind::Gt)
                | Some(TokenKind::Ge) => {
                    let op = self.bump();
                    self.skip_trivia();
                    let right = self.additive()?;
                    left = binary(op, left, right);
                }
                _ => return Ok(left),
            }
        }
    }

    fn additive(&mut self) -> Result<CstExpr, Error> {
        let mut left = self.multiplicative()?;
        loop {
            self.skip_trivia();
            match self.peek_kind() {
                Some(TokenKind::Plus) | Some(TokenKind::Minus) => {
                    let op = self.bump();
                    self.skip_trivia();
                    let right = self.multiplicative()?;
                    left = binary(op, left, right);
                }
                _ => return Ok(left),
            }
        }
    }

    fn multiplicative(&mut self) -> Result<CstExpr, Error> {
        let mut left = self.unary()?;
        loop {
            self.skip_trivia();
            match self.peek_kind() {
                Some(TokenKind::Star) | Some(TokenKind::Slash) | Some(TokenKind::Mod) => {
                    let op = self.bump();
                    self.skip_trivia();
                    let right = self.unary()?;
                    left = binary(op, left, right);
                }
                _ => return Ok(left),
            }
        }
    }

    fn unary(&mut self) -> Result<CstExpr, Error> {
        self.skip_trivia();
        match self.peek_kind() {
            Some(TokenKind::Not) | Some(TokenKind::Plus) | Some(TokenKind::Minus) => {
                let op = self.bump();
                let operand = self.unary()?;
                Ok(CstExpr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<CstExpr, Error> {
        self.skip_trivia();
        let (base, end) = self.primary_base()?;
        let suffixes = self.suffixes(end)?;
        Ok(CstExpr::Primary(CstPrimary { base, suffixes }))
    }

    fn primary_base(&mut self) -> Result<(CstPrimaryBase, usize), Error> {
        let kind = match self.peek_kind() {
            Some(kind) => kind,
            None => return Err(Error::parse("unexpected end of expression", None)),
        };
        match kind {
            TokenKind::StringLiteral
            | TokenKind::NumberLiteral
            | TokenKind::BoolLiteral
            | TokenKind::NullLiteral => {
                let token = self.bump();
                let end = token.span.end;
                Ok((CstPrimaryBase::Literal(token), end))
            }
            TokenKind::DollarRef | TokenKind::QuietRef => {
                let token = self.bump();
                let end = token.span.end;
                Ok((CstPrimaryBase::Reference(token), end))
            }
            TokenKind::LCurly => self.object_literal(),
            TokenKind::LBracket => self.array_or_range(),
            TokenKind::LParen => {
                self.pos += 1;
                self.skip_trivia();
                let inner = self.expression()?;
                self.skip_trivia();
                let close = self.expect(TokenKind::RParen, "')'")?;
                Ok((CstPrimaryBase::Paren(Box::new(inner)), close.span.end))
            }
            _ => {
                let token = self.tokens[self.pos].clone();
                Err(Error::parse_with_span(
                    format!("unexpected token in expression: '{}'", token.text),
                    token.span,
                ))
            }
        }
    }

    fn object_literal(&mut self) -> Result<(CstPrimaryBase, usize), Error> {
        let open = self.expect(TokenKind::LCurly, "'{'")?;
        let mut properties = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek_kind() == Some(TokenKind::RCurly) {
                break;
            }
            let key = self.expect(TokenKind::Identifier, "property name")?;
            self.skip_trivia();
            self.expect(TokenKind::Colon, "':'")?;
            self.skip_trivia();
            let value = self.expression()?;
            properties.push((key, value));
            self.skip_trivia();
            if self.peek_kind() == Some(TokenKind::Comma) {
                self.pos += 1;
            } else {
                break;
            }
        }
        let close = self.expect(TokenKind::RCurly, "'}'")?;
        let span = Span::new(open.span.start, close.span.end);
        Ok((CstPrimaryBase::Object { properties, span }, span.end))
    }

    /// `[a..b]` and `[a, b]` share an opening bracket; the range form is
    /// committed to only when the token after the first element is the range
    /// operator.
    fn array_or_range(&mut self) -> Result<(CstPrimaryBase, usize), Error> {
        let open = self.expect(TokenKind::LBracket, "'['")?;
        self.skip_trivia();

        if self.peek_kind() == Some(TokenKind::RBracket) {
            let close = self.bump();
            let span = Span::new(open.span.start, close.span.end);
            return Ok((
                CstPrimaryBase::Array {
                    elements: Vec::new(),
                    span,
                },
                span.end,
            ));
        }

        let range_head = matches!(
            self.peek_kind(),
            Some(TokenKind::NumberLiteral) | Some(TokenKind::DollarRef) | Some(TokenKind::QuietRef)
        ) && self.next_nontrivia_kind(self.pos + 1) == Some(TokenKind::Range);

        if range_head {
            let start = self.primary()?;
            self.skip_trivia();
            self.expect(TokenKind::Range, "'..'")?;
            self.skip_trivia();
            let end = self.primary()?;
            self.skip_trivia();
            let close = self.expect(TokenKind::RBracket, "']'")?;
            let span = Span::new(open.span.start, close.span.end);
            return Ok((
                CstPrimaryBase::RangeLiteral {
                    start: Box::new(start),
                    end: Box::new(end),
                    span,
                },
                span.end,
            ));
        }

        let mut elements = Vec::new();
        loop {
            elements.push(self.expression()?);
            self.skip_trivia();
            if self.peek_kind() == Some(TokenKind::Comma) {
                self.pos += 1;
                self.skip_trivia();
            } else {
                break;
            }
        }
        let close = self.expect(TokenKind::RBracket, "']'")?;
        let span = Span::new(open.span.start, close.span.end);
        Ok((CstPrimaryBase::Array { elements, span }, span.end))
    }

    /// Postfix chain: `.name`, `(args...)`, `[index]`. Suffixes must be
    /// glued to the expression they extend; a detached `.` falls back to
    /// literal text handling in the caller.
    fn suffixes(&mut self, mut last_end: usize) -> Result<Vec<CstSuffix>, Error> {
        let mut out = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::Dot) => {
                    if self.tokens[self.pos].span.start != last_end {
                        return Ok(out);
                    }
                    match self.tokens.get(self.pos + 1) {
                        Some(next) if next.kind == TokenKind::Identifier => {
                            let property = next.clone();
                            last_end = property.span.end;
                            self.pos += 2;
                            out.push(CstSuffix::Member { property });
                        }
                        _ => return Ok(out),
                    }
                }
                Some(TokenKind::LParen) => {
                    if self.tokens[self.pos].span.start != last_end {
                        return Ok(out);
                    }
                    let start = self.tokens[self.pos].span.start;
                    self.pos += 1;
                    self.skip_trivia();
                    let mut args = Vec::new();
                    if self.peek_kind() != Some(TokenKind::RParen) {
                        loop {
                            args.push(self.expression()?);
                            self.skip_trivia();
                            if self.peek_kind() == Some(TokenKind::Comma) {
                                self.pos += 1;
                                self.skip_trivia();
                            } else {
                                break;
                            }
                        }
                    }
                    let close = self.expect(TokenKind::RParen, "')'")?;
                    last_end = close.span.end;
                    out.push(CstSuffix::Call {
                        args,
                        span: Span::new(start, close.span.end),
                    });
                }
                Some(TokenKind::LBracket) => {
                    if self.tokens[self.pos].span.start != last_end {
                        return Ok(out);
                    }
                    let start = self.tokens[self.pos].span.start;
                    self.pos += 1;
                    self.skip_trivia();
                    let index = self.expression()?;
                    self.skip_trivia();
                    let close = self.expect(TokenKind::RBracket, "']'")?;
                    last_end = close.span.end;
                    out.push(CstSuffix::Index {
                        index: Box::new(index),
                        span: Span::new(start, close.span.end),
                    });
                }
                _ => return Ok(out),
            }
        }
    }

    // ---- cursor helpers ----

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.current().map(|t| t.kind)
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        self.pos += 1;
        token
    }

    fn skip_trivia(&mut self) {
        while matches!(
            self.peek_kind(),
            Some(TokenKind::Whitespace) | Some(TokenKind::Newline)
        ) {
            self.pos += 1;
        }
    }

    fn next_nontrivia_kind(&self, mut idx: usize) -> Option<TokenKind> {
        while let Some(token) = self.tokens.get(idx) {
            if matches!(token.kind, TokenKind::Whitespace | TokenKind::Newline) {
                idx += 1;
            } else {
                return Some(token.kind);
            }
        }
        None
    }

    fn previous_end(&self) -> usize {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].span.end
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, Error> {
        match self.current() {
            Some(token) if token.kind == kind => Ok(self.bump()),
            Some(token) => Err(Error::parse_with_span(
                format!("expected {what}, found '{}'", token.text),
                token.span,
            )),
            None => Err(Error::parse(format!("expected {what} at end of input"), None)),
        }
    }

    fn expect_reference(&mut self) -> Result<Token, Error> {
        match self.peek_kind() {
            Some(TokenKind::DollarRef) | Some(TokenKind::QuietRef) => Ok(self.bump()),
            Some(_) => {
                let token = self.tokens[self.pos].clone();
                Err(Error::parse_with_span(
                    format!("expected variable reference, found '{}'", token.text),
                    token.span,
                ))
            }
            None => Err(Error::parse(
                "expected variable reference at end of input",
                None,
            )),
        }
    }
}

fn binary(op: Token, left: CstExpr, right: CstExpr) -> CstExpr {
    CstExpr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
