// SPDX-License-Identifier: Apache-2.0 OR MIT
use crate::ast::Span;
use crate::error::Error;

/// A single lexed token: kind, raw source text and byte span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            text: text.into(),
            span,
        }
    }
}

/// Token kinds, ordered here roughly by match priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // literals
    StringLiteral,
    NumberLiteral,
    BoolLiteral,
    NullLiteral,
    // references
    DollarRef,
    QuietRef,
    InterpStart,
    // directive keywords
    If,
    ElseIf,
    Else,
    Set,
    ForEach,
    Break,
    Stop,
    Macro,
    Evaluate,
    Parse,
    Include,
    End,
    MacroCall,
    EscapedDirective,
    Hash,
    // operators
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    And,
    Or,
    Plus,
    Minus,
    Star,
    Slash,
    Mod,
    Not,
    Assign,
    Question,
    Range,
    // punctuation
    LCurly,
    RCurly,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Colon,
    Semicolon,
    // keyword separator inside #foreach
    InKeyword,
    // trivia and text
    Whitespace,
    Newline,
    Text,
    Identifier,
}

/// Directive names recognised after `#` and in escaped form, longest first so
/// `elseif` wins over `else`.
const DIRECTIVE_NAMES: &[(&str, TokenKind)] = &[
    ("elseif", TokenKind::ElseIf),
    ("evaluate", TokenKind::Evaluate),
    ("foreach", TokenKind::ForEach),
    ("include", TokenKind::Include),
    ("break", TokenKind::Break),
    ("macro", TokenKind::Macro),
    ("parse", TokenKind::Parse),
    ("else", TokenKind::Else),
    ("stop", TokenKind::Stop),
    ("set", TokenKind::Set),
    ("end", TokenKind::End),
    ("if", TokenKind::If),
];

/// Characters that end a literal text run when encountered.
const TEXT_STOP: &[char] = &['#', '$', '[', ']', '(', ')', '{', '}'];

/// Characters after which a literal text run may not start, unless the
/// character belonged to a variable-reference tail.
const CODE_LEADING: &[char] = &[
    '#', '$', '.', '(', '[', '{', '!', '=', '<', '>', '+', '-', '*', '/', '%', '?', ':', '&', '|',
    ',',
];

/// Tokenizes a full template source. Tokenization halts on the first
/// unmatched character, which is reported as a parse error with its span.
pub fn tokenize(source: &str) -> Result<Vec<Token>, Error> {
    let lexer = Lexer::new(source);
    lexer.run()
}

struct Lexer<'a> {
    src: &'a str,
    chars: Vec<char>,
    // byte offset of each char, plus one trailing entry for the end of input
    offsets: Vec<usize>,
}

enum Matched {
    Token(usize, TokenKind),
    Skip(usize),
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        let mut chars = Vec::new();
        let mut offsets = Vec::new();
        for (offset, ch) in src.char_indices() {
            offsets.push(offset);
            chars.push(ch);
        }
        offsets.push(src.len());
        Self {
            src,
            chars,
            offsets,
        }
    }

    fn run(&self) -> Result<Vec<Token>, Error> {
        let mut tokens = Vec::new();
        let mut pos = 0usize;
        while pos < self.chars.len() {
            match self.next_match(pos) {
                Some(Matched::Token(len, kind)) => {
                    let span = self.span(pos, pos + len);
                    tokens.push(Token::new(kind, self.slice(pos, pos + len), span));
                    pos += len;
                }
                Some(Matched::Skip(len)) => pos += len,
                None => {
                    return Err(Error::parse(
                        format!("unexpected character '{}'", self.chars[pos]),
                        Some(self.span(pos, pos + 1)),
                    ));
                }
            }
        }
        Ok(tokens)
    }

    fn slice(&self, start: usize, end: usize) -> &str {
        &self.src[self.offsets[start]..self.offsets[end]]
    }

    fn span(&self, start: usize, end: usize) -> Span {
        Span::new(self.offsets[start], self.offsets[end])
    }

    fn at(&self, pos: usize) -> Option<char> {
        self.chars.get(pos).copied()
    }

    /// Tries every token rule at `pos`, in priority order; first match wins.
    fn next_match(&self, pos: usize) -> Option<Matched> {
        if let Some(len) = self.match_line_comment(pos) {
            return Some(Matched::Skip(len));
        }
        if let Some(len) = self.match_block_comment(pos) {
            return Some(Matched::Skip(len));
        }
        if let Some(m) = self.match_interp_start(pos) {
            return Some(m);
        }
        if let Some(m) = self.match_escaped_directive(pos) {
            return Some(m);
        }
        if let Some(m) = self.match_directive(pos) {
            return Some(m);
        }
        if let Some(m) = self.match_macro_call(pos) {
            return Some(m);
        }
        if let Some(m) = self.match_reference(pos) {
            return Some(m);
        }
        if let Some(m) = self.match_string(pos) {
            return Some(m);
        }
        if let Some(m) = self.match_number(pos) {
            return Some(m);
        }
        if let Some(m) = self.match_word_literal(pos) {
            return Some(m);
        }
        if let Some(m) = self.match_operator(pos) {
            return Some(m);
        }
        if let Some(m) = self.match_punctuation(pos) {
            return Some(m);
        }
        if let Some(m) = self.match_in_keyword(pos) {
            return Some(m);
        }
        if let Some(m) = self.match_whitespace(pos) {
            return Some(m);
        }
        if let Some(m) = self.match_text(pos) {
            return Some(m);
        }
        if let Some(m) = self.match_identifier(pos) {
            return Some(m);
        }
        self.match_newline(pos)
    }

    fn match_line_comment(&self, pos: usize) -> Option<usize> {
        if self.at(pos) != Some('#') || self.at(pos + 1) != Some('#') {
            return None;
        }
        let mut i = pos + 2;
        while let Some(ch) = self.at(i) {
            if ch == '\r' || ch == '\n' {
                break;
            }
            i += 1;
        }
        // the comment swallows its terminating newline
        if self.at(i) == Some('\r') && self.at(i + 1) == Some('\n') {
            i += 2;
        } else if matches!(self.at(i), Some('\r') | Some('\n')) {
            i += 1;
        }
        Some(i - pos)
    }

    fn match_block_comment(&self, pos: usize) -> Option<usize> {
        if self.at(pos) != Some('#') || self.at(pos + 1) != Some('*') {
            return None;
        }
        let mut i = pos + 2;
        while i + 1 < self.chars.len() {
            if self.chars[i] == '*' && self.chars[i + 1] == '#' {
                return Some(i + 2 - pos);
            }
            i += 1;
        }
        None
    }

    fn match_interp_start(&self, pos: usize) -> Option<Matched> {
        if self.at(pos) == Some('$') && self.at(pos + 1) == Some('{') {
            Some(Matched::Token(2, TokenKind::InterpStart))
        } else {
            None
        }
    }

    fn match_escaped_directive(&self, pos: usize) -> Option<Matched> {
        let mut i = pos;
        while self.at(i) == Some('\\') && self.at(i + 1) == Some('\\') {
            i += 2;
        }
        if self.at(i) != Some('\\') || self.at(i + 1) != Some('#') {
            return None;
        }
        let name_len = self.directive_name_len(i + 2)?;
        Some(Matched::Token(
            i + 2 + name_len - pos,
            TokenKind::EscapedDirective,
        ))
    }

    fn match_directive(&self, pos: usize) -> Option<Matched> {
        if self.at(pos) != Some('#') {
            return None;
        }
        for (name, kind) in DIRECTIVE_NAMES {
            if self.word_at(pos + 1, name) {
                return Some(Matched::Token(1 + name.len(), *kind));
            }
        }
        None
    }

    fn match_macro_call(&self, pos: usize) -> Option<Matched> {
        if self.at(pos) != Some('#') {
            return None;
        }
        let first = self.at(pos + 1)?;
        if !(first.is_ascii_alphabetic() || first == '_') {
            return None;
        }
        let mut i = pos + 2;
        while matches!(self.at(i), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            i += 1;
        }
        Some(Matched::Token(i - pos, TokenKind::MacroCall))
    }

    fn match_reference(&self, pos: usize) -> Option<Matched> {
        if self.at(pos) != Some('$') {
            return None;
        }
        let (ident_at, kind) = if self.at(pos + 1) == Some('!') {
            (pos + 2, TokenKind::QuietRef)
        } else {
            (pos + 1, TokenKind::DollarRef)
        };
        let first = self.at(ident_at)?;
        if !is_ident_start(first) {
            return None;
        }
        let mut i = ident_at + 1;
        while matches!(self.at(i), Some(c) if is_ident_part(c)) {
            i += 1;
        }
        Some(Matched::Token(i - pos, kind))
    }

    /// String literals use doubled-quote escaping: `""` inside a
    /// double-quoted string (or `''` inside a single-quoted one) produces one
    /// quote character. Unterminated literals run to end of input.
    fn match_string(&self, pos: usize) -> Option<Matched> {
        let quote = self.at(pos)?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        let mut i = pos + 1;
        while let Some(ch) = self.at(i) {
            if ch == quote {
                if self.at(i + 1) == Some(quote) {
                    i += 2;
                    continue;
                }
                i += 1;
                break;
            }
            i += 1;
        }
        if i > pos + 1 {
            Some(Matched::Token(i - pos, TokenKind::StringLiteral))
        } else {
            None
        }
    }

    fn match_number(&self, pos: usize) -> Option<Matched> {
        let mut i = pos;
        if self.at(i) == Some('-') {
            i += 1;
        }
        let digits = self.digit_run(i);
        if digits == 0 {
            return None;
        }
        i += digits;
        if self.at(i) == Some('.') {
            let frac = self.digit_run(i + 1);
            if frac > 0 {
                i += 1 + frac;
            }
        }
        if matches!(self.at(i), Some('e') | Some('E')) {
            let mut j = i + 1;
            if matches!(self.at(j), Some('+') | Some('-')) {
                j += 1;
            }
            let exp = self.digit_run(j);
            if exp > 0 {
                i = j + exp;
            }
        }
        Some(Matched::Token(i - pos, TokenKind::NumberLiteral))
    }

    fn match_word_literal(&self, pos: usize) -> Option<Matched> {
        for (word, kind) in [
            ("true", TokenKind::BoolLiteral),
            ("false", TokenKind::BoolLiteral),
            ("null", TokenKind::NullLiteral),
        ] {
            if self.word_at(pos, word) && !self.prev_is_word(pos) {
                return Some(Matched::Token(word.len(), kind));
            }
        }
        None
    }

    fn match_operator(&self, pos: usize) -> Option<Matched> {
        let two: Option<TokenKind> = match (self.at(pos)?, self.at(pos + 1)) {
            ('<', Some('=')) => Some(TokenKind::Le),
            ('>', Some('=')) => Some(TokenKind::Ge),
            ('=', Some('=')) => Some(TokenKind::Eq),
            ('!', Some('=')) => Some(TokenKind::Ne),
            ('&', Some('&')) => Some(TokenKind::And),
            ('|', Some('|')) => Some(TokenKind::Or),
            _ => None,
        };
        if let Some(kind) = two {
            if self.in_expression_context(pos) {
                return Some(Matched::Token(2, kind));
            }
        }
        let single: Option<TokenKind> = match self.at(pos)? {
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '%' => Some(TokenKind::Mod),
            '!' if self.at(pos + 1) != Some('=') => Some(TokenKind::Not),
            '<' => Some(TokenKind::Lt),
            '>' => Some(TokenKind::Gt),
            '=' => Some(TokenKind::Assign),
            _ => None,
        };
        if let Some(kind) = single {
            if self.in_expression_context(pos) {
                return Some(Matched::Token(1, kind));
            }
        }
        // `?` and `..` carry no context gate
        if self.at(pos) == Some('?') {
            return Some(Matched::Token(1, TokenKind::Question));
        }
        if self.at(pos) == Some('.') && self.at(pos + 1) == Some('.') {
            return Some(Matched::Token(2, TokenKind::Range));
        }
        None
    }

    fn match_punctuation(&self, pos: usize) -> Option<Matched> {
        let kind = match self.at(pos)? {
            '{' => TokenKind::LCurly,
            '}' => TokenKind::RCurly,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '.' => TokenKind::Dot,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '#' => TokenKind::Hash,
            _ => return None,
        };
        Some(Matched::Token(1, kind))
    }

    fn match_in_keyword(&self, pos: usize) -> Option<Matched> {
        let mut i = pos;
        while matches!(self.at(i), Some(' ') | Some('\t')) {
            i += 1;
        }
        if i == pos {
            return None;
        }
        if !(self.at(i) == Some('i') && self.at(i + 1) == Some('n')) {
            return None;
        }
        let mut j = i + 2;
        while matches!(self.at(j), Some(' ') | Some('\t')) {
            j += 1;
        }
        if j == i + 2 {
            return None;
        }
        Some(Matched::Token(j - pos, TokenKind::InKeyword))
    }

    fn match_whitespace(&self, pos: usize) -> Option<Matched> {
        let mut i = pos;
        while matches!(self.at(i), Some(' ') | Some('\t')) {
            i += 1;
        }
        if i > pos {
            Some(Matched::Token(i - pos, TokenKind::Whitespace))
        } else {
            None
        }
    }

    /// The catch-all literal text run: consumes up to (not including) the
    /// next special character, refusing to start right after a code-leading
    /// character unless that character could end a variable reference.
    fn match_text(&self, pos: usize) -> Option<Matched> {
        let len = self.chars.len();
        let c0 = self.at(pos)?;
        if c0 == '#' || c0 == '$' {
            return None;
        }
        if pos > 0 {
            let p = self.chars[pos - 1];
            if p != '\\' {
                let after_var_ref = p.is_ascii_alphanumeric() || p == '_' || p == '$';
                if !after_var_ref && CODE_LEADING.contains(&p) {
                    return None;
                }
            }
        }
        let mut i = pos;
        while i < len {
            let ch = self.chars[i];
            if ch == '\\' && i + 1 < len {
                let next = self.chars[i + 1];
                if next == '#' || next == '\\' {
                    break;
                }
            }
            if TEXT_STOP.contains(&ch) {
                break;
            }
            if ch == ',' {
                // a comma directly followed by a space is literal punctuation
                if self.at(i + 1) == Some(' ') {
                    i += 2;
                }
                break;
            }
            i += 1;
        }
        if i == pos {
            return None;
        }
        // leave pure indentation runs to the whitespace token
        if self.chars[pos..i].iter().all(|c| *c == ' ' || *c == '\t') {
            return None;
        }
        Some(Matched::Token(i - pos, TokenKind::Text))
    }

    fn match_identifier(&self, pos: usize) -> Option<Matched> {
        let first = self.at(pos)?;
        if !is_ident_start(first) {
            return None;
        }
        let mut i = pos + 1;
        while matches!(self.at(i), Some(c) if is_ident_part(c)) {
            i += 1;
        }
        Some(Matched::Token(i - pos, TokenKind::Identifier))
    }

    fn match_newline(&self, pos: usize) -> Option<Matched> {
        if self.at(pos) == Some('\r') && self.at(pos + 1) == Some('\n') {
            return Some(Matched::Token(2, TokenKind::Newline));
        }
        if self.at(pos) == Some('\n') {
            return Some(Matched::Token(1, TokenKind::Newline));
        }
        None
    }

    fn digit_run(&self, pos: usize) -> usize {
        let mut i = pos;
        while matches!(self.at(i), Some(c) if c.is_ascii_digit()) {
            i += 1;
        }
        i - pos
    }

    fn directive_name_len(&self, pos: usize) -> Option<usize> {
        for (name, _) in DIRECTIVE_NAMES {
            if self.word_at(pos, name) {
                return Some(name.len());
            }
        }
        None
    }

    /// Matches `word` at `pos` with a word boundary after it.
    fn word_at(&self, pos: usize, word: &str) -> bool {
        for (idx, ch) in word.chars().enumerate() {
            if self.at(pos + idx) != Some(ch) {
                return false;
            }
        }
        !matches!(self.at(pos + word.len()), Some(c) if is_word(c))
    }

    fn prev_is_word(&self, pos: usize) -> bool {
        pos > 0 && is_word(self.chars[pos - 1])
    }

    /// Decides whether `pos` sits inside an expression context (unclosed
    /// parentheses, braces or brackets when scanning backwards). Operators
    /// only tokenize inside expressions; in plain text they are literal.
    fn in_expression_context(&self, pos: usize) -> bool {
        let mut paren = 0i32;
        let mut brace = 0i32;
        let mut bracket = 0i32;
        let mut in_string = false;
        let mut string_char = '\0';

        let mut i = pos;
        while i > 0 {
            i -= 1;
            let ch = self.chars[i];

            if ch == '"' || ch == '\'' {
                if !in_string {
                    in_string = true;
                    string_char = ch;
                } else if ch == string_char && (i == 0 || self.chars[i - 1] != '\\') {
                    in_string = false;
                }
                continue;
            }
            if in_string {
                continue;
            }

            match ch {
                ')' => paren += 1,
                '(' => paren -= 1,
                '}' => brace += 1,
                '{' => brace -= 1,
                ']' => bracket += 1,
                '[' => bracket -= 1,
                _ => {}
            }

            if paren < 0 || brace < 0 || bracket < 0 {
                return true;
            }
        }
        false
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_part(ch: char) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}

fn is_word(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_references_and_text() {
        let tokens = tokenize("Hello $name!").unwrap();
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Text, TokenKind::DollarRef, TokenKind::Text]
        );
        assert_eq!(tokens[1].text, "$name");
        assert_eq!(tokens[2].text, "!");
    }

    #[test]
    fn quiet_reference_wins_over_dollar() {
        let tokens = tokenize("$!maybe").unwrap();
        assert_eq!(kinds(&tokens), vec![TokenKind::QuietRef]);
    }

    #[test]
    fn operators_only_match_inside_expressions() {
        let tokens = tokenize("1 + 2").unwrap();
        // outside any parentheses `+` is literal text
        assert!(!kinds(&tokens).contains(&TokenKind::Plus));

        let tokens = tokenize("#set($x = 1 + 2)").unwrap();
        assert!(kinds(&tokens).contains(&TokenKind::Plus));
        assert!(kinds(&tokens).contains(&TokenKind::Assign));
    }

    #[test]
    fn longest_operator_wins() {
        let tokens = tokenize("#if($a <= $b)x#end").unwrap();
        assert!(kinds(&tokens).contains(&TokenKind::Le));
        assert!(!kinds(&tokens).contains(&TokenKind::Lt));
    }

    #[test]
    fn directive_keywords_are_word_bounded() {
        let tokens = tokenize("#include('a')").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Include);

        let tokens = tokenize("#ifx").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::MacroCall);
        assert_eq!(tokens[0].text, "#ifx");
    }

    #[test]
    fn comments_are_skipped_with_their_newline() {
        let tokens = tokenize("a## gone\nb").unwrap();
        let joined: String = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(joined, "ab");

        let tokens = tokenize("a#* block\ncomment *#b").unwrap();
        let joined: String = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(joined, "ab");
    }

    #[test]
    fn comma_followed_by_space_stays_in_text() {
        let tokens = tokenize("one, two").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Text);
        assert_eq!(tokens[0].text, "one, ");
        assert_eq!(tokens[1].text, "two");
    }

    #[test]
    fn escaped_directive_is_single_token() {
        let tokens = tokenize("\\#end").unwrap();
        assert_eq!(kinds(&tokens), vec![TokenKind::EscapedDirective]);
    }

    #[test]
    fn string_literals_use_doubled_quote_escaping() {
        let tokens = tokenize("#set($x = \"a\"\"b\")").unwrap();
        let lit = tokens
            .iter()
            .find(|t| t.kind == TokenKind::StringLiteral)
            .unwrap();
        assert_eq!(lit.text, "\"a\"\"b\"");
    }

    #[test]
    fn in_separator_lexes_inside_foreach() {
        let tokens = tokenize("#foreach($i in [1..3])$i#end").unwrap();
        assert!(kinds(&tokens).contains(&TokenKind::InKeyword));
        assert!(kinds(&tokens).contains(&TokenKind::Range));
    }

    #[test]
    fn stray_dollar_degrades_to_identifier() {
        let tokens = tokenize("cost $5").unwrap();
        assert_eq!(kinds(&tokens), vec![TokenKind::Text, TokenKind::Identifier]);
        assert_eq!(tokens[1].text, "$5");
    }

    #[test]
    fn errors_on_unmatched_character() {
        let err = tokenize("#set($x = 1),@").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.to_string().contains("unexpected character"));
    }

    #[test]
    fn spans_are_byte_offsets() {
        let tokens = tokenize("ab$c").unwrap();
        assert_eq!(tokens[0].span, Span::new(0, 2));
        assert_eq!(tokens[1].span, Span::new(2, 4));
    }
}
