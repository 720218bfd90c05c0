//! Reader for PostgreSQL's serialized node trees (`pg_node_tree`)
//!
//! Stored expressions (`pg_constraint.conbin`, `pg_index.indexprs`,
//! `pg_index.indpred`, `pg_rewrite.ev_action`) are kept in the text format
//! produced by `nodeToString()`:
//!
//! ```text
//! {OPEXPR :opno 531 :opfuncid 67 :opresulttype 16 :opretset false
//!  :opcollid 0 :inputcollid 950 :args ({VAR :varno 1 ...} {CONST ...})
//!  :location 24}
//! ```
//!
//! This module only rebuilds the generic shape (nodes, lists, scalars).
//! Giving meaning to tags and fields is the job of [`super::lower`].
//!
//! ## Token rules
//!
//! - Whitespace separates tokens; `(`, `)`, `{` and `}` are tokens on their own
//! - A backslash escapes the following character
//! - `<>` is a NULL pointer, `""` an empty string
//! - A token starting with an unescaped `"` is a quoted string value
//! - `(i ...)`, `(o ...)`, `(x ...)` and `(b ...)` are integer, OID and XID
//!   lists and bitmapsets
//! - Datum payloads are written as `<length> [ b0 b1 ... ]`

use super::{no_stack_check, NestingGuard};
use crate::error::{CollDepError, CollDepResult};

/// Generic value found in a serialized node tree
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// `<>`
    Null,
    /// Unquoted scalar, already unescaped (numbers, booleans, enum values, names)
    Token(String),
    /// Quoted string (`"abc"`), e.g. String nodes in column name lists
    Str(String),
    Node(RawNode),
    List(Vec<RawValue>),
    IntList(Vec<i64>),
    OidList(Vec<u32>),
    XidList(Vec<u32>),
    Bitmapset(Vec<i64>),
    /// Datum payload of a Const
    Datum(Vec<u8>),
}

/// A `{TAG :field value ...}` node
#[derive(Debug, Clone, PartialEq)]
pub struct RawNode {
    pub tag: String,
    pub fields: Vec<(String, RawValue)>,
}

impl RawNode {
    /// Value of the named field, if the writer emitted it
    pub fn field(&self, name: &str) -> Option<&RawValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Open(char),
    Close(char),
    Word(&'a str),
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    peeked: Option<(usize, Token<'a>)>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0, peeked: None }
    }

    /// Offset of the next token, for error messages
    fn offset(&self) -> usize {
        self.peeked.as_ref().map_or(self.pos, |(offset, _)| *offset)
    }

    fn peek(&mut self) -> Option<&Token<'a>> {
        if self.peeked.is_none() {
            self.peeked = self.scan();
        }
        self.peeked.as_ref().map(|(_, token)| token)
    }

    fn next(&mut self) -> Option<Token<'a>> {
        match self.peeked.take() {
            Some((_, token)) => Some(token),
            None => self.scan().map(|(_, token)| token),
        }
    }

    fn scan(&mut self) -> Option<(usize, Token<'a>)> {
        let bytes = self.input.as_bytes();

        while self.pos < bytes.len() && matches!(bytes[self.pos], b' ' | b'\n' | b'\t' | b'\r') {
            self.pos += 1;
        }
        if self.pos >= bytes.len() {
            return None;
        }

        let start = self.pos;
        match bytes[start] {
            b'(' | b'{' => {
                self.pos += 1;
                return Some((start, Token::Open(bytes[start] as char)));
            }
            b')' | b'}' => {
                self.pos += 1;
                return Some((start, Token::Close(bytes[start] as char)));
            }
            _ => {}
        }

        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b' ' | b'\n' | b'\t' | b'\r' | b'(' | b')' | b'{' | b'}' => break,
                // Escaped byte is part of the token, whatever it is
                b'\\' if self.pos + 1 < bytes.len() => self.pos += 2,
                _ => self.pos += 1,
            }
        }
        while self.pos < bytes.len() && !self.input.is_char_boundary(self.pos) {
            self.pos += 1;
        }
        Some((start, Token::Word(&self.input[start..self.pos])))
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn malformed(lexer: &Lexer<'_>, reason: impl std::fmt::Display) -> CollDepError {
    CollDepError::corrupt(
        "serialized expression",
        format!("{} at offset {}", reason, lexer.offset()),
    )
}

/// Parse one serialized node tree.
///
/// The whole input must be consumed: trailing tokens mean the text was not
/// produced by `nodeToString()`.
pub fn read_node_tree(input: &str) -> CollDepResult<RawValue> {
    read_node_tree_guarded(input, &mut NestingGuard::new(&no_stack_check))
}

/// [`read_node_tree`] with every nested node or list charged to `guard`
pub fn read_node_tree_guarded(input: &str, guard: &mut NestingGuard<'_>) -> CollDepResult<RawValue> {
    let mut lexer = Lexer::new(input);

    if lexer.peek().is_none() {
        return Err(malformed(&lexer, "empty node tree"));
    }

    let value = read_value(&mut lexer, guard)?;

    if lexer.peek().is_some() {
        return Err(malformed(&lexer, "trailing data after node tree"));
    }

    Ok(value)
}

fn read_value(lexer: &mut Lexer<'_>, guard: &mut NestingGuard<'_>) -> CollDepResult<RawValue> {
    match lexer.next() {
        Some(Token::Open('{')) => guard.nested(|guard| read_node(lexer, guard)).map(RawValue::Node),
        Some(Token::Open(_)) => guard.nested(|guard| read_list(lexer, guard)),
        Some(Token::Close(c)) => Err(malformed(lexer, format!("unexpected '{c}'"))),
        Some(Token::Word(word)) => read_scalar(lexer, word),
        None => Err(malformed(lexer, "unexpected end of node tree")),
    }
}

fn read_scalar(lexer: &mut Lexer<'_>, word: &str) -> CollDepResult<RawValue> {
    if word == "<>" {
        return Ok(RawValue::Null);
    }

    if let Some(quoted) = word.strip_prefix('"') {
        let inner = quoted
            .strip_suffix('"')
            .ok_or_else(|| malformed(lexer, format!("unterminated string {word}")))?;
        return Ok(RawValue::Str(unescape(inner)));
    }

    // "<length> [ bytes ]" is a datum payload
    if matches!(lexer.peek(), Some(Token::Word("["))) {
        let length: usize = word
            .parse()
            .map_err(|_| malformed(lexer, format!("invalid datum length {word}")))?;
        lexer.next();
        return read_datum(lexer, length);
    }

    Ok(RawValue::Token(unescape(word)))
}

fn read_datum(lexer: &mut Lexer<'_>, length: usize) -> CollDepResult<RawValue> {
    let mut bytes = Vec::with_capacity(length);
    loop {
        match lexer.next() {
            Some(Token::Word("]")) => break,
            Some(Token::Word(word)) => {
                // Bytes are printed as signed chars
                let byte: i16 = word
                    .parse()
                    .map_err(|_| malformed(lexer, format!("invalid datum byte {word}")))?;
                bytes.push(byte as u8);
            }
            _ => return Err(malformed(lexer, "unterminated datum")),
        }
    }

    if bytes.len() != length {
        return Err(malformed(
            lexer,
            format!("datum has {} bytes, header says {}", bytes.len(), length),
        ));
    }

    Ok(RawValue::Datum(bytes))
}

fn read_node(lexer: &mut Lexer<'_>, guard: &mut NestingGuard<'_>) -> CollDepResult<RawNode> {
    let tag = match lexer.next() {
        Some(Token::Word(word)) => unescape(word),
        _ => return Err(malformed(lexer, "node without a tag")),
    };

    let mut fields = Vec::new();
    loop {
        match lexer.next() {
            Some(Token::Close('}')) => break,
            Some(Token::Word(word)) if word.starts_with(':') => {
                let name = word[1..].to_string();
                let value = read_value(lexer, guard)?;
                fields.push((name, value));
            }
            Some(Token::Word(word)) => {
                return Err(malformed(lexer, format!("expected field name in {tag}, found {word}")));
            }
            Some(_) => return Err(malformed(lexer, format!("unbalanced brackets in {tag}"))),
            None => return Err(malformed(lexer, format!("unterminated {tag} node"))),
        }
    }

    Ok(RawNode { tag, fields })
}

fn read_list(lexer: &mut Lexer<'_>, guard: &mut NestingGuard<'_>) -> CollDepResult<RawValue> {
    let marker = match lexer.peek() {
        Some(Token::Word(word @ ("i" | "o" | "x" | "b"))) => Some(*word),
        _ => None,
    };

    if let Some(marker) = marker {
        lexer.next();
        let words = read_words(lexer)?;
        return match marker {
            "i" => parse_numbers(lexer, &words).map(RawValue::IntList),
            "b" => parse_numbers(lexer, &words).map(RawValue::Bitmapset),
            "o" => parse_numbers(lexer, &words).map(RawValue::OidList),
            _ => parse_numbers(lexer, &words).map(RawValue::XidList),
        };
    }

    let mut items = Vec::new();
    loop {
        match lexer.peek() {
            Some(Token::Close(')')) => {
                lexer.next();
                break;
            }
            Some(Token::Close(_)) => return Err(malformed(lexer, "unbalanced brackets in list")),
            Some(_) => items.push(read_value(lexer, guard)?),
            None => return Err(malformed(lexer, "unterminated list")),
        }
    }

    Ok(RawValue::List(items))
}

fn read_words<'a>(lexer: &mut Lexer<'a>) -> CollDepResult<Vec<&'a str>> {
    let mut words = Vec::new();
    loop {
        match lexer.next() {
            Some(Token::Close(')')) => return Ok(words),
            Some(Token::Word(word)) => words.push(word),
            _ => return Err(malformed(lexer, "unterminated scalar list")),
        }
    }
}

fn parse_numbers<T: std::str::FromStr>(lexer: &Lexer<'_>, words: &[&str]) -> CollDepResult<Vec<T>> {
    words
        .iter()
        .map(|word| {
            word.parse::<T>()
                .map_err(|_| malformed(lexer, format!("invalid number {word} in list")))
        })
        .collect()
}
