//! Template lexer.
//!
//! Splits source text into literal text, comments and actions. The inside
//! of an action is tokenized with nom.
//!
//! ```text
//! SELECT * FROM t WHERE id = {{- .ID | printf "%d" }}
//! ──────────┬────────────────  ┬ ─┬─ ┬ ──┬─── ─┬──
//!           │                  │  │  │   │     └── String
//!           │                  │  │  │   └── Identifier
//!           │                  │  │  └── Pipe
//!           │                  │  └── Field
//!           │                  └── Left trim marker
//!           └── Text
//! ```

use std::str::CharIndices;

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{char, digit0, digit1, hex_digit1, one_of, satisfy},
    combinator::{map, not, opt, recognize, value},
    multi::{many0, many1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

/// A lexed piece of template source.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Item {
    Text { pos: usize, text: String },
    Comment { pos: usize, text: String },
    Action { pos: usize, tokens: Vec<Token> },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub pos: usize,
    /// Whitespace separates this token from the previous one.
    pub spaced: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Dot,
    Field(Vec<String>),
    Variable { name: String, fields: Vec<String> },
    Ident(String),
    Keyword(Keyword),
    Bool(bool),
    Nil,
    Number(String),
    Str { quoted: String, text: String },
    Pipe,
    Declare,
    Assign,
    Comma,
    LeftParen,
    RightParen,
}

impl TokenKind {
    /// Short description used in parse errors.
    pub fn describe(&self) -> String {
        let text = match self {
            TokenKind::Keyword(k) => return format!("<{}>", k.as_str()),
            TokenKind::Dot => ".".to_string(),
            TokenKind::Field(idents) => idents.iter().map(|i| format!(".{}", i)).collect(),
            TokenKind::Variable { name, fields } => {
                let mut s = name.clone();
                for f in fields {
                    s.push('.');
                    s.push_str(f);
                }
                s
            }
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Bool(b) => b.to_string(),
            TokenKind::Nil => "nil".to_string(),
            TokenKind::Number(text) => text.clone(),
            TokenKind::Str { quoted, .. } => quoted.clone(),
            TokenKind::Pipe => "|".to_string(),
            TokenKind::Declare => ":=".to_string(),
            TokenKind::Assign => "=".to_string(),
            TokenKind::Comma => ",".to_string(),
            TokenKind::LeftParen => "(".to_string(),
            TokenKind::RightParen => ")".to_string(),
        };
        format!("{:?}", text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Keyword {
    If,
    Else,
    End,
    Range,
    With,
    Define,
    Template,
    Block,
    Break,
    Continue,
}

impl Keyword {
    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::End => "end",
            Keyword::Range => "range",
            Keyword::With => "with",
            Keyword::Define => "define",
            Keyword::Template => "template",
            Keyword::Block => "block",
            Keyword::Break => "break",
            Keyword::Continue => "continue",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LexError {
    pub pos: usize,
    pub message: String,
}

impl LexError {
    fn new(pos: usize, message: impl Into<String>) -> Self {
        Self {
            pos,
            message: message.into(),
        }
    }
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// `{{- ` needs whitespace after the dash so `{{-3}}` stays a number.
fn has_left_trim(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some('-') && chars.next().is_some_and(is_space)
}

/// Lex `text` using the given action delimiters.
pub(crate) fn lex(text: &str, left: &str, right: &str) -> Result<Vec<Item>, LexError> {
    let mut items = Vec::new();
    let mut cursor = 0;
    let mut trim_next = false;

    loop {
        let Some(found) = text[cursor..].find(left) else {
            push_text(&mut items, text, cursor, text.len(), trim_next, false);
            break;
        };
        let open = cursor + found;
        let after = open + left.len();
        let trim_left = has_left_trim(&text[after..]);
        push_text(&mut items, text, cursor, open, trim_next, trim_left);

        let body = if trim_left { after + 2 } else { after };
        let (end, trim_right) = if text[body..].starts_with("/*") {
            lex_comment(&mut items, text, open, body, right)?
        } else {
            let start = if trim_left { after + 1 } else { after };
            lex_action(&mut items, text, open, start, right)?
        };
        cursor = end;
        trim_next = trim_right;
    }

    Ok(items)
}

fn push_text(
    items: &mut Vec<Item>,
    text: &str,
    start: usize,
    end: usize,
    trim_start: bool,
    trim_end: bool,
) {
    let mut chunk = &text[start..end];
    let mut pos = start;
    if trim_start {
        let trimmed = chunk.trim_start_matches(is_space);
        pos += chunk.len() - trimmed.len();
        chunk = trimmed;
    }
    if trim_end {
        chunk = chunk.trim_end_matches(is_space);
    }
    if !chunk.is_empty() {
        items.push(Item::Text {
            pos,
            text: chunk.to_string(),
        });
    }
}

/// Returns the offset after the closing delimiter and whether the text that
/// follows should be left-trimmed.
fn lex_comment(
    items: &mut Vec<Item>,
    text: &str,
    open: usize,
    body: usize,
    right: &str,
) -> Result<(usize, bool), LexError> {
    let inner = body + 2;
    let Some(close) = text[inner..].find("*/") else {
        return Err(LexError::new(open, "unclosed comment"));
    };
    let comment_end = inner + close + 2;
    let rest = &text[comment_end..];

    let (end, trim_right) = if let Some(after) = rest
        .strip_prefix(|c: char| is_space(c))
        .and_then(|r| r.strip_prefix('-'))
        .filter(|r| r.starts_with(right))
    {
        (text.len() - after.len() + right.len(), true)
    } else if rest.starts_with(right) {
        (comment_end + right.len(), false)
    } else {
        return Err(LexError::new(open, "comment ends before closing delimiter"));
    };

    items.push(Item::Comment {
        pos: open,
        text: text[inner..inner + close].to_string(),
    });
    Ok((end, trim_right))
}

fn lex_action(
    items: &mut Vec<Item>,
    text: &str,
    open: usize,
    start: usize,
    right: &str,
) -> Result<(usize, bool), LexError> {
    let mut tokens = Vec::new();
    let mut p = start;

    loop {
        let s = &text[p..];
        let after_ws = s.trim_start_matches(is_space);
        let ws = s.len() - after_ws.len();

        if ws > 0 && after_ws.starts_with('-') && after_ws[1..].starts_with(right) {
            p += ws + 1 + right.len();
            items.push(Item::Action { pos: open, tokens });
            return Ok((p, true));
        }
        if after_ws.starts_with(right) {
            p += ws + right.len();
            items.push(Item::Action { pos: open, tokens });
            return Ok((p, false));
        }
        if after_ws.is_empty() {
            return Err(LexError::new(open, "unclosed action"));
        }

        let token_pos = p + ws;
        match token(after_ws) {
            Ok((rest, kind)) => {
                tokens.push(Token {
                    kind,
                    pos: token_pos,
                    spaced: ws > 0 || tokens.is_empty(),
                });
                p = text.len() - rest.len();
            }
            Err(nom::Err::Failure(e)) if e.code == nom::error::ErrorKind::Escaped => {
                return Err(LexError::new(token_pos, "invalid syntax in quoted string"));
            }
            Err(_) => {
                let message = match after_ws.chars().next() {
                    Some('"') => "unterminated quoted string".to_string(),
                    Some('`') => "unterminated raw quoted string".to_string(),
                    Some(c) if c.is_ascii_digit() || c == '+' || c == '-' => {
                        format!("bad number syntax: {:?}", first_word(after_ws))
                    }
                    Some(c) => format!("unexpected {:?} in command", c.to_string()),
                    None => "unclosed action".to_string(),
                };
                return Err(LexError::new(token_pos, message));
            }
        }
    }
}

fn first_word(s: &str) -> &str {
    let end = s.find(|c: char| is_space(c)).unwrap_or(s.len());
    &s[..end]
}

/// Lex a single token inside an action.
fn token(input: &str) -> IResult<&str, TokenKind> {
    alt((
        value(TokenKind::Declare, tag(":=")),
        value(TokenKind::Pipe, char('|')),
        value(TokenKind::Assign, char('=')),
        value(TokenKind::Comma, char(',')),
        value(TokenKind::LeftParen, char('(')),
        value(TokenKind::RightParen, char(')')),
        number,
        field_or_dot,
        variable,
        raw_string,
        quoted_string,
        word,
    ))(input)
}

fn ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)
}

fn field_chain(input: &str) -> IResult<&str, Vec<String>> {
    many0(map(preceded(char('.'), ident), str::to_string))(input)
}

/// `.` or `.a.b`.
fn field_or_dot(input: &str) -> IResult<&str, TokenKind> {
    alt((
        map(many1(map(preceded(char('.'), ident), str::to_string)), TokenKind::Field),
        value(TokenKind::Dot, char('.')),
    ))(input)
}

/// `$`, `$x` or `$x.a.b`.
fn variable(input: &str) -> IResult<&str, TokenKind> {
    let (input, name) = recognize(preceded(
        char('$'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))(input)?;
    let (input, fields) = field_chain(input)?;
    Ok((
        input,
        TokenKind::Variable {
            name: name.to_string(),
            fields,
        },
    ))
}

fn exponent(input: &str) -> IResult<&str, &str> {
    recognize(tuple((one_of("eE"), opt(one_of("+-")), digit1)))(input)
}

/// Integers, hex integers and floats. A number may not run into letters.
fn number(input: &str) -> IResult<&str, TokenKind> {
    map(
        terminated(
            recognize(pair(
                opt(one_of("+-")),
                alt((
                    recognize(pair(tag_no_case("0x"), hex_digit1)),
                    recognize(tuple((digit1, opt(pair(char('.'), digit0)), opt(exponent)))),
                    recognize(tuple((char('.'), digit1, opt(exponent)))),
                )),
            )),
            not(satisfy(|c| c.is_alphanumeric() || c == '_' || c == '.')),
        ),
        |s: &str| TokenKind::Number(s.to_string()),
    )(input)
}

fn raw_string(input: &str) -> IResult<&str, TokenKind> {
    map(
        delimited(char('`'), take_while(|c| c != '`'), char('`')),
        |s: &str| TokenKind::Str {
            quoted: format!("`{}`", s),
            text: s.to_string(),
        },
    )(input)
}

/// A double-quoted string with Go escape sequences.
fn quoted_string(input: &str) -> IResult<&str, TokenKind> {
    let (rest, _) = char('"')(input)?;
    let escape_failure = || nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Escaped));
    let mut text = String::new();
    let mut chars = rest.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                let end = i + 1;
                return Ok((
                    &rest[end..],
                    TokenKind::Str {
                        quoted: input[..end + 1].to_string(),
                        text,
                    },
                ));
            }
            '\n' => break,
            '\\' => {
                let Some((_, esc)) = chars.next() else { break };
                let decoded = match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    'a' => '\x07',
                    'b' => '\x08',
                    'f' => '\x0c',
                    'v' => '\x0b',
                    '\\' => '\\',
                    '"' => '"',
                    '\'' => '\'',
                    'x' => take_radix(&mut chars, 2, 16).ok_or_else(escape_failure)?,
                    'u' => take_radix(&mut chars, 4, 16).ok_or_else(escape_failure)?,
                    'U' => take_radix(&mut chars, 8, 16).ok_or_else(escape_failure)?,
                    '0'..='7' => {
                        let rest_digits = take_digits(&mut chars, 2, 8).ok_or_else(escape_failure)?;
                        char::from_u32((esc as u32 - '0' as u32) * 64 + rest_digits)
                            .ok_or_else(escape_failure)?
                    }
                    _ => return Err(escape_failure()),
                };
                text.push(decoded);
            }
            c => text.push(c),
        }
    }

    Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Char)))
}

fn take_digits(chars: &mut CharIndices<'_>, n: usize, radix: u32) -> Option<u32> {
    let mut v = 0u32;
    for _ in 0..n {
        let (_, c) = chars.next()?;
        v = v * radix + c.to_digit(radix)?;
    }
    Some(v)
}

fn take_radix(chars: &mut CharIndices<'_>, n: usize, radix: u32) -> Option<char> {
    take_digits(chars, n, radix).and_then(char::from_u32)
}

/// Identifiers, keywords, booleans and `nil`.
fn word(input: &str) -> IResult<&str, TokenKind> {
    map(ident, |w: &str| match w {
        "if" => TokenKind::Keyword(Keyword::If),
        "else" => TokenKind::Keyword(Keyword::Else),
        "end" => TokenKind::Keyword(Keyword::End),
        "range" => TokenKind::Keyword(Keyword::Range),
        "with" => TokenKind::Keyword(Keyword::With),
        "define" => TokenKind::Keyword(Keyword::Define),
        "template" => TokenKind::Keyword(Keyword::Template),
        "block" => TokenKind::Keyword(Keyword::Block),
        "break" => TokenKind::Keyword(Keyword::Break),
        "continue" => TokenKind::Keyword(Keyword::Continue),
        "true" => TokenKind::Bool(true),
        "false" => TokenKind::Bool(false),
        "nil" => TokenKind::Nil,
        _ => TokenKind::Ident(w.to_string()),
    })(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let items = lex(src, "{{", "}}").unwrap();
        match items.as_slice() {
            [Item::Action { tokens, .. }] => tokens.iter().map(|t| t.kind.clone()).collect(),
            other => panic!("expected a single action, got {:?}", other),
        }
    }

    #[test]
    fn test_text_and_action() {
        let items = lex("SELECT {{.}} FROM t", "{{", "}}").unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(
            items[0],
            Item::Text {
                pos: 0,
                text: "SELECT ".to_string()
            }
        );
        assert!(matches!(&items[1], Item::Action { pos: 7, .. }));
        assert_eq!(
            items[2],
            Item::Text {
                pos: 12,
                text: " FROM t".to_string()
            }
        );
    }

    #[test]
    fn test_tokens() {
        assert_eq!(
            kinds(r#"{{$v := printf "~%s~" .Name | len}}"#),
            vec![
                TokenKind::Variable {
                    name: "$v".to_string(),
                    fields: vec![]
                },
                TokenKind::Declare,
                TokenKind::Ident("printf".to_string()),
                TokenKind::Str {
                    quoted: "\"~%s~\"".to_string(),
                    text: "~%s~".to_string()
                },
                TokenKind::Field(vec!["Name".to_string()]),
                TokenKind::Pipe,
                TokenKind::Ident("len".to_string()),
            ]
        );
    }

    #[test]
    fn test_numbers_and_keywords() {
        assert_eq!(
            kinds("{{if eq -3 1.5e3 0x1F .5}}"),
            vec![
                TokenKind::Keyword(Keyword::If),
                TokenKind::Ident("eq".to_string()),
                TokenKind::Number("-3".to_string()),
                TokenKind::Number("1.5e3".to_string()),
                TokenKind::Number("0x1F".to_string()),
                TokenKind::Number(".5".to_string()),
            ]
        );
    }

    #[test]
    fn test_variable_with_fields_and_chain_spacing() {
        let items = lex("{{$x.a.b (.).c}}", "{{", "}}").unwrap();
        let Item::Action { tokens, .. } = &items[0] else {
            panic!("expected action");
        };
        assert_eq!(
            tokens[0].kind,
            TokenKind::Variable {
                name: "$x".to_string(),
                fields: vec!["a".to_string(), "b".to_string()]
            }
        );
        assert_eq!(tokens[3].kind, TokenKind::RightParen);
        assert_eq!(tokens[4].kind, TokenKind::Field(vec!["c".to_string()]));
        assert!(!tokens[4].spaced);
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#"{{"a\tb\"c\x41é" `raw\n`}}"#),
            vec![
                TokenKind::Str {
                    quoted: r#""a\tb\"c\x41é""#.to_string(),
                    text: "a\tb\"cAé".to_string()
                },
                TokenKind::Str {
                    quoted: "`raw\\n`".to_string(),
                    text: "raw\\n".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_delimiter_inside_string() {
        assert_eq!(
            kinds(r#"{{"}}"}}"#),
            vec![TokenKind::Str {
                quoted: "\"}}\"".to_string(),
                text: "}}".to_string()
            }]
        );
    }

    #[test]
    fn test_trim_markers() {
        let items = lex("a  {{- . -}}  b", "{{", "}}").unwrap();
        assert_eq!(
            items[0],
            Item::Text {
                pos: 0,
                text: "a".to_string()
            }
        );
        assert_eq!(
            items[2],
            Item::Text {
                pos: 14,
                text: "b".to_string()
            }
        );
    }

    #[test]
    fn test_negative_number_is_not_trim() {
        assert_eq!(kinds("{{-3}}"), vec![TokenKind::Number("-3".to_string())]);
    }

    #[test]
    fn test_comments() {
        let items = lex("a {{/* note */}} b {{- /* x */ -}} c", "{{", "}}").unwrap();
        assert_eq!(
            items,
            vec![
                Item::Text {
                    pos: 0,
                    text: "a ".to_string()
                },
                Item::Comment {
                    pos: 2,
                    text: " note ".to_string()
                },
                Item::Text {
                    pos: 16,
                    text: " b".to_string()
                },
                Item::Comment {
                    pos: 19,
                    text: " x ".to_string()
                },
                Item::Text {
                    pos: 35,
                    text: "c".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_custom_delims() {
        let items = lex("<<.>> {{.}}", "<<", ">>").unwrap();
        assert!(matches!(&items[0], Item::Action { .. }));
        assert_eq!(
            items[1],
            Item::Text {
                pos: 5,
                text: " {{.}}".to_string()
            }
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(lex("{{", "{{", "}}").unwrap_err().message, "unclosed action");
        assert_eq!(
            lex("{{/* x", "{{", "}}").unwrap_err().message,
            "unclosed comment"
        );
        assert_eq!(
            lex("{{/* x */ .}}", "{{", "}}").unwrap_err().message,
            "comment ends before closing delimiter"
        );
        assert_eq!(
            lex("{{\"abc}}", "{{", "}}").unwrap_err().message,
            "unterminated quoted string"
        );
        assert_eq!(
            lex("{{#}}", "{{", "}}").unwrap_err().message,
            "unexpected \"#\" in command"
        );
    }
}
