//! Lexical scanner locating `require` calls in Lua source.
//!
//! This is deliberately not a Lua parser: it recognizes the call shapes
//! `require("x")`, `require('x')`, `require "x"` and `require 'x'`, and skips
//! comments and string literals so that text inside them never matches.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_until, take_while, take_while1},
    character::complete::{anychar, char, multispace0, none_of},
    combinator::{map, opt, recognize, value},
    multi::many0_count,
    sequence::{delimited, pair, preceded},
};
use nom_locate::LocatedSpan;

/// Input type with position tracking.
pub type Span<'a> = LocatedSpan<&'a str>;

/// A `require` call found in source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequireCall {
    /// The string passed to `require`.
    pub reference: String,

    /// Byte offset of the `require` keyword.
    pub start: usize,

    /// Byte offset just past the call expression.
    pub end: usize,

    /// 1-based line of the call.
    pub line: u32,

    /// 1-based column of the call.
    pub column: usize,

    /// True when the call begins a statement rather than sitting inside an expression.
    pub statement: bool,
}

impl RequireCall {
    /// Length of the call expression in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Finds every `require` call in `source`, in textual order.
pub fn scan_requires(source: &str) -> Vec<RequireCall> {
    let mut input = Span::new(source);
    let mut calls = Vec::new();
    let mut prev: Option<char> = None;
    let mut prev_prev: Option<char> = None;
    let mut last_word: Option<&str> = None;

    while !input.fragment().is_empty() {
        if let Ok((rest, ())) = comment(input) {
            input = rest;
            continue;
        }

        if let Ok((rest, ())) = string_token(input) {
            (prev_prev, prev) = (prev, Some('"'));
            last_word = None;
            input = rest;
            continue;
        }

        if let Ok((rest, ident)) = identifier(input) {
            if *ident.fragment() == "require" && !is_member_access(prev, prev_prev) {
                if let Ok((after, reference)) = require_argument(rest) {
                    calls.push(RequireCall {
                        reference,
                        start: input.location_offset(),
                        end: after.location_offset(),
                        line: input.location_line(),
                        column: input.get_utf8_column(),
                        statement: starts_statement(prev, last_word),
                    });
                    (prev_prev, prev) = (prev, Some(')'));
                    last_word = None;
                    input = after;
                    continue;
                }
            }
            (prev_prev, prev) = (prev, Some('a'));
            last_word = Some(*ident.fragment());
            input = rest;
            continue;
        }

        match anychar::<Span, nom::error::Error<Span>>(input) {
            Ok((rest, c)) => {
                if !c.is_whitespace() {
                    (prev_prev, prev) = (prev, Some(c));
                    last_word = None;
                }
                input = rest;
            }
            Err(_) => break,
        }
    }

    calls
}

/// `obj.require(...)` and `obj:require(...)` are method calls, `a .. require(...)` is not.
fn is_member_access(prev: Option<char>, prev_prev: Option<char>) -> bool {
    match prev {
        Some(':') => true,
        Some('.') => prev_prev != Some('.'),
        _ => false,
    }
}

/// Keywords after which an expression follows.
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return", "and", "or", "not", "in", "until", "if", "elseif", "while", "local",
];

fn starts_statement(prev: Option<char>, last_word: Option<&str>) -> bool {
    match prev {
        None => true,
        Some(';' | ')' | ']' | '}' | '"') => true,
        Some('a') => !last_word.is_some_and(|w| EXPRESSION_KEYWORDS.contains(&w)),
        Some(c) => c.is_ascii_digit(),
    }
}

// ============================================================================
// Utility combinators
// ============================================================================

fn ws(input: Span) -> IResult<Span, Span> {
    multispace0(input)
}

/// Parses an identifier: [a-zA-Z_][a-zA-Z0-9_]*
fn identifier(input: Span) -> IResult<Span, Span> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

/// Parses a comment: `--` to end of line, or a long comment `--[==[ ... ]==]`.
fn comment(input: Span) -> IResult<Span, ()> {
    let (input, _) = tag("--").parse(input)?;
    alt((long_bracket, value((), take_while(|c| c != '\n')))).parse(input)
}

/// Parses any string literal without interpreting it.
fn string_token(input: Span) -> IResult<Span, ()> {
    alt((skip_quoted('"'), skip_quoted('\''), long_bracket)).parse(input)
}

/// Parses a long bracket `[==[ ... ]==]` with any level.
fn long_bracket(input: Span) -> IResult<Span, ()> {
    let (input, level) = delimited(char('['), many0_count(char('=')), char('[')).parse(input)?;
    let close = format!("]{}]", "=".repeat(level));
    let (input, _) = take_until(close.as_str()).parse(input)?;
    let (input, _) = tag(close.as_str()).parse(input)?;
    Ok((input, ()))
}

/// Skips a quoted string, accepting any escape sequence.
fn skip_quoted<'a>(quote: char) -> impl FnMut(Span<'a>) -> IResult<Span<'a>, ()> {
    move |input| {
        let stop: &str = if quote == '"' { "\\\"\n" } else { "\\'\n" };
        value(
            (),
            delimited(
                char(quote),
                many0_count(alt((
                    value((), preceded(char('\\'), anychar)),
                    value((), none_of(stop)),
                ))),
                char(quote),
            ),
        )
        .parse(input)
    }
}

/// Parses a quoted string and returns its unescaped contents.
fn quoted<'a>(quote: char) -> impl FnMut(Span<'a>) -> IResult<Span<'a>, String> {
    move |input| {
        let stop: &str = if quote == '"' { "\\\"\n" } else { "\\'\n" };
        delimited(
            char(quote),
            map(
                opt(escaped_transform(
                    none_of(stop),
                    '\\',
                    alt((
                        value('\\', char('\\')),
                        value('"', char('"')),
                        value('\'', char('\'')),
                        value('\n', char('n')),
                        value('\t', char('t')),
                    )),
                )),
                |s| s.unwrap_or_default(),
            ),
            char(quote),
        )
        .parse(input)
    }
}

fn string_argument(input: Span) -> IResult<Span, String> {
    alt((quoted('"'), quoted('\''))).parse(input)
}

/// Parses what follows the `require` keyword: `("x")` or `"x"`.
fn require_argument(input: Span) -> IResult<Span, String> {
    let (input, _) = ws(input)?;
    alt((
        delimited(
            pair(char('('), ws),
            string_argument,
            pair(ws, char(')')),
        ),
        string_argument,
    ))
    .parse(input)
}
