//! S-expression reader: text to [`Entity`] trees.
//!
//! Supports integers, reals, `#t`/`#f`, characters (`#\a`, `#\space`,
//! `#\newline`, `#\tab`), escaped strings, symbols, proper and dotted
//! lists, `'x` quote shorthand, and `;` line comments. Nesting depth is
//! limited by [`MAX_PARSE_DEPTH`] to keep the reader's own recursion
//! bounded.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{opt, recognize, value},
    error::ErrorKind,
    sequence::pair,
};

use std::rc::Rc;

use crate::entity::{Entity, Number, cons, improper_from_slice, int, list_from_slice, sym};
use crate::{MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Allowed non-alphanumeric characters in symbol names
const SYMBOL_SPECIAL_CHARS: &str = "+-*/<>=!?_$";

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c)
}

/// Check if a string is a valid symbol name: non-empty, no leading digit,
/// no "-digit" prefix (that is a negative number)
fn is_valid_symbol(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        None => false,
        Some(first) => {
            if first.is_ascii_digit() {
                return false;
            }
            if first == '-'
                && let Some(second) = chars.next()
                && second.is_ascii_digit()
            {
                return false;
            }
            name.chars().all(is_symbol_char)
        }
    }
}

/// Atom boundary: whitespace, list punctuation, comment, or end of input
fn at_delimiter(input: &str) -> bool {
    match input.chars().next() {
        None => true,
        Some(c) => c.is_whitespace() || matches!(c, '(' | ')' | ';' | '\'' | '"'),
    }
}

/// Skip whitespace and `;` line comments
fn skip_ws(mut input: &str) -> &str {
    loop {
        input = input.trim_start();
        if let Some(rest) = input.strip_prefix(';') {
            input = match rest.find('\n') {
                Some(i) => &rest[i + 1..],
                None => "",
            };
        } else {
            return input;
        }
    }
}

fn fail(input: &str, code: ErrorKind) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, code))
}

/// Parse a decimal integer
fn parse_integer(input: &str) -> IResult<&str, Entity> {
    let (rest, number_str) = recognize(pair(
        opt(char('-')),
        take_while1(|c: char| c.is_ascii_digit()),
    ))
    .parse(input)?;
    if !at_delimiter(rest) {
        return Err(fail(input, ErrorKind::Digit));
    }
    match number_str.parse::<i64>() {
        Ok(n) => Ok((rest, int(n))),
        Err(_) => Err(fail(input, ErrorKind::Digit)),
    }
}

/// Parse a real number in `digits.digits` form
fn parse_real(input: &str) -> IResult<&str, Entity> {
    let (rest, number_str) = recognize((
        opt(char('-')),
        take_while1(|c: char| c.is_ascii_digit()),
        char('.'),
        take_while1(|c: char| c.is_ascii_digit()),
    ))
    .parse(input)?;
    if !at_delimiter(rest) {
        return Err(fail(input, ErrorKind::Float));
    }
    match number_str.parse::<f64>() {
        Ok(r) => Ok((rest, Entity::Number(Number::Real(r)))),
        Err(_) => Err(fail(input, ErrorKind::Float)),
    }
}

fn parse_number(input: &str) -> IResult<&str, Entity> {
    // real first so "1.5" is not read as 1 followed by garbage
    alt((parse_real, parse_integer)).parse(input)
}

fn parse_boolean(input: &str) -> IResult<&str, Entity> {
    let (rest, b) = alt((value(true, tag("#t")), value(false, tag("#f")))).parse(input)?;
    if !at_delimiter(rest) {
        return Err(fail(input, ErrorKind::Tag));
    }
    Ok((rest, Entity::Boolean(b)))
}

fn parse_character(input: &str) -> IResult<&str, Entity> {
    let (after_prefix, _) = tag("#\\").parse(input)?;
    for (name, c) in [("space", ' '), ("newline", '\n'), ("tab", '\t')] {
        if let Some(rest) = after_prefix.strip_prefix(name)
            && at_delimiter(rest)
        {
            return Ok((rest, Entity::Character(c)));
        }
    }
    let mut chars = after_prefix.chars();
    match chars.next() {
        Some(c) => Ok((chars.as_str(), Entity::Character(c))),
        None => Err(fail(input, ErrorKind::Char)),
    }
}

fn parse_string(input: &str) -> IResult<&str, Entity> {
    let (mut rest, _) = char('"').parse(input)?;
    let mut contents = String::new();
    loop {
        let mut chars = rest.chars();
        match chars.next() {
            None => return Err(fail(input, ErrorKind::Eof)),
            Some('"') => return Ok((chars.as_str(), Entity::Str(Rc::new(contents)))),
            Some('\\') => {
                match chars.next() {
                    Some('n') => contents.push('\n'),
                    Some('t') => contents.push('\t'),
                    Some('r') => contents.push('\r'),
                    Some('"') => contents.push('"'),
                    Some('\\') => contents.push('\\'),
                    _ => return Err(fail(input, ErrorKind::Escaped)),
                }
                rest = chars.as_str();
            }
            Some(c) => {
                contents.push(c);
                rest = chars.as_str();
            }
        }
    }
}

fn parse_symbol(input: &str) -> IResult<&str, Entity> {
    let (rest, name) = take_while1(is_symbol_char).parse(input)?;
    if !is_valid_symbol(name) {
        return Err(fail(input, ErrorKind::Tag));
    }
    Ok((rest, sym(name)))
}

/// Parse a list: proper, dotted, or empty
fn parse_list(input: &str, depth: usize) -> IResult<&str, Entity> {
    let (mut rest, _) = char('(').parse(input)?;
    let mut items = Vec::new();
    loop {
        rest = skip_ws(rest);
        if let Some(after) = rest.strip_prefix(')') {
            return Ok((after, list_from_slice(&items)));
        }
        // dotted tail: "." followed by a delimiter, exactly one trailing expr
        if let Some(after_dot) = rest.strip_prefix('.')
            && at_delimiter(after_dot)
        {
            if items.is_empty() {
                return Err(fail(rest, ErrorKind::Tag));
            }
            let (after_tail, tail) = parse_expr(skip_ws(after_dot), depth + 1)?;
            let closing = skip_ws(after_tail);
            return match closing.strip_prefix(')') {
                Some(after) => Ok((after, improper_from_slice(&items, tail))),
                None => Err(fail(closing, ErrorKind::Char)),
            };
        }
        if rest.is_empty() {
            return Err(fail(rest, ErrorKind::Eof));
        }
        let (after_item, item) = parse_expr(rest, depth + 1)?;
        items.push(item);
        rest = after_item;
    }
}

fn parse_quoted(input: &str, depth: usize) -> IResult<&str, Entity> {
    let (rest, _) = char('\'').parse(input)?;
    let (rest, quoted) = parse_expr(rest, depth + 1)?;
    Ok((rest, cons(sym("quote"), cons(quoted, Entity::Null))))
}

fn parse_expr(input: &str, depth: usize) -> IResult<&str, Entity> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    let input = skip_ws(input);
    match input.chars().next() {
        Some('(') => parse_list(input, depth),
        Some('\'') => parse_quoted(input, depth),
        Some('"') => parse_string(input),
        Some('#') => alt((parse_character, parse_boolean)).parse(input),
        _ => alt((parse_number, parse_symbol)).parse(input),
    }
}

/// Convert a nom error into the structured reader error
fn reader_error(input: &str, error: nom::Err<nom::error::Error<&str>>) -> ParseError {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            match e.code {
                ErrorKind::TooLarge => ParseError::from_message(
                    ParseErrorKind::TooDeeplyNested,
                    format!("expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                ),
                ErrorKind::Eof => ParseError::from_message(
                    ParseErrorKind::Incomplete,
                    "unexpected end of input",
                ),
                _ => {
                    if position < input.len() {
                        let found: String = input.chars().skip(position).take(10).collect();
                        ParseError::with_found(
                            ParseErrorKind::InvalidSyntax,
                            format!("invalid syntax at position {position}"),
                            found,
                        )
                    } else {
                        ParseError::from_message(
                            ParseErrorKind::Incomplete,
                            "unexpected end of input",
                        )
                    }
                }
            }
        }
        nom::Err::Incomplete(_) => {
            ParseError::from_message(ParseErrorKind::Incomplete, "incomplete input")
        }
    }
}

/// Parse exactly one expression; trailing content is an error.
pub fn parse_scheme(input: &str) -> Result<Entity, ParseError> {
    let start = skip_ws(input);
    if start.is_empty() {
        return Err(ParseError::from_message(
            ParseErrorKind::Incomplete,
            "empty input",
        ));
    }
    let (rest, expr) = parse_expr(start, 0).map_err(|e| reader_error(input, e))?;
    let rest = skip_ws(rest);
    if !rest.is_empty() {
        return Err(ParseError::with_found(
            ParseErrorKind::TrailingContent,
            "unexpected content after expression",
            rest.chars().take(10).collect::<String>(),
        ));
    }
    Ok(expr)
}

/// Parse a whole program: zero or more expressions.
pub fn parse_program(input: &str) -> Result<Vec<Entity>, ParseError> {
    let mut forms = Vec::new();
    let mut rest = skip_ws(input);
    while !rest.is_empty() {
        let (after, expr) = parse_expr(rest, 0).map_err(|e| reader_error(input, e))?;
        forms.push(expr);
        rest = skip_ws(after);
    }
    Ok(forms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::list_to_vec;

    fn parse(input: &str) -> Entity {
        parse_scheme(input).unwrap_or_else(|e| panic!("parse of {input:?} failed: {e:?}"))
    }

    #[test]
    fn parses_atoms() {
        assert_eq!(parse("42"), int(42));
        assert_eq!(parse("-17"), int(-17));
        assert_eq!(parse("2.5"), Entity::Number(Number::Real(2.5)));
        assert_eq!(parse("-0.5"), Entity::Number(Number::Real(-0.5)));
        assert_eq!(parse("#t"), Entity::Boolean(true));
        assert_eq!(parse("#f"), Entity::Boolean(false));
        assert_eq!(parse("#\\a"), Entity::Character('a'));
        assert_eq!(parse("#\\space"), Entity::Character(' '));
        assert_eq!(parse("#\\newline"), Entity::Character('\n'));
        assert_eq!(parse("#\\("), Entity::Character('('));
        assert_eq!(parse("hello"), sym("hello"));
        assert_eq!(parse("call/cc"), sym("call/cc"));
        assert_eq!(parse("set!"), sym("set!"));
        assert_eq!(parse("-"), sym("-"));
        assert_eq!(parse("<="), sym("<="));
    }

    #[test]
    fn parses_strings_with_escapes() {
        assert_eq!(parse("\"plain\""), Entity::Str(Rc::new("plain".into())));
        assert_eq!(
            parse("\"a\\\"b\\n\""),
            Entity::Str(Rc::new("a\"b\n".into()))
        );
        assert_eq!(parse("\"\""), Entity::Str(Rc::new(String::new())));
    }

    #[test]
    fn parses_lists() {
        assert_eq!(parse("()"), Entity::Null);
        assert_eq!(parse("(1 2 3)"), list_from_slice(&[int(1), int(2), int(3)]));
        assert_eq!(
            parse("(+ 1 (* 2 3))"),
            list_from_slice(&[
                sym("+"),
                int(1),
                list_from_slice(&[sym("*"), int(2), int(3)])
            ])
        );
        // whitespace and comments are insignificant
        assert_eq!(
            parse("( a ; a comment\n  b )"),
            list_from_slice(&[sym("a"), sym("b")])
        );
    }

    #[test]
    fn parses_dotted_pairs() {
        assert_eq!(parse("(a . b)"), cons(sym("a"), sym("b")));
        assert_eq!(
            parse("(a b . c)"),
            improper_from_slice(&[sym("a"), sym("b")], sym("c"))
        );
        // a dotted '() tail is just a proper list
        assert_eq!(parse("(a . ())"), list_from_slice(&[sym("a")]));
        // lambda rest-parameter shapes read as data
        let spec = parse("(x . rest)");
        assert!(list_to_vec(&spec).is_none());
    }

    #[test]
    fn quote_shorthand_expands() {
        assert_eq!(parse("'x"), list_from_slice(&[sym("quote"), sym("x")]));
        assert_eq!(
            parse("''x"),
            list_from_slice(&[
                sym("quote"),
                list_from_slice(&[sym("quote"), sym("x")])
            ])
        );
        assert_eq!(parse("'()"), list_from_slice(&[sym("quote"), Entity::Null]));
    }

    #[test]
    fn parse_program_reads_many_forms() {
        let forms = parse_program("(define x 1) ; setup\nx").unwrap();
        assert_eq!(forms.len(), 2);
        assert_eq!(forms[1], sym("x"));
        assert_eq!(parse_program("  ; nothing here\n").unwrap(), vec![]);
    }

    #[test]
    fn reports_errors() {
        // unterminated list
        let err = parse_scheme("(1 2").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Incomplete);
        // unterminated string
        let err = parse_scheme("\"abc").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Incomplete);
        // trailing content
        let err = parse_scheme("1 2").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::TrailingContent);
        // empty input
        let err = parse_scheme("   ").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Incomplete);
        // dotted tail must close
        assert!(parse_scheme("(a . b c)").is_err());
        // dot with nothing before it
        assert!(parse_scheme("(. b)").is_err());
    }

    #[test]
    fn rejects_too_deep_nesting() {
        let deep = "(".repeat(MAX_PARSE_DEPTH + 1) + "1" + &")".repeat(MAX_PARSE_DEPTH + 1);
        let err = parse_scheme(&deep).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::TooDeeplyNested);
    }

    #[test]
    fn numbers_and_symbols_disambiguate() {
        // "-5" is a number, "-" and "-x" are symbols
        assert_eq!(parse("-5"), int(-5));
        assert_eq!(parse("-x"), sym("-x"));
        // "5x" is neither a number nor a valid symbol
        assert!(parse_scheme("5x").is_err());
    }
}
