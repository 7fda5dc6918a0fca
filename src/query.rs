//! Query string → selection tree.
//
//  Grammar:
//
//  ```text
//  query      := '{' field_list '}' | field_list
//  field_list := field ( ',' field )*
//  field      := [ alias_name ':' ] source_key ( '@' directive )* [ '{' field_list '}' ]
//  directive  := name [ '(' arg_list ')' ]
//  arg        := name ':' ( string | number | true | false | identifier )
//  ```
//
//  Whitespace is insignificant. A malformed query fails hard here, before
//  a single input byte is processed.

use log::debug;
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, opt, recognize, value, verify},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, tuple},
    IResult,
};
use nom_supreme::error::ErrorTree;
use nom_supreme::final_parser::{final_parser, Location};

use crate::directive::{self, Directive};
use crate::error::SiftError;
use crate::selection::{Selection, SelectionNode};
use crate::value::{JsonValue, Number};

type PResult<'a, T> = IResult<&'a str, T, ErrorTree<&'a str>>;

/// Parse a selection string into the root selection node.
pub fn parse_query(input: &str) -> Result<SelectionNode, SiftError> {
    let mut parse = final_parser::<&str, Selection, ErrorTree<&str>, ErrorTree<Location>>(query);
    match parse(input) {
        Ok(sel) => Ok(SelectionNode::root(sel)),
        Err(tree) => Err(to_query_error(&tree)),
    }
}

fn to_query_error(tree: &ErrorTree<Location>) -> SiftError {
    let (message, location) = describe(tree);
    SiftError::InvalidQuery {
        message,
        line: location.line as u32,
        column: location.column as u32,
    }
}

fn describe(tree: &ErrorTree<Location>) -> (String, Location) {
    match tree {
        ErrorTree::Base { location, kind } => (kind.to_string(), *location),
        ErrorTree::Stack { base, .. } => describe(base),
        ErrorTree::Alt(alts) => match alts.first() {
            Some(first) => describe(first),
            None => ("malformed query".to_string(), Location { line: 1, column: 1 }),
        },
    }
}

fn query(input: &str) -> PResult<Selection> {
    let (input, _) = multispace0(input)?;
    let (input, sel) = alt((braced_field_list, field_list))(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, sel))
}

fn braced_field_list(input: &str) -> PResult<Selection> {
    delimited(
        char('{'),
        field_list,
        preceded(multispace0, char('}')),
    )(input)
}

fn field_list(input: &str) -> PResult<Selection> {
    let (input, fields) = separated_list1(preceded(multispace0, char(',')), field)(input)?;
    let mut sel = Selection::new();
    for (key, node) in fields {
        sel.insert(key, node);
    }
    Ok((input, sel))
}

fn field(input: &str) -> PResult<(String, SelectionNode)> {
    let (input, _) = multispace0(input)?;
    let (input, first) = identifier(input)?;
    let (input, renamed) = opt(preceded(
        tuple((multispace0, char(':'), multispace0)),
        identifier,
    ))(input)?;
    let (alias, key) = match renamed {
        Some(source) => (Some(first.to_string()), source),
        None => (None, first),
    };
    let (input, directives) = many0(preceded(multispace0, directive))(input)?;
    let (input, children) = opt(preceded(multispace0, braced_field_list))(input)?;

    // `@alias(name:"x")` is the suffix spelling of `x: key`.
    let alias = alias.or_else(|| {
        directives
            .iter()
            .find(|d| d.name == "alias")
            .and_then(|d| d.arg("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    });

    let node = if alias.is_none() && directives.is_empty() && children.is_none() {
        SelectionNode::Leaf
    } else {
        SelectionNode::node(alias, children, directives)
    };
    Ok((input, (key.to_string(), node)))
}

fn directive(input: &str) -> PResult<Directive> {
    let (input, _) = char('@')(input)?;
    let (input, name) = identifier(input)?;
    let (input, args) = opt(delimited(
        pair(char('('), multispace0),
        separated_list1(tuple((multispace0, char(','), multispace0)), arg),
        pair(multispace0, char(')')),
    ))(input)?;
    if !directive::is_known(name) {
        debug!("unknown directive '@{}' will act as identity", name);
    }
    Ok((input, Directive::new(name, args.unwrap_or_default())))
}

fn arg(input: &str) -> PResult<(String, JsonValue)> {
    separated_pair(
        map(identifier, str::to_string),
        tuple((multispace0, char(':'), multispace0)),
        arg_value,
    )(input)
}

fn arg_value(input: &str) -> PResult<JsonValue> {
    alt((
        map(string_literal, JsonValue::String),
        number_literal,
        map(identifier, |id| match id {
            "true" => JsonValue::Boolean(true),
            "false" => JsonValue::Boolean(false),
            "null" => JsonValue::Null,
            other => JsonValue::String(other.to_string()),
        }),
    ))(input)
}

fn identifier(input: &str) -> PResult<&str> {
    verify(
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        |s: &str| !s.starts_with(|c: char| c.is_ascii_digit()),
    )(input)
}

fn string_literal(input: &str) -> PResult<String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                take_while1(|c| c != '"' && c != '\\'),
                '\\',
                alt((
                    value('"', char('"')),
                    value('\\', char('\\')),
                    value('/', char('/')),
                    value('\n', char('n')),
                    value('\r', char('r')),
                    value('\t', char('t')),
                )),
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}

fn number_literal(input: &str) -> PResult<JsonValue> {
    let (input, text) = recognize(tuple((
        opt(char('-')),
        take_while1(|c: char| c.is_ascii_digit()),
        opt(pair(char('.'), take_while1(|c: char| c.is_ascii_digit()))),
    )))(input)?;
    let number = match text.parse::<i64>() {
        Ok(i) => Number::Integer(i),
        Err(_) => Number::Float(text.parse::<f64>().unwrap_or(0.0)),
    };
    Ok((input, JsonValue::Number(number)))
}
