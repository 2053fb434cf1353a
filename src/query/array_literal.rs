use nom::branch::alt;
use nom::bytes::complete::is_not;
use nom::character::complete::char;
use nom::combinator::{all_consuming, map};
use nom::multi::separated_list0;
use nom::sequence::delimited;
use nom::{IResult, Parser};

use crate::core::error::{Error, ErrorKind, Result};

/// One element of a PostgreSQL array literal such as `{1,"a b",NULL,{2,3}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayItem {
    Null,
    Text(String),
    Nested(Vec<ArrayItem>),
}

pub fn parse_array(text: &str) -> Result<Vec<ArrayItem>> {
    all_consuming(array)
        .parse(text.trim())
        .map(|(_, items)| items)
        .map_err(|e| Error::new(ErrorKind::Parse, format!("bad array literal {:?}: {}", text, e)))
}

fn array(input: &str) -> IResult<&str, Vec<ArrayItem>> {
    delimited(char('{'), separated_list0(char(','), item), char('}')).parse(input)
}

fn item(input: &str) -> IResult<&str, ArrayItem> {
    alt((
        map(array, ArrayItem::Nested),
        map(quoted, ArrayItem::Text),
        map(is_not(",}"), |s: &str| {
            let s = s.trim();
            if s.eq_ignore_ascii_case("null") {
                ArrayItem::Null
            } else {
                ArrayItem::Text(s.to_string())
            }
        }),
    ))
    .parse(input)
}

fn quoted(input: &str) -> IResult<&str, String> {
    let (rest, _) = char('"').parse(input)?;
    let mut out = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((&rest[i + 1..], out)),
            '\\' => match chars.next() {
                Some((_, escaped)) => out.push(escaped),
                None => break,
            },
            _ => out.push(c),
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Char)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> ArrayItem {
        ArrayItem::Text(s.to_string())
    }

    #[test]
    fn flat_and_nested() {
        assert_eq!(parse_array("{}").unwrap(), vec![]);
        assert_eq!(parse_array("{1,NULL,3}").unwrap(), vec![text("1"), ArrayItem::Null, text("3")]);
        assert_eq!(
            parse_array("{{1,2},{3,4}}").unwrap(),
            vec![
                ArrayItem::Nested(vec![text("1"), text("2")]),
                ArrayItem::Nested(vec![text("3"), text("4")]),
            ]
        );
    }

    #[test]
    fn quoted_elements_keep_separators() {
        assert_eq!(
            parse_array(r#"{"a,b","say \"hi\"","NULL"}"#).unwrap(),
            vec![text("a,b"), text("say \"hi\""), text("NULL")]
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_array("1,2").is_err());
        assert!(parse_array("{1,2").is_err());
    }
}
