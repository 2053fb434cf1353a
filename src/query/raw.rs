use std::sync::OnceLock;

use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::combinator::{all_consuming, map};
use nom::multi::many0;
use nom::{IResult, Parser};
use regex::Regex;

use crate::core::error::{Error, Result};
use crate::core::sql::Sql;
use crate::core::types::SqlValue;
use crate::query::types::ColumnMap;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token<'a> {
    Word(&'a str),
    Symbols(&'a str),
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn tokens(input: &str) -> IResult<&str, Vec<Token<'_>>> {
    many0(alt((
        map(take_while1(is_word), Token::Word),
        map(take_while1(|c: char| !is_word(c)), Token::Symbols),
    )))
    .parse(input)
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^((\d+(\.\d*)?)|(\.\d+))([eE][-+]?\d+)?$").expect("static regex"))
}

fn symbols_allowed(symbols: &str) -> bool {
    symbols.chars().all(|c| matches!(c, '+' | '-' | '*' | '/' | '^' | '(' | ')'))
        && !symbols.contains("--")
        && !symbols.contains("/*")
        && !symbols.contains("*/")
}

/// Compile a `$raw` arithmetic expression over this table's columns.
///
/// Whitespace is discarded; what remains must be column names, numeric
/// literals and the symbols `+ - * / ^ ( )`. Numbers are bound as parameters.
pub fn compile_raw(expr: &str, table: &str, columns: &ColumnMap) -> Result<Sql> {
    let compact: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(Error::query("Empty $raw expression"));
    }
    let (_, pieces) = all_consuming(tokens)
        .parse(compact.as_str())
        .map_err(|_| Error::query(format!("Invalid $raw expression {:?}", expr)))?;

    let mut out = Sql::default();
    for piece in pieces {
        match piece {
            Token::Word(word) if columns.contains_key(word) => out = out.ident(word),
            Token::Word(word) if number_re().is_match(word) => {
                let value = if word.contains(['e', 'E', '.']) {
                    word.parse::<f64>().map(SqlValue::Float)
                } else {
                    word.parse::<i64>()
                        .map(SqlValue::Int)
                        .or_else(|_| word.parse::<f64>().map(SqlValue::Float))
                };
                let value = value.map_err(|_| Error::query(format!("Invalid number {} in $raw", word)))?;
                out = out.param(value);
            }
            Token::Word(word) => {
                return Err(Error::query(format!("{} is not a column of {}", word, table)));
            }
            Token::Symbols(symbols) if symbols_allowed(symbols) => out = out.text(symbols),
            Token::Symbols(symbols) => {
                return Err(Error::query(format!("{} not allowed in $raw expression", symbols)));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::types::ColumnType;

    fn columns() -> ColumnMap {
        [("id", "bigint"), ("degree", "smallint"), ("r2", "smallint")]
            .into_iter()
            .map(|(n, t)| (n.to_string(), ColumnType::parse(t)))
            .collect()
    }

    #[test]
    fn arithmetic_over_columns() {
        let sql = compile_raw("2 * r2 + degree ^ 2", "nf_fields", &columns()).unwrap();
        assert_eq!(sql.to_string(), r#"%s*"r2"+"degree"^%s"#);
        assert_eq!(sql.params(), vec![&SqlValue::Int(2), &SqlValue::Int(2)]);
        let sql = compile_raw("(degree - 1.5e3)", "nf_fields", &columns()).unwrap();
        assert_eq!(sql.params(), vec![&SqlValue::Float(1500.0)]);
    }

    #[test]
    fn fails_closed() {
        let cols = columns();
        for bad in [
            "degree; DROP TABLE nf_fields",
            "degree -- comment",
            "degree /* x */",
            "degree, r2",
            "'text'",
            "conductor + 1",
            "pg_sleep(10)",
            "abs(degree)",
            "degree % 2",
            "1e",
            "",
        ] {
            assert!(compile_raw(bad, "nf_fields", &cols).is_err(), "{} accepted", bad);
        }
    }
}
