//! Evaluates rendered WHERE clauses over text rows with SQL's three-valued
//! logic. Covers comparisons, `= ANY(...)`, `IS [NOT] NULL`, jsonb
//! containment and the `AND`/`OR`/`NOT` connectives around them.

use std::cmp::Ordering;

use serde_json::Value;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::TextRow;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Number(f64),
    Text(String),
    Bool(bool),
    List(Vec<Literal>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Ne => ordering != Ordering::Equal,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Le => ordering != Ordering::Greater,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    IsNull(String, bool),
    Compare(String, Comparison, Literal),
    AnyOf(String, Vec<Literal>),
    Contains(String, Value),
    ContainedIn(String, Value),
}

impl Predicate {
    pub(crate) fn parse(text: &str) -> Result<Predicate> {
        let mut parser = Parser { text, pos: 0 };
        let predicate = parser.disjunction()?;
        parser.skip_ws();
        if parser.pos != text.len() {
            return Err(parser.unsupported());
        }
        Ok(predicate)
    }

    /// `None` stands for SQL NULL.
    pub(crate) fn eval(&self, columns: &[(String, String)], row: &TextRow) -> Result<Option<bool>> {
        Ok(match self {
            Predicate::And(parts) => {
                let mut outcome = Some(true);
                for part in parts {
                    match part.eval(columns, row)? {
                        Some(false) => return Ok(Some(false)),
                        None => outcome = None,
                        Some(true) => {}
                    }
                }
                outcome
            }
            Predicate::Or(parts) => {
                let mut outcome = Some(false);
                for part in parts {
                    match part.eval(columns, row)? {
                        Some(true) => return Ok(Some(true)),
                        None => outcome = None,
                        Some(false) => {}
                    }
                }
                outcome
            }
            Predicate::Not(inner) => inner.eval(columns, row)?.map(|b| !b),
            Predicate::IsNull(col, null) => Some(cell(columns, row, col)?.0.is_none() == *null),
            Predicate::Compare(col, op, literal) => match cell(columns, row, col)? {
                (None, _) => None,
                (Some(value), numeric) => compare(value, literal, numeric).map(|o| op.holds(o)),
            },
            Predicate::AnyOf(col, items) => match cell(columns, row, col)? {
                (None, _) => None,
                (Some(value), numeric) => {
                    Some(items.iter().any(|item| compare(value, item, numeric) == Some(Ordering::Equal)))
                }
            },
            Predicate::Contains(col, wanted) => document(columns, row, col)?.map(|doc| contains(&doc, wanted)),
            Predicate::ContainedIn(col, outer) => document(columns, row, col)?.map(|doc| contains(outer, &doc)),
        })
    }
}

fn numeric_type(ty: &str) -> bool {
    ["smallint", "integer", "bigint", "numeric", "real", "double precision"]
        .iter()
        .any(|t| ty.starts_with(t))
        && !ty.ends_with("[]")
}

/// The cell and whether its column compares numerically.
fn cell<'r>(columns: &[(String, String)], row: &'r TextRow, col: &str) -> Result<(Option<&'r str>, bool)> {
    let position = columns
        .iter()
        .position(|(c, _)| c == col)
        .ok_or_else(|| Error::new(ErrorKind::Database, format!("column \"{}\" does not exist", col)))?;
    let value = row.get(position).and_then(|v| v.as_deref());
    Ok((value, numeric_type(&columns[position].1)))
}

fn document(columns: &[(String, String)], row: &TextRow, col: &str) -> Result<Option<Value>> {
    match cell(columns, row, col)?.0 {
        None => Ok(None),
        Some(text) => serde_json::from_str(text)
            .map(Some)
            .map_err(|e| Error::new(ErrorKind::Database, format!("invalid input syntax for type json: {}", e))),
    }
}

fn compare(value: &str, literal: &Literal, numeric: bool) -> Option<Ordering> {
    match literal {
        Literal::Number(n) => value.parse::<f64>().ok()?.partial_cmp(n),
        Literal::Text(t) if numeric => value.parse::<f64>().ok()?.partial_cmp(&t.parse::<f64>().ok()?),
        Literal::Text(t) => Some(value.cmp(t.as_str())),
        Literal::Bool(b) => Some(matches!(value, "t" | "true").cmp(b)),
        Literal::List(_) => None,
    }
}

/// jsonb `@>`: every part of `inner` appears in `outer`.
fn contains(outer: &Value, inner: &Value) -> bool {
    match (outer, inner) {
        (Value::Object(o), Value::Object(i)) => i.iter().all(|(k, v)| o.get(k).is_some_and(|ov| contains(ov, v))),
        (Value::Array(o), Value::Array(i)) => i.iter().all(|v| o.iter().any(|ov| contains(ov, v))),
        (Value::Array(o), scalar) if !scalar.is_object() => o.iter().any(|ov| !ov.is_array() && contains(ov, scalar)),
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_ws(&mut self) {
        while self.rest().starts_with(' ') {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn unsupported(&self) -> Error {
        Error::new(ErrorKind::Database, format!("cannot evaluate WHERE clause near: {}", self.rest()))
    }

    fn disjunction(&mut self) -> Result<Predicate> {
        let mut parts = vec![self.conjunction()?];
        while self.eat("OR ") {
            parts.push(self.conjunction()?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { Predicate::Or(parts) })
    }

    fn conjunction(&mut self) -> Result<Predicate> {
        let mut parts = vec![self.unary()?];
        while self.eat("AND ") {
            parts.push(self.unary()?);
        }
        Ok(if parts.len() == 1 { parts.remove(0) } else { Predicate::And(parts) })
    }

    fn unary(&mut self) -> Result<Predicate> {
        if self.eat("NOT ") {
            return Ok(Predicate::Not(Box::new(self.unary()?)));
        }
        if self.eat("(") {
            let inner = self.disjunction()?;
            if !self.eat(")") {
                return Err(self.unsupported());
            }
            return Ok(inner);
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Predicate> {
        let column = self.identifier().ok_or_else(|| self.unsupported())?;
        if self.eat("IS NOT NULL") {
            return Ok(Predicate::IsNull(column, false));
        }
        if self.eat("IS NULL") {
            return Ok(Predicate::IsNull(column, true));
        }
        if self.eat("= ANY(") {
            let items = match self.literal()? {
                Literal::List(items) => items,
                Literal::Text(t) if t == "{}" => Vec::new(),
                _ => return Err(self.unsupported()),
            };
            if !self.eat(")") {
                return Err(self.unsupported());
            }
            return Ok(Predicate::AnyOf(column, items));
        }
        if self.eat("@>") {
            return Ok(Predicate::Contains(column, self.document()?));
        }
        if self.eat("<@") {
            return Ok(Predicate::ContainedIn(column, self.document()?));
        }
        let operators = [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("<>", Comparison::Ne),
            ("!=", Comparison::Ne),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
            ("=", Comparison::Eq),
        ];
        let Some(op) = operators.iter().find(|(token, _)| self.eat(token)).map(|(_, op)| *op) else {
            return Err(self.unsupported());
        };
        Ok(Predicate::Compare(column, op, self.literal()?))
    }

    fn document(&mut self) -> Result<Value> {
        match self.literal()? {
            Literal::Text(text) => serde_json::from_str(&text).map_err(|_| self.unsupported()),
            _ => Err(self.unsupported()),
        }
    }

    /// A quoted identifier.
    fn identifier(&mut self) -> Option<String> {
        self.skip_ws();
        let (body, len) = quoted(self.rest(), '"')?;
        self.pos += len;
        Some(body)
    }

    fn literal(&mut self) -> Result<Literal> {
        self.skip_ws();
        let literal = if let Some((body, len)) = quoted(self.rest(), '\'') {
            self.pos += len;
            Literal::Text(body)
        } else if self.eat("ARRAY[") {
            let mut items = Vec::new();
            if !self.eat("]") {
                loop {
                    items.push(self.literal()?);
                    if self.eat("]") {
                        break;
                    }
                    if !self.eat(",") {
                        return Err(self.unsupported());
                    }
                }
            }
            Literal::List(items)
        } else if self.eat("true") {
            Literal::Bool(true)
        } else if self.eat("false") {
            Literal::Bool(false)
        } else {
            let rest = self.rest();
            let len = rest
                .find(|c: char| !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')))
                .unwrap_or(rest.len());
            let number = rest[..len].parse::<f64>().map_err(|_| self.unsupported())?;
            self.pos += len;
            Literal::Number(number)
        };
        // Casts such as ::smallint[] leave the value alone
        if let Some(cast) = self.rest().strip_prefix("::") {
            let len = cast
                .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '[' | ']')))
                .unwrap_or(cast.len());
            self.pos += 2 + len;
        }
        Ok(literal)
    }
}

/// Body and byte length of a token quoted with `quote`, doubling to escape.
fn quoted(text: &str, quote: char) -> Option<(String, usize)> {
    let mut chars = text.char_indices();
    if chars.next()?.1 != quote {
        return None;
    }
    let mut body = String::new();
    let mut chars = chars.peekable();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            if chars.peek().is_some_and(|(_, next)| *next == quote) {
                chars.next();
                body.push(quote);
                continue;
            }
            return Some((body, i + 1));
        }
        body.push(c);
    }
    None
}
