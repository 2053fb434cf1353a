use std::fmt;

use crate::core::types::{quote_ident, SqlValue};

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Text(String),
    Param(SqlValue),
    Literal(SqlValue),
}

/// Composable SQL text with bound parameters kept in order.
///
/// Parameters display as `%s` and are inlined as escaped literals by
/// [`Sql::render`] right before execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sql {
    pieces: Vec<Piece>,
}

impl Sql {
    /// Trusted SQL text. Never pass caller input here.
    pub fn raw(text: impl Into<String>) -> Sql {
        Sql { pieces: vec![Piece::Text(text.into())] }
    }

    pub fn identifier(name: &str) -> Sql {
        Sql::raw(quote_ident(name))
    }

    pub fn placeholder(value: SqlValue) -> Sql {
        Sql { pieces: vec![Piece::Param(value)] }
    }

    /// A value rendered inline in both display and execution.
    pub fn literal(value: SqlValue) -> Sql {
        Sql { pieces: vec![Piece::Literal(value)] }
    }

    /// Fill each `{}` in `template` with the next fragment.
    pub fn format(template: &str, args: impl IntoIterator<Item = Sql>) -> Sql {
        let mut out = Sql::default();
        let mut args = args.into_iter();
        let mut parts = template.split("{}").peekable();
        while let Some(part) = parts.next() {
            out = out.text(part);
            if parts.peek().is_some() {
                if let Some(arg) = args.next() {
                    out = out.append(arg);
                }
            }
        }
        out
    }

    pub fn join(separator: &str, parts: impl IntoIterator<Item = Sql>) -> Sql {
        let mut out = Sql::default();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                out = out.text(separator);
            }
            out = out.append(part);
        }
        out
    }

    pub fn identifiers<'a>(names: impl IntoIterator<Item = &'a str>) -> Sql {
        Sql::join(", ", names.into_iter().map(Sql::identifier))
    }

    pub fn text(mut self, text: &str) -> Sql {
        if text.is_empty() {
            return self;
        }
        match self.pieces.last_mut() {
            Some(Piece::Text(prev)) => prev.push_str(text),
            _ => self.pieces.push(Piece::Text(text.to_string())),
        }
        self
    }

    pub fn ident(self, name: &str) -> Sql {
        self.text(&quote_ident(name))
    }

    pub fn param(mut self, value: SqlValue) -> Sql {
        self.pieces.push(Piece::Param(value));
        self
    }

    pub fn append(mut self, other: Sql) -> Sql {
        for piece in other.pieces {
            match piece {
                Piece::Text(t) => self = self.text(&t),
                other => self.pieces.push(other),
            }
        }
        self
    }

    pub fn push(&mut self, other: Sql) {
        let this = std::mem::take(self);
        *self = this.append(other);
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.iter().all(|p| matches!(p, Piece::Text(t) if t.is_empty()))
    }

    /// Bound parameters in placeholder order.
    pub fn params(&self) -> Vec<&SqlValue> {
        self.pieces
            .iter()
            .filter_map(|p| match p {
                Piece::Param(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    /// Statement text with every parameter inlined.
    ///
    /// Strings are quoted by doubling `'` only, which is safe while the
    /// server runs with `standard_conforming_strings = on` (the default since
    /// PostgreSQL 9.1) so backslashes in `'...'` are ordinary characters.
    /// Sessions opened by this crate set it explicitly; do not send rendered
    /// text over a connection where it may be off.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Text(t) => out.push_str(t),
                Piece::Param(v) | Piece::Literal(v) => out.push_str(&v.to_literal()),
            }
        }
        out
    }
}

impl fmt::Display for Sql {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for piece in &self.pieces {
            match piece {
                Piece::Text(t) => f.write_str(t)?,
                Piece::Param(_) => f.write_str("%s")?,
                Piece::Literal(v) => f.write_str(&v.to_literal())?,
            }
        }
        Ok(())
    }
}

impl From<&str> for Sql {
    fn from(text: &str) -> Sql {
        Sql::raw(text)
    }
}
