use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::core::error::{Error, Result};
use crate::core::sql::Sql;
use crate::core::types::SqlValue;

/// `" (DELIMITER 'c')"`, or nothing for the tab default.
pub fn delimiter_clause(sep: char) -> Sql {
    if sep == '\t' {
        Sql::default()
    } else {
        Sql::raw(" (DELIMITER ").append(Sql::literal(SqlValue::text(sep.to_string()))).text(")")
    }
}

/// Column names, then declared types, then a blank line.
pub fn header_lines(columns: &[(String, String)], sep: char) -> String {
    let sep = sep.to_string();
    let names: Vec<&str> = columns.iter().map(|(n, _)| n.as_str()).collect();
    let types: Vec<&str> = columns.iter().map(|(_, t)| t.as_str()).collect();
    format!("{}\n{}\n\n", names.join(&sep), types.join(&sep))
}

/// Split off and parse the three header lines of `text`.
pub fn parse_header(text: &str, sep: char) -> Result<(Vec<(String, String)>, &str)> {
    let mut rest = text;
    let mut next_line = || {
        let (line, tail) = rest.split_once('\n').unwrap_or((rest, ""));
        rest = tail;
        line.trim_end_matches('\r')
    };
    let names: Vec<String> = next_line().split(sep).map(|s| s.trim().to_string()).collect();
    let types: Vec<String> = next_line().split(sep).map(|s| s.trim().to_string()).collect();
    if !next_line().trim().is_empty() {
        return Err(Error::invalid_argument("The third line must be blank"));
    }
    if names.len() != types.len() {
        return Err(Error::invalid_argument(format!(
            "The first line specifies {} columns, while the second specifies {}",
            names.len(),
            types.len()
        )));
    }
    Ok((names.into_iter().zip(types).collect(), rest))
}

/// Compare a file header with the target table.
///
/// `table_columns` are the (name, type) pairs of the table and `expected`
/// the columns the file must provide. An `id` column is optional but must
/// come first as `bigint`. Returns the header names in file order.
pub fn check_header(
    header: &[(String, String)],
    table_columns: &[(String, String)],
    expected: &BTreeSet<String>,
    prohibit_missing: bool,
) -> Result<Vec<String>> {
    let mut expected = expected.clone();
    expected.remove("id");
    let known: BTreeSet<&str> = table_columns.iter().map(|(n, _)| n.as_str()).collect();
    if let Some(unknown) = expected.iter().find(|c| !known.contains(c.as_str())) {
        return Err(Error::invalid_argument(format!("{} is not a column of the target table", unknown)));
    }
    let mut body = header;
    if let Some(position) = header.iter().position(|(n, _)| n == "id") {
        if position != 0 {
            return Err(Error::invalid_argument("id must be the first column"));
        }
        if header[0].1 != "bigint" {
            return Err(Error::invalid_argument("id must be of type bigint"));
        }
        body = &header[1..];
    }
    let given: BTreeSet<String> = body.iter().map(|(n, _)| n.clone()).collect();
    let missing: Vec<&String> = expected.difference(&given).collect();
    let extra: Vec<&String> = given.difference(&expected).collect();
    let wrong_type: Vec<String> = body
        .iter()
        .filter_map(|(name, ty)| {
            let declared = table_columns.iter().find(|(n, _)| n == name).map(|(_, t)| t)?;
            (expected.contains(name) && declared != ty)
                .then(|| format!("{} should be {} instead of {}", name, declared, ty))
        })
        .collect();

    let mut problems = Vec::new();
    if !missing.is_empty() && prohibit_missing {
        problems.push(format!(
            "missing {}",
            missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        ));
    }
    if !extra.is_empty() {
        problems.push(format!("extra {}", extra.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")));
    }
    if !wrong_type.is_empty() {
        problems.push(format!("wrong type: {}", wrong_type.join(", ")));
    }
    if !problems.is_empty() {
        return Err(Error::invalid_argument(format!("Invalid header: {}", problems.join("; "))));
    }
    Ok(header.iter().map(|(n, _)| n.clone()).collect())
}

/// A delimited data file loaded into memory.
#[derive(Debug, Clone)]
pub struct DataFile {
    pub header: Option<Vec<(String, String)>>,
    pub body: Vec<u8>,
}

impl DataFile {
    pub fn read(path: &Path, sep: char, with_header: bool) -> Result<DataFile> {
        let text = fs::read_to_string(path)?;
        if with_header {
            let (header, body) = parse_header(&text, sep)?;
            Ok(DataFile { header: Some(header), body: body.as_bytes().to_vec() })
        } else {
            Ok(DataFile { header: None, body: text.into_bytes() })
        }
    }

    /// Only the header of a file, without reading the data rows.
    pub fn read_header(path: &Path, sep: char) -> Result<Vec<(String, String)>> {
        let mut text = String::new();
        let mut reader = BufReader::new(File::open(path)?);
        for _ in 0..3 {
            if reader.read_line(&mut text)? == 0 {
                break;
            }
        }
        Ok(parse_header(&text, sep)?.0)
    }

    /// Header column names, `id` included when the file carries it.
    pub fn names(&self) -> Vec<String> {
        self.header
            .as_ref()
            .map(|h| h.iter().map(|(n, _)| n.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_id(&self) -> bool {
        self.header.as_ref().is_some_and(|h| h.first().is_some_and(|(n, _)| n == "id"))
    }

    pub fn rows(&self) -> usize {
        self.body.split(|b| *b == b'\n').filter(|line| !line.is_empty()).count()
    }

    /// Each data row split on `sep`.
    pub fn lines(&self, sep: char) -> Vec<Vec<String>> {
        String::from_utf8_lossy(&self.body)
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| l.split(sep).map(str::to_string).collect())
            .collect()
    }

    pub fn write(path: &Path, header: Option<&[(String, String)]>, body: &[u8], sep: char) -> Result<()> {
        let mut out = Vec::with_capacity(body.len() + 256);
        if let Some(header) = header {
            out.extend_from_slice(header_lines(header, sep).as_bytes());
        }
        out.extend_from_slice(body);
        fs::write(path, out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect()
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn header_parses_and_renders() {
        let header = cols(&[("id", "bigint"), ("degree", "smallint")]);
        let text = format!("{}1|2\n2|5\n", header_lines(&header, '|'));
        let (parsed, body) = parse_header(&text, '|').unwrap();
        assert_eq!(parsed, header);
        assert_eq!(body, "1|2\n2|5\n");
        assert!(parse_header("a|b\nint\n\n", '|').is_err());
        assert!(parse_header("a\nint\nx\n", '|').is_err());
        assert_eq!(delimiter_clause('|').render(), " (DELIMITER '|')");
        assert!(delimiter_clause('\t').is_empty());
    }

    #[test]
    fn header_validation_reports_every_category() {
        let table = cols(&[("id", "bigint"), ("degree", "smallint"), ("label", "text"), ("disc", "numeric")]);
        let expected = set(&["degree", "label", "disc"]);
        let good = cols(&[("id", "bigint"), ("label", "text"), ("degree", "smallint"), ("disc", "numeric")]);
        assert_eq!(check_header(&good, &table, &expected, true).unwrap()[0], "id");

        let err = check_header(&cols(&[("degree", "integer"), ("zeta", "text")]), &table, &expected, true)
            .unwrap_err()
            .context;
        assert!(err.contains("missing disc, label"), "{}", err);
        assert!(err.contains("extra zeta"), "{}", err);
        assert!(err.contains("degree should be smallint instead of integer"), "{}", err);

        let partial = cols(&[("degree", "smallint")]);
        assert!(check_header(&partial, &table, &expected, false).is_ok());
        let late_id = cols(&[("degree", "smallint"), ("id", "bigint")]);
        assert!(check_header(&late_id, &table, &set(&["degree"]), true).is_err());
    }

    #[test]
    fn data_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nf.txt");
        let header = cols(&[("degree", "smallint")]);
        DataFile::write(&path, Some(&header), b"2\n5\n", '|').unwrap();
        let file = DataFile::read(&path, '|', true).unwrap();
        assert_eq!(file.names(), vec!["degree"]);
        assert_eq!(DataFile::read_header(&path, '|').unwrap(), header);
        assert!(!file.has_id());
        assert_eq!(file.rows(), 2);
        assert_eq!(file.lines('|'), vec![vec!["2".to_string()], vec!["5".to_string()]]);
    }
}
