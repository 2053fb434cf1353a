//! Shared fixtures: a scripted backend seeded with one search table and the
//! metadata directories, and helpers for writing delimited data files.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use relstore::backend::scripted::ScriptedBackend;
use relstore::core::types::ResultSet;
use relstore::schema::catalog::MetaKind;
use relstore::{Config, Database, SearchTable};

pub const NF_COLUMNS: &[(&str, &str)] = &[
    ("id", "bigint"),
    ("label", "text"),
    ("degree", "smallint"),
    ("disc_abs", "numeric"),
];

pub const EXTRA_COLUMNS: &[(&str, &str)] = &[("id", "bigint"), ("zk", "jsonb")];

pub const COUNTS_COLUMNS: &[(&str, &str)] = &[
    ("cols", "jsonb"),
    ("values", "jsonb"),
    ("count", "bigint"),
    ("extra", "boolean"),
    ("split", "boolean"),
];

pub const STATS_COLUMNS: &[(&str, &str)] = &[
    ("cols", "jsonb"),
    ("stat", "text"),
    ("value", "numeric"),
    ("constraint_cols", "jsonb"),
    ("constraint_values", "jsonb"),
    ("threshold", "integer"),
];

pub struct Fixture {
    pub backend: ScriptedBackend,
    pub db: Database,
    pub name: String,
}

pub struct FixtureBuilder {
    name: String,
    has_extras: bool,
    record_counts: bool,
    id_ordered: bool,
    sort: Option<String>,
}

pub fn nf_fields() -> FixtureBuilder {
    FixtureBuilder {
        name: "nf_fields".to_string(),
        has_extras: false,
        record_counts: false,
        id_ordered: false,
        sort: None,
    }
}

fn flag(value: bool) -> Option<String> {
    Some(if value { "t" } else { "f" }.to_string())
}

impl FixtureBuilder {
    pub fn with_extras(mut self) -> Self {
        self.has_extras = true;
        self
    }

    pub fn recording_counts(mut self) -> Self {
        self.record_counts = true;
        self
    }

    pub fn sorted_by(mut self, sort: &str) -> Self {
        self.id_ordered = true;
        self.sort = Some(sort.to_string());
        self
    }

    pub fn build(self) -> Fixture {
        let backend = ScriptedBackend::new();
        for kind in MetaKind::ALL {
            backend.add_table(kind.table(), kind.columns());
            let mut history = kind.columns().to_vec();
            history.push(("version", "integer"));
            backend.add_table(&kind.history(), &history);
        }
        let name = self.name.clone();
        backend.add_rows(
            "meta_tables",
            vec![vec![
                Some(name.as_str()),
                self.sort.as_deref(),
                None,
                Some(if self.id_ordered { "t" } else { "f" }),
                Some("f"),
                Some(if self.has_extras { "t" } else { "f" }),
                Some("t"),
                Some("label"),
                Some("3"),
                Some("f"),
                Some("f"),
                Some("Number fields"),
                Some("{}"),
            ]],
        );

        backend.add_table(&name, NF_COLUMNS);
        backend.add_rows(
            &name,
            vec![
                vec![Some("1"), Some("2.2.5.1"), Some("2"), Some("5")],
                vec![Some("2"), Some("2.0.3.1"), Some("2"), Some("3")],
                vec![Some("3"), Some("3.1.23.1"), Some("3"), None],
            ],
        );
        if self.has_extras {
            let extras = format!("{}_extras", name);
            backend.add_table(&extras, EXTRA_COLUMNS);
            backend.add_rows(
                &extras,
                vec![
                    vec![Some("1"), Some("[1]")],
                    vec![Some("2"), Some("[1]")],
                    vec![Some("3"), Some("[3]")],
                ],
            );
        }
        backend.add_table(&format!("{}_counts", name), COUNTS_COLUMNS);
        backend.add_table(&format!("{}_stats", name), STATS_COLUMNS);

        describe_as(&backend, &name, self.sort.as_deref(), self.id_ordered, self.has_extras);

        let config = Config { record_counts: self.record_counts, ..Config::default() };
        let db = Database::with_connector(Box::new(backend.clone()), config).unwrap();
        backend.clear_log();
        Fixture { backend, db, name }
    }
}

impl Fixture {
    pub fn table(&self) -> Arc<SearchTable> {
        self.db.table(&self.name).unwrap()
    }

    pub fn rows(&self, table: &str) -> Vec<Vec<Option<String>>> {
        self.backend.table(table).map(|r| r.rows).unwrap_or_default()
    }

    pub fn exists(&self, table: &str) -> bool {
        self.backend.table(table).is_some()
    }

    /// Statements issued since the fixture was built, or since the last call.
    pub fn take_statements(&self) -> Vec<String> {
        let statements = self.backend.statements();
        self.backend.clear_log();
        statements
    }
}

/// Answer descriptor lookups for `name`, and registry loads with the same row.
pub fn describe_as(backend: &ScriptedBackend, name: &str, sort: Option<&str>, id_ordered: bool, has_extras: bool) {
    let row = vec![
        Some(name.to_string()),
        Some("label".to_string()),
        sort.map(str::to_string),
        None,
        flag(id_ordered),
        flag(false),
        flag(has_extras),
        flag(true),
        Some("3".to_string()),
        flag(false),
    ];
    let columns = [
        "name",
        "label_col",
        "sort",
        "count_cutoff",
        "id_ordered",
        "out_of_order",
        "has_extras",
        "stats_valid",
        "total",
        "include_nones",
    ];
    // Descriptor lookups select these columns, in this order
    backend.on(
        &format!(r#"^SELECT "name", "label_col", "sort", .* FROM "meta_tables"(?: WHERE name = '{}'| ORDER BY name)$"#, name),
        ResultSet::with_rows(columns.iter().map(|c| c.to_string()).collect(), vec![row]),
    );
}

pub fn single_column(name: &str, values: &[&str]) -> ResultSet {
    ResultSet::with_rows(
        vec![name.to_string()],
        values.iter().map(|v| vec![Some(v.to_string())]).collect(),
    )
}

/// Write a data file with the three header lines and `|`-separated rows.
pub fn write_data(dir: &Path, file: &str, header: &[(&str, &str)], rows: &[&str]) -> PathBuf {
    let names: Vec<&str> = header.iter().map(|(n, _)| *n).collect();
    let types: Vec<&str> = header.iter().map(|(_, t)| *t).collect();
    let mut text = format!("{}\n{}\n\n", names.join("|"), types.join("|"));
    for row in rows {
        text.push_str(row);
        text.push('\n');
    }
    let path = dir.join(file);
    fs::write(&path, text).unwrap();
    path
}

/// Two fresh number fields without ids.
pub fn fresh_fields(dir: &Path) -> PathBuf {
    write_data(
        dir,
        "nf_fields.txt",
        &[("label", "text"), ("degree", "smallint"), ("disc_abs", "numeric")],
        &["2.0.4.1|2|4", "2.2.8.1|2|8"],
    )
}
