use std::time::Instant;

use serde_json::{Map, Value};
use tracing::info;

use crate::connection::locks::LockScope;
use crate::connection::manager::ExecOptions;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::sql::Sql;
use crate::core::types::{ResultSet, SqlValue};
use crate::schema::catalog::MetaKind;
use crate::schema::relations::bounded_name;
use crate::schema::whitelist;
use crate::search::table::{SearchTable, TableDescriptor};
use crate::stats::engine::{json_cell, string_list};

/// An index as recorded in `meta_indexes`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    pub name: String,
    pub index_type: String,
    pub columns: Vec<String>,
    pub modifiers: Vec<Vec<String>>,
    pub storage_params: Map<String, Value>,
}

impl IndexDef {
    /// `CREATE INDEX` for this definition. Type, modifiers and parameter
    /// names are whitelisted before a definition is stored.
    pub fn create_statement(&self, name: &str, table: &str) -> Sql {
        let columns = Sql::join(
            ", ",
            self.columns.iter().enumerate().map(|(i, col)| {
                let mods = self.modifiers.get(i).filter(|m| !m.is_empty());
                match mods {
                    Some(mods) => Sql::identifier(col).text(" ").text(&mods.join(" ")),
                    None => Sql::identifier(col),
                }
            }),
        );
        let mut creator = Sql::format(
            "CREATE INDEX {} ON {} USING ",
            [Sql::identifier(name), Sql::identifier(table)],
        )
        .text(&self.index_type)
        .text(" (")
        .append(columns)
        .text(")");
        if !self.storage_params.is_empty() {
            let params = self
                .storage_params
                .iter()
                .map(|(key, value)| Sql::raw(key.as_str()).text(" = ").param(SqlValue::from_json(value)));
            creator = creator.text(" WITH (").append(Sql::join(", ", params)).text(")");
        }
        creator
    }
}

/// A constraint as recorded in `meta_constraints`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintDef {
    pub name: String,
    pub constraint_type: String,
    pub columns: Vec<String>,
    pub check_func: Option<String>,
}

impl ConstraintDef {
    pub fn create_statement(&self, name: &str, table: &str) -> Sql {
        let cols = Sql::identifiers(self.columns.iter().map(String::as_str));
        let table = Sql::identifier(table);
        match self.constraint_type.as_str() {
            "NOT NULL" => Sql::format("ALTER TABLE {} ALTER COLUMN {} SET NOT NULL", [table, cols]),
            "UNIQUE" => Sql::format(
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({}) WITH (fillfactor=100)",
                [table, Sql::identifier(name), cols],
            ),
            _ => Sql::format("ALTER TABLE {} ADD CONSTRAINT {} CHECK (", [table, Sql::identifier(name)])
                .text(self.check_func.as_deref().unwrap_or_default())
                .text("(")
                .append(cols)
                .text("))"),
        }
    }

    pub fn drop_statement(&self, name: &str, table: &str) -> Sql {
        match (self.constraint_type.as_str(), self.columns.first()) {
            ("NOT NULL", Some(col)) => Sql::format(
                "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL",
                [Sql::identifier(table), Sql::identifier(col)],
            ),
            _ => Sql::format("ALTER TABLE {} DROP CONSTRAINT {}", [Sql::identifier(table), Sql::identifier(name)]),
        }
    }

    /// The data table the constraint lives on.
    fn table(&self, d: &TableDescriptor) -> String {
        match self.columns.iter().find(|c| *c != "id") {
            Some(col) if d.is_extra_col(col) => d.extras_table(),
            _ => d.name.clone(),
        }
    }
}

/// Options for [`SearchTable::create_index`].
#[derive(Debug, Clone)]
pub struct NewIndex {
    pub columns: Vec<String>,
    pub index_type: String,
    pub modifiers: Option<Vec<Vec<String>>>,
    pub name: Option<String>,
    pub storage_params: Option<Map<String, Value>>,
}

impl NewIndex {
    pub fn new(columns: &[&str]) -> Self {
        NewIndex {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            index_type: "btree".to_string(),
            modifiers: None,
            name: None,
            storage_params: None,
        }
    }

    pub fn using(mut self, index_type: &str) -> Self {
        self.index_type = index_type.to_string();
        self
    }

    pub fn modifiers(mut self, modifiers: Vec<Vec<String>>) -> Self {
        self.modifiers = Some(modifiers);
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn storage(mut self, params: Map<String, Value>) -> Self {
        self.storage_params = Some(params);
        self
    }
}

/// `t_a_b`, `t_ab_cd_ef` or `t_abc` depending on how many columns there are.
pub fn default_name(table: &str, prefix: Option<&str>, columns: &[String], type_suffix: Option<&str>) -> String {
    let mut parts = vec![table.to_string()];
    parts.extend(prefix.map(str::to_string));
    if columns.len() <= 2 {
        parts.extend(columns.iter().cloned());
        parts.extend(type_suffix.map(str::to_string));
    } else if columns.len() <= 8 {
        parts.extend(columns.iter().map(|c| c.chars().take(2).collect::<String>()));
    } else {
        parts.push(columns.iter().filter_map(|c| c.chars().next()).collect());
    }
    parts.join("_")
}

fn counts_indexes(counts: &str) -> [(String, &'static [&'static str]); 2] {
    [
        (format!("{}_cols_vals_split", counts), &["cols", "values", "split"]),
        (format!("{}_cols_split", counts), &["cols", "split"]),
    ]
}

fn only_row(rs: ResultSet, what: &str, name: &str) -> Result<Vec<Option<String>>> {
    if rs.rows.len() > 1 {
        return Err(Error::consistency(format!("Duplicated rows for {} {}", what, name)));
    }
    rs.rows
        .into_iter()
        .next()
        .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("{} {} is not recorded", what, name)))
}

impl SearchTable {
    fn meta_filter(&self, kind: MetaKind) -> Sql {
        Sql::raw(" FROM ")
            .ident(kind.table())
            .text(" WHERE table_name = ")
            .param(SqlValue::text(self.name()))
    }

    fn run_silent(&self, sql: &Sql) -> Result<ResultSet> {
        self.conn.execute_with(sql, ExecOptions::silent())
    }

    fn index_from_row(row: &[Option<String>]) -> Result<IndexDef> {
        let row = row.to_vec();
        let modifiers = json_cell(&row, 3)?
            .as_array()
            .map(|lists| lists.iter().map(string_list).collect())
            .unwrap_or_default();
        Ok(IndexDef {
            name: row.first().cloned().flatten().unwrap_or_default(),
            index_type: row.get(1).cloned().flatten().unwrap_or_default(),
            columns: string_list(&json_cell(&row, 2)?),
            modifiers,
            storage_params: json_cell(&row, 4)?.as_object().cloned().unwrap_or_default(),
        })
    }

    fn constraint_from_row(row: &[Option<String>]) -> Result<ConstraintDef> {
        let row = row.to_vec();
        Ok(ConstraintDef {
            name: row.first().cloned().flatten().unwrap_or_default(),
            constraint_type: row.get(1).cloned().flatten().unwrap_or_default(),
            columns: string_list(&json_cell(&row, 2)?),
            check_func: row.get(3).cloned().flatten(),
        })
    }

    /// Indexes recorded in `meta_indexes`; not necessarily all built.
    pub fn list_indexes(&self) -> Result<Vec<IndexDef>> {
        let selecter = Sql::raw("SELECT index_name, type, columns, modifiers, storage_params")
            .append(self.meta_filter(MetaKind::Indexes));
        self.run_silent(&selecter)?.rows.iter().map(|r| Self::index_from_row(r)).collect()
    }

    /// Constraints recorded in `meta_constraints`; not necessarily all built.
    pub fn list_constraints(&self) -> Result<Vec<ConstraintDef>> {
        let selecter = Sql::raw("SELECT constraint_name, type, columns, check_func")
            .append(self.meta_filter(MetaKind::Constraints));
        self.run_silent(&selecter)?.rows.iter().map(|r| Self::constraint_from_row(r)).collect()
    }

    pub fn index_def(&self, name: &str) -> Result<IndexDef> {
        let selecter = Sql::raw("SELECT index_name, type, columns, modifiers, storage_params")
            .append(self.meta_filter(MetaKind::Indexes))
            .text(" AND index_name = ")
            .param(SqlValue::text(name));
        Self::index_from_row(&only_row(self.run_silent(&selecter)?, "Index", name)?)
    }

    pub fn constraint_def(&self, name: &str) -> Result<ConstraintDef> {
        let selecter = Sql::raw("SELECT constraint_name, type, columns, check_func")
            .append(self.meta_filter(MetaKind::Constraints))
            .text(" AND constraint_name = ")
            .param(SqlValue::text(name));
        Self::constraint_from_row(&only_row(self.run_silent(&selecter)?, "Constraint", name)?)
    }

    /// Reject reserved suffixes and names already taken in the catalog or the directory.
    fn check_index_name(&self, name: &str, kind: MetaKind) -> Result<()> {
        let label = if kind == MetaKind::Indexes { "Index" } else { "Constraint" };
        whitelist::check_restricted_suffix(name, label, false)?;
        if self.conn.relation_exists(name)? {
            return Err(Error::invalid_argument(format!(
                "{} name {} is invalid: a relation with that name already exists",
                label, name
            )));
        }
        let name_col = if kind == MetaKind::Indexes { "index_name" } else { "constraint_name" };
        let selecter = Sql::raw("SELECT 1")
            .append(self.meta_filter(kind))
            .text(" AND ")
            .ident(name_col)
            .text(" = ")
            .param(SqlValue::text(name));
        if self.run_silent(&selecter)?.rowcount() > 0 {
            return Err(Error::invalid_argument(format!(
                "{} name {} is invalid: it is already recorded in {}",
                label,
                name,
                kind.table()
            )));
        }
        Ok(())
    }

    /// Build an index on the search table and record it in `meta_indexes`.
    pub fn create_index(&self, spec: NewIndex) -> Result<String> {
        let start = Instant::now();
        let d = self.descriptor();
        let index_type = spec.index_type.to_lowercase();
        whitelist::check_index_type(&index_type)?;
        let modifiers = match spec.modifiers {
            Some(modifiers) => {
                if modifiers.len() != spec.columns.len() {
                    return Err(Error::invalid_argument("modifiers must have the same length as columns"));
                }
                for mods in &modifiers {
                    whitelist::check_modifiers(&index_type, mods)?;
                }
                modifiers
            }
            None if index_type == "gin" => spec
                .columns
                .iter()
                .map(|col| match d.col_type.get(col) {
                    Some(ty) if ty.is_jsonb() => vec!["jsonb_path_ops".to_string()],
                    Some(ty) if ty.array => vec!["array_ops".to_string()],
                    _ => Vec::new(),
                })
                .collect(),
            None => vec![Vec::new(); spec.columns.len()],
        };
        let storage_params = match spec.storage_params {
            Some(params) => {
                for key in params.keys() {
                    whitelist::check_storage_param(&index_type, key)?;
                }
                params
            }
            None if matches!(index_type.as_str(), "btree" | "hash" | "gist" | "spgist") => {
                let mut params = Map::new();
                params.insert("fillfactor".to_string(), Value::from(100));
                params
            }
            None => Map::new(),
        };
        for col in &spec.columns {
            if col != "id" && !d.is_search_col(col) {
                return Err(Error::query(format!("{} is not a search column of {}", col, d.name)));
            }
        }
        let type_suffix = (index_type != "btree").then_some(index_type.as_str());
        let name = spec
            .name
            .unwrap_or_else(|| default_name(&d.name, None, &spec.columns, type_suffix));
        let def = IndexDef { name: name.clone(), index_type, columns: spec.columns, modifiers, storage_params };

        self.conn.transaction(true, || {
            self.check_index_name(&name, MetaKind::Indexes)?;
            self.conn.execute(&def.create_statement(&name, &d.name))?;
            let inserter = Sql::raw(
                "INSERT INTO meta_indexes (index_name, table_name, type, columns, modifiers, storage_params) VALUES (",
            )
            .append(Sql::join(
                ", ",
                [
                    SqlValue::text(name.as_str()),
                    SqlValue::text(d.name.as_str()),
                    SqlValue::text(def.index_type.as_str()),
                    SqlValue::Json(Value::from(def.columns.clone())),
                    SqlValue::Json(Value::from(def.modifiers.clone())),
                    SqlValue::Json(Value::Object(def.storage_params.clone())),
                ]
                .into_iter()
                .map(Sql::placeholder),
            ))
            .text(")");
            self.run_silent(&inserter)?;
            Ok(())
        })?;
        info!(index = %name, table = %d.name, elapsed = start.elapsed().as_secs_f64(), "created index");
        Ok(name)
    }

    /// Drop the built index `name + suffix`; `permanent` also forgets it.
    pub fn drop_index(&self, name: &str, suffix: &str, permanent: bool) -> Result<()> {
        let start = Instant::now();
        self.conn.transaction(true, || {
            if permanent {
                let deleter = Sql::raw("DELETE")
                    .append(self.meta_filter(MetaKind::Indexes))
                    .text(" AND index_name = ")
                    .param(SqlValue::text(name));
                self.run_silent(&deleter)?;
            }
            self.conn.execute(&Sql::raw("DROP INDEX ").ident(&format!("{}{}", name, suffix)))?;
            Ok(())
        })?;
        info!(index = name, suffix, elapsed = start.elapsed().as_secs_f64(), "dropped index");
        Ok(())
    }

    /// Rebuild a recorded index on the table with `suffix`.
    pub fn restore_index(&self, name: &str, suffix: &str) -> Result<()> {
        let start = Instant::now();
        let def = self.index_def(name)?;
        let table = format!("{}{}", self.name(), suffix);
        self.conn.transaction(true, || {
            self.conn.rename_if_exists(name, suffix)?;
            self.conn.execute(&def.create_statement(&format!("{}{}", name, suffix), &table))?;
            Ok(())
        })?;
        info!(index = name, suffix, elapsed = start.elapsed().as_secs_f64(), "restored index");
        Ok(())
    }

    fn touching(&self, kind: MetaKind, columns: &[&str]) -> Result<Vec<String>> {
        let name_col = if kind == MetaKind::Indexes { "index_name" } else { "constraint_name" };
        let mut selecter = Sql::raw("SELECT ").ident(name_col).append(self.meta_filter(kind));
        if !columns.is_empty() {
            let tests = columns
                .iter()
                .map(|c| Sql::raw("columns @> ").param(SqlValue::Json(Value::from(*c))));
            selecter = selecter.text(" AND (").append(Sql::join(" OR ", tests)).text(")");
        }
        let rs = self.run_silent(&selecter)?;
        Ok(rs.rows.into_iter().filter_map(|r| r.into_iter().next().flatten()).collect())
    }

    /// Recorded indexes referencing any of `columns`, or all of them.
    pub fn indexes_touching(&self, columns: &[&str]) -> Result<Vec<String>> {
        self.touching(MetaKind::Indexes, columns)
    }

    pub fn constraints_touching(&self, columns: &[&str]) -> Result<Vec<String>> {
        self.touching(MetaKind::Constraints, columns)
    }

    /// Drop recorded indexes and constraints, or only those touching `columns`.
    pub fn drop_indexes(&self, columns: &[&str], suffix: &str) -> Result<()> {
        self.check_locks(suffix, LockScope::Index)?;
        self.conn.transaction(true, || {
            for name in self.indexes_touching(columns)? {
                self.drop_index(&name, suffix, false)?;
            }
            for name in self.constraints_touching(columns)? {
                self.drop_constraint(&name, suffix, false)?;
            }
            Ok(())
        })
    }

    pub fn restore_indexes(&self, columns: &[&str], suffix: &str) -> Result<()> {
        self.check_locks(suffix, LockScope::Index)?;
        self.conn.transaction(true, || {
            for name in self.indexes_touching(columns)? {
                self.restore_index(&name, suffix)?;
            }
            for name in self.constraints_touching(columns)? {
                self.restore_constraint(&name, suffix)?;
            }
            Ok(())
        })
    }

    fn pkey_common(&self, suffix: &str, restore: bool) -> Result<()> {
        let start = Instant::now();
        self.conn.transaction(true, || {
            for table in self.descriptor().data_tables() {
                let table = format!("{}{}", table, suffix);
                let pkey = format!("{}_pkey", table);
                let statement = if restore {
                    Sql::format(
                        "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY (id)",
                        [Sql::identifier(&table), Sql::identifier(&pkey)],
                    )
                } else {
                    Sql::format("ALTER TABLE {} DROP CONSTRAINT {}", [Sql::identifier(&table), Sql::identifier(&pkey)])
                };
                self.conn.execute(&statement)?;
            }
            Ok(())
        })?;
        let action = if restore { "built primary keys" } else { "dropped primary keys" };
        info!(table = %self.name(), suffix, elapsed = start.elapsed().as_secs_f64(), "{}", action);
        Ok(())
    }

    pub fn drop_pkeys(&self, suffix: &str) -> Result<()> {
        self.check_locks(suffix, LockScope::Index)?;
        self.pkey_common(suffix, false)
    }

    pub fn restore_pkeys(&self, suffix: &str) -> Result<()> {
        self.pkey_common(suffix, true)
    }

    /// Add a UNIQUE, CHECK or NOT NULL constraint and record it in `meta_constraints`.
    pub fn create_constraint(
        &self,
        columns: &[&str],
        constraint_type: &str,
        name: Option<&str>,
        check_func: Option<&str>,
    ) -> Result<String> {
        let start = Instant::now();
        let d = self.descriptor();
        let constraint_type = constraint_type.to_uppercase();
        whitelist::check_constraint_type(&constraint_type)?;
        if let Some(func) = check_func {
            whitelist::check_function(&self.conn.config().check_functions, func)?;
        }
        if check_func.is_some() != (constraint_type == "CHECK") {
            return Err(Error::invalid_argument("A check function is required exactly for CHECK constraints"));
        }
        if constraint_type == "NOT NULL" && columns.len() != 1 {
            return Err(Error::invalid_argument("NOT NULL constraints take exactly one column"));
        }
        let mut in_search = None;
        for col in columns.iter().filter(|c| **c != "id") {
            let search = if d.is_search_col(col) {
                true
            } else if d.is_extra_col(col) {
                false
            } else {
                return Err(Error::query(format!("{} is not a column of {}", col, d.name)));
            };
            if in_search.is_some_and(|s| s != search) {
                return Err(Error::invalid_argument("Cannot mix search and extra columns"));
            }
            in_search = Some(search);
        }
        if in_search.is_none() {
            return Err(Error::invalid_argument("A constraint needs a column other than id"));
        }
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| default_name(&d.name, Some("c"), &columns, None));
        let def = ConstraintDef {
            name: name.clone(),
            constraint_type,
            columns,
            check_func: check_func.map(str::to_string),
        };
        self.conn.transaction(true, || {
            self.check_index_name(&name, MetaKind::Constraints)?;
            self.conn.execute(&def.create_statement(&name, &def.table(&d)))?;
            let inserter = Sql::raw(
                "INSERT INTO meta_constraints (constraint_name, table_name, type, columns, check_func) VALUES (",
            )
            .append(Sql::join(
                ", ",
                [
                    SqlValue::text(name.as_str()),
                    SqlValue::text(d.name.as_str()),
                    SqlValue::text(def.constraint_type.as_str()),
                    SqlValue::Json(Value::from(def.columns.clone())),
                    def.check_func.clone().map_or(SqlValue::Null, SqlValue::Text),
                ]
                .into_iter()
                .map(Sql::placeholder),
            ))
            .text(")");
            self.run_silent(&inserter)?;
            Ok(())
        })?;
        info!(constraint = %name, table = %d.name, elapsed = start.elapsed().as_secs_f64(), "created constraint");
        Ok(name)
    }

    pub fn drop_constraint(&self, name: &str, suffix: &str, permanent: bool) -> Result<()> {
        let start = Instant::now();
        let def = self.constraint_def(name)?;
        let table = format!("{}{}", def.table(&self.descriptor()), suffix);
        self.conn.transaction(true, || {
            if permanent {
                let deleter = Sql::raw("DELETE")
                    .append(self.meta_filter(MetaKind::Constraints))
                    .text(" AND constraint_name = ")
                    .param(SqlValue::text(name));
                self.run_silent(&deleter)?;
            }
            self.conn.execute(&def.drop_statement(&format!("{}{}", name, suffix), &table))?;
            Ok(())
        })?;
        info!(constraint = name, suffix, elapsed = start.elapsed().as_secs_f64(), "dropped constraint");
        Ok(())
    }

    pub fn restore_constraint(&self, name: &str, suffix: &str) -> Result<()> {
        let start = Instant::now();
        let def = self.constraint_def(name)?;
        let table = format!("{}{}", def.table(&self.descriptor()), suffix);
        self.conn.transaction(true, || {
            self.conn.rename_if_exists(name, suffix)?;
            self.conn.execute(&def.create_statement(&format!("{}{}", name, suffix), &table))?;
            Ok(())
        })?;
        info!(constraint = name, suffix, elapsed = start.elapsed().as_secs_f64(), "restored constraint");
        Ok(())
    }

    pub fn drop_constraints(&self, columns: &[&str], suffix: &str) -> Result<()> {
        self.conn.transaction(true, || {
            for name in self.constraints_touching(columns)? {
                self.drop_constraint(&name, suffix, false)?;
            }
            Ok(())
        })
    }

    pub fn restore_constraints(&self, columns: &[&str], suffix: &str) -> Result<()> {
        self.conn.transaction(true, || {
            for name in self.constraints_touching(columns)? {
                self.restore_constraint(&name, suffix)?;
            }
            Ok(())
        })
    }

    /// The two btree indexes every counts table carries.
    pub fn create_counts_indexes(&self, suffix: &str, warning_only: bool) -> Result<()> {
        let counts = self.descriptor().counts_table();
        self.conn.transaction(true, || {
            for (base, columns) in counts_indexes(&counts) {
                let name = bounded_name(&base, suffix);
                if self.conn.relation_exists(&name)? {
                    if warning_only {
                        tracing::warn!(index = %name, "counts index already exists");
                        continue;
                    }
                    return Err(Error::invalid_state(format!("Relation {} already exists", name)));
                }
                let def = IndexDef {
                    name: base.clone(),
                    index_type: "btree".to_string(),
                    columns: columns.iter().map(|c| c.to_string()).collect(),
                    modifiers: Vec::new(),
                    storage_params: Map::new(),
                };
                self.conn.execute(&def.create_statement(&name, &format!("{}{}", counts, suffix)))?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn index_statements() {
        let def = IndexDef {
            name: "nf_fields_degree_disc".into(),
            index_type: "btree".into(),
            columns: vec!["degree".into(), "disc".into()],
            modifiers: vec![vec![], vec!["DESC".into(), "NULLS LAST".into()]],
            storage_params: json!({"fillfactor": 100}).as_object().unwrap().clone(),
        };
        assert_eq!(
            def.create_statement("nf_fields_degree_disc_tmp", "nf_fields_tmp").render(),
            r#"CREATE INDEX "nf_fields_degree_disc_tmp" ON "nf_fields_tmp" USING btree ("degree", "disc" DESC NULLS LAST) WITH (fillfactor = 100)"#
        );
    }

    #[test]
    fn constraint_statements() {
        let unique = ConstraintDef {
            name: "nf_c_label".into(),
            constraint_type: "UNIQUE".into(),
            columns: vec!["label".into()],
            check_func: None,
        };
        assert_eq!(
            unique.create_statement("nf_c_label", "nf").render(),
            r#"ALTER TABLE "nf" ADD CONSTRAINT "nf_c_label" UNIQUE ("label") WITH (fillfactor=100)"#
        );
        assert_eq!(unique.drop_statement("nf_c_label", "nf").render(), r#"ALTER TABLE "nf" DROP CONSTRAINT "nf_c_label""#);
        let not_null = ConstraintDef { constraint_type: "NOT NULL".into(), ..unique.clone() };
        assert_eq!(
            not_null.drop_statement("nf_c_label", "nf").render(),
            r#"ALTER TABLE "nf" ALTER COLUMN "label" DROP NOT NULL"#
        );
        let check = ConstraintDef { constraint_type: "CHECK".into(), check_func: Some("is_valid".into()), ..unique };
        assert_eq!(
            check.create_statement("nf_c_label", "nf").render(),
            r#"ALTER TABLE "nf" ADD CONSTRAINT "nf_c_label" CHECK (is_valid("label"))"#
        );
    }

    #[test]
    fn default_names() {
        let cols = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(default_name("nf", None, &cols(&["degree"]), Some("gin")), "nf_degree_gin");
        assert_eq!(default_name("nf", None, &cols(&["degree", "disc", "label"]), None), "nf_de_di_la");
        assert_eq!(
            default_name("nf", Some("c"), &cols(&["a", "b", "c", "d", "e", "f", "g", "h", "i"]), None),
            "nf_c_abcdefghi"
        );
    }
}
