use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use regex::Regex;

use crate::connection::session::{Connector, Session};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{quote_ident, ResultSet, TextRow};

mod predicate;

use predicate::Predicate;

/// One table known to the scripted catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Relation {
    pub columns: Vec<(String, String)>,
    pub rows: Vec<TextRow>,
    pub indexes: BTreeSet<String>,
    pub constraints: BTreeSet<String>,
}

impl Relation {
    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|(c, _)| c == column)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub tables: BTreeMap<String, Relation>,
}

impl Catalog {
    fn owner_of_index(&self, index: &str) -> Option<String> {
        self.tables
            .iter()
            .find(|(_, r)| r.indexes.contains(index))
            .map(|(t, _)| t.clone())
    }

    fn owner_of_constraint(&self, constraint: &str) -> Option<String> {
        self.tables
            .iter()
            .find(|(_, r)| r.constraints.contains(constraint))
            .map(|(t, _)| t.clone())
    }

    fn relation_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name) || self.owner_of_index(name).is_some()
    }
}

struct Rule {
    pattern: Regex,
    response: ResultSet,
}

struct Fault {
    pattern: Regex,
    kind: ErrorKind,
    remaining: Option<usize>,
}

#[derive(Default)]
struct ScriptState {
    catalog: Catalog,
    snapshot: Option<Catalog>,
    rules: Vec<Rule>,
    faults: Vec<Fault>,
    log: Vec<String>,
    connections: usize,
    evaluate: bool,
}

impl ScriptState {
    fn begin(&mut self) {
        if self.snapshot.is_none() {
            self.snapshot = Some(self.catalog.clone());
        }
    }
}

/// In-process stand-in for PostgreSQL.
///
/// Records every statement, keeps a catalog of tables, indexes and
/// constraints that follows the DDL and COPY statements this crate issues,
/// answers catalog lookups from it, and otherwise replies from scripted
/// rules. Uncommitted catalog changes are undone on rollback.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        ScriptedBackend::default()
    }

    /// Seed a committed table.
    pub fn add_table(&self, name: &str, columns: &[(&str, &str)]) {
        let relation = Relation {
            columns: columns.iter().map(|(c, t)| (c.to_string(), t.to_string())).collect(),
            ..Relation::default()
        };
        self.state.lock().catalog.tables.insert(name.to_string(), relation);
    }

    pub fn add_rows(&self, table: &str, rows: Vec<Vec<Option<&str>>>) {
        let mut state = self.state.lock();
        if let Some(relation) = state.catalog.tables.get_mut(table) {
            relation
                .rows
                .extend(rows.into_iter().map(|r| r.into_iter().map(|c| c.map(str::to_string)).collect()));
        }
    }

    pub fn add_index(&self, table: &str, index: &str) {
        if let Some(relation) = self.state.lock().catalog.tables.get_mut(table) {
            relation.indexes.insert(index.to_string());
        }
    }

    /// Reply to statements matching `pattern`. Earlier rules win.
    pub fn on(&self, pattern: &str, response: ResultSet) {
        if let Ok(pattern) = Regex::new(pattern) {
            self.state.lock().rules.push(Rule { pattern, response });
        }
    }

    /// Answer plain `SELECT` and `COUNT(*)` statements on catalog tables from
    /// their rows, filtered by the WHERE clause. Rules still come first.
    pub fn evaluate_selects(&self) {
        self.state.lock().evaluate = true;
    }

    /// Fail every statement matching `pattern` with a database error.
    pub fn fail_on(&self, pattern: &str) {
        self.add_fault(pattern, ErrorKind::Database, None);
    }

    /// Fail every statement matching `pattern` as a missing privilege.
    pub fn deny_on(&self, pattern: &str) {
        self.add_fault(pattern, ErrorKind::Permission, None);
    }

    /// Drop the connection the next `times` statements matching `pattern` run.
    pub fn drop_connection_on(&self, pattern: &str, times: usize) {
        self.add_fault(pattern, ErrorKind::Connection, Some(times));
    }

    fn add_fault(&self, pattern: &str, kind: ErrorKind, remaining: Option<usize>) {
        if let Ok(pattern) = Regex::new(pattern) {
            self.state.lock().faults.push(Fault { pattern, kind, remaining });
        }
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    /// Committed-or-pending view of the catalog.
    pub fn catalog(&self) -> Catalog {
        self.state.lock().catalog.clone()
    }

    pub fn table(&self, name: &str) -> Option<Relation> {
        self.state.lock().catalog.tables.get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.state.lock().catalog.tables.keys().cloned().collect()
    }
}

impl Connector for ScriptedBackend {
    fn connect(&self) -> Result<Box<dyn Session>> {
        let mut state = self.state.lock();
        // A dropped session loses whatever it had not committed
        if let Some(snapshot) = state.snapshot.take() {
            state.catalog = snapshot;
        }
        state.connections += 1;
        Ok(Box::new(ScriptedSession { state: Arc::clone(&self.state), closed: false }))
    }
}

pub struct ScriptedSession {
    state: Arc<Mutex<ScriptState>>,
    closed: bool,
}

pub const SCRIPTED_PID: i32 = 4242;

impl ScriptedSession {
    fn check(&mut self, state: &mut ScriptState, statement: &str) -> Result<()> {
        if self.closed {
            return Err(Error::new(ErrorKind::Connection, "connection already closed".into()));
        }
        let fault = state.faults.iter_mut().find(|f| {
            f.pattern.is_match(statement) && f.remaining.is_none_or(|n| n > 0)
        });
        if let Some(fault) = fault {
            if let Some(n) = fault.remaining.as_mut() {
                *n -= 1;
            }
            if fault.kind == ErrorKind::Connection {
                self.closed = true;
                return Err(Error::new(ErrorKind::Connection, "server closed the connection unexpectedly".into()));
            }
            return Err(Error::new(fault.kind, format!("scripted failure for {}", statement)));
        }
        Ok(())
    }
}

impl Session for ScriptedSession {
    fn execute(&mut self, statement: &str) -> Result<ResultSet> {
        let state_handle = Arc::clone(&self.state);
        let mut state = state_handle.lock();
        state.log.push(statement.to_string());
        self.check(&mut state, statement)?;
        state.begin();
        if let Some(rule) = state.rules.iter().find(|r| r.pattern.is_match(statement)) {
            return Ok(rule.response.clone());
        }
        if state.evaluate {
            if let Some(rs) = evaluate(&state.catalog, statement)? {
                return Ok(rs);
            }
        }
        apply(&mut state.catalog, statement)
    }

    fn copy_in(&mut self, statement: &str, data: &[u8]) -> Result<u64> {
        let state_handle = Arc::clone(&self.state);
        let mut state = state_handle.lock();
        state.log.push(statement.to_string());
        self.check(&mut state, statement)?;
        state.begin();
        copy_in(&mut state.catalog, statement, data)
    }

    fn copy_out(&mut self, statement: &str) -> Result<Vec<u8>> {
        let state_handle = Arc::clone(&self.state);
        let mut state = state_handle.lock();
        state.log.push(statement.to_string());
        self.check(&mut state, statement)?;
        state.begin();
        copy_out(&state.catalog, statement)
    }

    fn commit(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::new(ErrorKind::Connection, "connection already closed".into()));
        }
        self.state.lock().snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(snapshot) = state.snapshot.take() {
            state.catalog = snapshot;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn backend_pid(&self) -> i32 {
        SCRIPTED_PID
    }
}

const IDENT: &str = r#""((?:[^"]|"")+)""#;
const LIT: &str = r"'((?:[^']|'')*)'";

struct Patterns {
    ident: Regex,
    pg_tables: Regex,
    pg_class: Regex,
    index_on_table: Regex,
    index_table: Regex,
    indexes_of: Regex,
    constraint_on_table: Regex,
    constraint_table: Regex,
    constraints_of: Regex,
    columns_of: Regex,
    count_all: Regex,
    max_id: Regex,
    min_id: Regex,
    create_like: Regex,
    create_table: Regex,
    rename_table: Regex,
    rename_index: Regex,
    rename_constraint: Regex,
    add_constraint: Regex,
    drop_constraint: Regex,
    add_column: Regex,
    drop_column: Regex,
    create_index: Regex,
    drop_index: Regex,
    drop_table: Regex,
    copy_in: Regex,
    copy_out_table: Regex,
    copy_out_select: Regex,
    select_rows: Regex,
    count_where: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: String| Regex::new(&p).expect("static regex");
        Patterns {
            ident: re(IDENT.to_string()),
            pg_tables: re(format!(r"^SELECT 1 FROM pg_tables WHERE tablename = {LIT}$")),
            pg_class: re(format!(r"^SELECT 1 FROM pg_class WHERE relname = {LIT}$")),
            index_on_table: re(format!(
                r"^SELECT 1 FROM pg_indexes WHERE indexname = {LIT} AND tablename = {LIT}$"
            )),
            index_table: re(format!(r"^SELECT tablename FROM pg_indexes WHERE indexname = {LIT}$")),
            indexes_of: re(format!(r"^SELECT indexname FROM pg_indexes WHERE tablename = {LIT}$")),
            constraint_on_table: re(format!(
                r"information_schema\.table_constraints WHERE table_name = {LIT} AND constraint_name = {LIT}$"
            )),
            constraint_table: re(format!(
                r"^SELECT table_name FROM information_schema\.table_constraints WHERE constraint_name = {LIT}$"
            )),
            constraints_of: re(format!(r"pg_constraint con .* WHERE rel\.relname = {LIT}$")),
            columns_of: re(format!(
                r"FROM information_schema\.columns WHERE table_name = {LIT} ORDER BY ordinal_position$"
            )),
            count_all: re(format!(r"^SELECT COUNT\(\*\) FROM {IDENT}$")),
            max_id: re(format!(r"^SELECT MAX\(id\) FROM {IDENT}$")),
            min_id: re(format!(r"^SELECT MIN\(id\) FROM {IDENT}$")),
            create_like: re(format!(r"^CREATE TABLE {IDENT} \(LIKE {IDENT}\)$")),
            create_table: re(format!(r"(?s)^CREATE TABLE {IDENT} \((.*)\)$")),
            rename_table: re(format!(r"^ALTER TABLE {IDENT} RENAME TO {IDENT}$")),
            rename_index: re(format!(r"^ALTER INDEX {IDENT} RENAME TO {IDENT}$")),
            rename_constraint: re(format!(r"^ALTER TABLE {IDENT} RENAME CONSTRAINT {IDENT} TO {IDENT}$")),
            add_constraint: re(format!(r"^ALTER TABLE {IDENT} ADD CONSTRAINT {IDENT} (PRIMARY KEY|UNIQUE|CHECK)")),
            drop_constraint: re(format!(r"^ALTER TABLE {IDENT} DROP CONSTRAINT {IDENT}$")),
            add_column: re(format!(r"^ALTER TABLE {IDENT} ADD COLUMN {IDENT} (.+)$")),
            drop_column: re(format!(r"^ALTER TABLE {IDENT} DROP COLUMN {IDENT}$")),
            create_index: re(format!(r"^CREATE (?:UNIQUE )?INDEX {IDENT} ON {IDENT}")),
            drop_index: re(format!(r"^DROP INDEX {IDENT}$")),
            drop_table: re(format!(r"^DROP TABLE {IDENT}$")),
            copy_in: re(format!(r"^COPY {IDENT}(?: \((.*?)\))? FROM STDIN(?: \(DELIMITER '(.)'\))?$")),
            copy_out_table: re(format!(r"^COPY {IDENT}(?: \((.*?)\))? TO STDOUT(?: \(DELIMITER '(.)'\))?$")),
            copy_out_select: re(format!(
                r"^COPY \(SELECT (.*?) FROM {IDENT}(?: [^)]*)?\) TO STDOUT(?: \(DELIMITER '(.)'\))?$"
            )),
            select_rows: re(format!(
                r#"(?s)^SELECT (.+?) FROM {IDENT}(?: WHERE (.+?))?( ORDER BY "id")?(?: LIMIT (\d+)(?: OFFSET (\d+))?)?$"#
            )),
            count_where: re(format!(r"(?s)^SELECT COUNT\(\*\) FROM {IDENT} WHERE (.+)$")),
        }
    })
}

fn unquote_ident(raw: &str) -> String {
    raw.replace("\"\"", "\"")
}

fn unquote_lit(raw: &str) -> String {
    raw.replace("''", "'")
}

fn idents(list: &str) -> Vec<String> {
    patterns()
        .ident
        .captures_iter(list)
        .map(|c| unquote_ident(&c[1]))
        .collect()
}

fn single(value: impl Into<String>) -> ResultSet {
    ResultSet::with_rows(vec!["?column?".into()], vec![vec![Some(value.into())]])
}

fn column(name: &str, values: Vec<String>) -> ResultSet {
    ResultSet::with_rows(vec![name.into()], values.into_iter().map(|v| vec![Some(v)]).collect())
}

fn missing(table: &str) -> Error {
    Error::new(ErrorKind::Database, format!("relation \"{}\" does not exist", table))
}

fn split_top_level(defs: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in defs.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn apply(catalog: &mut Catalog, statement: &str) -> Result<ResultSet> {
    let p = patterns();
    let statement = statement.trim();

    if let Some(c) = p.pg_tables.captures(statement) {
        let found = catalog.tables.contains_key(&unquote_lit(&c[1]));
        return Ok(if found { single("1") } else { ResultSet::empty() });
    }
    if let Some(c) = p.pg_class.captures(statement) {
        let found = catalog.relation_exists(&unquote_lit(&c[1]));
        return Ok(if found { single("1") } else { ResultSet::empty() });
    }
    if let Some(c) = p.index_on_table.captures(statement) {
        let found = catalog.owner_of_index(&unquote_lit(&c[1])) == Some(unquote_lit(&c[2]));
        return Ok(if found { single("1") } else { ResultSet::empty() });
    }
    if let Some(c) = p.index_table.captures(statement) {
        let owner = catalog.owner_of_index(&unquote_lit(&c[1]));
        return Ok(column("tablename", owner.into_iter().collect()));
    }
    if let Some(c) = p.indexes_of.captures(statement) {
        let indexes = catalog
            .tables
            .get(&unquote_lit(&c[1]))
            .map(|r| r.indexes.iter().cloned().collect())
            .unwrap_or_default();
        return Ok(column("indexname", indexes));
    }
    if let Some(c) = p.constraint_on_table.captures(statement) {
        let found = catalog.owner_of_constraint(&unquote_lit(&c[2])) == Some(unquote_lit(&c[1]));
        return Ok(if found { single("1") } else { ResultSet::empty() });
    }
    if let Some(c) = p.constraint_table.captures(statement) {
        let owner = catalog.owner_of_constraint(&unquote_lit(&c[1]));
        return Ok(column("table_name", owner.into_iter().collect()));
    }
    if let Some(c) = p.constraints_of.captures(statement) {
        let constraints = catalog
            .tables
            .get(&unquote_lit(&c[1]))
            .map(|r| r.constraints.iter().cloned().collect())
            .unwrap_or_default();
        return Ok(column("conname", constraints));
    }
    if let Some(c) = p.columns_of.captures(statement) {
        let rows = catalog
            .tables
            .get(&unquote_lit(&c[1]))
            .map(|r| r.columns.iter().map(|(n, t)| vec![Some(n.clone()), Some(t.clone())]).collect())
            .unwrap_or_default();
        return Ok(ResultSet::with_rows(vec!["column_name".into(), "udt_name".into()], rows));
    }
    if let Some(c) = p.count_all.captures(statement) {
        let table = unquote_ident(&c[1]);
        let relation = catalog.tables.get(&table).ok_or_else(|| missing(&table))?;
        return Ok(single(relation.rows.len().to_string()));
    }
    if let Some(c) = p.max_id.captures(statement).or_else(|| p.min_id.captures(statement)) {
        let table = unquote_ident(&c[1]);
        let relation = catalog.tables.get(&table).ok_or_else(|| missing(&table))?;
        let position = relation.position("id").unwrap_or(0);
        let ids = relation
            .rows
            .iter()
            .filter_map(|r| r.get(position).cloned().flatten())
            .filter_map(|v| v.parse::<i64>().ok());
        let value = if statement.starts_with("SELECT MAX") { ids.max() } else { ids.min() };
        return Ok(ResultSet::with_rows(vec!["id".into()], vec![vec![value.map(|v| v.to_string())]]));
    }
    if let Some(c) = p.create_like.captures(statement) {
        let (table, source) = (unquote_ident(&c[1]), unquote_ident(&c[2]));
        let columns = catalog.tables.get(&source).ok_or_else(|| missing(&source))?.columns.clone();
        create(catalog, &table, columns)?;
        return Ok(ResultSet::empty());
    }
    if let Some(c) = p.create_table.captures(statement) {
        let table = unquote_ident(&c[1]);
        let columns = split_top_level(&c[2])
            .iter()
            .filter_map(|def| {
                let def = def.trim();
                let m = p.ident.captures(def).filter(|m| m.get(0).is_some_and(|g| g.start() == 0))?;
                let rest = def[m.get(0)?.end()..].trim();
                let ty = rest.split(" NOT NULL").next().unwrap_or(rest).split(" DEFAULT").next().unwrap_or(rest);
                Some((unquote_ident(&m[1]), ty.trim().to_string()))
            })
            .collect();
        create(catalog, &table, columns)?;
        return Ok(ResultSet::empty());
    }
    if let Some(c) = p.rename_table.captures(statement) {
        let (from, to) = (unquote_ident(&c[1]), unquote_ident(&c[2]));
        if catalog.tables.contains_key(&to) {
            return Err(Error::new(ErrorKind::Database, format!("relation \"{}\" already exists", to)));
        }
        let relation = catalog.tables.remove(&from).ok_or_else(|| missing(&from))?;
        catalog.tables.insert(to, relation);
        return Ok(ResultSet::empty());
    }
    if let Some(c) = p.rename_index.captures(statement) {
        let (from, to) = (unquote_ident(&c[1]), unquote_ident(&c[2]));
        let owner = catalog.owner_of_index(&from).ok_or_else(|| missing(&from))?;
        if catalog.relation_exists(&to) {
            return Err(Error::new(ErrorKind::Database, format!("relation \"{}\" already exists", to)));
        }
        if let Some(relation) = catalog.tables.get_mut(&owner) {
            relation.indexes.remove(&from);
            relation.indexes.insert(to.clone());
            if relation.constraints.remove(&from) {
                relation.constraints.insert(to);
            }
        }
        return Ok(ResultSet::empty());
    }
    if let Some(c) = p.rename_constraint.captures(statement) {
        let (table, from, to) = (unquote_ident(&c[1]), unquote_ident(&c[2]), unquote_ident(&c[3]));
        let relation = catalog.tables.get_mut(&table).ok_or_else(|| missing(&table))?;
        if !relation.constraints.remove(&from) {
            return Err(Error::new(ErrorKind::Database, format!("constraint \"{}\" does not exist", from)));
        }
        relation.constraints.insert(to.clone());
        if relation.indexes.remove(&from) {
            relation.indexes.insert(to);
        }
        return Ok(ResultSet::empty());
    }
    if let Some(c) = p.add_constraint.captures(statement) {
        let (table, name) = (unquote_ident(&c[1]), unquote_ident(&c[2]));
        let backed_by_index = &c[3] != "CHECK";
        let relation = catalog.tables.get_mut(&table).ok_or_else(|| missing(&table))?;
        relation.constraints.insert(name.clone());
        if backed_by_index {
            relation.indexes.insert(name);
        }
        return Ok(ResultSet::empty());
    }
    if let Some(c) = p.drop_constraint.captures(statement) {
        let (table, name) = (unquote_ident(&c[1]), unquote_ident(&c[2]));
        let relation = catalog.tables.get_mut(&table).ok_or_else(|| missing(&table))?;
        relation.constraints.remove(&name);
        relation.indexes.remove(&name);
        return Ok(ResultSet::empty());
    }
    if let Some(c) = p.add_column.captures(statement) {
        let (table, name) = (unquote_ident(&c[1]), unquote_ident(&c[2]));
        let relation = catalog.tables.get_mut(&table).ok_or_else(|| missing(&table))?;
        relation.columns.push((name, c[3].trim().to_string()));
        for row in relation.rows.iter_mut() {
            row.push(None);
        }
        return Ok(ResultSet::empty());
    }
    if let Some(c) = p.drop_column.captures(statement) {
        let (table, name) = (unquote_ident(&c[1]), unquote_ident(&c[2]));
        let relation = catalog.tables.get_mut(&table).ok_or_else(|| missing(&table))?;
        if let Some(position) = relation.position(&name) {
            relation.columns.remove(position);
            for row in relation.rows.iter_mut() {
                if position < row.len() {
                    row.remove(position);
                }
            }
        }
        return Ok(ResultSet::empty());
    }
    if let Some(c) = p.create_index.captures(statement) {
        let (name, table) = (unquote_ident(&c[1]), unquote_ident(&c[2]));
        if catalog.relation_exists(&name) {
            return Err(Error::new(ErrorKind::Database, format!("relation \"{}\" already exists", name)));
        }
        let relation = catalog.tables.get_mut(&table).ok_or_else(|| missing(&table))?;
        relation.indexes.insert(name);
        return Ok(ResultSet::empty());
    }
    if let Some(c) = p.drop_index.captures(statement) {
        let name = unquote_ident(&c[1]);
        let owner = catalog.owner_of_index(&name).ok_or_else(|| missing(&name))?;
        if let Some(relation) = catalog.tables.get_mut(&owner) {
            relation.indexes.remove(&name);
        }
        return Ok(ResultSet::empty());
    }
    if let Some(c) = p.drop_table.captures(statement) {
        let table = unquote_ident(&c[1]);
        catalog.tables.remove(&table).ok_or_else(|| missing(&table))?;
        return Ok(ResultSet::empty());
    }
    Ok(ResultSet::empty())
}

fn evaluate(catalog: &Catalog, statement: &str) -> Result<Option<ResultSet>> {
    let p = patterns();
    let statement = statement.trim();
    if let Some(c) = p.count_where.captures(statement) {
        let Some(relation) = catalog.tables.get(&unquote_ident(&c[1])) else {
            return Ok(None);
        };
        let rows = matching(relation, c.get(2).map(|m| m.as_str()))?;
        return Ok(Some(single(rows.len().to_string())));
    }
    let Some(c) = p.select_rows.captures(statement) else {
        return Ok(None);
    };
    let Some(relation) = catalog.tables.get(&unquote_ident(&c[2])) else {
        return Ok(None);
    };
    // Only bare column lists
    let list = c[1].trim();
    let wanted = idents(list);
    if wanted.is_empty() || wanted.iter().map(|w| quote_ident(w)).collect::<Vec<_>>().join(", ") != list {
        return Ok(None);
    }
    let positions = wanted
        .iter()
        .map(|col| relation.position(col).ok_or_else(|| missing(col)))
        .collect::<Result<Vec<_>>>()?;
    let mut rows = matching(relation, c.get(3).map(|m| m.as_str()))?;
    if c.get(4).is_some() {
        let id = relation.position("id");
        rows.sort_by_key(|row| {
            id.and_then(|p| row.get(p).cloned().flatten())
                .and_then(|v| v.parse::<i64>().ok())
        });
    }
    let limit = c.get(5).and_then(|m| m.as_str().parse::<usize>().ok()).unwrap_or(usize::MAX);
    let offset = c.get(6).and_then(|m| m.as_str().parse::<usize>().ok()).unwrap_or(0);
    let rows: Vec<TextRow> = rows
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|row| positions.iter().map(|p| row.get(*p).cloned().flatten()).collect::<TextRow>())
        .collect();
    Ok(Some(ResultSet::with_rows(wanted, rows)))
}

fn matching<'r>(relation: &'r Relation, clause: Option<&str>) -> Result<Vec<&'r TextRow>> {
    let Some(clause) = clause else {
        return Ok(relation.rows.iter().collect());
    };
    let predicate = Predicate::parse(clause)?;
    let mut rows = Vec::new();
    for row in &relation.rows {
        if predicate.eval(&relation.columns, row)? == Some(true) {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn create(catalog: &mut Catalog, table: &str, columns: Vec<(String, String)>) -> Result<()> {
    if catalog.relation_exists(table) {
        return Err(Error::new(ErrorKind::Database, format!("relation \"{}\" already exists", table)));
    }
    catalog.tables.insert(table.to_string(), Relation { columns, ..Relation::default() });
    Ok(())
}

fn decode_cell(cell: &str) -> Option<String> {
    if cell == "\\N" {
        None
    } else {
        Some(cell.replace("\\\\", "\\"))
    }
}

fn encode_cell(cell: &Option<String>) -> String {
    match cell {
        Some(v) => v.replace('\\', "\\\\"),
        None => "\\N".to_string(),
    }
}

fn copy_in(catalog: &mut Catalog, statement: &str, data: &[u8]) -> Result<u64> {
    let p = patterns();
    let c = p
        .copy_in
        .captures(statement.trim())
        .ok_or_else(|| Error::new(ErrorKind::Database, format!("unsupported COPY: {}", statement)))?;
    let table = unquote_ident(&c[1]);
    let relation = catalog.tables.get_mut(&table).ok_or_else(|| missing(&table))?;
    let given: Vec<String> = match c.get(2) {
        Some(list) => idents(list.as_str()),
        None => relation.columns.iter().map(|(n, _)| n.clone()).collect(),
    };
    let sep = c.get(3).and_then(|m| m.as_str().chars().next()).unwrap_or('\t');
    let positions: Vec<usize> = given
        .iter()
        .map(|col| relation.position(col).ok_or_else(|| missing(col)))
        .collect::<Result<_>>()?;
    let id_position = relation.position("id").filter(|p| !positions.contains(p));
    let mut next_id = relation
        .rows
        .iter()
        .filter_map(|r| id_position.and_then(|p| r.get(p).cloned().flatten()))
        .filter_map(|v| v.parse::<i64>().ok())
        .max()
        .map_or(0, |m| m + 1);

    let text = String::from_utf8_lossy(data);
    let mut copied = 0u64;
    for line in text.lines().filter(|l| !l.is_empty()) {
        let cells: Vec<&str> = line.split(sep).collect();
        if cells.len() != positions.len() {
            return Err(Error::new(
                ErrorKind::Database,
                format!("extra data after last expected column: {}", line),
            ));
        }
        let mut row: TextRow = vec![None; relation.columns.len()];
        for (cell, position) in cells.iter().zip(&positions) {
            row[*position] = decode_cell(cell);
        }
        if let Some(position) = id_position {
            row[position] = Some(next_id.to_string());
            next_id += 1;
        }
        relation.rows.push(row);
        copied += 1;
    }
    Ok(copied)
}

fn copy_out(catalog: &Catalog, statement: &str) -> Result<Vec<u8>> {
    let p = patterns();
    let statement = statement.trim();
    let (table, wanted, sep) = if let Some(c) = p.copy_out_table.captures(statement) {
        (unquote_ident(&c[1]), c.get(2).map(|m| idents(m.as_str())), c.get(3))
    } else if let Some(c) = p.copy_out_select.captures(statement) {
        let cols = c[1].trim();
        let wanted = if cols == "*" { None } else { Some(idents(cols)) };
        (unquote_ident(&c[2]), wanted, c.get(3))
    } else {
        return Err(Error::new(ErrorKind::Database, format!("unsupported COPY: {}", statement)));
    };
    let sep = sep.and_then(|m| m.as_str().chars().next()).unwrap_or('\t').to_string();
    let Some(relation) = catalog.tables.get(&table) else {
        return Ok(Vec::new());
    };
    let positions: Vec<usize> = match wanted {
        Some(cols) => cols.iter().filter_map(|c| relation.position(c)).collect(),
        None => (0..relation.columns.len()).collect(),
    };
    let mut out = String::new();
    for row in &relation.rows {
        let cells: Vec<String> = positions.iter().map(|p| encode_cell(&row[*p])).collect();
        out.push_str(&cells.join(&sep));
        out.push('\n');
    }
    Ok(out.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(backend: &ScriptedBackend) -> Box<dyn Session> {
        backend.connect().unwrap()
    }

    #[test]
    fn ddl_follows_catalog() {
        let backend = ScriptedBackend::new();
        let mut s = session(&backend);
        s.execute(r#"CREATE TABLE "nf" ("id" bigint, "degree" smallint, "coeffs" numeric(10,2)[])"#).unwrap();
        s.execute(r#"CREATE TABLE "nf_tmp" (LIKE "nf")"#).unwrap();
        s.execute(r#"CREATE INDEX "nf_degree" ON "nf" USING btree ("degree")"#).unwrap();
        s.execute(r#"ALTER TABLE "nf" ADD CONSTRAINT "nf_pkey" PRIMARY KEY ("id")"#).unwrap();
        s.execute(r#"ALTER TABLE "nf" RENAME TO "nf_old1""#).unwrap();
        s.commit().unwrap();

        let old = backend.table("nf_old1").unwrap();
        assert_eq!(old.columns[2], ("coeffs".to_string(), "numeric(10,2)[]".to_string()));
        assert!(old.indexes.contains("nf_degree"));
        assert!(old.constraints.contains("nf_pkey"));
        assert_eq!(backend.table("nf_tmp").unwrap().columns.len(), 3);
        let rs = s.execute("SELECT 1 FROM pg_class WHERE relname = 'nf_pkey'").unwrap();
        assert_eq!(rs.rowcount(), 1);
        let rs = s.execute("SELECT tablename FROM pg_indexes WHERE indexname = 'nf_degree'").unwrap();
        assert_eq!(rs.scalar(), Some("nf_old1"));
    }

    #[test]
    fn rollback_restores_catalog() {
        let backend = ScriptedBackend::new();
        backend.add_table("nf", &[("id", "bigint")]);
        let mut s = session(&backend);
        s.execute(r#"DROP TABLE "nf""#).unwrap();
        assert!(backend.table("nf").is_none());
        s.rollback().unwrap();
        assert!(backend.table("nf").is_some());
    }

    #[test]
    fn copy_assigns_missing_ids() {
        let backend = ScriptedBackend::new();
        backend.add_table("nf", &[("id", "bigint"), ("degree", "smallint"), ("label", "text")]);
        let mut s = session(&backend);
        let n = s
            .copy_in(r#"COPY "nf" ("degree", "label") FROM STDIN (DELIMITER '|')"#, b"2|a\n5|\\N\n")
            .unwrap();
        assert_eq!(n, 2);
        let out = s.copy_out(r#"COPY "nf" ("id", "degree", "label") TO STDOUT (DELIMITER '|')"#).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "0|2|a\n1|5|\\N\n");
        assert_eq!(s.execute(r#"SELECT COUNT(*) FROM "nf""#).unwrap().scalar_i64(), Some(2));
        assert_eq!(s.execute(r#"SELECT MAX(id) FROM "nf""#).unwrap().scalar_i64(), Some(1));
    }

    #[test]
    fn selects_are_evaluated_when_asked() {
        let backend = ScriptedBackend::new();
        backend.add_table("nf", &[("id", "bigint"), ("degree", "smallint"), ("label", "text")]);
        backend.add_rows(
            "nf",
            vec![
                vec![Some("2"), Some("5"), Some("b")],
                vec![Some("1"), Some("2"), Some("a")],
                vec![Some("3"), Some("2"), None],
            ],
        );
        let mut s = session(&backend);
        let query = r#"SELECT "label" FROM "nf" WHERE "degree" = 2 ORDER BY "id" LIMIT 5"#;
        assert!(s.execute(query).unwrap().rows.is_empty());

        backend.evaluate_selects();
        let rs = s.execute(query).unwrap();
        assert_eq!(rs.rows, vec![vec![Some("a".to_string())], vec![None]]);
        let rs = s.execute(r#"SELECT "id" FROM "nf" WHERE "degree" >= 2 ORDER BY "id" LIMIT 1 OFFSET 1"#).unwrap();
        assert_eq!(rs.scalar(), Some("2"));
        let count = s.execute(r#"SELECT COUNT(*) FROM "nf" WHERE ("label" = 'b' OR "label" IS NULL)"#).unwrap();
        assert_eq!(count.scalar_i64(), Some(2));
        assert_eq!(s.execute(r#"SELECT "id" FROM "nf" WHERE "label" ~ 'a'"#).unwrap_err().kind, ErrorKind::Database);
    }

    #[test]
    fn faults_and_rules() {
        let backend = ScriptedBackend::new();
        backend.on("FROM pg_locks", single("x"));
        backend.fail_on("^CREATE INDEX");
        backend.drop_connection_on("^SELECT 2", 1);
        let mut s = session(&backend);
        assert_eq!(s.execute("SELECT * FROM pg_locks").unwrap().scalar(), Some("x"));
        assert_eq!(s.execute(r#"CREATE INDEX "i" ON "t""#).unwrap_err().kind, ErrorKind::Database);
        assert_eq!(s.execute("SELECT 2").unwrap_err().kind, ErrorKind::Connection);
        assert!(s.is_closed());
        let mut fresh = session(&backend);
        assert!(fresh.execute("SELECT 2").is_ok());
        assert_eq!(backend.connections(), 2);
    }
}
