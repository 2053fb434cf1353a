use std::collections::BTreeSet;

use tracing::warn;

use crate::connection::manager::{ConnectionManager, ExecOptions};
use crate::core::error::{Error, Result};
use crate::core::sql::Sql;
use crate::schema::whitelist::check_restricted_suffix;

/// PostgreSQL truncates identifiers beyond this many bytes.
pub const MAX_IDENTIFIER: usize = 63;

fn truncate(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// `name` shortened so that `name + suffix` fits in an identifier.
pub fn bounded_name(name: &str, suffix: &str) -> String {
    format!("{}{}", truncate(name, MAX_IDENTIFIER.saturating_sub(suffix.len())), suffix)
}

enum Kind {
    Constraint(String),
    Index,
}

impl ConnectionManager {
    /// Move an index or constraint named `name + suffix` out of the way.
    ///
    /// The existing relation is renamed to `name_depN + suffix` for the
    /// first free `N`, and the statement that would drop it is logged.
    /// Returns the new name, or `None` when nothing was in the way.
    pub fn rename_if_exists(&self, name: &str, suffix: &str) -> Result<Option<String>> {
        let current = format!("{}{}", name, suffix);
        if !self.relation_exists(&current)? {
            return Ok(None);
        }
        let kind = if let Some(table) = self.constraint_table(&current)? {
            Kind::Constraint(table)
        } else if self.index_exists(&current, None)? {
            Kind::Index
        } else {
            return Err(Error::invalid_state(format!(
                "Relation {} already exists and is neither an index nor a constraint",
                current
            )));
        };
        let mut n = 0;
        let mut deprecated = bounded_name(name, &format!("_dep{}{}", n, suffix));
        while self.relation_exists(&deprecated)? {
            n += 1;
            deprecated = bounded_name(name, &format!("_dep{}{}", n, suffix));
        }
        let (renamer, dropper) = match &kind {
            Kind::Constraint(table) => (
                Sql::format(
                    "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
                    [Sql::identifier(table), Sql::identifier(&current), Sql::identifier(&deprecated)],
                ),
                Sql::format("ALTER TABLE {} DROP CONSTRAINT {}", [Sql::identifier(table), Sql::identifier(&deprecated)]),
            ),
            Kind::Index => (
                Sql::format("ALTER INDEX {} RENAME TO {}", [Sql::identifier(&current), Sql::identifier(&deprecated)]),
                Sql::raw("DROP INDEX ").ident(&deprecated),
            ),
        };
        self.execute_with(&renamer, ExecOptions::silent())?;
        warn!(
            from = %current,
            to = %deprecated,
            drop = %dropper.render(),
            "renamed existing relation out of the way"
        );
        Ok(Some(deprecated))
    }

    /// `CREATE TABLE target (LIKE source)`, refusing to overwrite.
    pub fn clone_table(&self, source: &str, target: &str) -> Result<()> {
        if self.table_exists(target)? {
            return Err(Error::invalid_state(format!(
                "Table {} already exists; clean up from the previous reload first",
                target
            )));
        }
        let creator = Sql::format("CREATE TABLE {} (LIKE {})", [Sql::identifier(target), Sql::identifier(source)]);
        self.execute(&creator)?;
        Ok(())
    }

    pub fn drop_table_if_exists(&self, table: &str) -> Result<bool> {
        if !self.table_exists(table)? {
            return Ok(false);
        }
        self.execute(&Sql::raw("DROP TABLE ").ident(table))?;
        Ok(true)
    }

    /// Rename `table + source` to `table + target` for every table, along with
    /// its primary key, constraints and indexes.
    pub fn swap(&self, tables: &[String], source: &str, target: &str) -> Result<()> {
        self.transaction(true, || {
            for table in tables {
                self.swap_one(table, source, target)?;
            }
            Ok(())
        })
    }

    fn swap_one(&self, table: &str, source: &str, target: &str) -> Result<()> {
        let old = format!("{}{}", table, source);
        let new = format!("{}{}", table, target);
        self.execute(&Sql::format("ALTER TABLE {} RENAME TO {}", [Sql::identifier(&old), Sql::identifier(&new)]))?;

        let mut done = BTreeSet::new();
        let pkey_old = format!("{}_pkey", old);
        let pkey_new = format!("{}_pkey", new);
        if self.constraint_exists(&pkey_old, Some(&new))? {
            self.execute(&Sql::format(
                "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
                [Sql::identifier(&new), Sql::identifier(&pkey_old), Sql::identifier(&pkey_new)],
            ))?;
            done.insert(pkey_new);
        }
        for constraint in self.list_constraints(&new)? {
            if done.contains(&constraint) {
                continue;
            }
            let renamed = self.swap_target(&constraint, &new, source, target, "Constraint")?;
            self.execute(&Sql::format(
                "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
                [Sql::identifier(&new), Sql::identifier(&constraint), Sql::identifier(&renamed)],
            ))?;
            done.insert(renamed);
        }
        for index in self.list_indexes(&new)? {
            if done.contains(&index) {
                continue;
            }
            let renamed = self.swap_target(&index, &new, source, target, "Index")?;
            self.execute(&Sql::format("ALTER INDEX {} RENAME TO {}", [Sql::identifier(&index), Sql::identifier(&renamed)]))?;
            done.insert(renamed);
        }
        Ok(())
    }

    fn swap_target(&self, name: &str, table: &str, source: &str, target: &str, kind: &str) -> Result<String> {
        let original = match name.strip_suffix(source) {
            Some(stripped) if !source.is_empty() => stripped,
            Some(_) => name,
            None => {
                warn!(kind, table, name, source, "name does not end with the swap suffix");
                name
            }
        };
        let renamed = if check_restricted_suffix(original, kind, true).is_err() {
            warn!(kind, table, name, "name uses a reserved suffix; extending it with _");
            format!("{}_{}", original, target)
        } else {
            format!("{}{}", original, target)
        };
        self.rename_if_exists(&renamed, "")?;
        Ok(renamed)
    }
}
