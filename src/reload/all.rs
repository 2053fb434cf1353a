use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::core::database::Database;
use crate::core::error::{Error, ErrorKind, Result};
use crate::reload::engine::{DumpOptions, ReloadFiles, ReloadOptions};
use crate::reload::file_format::DataFile;
use crate::schema::catalog::MetaKind;
use crate::schema::manager::NewTable;
use crate::search::table::SearchTable;

const AUXILIARY_ENDINGS: [&str; 6] = ["_extras", "_counts", "_stats", "_indexes", "_constraints", "_meta"];

/// Options for [`Database::reload_all`].
#[derive(Debug, Clone)]
pub struct ReloadAllOptions {
    pub reload: ReloadOptions,  // `final_swap` is ignored; every swap happens at the end
    pub halt_on_errors: bool,   // Otherwise a table failing with a database error is skipped
}

impl Default for ReloadAllOptions {
    fn default() -> Self {
        ReloadAllOptions { reload: ReloadOptions::default(), halt_on_errors: true }
    }
}

#[derive(Debug, Default)]
pub struct ReloadAllOutcome {
    pub created: Vec<String>,
    pub reloaded: Vec<String>,
    pub failures: Vec<(String, Error)>,
}

fn check_folder(folder: &Path) -> Result<()> {
    if folder.is_dir() {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!("The path {} is not a directory", folder.display())))
    }
}

/// Table names with a search file (`{name}.txt`) in `folder`, sorted.
fn search_files(folder: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if AUXILIARY_ENDINGS.iter().any(|ending| stem.ends_with(ending)) {
            continue;
        }
        names.push(stem.to_string());
    }
    names.sort();
    Ok(names)
}

fn single_columns(header: Vec<(String, String)>) -> (Vec<(String, Vec<String>)>, Vec<String>) {
    let columns: Vec<(String, String)> = header.into_iter().filter(|(name, _)| name != "id").collect();
    let order = columns.iter().map(|(name, _)| name.clone()).collect();
    (columns.into_iter().map(|(name, ty)| (ty, vec![name])).collect(), order)
}

impl Database {
    /// Create a table from the headers of its dump so it can be reloaded.
    /// The `meta_tables` row comes from the meta file at swap time.
    fn create_from_dump(&self, folder: &Path, name: &str, sep: char) -> Result<Arc<SearchTable>> {
        let files = ReloadFiles::existing_in(folder, name);
        let meta_path = files
            .meta
            .ok_or_else(|| Error::invalid_argument(format!("Meta file missing for {}", name)))?;
        let lines = DataFile::read(&meta_path, sep, false)?.lines(sep);
        let [line] = lines.as_slice() else {
            return Err(Error::invalid_argument(format!("Expected one row in {}", meta_path.display())));
        };
        let meta: BTreeMap<&str, &str> =
            MetaKind::Tables.column_names().into_iter().zip(line.iter().map(String::as_str)).collect();
        if meta.get("name") != Some(&name) {
            return Err(Error::invalid_argument(format!("{} does not describe {}", meta_path.display(), name)));
        }
        let (search_columns, search_order) = single_columns(DataFile::read_header(&files.search, sep)?);
        let mut spec = NewTable { search_order: Some(search_order), ..NewTable::new(name) };
        spec.search_columns = search_columns;
        if meta.get("has_extras") == Some(&"t") {
            let extras = files
                .extras
                .ok_or_else(|| Error::invalid_argument(format!("Extras file missing for {}", name)))?;
            let (extra_columns, extra_order) = single_columns(DataFile::read_header(&extras, sep)?);
            spec.extra_columns = Some(extra_columns);
            spec.extra_order = Some(extra_order);
        }
        self.schema().create_table(spec)
    }

    /// Reload every table with a search file in `folder`.
    ///
    /// Files follow the [`ReloadFiles::in_folder`] naming. All tables are
    /// loaded into shadow tables first and swapped in together at the end,
    /// in one transaction. Tables that do not exist yet are created from
    /// the file headers when `adjust_schema` is set.
    pub fn reload_all(&self, folder: &Path, options: ReloadAllOptions) -> Result<ReloadAllOutcome> {
        check_folder(folder)?;
        let start = Instant::now();
        let sep = options.reload.sep.unwrap_or(self.conn().config().copy_separator);
        let mut outcome = ReloadAllOutcome::default();
        let names = search_files(folder)?;
        let missing: Vec<&String> = names.iter().filter(|n| !self.has_table(n)).collect();
        if !missing.is_empty() {
            if !options.reload.adjust_schema {
                return Err(Error::invalid_argument(format!(
                    "Nonexistent tables: {}; use adjust_schema to create them",
                    missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                )));
            }
            for name in &missing {
                self.create_from_dump(folder, name, sep)?;
                info!(table = %name, "created table from dump");
                outcome.created.push(name.to_string());
            }
        }

        let mut plans = Vec::new();
        for name in &names {
            let table = self.table(name)?;
            let files = ReloadFiles::existing_in(folder, name);
            let has_extras = table.descriptor().has_extras;
            match (&files.extras, has_extras) {
                (Some(path), false) => {
                    return Err(Error::invalid_argument(format!("Unexpected file {}", path.display())));
                }
                (None, true) => {
                    return Err(Error::invalid_argument(format!("Missing extras file for {}", name)));
                }
                _ => {}
            }
            plans.push((table, files));
        }
        info!(tables = ?names, "reloading");

        let per_table = ReloadOptions { final_swap: false, ..options.reload.clone() };
        let mut loaded = Vec::new();
        for (table, files) in plans {
            match table.reload(&files, per_table.clone()) {
                Ok(result) => loaded.push((table, files, result)),
                Err(e) if e.kind == ErrorKind::Database && !options.halt_on_errors && outcome.created.is_empty() => {
                    error!(table = %table.name(), error = %e, "reload failed");
                    outcome.failures.push((table.name(), e));
                }
                Err(e) => return Err(e),
            }
        }
        self.conn().transaction(true, || {
            for (table, files, result) in &loaded {
                table.swap_in_shadow(&result.tables, files.meta.as_deref(), result.ordered, sep)?;
            }
            Ok(())
        })?;
        outcome.reloaded = loaded.iter().map(|(table, _, _)| table.name()).collect();
        if outcome.failures.is_empty() {
            info!(tables = ?outcome.reloaded, elapsed = start.elapsed().as_secs_f64(), "reloaded all tables");
        } else {
            let failed: Vec<&str> = outcome.failures.iter().map(|(n, _)| n.as_str()).collect();
            warn!(tables = ?outcome.reloaded, ?failed, "reloaded with failures");
        }
        Ok(outcome)
    }

    /// Revert the most recent [`Database::reload_all`] from `folder`:
    /// every table with a search file there goes back to its latest backup.
    pub fn reload_all_revert(&self, folder: &Path) -> Result<Vec<String>> {
        check_folder(folder)?;
        let names: Vec<String> = search_files(folder)?.into_iter().filter(|n| self.has_table(n)).collect();
        self.conn().transaction(true, || {
            for name in &names {
                self.table(name)?.reload_revert(None)?;
            }
            Ok(())
        })?;
        Ok(names)
    }

    /// Drop every shadow table and backup left by reloads.
    pub fn cleanup_all(&self) -> Result<()> {
        self.conn().transaction(true, || {
            for table in self.tables() {
                table.cleanup_from_reload(0)?;
            }
            Ok(())
        })
    }

    /// Dump `tables` into a new folder, in the layout [`Database::reload_all`]
    /// reads. Returns the names that are not registered tables.
    pub fn copy_to_all(&self, tables: &[&str], folder: &Path, options: &DumpOptions) -> Result<Vec<String>> {
        if folder.exists() {
            return Err(Error::invalid_argument(format!("The path {} already exists", folder.display())));
        }
        fs::create_dir_all(folder)?;
        let mut failures = Vec::new();
        for name in tables {
            let Ok(table) = self.table(name) else {
                warn!(table = %name, "not a registered table");
                failures.push(name.to_string());
                continue;
            };
            let mut files = ReloadFiles::in_folder(folder, name);
            if !table.descriptor().has_extras {
                files.extras = None;
            }
            table.copy_to(&files, options)?;
        }
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_search_files_name_tables() {
        let dir = tempfile::tempdir().unwrap();
        for file in ["nf_fields.txt", "nf_fields_extras.txt", "nf_fields_meta.txt", "ec_curves.txt", "notes.md"] {
            fs::write(dir.path().join(file), "").unwrap();
        }
        assert_eq!(search_files(dir.path()).unwrap(), vec!["ec_curves", "nf_fields"]);
    }

    #[test]
    fn header_columns_keep_file_order() {
        let header = vec![
            ("id".to_string(), "bigint".to_string()),
            ("label".to_string(), "text".to_string()),
            ("degree".to_string(), "smallint".to_string()),
        ];
        let (groups, order) = single_columns(header);
        assert_eq!(order, vec!["label", "degree"]);
        assert_eq!(groups[1], ("smallint".to_string(), vec!["degree".to_string()]));
    }
}
