//! Reload lifecycle against the scripted backend: shadow tables, the final
//! swap, backups, reverts and cleanup.

mod common;

use relstore::ErrorKind;
use relstore::reload::engine::{DumpOptions, ReloadFiles, ReloadOptions};

use common::{fresh_fields, nf_fields, single_column, write_data, NF_COLUMNS};

#[test]
fn reload_swaps_in_shadow_and_keeps_backup() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    let table = fx.table();

    let outcome = table.reload(&ReloadFiles::new(fresh_fields(dir.path())), ReloadOptions::default()).unwrap();

    assert_eq!(outcome.backup_number, Some(1));
    assert_eq!(outcome.tables, vec!["nf_fields"]);
    assert!(!outcome.ordered);
    let live = fx.rows("nf_fields");
    assert_eq!(live.len(), 2);
    // Ids continue after the largest one in the empty shadow table
    assert_eq!(live[0][0].as_deref(), Some("0"));
    assert_eq!(live[1][1].as_deref(), Some("2.2.8.1"));
    assert_eq!(fx.rows("nf_fields_old1").len(), 3);
    assert!(!fx.exists("nf_fields_tmp"));

    let relation = fx.backend.table("nf_fields").unwrap();
    assert!(relation.constraints.contains("nf_fields_pkey"));
    assert_eq!(table.next_backup_number().unwrap(), 2);
}

#[test]
fn second_reload_takes_next_backup_number() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    let table = fx.table();
    let files = ReloadFiles::new(fresh_fields(dir.path()));

    table.reload(&files, ReloadOptions::default()).unwrap();
    let outcome = table.reload(&files, ReloadOptions::default()).unwrap();

    assert_eq!(outcome.backup_number, Some(2));
    assert_eq!(fx.rows("nf_fields_old1").len(), 3);
    assert_eq!(fx.rows("nf_fields_old2").len(), 2);
    assert!(fx.backend.table("nf_fields_old1").unwrap().constraints.is_empty());
    assert!(fx.backend.table("nf_fields_old2").unwrap().constraints.contains("nf_fields_old2_pkey"));
}

#[test]
fn failed_index_build_leaves_live_tables_untouched() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    let table = fx.table();
    fx.backend.on(r#"^SELECT "index_name" FROM "meta_indexes""#, single_column("index_name", &["nf_fields_degree"]));
    fx.backend.on(
        r#"^SELECT index_name, type, columns, modifiers, storage_params FROM "meta_indexes""#,
        relstore::core::types::ResultSet::with_rows(
            ["index_name", "type", "columns", "modifiers", "storage_params"].iter().map(|c| c.to_string()).collect(),
            vec![vec![
                Some("nf_fields_degree".to_string()),
                Some("btree".to_string()),
                Some(r#"["degree"]"#.to_string()),
                Some("[[]]".to_string()),
                Some("{}".to_string()),
            ]],
        ),
    );
    fx.backend.fail_on("^CREATE INDEX");
    let files = ReloadFiles::new(fresh_fields(dir.path()));

    let err = table.reload(&files, ReloadOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Database);
    assert_eq!(fx.rows("nf_fields").len(), 3);
    assert!(!fx.exists("nf_fields_old1"));
    // Loaded data and the primary key were committed before the failure
    assert_eq!(fx.rows("nf_fields_tmp").len(), 2);
    assert!(fx.backend.table("nf_fields_tmp").unwrap().constraints.contains("nf_fields_tmp_pkey"));
    assert_eq!(table.shadow_tables().unwrap(), vec!["nf_fields"]);

    let err = table.reload_revert(None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidState);
    let err = table.reload(&files, ReloadOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidState);

    assert_eq!(table.drop_tmp().unwrap(), vec!["nf_fields_tmp"]);
    assert!(!fx.exists("nf_fields_tmp"));

    fx.backend.clear_faults();
    table.reload(&files, ReloadOptions::default()).unwrap();
    let live = fx.backend.table("nf_fields").unwrap();
    assert!(live.indexes.contains("nf_fields_degree"));
    assert_eq!(live.rows.len(), 2);
}

#[test]
fn extras_row_mismatch_rolls_back_the_copy() {
    let fx = nf_fields().with_extras().build();
    let dir = tempfile::tempdir().unwrap();
    let extras = write_data(dir.path(), "nf_fields_extras.txt", &[("zk", "jsonb")], &["[2]"]);
    let files = ReloadFiles::new(fresh_fields(dir.path())).extras(extras);

    let err = fx.table().reload(&files, ReloadOptions::default()).unwrap_err();

    assert_eq!(err.kind, ErrorKind::Consistency);
    assert!(fx.rows("nf_fields_tmp").is_empty());
    assert!(fx.rows("nf_fields_extras_tmp").is_empty());
    assert_eq!(fx.rows("nf_fields").len(), 3);
    assert_eq!(fx.rows("nf_fields_extras").len(), 3);
}

#[test]
fn extras_file_must_match_the_table() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    let extras = write_data(dir.path(), "nf_fields_extras.txt", &[("zk", "jsonb")], &["[2]"]);
    let files = ReloadFiles::new(fresh_fields(dir.path())).extras(extras);

    let err = fx.table().reload(&files, ReloadOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert!(fx.take_statements().is_empty());
}

#[test]
fn header_type_mismatch_is_rejected() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    let search = write_data(
        dir.path(),
        "nf_fields.txt",
        &[("label", "text"), ("degree", "integer"), ("disc_abs", "numeric")],
        &["2.0.4.1|2|4"],
    );

    let err = fx.table().reload(&ReloadFiles::new(search), ReloadOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert!(err.to_string().contains("degree should be smallint"));
    assert_eq!(fx.rows("nf_fields").len(), 3);
}

#[test]
fn adjust_schema_refuses_unlisted_types_before_any_ddl() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    let search = write_data(
        dir.path(),
        "nf_fields.txt",
        &[("label", "text"), ("degree", "smallint); DROP TABLE meta_tables; --")],
        &["2.0.4.1|2"],
    );
    let options = ReloadOptions { adjust_schema: true, ..ReloadOptions::default() };

    let err = fx.table().reload(&ReloadFiles::new(search), options).unwrap_err();

    assert_eq!(err.kind, ErrorKind::Configuration);
    assert!(fx.take_statements().iter().all(|s| !s.starts_with("CREATE TABLE")));
    assert!(fx.exists("meta_tables"));
    assert!(!fx.exists("nf_fields_tmp"));
}

#[test]
fn adjust_schema_builds_shadow_from_header() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    let search = write_data(
        dir.path(),
        "nf_fields.txt",
        &[("label", "text"), ("degree", "smallint"), ("regulator", "double precision")],
        &["2.0.4.1|2|0.5"],
    );
    let options = ReloadOptions { adjust_schema: true, ..ReloadOptions::default() };

    fx.table().reload(&ReloadFiles::new(search), options).unwrap();

    let live = fx.backend.table("nf_fields").unwrap();
    let names: Vec<&str> = live.columns.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["id", "label", "degree", "regulator"]);
    assert_eq!(live.rows.len(), 1);
}

#[test]
fn id_ordered_tables_are_resorted_when_ids_are_assigned() {
    let fx = nf_fields().sorted_by(r#"["degree", "disc_abs"]"#).build();
    let dir = tempfile::tempdir().unwrap();

    let outcome = fx.table().reload(&ReloadFiles::new(fresh_fields(dir.path())), ReloadOptions::default()).unwrap();

    assert!(outcome.ordered);
    let statements = fx.take_statements();
    assert!(statements.iter().any(|s| s.starts_with(r#"CREATE TEMP SEQUENCE "nf_fields_tmp_sorter_newid_seq""#)));
    assert!(statements.iter().any(|s| s.contains(r#"ORDER BY "degree", "disc_abs""#)));
    assert!(statements.iter().any(|s| s.starts_with("UPDATE") && s.contains("id_ordered")));
}

#[test]
fn resort_can_be_disabled() {
    let fx = nf_fields().sorted_by(r#"["degree"]"#).build();
    let dir = tempfile::tempdir().unwrap();
    let options = ReloadOptions { resort: Some(false), ..ReloadOptions::default() };

    let outcome = fx.table().reload(&ReloadFiles::new(fresh_fields(dir.path())), options).unwrap();

    assert!(!outcome.ordered);
    assert!(fx.take_statements().iter().all(|s| !s.contains("_sorter")));
}

#[test]
fn restat_rebuilds_counts_into_shadow_tables() {
    let fx = nf_fields().recording_counts().build();
    let dir = tempfile::tempdir().unwrap();

    let outcome = fx.table().reload(&ReloadFiles::new(fresh_fields(dir.path())), ReloadOptions::default()).unwrap();

    assert_eq!(outcome.tables, vec!["nf_fields", "nf_fields_counts", "nf_fields_stats"]);
    assert!(fx.exists("nf_fields_counts_old1"));
    assert!(fx.exists("nf_fields_stats_old1"));
    assert!(!fx.exists("nf_fields_counts_tmp"));
    let statements = fx.take_statements();
    assert!(statements.iter().any(|s| s == r#"SELECT COUNT(*) FROM "nf_fields_tmp""#));
    assert!(statements.iter().any(|s| s == r#"SELECT COUNT(*) FROM "nf_fields""#));
    let counts = fx.backend.table("nf_fields_counts").unwrap();
    assert!(!counts.indexes.is_empty());
    assert!(counts.indexes.iter().all(|i| !i.ends_with("_tmp")));
}

#[test]
fn deferred_swap_waits_for_final_swap() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    let table = fx.table();
    let options = ReloadOptions { final_swap: false, ..ReloadOptions::default() };

    let outcome = table.reload(&ReloadFiles::new(fresh_fields(dir.path())), options).unwrap();
    assert_eq!(outcome.backup_number, None);
    assert_eq!(fx.rows("nf_fields").len(), 3);
    assert_eq!(fx.rows("nf_fields_tmp").len(), 2);

    assert_eq!(table.reload_final_swap(None, None).unwrap(), 1);
    assert_eq!(fx.rows("nf_fields").len(), 2);
    assert!(!fx.exists("nf_fields_tmp"));
    assert!(table.reload_final_swap(None, None).is_err());
}

#[test]
fn locked_tables_block_the_swap() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    let table = fx.table();
    let options = ReloadOptions { final_swap: false, ..ReloadOptions::default() };
    table.reload(&ReloadFiles::new(fresh_fields(dir.path())), options).unwrap();
    fx.backend.on(
        "FROM pg_locks",
        relstore::core::types::ResultSet::with_rows(
            ["relname", "mode", "pid", "age"].iter().map(|c| c.to_string()).collect(),
            vec![vec![
                Some("nf_fields".to_string()),
                Some("AccessShareLock".to_string()),
                Some("77".to_string()),
                Some("00:00:03".to_string()),
            ]],
        ),
    );

    let err = table.reload_final_swap(None, None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Concurrency);
    assert_eq!(fx.rows("nf_fields").len(), 3);
    assert!(fx.exists("nf_fields_tmp"));
}

#[test]
fn revert_twice_restores_the_catalog() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    let table = fx.table();
    table.reload(&ReloadFiles::new(fresh_fields(dir.path())), ReloadOptions::default()).unwrap();
    let after_reload = fx.backend.catalog();

    assert_eq!(table.reload_revert(None).unwrap(), 1);
    assert_eq!(fx.rows("nf_fields").len(), 3);
    assert_eq!(fx.rows("nf_fields_old1").len(), 2);
    assert_ne!(fx.backend.catalog(), after_reload);

    assert_eq!(table.reload_revert(Some(1)).unwrap(), 1);
    assert_eq!(fx.backend.catalog(), after_reload);
}

#[test]
fn revert_needs_a_backup() {
    let fx = nf_fields().build();
    let table = fx.table();
    assert_eq!(table.reload_revert(None).unwrap_err().kind, ErrorKind::InvalidState);
    assert_eq!(table.reload_revert(Some(4)).unwrap_err().kind, ErrorKind::NotFound);
}

#[test]
fn cleanup_keeps_newest_backups_renumbered() {
    let fx = nf_fields().build();
    for (n, label) in [(1, "b1"), (2, "b2"), (3, "b3")] {
        let backup = format!("nf_fields_old{}", n);
        fx.backend.add_table(&backup, NF_COLUMNS);
        fx.backend.add_rows(&backup, vec![vec![Some("1"), Some(label), Some("2"), Some("5")]]);
    }
    fx.backend.add_table("nf_fields_tmp", NF_COLUMNS);
    let table = fx.table();

    table.cleanup_from_reload(1).unwrap();

    assert!(!fx.exists("nf_fields_tmp"));
    assert!(!fx.exists("nf_fields_old2"));
    assert!(!fx.exists("nf_fields_old3"));
    assert_eq!(fx.rows("nf_fields_old1")[0][1].as_deref(), Some("b3"));
    assert_eq!(fx.rows("nf_fields").len(), 3);
    assert_eq!(table.next_backup_number().unwrap(), 2);

    table.cleanup_from_reload(0).unwrap();
    assert!(!fx.exists("nf_fields_old1"));
}

#[test]
fn dump_reloads_to_identical_rows() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    let table = fx.table();
    let files = ReloadFiles::new(dir.path().join("nf_fields.txt"));

    table.copy_to(&files, &DumpOptions::default()).unwrap();
    let dumped = std::fs::read_to_string(&files.search).unwrap();
    assert!(dumped.starts_with("id|label|degree|disc_abs\nbigint|text|smallint|numeric\n\n"));
    assert!(dumped.contains("3|3.1.23.1|3|\\N"));

    table.reload(&files, ReloadOptions::default()).unwrap();
    assert_eq!(fx.rows("nf_fields"), fx.rows("nf_fields_old1"));
}

#[test]
fn dump_with_query_refuses_extras() {
    let fx = nf_fields().with_extras().build();
    let dir = tempfile::tempdir().unwrap();
    let files = ReloadFiles::new(dir.path().join("nf_fields.txt")).extras(dir.path().join("nf_fields_extras.txt"));
    let options = DumpOptions { query: Some(serde_json::json!({"degree": 2})), ..DumpOptions::default() };

    let err = fx.table().copy_to(&files, &options).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
}

#[test]
fn copy_from_appends_and_invalidates_stats() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    let table = fx.table();

    let added = table
        .copy_from(&fresh_fields(dir.path()), None, relstore::search::mutate::WriteOptions::default())
        .unwrap();

    assert_eq!(added, 2);
    let live = fx.rows("nf_fields");
    assert_eq!(live.len(), 5);
    assert_eq!(live[3][0].as_deref(), Some("4"));
    let statements = fx.take_statements();
    assert!(statements.iter().any(|s| s.contains("out_of_order") && s.starts_with("UPDATE")));
    assert!(statements.iter().any(|s| s.contains("stats_valid") && s.starts_with("UPDATE")));
    assert!(!table.descriptor().stats_valid);
}
