//! Whole-database dumps and reloads from a folder.

mod common;

use std::fs;

use relstore::ErrorKind;
use relstore::reload::all::ReloadAllOptions;
use relstore::reload::engine::{DumpOptions, ReloadOptions};

use common::{describe_as, fresh_fields, nf_fields, write_data};

#[test]
fn dump_folder_layout() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("dump");

    let missing = fx.db.copy_to_all(&["nf_fields", "ec_curves"], &folder, &DumpOptions::default()).unwrap();

    assert_eq!(missing, vec!["ec_curves"]);
    for file in ["nf_fields.txt", "nf_fields_indexes.txt", "nf_fields_constraints.txt", "nf_fields_meta.txt"] {
        assert!(folder.join(file).is_file(), "{} not written", file);
    }
    // Counts and stats are only dumped while counts are being recorded
    assert!(!folder.join("nf_fields_counts.txt").exists());
    assert!(!folder.join("nf_fields_extras.txt").exists());
    let meta = fs::read_to_string(folder.join("nf_fields_meta.txt")).unwrap();
    assert!(meta.starts_with("nf_fields|\\N|\\N|f|f|f|t|label|3|"));

    let err = fx.db.copy_to_all(&["nf_fields"], &folder, &DumpOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
}

#[test]
fn reload_all_swaps_and_reverts_together() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("dump");
    fx.db.copy_to_all(&["nf_fields"], &folder, &DumpOptions::default()).unwrap();
    fresh_fields(&folder);

    let outcome = fx.db.reload_all(&folder, ReloadAllOptions::default()).unwrap();

    assert_eq!(outcome.reloaded, vec!["nf_fields"]);
    assert!(outcome.created.is_empty() && outcome.failures.is_empty());
    assert_eq!(fx.rows("nf_fields").len(), 2);
    assert_eq!(fx.rows("nf_fields_old1").len(), 3);
    assert!(!fx.exists("nf_fields_tmp"));
    // The meta file was loaded during the swap
    assert!(fx.take_statements().iter().any(|s| s.starts_with(r#"COPY "meta_tables""#)));

    assert_eq!(fx.db.reload_all_revert(&folder).unwrap(), vec!["nf_fields"]);
    assert_eq!(fx.rows("nf_fields").len(), 3);
    assert_eq!(fx.rows("nf_fields_old1").len(), 2);

    fx.db.cleanup_all().unwrap();
    assert!(!fx.exists("nf_fields_old1"));
    assert_eq!(fx.rows("nf_fields").len(), 3);
}

#[test]
fn unknown_tables_need_adjust_schema() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    fresh_fields(dir.path());
    write_data(dir.path(), "ec_curves.txt", &[("label", "text"), ("conductor", "bigint")], &["11.a1|11"]);

    let err = fx.db.reload_all(dir.path(), ReloadAllOptions::default()).unwrap_err();

    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert!(err.context.contains("ec_curves"));
    assert!(!fx.exists("ec_curves"));
    assert!(!fx.exists("nf_fields_tmp"));
}

#[test]
fn adjust_schema_creates_tables_from_dump() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    fresh_fields(dir.path());
    write_data(
        dir.path(),
        "ec_curves.txt",
        &[("label", "text"), ("conductor", "bigint")],
        &["11.a1|11", "14.a1|14", "15.a1|15"],
    );
    fs::write(
        dir.path().join("ec_curves_meta.txt"),
        "ec_curves|\\N|\\N|f|f|f|t|label|3|f|f|Elliptic curves|{}\n",
    )
    .unwrap();
    describe_as(&fx.backend, "ec_curves", None, false, false);
    let options = ReloadAllOptions {
        reload: ReloadOptions { adjust_schema: true, ..ReloadOptions::default() },
        ..ReloadAllOptions::default()
    };

    let outcome = fx.db.reload_all(dir.path(), options).unwrap();

    assert_eq!(outcome.created, vec!["ec_curves"]);
    assert_eq!(outcome.reloaded, vec!["ec_curves", "nf_fields"]);
    let curves = fx.backend.table("ec_curves").unwrap();
    let columns: Vec<&str> = curves.columns.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(columns, vec!["id", "label", "conductor"]);
    assert_eq!(curves.rows.len(), 3);
    assert!(fx.exists("ec_curves_counts") && fx.exists("ec_curves_stats"));
    assert!(fx.exists("ec_curves_old1"));
    assert!(fx.db.has_table("ec_curves"));
}

#[test]
fn database_errors_can_skip_a_table() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    fresh_fields(dir.path());
    fx.backend.fail_on(r#"^COPY "nf_fields_tmp""#);

    let err = fx.db.reload_all(dir.path(), ReloadAllOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Database);
    fx.table().drop_tmp().unwrap();

    let options = ReloadAllOptions { halt_on_errors: false, ..ReloadAllOptions::default() };
    let outcome = fx.db.reload_all(dir.path(), options).unwrap();
    assert!(outcome.reloaded.is_empty());
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].0, "nf_fields");
    assert_eq!(fx.rows("nf_fields").len(), 3);
}

#[test]
fn reload_all_needs_a_folder() {
    let fx = nf_fields().build();
    let dir = tempfile::tempdir().unwrap();
    let err = fx.db.reload_all(&dir.path().join("absent"), ReloadAllOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
}
