//! Table and index management through the metadata directories.

mod common;

use relstore::ErrorKind;
use relstore::query::sort::SortKey;
use relstore::schema::index::NewIndex;
use relstore::schema::manager::NewTable;

use common::{nf_fields, single_column};

fn curves() -> NewTable {
    NewTable::new("ec_curves")
        .search("text", &["label"])
        .search("bigint", &["conductor"])
        .extra("jsonb", &["ainvs"])
        .label("label")
        .sort(vec![SortKey::asc("conductor")])
}

#[test]
fn create_table_builds_the_family() {
    let fx = nf_fields().build();

    let table = fx.db.schema().create_table(curves()).unwrap();

    let d = table.descriptor();
    assert_eq!(d.search_cols, vec!["label", "conductor"]);
    assert_eq!(d.extra_cols, vec!["ainvs"]);
    assert!(d.has_extras && d.id_ordered);
    let columns: Vec<String> = fx.backend.table("ec_curves").unwrap().columns.into_iter().map(|(n, _)| n).collect();
    assert_eq!(columns, vec!["id", "label", "conductor"]);
    for paired in ["ec_curves_extras", "ec_curves_counts", "ec_curves_stats"] {
        assert!(fx.exists(paired), "{} missing", paired);
    }
    assert!(fx.take_statements().iter().any(|s| s.starts_with("INSERT INTO meta_tables")));
    assert!(fx.db.has_table("ec_curves"));

    let err = fx.db.schema().create_table(curves()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
}

#[test]
fn invalid_tables_are_refused_before_any_ddl() {
    let fx = nf_fields().build();
    let schema = fx.db.schema();

    let bad_type = NewTable::new("ec_curves").search("int; DROP TABLE nf_fields", &["label"]);
    assert_eq!(schema.create_table(bad_type).unwrap_err().kind, ErrorKind::Configuration);
    let no_section = NewTable::new("curves").search("text", &["label"]);
    assert_eq!(schema.create_table(no_section).unwrap_err().kind, ErrorKind::InvalidArgument);
    let bad_label = NewTable::new("ec_curves").search("text", &["label"]).label("conductor");
    assert_eq!(schema.create_table(bad_label).unwrap_err().kind, ErrorKind::InvalidArgument);
    let repeated = NewTable::new("ec_curves").search("text", &["label"]).search("bigint", &["label"]);
    assert_eq!(schema.create_table(repeated).unwrap_err().kind, ErrorKind::InvalidArgument);

    assert!(fx.take_statements().is_empty());
    assert!(!fx.exists("ec_curves"));
}

#[test]
fn create_table_like_copies_columns() {
    let fx = nf_fields().build();

    let copy = fx.db.schema().create_table_like("nf_fields_copy", "nf_fields").unwrap();

    assert_eq!(copy.descriptor().search_cols, vec!["label", "degree", "disc_abs"]);
    let columns: Vec<String> = fx.backend.table("nf_fields_copy").unwrap().columns.into_iter().map(|(n, _)| n).collect();
    assert_eq!(columns, vec!["id", "label", "degree", "disc_abs"]);
}

#[test]
fn important_tables_are_not_dropped() {
    let fx = nf_fields().build();
    fx.backend.on(r#"^SELECT important FROM meta_tables WHERE name = 'nf_fields'$"#, single_column("important", &["t"]));

    let err = fx.db.schema().drop_table("nf_fields").unwrap_err();

    assert_eq!(err.kind, ErrorKind::InvalidState);
    assert!(fx.exists("nf_fields"));
}

#[test]
fn drop_table_removes_paired_tables_and_metadata() {
    let fx = nf_fields().build();

    fx.db.schema().drop_table("nf_fields").unwrap();

    for gone in ["nf_fields", "nf_fields_counts", "nf_fields_stats"] {
        assert!(!fx.exists(gone), "{} still there", gone);
    }
    let statements = fx.take_statements();
    for meta in ["meta_indexes", "meta_constraints", "meta_tables"] {
        assert!(statements.iter().any(|s| s.starts_with(&format!(r#"DELETE FROM "{}""#, meta))), "{}", meta);
    }
    assert!(!fx.db.has_table("nf_fields"));
    assert_eq!(fx.db.table("nf_fields").unwrap_err().kind, ErrorKind::NotFound);
}

#[test]
fn rename_table_moves_paired_tables_and_keys() {
    let fx = nf_fields().build();
    fx.backend.add_index("nf_fields", "nf_fields_pkey");

    fx.db.schema().rename_table("nf_fields", "nf_renamed").unwrap();

    assert!(!fx.exists("nf_fields"));
    for moved in ["nf_renamed", "nf_renamed_counts", "nf_renamed_stats"] {
        assert!(fx.exists(moved), "{} missing", moved);
    }
    assert!(fx.backend.table("nf_renamed").unwrap().indexes.contains("nf_renamed_pkey"));
    assert_eq!(fx.db.table("nf_renamed").unwrap().name(), "nf_renamed");
    assert!(!fx.db.has_table("nf_fields"));

    let err = fx.db.schema().rename_table("nf_renamed", "renamed").unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
}

#[test]
fn columns_are_added_and_dropped() {
    let fx = nf_fields().build();
    let table = fx.table();

    table.add_column("regulator", "numeric", false).unwrap();
    assert!(table.descriptor().is_search_col("regulator"));
    assert!(fx.take_statements().contains(&r#"ALTER TABLE "nf_fields" ADD COLUMN "regulator" numeric"#.to_string()));
    assert_eq!(table.add_column("regulator", "numeric", false).unwrap_err().kind, ErrorKind::InvalidArgument);
    assert_eq!(table.add_column("zk", "money2", false).unwrap_err().kind, ErrorKind::Configuration);
    assert_eq!(table.add_column("zk", "jsonb", true).unwrap_err().kind, ErrorKind::InvalidState);

    assert_eq!(table.drop_column("label").unwrap_err().kind, ErrorKind::InvalidArgument);
    table.drop_column("regulator").unwrap();
    assert!(!table.descriptor().is_search_col("regulator"));
    let columns: Vec<String> = fx.backend.table("nf_fields").unwrap().columns.into_iter().map(|(n, _)| n).collect();
    assert!(!columns.contains(&"regulator".to_string()));
}

#[test]
fn create_index_records_and_builds() {
    let fx = nf_fields().build();
    let table = fx.table();

    let name = table.create_index(NewIndex::new(&["degree", "disc_abs"])).unwrap();

    assert_eq!(name, "nf_fields_degree_disc_abs");
    let statements = fx.take_statements();
    assert!(statements.contains(
        &r#"CREATE INDEX "nf_fields_degree_disc_abs" ON "nf_fields" USING btree ("degree", "disc_abs") WITH (fillfactor = 100)"#
            .to_string()
    ));
    assert!(statements.iter().any(|s| s.starts_with("INSERT INTO meta_indexes")));
    assert!(fx.backend.table("nf_fields").unwrap().indexes.contains("nf_fields_degree_disc_abs"));

    // The name is now taken in the database
    let err = table.create_index(NewIndex::new(&["degree", "disc_abs"])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
}

#[test]
fn index_options_are_whitelisted() {
    let fx = nf_fields().build();
    let table = fx.table();

    assert_eq!(table.create_index(NewIndex::new(&["degree"]).using("zzz")).unwrap_err().kind, ErrorKind::Configuration);
    let modifiers = NewIndex::new(&["degree"]).modifiers(vec![vec!["DESC; DROP".to_string()]]);
    assert!(table.create_index(modifiers).is_err());
    let reserved = NewIndex::new(&["degree"]).named("nf_fields_degree_tmp");
    assert_eq!(table.create_index(reserved).unwrap_err().kind, ErrorKind::InvalidArgument);
    assert_eq!(table.create_index(NewIndex::new(&["regulator"])).unwrap_err().kind, ErrorKind::Query);

    assert!(!fx.take_statements().iter().any(|s| s.starts_with("CREATE INDEX")));
}
