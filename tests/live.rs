//! Round trip against a real server. Runs only when RELSTORE_TEST_DSN is set,
//! e.g. `host=localhost port=5432 dbname=relstore_test user=postgres`.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use relstore::schema::manager::NewTable;
use relstore::search::executor::SearchOptions;
use relstore::search::mutate::WriteOptions;
use relstore::search::projection::Projection;
use relstore::{Config, Database};

fn live() -> Option<Database> {
    let dsn = std::env::var("RELSTORE_TEST_DSN").ok()?;
    let mut config = Config::from_env();
    for pair in dsn.split_whitespace() {
        match pair.split_once('=') {
            Some(("host", v)) => config.host = v.to_string(),
            Some(("port", v)) => config.port = v.parse().unwrap(),
            Some(("dbname", v)) => config.dbname = v.to_string(),
            Some(("user", v)) => config.user = v.to_string(),
            Some(("password", v)) => config.password = Some(v.to_string()),
            _ => panic!("unexpected DSN component {}", pair),
        }
    }
    Some(Database::connect(config).unwrap())
}

fn row(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[test]
fn create_insert_search_drop() {
    let Some(db) = live() else {
        return;
    };
    db.schema().create_meta_tables().unwrap();
    let name = format!("live_{}", Uuid::new_v4().simple());
    let spec = NewTable::new(&name).search("text", &["label"]).search("smallint", &["degree"]).label("label");
    let table = db.schema().create_table(spec).unwrap();

    let rows = vec![
        row(json!({"label": "2.2.5.1", "degree": 2})),
        row(json!({"label": "2.0.3.1", "degree": 2})),
        row(json!({"label": "3.1.23.1", "degree": 3})),
    ];
    let ids = table.insert_many(&rows, WriteOptions::default()).unwrap();
    assert_eq!(ids, vec![0, 1, 2]);

    assert_eq!(table.count(&json!({"degree": 2})).unwrap(), 2);
    let result = table.search(&json!({"degree": {"$gt": 2}}), &SearchOptions::new().limit(5).with_info()).unwrap();
    assert_eq!(result.records.into_vec().unwrap(), vec![json!({"label": "3.1.23.1", "degree": 3})]);
    assert_eq!(result.info.map(|i| i.number), Some(1));

    db.schema().drop_table(&name).unwrap();
    assert!(!db.has_table(&name));
}

#[test]
fn translated_queries_select_the_same_rows_as_the_server() {
    let Some(db) = live() else {
        return;
    };
    db.schema().create_meta_tables().unwrap();
    let name = format!("live_{}", Uuid::new_v4().simple());
    let spec = NewTable::new(&name).search("smallint", &["degree"]).search("jsonb", &["tags"]);
    let table = db.schema().create_table(spec).unwrap();
    let rows = vec![
        row(json!({"degree": 2, "tags": [1, 2]})),
        row(json!({"degree": 5, "tags": [2, 3]})),
        row(json!({"degree": 7, "tags": [1]})),
    ];
    assert_eq!(table.insert_many(&rows, WriteOptions::default()).unwrap(), vec![0, 1, 2]);

    let cases = [
        (json!({"degree": {"$gte": 2, "$lte": 5}}), vec![0, 1]),
        (json!({"degree": {"$ne": 5}}), vec![0, 2]),
        (json!({"degree": {"$in": [2, 7]}}), vec![0, 2]),
        (json!({"tags": {"$contains": [2]}}), vec![0, 1]),
        (json!({"tags": {"$containedin": [1, 2]}}), vec![0, 2]),
        (json!({"tags": {"$notcontains": [1]}}), vec![1]),
        (json!({"tags": [1]}), vec![2]),
        (json!({"$or": [{"degree": 7}, {"tags": {"$contains": [3]}}]}), vec![1, 2]),
        (json!({"$and": [{"degree": {"$lt": 7}}, {"tags": {"$contains": 1}}]}), vec![0]),
    ];
    let options = SearchOptions::new().projection(Projection::WithId).limit(10);
    for (query, expected) in cases {
        let records = table.search(&query, &options).unwrap().records.into_vec().unwrap();
        let ids: BTreeSet<i64> = records.iter().filter_map(|r| r["id"].as_i64()).collect();
        assert_eq!(ids, expected.into_iter().collect(), "{}", query);
    }

    db.schema().drop_table(&name).unwrap();
}
