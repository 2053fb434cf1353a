use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relstore::query::cache::QueryCache;
use relstore::query::parser::QueryParser;
use relstore::query::translator::QueryTranslator;
use relstore::query::types::{ColumnMap, ColumnType};
use serde_json::{json, Value};

/// Columns of a typical number field table
fn fixture_columns() -> ColumnMap {
    [
        ("id", "bigint"),
        ("label", "text"),
        ("degree", "smallint"),
        ("disc_abs", "numeric"),
        ("r2", "integer"),
        ("class_number", "bigint"),
        ("ramps", "integer[]"),
        ("galois", "jsonb"),
        ("is_galois", "boolean"),
    ]
    .into_iter()
    .map(|(name, ty)| (name.to_string(), ColumnType::parse(ty)))
    .collect()
}

fn queries() -> Vec<(&'static str, Value)> {
    vec![
        ("equality", json!({"degree": 6})),
        ("range", json!({"degree": {"$gte": 2, "$lte": 5}, "disc_abs": {"$lt": 1000000}})),
        ("containment", json!({"ramps": {"$contains": [2, 3]}, "galois": {"$contains": {"t": 3}}})),
        ("disjunction", json!({"$or": [{"degree": 7}, {"degree": 2, "r2": 0}, {"label": {"$startswith": "6.0"}}]})),
        (
            "nested",
            json!({
                "$and": [
                    {"is_galois": true},
                    {"$not": {"class_number": {"$in": [1, 2, 3]}}},
                    {"galois.n": {"$gt": 4}},
                    {"class_number": {"$mod": [1, 4]}}
                ]
            }),
        ),
    ]
}

/// Parse and translate without caching
fn bench_translate(c: &mut Criterion) {
    let columns = fixture_columns();
    let mut group = c.benchmark_group("translate");
    for (name, query) in queries() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &query, |b, query| {
            b.iter(|| {
                let parsed = QueryParser::new("nf_fields", &columns).parse(black_box(query)).unwrap();
                let sql = QueryTranslator::new("nf_fields", &columns).translate(&parsed).unwrap();
                black_box(sql.map(|s| s.render()));
            });
        });
    }
    group.finish();
}

/// Lookup cost once a predicate is memoized
fn bench_cache_hits(c: &mut Criterion) {
    let columns = fixture_columns();
    let cache = QueryCache::new(512);
    let query = json!({"degree": {"$gte": 2, "$lte": 5}, "ramps": {"$contains": [2]}});
    let parsed = QueryParser::new("nf_fields", &columns).parse(&query).unwrap();
    let compiled = QueryTranslator::new("nf_fields", &columns).translate(&parsed).unwrap();
    cache.put(QueryCache::key(&query), compiled);

    c.bench_function("cache_hit", |b| {
        b.iter(|| black_box(cache.get(&QueryCache::key(black_box(&query)))));
    });
}

criterion_group!(benches, bench_translate, bench_cache_hits);
criterion_main!(benches);
