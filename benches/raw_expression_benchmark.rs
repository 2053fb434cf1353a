use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relstore::query::raw::compile_raw;
use relstore::query::types::{ColumnMap, ColumnType};

fn numeric_columns() -> ColumnMap {
    ["degree", "r2", "disc_abs", "class_number", "regulator"]
        .into_iter()
        .map(|name| (name.to_string(), ColumnType::parse("numeric")))
        .collect()
}

fn bench_compile_raw(c: &mut Criterion) {
    let columns = numeric_columns();
    let mut group = c.benchmark_group("compile_raw");
    let expressions = [
        ("column", "degree"),
        ("arithmetic", "degree - 2*r2"),
        ("nested", "(class_number * regulator) / (degree + 1) - disc_abs / 7"),
        ("long", "degree + r2 + disc_abs + class_number + regulator + degree*r2*disc_abs - (r2 + 1)*(degree - 1)"),
    ];
    for (name, expr) in expressions {
        group.bench_with_input(BenchmarkId::from_parameter(name), expr, |b, expr| {
            b.iter(|| black_box(compile_raw(black_box(expr), "nf_fields", &columns).unwrap()));
        });
    }
    group.finish();
}

fn bench_rejections(c: &mut Criterion) {
    let columns = numeric_columns();
    c.bench_function("compile_raw_rejects_injection", |b| {
        b.iter(|| black_box(compile_raw(black_box("degree; DROP TABLE nf_fields"), "nf_fields", &columns).is_err()));
    });
}

criterion_group!(benches, bench_compile_raw, bench_rejections);
criterion_main!(benches);
