//! Insert and filtered select throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use memgres_sql::Database;

fn seeded(size: usize) -> Database {
    let mut db = Database::new().expect("Failed to create database");
    db.execute("CREATE TABLE t (id int PRIMARY KEY, grp int, data text)")
        .expect("CREATE failed");
    let values: Vec<String> = (0..size)
        .map(|i| format!("({}, {}, 'data_{}')", i, i % 10, i))
        .collect();
    db.execute(&format!("INSERT INTO t VALUES {}", values.join(", ")))
        .expect("INSERT failed");
    db
}

/// Benchmark batched inserts of growing size.
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql/insert");

    for size in [100, 1000, 5000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("values", size), size, |b, &size| {
            b.iter(|| black_box(seeded(size)));
        });
    }

    group.finish();
}

/// Benchmark filtered and grouped selects over a seeded table.
fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql/select");
    let mut db = seeded(5000);

    group.bench_function("point_lookup", |b| {
        b.iter(|| black_box(db.one("SELECT data FROM t WHERE id = 4242").expect("SELECT failed")));
    });

    group.bench_function("range_filter", |b| {
        b.iter(|| {
            black_box(
                db.many("SELECT id FROM t WHERE grp = 3 AND id > 1000")
                    .expect("SELECT failed"),
            )
        });
    });

    group.bench_function("group_by", |b| {
        b.iter(|| {
            black_box(
                db.many("SELECT grp, count(*) FROM t GROUP BY grp ORDER BY grp")
                    .expect("SELECT failed"),
            )
        });
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_select);
criterion_main!(benches);
