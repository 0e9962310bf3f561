use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use branchcov_core::{CounterRegistry, CoveredCode, Evaluator};
use std::sync::Arc;

const BRANCHY_BLOCK: &str = r#"
if total > 10 && total.even?
  total -= 3
elsif total < 0 || total.odd?
  total += 1 unless total == 7
else
  total = (total * 2 rescue 0)
end
"#;

fn program(blocks: usize) -> String {
    let mut source = String::from("total = 5\n");
    for _ in 0..blocks {
        source.push_str(BRANCHY_BLOCK);
    }
    source.push_str("total\n");
    source
}

fn loop_program(iterations: usize) -> String {
    format!(
        r#"
i = 0
sum = 0
while i < {iterations}
  sum += i if i.odd?
  i += 1
end
sum
"#
    )
}

fn bench_instrument(c: &mut Criterion) {
    let mut group = c.benchmark_group("instrument");

    for blocks in [1, 10, 100].iter() {
        let source = program(*blocks);
        group.bench_with_input(BenchmarkId::new("parse_and_rewrite", blocks), blocks, |b, _| {
            b.iter(|| {
                let mut unit = CoveredCode::builder()
                    .source(source.as_str())
                    .registry(Arc::new(CounterRegistry::new()))
                    .build()
                    .unwrap();
                black_box(unit.instrumented_source().unwrap().len());
            });
        });
    }

    group.finish();
}

fn bench_execution_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution_overhead");

    for iterations in [10, 100, 1000].iter() {
        let source = loop_program(*iterations);
        let registry = Arc::new(CounterRegistry::new());
        let mut unit = CoveredCode::builder()
            .source(source.as_str())
            .registry(Arc::clone(&registry))
            .build()
            .unwrap();
        let mut evaluator = Evaluator::with_registry(Arc::clone(&registry)).unwrap();
        unit.execute(&mut evaluator).unwrap();
        let instrumented = unit.instrumented_source().unwrap().to_string();

        group.bench_with_input(BenchmarkId::new("original", iterations), iterations, |b, _| {
            b.iter(|| {
                let result = evaluator.eval_source(&source).unwrap();
                black_box(result);
            });
        });

        group.bench_with_input(BenchmarkId::new("instrumented", iterations), iterations, |b, _| {
            b.iter(|| {
                let result = evaluator.eval_source(&instrumented).unwrap();
                black_box(result);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_instrument, bench_execution_overhead);
criterion_main!(benches);
