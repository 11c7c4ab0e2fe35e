//! Benchmarks for expression evaluation and pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{Map, Value};

use recordflow::expr::Evaluator;
use recordflow::pipeline::PipelineExecutor;
use recordflow::testing::{product_record, standard_product_pipeline, test_context};

fn eval_benchmark(c: &mut Criterion) {
    let evaluator = Evaluator::new();
    let mut context = Map::new();
    context.insert("price".to_string(), Value::from(100.0));
    context.insert("qty".to_string(), Value::from(3));

    c.bench_function("eval_arithmetic", |b| {
        b.iter(|| black_box(evaluator.evaluate("input.price * input.qty * 1.2", &context)))
    });

    c.bench_function("eval_functions", |b| {
        b.iter(|| {
            black_box(evaluator.evaluate(
                "round(convert_currency(input.price, 'USD', 'EUR'), 2)",
                &context,
            ))
        })
    });
}

fn pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let pipeline = standard_product_pipeline("bench");
    let executor = PipelineExecutor::default();

    c.bench_function("pipeline_100_records", |b| {
        b.iter(|| {
            let records: Vec<_> = (0..100)
                .map(|i| product_record(&format!("SKU-{i}"), 10.0 + f64::from(i)))
                .collect();
            runtime.block_on(async {
                black_box(
                    executor
                        .execute(&pipeline, records, "product", test_context("bench"))
                        .await,
                )
            })
        })
    });
}

criterion_group!(benches, eval_benchmark, pipeline_benchmark);
criterion_main!(benches);
