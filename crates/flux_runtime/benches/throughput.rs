//! Processor throughput benchmarks

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use flux_core::{DropPolicy, FluxConfig};
use flux_runtime::{FluxPipeline, FluxProcessor, FluxStage, from_fn};
use futures::StreamExt;
use futures::stream;
use std::sync::Arc;

fn unbounded() -> FluxConfig {
    FluxConfig::new().with_entropy_decay(0.0)
}

fn bench_single_processor(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("processor");

    for events in [1_000u64, 10_000] {
        group.throughput(Throughput::Elements(events));
        for policy in [DropPolicy::Block, DropPolicy::DropOldest] {
            group.bench_with_input(
                BenchmarkId::new(policy.as_str(), events),
                &events,
                |b, &events| {
                    b.iter(|| {
                        runtime.block_on(async {
                            let op = from_fn("inc", |x: u64| async move { Ok(x + 1) });
                            let processor =
                                FluxProcessor::new(op, unbounded().with_drop_policy(policy)).unwrap();
                            let out = processor.start(stream::iter(0..events)).unwrap();
                            black_box(out.count().await)
                        })
                    });
                },
            );
        }
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");

    c.bench_function("pipeline_three_stages_10k", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let stages: Vec<Arc<dyn FluxStage<u64>>> = (0..3)
                    .map(|i| {
                        let op = from_fn(format!("stage{i}"), |x: u64| async move { Ok(x + 1) });
                        Arc::new(FluxProcessor::new(op, unbounded()).unwrap()) as Arc<dyn FluxStage<u64>>
                    })
                    .collect();
                let pipeline = FluxPipeline::new(stages).unwrap();
                let out = pipeline.start(stream::iter(0..10_000u64)).await.unwrap();
                black_box(out.count().await)
            })
        });
    });
}

criterion_group!(benches, bench_single_processor, bench_pipeline);
criterion_main!(benches);
