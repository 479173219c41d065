//! Benchmarks for end-to-end synchronization over the simulated link

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use rd_core::Lifetime;
use rd_demo::DemoRoot;
use rd_test::{LinkConfig, ModelPair};

fn connected(link: LinkConfig) -> (ModelPair, DemoRoot, DemoRoot) {
    let pair = ModelPair::new(link);
    let (a, b) = (DemoRoot::new(), DemoRoot::new());
    a.connect(&Lifetime::eternal(), pair.client()).expect("client connects");
    b.connect(&Lifetime::eternal(), pair.server()).expect("server connects");
    (pair, a, b)
}

fn bench_property_sync(c: &mut Criterion) {
    let (pair, a, b) = connected(LinkConfig::ordered());
    let mut next = 0i32;
    c.bench_function("property_set_and_deliver", |bench| {
        bench.iter(|| {
            next = next.wrapping_add(1);
            a.counter().set(next);
            pair.pump();
            black_box(b.counter().get())
        })
    });
}

fn bench_list_burst(c: &mut Criterion) {
    c.bench_function("list_burst_100_reordered", |bench| {
        bench.iter_batched(
            || connected(LinkConfig::default().with_seed(1)),
            |(pair, a, b)| {
                for i in 0..100 {
                    a.items().add(format!("item-{}", i));
                    a.scores().insert(format!("k{}", i % 10), i);
                }
                pair.pump();
                black_box(b.items().len())
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_property_sync, bench_list_burst);
criterion_main!(benches);
