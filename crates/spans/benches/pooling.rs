use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use spans::{PoolingMethod, SpanPooler, SpanPoolerConfig, SpanRepresentation};

fn bench_pooling(c: &mut Criterion) {
    let device = Device::Cpu;
    let batch = 32usize;
    let seq = 128usize;
    let hidden = 768usize;
    let encoded = Tensor::randn(0f32, 1.0, (batch, seq, hidden), &device).expect("encoded");

    let starts: Vec<u32> = (0..batch).map(|b| (b * 3 % seq) as u32).collect();
    let ends: Vec<u32> = starts
        .iter()
        .map(|&start| (start as usize + 16).min(seq - 1) as u32)
        .collect();
    let start_ids = Tensor::from_vec(starts, batch, &device).expect("starts");
    let end_ids = Tensor::from_vec(ends, batch, &device).expect("ends");

    for projection in [None, Some(256usize)] {
        let mut group = c.benchmark_group(match projection {
            Some(dim) => format!("pooling/proj{dim}"),
            None => "pooling/raw".to_string(),
        });
        group.throughput(Throughput::Elements((batch * seq * hidden) as u64));
        for method in PoolingMethod::ALL {
            let mut config = SpanPoolerConfig::new(hidden, method);
            config.projection_dim = projection;
            let pooler = SpanPooler::new(config, &device, DType::F32).expect("pooler");
            group.bench_with_input(
                BenchmarkId::from_parameter(method),
                &pooler,
                |b, pooler| {
                    b.iter(|| {
                        let out = pooler
                            .pool(black_box(&encoded), &start_ids, &end_ids)
                            .expect("pool");
                        black_box(out);
                    });
                },
            );
        }
        group.finish();
    }
}

criterion_group!(benches, bench_pooling);
criterion_main!(benches);
