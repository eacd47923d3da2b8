use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hpkg::{Block, Container};
use tokio::runtime::Runtime;

fn build(blocks: usize, block_size: usize) -> Container {
    let mut pkg = Container::init("bench", vec!["bench".into()], chrono::Utc::now());
    pkg.set_preview(Block::new("image/jpeg", vec![1u8; 16 * 1024]));
    for i in 0..blocks {
        pkg.add(Block::new("application/octet-stream", vec![i as u8; block_size]));
    }
    pkg
}

fn bench_pack(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let pkg = build(16, 64 * 1024);

    c.bench_function("pack_16x64k", |b| {
        b.iter(|| rt.block_on(async { black_box(pkg.to_bytes().await.unwrap()) }))
    });
}

fn bench_open_and_get(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let bytes = rt.block_on(build(256, 4 * 1024).to_bytes()).unwrap();

    c.bench_function("open_only_256_blocks", |b| {
        b.iter(|| rt.block_on(async {
            black_box(Container::from_bytes(bytes.clone()).await.unwrap().len())
        }))
    });

    c.bench_function("open_then_get_last_of_256", |b| {
        b.iter(|| rt.block_on(async {
            let pkg = Container::from_bytes(bytes.clone()).await.unwrap();
            black_box(pkg.get(255).await.unwrap())
        }))
    });
}

criterion_group!(benches, bench_pack, bench_open_and_get);
criterion_main!(benches);
