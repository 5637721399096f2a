use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use platdev_core::{Device, IoMode, MEM_SIZE, Peripheral, Status};
use platdev_perf::{MmapFixture, manual_device, payload};

/// Peripheral offers `data`, one cycle moves it into the ring, a read drains it.
fn inbound_round(dev: &Device, p: &Peripheral, data: &[u8], out: &mut [u8]) -> usize {
    let token = dev.cancel_token();
    let _ = p.offer(data);
    let report = dev.poll_once();
    let mut got = 0;
    while got < data.len() {
        match dev.read(&mut out[got..], IoMode::NonBlocking, &token) {
            Ok(n) => got += n,
            Err(_) => break,
        }
    }
    black_box(report);
    got
}

/// A write is staged and one cycle flushes it to the data window.
fn outbound_round(dev: &Device, p: &Peripheral, data: &[u8]) -> usize {
    let token = dev.cancel_token();
    let _ = p.set_status(Status::WRITE_READY);
    let staged = dev.write(data, IoMode::NonBlocking, &token).unwrap_or(0);
    black_box(dev.poll_once());
    staged
}

fn bench_inbound(c: &mut Criterion) {
    let mut group = c.benchmark_group("poll/inbound");

    for len in [64usize, MEM_SIZE] {
        let data = payload(len);
        let mut out = vec![0u8; len];
        group.throughput(Throughput::Bytes(len as u64));

        let heap = Peripheral::heap();
        let dev = manual_device(heap.clone());
        group.bench_with_input(BenchmarkId::new("heap", len), &len, |b, _| {
            b.iter(|| inbound_round(&dev, &heap, &data, &mut out));
        });
        drop(dev);

        let fixture = MmapFixture::create(&format!("inbound_{len}")).expect("mmap fixture");
        let dev = manual_device(fixture.peripheral.clone());
        group.bench_with_input(BenchmarkId::new("mmap", len), &len, |b, _| {
            b.iter(|| inbound_round(&dev, &fixture.peripheral, &data, &mut out));
        });
        drop(dev);
        fixture.remove();
    }

    drop(group);
}

fn bench_outbound(c: &mut Criterion) {
    let mut group = c.benchmark_group("poll/outbound");

    for len in [64usize, MEM_SIZE] {
        let data = payload(len);
        group.throughput(Throughput::Bytes(len as u64));

        let heap = Peripheral::heap();
        let dev = manual_device(heap.clone());
        group.bench_with_input(BenchmarkId::new("heap", len), &len, |b, _| {
            b.iter(|| outbound_round(&dev, &heap, &data));
        });
        drop(dev);

        let fixture = MmapFixture::create(&format!("outbound_{len}")).expect("mmap fixture");
        let dev = manual_device(fixture.peripheral.clone());
        group.bench_with_input(BenchmarkId::new("mmap", len), &len, |b, _| {
            b.iter(|| outbound_round(&dev, &fixture.peripheral, &data));
        });
        drop(dev);
        fixture.remove();
    }

    drop(group);
}

fn bench_idle_cycle(c: &mut Criterion) {
    let heap = Peripheral::heap();
    let dev = manual_device(heap.clone());
    let _ = heap.set_status(Status::empty());
    c.bench_function("poll/idle cycle", |b| {
        b.iter(|| black_box(dev.poll_once()));
    });
}

criterion_group!(benches, bench_inbound, bench_outbound, bench_idle_cycle);
criterion_main!(benches);
