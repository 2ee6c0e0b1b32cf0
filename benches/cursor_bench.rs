//! mex 性能基准测试.
//!
//! 覆盖容器打开与索引构建, 多轨交错推进, 定位, 分片的延迟扩展.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use mex::{MediaExtractor, SeekMode};

#[path = "../tests/common/mod.rs"]
mod common;

use common::{TrackSpec, build_encrypted_fragmented, build_progressive_mp4};

/// 约 60 秒的音视频文件 (音频 1200 帧, 视频 600 帧, 每 30 帧一个关键帧)
fn long_movie() -> Vec<u8> {
    build_progressive_mp4(&[TrackSpec::aac(1200), TrackSpec::avc(600, 30)])
}

fn open(data: &[u8]) -> MediaExtractor {
    let mut ex = MediaExtractor::new();
    ex.set_data_source_bytes(data.to_vec()).unwrap();
    ex
}

fn bench_open_mp4(c: &mut Criterion) {
    let data = long_movie();
    c.bench_function("open_mp4_1800_samples", |b| {
        b.iter(|| {
            let ex = open(black_box(&data));
            black_box(ex.track_count().unwrap());
        });
    });
}

fn bench_advance_interleaved(c: &mut Criterion) {
    let data = long_movie();
    c.bench_function("advance_interleaved_2_tracks", |b| {
        b.iter(|| {
            let mut ex = open(&data);
            ex.select_track(0).unwrap();
            ex.select_track(1).unwrap();
            let mut count = 0u32;
            while ex.advance().unwrap() {
                count += 1;
            }
            black_box(count);
        });
    });
}

fn bench_read_samples(c: &mut Criterion) {
    let data = long_movie();
    c.bench_function("read_sample_data_video", |b| {
        let mut buf = vec![0u8; 8192];
        b.iter(|| {
            let mut ex = open(&data);
            ex.select_track(1).unwrap();
            let mut total = 0usize;
            while ex.advance().unwrap() {
                total += ex.read_sample_data(&mut buf, 0).unwrap().unwrap_or(0);
            }
            black_box(total);
        });
    });
}

fn bench_seek(c: &mut Criterion) {
    let data = long_movie();
    let mut ex = open(&data);
    ex.select_track(0).unwrap();
    ex.select_track(1).unwrap();
    c.bench_function("seek_closest_sync", |b| {
        let mut t = 0i64;
        b.iter(|| {
            t = (t + 7_300_000) % 60_000_000;
            ex.seek_to(black_box(t), SeekMode::ClosestSync).unwrap();
            black_box(ex.sample_time().unwrap());
        });
    });
}

fn bench_fragmented_extend(c: &mut Criterion) {
    let data = build_encrypted_fragmented(50, 30).concat();
    c.bench_function("fragmented_extend_50_moof", |b| {
        b.iter(|| {
            let mut ex = open(&data);
            ex.select_track(0).unwrap();
            let mut count = 0u32;
            while ex.advance().unwrap() {
                count += 1;
            }
            black_box(count);
        });
    });
}

criterion_group!(
    benches,
    bench_open_mp4,
    bench_advance_interleaved,
    bench_read_samples,
    bench_seek,
    bench_fragmented_extend,
);
criterion_main!(benches);
