//! 分片 MP4 与流式数据源端到端测试.
//!
//! 覆盖: 数据不足时的 `NeedMoreData` 与重试, 逐分片的延迟扩展及其步数上限,
//! 缓冲时长, 流末尾, 以及 CENC 加密信息与合并后的 PSSH.

mod common;

use common::{
    FRAGMENT_SAMPLE_SIZE, KEY_ID, be32, build_box, build_encrypted_fragmented, build_fullbox,
    fragment_iv, sample_payload,
};
use mex::core::{PLAYREADY_SYSTEM_ID, WIDEVINE_SYSTEM_ID};
use mex::{
    CryptoInfo, CryptoMode, ExtractorOptions, ExtractorState, MediaExtractor, MexError,
    SampleFlags, SeekMode, StreamingSource, Subsample, keys,
};

/// 3 个分片, 每个 4 帧 (100ms), 每个分片首帧为关键帧
fn movie() -> common::FragmentedMovie {
    let _ = env_logger::builder().is_test(true).try_init();
    build_encrypted_fragmented(3, 4)
}

// ========================
// 完整数据
// ========================

#[test]
fn test_分片文件完整遍历() {
    let mut ex = MediaExtractor::new();
    ex.set_data_source_bytes(movie().concat()).unwrap();
    assert_eq!(ex.track_count().unwrap(), 1);

    let format = ex.track_format(0).unwrap();
    assert_eq!(format.mime(), Some("video/avc"));
    assert_eq!(format.get_int(keys::CRYPTO_MODE), Some(CryptoMode::AesCtr as i64));
    assert_eq!(format.get_int(keys::CRYPTO_DEFAULT_IV_SIZE), Some(8));
    assert_eq!(
        format.get_bytes(keys::CRYPTO_KEY).map(|b| b.to_vec()),
        Some(KEY_ID.to_vec())
    );

    ex.select_track(0).unwrap();
    let mut times = Vec::new();
    let mut syncs = Vec::new();
    let mut buf = vec![0u8; 256];
    while ex.advance().unwrap() {
        let row = times.len();
        times.push(ex.sample_time().unwrap().unwrap());
        let flags = ex.sample_flags().unwrap();
        assert!(flags.contains(SampleFlags::ENCRYPTED));
        if flags.contains(SampleFlags::SYNC) {
            syncs.push(row);
        }
        let size = ex.read_sample_data(&mut buf, 0).unwrap().unwrap();
        assert_eq!(&buf[..size], sample_payload(0, row, FRAGMENT_SAMPLE_SIZE).as_slice());
    }

    assert_eq!(times, (0..12).map(|i| i * 100_000).collect::<Vec<i64>>());
    assert_eq!(syncs, vec![0, 4, 8]);
    assert_eq!(ex.state(), ExtractorState::Exhausted);
    assert_eq!(
        ex.track_format(0).unwrap().get_int(keys::DURATION_US),
        Some(1_200_000)
    );
}

#[test]
fn test_分片文件定位触发扩展() {
    let mut ex = MediaExtractor::new();
    ex.set_data_source_bytes(movie().concat()).unwrap();
    ex.select_track(0).unwrap();

    ex.seek_to(650_000, SeekMode::PreviousSync).unwrap();
    assert_eq!(ex.sample_time().unwrap(), Some(400_000));

    ex.seek_to(650_000, SeekMode::NextSync).unwrap();
    assert_eq!(ex.sample_time().unwrap(), Some(800_000));

    ex.seek_to(1_000_000, SeekMode::ClosestSync).unwrap();
    assert_eq!(ex.sample_time().unwrap(), Some(800_000));
}

#[test]
fn test_加密信息() {
    let mut ex = MediaExtractor::new();
    ex.set_data_source_bytes(movie().concat()).unwrap();
    ex.select_track(0).unwrap();

    let mut info = CryptoInfo::default();
    // 没有当前采样时不写入
    assert!(!ex.sample_crypto_info(&mut info).unwrap());
    assert_eq!(info, CryptoInfo::default());

    ex.seek_to(500_000, SeekMode::PreviousSync).unwrap();
    assert!(ex.advance().unwrap());
    assert_eq!(ex.sample_time().unwrap(), Some(500_000));
    assert!(ex.sample_crypto_info(&mut info).unwrap());

    assert_eq!(info.mode, CryptoMode::AesCtr);
    assert_eq!(info.key_id, KEY_ID);
    assert_eq!(info.iv, fragment_iv(1, 1));
    assert_eq!(
        info.subsamples,
        vec![Subsample {
            clear_bytes: 16,
            encrypted_bytes: FRAGMENT_SAMPLE_SIZE - 16,
        }]
    );
    assert_eq!(info.covered_bytes(), u64::from(FRAGMENT_SAMPLE_SIZE));
}

#[test]
fn test_pssh_随分片合并() {
    let mut ex = MediaExtractor::new();
    ex.set_data_source_bytes(movie().concat()).unwrap();

    // 打开时只有 moov 中的 Widevine
    let pssh = ex.pssh_info().unwrap().unwrap();
    assert_eq!(pssh.len(), 1);
    assert_eq!(pssh.get(&WIDEVINE_SYSTEM_ID), Some(&b"wv-init"[..]));

    ex.select_track(0).unwrap();
    assert!(ex.advance().unwrap());

    let pssh = ex.pssh_info().unwrap().unwrap();
    assert_eq!(pssh.len(), 2);
    assert_eq!(pssh.entries()[0].system_id, WIDEVINE_SYSTEM_ID);
    assert_eq!(pssh.get(&PLAYREADY_SYSTEM_ID), Some(&b"pr-fragment"[..]));
    assert!(pssh.to_map().contains_key(&PLAYREADY_SYSTEM_ID));
}

// ========================
// 长文件与扩展步数上限
// ========================

/// 不含任何轨道的 moof
fn empty_moof(sequence: u32) -> Vec<u8> {
    build_box(b"moof", &build_fullbox(b"mfhd", 0, 0, &be32(&[sequence])))
}

/// 反复调用, 直到不再返回 `ExtendLimitReached`; 返回最终结果与重试次数
fn retry_limited<T>(mut call: impl FnMut() -> Result<T, MexError>) -> (Result<T, MexError>, usize) {
    let mut retries = 0;
    loop {
        match call() {
            Err(MexError::ExtendLimitReached(_)) => retries += 1,
            other => return (other, retries),
        }
    }
}

#[test]
fn test_长分片文件深度定位() {
    let _ = env_logger::builder().is_test(true).try_init();
    let data = build_encrypted_fragmented(100, 4).concat();

    for mode in [SeekMode::PreviousSync, SeekMode::NextSync, SeekMode::ClosestSync] {
        let mut ex = MediaExtractor::new();
        ex.set_data_source_bytes(data.clone()).unwrap();
        ex.select_track(0).unwrap();

        ex.seek_to(30_000_000, mode).unwrap();
        assert_eq!(ex.sample_time().unwrap(), Some(30_000_000), "{mode}");
        let mut info = CryptoInfo::default();
        assert!(ex.sample_crypto_info(&mut info).unwrap());
        assert_eq!(info.iv, fragment_iv(75, 0));

        assert!(ex.advance().unwrap());
        assert_eq!(ex.sample_time().unwrap(), Some(30_100_000));
    }
}

#[test]
fn test_扩展上限时不误判为结束() {
    let movie = movie();
    let mut data = movie.init.clone();
    data.extend(empty_moof(100));
    data.extend(empty_moof(101));
    for fragment in &movie.fragments {
        data.extend_from_slice(fragment);
    }

    let mut ex = MediaExtractor::with_options(ExtractorOptions::default().with_max_extend_steps(1));
    ex.set_data_source_bytes(data).unwrap();
    ex.select_track(0).unwrap();

    for _ in 0..2 {
        assert!(matches!(ex.advance(), Err(MexError::ExtendLimitReached(1))));
        assert_ne!(ex.state(), ExtractorState::Exhausted);
        assert_eq!(ex.sample_time().unwrap(), None);
    }

    let mut times = Vec::new();
    while ex.advance().unwrap() {
        times.push(ex.sample_time().unwrap().unwrap());
    }
    assert_eq!(times, (0..12).map(|i| i * 100_000).collect::<Vec<i64>>());
    assert_eq!(ex.state(), ExtractorState::Exhausted);
}

#[test]
fn test_稀疏分片跨越扩展上限() {
    let movie = build_encrypted_fragmented(2, 4);
    let mut data = movie.init.clone();
    data.extend_from_slice(&movie.fragments[0]);
    for sequence in 0..5 {
        data.extend(empty_moof(100 + sequence));
    }
    data.extend_from_slice(&movie.fragments[1]);

    let mut ex = MediaExtractor::with_options(ExtractorOptions::default().with_max_extend_steps(2));
    ex.set_data_source_bytes(data).unwrap();
    ex.select_track(0).unwrap();
    for _ in 0..4 {
        assert!(ex.advance().unwrap());
    }
    assert_eq!(ex.sample_time().unwrap(), Some(300_000));

    // 下一个采样在 5 个空分片之后, 需要 6 步扩展
    let (more, retries) = retry_limited(|| {
        let result = ex.advance();
        if result.is_err() {
            assert_eq!(ex.sample_time().unwrap(), Some(300_000));
            assert_ne!(ex.state(), ExtractorState::Exhausted);
        }
        result
    });
    assert!(more.unwrap());
    assert_eq!(retries, 2);
    assert_eq!(ex.sample_time().unwrap(), Some(400_000));

    let mut count = 1;
    while ex.advance().unwrap() {
        count += 1;
    }
    assert_eq!(count, 4);
}

#[test]
fn test_定位受扩展上限约束() {
    let data = build_encrypted_fragmented(10, 4).concat();
    let mut ex = MediaExtractor::with_options(ExtractorOptions::default().with_max_extend_steps(3));
    ex.set_data_source_bytes(data).unwrap();
    ex.select_track(0).unwrap();

    // 3.0s 之后的第一个关键帧在第 9 个分片
    let (result, retries) = retry_limited(|| {
        let result = ex.seek_to(3_000_000, SeekMode::NextSync);
        if result.is_err() {
            assert_eq!(ex.sample_time().unwrap(), None);
        }
        result
    });
    result.unwrap();
    assert_eq!(retries, 2);
    assert_eq!(ex.sample_time().unwrap(), Some(3_200_000));
}

// ========================
// 流式数据源
// ========================

#[test]
fn test_初始化段不完整时重试打开() {
    let movie = movie();
    let (source, writer) = StreamingSource::new();
    writer.append(&movie.init[..20]);

    let mut ex = MediaExtractor::new();
    assert!(matches!(
        ex.set_data_source(source),
        Err(MexError::NeedMoreData)
    ));
    assert_eq!(ex.state(), ExtractorState::Unopened);
    assert!(matches!(ex.retry_open(), Err(MexError::NeedMoreData)));

    writer.append(&movie.init[20..]);
    ex.retry_open().unwrap();
    assert_eq!(ex.track_count().unwrap(), 1);
    assert!(matches!(ex.retry_open(), Err(MexError::InvalidArgument(_))));
}

#[test]
fn test_流式逐分片推进() {
    let movie = movie();
    let (source, writer) = StreamingSource::new();
    writer.append(&movie.init);

    let mut ex = MediaExtractor::new();
    ex.set_data_source(source.with_name("live.mp4")).unwrap();
    ex.select_track(0).unwrap();
    assert_eq!(ex.cached_duration_us().unwrap(), Some(0));
    assert!(!ex.has_cache_reached_end_of_stream().unwrap());

    // 还没有任何分片
    assert!(matches!(ex.advance(), Err(MexError::NeedMoreData)));
    assert_eq!(ex.sample_time().unwrap(), None);

    writer.append(&movie.fragments[0]);
    assert!(ex.advance().unwrap());
    assert_eq!(ex.sample_time().unwrap(), Some(0));
    assert_eq!(ex.cached_duration_us().unwrap(), Some(300_000));

    for _ in 1..4 {
        assert!(ex.advance().unwrap());
    }
    assert_eq!(ex.sample_time().unwrap(), Some(300_000));
    assert_eq!(ex.cached_duration_us().unwrap(), Some(0));

    // 下一个分片未到达: 游标保持不动
    assert!(matches!(ex.advance(), Err(MexError::NeedMoreData)));
    assert_eq!(ex.sample_time().unwrap(), Some(300_000));

    writer.append(&movie.fragments[1]);
    writer.append(&movie.fragments[2]);
    writer.finish();
    assert!(ex.has_cache_reached_end_of_stream().unwrap());

    let mut times = Vec::new();
    while ex.advance().unwrap() {
        times.push(ex.sample_time().unwrap().unwrap());
    }
    assert_eq!(times, (4..12).map(|i| i * 100_000).collect::<Vec<i64>>());
    assert!(!ex.advance().unwrap());
}

#[test]
fn test_流在_moof_中途结束() {
    let movie = movie();
    let (source, writer) = StreamingSource::new();
    writer.append(&movie.init);

    let mut ex = MediaExtractor::new();
    ex.set_data_source(source).unwrap();
    ex.select_track(0).unwrap();

    writer.append(&movie.fragments[0][..30]);
    assert!(matches!(ex.advance(), Err(MexError::NeedMoreData)));

    writer.finish();
    assert!(matches!(
        ex.advance(),
        Err(MexError::MalformedContainer(_))
    ));
    assert_eq!(ex.sample_time().unwrap(), None);
}
