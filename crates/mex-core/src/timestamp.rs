//! 时间基换算.
//!
//! 容器内部以各自的时间刻度 (timescale) 记录时间, 对外统一为微秒.

/// 微秒时间刻度
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// 将以 `timescale` 为单位的时间值换算为微秒
///
/// 通过 i128 中间值避免溢出. `timescale` 为 0 时返回 0.
pub fn ticks_to_us(ticks: i64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    let us = i128::from(ticks) * i128::from(MICROS_PER_SECOND) / i128::from(timescale);
    us.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_刻度换算为微秒() {
        assert_eq!(ticks_to_us(90000, 90000), 1_000_000);
        assert_eq!(ticks_to_us(1024, 44100), 23219);
        assert_eq!(ticks_to_us(5, 0), 0);
    }

    #[test]
    fn test_大数值不溢出() {
        let us = ticks_to_us(i64::MAX, 1);
        assert_eq!(us, i64::MAX);
    }
}
