// 分片规划
//
// 纯函数，无 I/O，无共享状态。
//
// 分片大小规则：part_size = max(ceil(total / MAX_PARTS), 目标分片大小)，
// 保证无论文件多大都不会超过控制面的分片数上限。

use crate::config::MAX_PARTS;
use std::ops::Range;

/// 分片信息（规划后不可变）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// 分片索引（1 起始）
    pub index: u32,
    /// 起始字节偏移
    pub start: u64,
    /// 结束字节偏移（不含）
    pub stop: u64,
}

impl Part {
    pub fn new(index: u32, range: Range<u64>) -> Self {
        Self {
            index,
            start: range.start,
            stop: range.end,
        }
    }

    /// 分片字节长度
    pub fn len(&self) -> u64 {
        self.stop - self.start
    }

    /// 是否为空分片（仅零字节文件的唯一分片）
    pub fn is_empty(&self) -> bool {
        self.stop == self.start
    }
}

/// 计算实际分片大小
///
/// # 参数
/// * `total_bytes` - 文件总大小
/// * `target_part_size` - 目标分片大小
pub fn part_size_for(total_bytes: u64, target_part_size: u64) -> u64 {
    total_bytes.div_ceil(MAX_PARTS).max(target_part_size)
}

/// 规划分片
///
/// 零字节文件规划为恰好一个 `[0, 0)` 分片，保证空文件可表示。
///
/// # 参数
/// * `total_bytes` - 文件总大小
/// * `target_part_size` - 目标分片大小
///
/// # 返回
/// 按索引有序、连续且不重叠的分片列表
pub fn plan_parts(total_bytes: u64, target_part_size: u64) -> Vec<Part> {
    if total_bytes == 0 {
        return vec![Part::new(1, 0..0)];
    }

    let part_size = part_size_for(total_bytes, target_part_size);
    let mut parts = Vec::new();
    let mut offset = 0u64;
    let mut index = 1u32;

    while offset < total_bytes {
        let end = std::cmp::min(offset + part_size, total_bytes);
        parts.push(Part::new(index, offset..end));
        offset = end;
        index += 1;
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PART_SIZE;
    use proptest::prelude::*;

    #[test]
    fn test_part_len() {
        let part = Part::new(1, 0..1024);
        assert_eq!(part.index, 1);
        assert_eq!(part.len(), 1024);
        assert!(!part.is_empty());
    }

    #[test]
    fn test_plan_exact_multiple() {
        // 25MB 文件，1MB 分片 -> 恰好 25 个分片
        let parts = plan_parts(25 * 1024 * 1024, DEFAULT_PART_SIZE);
        assert_eq!(parts.len(), 25);
        assert_eq!(parts[0].start, 0);
        assert_eq!(parts[0].stop, 1024 * 1024);
        assert_eq!(parts[24].start, 24 * 1024 * 1024);
        assert_eq!(parts[24].stop, 25 * 1024 * 1024);
    }

    #[test]
    fn test_plan_trailing_short_part() {
        let parts = plan_parts(25 * 1024 * 1024 + 512, DEFAULT_PART_SIZE);
        assert_eq!(parts.len(), 26);
        assert_eq!(parts[25].len(), 512);
    }

    #[test]
    fn test_plan_zero_byte_file() {
        let parts = plan_parts(0, DEFAULT_PART_SIZE);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].index, 1);
        assert_eq!(parts[0].start, 0);
        assert_eq!(parts[0].stop, 0);
        assert!(parts[0].is_empty());
    }

    #[test]
    fn test_plan_small_file_single_part() {
        let parts = plan_parts(512, DEFAULT_PART_SIZE);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].len(), 512);
    }

    #[test]
    fn test_part_count_ceiling_for_huge_file() {
        // 100GB 文件：1MB 目标分片会超过 10000 片，分片大小必须被抬高
        let total = 100u64 * 1024 * 1024 * 1024;
        let parts = plan_parts(total, DEFAULT_PART_SIZE);
        assert!(parts.len() as u64 <= MAX_PARTS);
        assert!(part_size_for(total, DEFAULT_PART_SIZE) > DEFAULT_PART_SIZE);
    }

    #[test]
    fn test_indexes_are_one_based() {
        let parts = plan_parts(3 * 1024 * 1024, DEFAULT_PART_SIZE);
        let indexes: Vec<u32> = parts.iter().map(|p| p.index).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
    }

    proptest! {
        #[test]
        fn prop_parts_cover_file_exactly(
            total in 0u64..512 * 1024 * 1024,
            target in 1u64..64 * 1024 * 1024,
        ) {
            let parts = plan_parts(total, target);

            // 分片数不超过上限
            prop_assert!(parts.len() as u64 <= MAX_PARTS.max(1));
            // 字节总和等于文件大小
            let sum: u64 = parts.iter().map(|p| p.len()).sum();
            prop_assert_eq!(sum, total);
            // 连续、不重叠、索引有序
            prop_assert_eq!(parts[0].start, 0);
            for window in parts.windows(2) {
                prop_assert_eq!(window[0].stop, window[1].start);
                prop_assert_eq!(window[0].index + 1, window[1].index);
            }
            prop_assert_eq!(parts.last().unwrap().stop, total);
        }
    }
}
