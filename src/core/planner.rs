use super::types::{Chunk, ChunkState};

/// 分片在文件中的字节区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: usize,
    pub offset: u64,
    pub length: u64,
}

impl ChunkRange {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

impl From<ChunkRange> for Chunk {
    fn from(range: ChunkRange) -> Self {
        Chunk {
            index: range.index,
            offset: range.offset,
            length: range.length,
            state: ChunkState::Pending,
            retries: 0,
        }
    }
}

/// `ceil(file_size / chunk_size)`；`chunk_size` 为 0 时整个文件作为一个分片
pub fn chunk_count(file_size: u64, chunk_size: u64) -> usize {
    if file_size == 0 {
        return 0;
    }
    if chunk_size == 0 {
        return 1;
    }

    file_size.div_ceil(chunk_size) as usize
}

/// 分片数大于 1 才走分片上传
pub fn needs_chunking(file_size: u64, chunk_size: u64) -> bool {
    chunk_count(file_size, chunk_size) > 1
}

/// 把文件切成连续、不重叠的区间，只有最后一片可能较短
pub fn plan(file_size: u64, chunk_size: u64) -> Vec<ChunkRange> {
    let count = chunk_count(file_size, chunk_size);
    let chunk_size = if chunk_size == 0 { file_size } else { chunk_size };

    (0..count)
        .map(|index| {
            let offset = index as u64 * chunk_size;
            ChunkRange {
                index,
                offset,
                length: chunk_size.min(file_size - offset),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(file_size: u64, ranges: &[ChunkRange]) {
        let mut expected_offset = 0;
        for (i, range) in ranges.iter().enumerate() {
            assert_eq!(range.index, i);
            assert_eq!(range.offset, expected_offset);
            assert!(range.length > 0);
            expected_offset = range.end();
        }
        assert_eq!(expected_offset, file_size);
    }

    #[test]
    fn test_plan_even_split() {
        let ranges = plan(10_000_000, 2_000_000);
        assert_eq!(ranges.len(), 5);
        assert!(ranges.iter().all(|range| range.length == 2_000_000));
        assert_partition(10_000_000, &ranges);
    }

    #[test]
    fn test_plan_short_tail() {
        let ranges = plan(10, 4);
        let lengths: Vec<u64> = ranges.iter().map(|range| range.length).collect();
        assert_eq!(lengths, vec![4, 4, 2]);
        assert_partition(10, &ranges);
    }

    #[test]
    fn test_plan_partitions_any_size() {
        for (size, chunk) in [(1, 1), (1, 5), (5 * 1024 * 1024 + 1, 1024 * 1024), (999, 7)] {
            let ranges = plan(size, chunk);
            assert_eq!(ranges.len(), chunk_count(size, chunk));
            assert_partition(size, &ranges);
        }
    }

    #[test]
    fn test_plan_empty_file() {
        assert!(plan(0, 1024).is_empty());
        assert_eq!(chunk_count(0, 1024), 0);
        assert!(!needs_chunking(0, 1024));
    }

    #[test]
    fn test_needs_chunking() {
        assert!(!needs_chunking(1024, 1024));
        assert!(needs_chunking(1025, 1024));
        assert!(!needs_chunking(1024, 0));
    }

    #[test]
    fn test_range_into_chunk() {
        let chunk: Chunk = plan(10, 4)[2].into();
        assert_eq!(chunk.offset, 8);
        assert_eq!(chunk.length, 2);
        assert_eq!(chunk.state, ChunkState::Pending);
        assert_eq!(chunk.retries, 0);
    }
}
