//! Dynamic readahead for sequential block reads.
//!
//! Each reader owns a [`ReadaheadState`] and feeds it every block read. Once
//! enough sequential reads accumulate, the state machine starts signalling
//! prefetches whose size doubles per read up to a configured maximum; a read
//! far outside the expected window resets everything.

/// Sequential reads required before readahead is considered worthwhile.
const MIN_READS_FOR_READAHEAD: u64 = 2;

/// Size of the first prefetch (64 KiB). Growth is exponential from here.
pub const INITIAL_READAHEAD_SIZE: u64 = 64 << 10;

/// Per-reader readahead state, updated on every block read.
#[derive(Debug, Clone)]
pub struct ReadaheadState {
    /// Number of sequential reads observed.
    num_reads: u64,
    max_readahead_size: u64,
    /// Size for the next prefetch; starts at [`INITIAL_READAHEAD_SIZE`] and
    /// doubles until `max_readahead_size`.
    size: u64,
    /// Size used by the last prefetch.
    prev_size: u64,
    /// Offset up to which the OS has been asked to read ahead. Reads below
    /// this limit should not touch the device; reads past it can benefit
    /// from a new prefetch.
    limit: u64,
}

impl ReadaheadState {
    /// Creates state with the given prefetch ceiling.
    pub fn new(max_readahead_size: u64) -> Self {
        Self {
            num_reads: 0,
            max_readahead_size,
            size: INITIAL_READAHEAD_SIZE,
            prev_size: 0,
            limit: 0,
        }
    }

    /// Records a read served from cache. Advances the window without growing
    /// the prefetch size — the data was already resident, so no new
    /// readahead is warranted yet.
    pub fn record_cache_hit(&mut self, offset: u64, block_length: u64) {
        let _ = self.step(offset, block_length, false);
    }

    /// Records a read of `block_length` bytes at `offset`; returns the
    /// number of bytes to prefetch if readahead would be beneficial.
    pub fn maybe_readahead(&mut self, offset: u64, block_length: u64) -> Option<u64> {
        self.step(offset, block_length, true)
    }

    fn step(&mut self, offset: u64, block_length: u64, readahead: bool) -> Option<u64> {
        debug_assert!(self.max_readahead_size > 0, "readahead state not initialized");
        let current_read_end = offset + block_length;

        if self.num_reads >= MIN_READS_FOR_READAHEAD {
            // Two intervals matter: the read itself, [offset,
            // current_read_end], and the window a read would have to land in
            // to extend the sequential run, [limit, limit +
            // max_readahead_size]. The window uses the maximum rather than
            // the current size so a run is not broken while the prefetch
            // size is still ramping up.
            if current_read_end >= self.limit && offset <= self.limit + self.max_readahead_size {
                // Reading ahead of the last readahead range.
                self.num_reads += 1;
                if readahead {
                    self.limit = offset + self.size;
                    self.prev_size = self.size;
                    self.size = (self.size * 2).min(self.max_readahead_size);
                    return Some(self.prev_size);
                }
                // A cache hit that would have triggered readahead: only
                // advance the window.
                self.limit = current_read_end;
                return None;
            }
            if current_read_end + self.prev_size < self.limit
                || offset > self.limit + self.max_readahead_size
            {
                // Too far behind or too far ahead to benefit in any
                // scenario.
                self.reset(current_read_end);
                return None;
            }
            // A read inside [limit - prev_size, limit): already prefetched,
            // nothing new to issue.
            self.num_reads += 1;
            return None;
        }

        // Below the threshold; track whether reads look sequential so
        // readahead can kick in later.
        if current_read_end >= self.limit && offset <= self.limit + self.max_readahead_size {
            self.num_reads += 1;
            self.limit = current_read_end;
            return None;
        }

        // A random read; start over.
        self.reset(current_read_end);
        None
    }

    fn reset(&mut self, current_read_end: u64) {
        self.num_reads = 1;
        self.limit = current_read_end;
        self.size = INITIAL_READAHEAD_SIZE;
        self.prev_size = 0;
    }
}

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u64 = 1 << 20; // 1 MiB
    const K4: u64 = 4 << 10;

    #[test]
    fn test_sequential_scan_grows_prefetches_geometrically() {
        let mut rs = ReadaheadState::new(MAX);

        // The first two reads only prime the state.
        assert_eq!(rs.maybe_readahead(0, K4), None);
        assert_eq!(rs.maybe_readahead(K4, K4), None);

        // Over a long sequential scan, each prefetch is issued as the reads
        // cross the previous limit, and the sizes double up to the maximum.
        let mut prefetches = Vec::new();
        let mut offset = 2 * K4;
        for _ in 0..600 {
            if let Some(size) = rs.maybe_readahead(offset, K4) {
                prefetches.push(size);
            }
            offset += K4;
        }
        assert!(prefetches.len() >= 5);
        assert_eq!(
            &prefetches[..5],
            &[
                INITIAL_READAHEAD_SIZE,
                2 * INITIAL_READAHEAD_SIZE,
                4 * INITIAL_READAHEAD_SIZE,
                8 * INITIAL_READAHEAD_SIZE,
                MAX,
            ]
        );
        assert!(prefetches.iter().all(|&s| s <= MAX));
    }

    #[test]
    fn test_growth_caps_at_max() {
        let mut rs = ReadaheadState::new(2 * INITIAL_READAHEAD_SIZE);
        rs.maybe_readahead(0, K4);
        rs.maybe_readahead(K4, K4);

        // Chase the limit so every read triggers a prefetch.
        let mut last = 0;
        for _ in 0..6 {
            let offset = rs.limit;
            if let Some(size) = rs.maybe_readahead(offset, K4) {
                assert!(size <= 2 * INITIAL_READAHEAD_SIZE);
                last = size;
            }
        }
        assert_eq!(last, 2 * INITIAL_READAHEAD_SIZE);
    }

    #[test]
    fn test_far_read_resets() {
        let mut rs = ReadaheadState::new(MAX);
        rs.maybe_readahead(0, K4);
        rs.maybe_readahead(K4, K4);
        assert!(rs.maybe_readahead(2 * K4, K4).is_some());

        // A jump way past limit + max_readahead_size abandons the run.
        assert_eq!(rs.maybe_readahead(16 << 20, K4), None);
        assert_eq!(rs.num_reads, 1);
        assert_eq!(rs.size, INITIAL_READAHEAD_SIZE);
        assert_eq!(rs.prev_size, 0);
        assert_eq!(rs.limit, (16 << 20) + K4);
    }

    #[test]
    fn test_cache_hit_advances_window_without_growth() {
        let mut rs = ReadaheadState::new(MAX);
        rs.maybe_readahead(0, K4);
        rs.maybe_readahead(K4, K4);

        let size_before = rs.size;
        rs.record_cache_hit(2 * K4, K4);
        assert_eq!(rs.size, size_before);
        assert_eq!(rs.prev_size, 0);
        assert_eq!(rs.limit, 3 * K4);

        // The run is still considered sequential afterwards.
        assert_eq!(rs.maybe_readahead(3 * K4, K4), Some(INITIAL_READAHEAD_SIZE));
    }

    #[test]
    fn test_read_inside_prefetched_window_signals_nothing() {
        let mut rs = ReadaheadState::new(MAX);
        rs.maybe_readahead(0, K4);
        rs.maybe_readahead(K4, K4);
        assert!(rs.maybe_readahead(2 * K4, K4).is_some());

        // limit is now 2*K4 + 64K; a read just below it was already
        // prefetched.
        let limit = rs.limit;
        let reads_before = rs.num_reads;
        assert_eq!(rs.maybe_readahead(limit - 2 * K4, K4), None);
        assert_eq!(rs.num_reads, reads_before + 1);
    }
}
