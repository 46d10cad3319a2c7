/// Inclusive block range scanned by one listener tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindow {
    pub from_block: u64,
    pub to_block: u64,
}

impl BlockWindow {
    pub fn block_count(&self) -> u64 {
        self.to_block - self.from_block + 1
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WindowParams {
    pub confirmation_depth: u64,
    /// Already-processed blocks re-scanned every tick
    pub backfill_window: u64,
    pub max_batch_blocks: u64,
    /// Lower bound for any scan; 0 means none
    pub start_block: u64,
}

/// Highest block considered final enough to ingest
pub fn confirmed_head(latest: u64, params: &WindowParams) -> u64 {
    latest.saturating_sub(params.confirmation_depth)
}

/// Range to scan given the chain head and the cursor, or `None` when nothing
/// new is confirmed. An unset cursor counts as already at the confirmed head.
pub fn compute_window(
    latest: u64,
    last_processed: Option<u64>,
    params: &WindowParams,
) -> Option<BlockWindow> {
    let confirmed = confirmed_head(latest, params);
    let last = last_processed.unwrap_or(confirmed);

    if confirmed <= last {
        return None;
    }

    let from_block = last
        .saturating_add(1)
        .saturating_sub(params.backfill_window)
        .max(params.start_block);
    let to_block = from_block
        .saturating_add(params.max_batch_blocks)
        .min(confirmed);

    if from_block > to_block {
        return None;
    }

    Some(BlockWindow {
        from_block,
        to_block,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> WindowParams {
        WindowParams {
            confirmation_depth: 10,
            backfill_window: 50,
            max_batch_blocks: 100,
            start_block: 0,
        }
    }

    #[test]
    fn test_reference_scenario() {
        let window = compute_window(1000, Some(950), &params()).unwrap();
        assert_eq!(window.from_block, 901);
        assert_eq!(window.to_block, 990);
    }

    #[test]
    fn test_nothing_new_confirmed() {
        assert_eq!(compute_window(1000, Some(990), &params()), None);
        assert_eq!(compute_window(1000, Some(995), &params()), None);
        // Unset cursor starts at the confirmed head
        assert_eq!(compute_window(1000, None, &params()), None);
    }

    #[test]
    fn test_batch_cap() {
        let window = compute_window(10_000, Some(1_000), &params()).unwrap();
        assert_eq!(window.from_block, 951);
        assert_eq!(window.to_block, 1_051);
    }

    #[test]
    fn test_start_block_is_lower_bound() {
        let mut p = params();
        p.start_block = 940;
        let window = compute_window(1000, Some(950), &p).unwrap();
        assert_eq!(window.from_block, 940);
        assert_eq!(window.to_block, 990);
    }

    #[test]
    fn test_young_chain_does_not_underflow() {
        let window = compute_window(30, Some(5), &params()).unwrap();
        assert_eq!(window.from_block, 0);
        assert_eq!(window.to_block, 20);
        assert_eq!(compute_window(5, None, &params()), None);
    }
}
