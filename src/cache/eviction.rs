//! LRU-biased victim selection shared by both tiers.

/// Eviction bookkeeping for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate<K> {
    pub key: K,
    pub last_access: u64,
    pub access_count: u64,
    pub size: u64,
}

/// Bytes a tier may hold after eviction: `ratio` of `budget`.
pub(crate) fn watermark_bytes(budget: u64, ratio: f64) -> u64 {
    (budget as f64 * ratio.clamp(0.0, 1.0)).floor() as u64
}

/// Pick victims oldest-first (ties: least used) until `tracked + incoming`
/// fits under `target`, or nothing is left.
pub(crate) fn select_victims<K>(
    mut candidates: Vec<Candidate<K>>,
    tracked: u64,
    incoming: u64,
    target: u64,
) -> Vec<Candidate<K>> {
    candidates.sort_by(|a, b| {
        a.last_access
            .cmp(&b.last_access)
            .then(a.access_count.cmp(&b.access_count))
    });

    let mut remaining = tracked;
    let mut victims = Vec::new();
    for candidate in candidates {
        if remaining.saturating_add(incoming) <= target {
            break;
        }
        remaining = remaining.saturating_sub(candidate.size);
        victims.push(candidate);
    }
    victims
}
