//! Revision allocation

use std::sync::Mutex;

use burrow_common::{Did, Ticker, Tid};

/// Hands out commit revisions
///
/// One [`Ticker`] is shared by every repository on this server. A revision is greater
/// than the repository's current one and than every revision issued before it, so two
/// allocations for the same DID are always strictly ordered even if the first one is
/// abandoned.
#[derive(Debug)]
pub struct RevisionAllocator {
    ticker: Mutex<Ticker>,
}

impl RevisionAllocator {
    /// Allocator with a random clock id
    pub fn new() -> Self {
        Self {
            ticker: Mutex::new(Ticker::new()),
        }
    }

    #[cfg(test)]
    fn with_clock_id(clock_id: u16) -> Self {
        Self {
            ticker: Mutex::new(Ticker::with_clock_id(clock_id)),
        }
    }

    /// Next revision for `did`, strictly after `current`
    pub fn next_revision(&self, did: &Did, current: Option<&Tid>) -> Tid {
        let rev = self.ticker.lock().unwrap().next(current);
        tracing::trace!(%did, %rev, "allocated revision");
        rev
    }
}

impl Default for RevisionAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn never_goes_backwards() {
        let alloc = RevisionAllocator::with_clock_id(7);
        let did = Did::raw("did:plc:alloc");
        let future = Tid::from_parts(u64::MAX >> 12, 0);

        let after_future = alloc.next_revision(&did, Some(&future));
        assert!(after_future > future);

        let next = alloc.next_revision(&did, None);
        assert!(next > after_future, "ticker remembers what it issued");
    }

    #[test]
    fn concurrent_allocations_are_distinct() {
        let alloc = Arc::new(RevisionAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let alloc = alloc.clone();
                std::thread::spawn(move || {
                    let did = Did::raw("did:plc:alloc");
                    (0..200)
                        .map(|_| alloc.next_revision(&did, None))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<Tid> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
