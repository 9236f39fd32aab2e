//! Mark-and-sweep collection of unreferenced blocks and blobs

use std::collections::BTreeSet;

use burrow_repo::{BlockStore, Repository};
use cid::Cid as IpldCid;
use tracing::{debug, info};

use crate::blobs::BlobManager;
use crate::error::Result;
use crate::pipeline::CommitPipeline;
use crate::status::RepoStatus;

/// What one collection pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Candidates examined
    pub candidates: usize,
    /// Candidates still reachable from a live head
    pub retained: usize,
    /// Blocks deleted
    pub blocks_removed: usize,
    /// Blobs deleted
    pub blobs_removed: usize,
}

/// Run one collection pass
///
/// Marks every block reachable from the head of each repository that is not deleted
/// (commit chain, tree nodes and records), then deletes the queued candidates that were
/// not marked. Blobs whose owners are all deleted are removed as well. Writes are
/// paused for the duration.
#[tracing::instrument(skip_all)]
pub async fn collect_garbage(pipeline: &CommitPipeline, blobs: &BlobManager) -> Result<GcReport> {
    let _paused = pipeline.pause_writes().await;
    let meta = pipeline.meta();
    let storage = pipeline.storage();

    let candidates = meta.gc_candidates().await?;
    let mut report = GcReport {
        candidates: candidates.len(),
        ..Default::default()
    };

    if !candidates.is_empty() {
        let mut live: BTreeSet<IpldCid> = BTreeSet::new();
        for record in meta.all_repos().await? {
            if record.status == RepoStatus::Deleted {
                continue;
            }
            let repo = Repository::from_commit(storage.clone(), &record.head).await?;
            live.extend(repo.reachable_blocks().await?);
        }

        let garbage: Vec<IpldCid> = candidates.difference(&live).copied().collect();
        report.retained = candidates.len() - garbage.len();
        report.blocks_removed = storage.delete_unreferenced(&garbage).await?;
        meta.clear_gc_candidates(candidates).await?;
        debug!(marked = live.len(), "sweep finished");
    }

    for cid in meta.orphaned_blobs().await? {
        if blobs.delete(&cid).await? {
            report.blobs_removed += 1;
        }
    }

    info!(
        candidates = report.candidates,
        blocks = report.blocks_removed,
        blobs = report.blobs_removed,
        "garbage collection complete"
    );
    Ok(report)
}
