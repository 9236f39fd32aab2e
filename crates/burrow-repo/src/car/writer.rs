//! CAR writing

use crate::error::{RepoError, Result};
use crate::mst::Mst;
use crate::storage::{BlockStore, get_required};
use bytes::Bytes;
use cid::Cid as IpldCid;
use iroh_car::{CarHeader, CarWriter};
use std::collections::BTreeMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Write blocks to an in-memory CAR
///
/// Blocks go out in CID order.
pub async fn write_car_bytes(
    roots: &[IpldCid],
    blocks: BTreeMap<IpldCid, Bytes>,
) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut writer = CarWriter::new(CarHeader::new_v1(roots.to_vec()), &mut buffer);

    for (cid, data) in blocks {
        writer.write(cid, data.as_ref()).await.map_err(RepoError::car)?;
    }

    writer.finish().await.map_err(RepoError::car)?;
    buffer.flush().await.map_err(RepoError::io)?;

    Ok(buffer)
}

/// Stream a full repository export rooted at `commit_cid`
///
/// Writes the commit block, then every MST node, then every record block.
pub async fn export_repo<S, W>(writer: W, commit_cid: IpldCid, mst: &Mst<S>) -> Result<()>
where
    S: BlockStore + Sync + 'static,
    W: AsyncWrite + Send + Unpin,
{
    let mut writer = CarWriter::new(CarHeader::new_v1(vec![commit_cid]), writer);

    let commit = get_required(mst.storage().as_ref(), &commit_cid).await?;
    writer.write(commit_cid, &commit).await.map_err(RepoError::car)?;

    mst.write_blocks_to_car(&mut writer).await?;

    let mut inner = writer.finish().await.map_err(RepoError::car)?;
    inner.flush().await.map_err(RepoError::io)?;
    Ok(())
}

/// [`export_repo`] into memory
pub async fn export_repo_bytes<S: BlockStore + Sync + 'static>(
    commit_cid: IpldCid,
    mst: &Mst<S>,
) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    export_repo(&mut buffer, commit_cid, mst).await?;
    Ok(buffer)
}
