//! Entry equality

use crate::drive::{CHUNK_SIZE, DriveOps};
use crate::entry::Entry;
use crate::Result;

/// Whether `dst` already holds what `src` describes.
///
/// Cheap checks run first: symlink targets, the executable flag and blob
/// lengths. Content is only streamed when lengths agree and neither side
/// carries a checksum that settles the question.
pub async fn same<S, D>(
    source: &S,
    src: Option<&Entry>,
    destination: &D,
    dst: Option<&Entry>,
) -> Result<bool>
where
    S: DriveOps + ?Sized,
    D: DriveOps + ?Sized,
{
    let (Some(src), Some(dst)) = (src, dst) else {
        return Ok(false);
    };

    if src.is_symlink() || dst.is_symlink() {
        return Ok(src.linkname == dst.linkname);
    }

    if src.executable != dst.executable {
        return Ok(false);
    }

    let length = src.blob_length();
    if length != dst.blob_length() {
        return Ok(false);
    }
    if length == 0 {
        return Ok(true);
    }

    let src_sum = src.blob.as_ref().and_then(|b| b.checksum.as_deref());
    let dst_sum = dst.blob.as_ref().and_then(|b| b.checksum.as_deref());
    if let (Some(a), Some(b)) = (src_sum, dst_sum) {
        return Ok(a == b);
    }

    streams_equal(source, src, destination, dst).await
}

async fn streams_equal<S, D>(source: &S, src: &Entry, destination: &D, dst: &Entry) -> Result<bool>
where
    S: DriveOps + ?Sized,
    D: DriveOps + ?Sized,
{
    let mut left = source.read(src).await?;
    let mut right = destination.read(dst).await?;
    let mut left_buf = vec![0u8; CHUNK_SIZE];
    let mut right_buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = left.fill(&mut left_buf).await?;
        let m = right.fill(&mut right_buf).await?;
        if n != m || left_buf[..n] != right_buf[..m] {
            return Ok(false);
        }
        if n == 0 {
            return Ok(true);
        }
    }
}
