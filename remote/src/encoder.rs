use common::{Node, NodeKind, Summary};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::instrument;

use crate::Error;
use crate::protocol;

/// Default size of the read buffer and of the buffered writer.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

enum Step<'a> {
    Enter(&'a Node),
    Leave,
}

async fn write_record<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> Result<(), Error> {
    writer.write_all(data).await.map_err(Error::RemoteWrite)
}

/// Streams the body of a regular file, exactly `size` bytes.
async fn copy_content<W: AsyncWrite + Unpin>(
    writer: &mut W,
    node: &Node,
    buffer: &mut [u8],
) -> Result<u64, Error> {
    let size = node.size();
    let Some(content) = node.content() else {
        return Ok(0);
    };
    let locator = content.locator();
    let mut reader = content.open().await.map_err(|source| Error::LocalRead {
        locator: locator.clone(),
        source,
    })?;
    let mut copied = 0u64;
    while copied < size {
        let want = buffer.len().min((size - copied) as usize);
        let n = reader
            .read(&mut buffer[..want])
            .await
            .map_err(|source| Error::LocalRead {
                locator: locator.clone(),
                source,
            })?;
        if n == 0 {
            return Err(Error::SizeMismatch {
                locator,
                expected: size,
                actual: copied,
            });
        }
        write_record(writer, &buffer[..n]).await?;
        copied += n as u64;
    }
    // anything past the announced size would corrupt the framing
    let mut extra = [0u8; 1];
    if matches!(reader.read(&mut extra).await, Ok(n) if n > 0) {
        tracing::warn!("{locator} grew during transfer, sending only the first {size} bytes");
    }
    Ok(copied)
}

/// Writes `root` to `writer` as a pre-order sequence of protocol records.
///
/// The walk keeps its own stack so arbitrarily deep trees do not grow the
/// call stack. Output is flushed before returning. Bytes already written
/// when an error occurs are not retracted.
#[instrument(skip_all, fields(root = root.basename()))]
pub async fn send_tree<W: AsyncWrite + Unpin>(
    writer: W,
    root: &Node,
    chunk_size: usize,
) -> Result<Summary, Error> {
    let chunk_size = chunk_size.max(1);
    let mut writer = tokio::io::BufWriter::with_capacity(chunk_size, writer);
    let mut buffer = vec![0u8; chunk_size];
    let mut summary = Summary::default();
    let mut stack = vec![Step::Enter(root)];
    while let Some(step) = stack.pop() {
        let node = match step {
            Step::Leave => {
                write_record(&mut writer, protocol::DIRECTORY_TRAILER).await?;
                continue;
            }
            Step::Enter(node) => node,
        };
        match node.kind() {
            NodeKind::Directory { children } => {
                let header = protocol::directory_header(node.mode(), node.basename())?;
                tracing::debug!("entering directory {:?}", node.basename());
                write_record(&mut writer, header.as_bytes()).await?;
                stack.push(Step::Leave);
                stack.extend(children.iter().rev().map(Step::Enter));
                summary.directories_sent += 1;
            }
            NodeKind::File { size, .. } => {
                let header = protocol::file_header(node.mode(), *size, node.basename())?;
                tracing::trace!("sending file {:?} ({size} bytes)", node.basename());
                write_record(&mut writer, header.as_bytes()).await?;
                summary.bytes_sent += copy_content(&mut writer, node, &mut buffer).await?;
                write_record(&mut writer, protocol::FILE_TRAILER).await?;
                summary.files_sent += 1;
            }
        }
    }
    writer.flush().await.map_err(Error::RemoteWrite)?;
    Ok(summary)
}
