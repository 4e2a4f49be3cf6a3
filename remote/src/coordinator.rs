use std::sync::Arc;

use common::{Node, Summary};
use tracing::instrument;

use crate::Error;
use crate::encoder;
use crate::transport::{Completion, RemoteProcess};

fn check_completion(completion: Completion) -> Result<(), Error> {
    match completion {
        Completion::Exited { status: 0, .. } => Ok(()),
        Completion::Exited {
            status,
            diagnostics,
        } => Err(Error::RemoteExit {
            status,
            message: diagnostics,
        }),
        Completion::Signaled { signal } => Err(Error::RemoteSignal { signal }),
    }
}

/// Streams `root` into `process` and waits for the process to finish.
///
/// The tree is written from a separate task while this one watches the
/// process. Whichever side fails first decides the error: a writer failure
/// is returned as soon as it happens, a remote failure aborts the writer.
/// Input is closed once the whole tree is written. Succeeds only when the
/// tree was fully written and the process exited with status 0.
///
/// The process is closed before returning, whatever the outcome.
#[instrument(skip_all, fields(root = root.basename()))]
pub async fn run<P: RemoteProcess>(
    mut process: P,
    root: Arc<Node>,
    chunk_size: usize,
) -> Result<Summary, Error> {
    let result = stream_and_wait(&mut process, root, chunk_size).await;
    if let Err(error) = process.close().await {
        match &result {
            Ok(_) => tracing::debug!("closing finished remote process: {error:#}"),
            Err(_) => tracing::warn!("failed to close remote process: {error:#}"),
        }
    }
    result
}

async fn stream_and_wait<P: RemoteProcess>(
    process: &mut P,
    root: Arc<Node>,
    chunk_size: usize,
) -> Result<Summary, Error> {
    let stdin = process.take_stdin().ok_or_else(|| {
        Error::transport(
            "remote process input unavailable",
            anyhow::anyhow!("input stream was already taken"),
        )
    })?;
    let mut writer =
        tokio::spawn(async move { encoder::send_tree(stdin, &root, chunk_size).await });
    let mut written: Option<Summary> = None;
    loop {
        // CANCEL SAFETY: `writer` is polled by reference and survives the
        // loop; `RemoteProcess::wait` keeps its progress in the process.
        // Biased so a finished writer always gets its input closed first.
        tokio::select! {
            biased;
            joined = &mut writer, if written.is_none() => {
                let summary = joined.map_err(Error::WriterTask)??;
                tracing::debug!("tree written, closing remote input");
                if let Err(error) = process.close_stdin().await {
                    // the exit status still decides the outcome
                    tracing::warn!("failed to close remote input: {error:#}");
                }
                written = Some(summary);
            }
            completion = process.wait() => {
                if let Err(error) = completion.and_then(check_completion) {
                    tracing::debug!("remote side failed first: {error}");
                    writer.abort();
                    return Err(error);
                }
                let summary = match written {
                    Some(summary) => summary,
                    None => {
                        tracing::debug!("remote exited before the writer finished");
                        writer.await.map_err(Error::WriterTask)??
                    }
                };
                tracing::info!("transfer complete");
                return Ok(summary);
            }
        }
    }
}
