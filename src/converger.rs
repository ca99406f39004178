//! File-operation authority funneling derivative production
//!
//! Under the forwarded topology every file-producing operation is sent as a
//! message to a single authority task, which applies it through the shared
//! primitives (including their single-flight registries) and answers on a
//! one-shot reply channel. This keeps at most one in-flight producer per
//! destination path no matter how many request tasks race. With forwarding
//! disabled the authority collapses to a pass-through over the same local
//! primitives; the request state machine is unchanged either way.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::compress::Encoding;
use crate::error::{CdnError, Result};
use crate::fs_ops::{FileInfo, FilePrimitives};

/// File-producing operations the authority accepts
#[derive(Debug)]
pub enum FileOp {
    GetStats { path: PathBuf },
    GetFileContent { path: PathBuf },
    MkDir { root: PathBuf, file: PathBuf },
    WriteFile { path: PathBuf, contents: Bytes },
    WriteStream { source: PathBuf, target: PathBuf, encoding: Encoding },
    GetHash { path: PathBuf },
}

/// Successful operation replies
///
/// Stats come back in the reduced [`FileInfo`] shape; errors keep their
/// message for logging even though the request pipeline treats every
/// failure the same way.
#[derive(Debug, Clone)]
pub enum OpReply {
    Stats(FileInfo),
    Content(Bytes),
    Done,
    Hash(String),
}

/// An operation paired with its reply channel
///
/// Constructed only by [`FileAuthority::dispatch`]; public because it is
/// the item type of the forwarding channel.
pub struct OpRequest {
    op: FileOp,
    reply: oneshot::Sender<Result<OpReply>>,
}

/// Handle through which the request state machine touches the filesystem
#[derive(Clone)]
pub enum FileAuthority {
    /// Pass-through over the local primitives
    Local(Arc<FilePrimitives>),
    /// Operations forwarded to the authority task
    Forwarded(mpsc::Sender<OpRequest>),
}

impl FileAuthority {
    /// Pass-through authority over `primitives`
    pub fn local(primitives: Arc<FilePrimitives>) -> Self {
        FileAuthority::Local(primitives)
    }

    /// Spawn the authority task and return a forwarding handle
    ///
    /// Each received operation runs in its own task so slow producers do
    /// not serialize unrelated operations; the per-path single-flight
    /// inside the primitives is what elides duplicates.
    pub fn spawn(primitives: Arc<FilePrimitives>) -> Self {
        let (tx, mut rx) = mpsc::channel::<OpRequest>(256);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let primitives = Arc::clone(&primitives);
                tokio::spawn(async move {
                    let result = apply(&primitives, request.op).await;
                    if let Err(e) = &result {
                        debug!(error = %e, "forwarded file operation failed");
                    }
                    let _ = request.reply.send(result);
                });
            }
            error!("file authority channel closed, no further derivatives can be produced");
        });
        FileAuthority::Forwarded(tx)
    }

    async fn dispatch(&self, op: FileOp) -> Result<OpReply> {
        match self {
            FileAuthority::Local(primitives) => apply(primitives, op).await,
            FileAuthority::Forwarded(tx) => {
                let (reply, rx) = oneshot::channel();
                tx.send(OpRequest { op, reply })
                    .await
                    .map_err(|_| CdnError::AuthorityError("authority task gone".to_string()))?;
                rx.await
                    .map_err(|_| CdnError::AuthorityError("authority dropped reply".to_string()))?
            }
        }
    }

    pub async fn stat(&self, path: &Path) -> Result<FileInfo> {
        match self.dispatch(FileOp::GetStats { path: path.to_path_buf() }).await? {
            OpReply::Stats(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    pub async fn read_file(&self, path: &Path) -> Result<Bytes> {
        match self
            .dispatch(FileOp::GetFileContent { path: path.to_path_buf() })
            .await?
        {
            OpReply::Content(bytes) => Ok(bytes),
            other => Err(unexpected(other)),
        }
    }

    pub async fn mkdir(&self, root: &Path, file: &Path) -> Result<()> {
        match self
            .dispatch(FileOp::MkDir {
                root: root.to_path_buf(),
                file: file.to_path_buf(),
            })
            .await?
        {
            OpReply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn write_file(&self, path: &Path, contents: Bytes) -> Result<()> {
        match self
            .dispatch(FileOp::WriteFile { path: path.to_path_buf(), contents })
            .await?
        {
            OpReply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn write_stream(
        &self,
        source: &Path,
        target: &Path,
        encoding: Encoding,
    ) -> Result<()> {
        match self
            .dispatch(FileOp::WriteStream {
                source: source.to_path_buf(),
                target: target.to_path_buf(),
                encoding,
            })
            .await?
        {
            OpReply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn hash_file(&self, path: &Path) -> Result<String> {
        match self.dispatch(FileOp::GetHash { path: path.to_path_buf() }).await? {
            OpReply::Hash(digest) => Ok(digest),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(reply: OpReply) -> CdnError {
    CdnError::AuthorityError(format!("mismatched reply variant: {reply:?}"))
}

async fn apply(primitives: &FilePrimitives, op: FileOp) -> Result<OpReply> {
    match op {
        FileOp::GetStats { path } => primitives.stat(&path).await.map(OpReply::Stats),
        FileOp::GetFileContent { path } => {
            primitives.read_file(&path).await.map(OpReply::Content)
        }
        FileOp::MkDir { root, file } => primitives
            .create_dir_between(&root, &file)
            .await
            .map(|()| OpReply::Done),
        FileOp::WriteFile { path, contents } => primitives
            .write_file(&path, contents)
            .await
            .map(|()| OpReply::Done),
        FileOp::WriteStream { source, target, encoding } => primitives
            .write_stream(&source, &target, encoding)
            .await
            .map(|()| OpReply::Done),
        FileOp::GetHash { path } => primitives.hash_file(&path).await.map(OpReply::Hash),
    }
}
