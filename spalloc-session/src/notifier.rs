//! Notifier subtasks (spec §4.6): one per `(kind, key)` a client has
//! subscribed to, long-polling an epoch and pushing a `*_changed` message
//! through the session's shared writer.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use spalloc_error::Error;
use spalloc_facade::AllocatorFacade;
use spalloc_util::SharedWriter;
use spalloc_wire::Frame;

/// A running notifier, keyed by an optional job ID or machine name (`None`
/// means "all"). Dropping or cancelling the token stops the loop within
/// one epoch-wait iteration.
pub struct NotifierHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl NotifierHandle {
    /// Cancel the notifier and wait for its task to actually stop, so the
    /// session's write mutex is guaranteed released before returning
    /// (spec §5 cancellation contract).
    pub async fn cancel(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

pub enum Kind {
    Job { key: Option<u64> },
    Machine { key: Option<String> },
}

/// Spawn the notifier loop described in spec §4.6.
pub fn spawn<W>(
    kind: Kind,
    facade: Arc<dyn AllocatorFacade>,
    writer: SharedWriter<W>,
    wait_timeout: Duration,
) -> NotifierHandle
where
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        if let Err(err) = run(kind, facade, writer, wait_timeout, task_cancel).await {
            warn!(error = %err, "notifier terminated");
        }
    });
    NotifierHandle { cancel, task }
}

async fn run<W>(
    kind: Kind,
    facade: Arc<dyn AllocatorFacade>,
    writer: SharedWriter<W>,
    wait_timeout: Duration,
    cancel: CancellationToken,
) -> Result<(), Error>
where
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let epoch = match &kind {
            Kind::Job { .. } => facade.jobs_epoch(),
            Kind::Machine { .. } => facade.machines_epoch(),
        };
        let token = epoch.current();
        let changed = epoch.wait_for_change(token, wait_timeout, &cancel).await;
        if cancel.is_cancelled() {
            return Ok(());
        }
        if !changed {
            continue;
        }

        // Transient allocator errors are logged and the loop continues;
        // only a failure to write to the client terminates the notifier
        // (spec §4.6).
        let frame = match query(&kind, facade.as_ref()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(err) => {
                warn!(error = %err, "notifier query failed, retrying");
                continue;
            }
        };

        let line = spalloc_wire::codec::encode_frame(&frame)?;
        writer.write_line(&line).await?;
    }
}

async fn query(kind: &Kind, facade: &dyn AllocatorFacade) -> Result<Option<Frame>, Error> {
    match kind {
        Kind::Job { key } => {
            let list = facade.get_jobs(false, None, 0).await?;
            let mut ids = list.ids();
            if let Some(key) = key {
                ids.retain(|id| id == key);
            }
            Ok((!ids.is_empty()).then(|| Frame::jobs_changed(ids)))
        }
        Kind::Machine { key } => {
            let machines = facade.get_machines().await?;
            let mut names: Vec<String> = machines.into_keys().collect();
            if let Some(key) = key {
                names.retain(|name| name == key);
            }
            Ok((!names.is_empty()).then(|| Frame::machines_changed(names)))
        }
    }
}
