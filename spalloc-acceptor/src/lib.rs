//! The acceptor service (spec §4.7): owns the listen socket and a bounded
//! (or cached/unbounded) pool of session tasks, and shuts both down
//! cooperatively within a grace period.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use spalloc_config::CompatConfig;
use spalloc_error::{Error, ResultExt};
use spalloc_facade::AllocatorFacade;
use spalloc_session::{Principal, Session, SessionConfig};

/// Admission control over concurrently-running sessions. `Bounded` models
/// `compat.threadPoolSize > 0` (a fixed-size executor); `Unbounded` models
/// the cached-pool fallback (spec §4.7).
enum Pool {
    Bounded(Arc<Semaphore>),
    Unbounded,
}

impl Pool {
    fn new(thread_pool_size: usize) -> Self {
        if thread_pool_size > 0 {
            Pool::Bounded(Arc::new(Semaphore::new(thread_pool_size)))
        } else {
            Pool::Unbounded
        }
    }

    /// Block until admission is granted. Returns a permit that must be
    /// held for the lifetime of the session task, if bounded.
    async fn admit(&self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        match self {
            Pool::Bounded(sem) => sem.clone().acquire_owned().await.ok(),
            Pool::Unbounded => None,
        }
    }
}

/// Owns the listen socket and the accept loop for one compat server
/// instance. Dropping or calling [`Acceptor::shutdown`] stops accepting
/// new connections and cancels every session in flight.
pub struct Acceptor {
    cancel: CancellationToken,
    accept_task: tokio::task::JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl Acceptor {
    /// Bind the configured address and start accepting connections,
    /// spawning one [`Session`] per client onto the configured pool.
    #[instrument(skip(facade), fields(bind_addr = %config.bind_addr()))]
    pub async fn bind(config: &CompatConfig, facade: Arc<dyn AllocatorFacade>) -> Result<Self, Error> {
        let listener = TcpListener::bind(config.bind_addr().as_ref())
            .await
            .err_tip(|| format!("binding compat listen socket on {}", config.bind_addr()))?;
        info!(bind_addr = %config.bind_addr(), "compat server listening");

        let session_config = SessionConfig {
            read_timeout: config.read_timeout,
            notify_wait_time: config.notify_wait_time,
            default_keepalive: config.default_keepalive,
        };
        let pool = Pool::new(config.thread_pool_size);
        let principal = config.service_user.clone();
        let cancel = CancellationToken::new();
        let accept_cancel = cancel.clone();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            facade,
            session_config,
            principal,
            pool,
            accept_cancel,
        ));

        Ok(Acceptor {
            cancel,
            accept_task,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Stop accepting new connections, cancel every session, and wait up
    /// to the configured grace period for them to actually stop (spec
    /// §4.7 `SHUTDOWN_TIMEOUT`).
    #[instrument(skip(self))]
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if tokio::time::timeout(self.shutdown_timeout, self.accept_task)
            .await
            .is_err()
        {
            warn!("sessions did not finish within the shutdown grace period");
        }
        info!("compat server shut down");
    }
}

async fn accept_loop(
    listener: TcpListener,
    facade: Arc<dyn AllocatorFacade>,
    session_config: SessionConfig,
    principal: String,
    pool: Pool,
    cancel: CancellationToken,
) {
    let mut sessions = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        let permit = pool.admit().await;
                        let (read_half, write_half) = stream.into_split();
                        let session = Session::new(
                            facade.clone(),
                            Principal(principal.clone()),
                            Some(peer_addr.to_string()),
                            write_half,
                            session_config.clone(),
                        );
                        let session_cancel = cancel.child_token();
                        sessions.spawn(async move {
                            session.run(read_half, session_cancel).await;
                            drop(permit);
                        });
                    }
                    Err(err) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        warn!(error = %err, "accept failed");
                    }
                }
            }
        }
    }
    while sessions.join_next().await.is_some() {}
}
