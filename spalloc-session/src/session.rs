//! The per-connection session task (spec §4.5): `READING → DISPATCHING →
//! WRITING → READING`, with `CLOSING`/`CLOSED` reached on EOF, cancellation,
//! or an unrecoverable I/O error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use spalloc_error::{make_input_err, Error};
use spalloc_facade::AllocatorFacade;
use spalloc_util::SharedWriter;
use spalloc_wire::codec::{decode_command, encode_frame, read_line, ReadLine, DEFAULT_MAX_LINE_BYTES};
use spalloc_wire::Frame;

use crate::context::{Principal, SessionContext};
use crate::dispatch::dispatch;
use crate::notifier::{self, Kind, NotifierHandle};

/// Configuration a [`Session`] needs that isn't part of the wire contract
/// itself — mirrors the subset of `compat.*` (spec §6) the session reads.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub read_timeout: Duration,
    pub notify_wait_time: Duration,
    pub default_keepalive: Duration,
}

/// Owns one client connection: its socket, notifier maps, and capability
/// token (spec §3 Session). Not `Clone` — notifier subtasks only ever hold
/// a [`SharedWriter`] clone and a [`Arc<dyn AllocatorFacade>`] clone, never
/// the `Session` itself, breaking the Session↔Notifier cycle the original
/// threaded implementation had (spec §9).
pub struct Session<W> {
    ctx: SessionContext,
    writer: SharedWriter<W>,
    config: SessionConfig,
    job_notifiers: HashMap<Option<u64>, NotifierHandle>,
    machine_notifiers: HashMap<Option<String>, NotifierHandle>,
}

impl<W> Session<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        facade: Arc<dyn AllocatorFacade>,
        principal: Principal,
        peer_addr: Option<String>,
        writer: W,
        config: SessionConfig,
    ) -> Self {
        let default_keepalive = config.default_keepalive;
        Session {
            ctx: SessionContext {
                facade,
                principal,
                peer_addr,
                default_keepalive,
            },
            writer: SharedWriter::new(writer),
            config,
            job_notifiers: HashMap::new(),
            machine_notifiers: HashMap::new(),
        }
    }

    /// Run the session to completion: `READING → DISPATCHING → WRITING`
    /// until EOF, `cancel` fires, or an I/O error occurs. Cancels every
    /// outstanding notifier before returning (spec §5).
    #[instrument(skip_all, fields(principal = %self.ctx.principal.0))]
    pub async fn run<R>(mut self, reader: R, cancel: CancellationToken)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        loop {
            let line = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = tokio::time::timeout(self.config.read_timeout, read_line(&mut reader, DEFAULT_MAX_LINE_BYTES)) => {
                    match result {
                        Err(_elapsed) => continue, // read timeout: loop to re-check cancellation
                        Ok(Err(io_err)) => {
                            warn!(error = %io_err, "session read failed");
                            break;
                        }
                        Ok(Ok(ReadLine::Eof)) => break,
                        Ok(Ok(ReadLine::Line(bytes))) => bytes,
                    }
                }
            };

            let frame = match decode_command(&line) {
                Ok(cmd) => match self.handle(&cmd, &line).await {
                    Ok(value) => Frame::returning(value),
                    Err(err) => {
                        if err.should_log_as_warning() {
                            warn!(command = %cmd.command, error = %err, "command failed");
                        }
                        Frame::exception(err.as_exception_text())
                    }
                },
                Err(err) => Frame::exception(err.as_exception_text()),
            };

            let Ok(encoded) = encode_frame(&frame) else {
                warn!("failed to encode response frame");
                break;
            };
            if self.writer.write_line(&encoded).await.is_err() {
                break;
            }
        }

        self.shutdown().await;
    }

    async fn handle(&mut self, cmd: &spalloc_wire::Command, raw_line: &[u8]) -> Result<serde_json::Value, Error> {
        match cmd.command.as_str() {
            "notify_job" => self.set_job_notifier(cmd, true).await,
            "no_notify_job" => self.set_job_notifier(cmd, false).await,
            "notify_machine" => self.set_machine_notifier(cmd, true).await,
            "no_notify_machine" => self.set_machine_notifier(cmd, false).await,
            _ => dispatch(&self.ctx, cmd, raw_line).await,
        }
    }

    async fn set_job_notifier(&mut self, cmd: &spalloc_wire::Command, want: bool) -> Result<serde_json::Value, Error> {
        let key = match cmd.args.first() {
            Some(v) => spalloc_wire::args::parse_dec(v)?,
            None => None,
        };
        if want {
            self.job_notifiers.entry(key).or_insert_with(|| {
                notifier::spawn(
                    Kind::Job { key },
                    self.ctx.facade.clone(),
                    self.writer.clone(),
                    self.config.notify_wait_time,
                )
            });
        } else if let Some(handle) = self.job_notifiers.remove(&key) {
            handle.cancel().await;
        }
        Ok(serde_json::Value::Null)
    }

    async fn set_machine_notifier(&mut self, cmd: &spalloc_wire::Command, want: bool) -> Result<serde_json::Value, Error> {
        let key = match cmd.args.first() {
            Some(v) => match v {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) => Some(s.clone()),
                other => return Err(make_input_err!("bad input: expected a machine name string, got {other}")),
            },
            None => None,
        };
        if want {
            let key_for_spawn = key.clone();
            self.machine_notifiers.entry(key).or_insert_with(|| {
                notifier::spawn(
                    Kind::Machine { key: key_for_spawn },
                    self.ctx.facade.clone(),
                    self.writer.clone(),
                    self.config.notify_wait_time,
                )
            });
        } else if let Some(handle) = self.machine_notifiers.remove(&key) {
            handle.cancel().await;
        }
        Ok(serde_json::Value::Null)
    }

    /// Cancel every outstanding notifier. Called once the read loop exits,
    /// whichever way it exited (spec §5: "Closing a session cancels all
    /// its notifiers, then closes the socket").
    async fn shutdown(self) {
        for (_, handle) in self.job_notifiers {
            handle.cancel().await;
        }
        for (_, handle) in self.machine_notifiers {
            handle.cancel().await;
        }
    }
}
