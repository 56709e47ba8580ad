//! Line-delimited stdio transport.
//!
//! A single long-lived process speaking strict NDJSON: one JSON-RPC message
//! per line in both directions, flushed after every write. Standard output
//! carries protocol messages only; all diagnostics go through `tracing`.
//!
//! The loop reads with a bounded timeout so it can track idle time and the
//! total-uptime cutoff. Protocol errors never terminate the loop; only
//! end-of-stream, the uptime limit, or a shutdown signal do. On exit the
//! current session (if one was established) is closed and the reaper runs.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::mcp::lifecycle::{unix_now, Handled, RequestContext, SessionLifecycle};
use crate::mcp::protocol::{validate_message, ErrorObject, JsonRpcResponse, ValidateError};

/// Upper bound on a single blocking read.
const MAX_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Read timeout for the main loop: `min(initTimeout, 60s)`.
fn read_timeout(init_timeout_secs: u64) -> Duration {
    Duration::from_secs(init_timeout_secs).min(MAX_READ_TIMEOUT)
}

/// Raw NDJSON framing over stdin/stdout.
struct StdioFraming {
    reader: BufReader<tokio::io::Stdin>,
    writer: tokio::io::Stdout,
}

impl StdioFraming {
    fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
            writer: tokio::io::stdout(),
        }
    }

    /// Reads the next line; `None` on end-of-stream.
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }

        Ok(Some(line))
    }

    /// Writes one response, newline-terminated and flushed.
    async fn write_response(&mut self, response: &JsonRpcResponse) -> io::Result<()> {
        let json = serde_json::to_string(response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // NDJSON framing: one message per line in both directions.
        debug_assert!(
            !json.contains('\n'),
            "serialised message must not contain embedded newlines"
        );

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// The stdio server loop.
pub struct StdioServer {
    framing: StdioFraming,
    lifecycle: SessionLifecycle,
    max_uptime_secs: u64,
    init_timeout_secs: u64,
    /// The one session this process speaks for, set by `initialize`.
    session_id: Option<String>,
    idle_reads: u32,
}

impl StdioServer {
    /// Creates a server over stdin/stdout.
    #[must_use]
    pub fn new(lifecycle: SessionLifecycle, max_uptime_secs: u64, init_timeout_secs: u64) -> Self {
        Self {
            framing: StdioFraming::new(),
            lifecycle,
            max_uptime_secs,
            init_timeout_secs,
            session_id: None,
            idle_reads: 0,
        }
    }

    /// Runs the loop until end-of-stream, the uptime limit, or a signal,
    /// then closes the current session and reaps.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run(&mut self) -> io::Result<()> {
        let result = self.run_loop().await;
        self.finish();
        result
    }

    #[cfg(unix)]
    async fn run_loop(&mut self) -> io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).map_err(io::Error::other)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(io::Error::other)?;
        let started = Instant::now();

        loop {
            if self.uptime_exhausted(started) {
                return Ok(());
            }

            tokio::select! {
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    return Ok(());
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    return Ok(());
                }
                read = tokio::time::timeout(
                    read_timeout(self.init_timeout_secs),
                    self.framing.read_line(),
                ) => {
                    if self.handle_read(read).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    #[cfg(windows)]
    async fn run_loop(&mut self) -> io::Result<()> {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let started = Instant::now();

        loop {
            if self.uptime_exhausted(started) {
                return Ok(());
            }

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("received Ctrl+C, shutting down");
                    return Ok(());
                }
                read = tokio::time::timeout(
                    read_timeout(self.init_timeout_secs),
                    self.framing.read_line(),
                ) => {
                    if self.handle_read(read).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn uptime_exhausted(&self, started: Instant) -> bool {
        if started.elapsed() >= Duration::from_secs(self.max_uptime_secs) {
            info!(uptime_secs = self.max_uptime_secs, "connection reached max uptime");
            return true;
        }
        false
    }

    /// Handles one read attempt. Returns true when the loop should stop.
    async fn handle_read(
        &mut self,
        read: Result<io::Result<Option<String>>, tokio::time::error::Elapsed>,
    ) -> io::Result<bool> {
        let line = match read {
            Err(_elapsed) => {
                self.idle_reads += 1;
                let idle = read_timeout(self.init_timeout_secs).as_secs() * u64::from(self.idle_reads);
                debug!(idle_secs = idle, "no input");
                return Ok(false);
            }
            Ok(result) => result?,
        };

        let Some(line) = line else {
            info!("end of stream");
            return Ok(true);
        };

        self.idle_reads = 0;
        let line = line.trim();
        if line.is_empty() {
            return Ok(false);
        }

        self.handle_line(line).await?;
        Ok(false)
    }

    async fn handle_line(&mut self, line: &str) -> io::Result<()> {
        let msg = match validate_message(line) {
            Ok(msg) => msg,
            Err(ValidateError::Unparseable) => {
                let response = JsonRpcResponse::failure(
                    None,
                    ErrorObject::invalid_request("Request is not valid JSON"),
                );
                return self.framing.write_response(&response).await;
            }
            Err(ValidateError::Malformed(reason)) => {
                let response =
                    JsonRpcResponse::failure(None, ErrorObject::invalid_request(reason));
                return self.framing.write_response(&response).await;
            }
        };

        info!(target: "access", transport = "stdio", method = %msg.method, "request");

        let ctx = RequestContext::stdio(self.session_id.clone());
        match self.lifecycle.handle(&msg, &ctx).await {
            Handled::Initialized {
                session_id,
                response,
                ..
            } => {
                self.session_id = Some(session_id);
                self.framing.write_response(&response).await
            }
            Handled::Reply(response) | Handled::Refused(response) => {
                self.framing.write_response(&response).await
            }
            Handled::Accepted => Ok(()),
            Handled::Failed(message) => {
                // Never breaks the loop; the client simply gets no reply.
                error!(error = %message, "internal failure handling request");
                Ok(())
            }
        }
    }

    fn finish(&mut self) {
        if let Some(session_id) = self.session_id.take() {
            self.lifecycle.close_session(&session_id);
        }
        self.lifecycle
            .store()
            .reap(unix_now(), self.max_uptime_secs, self.init_timeout_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_timeout_is_capped_at_sixty_seconds() {
        assert_eq!(read_timeout(10), Duration::from_secs(10));
        assert_eq!(read_timeout(60), Duration::from_secs(60));
        assert_eq!(read_timeout(600), Duration::from_secs(60));
    }

    #[test]
    fn serialised_responses_have_no_embedded_newlines() {
        let response = JsonRpcResponse::success(
            json!(1),
            json!({
                "message": "hello world",
                "nested": { "key": "value" }
            }),
        );
        let out = serde_json::to_string(&response).unwrap();
        assert!(!out.contains('\n'));

        let error = JsonRpcResponse::failure(None, ErrorObject::method_not_found("x/y"));
        let out = serde_json::to_string(&error).unwrap();
        assert!(!out.contains('\n'));
    }
}
