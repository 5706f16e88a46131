//! Async Unix socket IPC server for the daemon.

use crate::error::{Result, ScribeError};
use crate::ipc::protocol::{Command, Response};
use crate::job::types::JobId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Responses buffered per `follow` connection before the handler waits.
const FOLLOW_BUFFER: usize = 64;

/// Handler trait for processing IPC commands.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a single-response command.
    async fn handle(&self, command: Command) -> Response;

    /// Stream responses for `follow` into `sink`.
    ///
    /// The stream ends at the first response for which
    /// [`Response::ends_stream`] holds, or when `sink` is dropped.
    async fn follow(&self, job_id: JobId, sink: mpsc::Sender<Response>) {
        let response = Response::Error {
            code: "unsupported".to_string(),
            message: format!("cannot follow job {}", job_id),
        };
        if sink.send(response).await.is_err() {
            tracing::debug!(%job_id, "follow client went away");
        }
    }
}

/// IPC server handling daemon commands via Unix socket.
pub struct IpcServer {
    socket_path: PathBuf,
    shutdown: CancellationToken,
}

impl IpcServer {
    /// Create a new IPC server bound to the specified socket path.
    pub fn new(socket_path: PathBuf) -> Result<Self> {
        Ok(Self {
            socket_path,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Get the default socket path based on XDG_RUNTIME_DIR or fallback.
    pub fn default_socket_path() -> PathBuf {
        if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
            PathBuf::from(xdg_runtime).join("chunkscribe.sock")
        } else {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/chunkscribe-{}.sock", uid))
        }
    }

    /// Token cancelled when the server stops, by `stop` or a `shutdown` command.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown, then remove the socket file.
    pub async fn start<H>(&self, handler: H) -> Result<()>
    where
        H: CommandHandler + 'static,
    {
        // Clean up any stale socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| ScribeError::IpcSocket {
                message: format!("Failed to remove existing socket: {}", e),
            })?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| ScribeError::IpcSocket {
                message: format!("Failed to bind to socket: {}", e),
            })?;
        tracing::info!(socket = %self.socket_path.display(), "listening");

        let handler = Arc::new(handler);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let handler = Arc::clone(&handler);
                        let shutdown = self.shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, handler, shutdown).await {
                                tracing::warn!(error = %e, "error handling client");
                            }
                        });
                    }
                    Err(e) => {
                        return Err(ScribeError::IpcConnection {
                            message: format!("Failed to accept connection: {}", e),
                        });
                    }
                },
            }
        }

        self.remove_socket()
    }

    /// Stop the server and clean up the socket file.
    pub async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        self.remove_socket()
    }

    fn remove_socket(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| ScribeError::IpcSocket {
                message: format!("Failed to remove socket file: {}", e),
            })?;
        }
        Ok(())
    }
}

/// Handle a single client connection: one command line in, one or more
/// response lines out.
async fn handle_client<H>(
    stream: UnixStream,
    handler: Arc<H>,
    shutdown: CancellationToken,
) -> Result<()>
where
    H: CommandHandler + 'static,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    reader
        .read_line(&mut line)
        .await
        .map_err(|e| ScribeError::IpcConnection {
            message: format!("Failed to read from client: {}", e),
        })?;

    let command = match Command::from_json(line.trim()) {
        Ok(command) => command,
        Err(e) => {
            let error = ScribeError::IpcProtocol {
                message: format!("Failed to parse command: {}", e),
            };
            return write_response(&mut writer, &Response::from(error)).await;
        }
    };
    tracing::debug!(?command, "received command");

    match command {
        Command::Follow { job_id } => {
            let (sink, mut responses) = mpsc::channel(FOLLOW_BUFFER);
            let follower = Arc::clone(&handler);
            let task = tokio::spawn(async move { follower.follow(job_id, sink).await });

            while let Some(response) = responses.recv().await {
                write_response(&mut writer, &response).await?;
                if response.ends_stream() {
                    break;
                }
            }
            // Dropping the receiver stops the follower at its next send.
            drop(responses);
            if let Err(e) = task.await {
                tracing::warn!(%job_id, error = %e, "follow task failed");
            }
            Ok(())
        }
        Command::Shutdown => {
            let response = handler.handle(Command::Shutdown).await;
            write_response(&mut writer, &response).await?;
            tracing::info!("shutdown requested");
            shutdown.cancel();
            Ok(())
        }
        command => {
            let response = handler.handle(command).await;
            write_response(&mut writer, &response).await
        }
    }
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &Response) -> Result<()> {
    let response_json = response.to_json().map_err(|e| ScribeError::IpcProtocol {
        message: format!("Failed to serialize response: {}", e),
    })?;

    writer
        .write_all(response_json.as_bytes())
        .await
        .map_err(|e| ScribeError::IpcConnection {
            message: format!("Failed to write to client: {}", e),
        })?;

    writer
        .write_all(b"\n")
        .await
        .map_err(|e| ScribeError::IpcConnection {
            message: format!("Failed to write newline to client: {}", e),
        })?;

    writer
        .flush()
        .await
        .map_err(|e| ScribeError::IpcConnection {
            message: format!("Failed to flush writer: {}", e),
        })?;

    Ok(())
}
