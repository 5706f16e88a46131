//! IPC client for sending commands to the daemon.

use crate::error::{Result, ScribeError};
use crate::ipc::protocol::{Command, Response};
use crate::job::types::JobId;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedReadHalf;

/// Send a command to the daemon and read its single response.
///
/// # Errors
/// Returns `ScribeError::IpcConnection` if connection fails
/// Returns `ScribeError::IpcProtocol` if serialization/deserialization fails
pub async fn send_command(socket_path: &Path, command: Command) -> Result<Response> {
    let mut reader = open(socket_path, &command).await?;
    read_response(&mut reader)
        .await?
        .ok_or_else(|| ScribeError::IpcConnection {
            message: "Daemon closed the connection without responding".to_string(),
        })
}

/// Follow a job's events, calling `on_response` for each line received.
///
/// Returns the last response: the job's terminal event, or an error response.
pub async fn follow_job<F>(
    socket_path: &Path,
    job_id: JobId,
    mut on_response: F,
) -> Result<Response>
where
    F: FnMut(&Response),
{
    let mut reader = open(socket_path, &Command::Follow { job_id }).await?;
    loop {
        let Some(response) = read_response(&mut reader).await? else {
            return Err(ScribeError::IpcConnection {
                message: format!("Daemon closed the stream before job {} finished", job_id),
            });
        };
        on_response(&response);
        if response.ends_stream() {
            return Ok(response);
        }
    }
}

async fn open(socket_path: &Path, command: &Command) -> Result<BufReader<OwnedReadHalf>> {
    let stream =
        UnixStream::connect(socket_path)
            .await
            .map_err(|e| ScribeError::IpcConnection {
                message: format!("Failed to connect to daemon: {}", e),
            })?;

    let (reader, mut writer) = stream.into_split();

    let command_json = command.to_json().map_err(|e| ScribeError::IpcProtocol {
        message: format!("Failed to serialize command: {}", e),
    })?;

    writer
        .write_all(command_json.as_bytes())
        .await
        .map_err(|e| ScribeError::IpcConnection {
            message: format!("Failed to write command: {}", e),
        })?;

    writer
        .write_all(b"\n")
        .await
        .map_err(|e| ScribeError::IpcConnection {
            message: format!("Failed to write newline: {}", e),
        })?;

    writer
        .flush()
        .await
        .map_err(|e| ScribeError::IpcConnection {
            message: format!("Failed to flush writer: {}", e),
        })?;

    Ok(BufReader::new(reader))
}

/// Reads one response line; `None` at end of stream.
async fn read_response(reader: &mut BufReader<OwnedReadHalf>) -> Result<Option<Response>> {
    let mut response_line = String::new();
    let read = reader
        .read_line(&mut response_line)
        .await
        .map_err(|e| ScribeError::IpcConnection {
            message: format!("Failed to read response: {}", e),
        })?;
    if read == 0 {
        return Ok(None);
    }

    let response =
        Response::from_json(response_line.trim()).map_err(|e| ScribeError::IpcProtocol {
            message: format!("Failed to deserialize response: {}", e),
        })?;

    Ok(Some(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::server::{CommandHandler, IpcServer};
    use crate::job::events::JobEvent;
    use crate::job::types::JobStatus;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct MockHandler;

    #[async_trait::async_trait]
    impl CommandHandler for MockHandler {
        async fn handle(&self, command: Command) -> Response {
            match command {
                Command::Progress { job_id } | Command::Result { job_id } => Response::Error {
                    code: "job_not_found".to_string(),
                    message: format!("Job not found: {}", job_id),
                },
                Command::Cancel { job_id } => Response::Cancelled {
                    job_id,
                    status: JobStatus::Cancelled,
                },
                _ => Response::Ok,
            }
        }

        async fn follow(&self, job_id: JobId, sink: mpsc::Sender<Response>) {
            let event = JobEvent::Terminal {
                job_id,
                status: JobStatus::Failed,
                result: None,
                error: None,
            };
            let _ = sink.send(Response::Event { event }).await;
        }
    }

    async fn start(socket_path: PathBuf) {
        tokio::spawn(async move {
            let server = IpcServer::new(socket_path).unwrap();
            server.start(MockHandler).await
        });
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_send_command_cancel() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        start(socket_path.clone()).await;

        let job_id = JobId::new();
        let response = send_command(&socket_path, Command::Cancel { job_id })
            .await
            .unwrap();

        assert_eq!(
            response,
            Response::Cancelled {
                job_id,
                status: JobStatus::Cancelled
            }
        );
    }

    #[tokio::test]
    async fn test_send_command_error_response() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        start(socket_path.clone()).await;

        let response = send_command(
            &socket_path,
            Command::Progress {
                job_id: JobId::new(),
            },
        )
        .await
        .unwrap();

        match response {
            Response::Error { code, .. } => assert_eq!(code, "job_not_found"),
            other => panic!("Expected Error response, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_follow_job_returns_terminal_event() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        start(socket_path.clone()).await;

        let job_id = JobId::new();
        let mut seen = 0;
        let last = follow_job(&socket_path, job_id, |_| seen += 1)
            .await
            .unwrap();

        assert_eq!(seen, 1);
        match last {
            Response::Event { event } => {
                assert!(event.is_terminal());
                assert_eq!(event.job_id(), job_id);
            }
            other => panic!("Expected Event, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_command_connection_refused() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("nonexistent.sock");

        let result = send_command(&socket_path, Command::Shutdown).await;

        match result {
            Err(ScribeError::IpcConnection { message }) => {
                assert!(message.contains("Failed to connect to daemon"));
            }
            other => panic!("Expected IpcConnection error, got: {:?}", other),
        }
    }
}
