//! Daemon command handler served over a real Unix socket.

use chunkscribe::config::{Config, JobConfig};
use chunkscribe::daemon::DaemonState;
use chunkscribe::daemon::handler::DaemonCommandHandler;
use chunkscribe::ipc::client::{follow_job, send_command};
use chunkscribe::ipc::protocol::{Command, Response};
use chunkscribe::ipc::server::IpcServer;
use chunkscribe::job::events::JobEvent;
use chunkscribe::job::types::{JobId, JobStatus};
use chunkscribe::stt::MockTranscriber;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn write_wav(dir: &TempDir, name: &str, seconds: u32) -> PathBuf {
    let path = dir.path().join(name);
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..(8000 * seconds) {
        let sample = ((i % 100) as i16 - 50) * 100;
        writer.write_sample(sample).unwrap();
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
    path
}

async fn start_daemon(socket_path: &Path, transcriber: MockTranscriber) -> CancellationToken {
    let mut config = Config::default();
    config.cleanup.grace = Duration::ZERO;
    let state = DaemonState::new(config, Arc::new(transcriber)).unwrap();

    let server = IpcServer::new(socket_path.to_path_buf()).unwrap();
    let shutdown = server.shutdown_token();
    tokio::spawn(async move { server.start(DaemonCommandHandler::new(state)).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown
}

async fn submit(socket_path: &Path, path: PathBuf, config: Option<JobConfig>) -> JobId {
    let command = Command::Submit {
        path,
        config,
        temporary: false,
    };
    match send_command(socket_path, command).await.unwrap() {
        Response::Submitted { job_id } => job_id,
        other => panic!("expected Submitted, got {:?}", other),
    }
}

#[tokio::test]
async fn submit_follow_and_fetch_result() {
    let dir = TempDir::new().unwrap();
    let socket_path = dir.path().join("daemon.sock");
    let _shutdown = start_daemon(&socket_path, MockTranscriber::default()).await;

    let job_id = submit(&socket_path, write_wav(&dir, "talk.wav", 3), None).await;

    let mut events = Vec::new();
    let last = follow_job(&socket_path, job_id, |response| events.push(response.clone()))
        .await
        .unwrap();

    match last {
        Response::Event {
            event: JobEvent::Terminal { status, .. },
        } => assert_eq!(status, JobStatus::Completed),
        other => panic!("expected terminal event, got {:?}", other),
    }
    assert!(
        events
            .iter()
            .all(|r| matches!(r, Response::Event { event } if event.job_id() == job_id))
    );

    match send_command(&socket_path, Command::Progress { job_id })
        .await
        .unwrap()
    {
        Response::Progress { progress } => {
            assert_eq!(progress.status, JobStatus::Completed);
            assert_eq!(progress.percent, 100.0);
        }
        other => panic!("expected Progress, got {:?}", other),
    }

    match send_command(&socket_path, Command::Result { job_id })
        .await
        .unwrap()
    {
        Response::Transcript { transcript, .. } => {
            assert_eq!(transcript.full_text, "chunk 0");
            assert!((transcript.segments[0].end_secs - 3.0).abs() < 1e-6);
        }
        other => panic!("expected Transcript, got {:?}", other),
    }
}

#[tokio::test]
async fn temporary_input_is_deleted_after_job() {
    let dir = TempDir::new().unwrap();
    let socket_path = dir.path().join("daemon.sock");
    let _shutdown = start_daemon(&socket_path, MockTranscriber::default()).await;
    let upload = write_wav(&dir, "upload.wav", 1);
    let kept = write_wav(&dir, "kept.wav", 1);

    let command = Command::Submit {
        path: upload.clone(),
        config: None,
        temporary: true,
    };
    let Response::Submitted { job_id } = send_command(&socket_path, command).await.unwrap() else {
        panic!("expected Submitted");
    };
    follow_job(&socket_path, job_id, |_| {}).await.unwrap();

    let kept_job = submit(&socket_path, kept.clone(), None).await;
    follow_job(&socket_path, kept_job, |_| {}).await.unwrap();

    for _ in 0..200 {
        if !upload.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!upload.exists());
    assert!(kept.exists());
}

#[tokio::test]
async fn cancel_over_ipc() {
    let dir = TempDir::new().unwrap();
    let socket_path = dir.path().join("daemon.sock");
    let transcriber = MockTranscriber::default().with_delay(Duration::from_secs(30));
    let _shutdown = start_daemon(&socket_path, transcriber.clone()).await;

    let job_id = submit(&socket_path, write_wav(&dir, "long.wav", 2), None).await;
    while transcriber.in_flight() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    match send_command(&socket_path, Command::Cancel { job_id })
        .await
        .unwrap()
    {
        Response::Cancelled { job_id: id, status } => {
            assert_eq!(id, job_id);
            assert!(matches!(
                status,
                JobStatus::Cancelling | JobStatus::Cancelled
            ));
        }
        other => panic!("expected Cancelled, got {:?}", other),
    }

    let last = follow_job(&socket_path, job_id, |_| {}).await.unwrap();
    match last {
        Response::Event {
            event: JobEvent::Terminal { status, .. },
        } => assert_eq!(status, JobStatus::Cancelled),
        other => panic!("expected terminal event, got {:?}", other),
    }

    match send_command(&socket_path, Command::Result { job_id })
        .await
        .unwrap()
    {
        Response::Error { code, .. } => assert_eq!(code, "job_not_completed"),
        other => panic!("expected Error, got {:?}", other),
    }
}

#[tokio::test]
async fn errors_carry_machine_readable_codes() {
    let dir = TempDir::new().unwrap();
    let socket_path = dir.path().join("daemon.sock");
    let _shutdown = start_daemon(&socket_path, MockTranscriber::default()).await;

    let bad_config = JobConfig {
        chunk_duration_secs: 30.0,
        ..JobConfig::default()
    };
    let response = send_command(
        &socket_path,
        Command::Submit {
            path: write_wav(&dir, "x.wav", 1),
            config: Some(bad_config),
            temporary: false,
        },
    )
    .await
    .unwrap();
    assert!(matches!(response, Response::Error { ref code, .. } if code == "config_error"));

    let response = send_command(
        &socket_path,
        Command::Progress {
            job_id: JobId::new(),
        },
    )
    .await
    .unwrap();
    assert!(matches!(response, Response::Error { ref code, .. } if code == "job_not_found"));

    let not_wav = dir.path().join("notes.txt");
    std::fs::write(&not_wav, "plain text").unwrap();
    let response = send_command(
        &socket_path,
        Command::Submit {
            path: not_wav,
            config: None,
            temporary: false,
        },
    )
    .await
    .unwrap();
    assert!(matches!(response, Response::Error { ref code, .. } if code == "audio_format"));
}

#[tokio::test]
async fn shutdown_command_stops_daemon() {
    let dir = TempDir::new().unwrap();
    let socket_path = dir.path().join("daemon.sock");
    let shutdown = start_daemon(&socket_path, MockTranscriber::default()).await;

    let response = send_command(&socket_path, Command::Shutdown).await.unwrap();
    assert_eq!(response, Response::Ok);

    tokio::time::timeout(Duration::from_secs(1), shutdown.cancelled())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!socket_path.exists());
}
