//! Unix socket IPC between the CLI and the daemon.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{follow_job, send_command};
pub use protocol::{Command, Response};
pub use server::{CommandHandler, IpcServer};
