//! Build script: embeds the git short hash for `chunkscribe --version`.

use std::process::Command;

fn main() {
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        && output.status.success()
    {
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=GIT_HASH={}", hash);
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");

    if cfg!(feature = "cuda") && Command::new("nvcc").arg("--version").output().is_err() {
        panic!(
            "\n\n`nvcc` not found: the CUDA toolkit is required for the `cuda` feature.\n\
             Build without it: cargo build --release\n"
        );
    }
}
