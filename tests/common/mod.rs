//! Common test utilities

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hansori::master::SUBORDINATE_READY_MARKER;
use hansori::worker::server::{create_router, AppState};
use hansori::worker::WorkerAgent;

/// Write an executable stand-in for the recorder binary
///
/// The script prints the subordinate readiness marker (when asked to) and
/// then lingers briefly so it is observably "running".
#[allow(dead_code)]
pub fn recorder_script(dir: &Path, with_marker: bool) -> PathBuf {
    let body = if with_marker {
        format!("#!/bin/sh\necho \"{SUBORDINATE_READY_MARKER}\"\nsleep 3\n")
    } else {
        "#!/bin/sh\nsleep 3\n".to_string()
    };
    write_script(dir, "recorder.sh", &body)
}

/// Recorder stand-in that only reports ready for device index 0
///
/// Arguments arrive as `--device <idx> ...`, so `$2` is the device index.
#[allow(dead_code)]
pub fn first_device_only_script(dir: &Path) -> PathBuf {
    let body = format!(
        "#!/bin/sh\nif [ \"$2\" = \"0\" ]; then echo \"{SUBORDINATE_READY_MARKER}\"; fi\nsleep 3\n"
    );
    write_script(dir, "recorder.sh", &body)
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
    path
}

/// Serve a real worker agent on an ephemeral loopback port
#[allow(dead_code)]
pub async fn spawn_worker_server() -> (u16, Arc<WorkerAgent>) {
    let agent = Arc::new(WorkerAgent::with_grace(Duration::from_millis(500)));
    let state = AppState {
        agent: Arc::clone(&agent),
        start_time: Instant::now(),
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (port, agent)
}
