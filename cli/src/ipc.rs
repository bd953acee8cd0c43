//! Settings path discovery between a running `moonproxy watch` and later CLI calls.

use interprocess::local_socket::tokio::{Stream, prelude::*};
use interprocess::local_socket::{GenericNamespaced, ListenerOptions, Name};
use log::{debug, trace, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

const SOCKET_NAME: &str = "moonproxy_settings_path_v1";
const ACCEPT_BACKOFF: Duration = Duration::from_millis(200);

fn socket_name() -> std::io::Result<Name<'static>> {
    SOCKET_NAME.to_ns_name::<GenericNamespaced>()
}

/// Settings path announced by a running instance, if any answers and the
/// path it names still exists.
pub async fn get_running_settings_path() -> Option<PathBuf> {
    let name = socket_name().ok()?;
    let mut stream = Stream::connect(name).await.ok()?;
    let mut buf = Vec::with_capacity(256);
    if let Err(e) = stream.read_to_end(&mut buf).await {
        warn!("Failed to read settings path from running instance: {}", e);
        return None;
    }
    let path = parse_reply(&buf)?;
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        warn!("Running instance reported a missing settings file: {}", path.display());
        return None;
    }
    debug!("Using settings of running instance: {}", path.display());
    Some(path)
}

fn parse_reply(buf: &[u8]) -> Option<PathBuf> {
    let s = String::from_utf8_lossy(buf);
    let s = s.trim();
    if s.is_empty() { None } else { Some(PathBuf::from(s)) }
}

/// Answer settings path queries until the returned task is dropped with the
/// runtime. Fails when another instance already owns the socket.
pub fn serve_settings_path(settings_path: &Path) -> std::io::Result<JoinHandle<()>> {
    let payload = std::path::absolute(settings_path)?.to_string_lossy().into_owned();
    let listener = ListenerOptions::new().name(socket_name()?).create_tokio()?;
    debug!("IPC server listening on '{}'", SOCKET_NAME);

    Ok(tokio::spawn(async move {
        loop {
            let mut stream = match listener.accept().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("IPC accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let payload = payload.clone();
            tokio::spawn(async move {
                trace!("IPC client connected, sending settings path");
                let result = async {
                    stream.write_all(payload.as_bytes()).await?;
                    stream.shutdown().await
                }
                .await;
                if let Err(e) = result {
                    warn!("Failed to send settings path to IPC client: {}", e);
                }
            });
        }
    }))
}
