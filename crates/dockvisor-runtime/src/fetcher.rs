//! Sandbox asset fetching.
//!
//! Before a container is pulled, the URIs of its command are downloaded
//! into the sandbox. A fetch can be killed while it is in flight, which
//! aborts its task and the transfer with it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dockvisor_common::descriptor::{CommandInfo, CommandUri};
use dockvisor_common::error::{DockvisorError, Result};
use dockvisor_common::types::ContainerId;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::task::AbortHandle;

/// Downloads command assets into a sandbox.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetches every URI of `command` into `directory`.
    ///
    /// # Errors
    ///
    /// Returns an error if any asset cannot be fetched, or the fetch was
    /// killed.
    async fn fetch(
        &self,
        id: &ContainerId,
        command: &CommandInfo,
        directory: &Path,
        user: Option<&str>,
    ) -> Result<()>;

    /// Kills an in-flight fetch for `id`, if any.
    fn kill(&self, id: &ContainerId);
}

/// [`AssetFetcher`] for local paths, `file://` and `http(s)://` URIs.
#[derive(Debug, Default, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    running: Arc<Mutex<HashMap<ContainerId, AbortHandle>>>,
}

impl Fetcher {
    /// Creates a fetcher with no transfers in flight.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn running(&self) -> std::sync::MutexGuard<'_, HashMap<ContainerId, AbortHandle>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AssetFetcher for Fetcher {
    async fn fetch(
        &self,
        id: &ContainerId,
        command: &CommandInfo,
        directory: &Path,
        user: Option<&str>,
    ) -> Result<()> {
        if command.uris.is_empty() {
            return Ok(());
        }

        let client = self.client.clone();
        let uris = command.uris.clone();
        let directory = directory.to_path_buf();
        let user = user.map(str::to_string);
        let handle = tokio::spawn(async move {
            for uri in &uris {
                fetch_one(&client, uri, &directory, user.as_deref()).await?;
            }
            Ok::<(), DockvisorError>(())
        });
        let _ = self.running().insert(id.clone(), handle.abort_handle());

        tracing::info!(id = %id, count = command.uris.len(), "fetching assets");
        let result = handle.await;
        let _ = self.running().remove(id);

        match result {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(DockvisorError::Fetch {
                uri: command.uris.iter().map(|u| u.value.as_str()).collect::<Vec<_>>().join(","),
                message: "fetch was killed".into(),
            }),
            Err(e) => Err(DockvisorError::launch(format!("fetcher task failed: {e}"))),
        }
    }

    fn kill(&self, id: &ContainerId) {
        if let Some(handle) = self.running().remove(id) {
            handle.abort();
            tracing::info!(id = %id, "killed asset fetch");
        }
    }
}

async fn fetch_one(
    client: &reqwest::Client,
    uri: &CommandUri,
    directory: &Path,
    user: Option<&str>,
) -> Result<()> {
    let destination = directory.join(basename(&uri.value)?);
    let fetch_error = |message: String| DockvisorError::Fetch {
        uri: uri.value.clone(),
        message,
    };

    if uri.value.starts_with("http://") || uri.value.starts_with("https://") {
        download(client, &uri.value, &destination).await?;
    } else {
        let source = local_path(&uri.value).ok_or_else(|| {
            fetch_error("unsupported scheme (expected a path, file:// or http(s)://)".into())
        })?;
        let _ = tokio::fs::copy(&source, &destination)
            .await
            .map_err(|e| fetch_error(format!("copy from {}: {e}", source.display())))?;
    }
    tracing::debug!(uri = %uri.value, destination = %destination.display(), "asset fetched");

    if uri.executable {
        set_executable(&destination)?;
    }

    if uri.extract && is_archive(&destination) {
        let archive = destination.clone();
        let target = directory.to_path_buf();
        tokio::task::spawn_blocking(move || extract(&archive, &target))
            .await
            .map_err(|e| fetch_error(format!("extraction task failed: {e}")))??;
    }

    if let Some(user) = user {
        chown(&destination, user)?;
    }
    Ok(())
}

async fn download(client: &reqwest::Client, url: &str, destination: &Path) -> Result<()> {
    let fetch_error = |message: String| DockvisorError::Fetch {
        uri: url.to_string(),
        message,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| fetch_error(e.to_string()))?;
    if !response.status().is_success() {
        return Err(fetch_error(format!("HTTP {}", response.status())));
    }

    let mut file = tokio::fs::File::create(destination)
        .await
        .map_err(|e| DockvisorError::io(destination, e))?;
    let mut body = response.bytes_stream();
    let mut written = 0_u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| fetch_error(format!("failed to read response body: {e}")))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| DockvisorError::io(destination, e))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| DockvisorError::io(destination, e))?;
    tracing::debug!(url, bytes = written, "download complete");
    Ok(())
}

fn local_path(value: &str) -> Option<PathBuf> {
    let path = value.strip_prefix("file://").unwrap_or(value);
    if path.contains("://") {
        return None;
    }
    Some(PathBuf::from(path))
}

/// Final path segment of a URI, used as the file name in the sandbox.
///
/// # Errors
///
/// Returns an error if the URI has no usable file name.
pub fn basename(uri: &str) -> Result<String> {
    let without_query = uri.split(['?', '#']).next().unwrap_or(uri);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && !name.contains(':'))
        .map(str::to_string)
        .ok_or_else(|| DockvisorError::Fetch {
            uri: uri.to_string(),
            message: "cannot determine a file name".into(),
        })
}

fn is_archive(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.ends_with(".tar") || name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("tgz"))
}

fn extract(archive_path: &Path, target: &Path) -> Result<()> {
    tracing::debug!(archive = %archive_path.display(), target = %target.display(), "extracting");
    let file = std::fs::File::open(archive_path).map_err(|e| DockvisorError::io(archive_path, e))?;
    if is_gzip(archive_path) {
        tar::Archive::new(flate2::read::GzDecoder::new(file))
            .unpack(target)
            .map_err(|e| DockvisorError::io(target, e))
    } else {
        tar::Archive::new(file)
            .unpack(target)
            .map_err(|e| DockvisorError::io(target, e))
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| DockvisorError::io(path, e))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Changes the owner of `path` to `user` (and the user's primary group).
///
/// # Errors
///
/// Returns an error if the user does not exist or the ownership change
/// is refused.
#[cfg(unix)]
pub fn chown(path: &Path, user: &str) -> Result<()> {
    let found = nix::unistd::User::from_name(user)
        .map_err(|e| DockvisorError::Config {
            message: format!("failed to look up user '{user}': {e}"),
        })?
        .ok_or_else(|| DockvisorError::NotFound {
            kind: "user",
            id: user.to_string(),
        })?;
    nix::unistd::chown(path, Some(found.uid), Some(found.gid))
        .map_err(|e| DockvisorError::io(path, std::io::Error::from(e)))
}

/// Stub for non-Unix platforms.
///
/// # Errors
///
/// Never fails.
#[cfg(not(unix))]
pub fn chown(_path: &Path, _user: &str) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    /// Answers a single HTTP request with `status` and `body`.
    async fn serve_once(status: &'static str, body: Vec<u8>) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let address = listener.local_addr().expect("address");
        let _ = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = [0_u8; 4096];
            let _ = socket.read(&mut request).await.expect("read request");
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.expect("head");
            for chunk in body.chunks(64 * 1024) {
                socket.write_all(chunk).await.expect("body");
            }
            socket.shutdown().await.expect("shutdown");
        });
        address
    }

    fn command(uris: Vec<CommandUri>) -> CommandInfo {
        CommandInfo {
            uris,
            ..CommandInfo::shell("true")
        }
    }

    fn uri(value: String) -> CommandUri {
        CommandUri {
            value,
            ..CommandUri::default()
        }
    }

    #[test]
    fn basename_strips_query_and_scheme() {
        assert_eq!(basename("http://host/a/b.tar.gz?x=1").expect("name"), "b.tar.gz");
        assert_eq!(basename("/opt/assets/run.sh").expect("name"), "run.sh");
        assert_eq!(basename("file:///opt/x").expect("name"), "x");
        assert!(basename("http://").is_err());
    }

    #[test]
    fn archives_are_recognized_by_suffix() {
        assert!(is_archive(Path::new("a.tar")));
        assert!(is_archive(Path::new("a.tar.gz")));
        assert!(is_archive(Path::new("a.tgz")));
        assert!(!is_archive(Path::new("a.zip")));
    }

    #[tokio::test]
    async fn local_files_are_copied_and_marked_executable() {
        let source = tempfile::tempdir().expect("tempdir");
        let sandbox = tempfile::tempdir().expect("tempdir");
        let script = source.path().join("run.sh");
        std::fs::write(&script, "#!/bin/sh\n").expect("write");

        let mut asset = uri(format!("file://{}", script.display()));
        asset.executable = true;
        Fetcher::new()
            .fetch(&ContainerId::new("c1"), &command(vec![asset]), sandbox.path(), None)
            .await
            .expect("fetch");

        let fetched = sandbox.path().join("run.sh");
        assert!(fetched.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&fetched).expect("meta").permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[tokio::test]
    async fn tarballs_are_extracted_into_the_sandbox() {
        let source = tempfile::tempdir().expect("tempdir");
        let sandbox = tempfile::tempdir().expect("tempdir");
        let archive = source.path().join("bundle.tar.gz");
        {
            let file = std::fs::File::create(&archive).expect("create");
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let data = b"payload";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "inner.txt", &data[..])
                .expect("append");
            let _ = builder.into_inner().expect("finish").finish().expect("gzip");
        }

        let mut asset = uri(archive.display().to_string());
        asset.extract = true;
        Fetcher::new()
            .fetch(&ContainerId::new("c1"), &command(vec![asset]), sandbox.path(), None)
            .await
            .expect("fetch");

        let inner = std::fs::read_to_string(sandbox.path().join("inner.txt")).expect("read");
        assert_eq!(inner, "payload");
    }

    #[tokio::test]
    async fn downloads_are_written_to_the_sandbox() {
        let body: Vec<u8> = (0..1_000_000_u32).map(|i| (i % 251) as u8).collect();
        let address = serve_once("200 OK", body.clone()).await;
        let sandbox = tempfile::tempdir().expect("tempdir");

        Fetcher::new()
            .fetch(
                &ContainerId::new("c1"),
                &command(vec![uri(format!("http://{address}/assets/blob.bin"))]),
                sandbox.path(),
                None,
            )
            .await
            .expect("fetch");

        let fetched = std::fs::read(sandbox.path().join("blob.bin")).expect("read");
        assert_eq!(fetched.len(), body.len());
        assert!(fetched == body);
    }

    #[tokio::test]
    async fn http_error_status_fails_the_download() {
        let address = serve_once("404 Not Found", Vec::new()).await;
        let sandbox = tempfile::tempdir().expect("tempdir");

        let err = Fetcher::new()
            .fetch(
                &ContainerId::new("c1"),
                &command(vec![uri(format!("http://{address}/missing.tgz"))]),
                sandbox.path(),
                None,
            )
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn missing_local_file_fails() {
        let sandbox = tempfile::tempdir().expect("tempdir");
        let err = Fetcher::new()
            .fetch(
                &ContainerId::new("c1"),
                &command(vec![uri("/definitely/not/here.bin".into())]),
                sandbox.path(),
                None,
            )
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("/definitely/not/here.bin"));
    }

    #[tokio::test]
    async fn unsupported_scheme_fails() {
        let sandbox = tempfile::tempdir().expect("tempdir");
        let result = Fetcher::new()
            .fetch(
                &ContainerId::new("c1"),
                &command(vec![uri("ftp://host/file".into())]),
                sandbox.path(),
                None,
            )
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn kill_without_fetch_is_a_no_op() {
        Fetcher::new().kill(&ContainerId::new("nothing"));
    }
}
