use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

use anyhow::Context;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

const MAX_ATTEMPTS: u32 = 3;

fn http_client() -> anyhow::Result<&'static reqwest::Client> {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    if let Some(c) = CLIENT.get() {
        return Ok(c);
    }
    let client = reqwest::Client::builder()
        .user_agent(concat!("mcsm-agent/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(15 * 60))
        .build()
        .context("build http client")?;
    Ok(CLIENT.get_or_init(|| client))
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

async fn fetch_to(url: &str, tmp: &Path) -> anyhow::Result<u64> {
    let resp = http_client()?
        .get(url)
        .send()
        .await
        .context("download server jar")?
        .error_for_status()
        .context("download server jar (status)")?;
    let expected = resp.content_length();

    let mut file = tokio::fs::File::create(tmp)
        .await
        .with_context(|| format!("create {}", tmp.display()))?;
    let mut written: u64 = 0;
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("read server jar body")?;
        file.write_all(&chunk).await.context("write server jar")?;
        written = written.saturating_add(chunk.len() as u64);
    }
    file.flush().await.ok();
    file.sync_all().await.context("sync server jar")?;

    if let Some(expected) = expected
        && expected != written
    {
        anyhow::bail!("server jar size mismatch: expected {expected} bytes, got {written} bytes");
    }
    if written == 0 {
        anyhow::bail!("server jar download was empty");
    }
    Ok(written)
}

/// Streams `url` into `<dir>/<file_name>`.
///
/// The body lands in `<file_name>.part` first and is renamed into place only
/// when complete, so start never sees a half-written artifact.
pub async fn download_server_jar(dir: &Path, url: &str, file_name: &str) -> anyhow::Result<PathBuf> {
    let dest = dir.join(file_name);
    let tmp = part_path(&dest);

    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=MAX_ATTEMPTS {
        match fetch_to(url, &tmp).await {
            Ok(bytes) => {
                tokio::fs::rename(&tmp, &dest)
                    .await
                    .with_context(|| format!("persist {}", dest.display()))?;
                tracing::info!(path = %dest.display(), bytes, "server jar downloaded");
                return Ok(dest);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "server jar download failed");
                let _ = tokio::fs::remove_file(&tmp).await;
                last_err = Some(e);
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(
                        200_u64.saturating_mul(2_u64.pow(attempt - 1)),
                    ))
                    .await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("download failed")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_file_sits_next_to_destination() {
        let p = part_path(Path::new("/srv/server1/paper.jar"));
        assert_eq!(p, PathBuf::from("/srv/server1/paper.jar.part"));
    }

    #[tokio::test]
    async fn failed_download_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        // Port 9 on localhost: nothing listens there, connect fails fast.
        let err = download_server_jar(dir.path(), "http://127.0.0.1:9/paper.jar", "paper.jar")
            .await
            .unwrap_err();
        assert!(!err.to_string().is_empty());
        assert!(!dir.path().join("paper.jar").exists());
        assert!(!dir.path().join("paper.jar.part").exists());
    }
}
