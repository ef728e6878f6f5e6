//! Building the self-archive: a tar stream containing the tool's own
//! executable installed under the three names the in-container init and
//! shims expect. Read from `/proc/self/exe` so the bytes copied in are
//! byte-identical to the running binary, not whatever's on `$PATH`.

use std::io;

use anyhow::{Context, Result};
use astral_tokio_tar::{Builder, Header};
use tokio::io::AsyncWriteExt;

const MODE_SETUID_SETGID_0755: u32 = 0o6755;
const MODE_0755: u32 = 0o755;

/// Reads this process's own executable bytes.
pub async fn read_self_exe() -> Result<Vec<u8>> {
    tokio::fs::read("/proc/self/exe").await.context("reading /proc/self/exe")
}

/// Builds the self-archive tar stream: `/sbin/wr-init` (setuid+setgid,
/// 0755), `/usr/bin/wharfrat` (0755), `/usr/bin/wr` (symlink to
/// `wharfrat`). Returns the archive bytes, ready to hand to the engine's
/// copy-to-container call.
pub async fn build(exe_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());

    append_regular_file(&mut builder, "sbin/wr-init", exe_bytes, MODE_SETUID_SETGID_0755).await?;
    append_regular_file(&mut builder, "usr/bin/wharfrat", exe_bytes, MODE_0755).await?;
    append_symlink(&mut builder, "usr/bin/wr", "wharfrat").await?;

    let mut inner = builder.into_inner().await.context("finalizing self-archive tar stream")?;
    inner.flush().await.context("flushing self-archive tar stream")?;
    Ok(inner)
}

async fn append_regular_file<W>(builder: &mut Builder<W>, path: &str, data: &[u8], mode: u32) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    let mut header = Header::new_gnu();
    header.set_path(path).with_context(|| format!("setting tar path {path}"))?;
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_entry_type(astral_tokio_tar::EntryType::Regular);
    header.set_cksum();
    builder
        .append(&header, data)
        .await
        .with_context(|| format!("appending {path} to self-archive"))
}

async fn append_symlink<W>(builder: &mut Builder<W>, path: &str, target: &str) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    builder
        .append_link(&mut Header::new_gnu(), path, target)
        .await
        .with_context(|| format!("appending symlink {path} -> {target}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn archive_contains_all_three_entries() {
        let archive = build(b"fake-binary-bytes").await.unwrap();
        let mut reader = astral_tokio_tar::Archive::new(io::Cursor::new(archive));
        let mut entries = reader.entries().unwrap();
        let mut paths = Vec::new();
        use futures::StreamExt as _;
        while let Some(entry) = entries.next().await {
            let entry = entry.unwrap();
            paths.push(entry.path().unwrap().to_string_lossy().into_owned());
        }
        assert!(paths.contains(&"sbin/wr-init".to_owned()));
        assert!(paths.contains(&"usr/bin/wharfrat".to_owned()));
        assert!(paths.contains(&"usr/bin/wr".to_owned()));
    }
}
