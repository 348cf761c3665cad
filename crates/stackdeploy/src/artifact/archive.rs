//! Tar archive handling for packaged artifacts.
//!
//! Artifacts are plain tar or zstd-compressed tar; the compression is
//! detected from the zstd frame magic rather than the object name.

use std::io::{Cursor, Read};
use std::path::Path;

use bytes::Bytes;
use tokio::task::spawn_blocking;
use tracing::debug;

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Extract a single file from an archive.
///
/// Returns `Ok(None)` if no regular file with that name exists.
pub async fn extract_entry(data: Bytes, file_name: &str) -> std::io::Result<Option<Bytes>> {
    let file_name = file_name.to_owned();
    spawn_blocking(move || extract_entry_sync(&data, &file_name)).await?
}

/// Build an archive from in-memory entries, zstd-compressed when a level is given.
pub fn pack(entries: &[(&str, &[u8])], zstd_level: Option<i32>) -> std::io::Result<Bytes> {
    let mut tar_data = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_data);
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(u64::try_from(contents.len()).unwrap_or(u64::MAX));
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *contents)?;
        }
        builder.finish()?;
    }

    match zstd_level {
        Some(level) => Ok(Bytes::from(zstd::encode_all(Cursor::new(tar_data), level)?)),
        None => Ok(Bytes::from(tar_data)),
    }
}

fn is_zstd(data: &[u8]) -> bool {
    data.starts_with(&ZSTD_MAGIC)
}

fn extract_entry_sync(data: &[u8], file_name: &str) -> std::io::Result<Option<Bytes>> {
    let tar_data = if is_zstd(data) {
        let decompressed = zstd::decode_all(Cursor::new(data))?;
        debug!(
            compressed_size = data.len(),
            decompressed_size = decompressed.len(),
            "decompressed artifact"
        );
        decompressed
    } else {
        data.to_vec()
    };

    let wanted = normalise(Path::new(file_name));
    let mut archive = tar::Archive::new(Cursor::new(tar_data));
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        if normalise(&entry.path()?) != wanted {
            continue;
        }

        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        return Ok(Some(Bytes::from(contents)));
    }

    Ok(None)
}

fn normalise(path: &Path) -> String {
    path.to_string_lossy()
        .trim_start_matches("./")
        .trim_start_matches('/')
        .to_owned()
}
