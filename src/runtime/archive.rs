/// Single-file tar archives for the engine's archive endpoints
use crate::config::types::{Result, WarmboxError};
use std::io::Read;

/// Permission bits of injected files
pub const FILE_MODE: u32 = 0o644;

/// Split an absolute destination into (parent directory, file name)
pub fn split_destination(dest: &str) -> Result<(String, String)> {
    let (dir, name) = dest
        .rsplit_once('/')
        .ok_or_else(|| WarmboxError::Transfer(format!("destination {} is not absolute", dest)))?;

    if !dest.starts_with('/') {
        return Err(WarmboxError::Transfer(format!(
            "destination {} is not absolute",
            dest
        )));
    }
    if name.is_empty() || name == "." || name == ".." {
        return Err(WarmboxError::Transfer(format!(
            "destination {} does not name a file",
            dest
        )));
    }

    let dir = if dir.is_empty() { "/" } else { dir };
    Ok((dir.to_string(), name.to_string()))
}

/// Archive holding exactly one regular file named `name`. The size field is
/// the byte length of `content`; the bytes are not transformed.
pub fn pack_single_file(name: &str, content: &[u8]) -> Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header
        .set_path(name)
        .map_err(|e| WarmboxError::Transfer(format!("invalid archive entry name {}: {}", name, e)))?;
    header.set_size(content.len() as u64);
    header.set_mode(FILE_MODE);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::with_capacity(content.len() + 1024));
    builder
        .append(&header, content)
        .map_err(|e| WarmboxError::Transfer(format!("failed to build archive: {}", e)))?;
    builder
        .into_inner()
        .map_err(|e| WarmboxError::Transfer(format!("failed to finish archive: {}", e)))
}

/// Bytes of the first regular file in `archive`
pub fn unpack_single_file(archive: &[u8]) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(archive);
    let entries = archive
        .entries()
        .map_err(|e| WarmboxError::Transfer(format!("unreadable archive: {}", e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| WarmboxError::Transfer(format!("unreadable archive entry: {}", e)))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let expected = entry
            .header()
            .size()
            .map_err(|e| WarmboxError::Transfer(format!("bad archive size field: {}", e)))?;
        let mut content = Vec::with_capacity(expected as usize);
        entry
            .read_to_end(&mut content)
            .map_err(|e| WarmboxError::Transfer(format!("truncated archive entry: {}", e)))?;

        if content.len() as u64 != expected {
            return Err(WarmboxError::Transfer(format!(
                "archive entry holds {} bytes, header says {}",
                content.len(),
                expected
            )));
        }
        return Ok(content);
    }

    Err(WarmboxError::Transfer(
        "archive contains no regular file".to_string(),
    ))
}
