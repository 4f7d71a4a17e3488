// src/archive.rs

//! Package archive I/O
//!
//! Packages travel between tiers as gzip-compressed tarballs. This module
//! provides the narrow operations the tiers need: pack a directory (with
//! optional extra entries such as `dependencies.info`), extract into a
//! directory, read a single named entry, and MD5 checksums for integrity
//! checks during propagation.

use crate::error::{Error, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tar::{Archive, Builder, Header};
use tracing::debug;
use walkdir::WalkDir;

/// Buffer size for checksum streaming (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

fn open_archive(path: &Path) -> Result<Archive<GzDecoder<File>>> {
    let file = File::open(path).map_err(|e| {
        Error::IoError(format!("Failed to open archive {}: {}", path.display(), e))
    })?;
    Ok(Archive::new(GzDecoder::new(file)))
}

/// Pack a directory tree into a new archive
pub fn pack_dir(source: &Path, destination: &Path) -> Result<()> {
    pack_dir_with(source, destination, &[])
}

/// Pack a directory tree plus in-memory entries into a new archive
pub fn pack_dir_with(source: &Path, destination: &Path, extra: &[(&str, &[u8])]) -> Result<()> {
    let file = File::create(destination)?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));

    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(source).map_err(|e| {
            Error::IoError(format!("Failed to relativize {}: {}", entry.path().display(), e))
        })?;

        if entry.file_type().is_dir() {
            builder.append_dir(relative, entry.path())?;
        } else if entry.file_type().is_file() {
            builder.append_path_with_name(entry.path(), relative)?;
        }
    }

    for (name, data) in extra {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data)?;
    }

    builder.into_inner()?.finish()?;
    debug!("Packed {} into {}", source.display(), destination.display());
    Ok(())
}

/// Extract an archive into `destination`
pub fn extract(archive: &Path, destination: &Path) -> Result<()> {
    std::fs::create_dir_all(destination)?;
    open_archive(archive)?.unpack(destination).map_err(|e| {
        Error::IoError(format!(
            "Failed to extract {} into {}: {}",
            archive.display(),
            destination.display(),
            e
        ))
    })?;
    debug!("Extracted {} into {}", archive.display(), destination.display());
    Ok(())
}

/// Read one named entry from an archive
pub fn read_entry(archive: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    let mut archive_reader = open_archive(archive)?;
    let entries = archive_reader.entries().map_err(|e| {
        Error::IoError(format!("Failed to read entries of {}: {}", archive.display(), e))
    })?;

    for entry in entries {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        if path.trim_start_matches("./") == name {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            return Ok(Some(data));
        }
    }
    Ok(None)
}

/// MD5 of a file as lowercase hex
pub fn md5_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Fail with [`Error::IntegrityError`] unless the file hashes to `expected`
pub fn verify_md5(path: &Path, expected: &str) -> Result<()> {
    let actual = md5_file(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(Error::IntegrityError {
            artifact: path.display().to_string(),
            expected: expected.to_lowercase(),
            actual,
        })
    }
}
