//! Archive construction and extraction.
//!
//! Source paths are walked recursively and packed into a tar archive,
//! gzip-compressed when the policy asks for it. Entry names are the source
//! paths with the leading `/` stripped, so extraction under `/` puts files
//! back in place while tests can extract under a scratch root. Unreadable
//! files are skipped with a warning rather than aborting the backup.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::Result;

/// Outcome of building one archive.
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub archive_path: PathBuf,
    /// Size of the finished archive on disk.
    pub size_bytes: u64,
    /// Total bytes of the input files that were packed.
    pub input_bytes: u64,
    pub file_count: u64,
    /// SHA-256 hex digest of the archive bytes (before any encryption).
    pub checksum: String,
    /// archive size / input size; 1.0 when there was no input.
    pub compression_ratio: f64,
}

/// Walk `source_paths` and pack their files into a tar archive at
/// `archive_path`, gzipped when `compress` is set.
pub fn build_archive(
    source_paths: &[PathBuf],
    archive_path: &Path,
    compress: bool,
) -> Result<ArchiveSummary> {
    let file = File::create(archive_path)?;

    let (input_bytes, file_count) = if compress {
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let tally = append_sources(&mut builder, source_paths)?;
        let encoder = builder.into_inner()?;
        encoder.finish()?;
        tally
    } else {
        let mut builder = tar::Builder::new(file);
        let tally = append_sources(&mut builder, source_paths)?;
        builder.into_inner()?;
        tally
    };

    let size_bytes = std::fs::metadata(archive_path)?.len();
    let checksum = file_checksum(archive_path)?;
    let compression_ratio = if input_bytes > 0 {
        size_bytes as f64 / input_bytes as f64
    } else {
        1.0
    };

    debug!(
        "Built archive {} ({} files, {} -> {} bytes)",
        archive_path.display(),
        file_count,
        input_bytes,
        size_bytes
    );

    Ok(ArchiveSummary {
        archive_path: archive_path.to_path_buf(),
        size_bytes,
        input_bytes,
        file_count,
        checksum,
        compression_ratio,
    })
}

fn append_sources<W: Write>(
    builder: &mut tar::Builder<W>,
    source_paths: &[PathBuf],
) -> Result<(u64, u64)> {
    let mut input_bytes = 0u64;
    let mut file_count = 0u64;

    for source in source_paths {
        if !source.exists() {
            warn!("Source path {} does not exist, skipping", source.display());
            continue;
        }

        for entry in WalkDir::new(source) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", source.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let mut file = match File::open(path) {
                Ok(file) => file,
                Err(e) => {
                    warn!("Skipping unreadable file {}: {}", path.display(), e);
                    continue;
                }
            };

            let name = entry_name(path);
            input_bytes += file.metadata()?.len();
            file_count += 1;
            builder.append_file(name, &mut file)?;
        }
    }

    Ok((input_bytes, file_count))
}

/// Tar entry names are the absolute path with the leading `/` removed.
fn entry_name(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

/// Extract an archive under `dest_root`. Gzip compression is detected from
/// the magic bytes since the record does not persist the compression flag.
pub fn extract_archive(archive_path: &Path, dest_root: &Path) -> Result<()> {
    std::fs::create_dir_all(dest_root)?;
    let file = File::open(archive_path)?;

    if is_gzip(archive_path)? {
        tar::Archive::new(GzDecoder::new(file)).unpack(dest_root)?;
    } else {
        tar::Archive::new(file).unpack(dest_root)?;
    }
    Ok(())
}

/// Enumerate member paths of an in-memory archive. Used as a structural
/// integrity check during verification.
pub fn enumerate_members(data: &[u8]) -> Result<Vec<PathBuf>> {
    let mut members = Vec::new();

    if data.starts_with(GZIP_MAGIC) {
        let mut archive = tar::Archive::new(GzDecoder::new(data));
        for entry in archive.entries()? {
            members.push(entry?.path()?.into_owned());
        }
    } else {
        let mut archive = tar::Archive::new(data);
        for entry in archive.entries()? {
            members.push(entry?.path()?.into_owned());
        }
    }

    Ok(members)
}

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

fn is_gzip(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == [0x1f, 0x8b]),
        // Shorter than two bytes cannot be gzip.
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// SHA-256 hex digest of a file's contents.
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 hex digest of a byte buffer.
pub fn bytes_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tree(root: &Path) {
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::write(root.join("a.txt"), b"alpha").unwrap();
        std::fs::write(root.join("nested/b.txt"), b"bravo").unwrap();
    }

    #[test]
    fn test_build_and_extract_round_trip() {
        let src = tempfile::tempdir().unwrap();
        write_tree(src.path());

        let work = tempfile::tempdir().unwrap();
        let archive_path = work.path().join("test.tar.gz");
        let summary =
            build_archive(&[src.path().to_path_buf()], &archive_path, true).unwrap();
        assert_eq!(summary.file_count, 2);
        assert_eq!(summary.input_bytes, 10);
        assert_eq!(summary.checksum, file_checksum(&archive_path).unwrap());

        let restore_root = tempfile::tempdir().unwrap();
        extract_archive(&archive_path, restore_root.path()).unwrap();

        let restored = restore_root
            .path()
            .join(src.path().strip_prefix("/").unwrap());
        assert_eq!(std::fs::read(restored.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(
            std::fs::read(restored.join("nested/b.txt")).unwrap(),
            b"bravo"
        );
    }

    #[test]
    fn test_uncompressed_archive() {
        let src = tempfile::tempdir().unwrap();
        write_tree(src.path());

        let work = tempfile::tempdir().unwrap();
        let archive_path = work.path().join("test.tar");
        build_archive(&[src.path().to_path_buf()], &archive_path, false).unwrap();
        assert!(!is_gzip(&archive_path).unwrap());

        let data = std::fs::read(&archive_path).unwrap();
        let members = enumerate_members(&data).unwrap();
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_missing_source_skipped() {
        let src = tempfile::tempdir().unwrap();
        write_tree(src.path());
        let missing = PathBuf::from("/definitely/not/a/real/path");

        let work = tempfile::tempdir().unwrap();
        let archive_path = work.path().join("test.tar.gz");
        let summary = build_archive(
            &[missing, src.path().to_path_buf()],
            &archive_path,
            true,
        )
        .unwrap();
        assert_eq!(summary.file_count, 2);
    }

    #[test]
    fn test_empty_input_archive() {
        let work = tempfile::tempdir().unwrap();
        let archive_path = work.path().join("empty.tar.gz");
        let summary = build_archive(&[], &archive_path, true).unwrap();
        assert_eq!(summary.file_count, 0);
        assert_eq!(summary.compression_ratio, 1.0);

        let data = std::fs::read(&archive_path).unwrap();
        assert!(enumerate_members(&data).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let src = tempfile::tempdir().unwrap();
        write_tree(src.path());
        let locked = src.path().join("locked.txt");
        std::fs::write(&locked, b"secret").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        if File::open(&locked).is_ok() {
            // Running as root; mode bits are not enforced.
            return;
        }

        let work = tempfile::tempdir().unwrap();
        let archive_path = work.path().join("test.tar.gz");
        let summary =
            build_archive(&[src.path().to_path_buf()], &archive_path, true).unwrap();
        assert_eq!(summary.file_count, 2);

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o644)).unwrap();
    }
}
