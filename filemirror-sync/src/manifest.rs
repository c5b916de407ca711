//! Remote manifest model.
//!
//! A manifest is a line-oriented listing, one record per line:
//!
//! ```text
//! <relative path>,<sha256 hex digest>,<size>
//! ```
//!
//! The line is split from the right, so paths may contain commas. Blank lines
//! and `#` comments are ignored. Reading is lazy and restartable: every call to
//! [`Manifest::read`] reopens the downloaded file and yields the same sequence.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use thiserror::Error;

use filemirror_core::{ManifestEntry, NaturalKey};

/// Errors raised while reading a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed manifest record on line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// A downloaded manifest file.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
}

impl Manifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a fresh pass over the manifest's entries.
    pub fn read(&self) -> Result<ManifestReader, ManifestError> {
        let file = File::open(&self.path).map_err(|source| ManifestError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(ManifestReader {
            path: self.path.clone(),
            lines: BufReader::new(file).lines(),
            line: 0,
        })
    }

    /// The set of natural keys listed. Duplicate records collapse.
    pub fn keys(&self) -> Result<HashSet<NaturalKey>, ManifestError> {
        self.read()?.map(|entry| entry.map(|e| e.key())).collect()
    }
}

/// One pass over a manifest file.
#[derive(Debug)]
pub struct ManifestReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line: usize,
}

impl Iterator for ManifestReader {
    type Item = Result<ManifestEntry, ManifestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = match self.lines.next()? {
                Ok(raw) => raw,
                Err(source) => {
                    return Some(Err(ManifestError::Io {
                        path: self.path.clone(),
                        source,
                    }))
                }
            };
            self.line += 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return Some(parse_record(trimmed).map_err(|reason| ManifestError::Malformed {
                line: self.line,
                reason,
            }));
        }
    }
}

/// Parse a single `path,digest,size` record.
pub fn parse_record(record: &str) -> Result<ManifestEntry, String> {
    let mut fields = record.rsplitn(3, ',');
    let (Some(size), Some(digest), Some(path)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(format!("expected `path,digest,size`, got '{record}'"));
    };

    let path = path.trim();
    if path.is_empty() {
        return Err("path is empty".to_string());
    }

    let digest = digest.trim();
    if digest.is_empty() {
        return Err(format!("digest is empty for '{path}'"));
    }
    if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("digest '{digest}' is not hexadecimal"));
    }

    let size = size.trim();
    if size.starts_with('-') {
        return Err(format!("size '{size}' is negative"));
    }
    let size: u64 = size
        .parse()
        .map_err(|_| format!("size '{size}' is not a number"))?;

    Ok(ManifestEntry {
        path: path.to_string(),
        digest: digest.to_ascii_lowercase(),
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(dir: &TempDir, body: &str) -> Manifest {
        let path = dir.path().join("PULP_MANIFEST");
        std::fs::write(&path, body).unwrap();
        Manifest::new(path)
    }

    #[test]
    fn parses_records_and_skips_comments() {
        let tmp = TempDir::new().unwrap();
        let manifest = write_manifest(&tmp, "# generated\n\na.iso,AB12,10\r\nsub/b.iso,cd34,0\n");
        let entries: Vec<_> = manifest.read().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(
            entries,
            vec![
                ManifestEntry {
                    path: "a.iso".into(),
                    digest: "ab12".into(),
                    size: 10
                },
                ManifestEntry {
                    path: "sub/b.iso".into(),
                    digest: "cd34".into(),
                    size: 0
                },
            ]
        );
    }

    #[test]
    fn rereading_yields_identical_sequence() {
        let tmp = TempDir::new().unwrap();
        let manifest = write_manifest(&tmp, "a,01,1\nb,02,2\nc,03,3\n");
        let first: Vec<_> = manifest.read().unwrap().collect::<Result<_, _>>().unwrap();
        let second: Vec<_> = manifest.read().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn paths_may_contain_commas() {
        let entry = parse_record("dir/a,b.txt,ff,3").unwrap();
        assert_eq!(entry.path, "dir/a,b.txt");
        assert_eq!(entry.digest, "ff");
        assert_eq!(entry.size, 3);
    }

    #[test]
    fn duplicate_records_collapse_in_keys() {
        let tmp = TempDir::new().unwrap();
        let manifest = write_manifest(&tmp, "a,01,1\na,01,1\n");
        assert_eq!(manifest.keys().unwrap().len(), 1);
    }

    #[test]
    fn malformed_records_are_rejected() {
        assert!(parse_record("a.iso,ab12").unwrap_err().contains("expected"));
        assert!(parse_record("a.iso,ab12,-1").unwrap_err().contains("negative"));
        assert!(parse_record("a.iso,ab12,ten").unwrap_err().contains("not a number"));
        assert!(parse_record("a.iso,xyz,1").unwrap_err().contains("hexadecimal"));
        assert!(parse_record("a.iso,,1").unwrap_err().contains("digest is empty"));
        assert!(parse_record(",ab,1").unwrap_err().contains("path is empty"));
    }

    #[test]
    fn malformed_line_number_is_reported() {
        let tmp = TempDir::new().unwrap();
        let manifest = write_manifest(&tmp, "a,01,1\n\nb,02\n");
        let err = manifest.keys().unwrap_err();
        match err {
            ManifestError::Malformed { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let manifest = Manifest::new(tmp.path().join("absent"));
        assert!(matches!(manifest.read(), Err(ManifestError::Io { .. })));
    }
}
