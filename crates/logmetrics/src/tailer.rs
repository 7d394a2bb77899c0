//! File tailer for reading new lines from a growing log file.
//!
//! Supports log rotation detection via inode tracking and file size
//! comparison.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Maximum number of lines to read in a single `read_new_lines()` call.
pub(crate) const MAX_LINES_PER_READ: usize = 10_000;

/// Reads complete lines appended to a file since the last read position.
///
/// An existing file is tailed from its end. A file that does not exist yet is
/// read from the beginning once it appears. A trailing line without a newline
/// is left in place until it is completed.
#[derive(Debug)]
pub struct FileTailer {
    path: PathBuf,
    offset: u64,
    inode: Option<u64>,
}

impl FileTailer {
    pub fn new(path: PathBuf) -> Self {
        match fs::metadata(&path) {
            Ok(metadata) => Self {
                path,
                offset: metadata.len(),
                inode: Some(get_inode(&metadata)),
            },
            Err(_) => Self {
                path,
                offset: 0,
                inode: None,
            },
        }
    }

    /// Read new lines appended since the last call.
    ///
    /// If the file was rotated (inode changed or size decreased), re-opens
    /// from the beginning of the new file. A missing file yields no lines.
    pub fn read_new_lines(&mut self) -> io::Result<Vec<String>> {
        let metadata = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let current_inode = get_inode(&metadata);
        let current_size = metadata.len();

        if self.inode != Some(current_inode) || current_size < self.offset {
            self.inode = Some(current_inode);
            self.offset = 0;
        }

        if current_size <= self.offset {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        let mut reader = BufReader::new(file);

        let mut lines = Vec::new();
        let mut buf = Vec::new();
        while lines.len() < MAX_LINES_PER_READ {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf)?;
            if read == 0 || buf.last() != Some(&b'\n') {
                break;
            }
            self.offset += read as u64;

            let line = String::from_utf8_lossy(&buf);
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }

        Ok(lines)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn get_inode(metadata: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

/// Non-Unix targets rely on size-based rotation detection only.
#[cfg(not(unix))]
fn get_inode(_metadata: &fs::Metadata) -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &Path, content: &str) {
        let mut f = fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_tailer_starts_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        fs::write(&path, "old line 1\nold line 2\n").unwrap();

        let mut tailer = FileTailer::new(path);
        assert!(tailer.read_new_lines().unwrap().is_empty());
    }

    #[test]
    fn test_tailer_reads_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        fs::write(&path, "old\n").unwrap();
        let mut tailer = FileTailer::new(path.clone());

        append(&path, "new line 1\nnew line 2\r\n");
        assert_eq!(
            tailer.read_new_lines().unwrap(),
            vec!["new line 1", "new line 2"]
        );
        assert!(tailer.read_new_lines().unwrap().is_empty());
    }

    #[test]
    fn test_tailer_waits_for_complete_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        fs::write(&path, "").unwrap();
        let mut tailer = FileTailer::new(path.clone());

        append(&path, "partial");
        assert!(tailer.read_new_lines().unwrap().is_empty());

        append(&path, " line\n");
        assert_eq!(tailer.read_new_lines().unwrap(), vec!["partial line"]);
    }

    #[test]
    fn test_tailer_detects_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        fs::write(&path, "a".repeat(1000)).unwrap();
        let mut tailer = FileTailer::new(path.clone());

        fs::write(&path, "after rotation\n").unwrap();
        assert_eq!(tailer.read_new_lines().unwrap(), vec!["after rotation"]);
    }

    #[test]
    fn test_tailer_file_appears_later() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.log");
        let mut tailer = FileTailer::new(path.clone());
        assert!(tailer.read_new_lines().unwrap().is_empty());

        fs::write(&path, "first\n").unwrap();
        assert_eq!(tailer.read_new_lines().unwrap(), vec!["first"]);
        assert_eq!(tailer.path(), path);
    }

    #[test]
    fn test_tailer_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        fs::write(&path, "content\n").unwrap();
        let mut tailer = FileTailer::new(path.clone());

        fs::remove_file(&path).unwrap();
        assert!(tailer.read_new_lines().unwrap().is_empty());
    }
}
