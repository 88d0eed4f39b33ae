//! Size-based log file rotation.
//!
//! When the active file would grow past `max_bytes`, it is renamed to
//! `<file>.1`, older backups shift up to `<file>.<max_backups>` (the oldest
//! is dropped) and a fresh file is opened.

use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

struct RotatingFile {
    path: PathBuf,
    file: File,
    size: u64,
    max_bytes: u64,
    max_backups: usize,
}

impl RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.max_bytes > 0 && self.size > 0 && self.size + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.size += buf.len() as u64;
        Ok(buf.len())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.max_backups == 0 {
            fs::remove_file(&self.path)?;
        } else {
            let oldest = backup_path(&self.path, self.max_backups);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for index in (1..self.max_backups).rev() {
                let from = backup_path(&self.path, index);
                if from.exists() {
                    fs::rename(&from, backup_path(&self.path, index + 1))?;
                }
            }
            fs::rename(&self.path, backup_path(&self.path, 1))?;
        }

        self.file = open_append(&self.path)?;
        self.size = 0;
        Ok(())
    }
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// `MakeWriter` over a shared, rotating log file
#[derive(Clone)]
pub struct RotatingFileWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl RotatingFileWriter {
    /// Open (or create) `path` for appending. `max_bytes == 0` disables
    /// rotation.
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, max_backups: usize) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = open_append(&path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            inner: Arc::new(Mutex::new(RotatingFile {
                path,
                file,
                size,
                max_bytes,
                max_backups,
            })),
        })
    }
}

/// Handle returned for each log record
pub struct RotatingFileHandle {
    inner: Arc<Mutex<RotatingFile>>,
}

impl Write for RotatingFileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileHandle;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingFileHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_line(writer: &RotatingFileWriter, line: &str) {
        let mut handle = writer.make_writer();
        handle.write_all(line.as_bytes()).unwrap();
        handle.flush().unwrap();
    }

    #[test]
    fn test_appends_without_rotation_below_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let writer = RotatingFileWriter::open(&path, 1024, 3).unwrap();

        write_line(&writer, "one\n");
        write_line(&writer, "two\n");

        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
        assert!(!backup_path(&path, 1).exists());
    }

    #[test]
    fn test_rotates_when_limit_exceeded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let writer = RotatingFileWriter::open(&path, 10, 3).unwrap();

        write_line(&writer, "aaaaaaaa\n");
        write_line(&writer, "bbbbbbbb\n");
        write_line(&writer, "cccccccc\n");

        assert_eq!(fs::read_to_string(&path).unwrap(), "cccccccc\n");
        assert_eq!(
            fs::read_to_string(backup_path(&path, 1)).unwrap(),
            "bbbbbbbb\n"
        );
        assert_eq!(
            fs::read_to_string(backup_path(&path, 2)).unwrap(),
            "aaaaaaaa\n"
        );
    }

    #[test]
    fn test_oldest_backup_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let writer = RotatingFileWriter::open(&path, 4, 2).unwrap();

        for line in ["1111\n", "2222\n", "3333\n", "4444\n"] {
            write_line(&writer, line);
        }

        assert_eq!(fs::read_to_string(&path).unwrap(), "4444\n");
        assert_eq!(fs::read_to_string(backup_path(&path, 1)).unwrap(), "3333\n");
        assert_eq!(fs::read_to_string(backup_path(&path, 2)).unwrap(), "2222\n");
        assert!(!backup_path(&path, 3).exists());
    }

    #[test]
    fn test_zero_backups_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let writer = RotatingFileWriter::open(&path, 4, 0).unwrap();

        write_line(&writer, "old!\n");
        write_line(&writer, "new!\n");

        assert_eq!(fs::read_to_string(&path).unwrap(), "new!\n");
        assert!(!backup_path(&path, 1).exists());
    }

    #[test]
    fn test_existing_size_counts_toward_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "previous run\n").unwrap();

        let writer = RotatingFileWriter::open(&path, 16, 1).unwrap();
        write_line(&writer, "next run\n");

        assert_eq!(fs::read_to_string(&path).unwrap(), "next run\n");
        assert_eq!(
            fs::read_to_string(backup_path(&path, 1)).unwrap(),
            "previous run\n"
        );
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs/nested/app.log");
        let writer = RotatingFileWriter::open(&path, 0, 0).unwrap();
        write_line(&writer, "hello\n");
        assert!(path.exists());
    }
}
