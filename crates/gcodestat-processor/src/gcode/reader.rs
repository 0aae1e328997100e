//! Streaming G-code file reader
//!
//! Reads a G-code file line by line through a large buffer without holding
//! the file in memory. Lines are decoded lossily so files with stray
//! non-UTF-8 bytes (e.g. in thumbnails or comments) are still processed.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use gcodestat_core::{ProcessError, Result};

/// `BufReader` capacity; large enough that multi-hundred-MB prints stream quickly
pub const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Counters returned by [`GcodeFileReader::read_lines`]
#[derive(Debug, Clone, Default)]
pub struct FileReadStats {
    /// Total bytes read
    pub bytes_read: u64,
    /// Total lines read
    pub lines_read: u64,
    /// File size in bytes
    pub file_size: u64,
    /// Wall time of the pass in milliseconds
    pub read_time_ms: u64,
}

impl FileReadStats {
    /// Share of the file consumed, 0 to 100
    pub fn progress_percent(&self) -> f64 {
        if self.file_size == 0 {
            0.0
        } else {
            (self.bytes_read as f64 / self.file_size as f64) * 100.0
        }
    }
}

/// Line-by-line reader over a G-code file on disk
pub struct GcodeFileReader {
    path: PathBuf,
    file_size: u64,
}

impl GcodeFileReader {
    /// Open `path` for streaming
    ///
    /// # Errors
    /// Returns [`ProcessError::FileNotFound`] if the path is not a regular
    /// file, or [`ProcessError::Read`] if its metadata cannot be read.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.is_file() {
            return Err(ProcessError::FileNotFound { path }.into());
        }

        let file_size = match fs::metadata(&path) {
            Ok(metadata) => metadata.len(),
            Err(source) => return Err(ProcessError::Read { path, source }.into()),
        };

        Ok(Self { path, file_size })
    }

    /// Get file size in bytes
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Get file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_error(&self, source: std::io::Error) -> gcodestat_core::Error {
        ProcessError::Read {
            path: self.path.clone(),
            source,
        }
        .into()
    }

    /// Read the file line by line
    ///
    /// The callback receives the 1-based line id and the line text without
    /// its line ending. An error returned by the callback stops reading and
    /// is passed through unchanged.
    pub fn read_lines<F>(&self, mut callback: F) -> Result<FileReadStats>
    where
        F: FnMut(usize, &str) -> Result<()>,
    {
        let start_time = Instant::now();
        let file = File::open(&self.path).map_err(|e| self.read_error(e))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut buffer = Vec::with_capacity(256);
        let mut lines_read = 0u64;
        let mut bytes_read = 0u64;

        loop {
            buffer.clear();
            let n = reader
                .read_until(b'\n', &mut buffer)
                .map_err(|e| self.read_error(e))?;
            if n == 0 {
                break;
            }
            bytes_read += n as u64;
            lines_read += 1;

            let text = String::from_utf8_lossy(&buffer);
            callback(lines_read as usize, text.trim_end_matches(['\r', '\n']))?;
        }

        Ok(FileReadStats {
            bytes_read,
            lines_read,
            file_size: self.file_size,
            read_time_ms: start_time.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file() {
        let err = GcodeFileReader::new("/definitely/not/here.gcode").err().unwrap();
        assert!(matches!(
            err,
            gcodestat_core::Error::Process(ProcessError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_read_lines_with_ids() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"G28\r\nG1 X10\n;end").unwrap();

        let reader = GcodeFileReader::new(file.path()).unwrap();
        let mut seen = Vec::new();
        let stats = reader
            .read_lines(|id, line| {
                seen.push((id, line.to_string()));
                Ok(())
            })
            .unwrap();

        assert_eq!(
            seen,
            vec![
                (1, "G28".to_string()),
                (2, "G1 X10".to_string()),
                (3, ";end".to_string())
            ]
        );
        assert_eq!(stats.lines_read, 3);
        assert_eq!(stats.bytes_read, 16);
        assert_eq!(stats.progress_percent(), 100.0);
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"; \xff\xfe thumbnail\nG1 X1\n").unwrap();

        let reader = GcodeFileReader::new(file.path()).unwrap();
        let mut count = 0;
        reader
            .read_lines(|_, _| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_callback_error_stops_reading() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"a\nb\nc\n").unwrap();

        let reader = GcodeFileReader::new(file.path()).unwrap();
        let mut count = 0;
        let result = reader.read_lines(|_, _| {
            count += 1;
            if count == 2 {
                Err(ProcessError::Cancelled.into())
            } else {
                Ok(())
            }
        });
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(count, 2);
    }
}
