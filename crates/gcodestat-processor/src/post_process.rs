//! Remaining-time annotation
//!
//! Rewrites the placeholder lines left by the slicer with M73 progress lines
//! and the estimated print time. Each replacement has exactly the byte
//! length of the placeholder it overwrites, so every other byte of the file
//! keeps its offset. The file is rewritten through a temporary copy in the
//! same directory that atomically replaces the original once complete.
//!
//! A multi-line M73 block only fits when the slicer padded the placeholder
//! with trailing spaces. Unpadded placeholders usually receive just the
//! progress lines, without the time-to-stop lines.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use gcodestat_core::{format_time_dhm, time_in_minutes, PostProcessError, Result, TimeMode};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::gcode::READ_BUFFER_SIZE;
use crate::tags::ReservedTag;

/// Elapsed time at a placeholder line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaceholderMark {
    pub line_id: usize,
    pub tag: ReservedTag,
    /// Elapsed time per mode when the line is reached (s)
    pub elapsed: [f64; TimeMode::COUNT],
}

/// Elapsed time at a print stop (color change, pause, custom G-code)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopMark {
    pub line_id: usize,
    pub elapsed: [f64; TimeMode::COUNT],
}

/// Timing data collected during the main pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeMarks {
    /// Total time per mode, `None` for disabled modes
    pub totals: [Option<f64>; TimeMode::COUNT],
    /// Placeholders in line order
    pub placeholders: Vec<PlaceholderMark>,
    /// Stops in line order
    pub stops: Vec<StopMark>,
}

/// Outcome of an annotation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotationStats {
    pub lines_read: usize,
    pub placeholders_replaced: usize,
    pub placeholders_skipped: usize,
}

/// Replaces placeholder lines with remaining-time information
#[derive(Debug, Clone)]
pub struct RemainingTimeAnnotator {
    marks: TimeMarks,
}

/// Split a raw line into content and line ending
fn split_eol(line: &[u8]) -> (&[u8], &[u8]) {
    let mut end = line.len();
    if end > 0 && line[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && line[end - 1] == b'\r' {
            end -= 1;
        }
    }
    line.split_at(end)
}

/// Whether `content` is the placeholder line for `tag`, ignoring trailing padding
fn is_placeholder_line(content: &[u8], tag: ReservedTag) -> bool {
    let trimmed = content
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(&content[..0], |last| &content[..=last]);
    trimmed.strip_prefix(b";") == Some(tag.as_str().as_bytes())
}

/// Fit `text` into exactly `width` bytes, padding with spaces or truncating
fn fit_to_width(text: &str, width: usize) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(width, b' ');
    bytes
}

fn percent(elapsed: f64, total: f64) -> i64 {
    if total > 0.0 {
        (100.0 * elapsed / total).floor().clamp(0.0, 100.0) as i64
    } else {
        0
    }
}

impl RemainingTimeAnnotator {
    pub fn new(marks: TimeMarks) -> Self {
        Self { marks }
    }

    pub fn marks(&self) -> &TimeMarks {
        &self.marks
    }

    fn next_stop(&self, line_id: usize) -> Option<&StopMark> {
        self.marks.stops.iter().find(|stop| stop.line_id > line_id)
    }

    /// M73 lines for one mode: the progress line and the time-to-stop line
    fn m73_lines(&self, mark: &PlaceholderMark, mode: TimeMode) -> Option<(String, Option<String>)> {
        let total = self.marks.totals[mode.index()]?;
        let (progress, remaining, stop) = match mode {
            TimeMode::Normal => ('P', 'R', 'C'),
            TimeMode::Stealth => ('Q', 'S', 'D'),
        };

        let main = if mark.tag == ReservedTag::LastLineM73Placeholder {
            format!("M73 {progress}100 {remaining}0")
        } else {
            let elapsed = mark.elapsed[mode.index()];
            format!(
                "M73 {progress}{} {remaining}{}",
                percent(elapsed, total),
                time_in_minutes(total - elapsed)
            )
        };
        let to_stop = self.next_stop(mark.line_id).map(|next| {
            let until = next.elapsed[mode.index()] - mark.elapsed[mode.index()];
            format!("M73 {stop}{}", time_in_minutes(until))
        });
        Some((main, to_stop))
    }

    /// Replacement text for a placeholder, before fitting to width
    ///
    /// Lines of a multi-line block are joined with `eol`, the placeholder's
    /// own line ending.
    fn render(&self, mark: &PlaceholderMark, width: usize, eol: &str) -> String {
        match mark.tag {
            ReservedTag::EstimatedPrintingTimePlaceholder => {
                let normal = self.marks.totals[TimeMode::Normal.index()].unwrap_or(0.0);
                let text = format!("; estimated time = {}", format_time_dhm(normal));
                match self.marks.totals[TimeMode::Stealth.index()] {
                    Some(stealth) => {
                        let full = format!("{text}, stealth = {}", format_time_dhm(stealth));
                        if full.len() <= width {
                            full
                        } else {
                            text
                        }
                    }
                    None => text,
                }
            }
            _ => {
                let modes: Vec<_> = TimeMode::ALL
                    .into_iter()
                    .filter_map(|mode| self.m73_lines(mark, mode))
                    .collect();

                // Stop lines that survive at each step: all, normal only, none
                for keep_stops in [TimeMode::COUNT, 1, 0] {
                    let block = modes
                        .iter()
                        .enumerate()
                        .flat_map(|(i, (main, stop))| {
                            std::iter::once(main).chain(stop.as_ref().filter(|_| i < keep_stops))
                        })
                        .map(String::as_str)
                        .collect::<Vec<_>>()
                        .join(eol);
                    if block.len() <= width {
                        return block;
                    }
                }

                modes.first().map(|(main, _)| main.clone()).unwrap_or_default()
            }
        }
    }

    /// Annotate `path` in place
    ///
    /// # Errors
    /// Returns a [`PostProcessError`] if the file cannot be opened, the
    /// temporary copy cannot be created or written, or the copy cannot
    /// replace the original. The original file is unchanged in every case.
    pub fn process(&self, path: &Path) -> Result<AnnotationStats> {
        let owned = || path.to_path_buf();
        let file = File::open(path).map_err(|source| PostProcessError::Open {
            path: owned(),
            source,
        })?;
        if self.marks.placeholders.is_empty() {
            debug!(path = %path.display(), "No placeholders, file left untouched");
            return Ok(AnnotationStats::default());
        }
        let permissions = file
            .metadata()
            .map_err(|source| PostProcessError::Open {
                path: owned(),
                source,
            })?
            .permissions();

        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let temp = NamedTempFile::new_in(dir).map_err(|source| PostProcessError::TempFile {
            path: owned(),
            source,
        })?;

        let write_error = |source: std::io::Error| PostProcessError::Write {
            path: owned(),
            source,
        };

        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
        let mut writer = BufWriter::with_capacity(READ_BUFFER_SIZE, temp);
        let mut pending = self.marks.placeholders.iter().peekable();
        let mut stats = AnnotationStats::default();
        let mut buffer = Vec::with_capacity(256);

        loop {
            buffer.clear();
            let n = reader
                .read_until(b'\n', &mut buffer)
                .map_err(write_error)?;
            if n == 0 {
                break;
            }
            stats.lines_read += 1;

            // Skip marks for lines already passed
            while pending
                .peek()
                .is_some_and(|mark| mark.line_id < stats.lines_read)
            {
                pending.next();
            }

            match pending.next_if(|mark| mark.line_id == stats.lines_read) {
                Some(mark) => {
                    let (content, eol) = split_eol(&buffer);
                    if is_placeholder_line(content, mark.tag) {
                        let joiner = if eol == b"\r\n" { "\r\n" } else { "\n" };
                        let text = self.render(mark, content.len(), joiner);
                        let replacement = fit_to_width(&text, content.len());
                        debug!(line = mark.line_id, tag = %mark.tag, "Replacing placeholder");
                        writer.write_all(&replacement).map_err(write_error)?;
                        writer.write_all(eol).map_err(write_error)?;
                        stats.placeholders_replaced += 1;
                    } else {
                        warn!(
                            line = mark.line_id,
                            tag = %mark.tag,
                            "Placeholder line changed since processing, leaving it as is"
                        );
                        writer.write_all(&buffer).map_err(write_error)?;
                        stats.placeholders_skipped += 1;
                    }
                }
                None => writer.write_all(&buffer).map_err(write_error)?,
            }
        }

        let temp = writer
            .into_inner()
            .map_err(|e| write_error(e.into_error()))?;
        temp.as_file().sync_all().map_err(write_error)?;
        temp.as_file()
            .set_permissions(permissions)
            .map_err(write_error)?;
        temp.persist(path).map_err(|e| PostProcessError::Persist {
            path: owned(),
            source: e.error,
        })?;

        info!(
            path = %path.display(),
            replaced = stats.placeholders_replaced,
            "Remaining times written"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marks(stealth: bool) -> TimeMarks {
        TimeMarks {
            totals: [Some(600.0), stealth.then_some(900.0)],
            placeholders: vec![
                PlaceholderMark {
                    line_id: 1,
                    tag: ReservedTag::FirstLineM73Placeholder,
                    elapsed: [0.0, 0.0],
                },
                PlaceholderMark {
                    line_id: 5,
                    tag: ReservedTag::LastLineM73Placeholder,
                    elapsed: [600.0, 900.0],
                },
            ],
            stops: vec![StopMark {
                line_id: 3,
                elapsed: [300.0, 450.0],
            }],
        }
    }

    #[test]
    fn test_split_eol() {
        assert_eq!(split_eol(b"abc\r\n"), (&b"abc"[..], &b"\r\n"[..]));
        assert_eq!(split_eol(b"abc\n"), (&b"abc"[..], &b"\n"[..]));
        assert_eq!(split_eol(b"abc"), (&b"abc"[..], &b""[..]));
    }

    #[test]
    fn test_placeholder_line_match() {
        let tag = ReservedTag::FirstLineM73Placeholder;
        assert!(is_placeholder_line(b";_GP_FIRST_LINE_M73_PLACEHOLDER", tag));
        assert!(is_placeholder_line(b";_GP_FIRST_LINE_M73_PLACEHOLDER    ", tag));
        assert!(!is_placeholder_line(b"G1 X1", tag));
        assert!(!is_placeholder_line(b"", tag));
    }

    #[test]
    fn test_fit_to_width() {
        assert_eq!(fit_to_width("M73", 5), b"M73  ".to_vec());
        assert_eq!(fit_to_width("M73 P0", 3), b"M73".to_vec());
    }

    #[test]
    fn test_render_first_line_with_stop() {
        let annotator = RemainingTimeAnnotator::new(marks(false));
        let mark = annotator.marks().placeholders[0];
        assert_eq!(annotator.render(&mark, 64, "\n"), "M73 P0 R10\nM73 C5");
    }

    #[test]
    fn test_render_joins_with_placeholder_line_ending() {
        let annotator = RemainingTimeAnnotator::new(marks(true));
        let mark = annotator.marks().placeholders[0];
        assert_eq!(
            annotator.render(&mark, 64, "\r\n"),
            "M73 P0 R10\r\nM73 C5\r\nM73 Q0 S15\r\nM73 D7"
        );
        // each CRLF joiner costs two bytes of the width
        assert_eq!(
            annotator.render(&mark, 30, "\r\n"),
            "M73 P0 R10\r\nM73 C5\r\nM73 Q0 S15"
        );
    }

    #[test]
    fn test_render_drops_stops_then_stealth() {
        let annotator = RemainingTimeAnnotator::new(marks(true));
        let mark = annotator.marks().placeholders[0];
        assert_eq!(
            annotator.render(&mark, 64, "\n"),
            "M73 P0 R10\nM73 C5\nM73 Q0 S15\nM73 D7"
        );
        assert_eq!(
            annotator.render(&mark, 28, "\n"),
            "M73 P0 R10\nM73 C5\nM73 Q0 S15"
        );
        assert_eq!(annotator.render(&mark, 25, "\n"), "M73 P0 R10\nM73 Q0 S15");
        assert_eq!(annotator.render(&mark, 12, "\n"), "M73 P0 R10");
    }

    #[test]
    fn test_process_without_placeholders_keeps_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"G1 X10\nG1 X20\n").unwrap();
        let before = std::fs::metadata(file.path()).unwrap().modified().unwrap();

        let annotator = RemainingTimeAnnotator::new(TimeMarks {
            totals: [Some(60.0), None],
            ..TimeMarks::default()
        });
        let stats = annotator.process(file.path()).unwrap();

        assert_eq!(stats, AnnotationStats::default());
        let after = std::fs::metadata(file.path()).unwrap().modified().unwrap();
        assert_eq!(before, after);
        assert_eq!(std::fs::read(file.path()).unwrap(), b"G1 X10\nG1 X20\n");
    }

    #[test]
    fn test_render_last_line() {
        let annotator = RemainingTimeAnnotator::new(marks(true));
        let mark = annotator.marks().placeholders[1];
        assert_eq!(annotator.render(&mark, 64, "\n"), "M73 P100 R0\nM73 Q100 S0");
    }

    #[test]
    fn test_render_estimated_time() {
        let annotator = RemainingTimeAnnotator::new(marks(true));
        let mark = PlaceholderMark {
            line_id: 2,
            tag: ReservedTag::EstimatedPrintingTimePlaceholder,
            elapsed: [0.0, 0.0],
        };
        assert_eq!(
            annotator.render(&mark, 64, "\n"),
            "; estimated time = 10m, stealth = 15m"
        );
        assert_eq!(annotator.render(&mark, 30, "\n"), "; estimated time = 10m");
    }
}
