//! G-code line parsing
//!
//! Turns one line of raw text into a [`GCodeLine`]: the command word, the
//! numeric parameter words, and the `;` comment. Parsing never fails; a
//! word whose number cannot be read is left unset.

use gcodestat_core::Axis;

const LETTERS: usize = 26;

/// A single parsed line of G-code
#[derive(Debug, Clone, PartialEq)]
pub struct GCodeLine {
    line_id: usize,
    raw: String,
    cmd: String,
    params: [Option<f64>; LETTERS],
    unknown_axis: bool,
    comment: Option<String>,
}

fn letter_index(letter: char) -> Option<usize> {
    let upper = letter.to_ascii_uppercase();
    upper
        .is_ascii_uppercase()
        .then(|| (upper as u8 - b'A') as usize)
}

fn is_number_byte(b: u8) -> bool {
    b.is_ascii_digit() || b == b'.' || b == b'-' || b == b'+'
}

/// Remove `( ... )` comments, keeping the text around them
fn strip_parenthesised(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut depth = 0usize;
    for c in code.chars() {
        match c {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Normalize the command word: `G01` becomes `G1`, `t0` becomes `T0`
fn normalize_command(letter: u8, token: &str) -> String {
    let letter = letter.to_ascii_uppercase() as char;
    match token.parse::<f64>() {
        Ok(value) if value.fract() == 0.0 => format!("{}{}", letter, value as i64),
        _ => format!("{}{}", letter, token.to_ascii_uppercase()),
    }
}

impl GCodeLine {
    /// Parse a raw line; `line_id` is its 1-based position in the source
    pub fn parse(line_id: usize, raw: &str) -> Self {
        let raw = raw.trim_end_matches(['\r', '\n']);
        let (code, comment) = match raw.find(';') {
            Some(pos) => (&raw[..pos], Some(raw[pos + 1..].trim_end().to_string())),
            None => (raw, None),
        };
        let code = strip_parenthesised(code);
        let bytes = code.as_bytes();

        let mut line = GCodeLine {
            line_id,
            raw: raw.to_string(),
            cmd: String::new(),
            params: [None; LETTERS],
            unknown_axis: false,
            comment,
        };

        let mut first_word = true;
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i];
            if !c.is_ascii_alphabetic() {
                i += 1;
                continue;
            }

            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && is_number_byte(bytes[end]) {
                end += 1;
            }
            let token = &code[start..end];
            let upper = c.to_ascii_uppercase();

            if first_word && matches!(upper, b'G' | b'M' | b'T') {
                if token.is_empty() {
                    // Words such as "Tx" or "T?" used by multi-material units
                    while end < bytes.len() && !bytes[end].is_ascii_whitespace() {
                        end += 1;
                    }
                    line.cmd = code[i..end].to_ascii_uppercase();
                } else {
                    line.cmd = normalize_command(upper, token);
                }
            } else if let Some(index) = letter_index(upper as char) {
                if let Ok(value) = token.parse::<f64>() {
                    line.params[index] = Some(value);
                }
                if matches!(upper, b'A' | b'B' | b'C' | b'U' | b'V' | b'W') {
                    line.unknown_axis = true;
                }
            }

            first_word = false;
            i = end.max(i + 1);
        }

        line
    }

    /// Build a line from a command and parameter words, without source text
    pub fn synthesized(line_id: usize, cmd: &str, words: &[(char, f64)]) -> Self {
        let mut line = GCodeLine {
            line_id,
            raw: String::new(),
            cmd: cmd.to_string(),
            params: [None; LETTERS],
            unknown_axis: false,
            comment: None,
        };
        for (letter, value) in words {
            if let Some(index) = letter_index(*letter) {
                line.params[index] = Some(*value);
            }
        }
        line
    }

    /// 1-based line number in the source
    pub fn line_id(&self) -> usize {
        self.line_id
    }

    /// Source text without the line ending
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Normalized command word (`G1`, `M204`, `T1`); empty for comment-only lines
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    /// Text after the first `;`, without trailing whitespace
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Value of a parameter word
    pub fn value(&self, letter: char) -> Option<f64> {
        letter_index(letter).and_then(|i| self.params[i])
    }

    /// Whether a parameter word with a valid number is present
    pub fn has(&self, letter: char) -> bool {
        self.value(letter).is_some()
    }

    /// Value of an axis word
    pub fn axis(&self, axis: Axis) -> Option<f64> {
        self.value(axis.letter())
    }

    /// Feedrate word in mm/min
    pub fn feedrate(&self) -> Option<f64> {
        self.value('F')
    }

    /// Whether the line addresses an axis the processor does not track
    pub fn has_unknown_axis(&self) -> bool {
        self.unknown_axis
    }
}
