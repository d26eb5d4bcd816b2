//! Captured sample log reader
//!
//! Sample captures are two-column CSV exports of `(sysident, message)`
//! rows, usually newest-first. Block boundaries only make sense in
//! ascending `sysident` order, so every parser starts from
//! [`read_messages`], which returns the surviving rows sorted ascending.
//!
//! Rows that cannot be used (wrong column count, non-integer id, the
//! literal header) are dropped silently.

use crate::error::FormatError;
use std::io::Read;

/// Header cell that marks the optional first row
pub const HEADER_ID: &str = "sysident";

/// One captured line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleMessage {
    pub sys_ident: i64,
    pub message: String,
}

/// Read, filter and sort a captured log
pub fn read_messages(reader: &mut dyn Read) -> Result<Vec<SampleMessage>, FormatError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut messages = Vec::new();
    for result in csv_reader.byte_records() {
        let row = match result {
            Ok(row) => row,
            Err(e) if e.is_io_error() => return Err(FormatError::SampleRead(e)),
            Err(_) => continue,
        };
        if row.len() != 2 {
            continue;
        }

        let id = String::from_utf8_lossy(&row[0]);
        let id = id.trim();
        if id == HEADER_ID {
            continue;
        }
        let Ok(sys_ident) = id.parse::<i64>() else {
            continue;
        };

        messages.push(SampleMessage {
            sys_ident,
            message: String::from_utf8_lossy(&row[1]).into_owned(),
        });
    }

    // Stable, so rows sharing an id keep their capture order
    messages.sort_by_key(|m| m.sys_ident);
    Ok(messages)
}

/// Render lines as a newest-first capture, the way the collector exports
/// them; used by tests to feed generated output back into the parsers.
#[cfg(test)]
pub(crate) fn capture_log(lines: &[String]) -> String {
    let mut out = format!("{},message\n", HEADER_ID);
    for (i, line) in lines.iter().enumerate().rev() {
        out.push_str(&format!("{},\"{}\"\n", 1000 + i, line.replace('"', "\"\"")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_and_garbage_rows_are_dropped() {
        let raw = "sysident,message\n\
                   3,\"third\"\n\
                   abc,\"garbage\"\n\
                   1,\"first\"\n\
                   only-one-column\n\
                   2,\"second, with comma\"\n";
        let messages = read_messages(&mut Cursor::new(raw)).unwrap();

        let texts: Vec<&str> = messages.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["first", "second, with comma", "third"]);
        assert_eq!(messages[0].sys_ident, 1);
    }

    #[test]
    fn test_empty_input() {
        let messages = read_messages(&mut Cursor::new("")).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn test_preserves_whitespace_in_messages() {
        let raw = "5,\"   indented   \"\n";
        let messages = read_messages(&mut Cursor::new(raw)).unwrap();
        assert_eq!(messages[0].message, "   indented   ");
    }
}
