use crate::error::{PipelineError, Result};
use flate2::read::MultiGzDecoder;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// One row of an hourly pageviews dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageviewRecord {
    pub domain_code: String,
    pub page_title: String,
    pub view_count: u64,
    pub response_size: u64,
}

pub const FIELD_COUNT: usize = 4;

/// Open a staged gzip snapshot for a single streaming pass.
pub fn open(path: &Path) -> Result<PageviewReader<BufReader<MultiGzDecoder<File>>>> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    debug!("Opened {} for parsing", path.display());
    Ok(PageviewReader::new(BufReader::new(MultiGzDecoder::new(file))))
}

/// Lazy, single-pass reader over decompressed snapshot rows.
///
/// Yields `Err(MalformedSnapshot)` at most once and then stops.
pub struct PageviewReader<R> {
    reader: R,
    line_no: u64,
    buf: Vec<u8>,
    done: bool,
}

impl<R: BufRead> PageviewReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            buf: Vec::with_capacity(256),
            done: false,
        }
    }

    /// Lines consumed so far, blank ones included.
    pub fn lines_read(&self) -> u64 {
        self.line_no
    }
}

impl<R: BufRead> Iterator for PageviewReader<R> {
    type Item = Result<PageviewRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line_no += 1;
                    // Titles are not guaranteed to be valid UTF-8 in the dumps.
                    let line = String::from_utf8_lossy(&self.buf);
                    match parse_line(&line, self.line_no) {
                        Ok(Some(record)) => return Some(Ok(record)),
                        Ok(None) => continue,
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(PipelineError::malformed(
                        Some(self.line_no + 1),
                        format!("decompression failed: {e}"),
                    )));
                }
            }
        }
        None
    }
}

/// Parse one whitespace-delimited row. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str, line_no: u64) -> Result<Option<PageviewRecord>> {
    let fields: Vec<&str> = line.split_ascii_whitespace().collect();
    if fields.is_empty() {
        return Ok(None);
    }
    if fields.len() != FIELD_COUNT {
        return Err(PipelineError::malformed(
            Some(line_no),
            format!("expected {FIELD_COUNT} fields, found {}", fields.len()),
        ));
    }

    Ok(Some(PageviewRecord {
        domain_code: fields[0].to_string(),
        page_title: fields[1].to_string(),
        view_count: parse_count(fields[2], "view_count", line_no)?,
        response_size: parse_count(fields[3], "response_size", line_no)?,
    }))
}

fn parse_count(raw: &str, field: &str, line_no: u64) -> Result<u64> {
    // u64::from_str accepts a leading '+', which the dumps never contain.
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PipelineError::malformed(
            Some(line_no),
            format!("{field} is not a non-negative integer: {raw:?}"),
        ));
    }
    raw.parse::<u64>().map_err(|e| {
        PipelineError::malformed(Some(line_no), format!("{field} out of range ({raw}): {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};
    use tempfile::tempdir;

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn read_all(text: &str) -> Vec<Result<PageviewRecord>> {
        PageviewReader::new(BufReader::new(MultiGzDecoder::new(Cursor::new(gzip(text))))).collect()
    }

    #[test]
    fn test_well_formed_rows_in_order() {
        let rows = read_all("en Main_Page 120 45000\nen Help 3 900\nde.m Berlin 7 0\n");
        let records: Vec<PageviewRecord> = rows.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(records.len(), 3);
        assert_eq!(
            records[0],
            PageviewRecord {
                domain_code: "en".to_string(),
                page_title: "Main_Page".to_string(),
                view_count: 120,
                response_size: 45000,
            }
        );
        assert_eq!(records[1].page_title, "Help");
        assert_eq!(records[2].domain_code, "de.m");
    }

    #[test]
    fn test_blank_lines_and_mixed_whitespace() {
        let rows = read_all("\nen\tMain_Page  120 \t45000\r\n\n   \nen Help 3 900");
        let records: Vec<PageviewRecord> = rows.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].view_count, 120);
        assert_eq!(records[1].response_size, 900);
    }

    #[test]
    fn test_three_fields_is_malformed() {
        let rows = read_all("en Main_Page 120 45000\nen Help 3\nen Other 1 1\n");
        assert_eq!(rows.len(), 2, "reader stops after the first error");
        assert!(rows[0].is_ok());
        match &rows[1] {
            Err(PipelineError::MalformedSnapshot { line, reason }) => {
                assert_eq!(*line, Some(2));
                assert!(reason.contains("found 3"));
            }
            other => panic!("expected MalformedSnapshot, got {other:?}"),
        }
    }

    #[test]
    fn test_unicode_spaces_stay_inside_the_title() {
        for title in ["Foo\u{00A0}Bar", "東京\u{3000}タワー", "A\u{2009}B"] {
            let record = parse_line(&format!("en {title} 12 0"), 1).unwrap().unwrap();
            assert_eq!(record.page_title, title);
            assert_eq!(record.view_count, 12);
        }
    }

    #[test]
    fn test_five_fields_is_malformed() {
        assert!(parse_line("en Main Page 120 45000", 1).is_err());
    }

    #[test]
    fn test_negative_or_non_numeric_counts_are_malformed() {
        for line in [
            "en Main_Page -3 45000",
            "en Main_Page abc 45000",
            "en Main_Page 1.5 45000",
            "en Main_Page +3 45000",
            "en Main_Page 3 -1",
        ] {
            let err = parse_line(line, 9).unwrap_err();
            assert!(
                matches!(err, PipelineError::MalformedSnapshot { line: Some(9), .. }),
                "{line}: {err:?}"
            );
        }
    }

    #[test]
    fn test_overflow_is_malformed() {
        assert_eq!(
            parse_line("en Big 18446744073709551615 0", 1)
                .unwrap()
                .unwrap()
                .view_count,
            u64::MAX
        );
        let err = parse_line("en Big 18446744073709551616 0", 1).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_invalid_gzip_is_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.gz");
        std::fs::write(&path, b"this is not gzip at all\n").unwrap();

        let rows: Vec<_> = open(&path).unwrap().collect();
        assert_eq!(rows.len(), 1);
        assert!(matches!(rows[0], Err(PipelineError::MalformedSnapshot { .. })));
    }

    #[test]
    fn test_missing_file_is_io_failure() {
        let dir = tempdir().unwrap();
        let err = open(&dir.path().join("missing.gz")).err().unwrap();
        assert!(matches!(err, PipelineError::IoFailure { .. }));
    }

    #[test]
    fn test_invalid_utf8_title_is_decoded_lossily() {
        let mut raw = b"en Caf".to_vec();
        raw.push(0xE9);
        raw.extend_from_slice(b" 4 100\n");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let bytes = encoder.finish().unwrap();

        let records: Vec<_> = PageviewReader::new(BufReader::new(MultiGzDecoder::new(Cursor::new(bytes))))
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(records.len(), 1);
        assert!(records[0].page_title.starts_with("Caf"));
        assert_eq!(records[0].view_count, 4);
    }
}
