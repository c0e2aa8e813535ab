// 🗂️ CSV Codec - Flat-file format for the record store
//
// Format:
//   # key,value,tags          <- comment header (any "#" line is skipped)
//   "k1","v1","t1,t2"         <- every field quoted, quotes doubled
//   "k2","multi
//   line value","t3"          <- newlines preserved inside quotes
//
// Only the header above is ever written. Rows that don't decode to exactly
// three fields are skipped and reported as warnings, never fatal.

use crate::error::{LoadWarning, Result, StoreError};
use crate::record::{Record, FIELDS};
use csv::{QuoteStyle, ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Canonical header line (without terminator)
pub const HEADER: &str = "# key,value,tags";

/// Result of decoding one file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadedFile {
    pub records: Vec<Record>,
    pub warnings: Vec<LoadWarning>,
    /// True when the file did not exist and was bootstrapped with a header
    pub created: bool,
}

// ============================================================================
// CODEC
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvCodec {
    /// Write to a temp file and rename into place (default: true)
    ///
    /// When false the target is truncated and rewritten directly; an
    /// interrupted write can then leave a partial file behind.
    pub atomic_writes: bool,
}

impl CsvCodec {
    pub fn new() -> Self {
        CsvCodec {
            atomic_writes: true,
        }
    }

    pub fn with_atomic_writes(atomic_writes: bool) -> Self {
        CsvCodec { atomic_writes }
    }

    /// Load all records from `path`
    ///
    /// A missing file is first use, not an error: it is created with only
    /// the header line and an empty record list is returned.
    pub fn load(&self, path: &Path) -> Result<LoadedFile> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                bootstrap(path)?;
                tracing::info!(path = %path.display(), "created new record file");
                return Ok(LoadedFile {
                    created: true,
                    ..LoadedFile::default()
                });
            }
            Err(err) => return Err(StoreError::io(path, err)),
        };

        let loaded = decode(BufReader::new(file)).map_err(|err| StoreError::io(path, err))?;

        for warning in &loaded.warnings {
            tracing::warn!(path = %path.display(), "{}", warning);
        }
        tracing::debug!(
            path = %path.display(),
            records = loaded.records.len(),
            warnings = loaded.warnings.len(),
            "loaded record file"
        );

        Ok(loaded)
    }

    /// Rewrite `path` from scratch: header followed by `records` in order
    pub fn save(&self, path: &Path, records: &[Record]) -> Result<()> {
        if self.atomic_writes {
            save_atomic(path, records)?;
        } else {
            save_in_place(path, records)?;
        }

        tracing::debug!(
            path = %path.display(),
            records = records.len(),
            atomic = self.atomic_writes,
            "saved record file"
        );
        Ok(())
    }
}

impl Default for CsvCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn bootstrap(path: &Path) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| StoreError::io(path, err))?;

    writeln!(file, "{}", HEADER).map_err(|err| StoreError::io(path, err))
}

fn save_atomic(path: &Path, records: &[Record]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let tmp = NamedTempFile::new_in(dir).map_err(|err| StoreError::io(path, err))?;

    // Keep the target's permissions instead of the temp file's 0600
    if let Ok(meta) = fs::metadata(path) {
        if let Err(err) = tmp.as_file().set_permissions(meta.permissions()) {
            tracing::debug!(path = %path.display(), "could not copy permissions: {}", err);
        }
    }

    let tmp = encode(BufWriter::new(tmp), records)
        .and_then(|writer| writer.into_inner().map_err(|err| err.into_error()))
        .map_err(|err| StoreError::io(path, err))?;

    tmp.as_file()
        .sync_all()
        .map_err(|err| StoreError::io(path, err))?;

    tmp.persist(path)
        .map_err(|err| StoreError::io(path, err.error))?;

    sync_directory(dir).map_err(|err| StoreError::io(dir, err))?;

    Ok(())
}

/// Make the rename itself durable
fn sync_directory(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

fn save_in_place(path: &Path, records: &[Record]) -> Result<()> {
    let file = File::create(path).map_err(|err| StoreError::io(path, err))?;

    encode(BufWriter::new(file), records)
        .and_then(|writer| writer.into_inner().map_err(|err| err.into_error()))
        .and_then(|file| file.sync_all())
        .map_err(|err| StoreError::io(path, err))
}

// ============================================================================
// FORMAT
// ============================================================================

/// Decode records from any reader
///
/// Comment lines (`#...`) are skipped wherever they appear, so both the
/// canonical `# key,value,tags` header and the legacy `#key,value,tags` one
/// are accepted, as is a file with no header at all.
pub fn decode<R: Read>(mut reader: R) -> io::Result<LoadedFile> {
    let mut text = Vec::new();
    reader.read_to_end(&mut text)?;

    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(text.as_slice());

    let mut lines = LineTracker::new(&text);
    let mut loaded = LoadedFile::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut row = StringRecord::new();

    loop {
        let start = rdr.position().byte();
        if !rdr.read_record(&mut row)? {
            break;
        }
        let line = lines.first_data_line(start as usize);

        match row.len() {
            0 => continue,
            n if n == FIELDS.len() => {}
            _ => {
                loaded.warnings.push(LoadWarning::MalformedRow {
                    line,
                    fields: row.iter().map(str::to_string).collect(),
                });
                continue;
            }
        }

        let record = Record::new(&row[0], &row[1], &row[2]);

        if !record.has_key() {
            loaded.warnings.push(LoadWarning::EmptyKey { line });
            continue;
        }

        if !seen.insert(record.key.clone()) {
            loaded.warnings.push(LoadWarning::DuplicateKey {
                line,
                key: record.key,
            });
            continue;
        }

        loaded.records.push(record);
    }

    Ok(loaded)
}

/// 1-based line numbers for rows, counted over the raw input
///
/// The reader reports where it started looking for a row, which can be a
/// comment or blank line in front of it. The tracker walks past those to the
/// line the row actually begins on.
struct LineTracker<'a> {
    text: &'a [u8],
    offset: usize,
    line: u64,
}

impl<'a> LineTracker<'a> {
    fn new(text: &'a [u8]) -> Self {
        let bom = if text.starts_with(b"\xEF\xBB\xBF") { 3 } else { 0 };
        LineTracker {
            text,
            offset: bom,
            line: 1,
        }
    }

    fn first_data_line(&mut self, start: usize) -> u64 {
        self.advance_to(start);

        loop {
            match self.text.get(self.offset) {
                Some(b'\n') => {
                    self.offset += 1;
                    self.line += 1;
                }
                Some(b'\r') => self.offset += 1,
                Some(b'#') => {
                    let rest = &self.text[self.offset..];
                    match rest.iter().position(|&b| b == b'\n') {
                        Some(end) => {
                            self.offset += end + 1;
                            self.line += 1;
                        }
                        None => self.offset = self.text.len(),
                    }
                }
                _ => return self.line,
            }
        }
    }

    fn advance_to(&mut self, offset: usize) {
        let offset = offset.min(self.text.len());
        if offset <= self.offset {
            return;
        }
        let newlines = self.text[self.offset..offset]
            .iter()
            .filter(|&&b| b == b'\n')
            .count();
        self.line += newlines as u64;
        self.offset = offset;
    }
}

/// Encode the header and `records` (quote-all, `\n` terminated) into `writer`
///
/// Returns the writer so callers can finish it (flush, sync, persist).
pub fn encode<W: Write>(mut writer: W, records: &[Record]) -> io::Result<W> {
    writeln!(writer, "{}", HEADER)?;

    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(writer);

    for record in records {
        wtr.write_record(record.fields())?;
    }

    wtr.flush()?;
    wtr.into_inner().map_err(|err| err.into_error())
}

/// Encode to an in-memory string
pub fn encode_to_string(records: &[Record]) -> io::Result<String> {
    let bytes = encode(Vec::new(), records)?;
    String::from_utf8(bytes).map_err(|err| io::Error::new(ErrorKind::InvalidData, err))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_str(text: &str) -> LoadedFile {
        decode(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_encode_quotes_every_field() {
        let records = vec![
            Record::new("k1", "v1", "t1,t2"),
            Record::new("k2", "multi\nline value", "t3"),
            Record::new("k3", "say \"hi\"", ""),
        ];

        let text = encode_to_string(&records).unwrap();

        assert_eq!(
            text,
            "# key,value,tags\n\
             \"k1\",\"v1\",\"t1,t2\"\n\
             \"k2\",\"multi\nline value\",\"t3\"\n\
             \"k3\",\"say \"\"hi\"\"\",\"\"\n"
        );
    }

    #[test]
    fn test_decode_reference_file() {
        let loaded = decode_str(
            "# key,value,tags\n\"k1\",\"v1\",\"t1,t2\"\n\"k2\",\"multi\nline value\",\"t3\"\n",
        );

        assert!(loaded.warnings.is_empty());
        assert_eq!(
            loaded.records,
            vec![
                Record::new("k1", "v1", "t1,t2"),
                Record::new("k2", "multi\nline value", "t3"),
            ]
        );
    }

    #[test]
    fn test_decode_accepts_legacy_and_missing_header() {
        let legacy = decode_str("#key,value,tags\n\"a\",\"1\",\"x\"\n");
        assert_eq!(legacy.records, vec![Record::new("a", "1", "x")]);

        let anything = decode_str("# exported by hand, whatever\n\"a\",\"1\",\"x\"\n");
        assert_eq!(anything.records.len(), 1);

        let bare = decode_str("\"a\",\"1\",\"x\"\n\"b\",\"2\",\"y\"\n");
        assert_eq!(bare.records.len(), 2);
    }

    #[test]
    fn test_decode_skips_body_comments_and_blank_lines() {
        let loaded = decode_str("# key,value,tags\n\"a\",\"1\",\"\"\n\n# note\n\"b\",\"2\",\"\"\n");

        assert!(loaded.warnings.is_empty());
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[1].key, "b");
    }

    #[test]
    fn test_decode_skips_malformed_rows() {
        let loaded = decode_str(
            "# key,value,tags\n\"a\",\"1\",\"x\"\n\"two\",\"fields\"\n\"b\",\"2\",\"y\"\n\"w\",\"x\",\"y\",\"z\"\n\"c\",\"3\",\"z\"\n",
        );

        let keys: Vec<&str> = loaded.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);

        assert_eq!(
            loaded.warnings,
            vec![
                LoadWarning::MalformedRow {
                    line: 3,
                    fields: vec!["two".to_string(), "fields".to_string()],
                },
                LoadWarning::MalformedRow {
                    line: 5,
                    fields: vec![
                        "w".to_string(),
                        "x".to_string(),
                        "y".to_string(),
                        "z".to_string()
                    ],
                },
            ]
        );
    }

    #[test]
    fn test_malformed_row_after_header_reports_its_own_line() {
        let loaded = decode_str("# key,value,tags\n\"only\",\"two\"\n");

        assert_eq!(
            loaded.warnings,
            vec![LoadWarning::MalformedRow {
                line: 2,
                fields: vec!["only".to_string(), "two".to_string()],
            }]
        );
    }

    #[test]
    fn test_warning_lines_skip_comments_and_blank_lines() {
        let loaded = decode_str("# key,value,tags\n# c1\n\n# c2\n\"a\",\"b\"\n");
        assert_eq!(loaded.warnings[0].line(), 5);

        let loaded = decode_str(
            "# key,value,tags\r\n\"a\",\"1\",\"\"\r\n\r\n# note\r\n\"\",\"x\",\"\"\r\n\"a\",\"again\",\"\"\r\n",
        );
        assert_eq!(
            loaded.warnings,
            vec![
                LoadWarning::EmptyKey { line: 5 },
                LoadWarning::DuplicateKey {
                    line: 6,
                    key: "a".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_warning_line_after_multiline_record() {
        let loaded = decode_str("# key,value,tags\n\"a\",\"one\ntwo\nthree\",\"\"\n\"b\"\n");
        assert_eq!(loaded.warnings[0].line(), 5);
    }

    #[test]
    fn test_decode_rejects_empty_and_repeated_keys() {
        let loaded = decode_str("\"a\",\"first\",\"\"\n\"\",\"orphan\",\"\"\n\"a\",\"second\",\"\"\n");

        assert_eq!(loaded.records, vec![Record::new("a", "first", "")]);
        assert_eq!(
            loaded.warnings,
            vec![
                LoadWarning::EmptyKey { line: 2 },
                LoadWarning::DuplicateKey {
                    line: 3,
                    key: "a".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_decode_accepts_crlf() {
        let loaded = decode_str("# key,value,tags\r\n\"a\",\"1\",\"x\"\r\n\"b\",\"2\",\"y\"\r\n");
        assert_eq!(loaded.records[1], Record::new("b", "2", "y"));
    }

    #[test]
    fn test_key_starting_with_hash_is_data() {
        let records = vec![Record::new("#tag", "value", "")];
        let text = encode_to_string(&records).unwrap();

        assert_eq!(decode_str(&text).records, records);
    }

    #[test]
    fn test_load_bootstraps_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeline.csv");

        let loaded = CsvCodec::new().load(&path).unwrap();

        assert!(loaded.created);
        assert!(loaded.records.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "# key,value,tags\n");

        // Second load reads the bootstrapped file normally
        let again = CsvCodec::new().load(&path).unwrap();
        assert!(!again.created);
        assert!(again.records.is_empty());
    }

    #[test]
    fn test_load_missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("timeline.csv");

        let err = CsvCodec::new().load(&path).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn test_load_invalid_utf8_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, b"\"a\",\"\xff\xfe\",\"\"\n").unwrap();

        let err = CsvCodec::new().load(&path).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn test_save_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.csv");
        fs::write(&path, "garbage that must disappear\n").unwrap();

        for codec in [CsvCodec::new(), CsvCodec::with_atomic_writes(false)] {
            codec
                .save(&path, &[Record::new("a", "1", "x")])
                .unwrap();

            assert_eq!(
                fs::read_to_string(&path).unwrap(),
                "# key,value,tags\n\"a\",\"1\",\"x\"\n"
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_save_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.csv");
        fs::write(&path, "# key,value,tags\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        CsvCodec::new().save(&path, &[Record::keyed("a")]).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
        assert!(fs::read_to_string(&path).unwrap().ends_with("\"a\",\"\",\"\"\n"));
    }

    #[test]
    fn test_save_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("store.csv");

        let err = CsvCodec::new().save(&path, &[]).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
