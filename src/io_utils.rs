use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

use crate::loader::DEFAULT_SEPARATOR;

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'")),
        None => Ok(UTF_8),
    }
}

pub fn resolve_separator(path: Option<&Path>, provided: Option<char>) -> char {
    if let Some(separator) = provided {
        return separator;
    }
    match path.and_then(|p| p.extension()).and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => ',',
        _ => DEFAULT_SEPARATOR,
    }
}

pub fn printable_separator(separator: char) -> String {
    match separator {
        '\t' => "\\t".to_string(),
        '\n' => "\\n".to_string(),
        other => other.to_string(),
    }
}

/// Opens a delimited writer on `path`, or stdout for `None` and `-`.
pub fn open_writer(
    path: Option<&Path>,
    separator: char,
    encoding: &'static Encoding,
) -> Result<csv::Writer<Box<dyn Write>>> {
    let delimiter = u8::try_from(separator)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| anyhow!("Separator '{separator}' is not a single ASCII character"))?;
    let base: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(io::stdout()),
    };
    let writer: Box<dyn Write> = if encoding == UTF_8 {
        base
    } else {
        Box::new(TranscodingWriter::new(base, encoding))
    };

    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(writer))
}

/// Re-encodes a UTF-8 byte stream. Bytes of a character split across two
/// writes are held back until the rest arrives.
struct TranscodingWriter<W: Write> {
    inner: W,
    encoding: &'static Encoding,
    pending: Vec<u8>,
}

impl<W: Write> TranscodingWriter<W> {
    fn new(inner: W, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            encoding,
            pending: Vec::new(),
        }
    }

    fn drain(&mut self, at_end: bool) -> io::Result<()> {
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(text) => text.len(),
            Err(err) if err.error_len().is_none() && !at_end => err.valid_up_to(),
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Invalid UTF-8 sequence in output stream",
                ));
            }
        };
        if valid == 0 {
            return Ok(());
        }
        let rest = self.pending.split_off(valid);
        let chunk = std::mem::replace(&mut self.pending, rest);
        let text = std::str::from_utf8(&chunk)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let (encoded, _, had_errors) = self.encoding.encode(text);
        if had_errors {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to encode text using {}", self.encoding.name()),
            ));
        }
        self.inner.write_all(&encoded)
    }
}

impl<W: Write> Write for TranscodingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.drain(false)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.drain(true)?;
        self.inner.flush()
    }
}
