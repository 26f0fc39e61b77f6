//! Forward-only scraping of semi-structured responses.
//!
//! The pages this engine consumes are HTML interleaved with `<script>`
//! blocks and are not well-formed XML. Everything of interest is either an
//! `<input ...>` tag (usually without a closing slash) or a script line
//! containing a quoted string or a JSON object literal, so a single pass of
//! prefix-matched lines is enough; there is no backtracking and no DOM.

use std::io::BufRead;

use crate::error::PunchError;

/// Longest logical line kept by the scanner. Longer lines keep only their
/// first `MAX_LINE` bytes and the overflow is dropped up to the newline;
/// every value this engine extracts sits in a line's prefix.
pub const MAX_LINE: usize = 4096;

/// Read one logical line: leading ASCII whitespace and a trailing `\r` are
/// trimmed. Returns `Ok(None)` at end of stream.
pub fn scan_line<R: BufRead>(reader: &mut R) -> Result<Option<String>, PunchError> {
    let mut line: Vec<u8> = Vec::new();
    let mut seen_any = false;
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            if !seen_any {
                return Ok(None);
            }
            break;
        }
        seen_any = true;
        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if line.len() < MAX_LINE {
                    let take = pos.min(MAX_LINE - line.len());
                    line.extend_from_slice(&buf[..take]);
                }
                reader.consume(pos + 1);
                break;
            }
            None => {
                let len = buf.len();
                if line.len() < MAX_LINE {
                    let take = len.min(MAX_LINE - line.len());
                    line.extend_from_slice(&buf[..take]);
                }
                reader.consume(len);
            }
        }
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    let text = String::from_utf8_lossy(&line);
    Ok(Some(text.trim_start().to_string()))
}

/// Delimiter rule for [`extract_literal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// `'...'`, quotes excluded from the result.
    Quoted,
    /// `{...}`, braces included. The slice ends at the first closing
    /// brace; the payloads this feeds are flat objects.
    Json,
}

/// Extract the first delimited literal from a line.
pub fn extract_literal(line: &str, symbol: Symbol) -> Result<String, PunchError> {
    let (open, close) = match symbol {
        Symbol::Quoted => ('\'', '\''),
        Symbol::Json => ('{', '}'),
    };
    let start = line
        .find(open)
        .ok_or_else(|| PunchError::DataParse(format!("no {open:?} in {line:?}")))?;
    let rest = &line[start + 1..];
    let len = rest
        .find(close)
        .ok_or_else(|| PunchError::DataParse(format!("no closing {close:?} in {line:?}")))?;
    Ok(match symbol {
        Symbol::Quoted => rest[..len].to_string(),
        Symbol::Json => line[start..start + len + 2].to_string(),
    })
}

/// Key/value of a single `<input ...>`-style tag.
///
/// The key is the `name` attribute, falling back to `id`; a tag carrying
/// neither yields an empty key, which callers filter out. Lines that do not
/// contain a `>`-terminated tag fail with `MalformedMarkup`.
pub fn extract_tag(line: &str) -> Result<(String, String), PunchError> {
    if line.len() < 3 || !line.starts_with('<') {
        return Err(PunchError::MalformedMarkup(line.to_string()));
    }
    let end = line
        .find('>')
        .ok_or_else(|| PunchError::MalformedMarkup(line.to_string()))?;
    let inner = line[1..end].trim_end_matches('/');

    let mut name = None;
    let mut id = None;
    let mut value = String::new();
    for (key, val) in attributes(inner) {
        match key {
            "name" => name = Some(val),
            "id" => id = Some(val),
            "value" => value = val,
            _ => {}
        }
    }
    Ok((name.or(id).unwrap_or_default(), value))
}

/// Tokenize `key="value"` pairs inside one tag's text. Bare attributes
/// (`disabled`) yield empty values; quoting with `'` or `"` or none at all
/// is accepted.
fn attributes(tag: &str) -> Vec<(&str, String)> {
    let bytes = tag.as_bytes();
    let mut pairs = Vec::new();
    let mut i = 0;
    // skip the element name
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    while i < bytes.len() {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let key_start = i;
        while i < bytes.len() && bytes[i] != b'=' && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if key_start == i {
            break;
        }
        let key = &tag[key_start..i];
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] != b'=' {
            pairs.push((key, String::new()));
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
            let quote = bytes[i];
            i += 1;
            let val_start = i;
            while i < bytes.len() && bytes[i] != quote {
                i += 1;
            }
            pairs.push((key, tag[val_start..i].to_string()));
            if i < bytes.len() {
                i += 1;
            }
        } else {
            let val_start = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            pairs.push((key, tag[val_start..i].to_string()));
        }
    }
    pairs
}

/// One positional extraction rule for [`scan_until_prefix`].
#[derive(Debug, Clone)]
pub struct Marker {
    pub prefix: String,
    pub symbol: Symbol,
}

impl Marker {
    pub fn new(prefix: impl Into<String>, symbol: Symbol) -> Self {
        Self {
            prefix: prefix.into(),
            symbol,
        }
    }
}

/// Scan forward matching `markers` in order, extracting one literal per
/// marker. If the stream ends first, reports how many of the expected
/// values were found.
pub fn scan_until_prefix<R: BufRead>(
    reader: &mut R,
    markers: &[Marker],
) -> Result<Vec<String>, PunchError> {
    let mut values = Vec::with_capacity(markers.len());
    while values.len() < markers.len() {
        let Some(line) = scan_line(reader)? else { break };
        let marker = &markers[values.len()];
        if line.starts_with(&marker.prefix) {
            values.push(extract_literal(&line, marker.symbol)?);
        }
    }
    if values.len() != markers.len() {
        return Err(PunchError::Incomplete {
            expected: markers.len(),
            found: values.len(),
        });
    }
    Ok(values)
}

/// Ordered field set for a scraped form. Template names start empty and
/// stay in declaration order; names never discovered are still submitted
/// empty so the server falls back to its last-known values.
#[derive(Debug, Clone, Default)]
pub struct FormTemplate {
    fields: Vec<(String, String)>,
}

impl FormTemplate {
    pub fn with_fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: names
                .into_iter()
                .map(|name| (name.into(), String::new()))
                .collect(),
        }
    }

    /// Overwrite a declared field; discovered names outside the template
    /// are ignored. Returns whether the key was declared.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> bool {
        match self.fields.iter_mut().find(|(name, _)| name == key) {
            Some((_, slot)) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

/// Scan `<input`-prefixed tags to end of stream, storing each discovered
/// key accepted by `accept` into `template`. The last occurrence of a key
/// wins. End of stream is success; malformed tags propagate.
pub fn fill_map<R: BufRead>(
    reader: &mut R,
    template: &mut FormTemplate,
    accept: impl Fn(&str) -> bool,
) -> Result<(), PunchError> {
    while let Some(line) = scan_line(reader)? {
        if !line.starts_with("<input") {
            continue;
        }
        let (key, value) = extract_tag(&line)?;
        if !key.is_empty() && accept(&key) {
            template.set(&key, value);
        }
    }
    Ok(())
}
