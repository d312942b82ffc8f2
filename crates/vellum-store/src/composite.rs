//! Delimited-string encoding for composable inner-object collections
//!
//! Small positional collections (vertices, connection points, value
//! ranges) collapse into one text column instead of a child table. The
//! grammar is `record := field (',' field)* ';'` with reserved characters
//! percent-escaped and identifier fields wrapped as `(TypeName)value`,
//! where an empty value stands for NULL.

#![allow(clippy::result_large_err)]

use vellum_core::errors::VellumError;
use vellum_core::model::StoreId;

use crate::errors::Result;

const FIELD_SEPARATOR: char = ',';
const RECORD_TERMINATOR: char = ';';

/// Characters that collide with the grammar and must travel escaped.
const RESERVED: [char; 5] = ['%', ',', ';', '(', ')'];

/// Percent-escape the reserved characters of a raw payload.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if RESERVED.contains(&ch) {
            out.push('%');
            out.push_str(&format!("{:02X}", ch as u32));
        } else {
            out.push(ch);
        }
    }
    out
}

/// Reverse [`escape`], failing on truncated or malformed sequences.
pub fn unescape(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let hi = chars
            .next()
            .ok_or_else(|| VellumError::invalid_format("truncated escape sequence"))?;
        let lo = chars
            .next()
            .ok_or_else(|| VellumError::invalid_format("truncated escape sequence"))?;
        let byte = u8::from_str_radix(&format!("{}{}", hi, lo), 16).map_err(|_| {
            VellumError::invalid_format(format!("malformed escape sequence '%{}{}'", hi, lo))
        })?;
        out.push(byte as char);
    }
    Ok(out)
}

/// Builds the delimited text for one collection, record by record.
///
/// Callers push already-escaped field payloads; [`CompositionWriter::push_id`]
/// adds the identifier wrapper itself.
#[derive(Debug, Default)]
pub struct CompositionWriter {
    buffer: String,
    fields_in_record: usize,
}

impl CompositionWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_record(&mut self) {
        self.fields_in_record = 0;
    }

    /// Append one field payload. The payload must already be escape-safe.
    pub fn push_field(&mut self, encoded: &str) {
        if self.fields_in_record > 0 {
            self.buffer.push(FIELD_SEPARATOR);
        }
        self.buffer.push_str(encoded);
        self.fields_in_record += 1;
    }

    /// Append an identifier field with its `(TypeName)` wrapper.
    pub fn push_id(&mut self, type_name: &str, id: Option<StoreId>) {
        let value = match id {
            Some(id) => id.raw().to_string(),
            None => String::new(),
        };
        let field = format!("({}){}", escape(type_name), value);
        self.push_field(&field);
    }

    pub fn end_record(&mut self) {
        self.buffer.push(RECORD_TERMINATOR);
    }

    pub fn finish(self) -> String {
        self.buffer
    }
}

/// One decoded field: the raw payload plus the identifier wrapper if present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    pub type_name: Option<String>,
    pub value: String,
}

/// Cursor over the delimited text of one collection.
#[derive(Debug)]
pub struct CompositionParser {
    chars: Vec<char>,
    position: usize,
}

impl CompositionParser {
    pub fn new(text: &str) -> Self {
        CompositionParser {
            chars: text.chars().collect(),
            position: 0,
        }
    }

    /// True while at least one more record begins at the cursor.
    pub fn has_record(&self) -> bool {
        self.position < self.chars.len()
    }

    /// Read one field; the caller states whether it closes the record, and
    /// the terminator found in the text must agree.
    pub fn read_field(&mut self, last_in_record: bool) -> Result<RawField> {
        let mut type_name = None;
        if self.peek() == Some('(') {
            self.position += 1;
            let mut name = String::new();
            loop {
                match self.take() {
                    Some(')') => break,
                    Some(ch) => name.push(ch),
                    None => {
                        return Err(VellumError::invalid_format("unterminated identifier wrapper"))
                    }
                }
            }
            type_name = Some(unescape(&name)?);
        }

        let mut raw = String::new();
        let terminator = loop {
            match self.take() {
                Some(FIELD_SEPARATOR) => break FIELD_SEPARATOR,
                Some(RECORD_TERMINATOR) => break RECORD_TERMINATOR,
                Some(ch) => raw.push(ch),
                None => return Err(VellumError::invalid_format("record not terminated")),
            }
        };
        let expected = if last_in_record {
            RECORD_TERMINATOR
        } else {
            FIELD_SEPARATOR
        };
        if terminator != expected {
            return Err(VellumError::invalid_format(format!(
                "record shape mismatch: expected '{}', found '{}'",
                expected, terminator
            )));
        }

        Ok(RawField {
            type_name,
            value: unescape(&raw)?,
        })
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn take(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.position += 1;
        }
        ch
    }
}
