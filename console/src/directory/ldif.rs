//! Minimal LDIF reading and writing for the OpenLDAP client tools

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::errors::ConsoleError;

/// One entry of an LDIF search result. Attribute names are lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LdifEntry {
    pub dn: String,
    pub attrs: BTreeMap<String, Vec<String>>,
}

impl LdifEntry {
    pub fn values(&self, attr: &str) -> &[String] {
        self.attrs
            .get(&attr.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first(&self, attr: &str) -> Option<&str> {
        self.values(attr).first().map(String::as_str)
    }
}

/// Parse `ldapsearch -LLL` output
pub fn parse(input: &str) -> Result<Vec<LdifEntry>, ConsoleError> {
    // unfold continuation lines first
    let mut lines: Vec<String> = Vec::new();
    for raw in input.lines() {
        let raw = raw.trim_end_matches('\r');
        if let Some(rest) = raw.strip_prefix(' ') {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        lines.push(raw.to_string());
    }

    let mut entries = Vec::new();
    let mut current: Option<LdifEntry> = None;

    for line in lines {
        if line.is_empty() {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let (name, value) = parse_line(&line)?;
        if name == "dn" {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(LdifEntry {
                dn: value,
                attrs: BTreeMap::new(),
            });
            continue;
        }

        match current.as_mut() {
            Some(entry) => entry.attrs.entry(name).or_default().push(value),
            None => {
                return Err(ConsoleError::DirectoryError(format!(
                    "attribute before dn in LDIF: {}",
                    line
                )))
            }
        }
    }

    if let Some(entry) = current {
        entries.push(entry);
    }
    Ok(entries)
}

fn parse_line(line: &str) -> Result<(String, String), ConsoleError> {
    let (name, rest) = line.split_once(':').ok_or_else(|| {
        ConsoleError::DirectoryError(format!("malformed LDIF line: {}", line))
    })?;
    let name = name.trim().to_lowercase();

    if let Some(encoded) = rest.strip_prefix(':') {
        let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
            ConsoleError::DirectoryError(format!("bad base64 value for {}: {}", name, e))
        })?;
        let value = String::from_utf8(bytes).map_err(|e| {
            ConsoleError::DirectoryError(format!("non UTF-8 value for {}: {}", name, e))
        })?;
        return Ok((name, value));
    }

    Ok((name, rest.trim_start().to_string()))
}

/// Render `attr: value`, base64-encoding values LDIF cannot carry verbatim
pub fn attr_line(attr: &str, value: &str) -> String {
    let safe = !value.is_empty()
        && !value.starts_with([' ', ':', '<'])
        && !value.ends_with(' ')
        && value.chars().all(|c| c.is_ascii() && c != '\n' && c != '\r' && c != '\0');

    if safe || value.is_empty() {
        format!("{}: {}", attr, value)
    } else {
        format!("{}:: {}", attr, STANDARD.encode(value))
    }
}

/// One change of a modify record
#[derive(Debug, Clone)]
pub enum Modification {
    Add(String, Vec<String>),
    Replace(String, Vec<String>),
    Delete(String),
}

/// Render a `changetype: modify` record
pub fn modify_record(dn: &str, modifications: &[Modification]) -> String {
    let mut out = String::new();
    out.push_str(&attr_line("dn", dn));
    out.push('\n');
    out.push_str("changetype: modify\n");

    for (i, modification) in modifications.iter().enumerate() {
        if i > 0 {
            out.push_str("-\n");
        }
        match modification {
            Modification::Add(attr, values) | Modification::Replace(attr, values) => {
                let op = if matches!(modification, Modification::Add(..)) {
                    "add"
                } else {
                    "replace"
                };
                out.push_str(&format!("{}: {}\n", op, attr));
                for value in values {
                    out.push_str(&attr_line(attr, value));
                    out.push('\n');
                }
            }
            Modification::Delete(attr) => {
                out.push_str(&format!("delete: {}\n", attr));
            }
        }
    }
    out.push('\n');
    out
}
