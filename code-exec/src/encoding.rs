//! File content transport encodings and file name checks.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Component, Path};

use crate::error::Error;
use crate::types::{Encoding, File};

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Base64 => "base64",
            Encoding::Hex => "hex",
        }
    }

    pub fn decode(&self, file: &str, content: &[u8]) -> Result<Vec<u8>, Error> {
        let decode_error = |reason: String| Error::Decode {
            file: file.to_string(),
            encoding: self.as_str(),
            reason,
        };

        match self {
            Encoding::Utf8 => std::str::from_utf8(content)
                .map(|s| s.as_bytes().to_vec())
                .map_err(|e| decode_error(e.to_string())),
            Encoding::Base64 => {
                let trimmed = trim_ascii(content);
                STANDARD
                    .decode(trimmed)
                    .map_err(|e| decode_error(e.to_string()))
            }
            Encoding::Hex => {
                let trimmed = trim_ascii(content);
                hex::decode(trimmed).map_err(|e| decode_error(e.to_string()))
            }
        }
    }

    pub fn encode(&self, content: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(content).into_owned(),
            Encoding::Base64 => STANDARD.encode(content),
            Encoding::Hex => hex::encode(content),
        }
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Returns the stored bytes of `file`, decoding its content if an encoding is set.
pub fn decode_file(file: &File) -> Result<Vec<u8>, Error> {
    match file.encoding {
        Some(encoding) => encoding.decode(&file.name, &file.content),
        None => Ok(file.content.clone()),
    }
}

/// Interprets the entry file as source text.
pub fn decode_entry_text(name: &str, content: &[u8]) -> Result<String, Error> {
    String::from_utf8(content.to_vec()).map_err(|e| Error::Decode {
        file: name.to_string(),
        encoding: Encoding::Utf8.as_str(),
        reason: e.to_string(),
    })
}

/// A file name must be a non-empty relative path that stays inside the sandbox.
pub fn validate_file_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::InvalidInput("file name is empty".to_string()));
    }
    if name.ends_with('/') {
        return Err(Error::InvalidInput(format!(
            "file name '{}' names a directory",
            name
        )));
    }
    validate_relative_path(name)
}

/// Validates `name` and returns its canonical form, with `.` and empty
/// components dropped. Two names that reach the same file canonicalize equal.
pub fn normalize_file_name(name: &str) -> Result<String, Error> {
    validate_file_name(name)?;
    let parts: Vec<&str> = name
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    if parts.is_empty() {
        return Err(Error::InvalidInput(format!(
            "file name '{}' names the sandbox root",
            name
        )));
    }
    Ok(parts.join("/"))
}

/// Accepts `""` and `"."` as the sandbox root.
pub fn validate_relative_path(path: &str) -> Result<(), Error> {
    if path.contains('\0') {
        return Err(Error::InvalidInput(format!(
            "path '{}' contains a NUL byte",
            path.escape_default()
        )));
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::InvalidInput(format!(
                    "path '{}' escapes the sandbox",
                    path
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidInput(format!(
                    "path '{}' must be relative",
                    path
                )))
            }
        }
    }
    Ok(())
}
