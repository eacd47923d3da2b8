//! Leading header text: `hpkg;key=value;key=value;...`.
//!
//! The header carries no length of its own. A reader grabs a fixed-capacity
//! prefix of the file and tokenizes it on `;` until the tokens stop looking
//! like `key=value` text, every length option has been seen, or an unknown
//! option follows `tail_length`; the bytes after that belong to the payload.

use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

use crate::error::{HpkgError, Result};

pub const MAGIC: &str = "hpkg";
/// Bytes read from the start of a file when looking for the header.
pub const HEADER_CAPACITY: usize = 16 * 1024;

pub const TAIL_LENGTH:    &str = "tail_length";
pub const ARRAY_LENGTH:   &str = "array_length";
pub const PREVIEW_LENGTH: &str = "preview_length";

const SEPARATOR: u8 = b';';

/// Value of a header option: decimal integers are kept as numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Int(u64),
    Text(String),
}

impl OptionValue {
    fn parse(raw: &str) -> Self {
        raw.parse::<u64>()
            .map(Self::Int)
            .unwrap_or_else(|_| Self::Text(raw.to_owned()))
    }

    pub fn as_int(&self) -> Option<u64> {
        match self {
            Self::Int(n)  => Some(*n),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n)  => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Validated header options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderOptions {
    /// Byte length of the trailing metadata block.
    pub tail_length:    u64,
    /// Byte length of all array blocks concatenated.
    pub array_length:   Option<u64>,
    /// Byte length of the preview block.
    pub preview_length: Option<u64>,
    /// Options this implementation does not interpret, kept as parsed.
    pub extra:          BTreeMap<String, OptionValue>,
}

impl HeaderOptions {
    pub fn new(preview_length: u64, array_length: u64, tail_length: u64) -> Self {
        Self {
            tail_length,
            array_length:   Some(array_length),
            preview_length: Some(preview_length),
            extra:          BTreeMap::new(),
        }
    }

    /// Look an option up by its wire name.
    pub fn get(&self, key: &str) -> Option<OptionValue> {
        match key {
            TAIL_LENGTH    => Some(OptionValue::Int(self.tail_length)),
            ARRAY_LENGTH   => self.array_length.map(OptionValue::Int),
            PREVIEW_LENGTH => self.preview_length.map(OptionValue::Int),
            _              => self.extra.get(key).cloned(),
        }
    }

    /// Render the header text. Uninterpreted options come first so that a
    /// reader which stops after the three length options still sees them.
    pub fn encode(&self) -> String {
        let mut out = format!("{MAGIC};");
        for (key, value) in &self.extra {
            out.push_str(&format!("{key}={value};"));
        }
        if let Some(n) = self.preview_length {
            out.push_str(&format!("{PREVIEW_LENGTH}={n};"));
        }
        if let Some(n) = self.array_length {
            out.push_str(&format!("{ARRAY_LENGTH}={n};"));
        }
        out.push_str(&format!("{TAIL_LENGTH}={};", self.tail_length));
        out
    }

    /// Parse the header at the start of `raw`.
    ///
    /// Returns the options together with the number of header bytes consumed.
    /// A wrong first token is [`HpkgError::Format`]; a missing or malformed
    /// length option is [`HpkgError::Header`]. A missing `preview_length`
    /// only logs a warning.
    pub fn parse(raw: &[u8]) -> Result<(Self, usize)> {
        let magic_end = raw.iter().position(|&b| b == SEPARATOR).unwrap_or(raw.len());
        let magic = &raw[..magic_end];
        if magic != MAGIC.as_bytes() {
            let shown = &magic[..magic.len().min(4 * MAGIC.len())];
            return Err(HpkgError::Format {
                found: String::from_utf8_lossy(shown).into_owned(),
            });
        }
        if magic_end == raw.len() {
            return Err(HpkgError::header("header is not terminated after the magic"));
        }

        let mut consumed       = magic_end + 1;
        let mut tail_length    = None;
        let mut array_length   = None;
        let mut preview_length = None;
        let mut extra          = BTreeMap::new();
        let mut exhausted      = false;

        while tail_length.is_none() || array_length.is_none() || preview_length.is_none() {
            let rest = &raw[consumed..];
            let Some(end) = rest.iter().position(|&b| b == SEPARATOR) else {
                exhausted = true;
                break;
            };
            let Some((key, value)) = split_pair(&rest[..end]) else {
                break;
            };

            let slot = match key {
                TAIL_LENGTH    => Some(&mut tail_length),
                ARRAY_LENGTH   => Some(&mut array_length),
                PREVIEW_LENGTH => Some(&mut preview_length),
                // Past tail_length only length options extend the header;
                // anything else is already payload.
                _ if tail_length.is_some() => break,
                _              => None,
            };
            let duplicate = match slot {
                Some(slot) => slot.replace(parse_length(key, value)?).is_some(),
                None       => extra.insert(key.to_owned(), OptionValue::parse(value)).is_some(),
            };
            if duplicate {
                return Err(HpkgError::header(format!("option {key} appears twice")));
            }
            consumed += end + 1;
        }

        let Some(tail_length) = tail_length else {
            return Err(if exhausted {
                HpkgError::header(format!(
                    "missing {TAIL_LENGTH}: header is not terminated within {} bytes",
                    raw.len()
                ))
            } else {
                HpkgError::header(format!("missing {TAIL_LENGTH}"))
            });
        };
        if preview_length.is_none() {
            warn!("header has no {PREVIEW_LENGTH}; treating the preview as absent");
        }

        Ok((
            Self { tail_length, array_length, preview_length, extra },
            consumed,
        ))
    }
}

/// Split a `key=value` token. `None` means the token is not header text.
fn split_pair(token: &[u8]) -> Option<(&str, &str)> {
    let text = std::str::from_utf8(token).ok()?;
    let (key, value) = text.split_once('=')?;
    let key_ok = !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    let value_ok = !value.chars().any(char::is_control);
    (key_ok && value_ok).then_some((key, value))
}

fn parse_length(key: &str, value: &str) -> Result<u64> {
    value.parse::<u64>().map_err(|_| {
        HpkgError::header(format!("{key} is not a decimal byte count: {value:?}"))
    })
}
