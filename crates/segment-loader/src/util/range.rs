use std::str::FromStr;

use crate::error::LoaderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    pub fn sized(offset: u64, length: u64) -> Self {
        Self::new(offset, Some(length))
    }

    /// Renders the inclusive HTTP `Range` header value.
    ///
    /// The end offset is computed in `u128` so ranges near `u64::MAX` do not wrap.
    pub fn to_http_range(&self) -> String {
        match self.length {
            Some(length) if length > 0 => {
                let end = self.offset as u128 + length as u128 - 1;
                format!("bytes={}-{end}", self.offset)
            }
            _ => format!("bytes={}-", self.offset),
        }
    }
}

/// Parses `OFFSET:LENGTH` or `OFFSET:` (open ended).
impl FromStr for ByteRange {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (offset, length) = s.split_once(':').unwrap_or((s, ""));
        let offset = offset
            .trim()
            .parse()
            .map_err(|_| LoaderError::InvalidByteRange(s.to_string()))?;
        let length = if length.trim().is_empty() {
            None
        } else {
            Some(
                length
                    .trim()
                    .parse()
                    .map_err(|_| LoaderError::InvalidByteRange(s.to_string()))?,
            )
        };
        Ok(Self { offset, length })
    }
}
