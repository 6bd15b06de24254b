use thiserror::Error;

/// Errors raised while walking raw BER/DER tag-length-value structures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TlvError {
    #[error("Insufficient data: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Indefinite length not allowed in DER")]
    IndefiniteLength,

    #[error("Length encoding too long ({0} bytes)")]
    LengthTooLong(usize),

    #[error("Unexpected tag 0x{found:02X}, expected 0x{expected:02X}")]
    UnexpectedTag { expected: u8, found: u8 },
}

/// A single tag-length-value element borrowed from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: u8,
    /// Complete encoding: tag, length and value bytes.
    pub raw: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> Tlv<'a> {
    /// Fails when the element does not carry `tag`.
    pub fn expect_tag(self, tag: u8) -> Result<Self, TlvError> {
        if self.tag != tag {
            return Err(TlvError::UnexpectedTag {
                expected: tag,
                found: self.tag,
            });
        }
        Ok(self)
    }

    /// Iterates over the elements nested in this element's value.
    pub fn children(&self) -> TlvIter<'a> {
        TlvIter { rest: self.value }
    }
}

/// Reads one TLV element from the start of `data`, returning it and the remaining bytes.
///
/// Only single byte tags and definite lengths of up to four length octets are accepted,
/// which covers every structure handled by this crate.
pub fn read_tlv(data: &[u8]) -> Result<(Tlv<'_>, &[u8]), TlvError> {
    if data.len() < 2 {
        return Err(TlvError::Truncated {
            needed: 2,
            available: data.len(),
        });
    }

    let tag = data[0];
    let length_byte = data[1];

    let (value_len, header_len) = if length_byte & 0x80 == 0 {
        (length_byte as usize, 2)
    } else {
        let num_length_bytes = (length_byte & 0x7F) as usize;
        if num_length_bytes == 0 {
            return Err(TlvError::IndefiniteLength);
        }
        if num_length_bytes > 4 {
            return Err(TlvError::LengthTooLong(num_length_bytes));
        }
        let header_len = 2 + num_length_bytes;
        if data.len() < header_len {
            return Err(TlvError::Truncated {
                needed: header_len,
                available: data.len(),
            });
        }
        let value_len = data[2..header_len]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        (value_len, header_len)
    };

    let total = header_len
        .checked_add(value_len)
        .ok_or(TlvError::LengthTooLong(value_len))?;
    if data.len() < total {
        return Err(TlvError::Truncated {
            needed: total,
            available: data.len(),
        });
    }

    let tlv = Tlv {
        tag,
        raw: &data[..total],
        value: &data[header_len..total],
    };
    Ok((tlv, &data[total..]))
}

/// Iterator over consecutive TLV elements.
#[derive(Debug, Clone)]
pub struct TlvIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for TlvIter<'a> {
    type Item = Result<Tlv<'a>, TlvError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match read_tlv(self.rest) {
            Ok((tlv, rest)) => {
                self.rest = rest;
                Some(Ok(tlv))
            }
            Err(e) => {
                self.rest = &[];
                Some(Err(e))
            }
        }
    }
}

/// Encodes a single TLV element with a definite length.
pub fn encode_tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut result = vec![tag];

    let len = value.len();
    if len < 0x80 {
        result.push(len as u8);
    } else {
        let len_bytes = (usize::BITS - len.leading_zeros()).div_ceil(8) as usize;
        result.push(0x80 | len_bytes as u8);
        for i in (0..len_bytes).rev() {
            result.push((len >> (i * 8)) as u8);
        }
    }
    result.extend_from_slice(value);
    result
}
