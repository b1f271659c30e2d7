//! FITS primary header parsing.
//!
//! A header is a sequence of 2880-byte blocks holding 80-byte cards and ends
//! with the `END` card.

use super::{HeaderCard, HeaderReader};
use crate::error::HeaderError;
use std::collections::HashMap;
use std::io::{self, Read};

const CARD_LEN: usize = 80;
const BLOCK_LEN: usize = 2880;
const KEYWORD_LEN: usize = 8;

/// Reads the primary header of a FITS stream
#[derive(Debug, Clone, Copy, Default)]
pub struct FitsHeaderReader;

impl FitsHeaderReader {
    pub fn new() -> Self {
        Self
    }
}

enum CardLine {
    End,
    Value(HeaderCard),
    Other,
}

impl HeaderReader for FitsHeaderReader {
    fn read_cards(&self, source: &mut dyn Read, origin: &str) -> Result<Vec<HeaderCard>, HeaderError> {
        let mut cards = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut block = vec![0u8; BLOCK_LEN];

        loop {
            source.read_exact(&mut block).map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    HeaderError::Truncated {
                        path: origin.to_string(),
                    }
                } else {
                    HeaderError::Read {
                        path: origin.to_string(),
                        source: e,
                    }
                }
            })?;

            for raw in block.chunks(CARD_LEN) {
                match parse_card(raw) {
                    CardLine::End => return Ok(cards),
                    // A repeated keyword keeps its last value at its first position
                    CardLine::Value(card) => match positions.get(&card.key) {
                        Some(&index) => cards[index] = card,
                        None => {
                            positions.insert(card.key.clone(), cards.len());
                            cards.push(card);
                        }
                    },
                    CardLine::Other => {}
                }
            }
        }
    }
}

fn parse_card(raw: &[u8]) -> CardLine {
    let keyword = String::from_utf8_lossy(&raw[..KEYWORD_LEN]);
    let keyword = keyword.trim_end();

    if keyword == "END" {
        return CardLine::End;
    }

    if keyword == "HIERARCH" {
        let rest = String::from_utf8_lossy(&raw[KEYWORD_LEN..]);
        return match rest.find('=') {
            Some(eq) => {
                let key = rest[..eq].trim();
                if key.is_empty() {
                    CardLine::Other
                } else {
                    CardLine::Value(HeaderCard::new(key, decode_value(&rest[eq + 1..])))
                }
            }
            None => CardLine::Other,
        };
    }

    if keyword.is_empty() || &raw[KEYWORD_LEN..KEYWORD_LEN + 2] != b"= " {
        // COMMENT, HISTORY, CONTINUE and blank cards
        return CardLine::Other;
    }

    let field = String::from_utf8_lossy(&raw[KEYWORD_LEN + 2..]);
    CardLine::Value(HeaderCard::new(keyword, decode_value(&field)))
}

/// Decode the value field of a card, dropping any trailing comment
fn decode_value(field: &str) -> String {
    let field = field.trim_start();

    if let Some(quoted) = field.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = quoted.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    value.push('\'');
                    chars.next();
                } else {
                    break;
                }
            } else {
                value.push(c);
            }
        }
        return value.trim_end().to_string();
    }

    match field.find('/') {
        Some(slash) => field[..slash].trim().to_string(),
        None => field.trim().to_string(),
    }
}
