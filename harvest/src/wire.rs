//! Strict parser for the tuple wire format.
//!
//! Fact payloads are UTF-8 parenthesized tuples such as
//! `(123, 'acme', 'widget', 'Go')`. Only integer and single-quoted string
//! fields exist; anything else is rejected with a typed error so a poisoned
//! topic can never take an aggregator down.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("expected '{expected}' at byte {at}")]
    Expected { expected: char, at: usize },
    #[error("unexpected character at byte {at}")]
    Unexpected { at: usize },
    #[error("invalid integer literal at byte {at}")]
    InvalidInt { at: usize },
    #[error("unterminated string literal starting at byte {at}")]
    Unterminated { at: usize },
    #[error("trailing input after closing parenthesis")]
    Trailing,
    #[error("expected {expected} fields, found {found}")]
    Arity { expected: usize, found: usize },
    #[error("field {index} has the wrong type")]
    FieldType { index: usize },
    #[error("payload is not valid UTF-8")]
    Utf8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Int(i64),
    Text(String),
}

/// Parses a payload into tuple fields, rejecting anything that is not UTF-8.
pub fn tuple_from_bytes(payload: &[u8]) -> Result<Vec<Field>, WireError> {
    let text = std::str::from_utf8(payload).map_err(|_| WireError::Utf8)?;
    parse_tuple(text)
}

/// Parses a single parenthesized tuple. The whole input must be consumed.
pub fn parse_tuple(input: &str) -> Result<Vec<Field>, WireError> {
    let mut cursor = Cursor::new(input);
    cursor.skip_ws();
    cursor.expect('(')?;
    let mut fields = Vec::new();
    cursor.skip_ws();
    if cursor.peek() == Some(')') {
        cursor.advance();
    } else {
        loop {
            cursor.skip_ws();
            fields.push(cursor.field()?);
            cursor.skip_ws();
            match cursor.peek() {
                Some(',') => cursor.advance(),
                Some(')') => {
                    cursor.advance();
                    break;
                }
                _ => {
                    return Err(WireError::Expected {
                        expected: ')',
                        at: cursor.pos,
                    })
                }
            }
        }
    }
    cursor.skip_ws();
    if cursor.peek().is_some() {
        return Err(WireError::Trailing);
    }
    Ok(fields)
}

pub(crate) fn check_arity(fields: &[Field], expected: usize) -> Result<(), WireError> {
    if fields.len() != expected {
        return Err(WireError::Arity {
            expected,
            found: fields.len(),
        });
    }
    Ok(())
}

pub(crate) fn int_field(fields: &[Field], index: usize) -> Result<i64, WireError> {
    match fields.get(index) {
        Some(Field::Int(value)) => Ok(*value),
        _ => Err(WireError::FieldType { index }),
    }
}

pub(crate) fn text_field(fields: &[Field], index: usize) -> Result<&str, WireError> {
    match fields.get(index) {
        Some(Field::Text(value)) => Ok(value),
        _ => Err(WireError::FieldType { index }),
    }
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Cursor { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), WireError> {
        if self.peek() == Some(expected) {
            self.advance();
            Ok(())
        } else {
            Err(WireError::Expected {
                expected,
                at: self.pos,
            })
        }
    }

    fn field(&mut self) -> Result<Field, WireError> {
        match self.peek() {
            Some('\'') => self.quoted(),
            Some(c) if c.is_ascii_digit() || c == '-' => self.integer(),
            _ => Err(WireError::Unexpected { at: self.pos }),
        }
    }

    fn quoted(&mut self) -> Result<Field, WireError> {
        let start = self.pos;
        self.advance(); // opening quote
        let rest = &self.input[self.pos..];
        match rest.find('\'') {
            Some(end) => {
                let value = rest[..end].to_string();
                self.pos += end + 1;
                Ok(Field::Text(value))
            }
            None => Err(WireError::Unterminated { at: start }),
        }
    }

    fn integer(&mut self) -> Result<Field, WireError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.advance();
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        self.input[start..self.pos]
            .parse::<i64>()
            .map(Field::Int)
            .map_err(|_| WireError::InvalidInt { at: start })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_tuple() {
        let fields = parse_tuple("(123, 'acme', 'widget', 'Go')").unwrap();
        assert_eq!(
            fields,
            vec![
                Field::Int(123),
                Field::Text("acme".to_string()),
                Field::Text("widget".to_string()),
                Field::Text("Go".to_string()),
            ]
        );
    }

    #[test]
    fn parses_negative_int_and_spacing() {
        let fields = parse_tuple("  ( -7,'x y' )  ").unwrap();
        assert_eq!(fields, vec![Field::Int(-7), Field::Text("x y".to_string())]);
    }

    #[test]
    fn parses_empty_tuple() {
        assert_eq!(parse_tuple("()").unwrap(), vec![]);
    }

    #[test]
    fn rejects_missing_open_paren() {
        assert_eq!(
            parse_tuple("1, 2)").unwrap_err(),
            WireError::Expected { expected: '(', at: 0 }
        );
    }

    #[test]
    fn rejects_unterminated_string() {
        assert_eq!(
            parse_tuple("(1, 'oops)").unwrap_err(),
            WireError::Unterminated { at: 4 }
        );
    }

    #[test]
    fn rejects_trailing_input() {
        assert_eq!(parse_tuple("(1); rm -rf /").unwrap_err(), WireError::Trailing);
    }

    #[test]
    fn rejects_bare_identifier() {
        // The original system ran payloads through eval(); this grammar must not.
        assert_eq!(
            parse_tuple("(__import__, 1)").unwrap_err(),
            WireError::Unexpected { at: 1 }
        );
    }

    #[test]
    fn rejects_integer_overflow() {
        assert_eq!(
            parse_tuple("(99999999999999999999)").unwrap_err(),
            WireError::InvalidInt { at: 1 }
        );
    }

    #[test]
    fn rejects_non_utf8_payload() {
        assert_eq!(tuple_from_bytes(&[0x28, 0xff, 0x29]).unwrap_err(), WireError::Utf8);
    }
}
