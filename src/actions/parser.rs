// src/actions/parser.rs

//! Tokenizer for the action text format
//!
//! ```text
//! <type> [<hash>] <key>=<value> <key>="quoted value" ...
//! ```
//!
//! The parser is a four-state machine (key, unquoted value, quoted value,
//! whitespace). Unquoted values end at a space or tab and may contain stray
//! quote characters. Inside a quoted value a backslash is dropped only when
//! it precedes another backslash or the active quote character.

use super::{AttrValue, Attrs};
use crate::error::{ActionContext, Error, Result};

/// Raw result of tokenizing an action line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAction {
    pub kind: String,
    pub hash: Option<String>,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Key,
    UnquotedValue,
    QuotedValue,
    Whitespace,
}

fn is_blank(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

/// Insert a value, turning repeated keys into lists
pub(crate) fn add_to_attrs(attrs: &mut Attrs, key: &str, value: String) {
    match attrs.get_mut(key) {
        None => {
            attrs.insert(key.to_string(), AttrValue::Single(value));
        }
        Some(existing) => match existing {
            AttrValue::List(list) => list.push(value),
            AttrValue::Single(first) => {
                let first = std::mem::take(first);
                *existing = AttrValue::List(vec![first, value]);
            }
        },
    }
}

struct Parser<'a> {
    text: &'a str,
    hash: Option<String>,
    attrs: Attrs,
}

impl<'a> Parser<'a> {
    fn malformed(&self, position: usize, reason: &str) -> Error {
        Error::MalformedAction {
            action: self.text.to_string(),
            position,
            reason: reason.to_string(),
            context: ActionContext::default(),
        }
    }

    fn invalid(&self, reason: &str) -> Error {
        Error::InvalidAction {
            action: self.text.to_string(),
            reason: reason.to_string(),
            context: ActionContext::default(),
        }
    }

    /// Store a finished value; `hash=` is routed to the action hash
    fn finish_value(&mut self, key: &str, value: String) -> Result<()> {
        if key == "hash" {
            if let Some(existing) = &self.hash {
                if *existing != value {
                    return Err(self.invalid("hash attribute not identical to positional hash"));
                }
            }
            self.hash = Some(value);
        } else {
            add_to_attrs(&mut self.attrs, key, value);
        }
        Ok(())
    }
}

/// Tokenize one action line
pub fn parse_action(text: &str) -> Result<ParsedAction> {
    let bytes = text.as_bytes();
    let len = bytes.len();

    let mut parser = Parser {
        text,
        hash: None,
        attrs: Attrs::new(),
    };

    let type_end = match bytes.iter().position(|b| is_blank(*b)) {
        Some(pos) => pos,
        None => return Err(parser.malformed(len, "no attributes")),
    };
    let kind = text[..type_end].to_string();

    let mut state = State::Whitespace;
    let mut key_start = type_end;
    let mut key_end = type_end;
    let mut value_start = type_end;
    let mut quote = b'"';
    // byte offsets (relative to value_start) of backslashes to drop
    let mut slashes: Vec<usize> = Vec::new();

    let mut i = type_end;
    while i < len {
        let c = bytes[i];
        match state {
            State::Key => {
                if is_blank(c) {
                    if !parser.attrs.is_empty() || parser.hash.is_some() {
                        return Err(parser.malformed(i, "whitespace in key"));
                    }
                    parser.hash = Some(text[key_start..i].to_string());
                    state = State::Whitespace;
                } else if c == b'=' {
                    key_end = i;
                    if &text[key_start..key_end] == "data" {
                        return Err(parser.invalid("invalid key: 'data'"));
                    }
                    if i == key_start {
                        return Err(parser.malformed(i, "missing key"));
                    }
                    i += 1;
                    if i == len {
                        return Err(parser.malformed(i, "missing value"));
                    }
                    let next = bytes[i];
                    if next == b'\'' || next == b'"' {
                        state = State::QuotedValue;
                        quote = next;
                        value_start = i + 1;
                        slashes.clear();
                    } else if is_blank(next) {
                        return Err(parser.malformed(i, "missing value"));
                    } else {
                        state = State::UnquotedValue;
                        value_start = i;
                    }
                } else if c == b'\'' || c == b'"' {
                    return Err(parser.malformed(i, "quote in key"));
                }
            }
            State::QuotedValue => {
                if c == b'\\' {
                    if i == len - 1 {
                        break;
                    }
                    i += 1;
                    if bytes[i] == b'\\' || bytes[i] == quote {
                        slashes.push(i - 1 - value_start);
                    }
                } else if c == quote {
                    state = State::Whitespace;
                    let raw = &bytes[value_start..i];
                    let value = if slashes.is_empty() {
                        text[value_start..i].to_string()
                    } else {
                        let mut kept = Vec::with_capacity(raw.len());
                        let mut drop = slashes.iter().peekable();
                        for (j, b) in raw.iter().enumerate() {
                            if drop.peek() == Some(&&j) {
                                drop.next();
                                continue;
                            }
                            kept.push(*b);
                        }
                        String::from_utf8_lossy(&kept).into_owned()
                    };
                    let key = text[key_start..key_end].to_string();
                    parser.finish_value(&key, value)?;
                }
            }
            State::UnquotedValue => {
                if is_blank(c) {
                    state = State::Whitespace;
                    let key = text[key_start..key_end].to_string();
                    let value = text[value_start..i].to_string();
                    parser.finish_value(&key, value)?;
                }
            }
            State::Whitespace => {
                if !is_blank(c) {
                    state = State::Key;
                    key_start = i;
                    if c == b'=' {
                        return Err(parser.malformed(i, "missing key"));
                    }
                }
            }
        }
        i += 1;
    }

    match state {
        State::QuotedValue => return Err(parser.malformed(i.min(len), "unfinished quoted value")),
        State::Key => return Err(parser.malformed(len, "missing value")),
        State::UnquotedValue => {
            let key = text[key_start..key_end].to_string();
            let value = text[value_start..].to_string();
            parser.finish_value(&key, value)?;
        }
        State::Whitespace => {}
    }

    Ok(ParsedAction {
        kind,
        hash: parser.hash,
        attrs: parser.attrs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single<'a>(parsed: &'a ParsedAction, key: &str) -> &'a str {
        match parsed.attrs.get(key) {
            Some(AttrValue::Single(v)) => v,
            other => panic!("expected single value for {}, got {:?}", key, other),
        }
    }

    #[test]
    fn test_basic_attributes() {
        let parsed = parse_action("file 12345 path=usr/bin/ls mode=0555 owner=root").unwrap();
        assert_eq!(parsed.kind, "file");
        assert_eq!(parsed.hash.as_deref(), Some("12345"));
        assert_eq!(single(&parsed, "path"), "usr/bin/ls");
        assert_eq!(single(&parsed, "mode"), "0555");
    }

    #[test]
    fn test_quoted_values() {
        let parsed = parse_action("set name=pkg.summary value=\"a b c\"").unwrap();
        assert_eq!(single(&parsed, "value"), "a b c");

        let parsed = parse_action("set name=x value='say \"hi\"'").unwrap();
        assert_eq!(single(&parsed, "value"), "say \"hi\"");

        let parsed = parse_action("file 12345 name='f\\'o\\'o' value=bar").unwrap();
        assert_eq!(single(&parsed, "name"), "f'o'o");

        let parsed = parse_action("set name=x value=\"back\\\\slash \\n\"").unwrap();
        assert_eq!(single(&parsed, "value"), "back\\slash \\n");
    }

    #[test]
    fn test_unquoted_value_keeps_quotes() {
        let parsed = parse_action("set name=x value=it's").unwrap();
        assert_eq!(single(&parsed, "value"), "it's");
    }

    #[test]
    fn test_tab_separated() {
        let parsed = parse_action("dir\tpath=usr\tmode=0755").unwrap();
        assert_eq!(single(&parsed, "path"), "usr");
        assert_eq!(single(&parsed, "mode"), "0755");
    }

    #[test]
    fn test_repeated_keys_collapse() {
        let parsed = parse_action("driver name=foo alias=pci1234,56 alias=pci4567,89").unwrap();
        assert_eq!(
            parsed.attrs.get("alias"),
            Some(&AttrValue::List(vec!["pci1234,56".to_string(), "pci4567,89".to_string()]))
        );
    }

    #[test]
    fn test_hash_attribute() {
        let parsed = parse_action("file path=a hash=abc").unwrap();
        assert_eq!(parsed.hash.as_deref(), Some("abc"));
        assert!(!parsed.attrs.contains_key("hash"));

        assert!(parse_action("file abc path=a hash=abc").is_ok());
        assert!(matches!(
            parse_action("file abc path=a hash=def"),
            Err(Error::InvalidAction { .. })
        ));
    }

    fn malformed_reason(text: &str) -> (usize, String) {
        match parse_action(text) {
            Err(Error::MalformedAction { position, reason, .. }) => (position, reason),
            other => panic!("expected malformed error for {:?}, got {:?}", text, other),
        }
    }

    #[test]
    fn test_malformed_inputs() {
        assert_eq!(malformed_reason("moop").1, "no attributes");
        assert_eq!(malformed_reason("file 1234 =\"\"").1, "missing key");
        assert_eq!(malformed_reason("file 1234 =\"\"").0, 10);
        assert_eq!(malformed_reason("file path=").1, "missing value");
        assert_eq!(malformed_reason("file path= mode=0755").1, "missing value");
        assert_eq!(malformed_reason("file path=\"usr").1, "unfinished quoted value");
        assert_eq!(malformed_reason("file path=\"usr\\").1, "unfinished quoted value");
        assert_eq!(malformed_reason("file pa\"th=usr").1, "quote in key");
        assert_eq!(malformed_reason("file path=usr mo de=1").1, "whitespace in key");
        assert_eq!(malformed_reason("file path=usr mode").1, "missing value");
    }

    #[test]
    fn test_data_key_rejected() {
        assert!(matches!(
            parse_action("file path=a data=xyz"),
            Err(Error::InvalidAction { .. })
        ));
    }
}
