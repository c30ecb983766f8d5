//! Escaping and record splitting for ServerQuery lines.
//!
//! Values on the wire never contain a raw space, pipe or control character:
//! each is replaced by a backslash sequence. Because of that a literal `|`
//! always separates records and a literal space always separates tokens.

use crate::record::Record;

/// Escape table, raw character to the character following the backslash.
const ESCAPES: [(char, char); 11] = [
    ('\\', '\\'),
    ('/', '/'),
    (' ', 's'),
    ('|', 'p'),
    ('\u{07}', 'a'),
    ('\u{08}', 'b'),
    ('\u{0C}', 'f'),
    ('\n', 'n'),
    ('\r', 'r'),
    ('\t', 't'),
    ('\u{0B}', 'v'),
];

/// Separator between records of a response line.
pub const RECORD_SEPARATOR: char = '|';

/// Separator between tokens of a record.
pub const TOKEN_SEPARATOR: char = ' ';

fn escape_of(c: char) -> Option<char> {
    ESCAPES.iter().find(|(raw, _)| *raw == c).map(|(_, e)| *e)
}

fn unescape_of(c: char) -> Option<char> {
    ESCAPES.iter().find(|(_, e)| *e == c).map(|(raw, _)| *raw)
}

/// Escapes a raw value for the wire.
///
/// Runs in a single pass, so an escaped backslash is never escaped twice.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match escape_of(c) {
            Some(e) => {
                out.push('\\');
                out.push(e);
            }
            None => out.push(c),
        }
    }
    out
}

/// Decodes a wire value. Unknown escape sequences are kept verbatim.
pub fn unescape(wire: &str) -> String {
    let mut out = String::with_capacity(wire.len());
    let mut chars = wire.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(next) => match unescape_of(next) {
                Some(raw) => out.push(raw),
                None => {
                    out.push('\\');
                    out.push(next);
                }
            },
            None => out.push('\\'),
        }
    }
    out
}

/// Parses one record (`key=value` and bare-key tokens separated by spaces).
///
/// Bare keys map to an empty value.
pub fn parse_record(segment: &str) -> Record {
    let mut record = Record::new();
    for token in segment.split(TOKEN_SEPARATOR).filter(|t| !t.is_empty()) {
        match token.split_once('=') {
            Some((key, value)) => record.insert(unescape(key), unescape(value)),
            None => record.insert(unescape(token), String::new()),
        }
    }
    record
}

/// Splits a response line into its records.
///
/// List responses send fields shared by every record only once, in the
/// first record; later records inherit any key they do not carry.
pub fn parse_records(line: &str) -> Vec<Record> {
    let line = line.trim_matches(|c| c == '\r' || c == '\n');
    if line.is_empty() {
        return Vec::new();
    }

    let mut records: Vec<Record> = line.split(RECORD_SEPARATOR).map(parse_record).collect();

    if let Some((first, rest)) = records.split_first_mut() {
        for record in rest {
            for (key, value) in first.iter() {
                if !record.contains(key) {
                    record.insert(key.to_string(), value.to_string());
                }
            }
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_escape_table() {
        assert_eq!(escape("a b"), "a\\sb");
        assert_eq!(escape("a|b"), "a\\pb");
        assert_eq!(escape("a/b"), "a\\/b");
        assert_eq!(escape("a\\b"), "a\\\\b");
        assert_eq!(escape("\u{07}\u{08}\u{0C}"), "\\a\\b\\f");
        assert_eq!(escape("\n\r\t\u{0B}"), "\\n\\r\\t\\v");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn test_backslash_not_double_processed() {
        // A literal backslash followed by 's' must not decode to a space.
        let raw = "\\s";
        let wire = escape(raw);
        assert_eq!(wire, "\\\\s");
        assert_eq!(unescape(&wire), raw);
    }

    #[test]
    fn test_unescape_unknown_sequence_kept() {
        assert_eq!(unescape("a\\xb"), "a\\xb");
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }

    #[test]
    fn test_parse_record_bare_key() {
        let record = parse_record("virtualserver_id=1 -uid flag");
        assert_eq!(record.get("virtualserver_id"), Some("1"));
        assert_eq!(record.get("-uid"), Some(""));
        assert_eq!(record.get("flag"), Some(""));
    }

    #[test]
    fn test_parse_record_value_with_equals() {
        let record = parse_record("msg=a=b");
        assert_eq!(record.get("msg"), Some("a=b"));
    }

    #[test]
    fn test_field_inheritance() {
        let records = parse_records("a=1 b=2|b=3");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("a"), Some("1"));
        assert_eq!(records[0].get("b"), Some("2"));
        assert_eq!(records[1].get("a"), Some("1"));
        assert_eq!(records[1].get("b"), Some("3"));
    }

    #[test]
    fn test_inheritance_does_not_override() {
        let records = parse_records("cid=1 name=x|cid=2|cid=3 name=y");
        assert_eq!(records[1].get("name"), Some("x"));
        assert_eq!(records[2].get("name"), Some("y"));
    }

    #[test]
    fn test_parse_records_decodes_values() {
        let records =
            parse_records("clid=1 client_nickname=Alice|clid=2 client_nickname=Bob\\sJr.");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("client_nickname"), Some("Alice"));
        assert_eq!(records[1].get("client_nickname"), Some("Bob Jr."));
    }

    #[test]
    fn test_parse_records_empty_and_line_endings() {
        assert!(parse_records("").is_empty());
        assert!(parse_records("\n\r").is_empty());

        let records = parse_records("a=1\n\r");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("a"), Some("1"));
    }

    proptest! {
        #[test]
        fn prop_escape_roundtrip(s in "[ -~\u{07}\u{08}\u{0C}\n\r\t\u{0B}]*") {
            prop_assert_eq!(unescape(&escape(&s)), s);
        }

        #[test]
        fn prop_escaped_has_no_separators(s in "[ -~\n\r\t]*") {
            let wire = escape(&s);
            prop_assert!(!wire.contains(' '));
            prop_assert!(!wire.contains('|'));
            prop_assert!(!wire.contains('\n'));
        }
    }
}
