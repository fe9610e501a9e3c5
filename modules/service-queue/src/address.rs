//! Event address codec.
//!
//! A target service operation is identified by a `(path, method)` pair that
//! travels in message metadata as a single string: `path::method`.

use std::fmt;

use crate::error::AddressError;

/// Token separating path from method in an encoded event address.
pub const EVENT_DELIMITER: &str = "::";

/// The `(path, method)` pair naming a service operation.
///
/// Fields are private: [`EventAddress::new`] rejects parts that contain the
/// delimiter (and paths ending in its first character, which would merge with
/// it), so any address it returns decodes back to itself. A
/// [`EventAddress::path_only`] address encodes as `"path::"` and decodes with
/// an empty method instead of none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EventAddress {
    path: Option<String>,
    method: Option<String>,
}

impl EventAddress {
    pub fn new(path: impl Into<String>, method: impl Into<String>) -> Result<Self, AddressError> {
        let path = checked_path(path.into())?;
        let method = checked("method", method.into())?;
        Ok(Self {
            path: Some(path),
            method: Some(method),
        })
    }

    /// Address with a path and no method.
    pub fn path_only(path: impl Into<String>) -> Result<Self, AddressError> {
        Ok(Self {
            path: Some(checked_path(path.into())?),
            method: None,
        })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }
}

impl fmt::Display for EventAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format(self))
    }
}

fn checked_path(value: String) -> Result<String, AddressError> {
    let merges = EVENT_DELIMITER
        .chars()
        .next()
        .is_some_and(|first| value.ends_with(first));
    if merges {
        return Err(ambiguous("path", value));
    }
    checked("path", value)
}

fn checked(part: &'static str, value: String) -> Result<String, AddressError> {
    if value.contains(EVENT_DELIMITER) {
        return Err(ambiguous(part, value));
    }
    Ok(value)
}

fn ambiguous(part: &'static str, value: String) -> AddressError {
    AddressError::Ambiguous {
        part,
        value,
        delimiter: EVENT_DELIMITER,
    }
}

/// Decode an event name.
///
/// `path` is everything before the first delimiter and `method` the segment
/// after it, up to a second delimiter if one exists. Text after a second
/// delimiter is dropped. Without any delimiter the whole input becomes the
/// path and `method` is `None`.
///
/// `format(&parse(s)) == s` only holds when `s` contains exactly one
/// delimiter: `"a"` comes back as `"a::"` and `"a::b::c"` as `"a::b"`.
pub fn parse(event_name: &str) -> EventAddress {
    let mut parts = event_name.split(EVENT_DELIMITER);
    let path = parts.next().map(str::to_string);
    let method = parts.next().map(str::to_string);
    EventAddress { path, method }
}

/// Encode an address. Unset parts become empty strings, so the result always
/// contains exactly one delimiter (`"::"` for an empty address).
pub fn format(address: &EventAddress) -> String {
    let path = address.path.as_deref().unwrap_or_default();
    let method = address.method.as_deref().unwrap_or_default();
    [path, method].join(EVENT_DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_path_and_method() {
        let address = parse("a::b");
        assert_eq!(address.path(), Some("a"));
        assert_eq!(address.method(), Some("b"));
    }

    #[test]
    fn parse_without_delimiter_leaves_method_unset() {
        let address = parse("noDelimiter");
        assert_eq!(address.path(), Some("noDelimiter"));
        assert_eq!(address.method(), None);
    }

    #[test]
    fn parse_empty_string_is_empty_path() {
        let address = parse("");
        assert_eq!(address.path(), Some(""));
        assert_eq!(address.method(), None);
    }

    #[test]
    fn parse_drops_text_after_second_delimiter() {
        let address = parse("users::get::extra");
        assert_eq!(address.path(), Some("users"));
        assert_eq!(address.method(), Some("get"));
    }

    #[test]
    fn format_empty_address_is_bare_delimiter() {
        assert_eq!(format(&EventAddress::default()), "::");
    }

    #[test]
    fn format_path_only_keeps_trailing_delimiter() {
        let address = EventAddress::path_only("users").unwrap();
        assert_eq!(format(&address), "users::");
    }

    #[test]
    fn format_then_parse_recovers_address() {
        let cases = [
            ("users", "find"),
            ("api/v1/orders", "patch"),
            ("", ""),
            ("a:b", ":c:"),
        ];
        for (path, method) in cases {
            let address = EventAddress::new(path, method).unwrap();
            assert_eq!(parse(&format(&address)), address);
        }
    }

    #[test]
    fn path_only_decodes_with_empty_method() {
        let address = EventAddress::path_only("users").unwrap();
        let decoded = parse(&format(&address));
        assert_eq!(decoded.path(), Some("users"));
        assert_eq!(decoded.method(), Some(""));
        assert_ne!(decoded, address);
    }

    #[test]
    fn round_trip_holds_only_with_single_delimiter() {
        assert_eq!(format(&parse("users::find")), "users::find");
        assert_eq!(format(&parse("users")), "users::");
        assert_eq!(format(&parse("a::b::c")), "a::b");
    }

    #[test]
    fn new_rejects_delimiter_in_parts() {
        let err = EventAddress::new("a::b", "find").unwrap_err();
        assert!(matches!(err, AddressError::Ambiguous { part: "path", .. }));

        let err = EventAddress::new("users", "::").unwrap_err();
        assert!(matches!(err, AddressError::Ambiguous { part: "method", .. }));
    }

    #[test]
    fn new_rejects_path_that_merges_with_delimiter() {
        // "a:" + "::" + "b" would decode as ("a", ":b")
        let err = EventAddress::path_only("a:").unwrap_err();
        assert!(matches!(err, AddressError::Ambiguous { part: "path", .. }));
    }

    #[test]
    fn display_matches_format() {
        let address = EventAddress::new("users", "get").unwrap();
        assert_eq!(address.to_string(), "users::get");
    }
}
