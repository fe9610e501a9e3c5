//! Outbound message metadata.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::{self, EventAddress};
use crate::error::ValidationError;

/// Structured key/value query forwarded to the remote service.
pub type Query = serde_json::Map<String, Value>;

/// Metadata carried alongside a message body.
///
/// `event_type` is only ever written from an [`EventAddress`]; `query` and
/// `data` are passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Caller-supplied auxiliary context for a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    pub query: Option<Query>,
    pub data: Option<Value>,
}

/// Set `event_type` from `address`, keeping every other field of `options`.
pub fn attach(address: &EventAddress, mut options: MessageOptions) -> MessageOptions {
    options.event_type = Some(address::format(address));
    options
}

/// Fluent construction of [`MessageOptions`] for one address.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    address: EventAddress,
    query: Option<Query>,
    data: Option<Value>,
}

impl RequestBuilder {
    pub fn new(address: EventAddress) -> Self {
        Self {
            address,
            query: None,
            data: None,
        }
    }

    pub fn query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    /// Merge keys into the current query. Later keys win.
    pub fn merge_query(mut self, extra: Query) -> Self {
        self.query.get_or_insert_with(Query::new).extend(extra);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn options(mut self, options: SendOptions) -> Self {
        if let Some(query) = options.query {
            self = self.merge_query(query);
        }
        if let Some(data) = options.data {
            self.data = Some(data);
        }
        self
    }

    pub fn build(self) -> MessageOptions {
        attach(
            &self.address,
            MessageOptions {
                event_type: None,
                query: self.query,
                data: self.data,
            },
        )
    }
}

/// Fail when `value` is unset or equals one of `bad_values`.
pub fn require_attribute<T>(
    name: &str,
    value: Option<&T>,
    bad_values: &[&T],
) -> Result<(), ValidationError>
where
    T: PartialEq + Display + ?Sized,
{
    match value {
        Some(v) if !bad_values.contains(&v) => Ok(()),
        Some(v) => Err(ValidationError {
            name: name.to_string(),
            value: v.to_string(),
        }),
        None => Err(ValidationError {
            name: name.to_string(),
            value: "<unset>".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn address() -> EventAddress {
        EventAddress::new("users", "find").unwrap()
    }

    #[test]
    fn attach_sets_event_type_and_keeps_other_fields() {
        let mut query = Query::new();
        query.insert("active".into(), json!(true));
        let options = MessageOptions {
            event_type: Some("stale::value".into()),
            query: Some(query.clone()),
            data: Some(json!({"trace": "abc"})),
        };

        let attached = attach(&address(), options);
        assert_eq!(attached.event_type.as_deref(), Some("users::find"));
        assert_eq!(attached.query, Some(query));
        assert_eq!(attached.data, Some(json!({"trace": "abc"})));
    }

    #[test]
    fn builder_merges_query_without_touching_event_type() {
        let mut first = Query::new();
        first.insert("eventType".into(), json!("evil::override"));
        first.insert("limit".into(), json!(10));
        let mut second = Query::new();
        second.insert("limit".into(), json!(20));

        let options = RequestBuilder::new(address())
            .query(first)
            .merge_query(second)
            .data(json!([1, 2]))
            .build();

        assert_eq!(options.event_type.as_deref(), Some("users::find"));
        let query = options.query.unwrap();
        assert_eq!(query["limit"], json!(20));
        assert_eq!(query["eventType"], json!("evil::override"));
        assert_eq!(options.data, Some(json!([1, 2])));
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let options = RequestBuilder::new(address()).build();
        let wire = serde_json::to_value(&options).unwrap();
        assert_eq!(wire, json!({"eventType": "users::find"}));
    }

    #[test]
    fn require_attribute_rejects_unset() {
        let err = require_attribute::<str>("x", None, &[]).unwrap_err();
        assert_eq!(err.name, "x");
        assert_eq!(
            err.to_string(),
            "Attribute 'x' is required, current value is '<unset>'"
        );
    }

    #[test]
    fn require_attribute_rejects_bad_value() {
        assert!(require_attribute("x", Some(""), &[""]).is_err());
    }

    #[test]
    fn require_attribute_accepts_good_value() {
        assert!(require_attribute("x", Some("ok"), &[""]).is_ok());
        assert!(require_attribute("count", Some(&3), &[&0]).is_ok());
    }
}
