//! # Routing Keys
//!
//! Hierarchical, dot-delimited addresses used both to publish events and to
//! declare subscription interest.
//!
//! A key built for publishing always carries the full segment set:
//!
//! ```text
//! {msg_type}.{source}.{scope}.{org}.{system}.{service}.{object}.{action}
//! event.cloud.local.acme.registry.node.node.assign
//! ```
//!
//! Listener routes are [`RoutingKeyPattern`]s. They share the segment grammar,
//! but a segment may be `*` (exactly one segment) and the final segment may be
//! `#` (zero or more segments). Wildcards never appear in a [`RoutingKey`].
//!
//! ## Usage
//!
//! ```rust
//! use msgbus::{prepare_route, RoutingKeyBuilder};
//!
//! let base = RoutingKeyBuilder::new()
//!     .set_cloud_source()
//!     .set_org_name("Acme")
//!     .set_system("registry")
//!     .set_service("node");
//!
//! let key = base.clone().set_object("node").set_action("assign").must_build();
//! assert_eq!(key.as_str(), "event.cloud.local.acme.registry.node.node.assign");
//!
//! let route = prepare_route("acme", "event.cloud.local.{org}.registry.node.node.*").unwrap();
//! assert!(route.matches(&key));
//! ```

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Separator between segments
pub const DELIMITER: char = '.';

/// Matches exactly one segment (patterns only)
pub const WILDCARD_ONE: &str = "*";

/// Matches zero or more trailing segments (patterns only)
pub const WILDCARD_REST: &str = "#";

/// Organization placeholder used by route templates
pub const ORG_PLACEHOLDER: &str = "{org}";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingKeyError {
    #[error("routing key is empty")]
    Empty,

    #[error("missing required segment: {0}")]
    MissingSegment(&'static str),

    #[error("empty segment at position {position} in {key:?}")]
    EmptySegment { key: String, position: usize },

    #[error("invalid character {ch:?} in segment {segment:?}")]
    InvalidCharacter { segment: String, ch: char },

    #[error("wildcard {0:?} is not permitted in a published routing key")]
    WildcardNotAllowed(String),

    #[error("multi-segment wildcard must be the last segment of {0:?}")]
    MisplacedRestWildcard(String),

    #[error("unsubstituted placeholder in route {0:?}")]
    UnresolvedPlaceholder(String),
}

fn validate_literal(segment: &str) -> Result<(), RoutingKeyError> {
    if segment == WILDCARD_ONE || segment == WILDCARD_REST {
        return Err(RoutingKeyError::WildcardNotAllowed(segment.to_string()));
    }
    if segment.contains('{') {
        return Err(RoutingKeyError::UnresolvedPlaceholder(segment.to_string()));
    }
    if let Some(ch) = segment
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-'))
    {
        return Err(RoutingKeyError::InvalidCharacter {
            segment: segment.to_string(),
            ch,
        });
    }
    Ok(())
}

fn split_segments(raw: &str) -> Result<Vec<&str>, RoutingKeyError> {
    if raw.is_empty() {
        return Err(RoutingKeyError::Empty);
    }
    let segments: Vec<&str> = raw.split(DELIMITER).collect();
    if let Some(position) = segments.iter().position(|s| s.is_empty()) {
        return Err(RoutingKeyError::EmptySegment {
            key: raw.to_string(),
            position,
        });
    }
    Ok(segments)
}

/// A validated, immutable routing key.
///
/// Every segment is non-empty, lower-case and free of wildcards. Two keys are
/// equal when their string forms are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey(String);

impl RoutingKey {
    /// Parse an externally supplied key. Accepts any number of segments.
    pub fn parse(raw: &str) -> Result<Self, RoutingKeyError> {
        for segment in split_segments(raw)? {
            validate_literal(segment)?;
        }
        Ok(Self(raw.to_string()))
    }

    fn from_segments(segments: &[String]) -> Result<Self, RoutingKeyError> {
        for segment in segments {
            validate_literal(segment)?;
        }
        Ok(Self(segments.join(&DELIMITER.to_string())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> Vec<&str> {
        self.0.split(DELIMITER).collect()
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoutingKey {
    type Err = RoutingKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for RoutingKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for RoutingKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RoutingKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RoutingKey::parse(&raw).map_err(de::Error::custom)
    }
}

/// Leading segment: what kind of message travels on the key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    #[default]
    Event,
    Request,
    Response,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Event => "event",
            MessageType::Request => "request",
            MessageType::Response => "response",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cloud,
    Node,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cloud => "cloud",
            Source::Node => "node",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Local,
    Global,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Local => "local",
            Scope::Global => "global",
        }
    }
}

/// Fluent builder for [`RoutingKey`].
///
/// Cheap to clone: services keep a base builder holding their own
/// system/org/service and derive per-event keys from it.
#[derive(Debug, Clone, Default)]
pub struct RoutingKeyBuilder {
    msg_type: MessageType,
    source: Option<Source>,
    scope: Scope,
    org: Option<String>,
    system: Option<String>,
    service: Option<String>,
    object: Option<String>,
    action: Option<String>,
}

impl RoutingKeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_event_type(mut self) -> Self {
        self.msg_type = MessageType::Event;
        self
    }

    pub fn set_request_type(mut self) -> Self {
        self.msg_type = MessageType::Request;
        self
    }

    pub fn set_response_type(mut self) -> Self {
        self.msg_type = MessageType::Response;
        self
    }

    pub fn set_cloud_source(mut self) -> Self {
        self.source = Some(Source::Cloud);
        self
    }

    pub fn set_node_source(mut self) -> Self {
        self.source = Some(Source::Node);
        self
    }

    pub fn set_local_scope(mut self) -> Self {
        self.scope = Scope::Local;
        self
    }

    pub fn set_global_scope(mut self) -> Self {
        self.scope = Scope::Global;
        self
    }

    pub fn set_org_name(mut self, org: impl Into<String>) -> Self {
        self.org = Some(org.into());
        self
    }

    pub fn set_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn set_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn set_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn set_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Build the key, reporting the first missing or malformed segment.
    pub fn build(&self) -> Result<RoutingKey, RoutingKeyError> {
        fn required(
            value: &Option<String>,
            name: &'static str,
        ) -> Result<String, RoutingKeyError> {
            match value {
                Some(v) if !v.trim().is_empty() => Ok(v.trim().to_ascii_lowercase()),
                _ => Err(RoutingKeyError::MissingSegment(name)),
            }
        }

        let source = self.source.ok_or(RoutingKeyError::MissingSegment("source"))?;
        let segments = [
            self.msg_type.as_str().to_string(),
            source.as_str().to_string(),
            self.scope.as_str().to_string(),
            required(&self.org, "org")?,
            required(&self.system, "system")?,
            required(&self.service, "service")?,
            required(&self.object, "object")?,
            required(&self.action, "action")?,
        ];

        RoutingKey::from_segments(&segments)
    }

    /// Build the key or panic.
    ///
    /// A missing segment here is a programming error at the call site, so it
    /// must never reach the wire. Use [`build`](Self::build) for input that
    /// comes from outside the process.
    pub fn must_build(&self) -> RoutingKey {
        match self.build() {
            Ok(key) => key,
            Err(e) => panic!("invalid routing key from builder {self:?}: {e}"),
        }
    }
}

/// A listener route, possibly containing wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKeyPattern(String);

impl RoutingKeyPattern {
    pub fn parse(raw: &str) -> Result<Self, RoutingKeyError> {
        let segments = split_segments(raw)?;
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            match *segment {
                WILDCARD_ONE => {}
                WILDCARD_REST if i == last => {}
                WILDCARD_REST => return Err(RoutingKeyError::MisplacedRestWildcard(raw.to_string())),
                literal => validate_literal(literal)?,
            }
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the pattern has no wildcard segments.
    pub fn is_exact(&self) -> bool {
        !self
            .0
            .split(DELIMITER)
            .any(|s| s == WILDCARD_ONE || s == WILDCARD_REST)
    }

    /// The equivalent [`RoutingKey`] for wildcard-free patterns.
    pub fn to_routing_key(&self) -> Option<RoutingKey> {
        if self.is_exact() {
            Some(RoutingKey(self.0.clone()))
        } else {
            None
        }
    }

    /// Segment-wise match of a concrete key against this pattern.
    pub fn matches(&self, key: &RoutingKey) -> bool {
        let key_tokens: Vec<&str> = key.as_str().split(DELIMITER).collect();
        let pattern_tokens: Vec<&str> = self.0.split(DELIMITER).collect();

        let mut k = 0;
        for token in &pattern_tokens {
            match *token {
                WILDCARD_REST => return true,
                WILDCARD_ONE if k < key_tokens.len() => k += 1,
                literal if k < key_tokens.len() && key_tokens[k] == literal => k += 1,
                _ => return false,
            }
        }
        k == key_tokens.len()
    }
}

impl fmt::Display for RoutingKeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RoutingKey> for RoutingKeyPattern {
    fn from(key: RoutingKey) -> Self {
        Self(key.0)
    }
}

impl Serialize for RoutingKeyPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RoutingKeyPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RoutingKeyPattern::parse(&raw).map_err(de::Error::custom)
    }
}

/// Substitute the organization into a route template and validate the result.
pub fn prepare_route(org: &str, template: &str) -> Result<RoutingKeyPattern, RoutingKeyError> {
    let org = org.trim().to_ascii_lowercase();
    RoutingKeyPattern::parse(&template.replace(ORG_PLACEHOLDER, &org))
}

pub fn prepare_routes<T: AsRef<str>>(
    org: &str,
    templates: &[T],
) -> Result<Vec<RoutingKeyPattern>, RoutingKeyError> {
    templates
        .iter()
        .map(|t| prepare_route(org, t.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RoutingKeyBuilder {
        RoutingKeyBuilder::new()
            .set_cloud_source()
            .set_org_name("acme")
            .set_system("billing")
            .set_service("invoice")
    }

    #[test]
    fn test_build_joins_segments_in_order() {
        let key = base().set_object("invoice").set_action("generate").must_build();
        assert_eq!(key.as_str(), "event.cloud.local.acme.billing.invoice.invoice.generate");
    }

    #[test]
    fn test_build_then_parse_round_trips() {
        let cases = [
            base().set_object("invoice").set_action("create"),
            base()
                .set_request_type()
                .set_node_source()
                .set_global_scope()
                .set_object("sim_pool")
                .set_action("upload-batch"),
        ];
        for builder in cases {
            let key = builder.build().unwrap();
            let parsed = RoutingKey::parse(&key.to_string()).unwrap();
            assert_eq!(parsed, key);
            assert_eq!(parsed.segments(), key.segments());
            assert_eq!(parsed.segments().len(), 8);
        }
    }

    #[test]
    fn test_segments_are_lower_cased() {
        let key = RoutingKeyBuilder::new()
            .set_cloud_source()
            .set_org_name("ACME")
            .set_system("Registry")
            .set_service("Node")
            .set_object("Node")
            .set_action("Create")
            .must_build();
        assert_eq!(key.as_str(), "event.cloud.local.acme.registry.node.node.create");
    }

    #[test]
    fn test_missing_segment_is_reported() {
        let err = base().set_object("invoice").build().unwrap_err();
        assert_eq!(err, RoutingKeyError::MissingSegment("action"));

        let err = RoutingKeyBuilder::new().set_org_name("acme").build().unwrap_err();
        assert_eq!(err, RoutingKeyError::MissingSegment("source"));

        let err = base().set_object("  ").set_action("x").build().unwrap_err();
        assert_eq!(err, RoutingKeyError::MissingSegment("object"));
    }

    #[test]
    #[should_panic(expected = "invalid routing key")]
    fn test_must_build_panics_on_missing_segment() {
        base().set_object("invoice").must_build();
    }

    #[test]
    fn test_wildcards_rejected_in_published_keys() {
        let err = base().set_object("invoice").set_action("*").build().unwrap_err();
        assert_eq!(err, RoutingKeyError::WildcardNotAllowed("*".to_string()));
        assert!(RoutingKey::parse("acme.registry.node.*").is_err());
        assert!(RoutingKey::parse("acme.registry.#").is_err());
    }

    #[test]
    fn test_delimiter_inside_segment_rejected() {
        let err = base().set_object("node.state").set_action("update").build().unwrap_err();
        assert!(matches!(err, RoutingKeyError::InvalidCharacter { ch: '.', .. }));
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        assert_eq!(RoutingKey::parse(""), Err(RoutingKeyError::Empty));
        assert!(matches!(
            RoutingKey::parse("a..b"),
            Err(RoutingKeyError::EmptySegment { position: 1, .. })
        ));
        assert!(matches!(
            RoutingKey::parse("a.B"),
            Err(RoutingKeyError::InvalidCharacter { ch: 'B', .. })
        ));
    }

    #[test]
    fn test_single_segment_wildcard_matches() {
        let route = RoutingKeyPattern::parse("org.registry.node.*").unwrap();
        assert!(route.matches(&RoutingKey::parse("org.registry.node.assign").unwrap()));
        assert!(!route.matches(&RoutingKey::parse("org.registry.site.assign").unwrap()));
        assert!(!route.matches(&RoutingKey::parse("org.registry.node").unwrap()));
        assert!(!route.matches(&RoutingKey::parse("org.registry.node.assign.extra").unwrap()));
    }

    #[test]
    fn test_rest_wildcard_matches_zero_or_more() {
        let route = RoutingKeyPattern::parse("org.registry.#").unwrap();
        assert!(route.matches(&RoutingKey::parse("org.registry").unwrap()));
        assert!(route.matches(&RoutingKey::parse("org.registry.node.node.assign").unwrap()));
        assert!(!route.matches(&RoutingKey::parse("org.billing.invoice").unwrap()));

        assert!(matches!(
            RoutingKeyPattern::parse("org.#.node"),
            Err(RoutingKeyError::MisplacedRestWildcard(_))
        ));
    }

    #[test]
    fn test_exact_pattern_converts_to_key() {
        let route = RoutingKeyPattern::parse("org.billing.invoice.create").unwrap();
        assert!(route.is_exact());
        assert_eq!(
            route.to_routing_key(),
            Some(RoutingKey::parse("org.billing.invoice.create").unwrap())
        );
        assert_eq!(RoutingKeyPattern::parse("org.*").unwrap().to_routing_key(), None);
    }

    #[test]
    fn test_prepare_route_substitutes_org() {
        let route =
            prepare_route("Acme", "event.cloud.local.{org}.registry.node.node.create").unwrap();
        assert_eq!(route.as_str(), "event.cloud.local.acme.registry.node.node.create");

        let built = RoutingKeyBuilder::new()
            .set_cloud_source()
            .set_org_name("acme")
            .set_system("registry")
            .set_service("node")
            .set_object("node")
            .set_action("create")
            .must_build();
        assert!(route.matches(&built));
        assert_eq!(route.to_routing_key(), Some(built));
    }

    #[test]
    fn test_prepare_route_with_empty_org_fails() {
        assert!(matches!(
            prepare_route("", "event.cloud.local.{org}.registry.node.node.create"),
            Err(RoutingKeyError::EmptySegment { position: 3, .. })
        ));
    }

    #[test]
    fn test_prepare_routes_fails_on_first_bad_template() {
        let ok = prepare_routes("acme", &["a.{org}.b", "a.{org}.*"]).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(prepare_routes("acme", &["a.{org}.b", "a.{other}.b"]).is_err());
    }

    #[test]
    fn test_serde_uses_plain_string() {
        let key = RoutingKey::parse("org.billing.invoice.create").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"org.billing.invoice.create\"");
        let back: RoutingKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<RoutingKey>("\"org..x\"").is_err());
    }
}
