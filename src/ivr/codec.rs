//! Continuation paths.
//!
//! No call state survives between webhook hits. Whatever the next request
//! needs in order to resume travels in the path we hand back to the provider.
//!
//! ```text
//! /ivr                          welcome
//! /ivr/menu                     main menu
//! /ivr/hangup                   unconditional hang up
//! /ivr/action/NAME              action
//! /ivr/action/NAME/outcome      forward waiting for the dial outcome
//! /ivr/action/NAME/recorded     voicemail waiting for the recording
//! <any of the above>/loop/N     same node, N > 0 silent menu loops
//! ```

use crate::error::RequestDecodeError;
use std::fmt;
use std::str::FromStr;

pub const ROOT: &str = "/ivr";
const LOOP_SEGMENT: &str = "loop";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Welcome,
    Menu,
    Hangup,
    Action(String),
    ForwardOutcome(String),
    VoicemailRecorded(String),
}

impl NodeRef {
    pub fn action(name: impl Into<String>) -> Self {
        Self::Action(name.into())
    }

    /// Short label used in logs.
    pub fn label(&self) -> String {
        match self {
            NodeRef::Welcome => "welcome".to_string(),
            NodeRef::Menu => "menu".to_string(),
            NodeRef::Hangup => "hangup".to_string(),
            NodeRef::Action(name) => format!("action_{}", name),
            NodeRef::ForwardOutcome(name) => format!("action_{}:outcome", name),
            NodeRef::VoicemailRecorded(name) => format!("action_{}:recorded", name),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Welcome => write!(f, "{}", ROOT),
            NodeRef::Menu => write!(f, "{}/menu", ROOT),
            NodeRef::Hangup => write!(f, "{}/hangup", ROOT),
            NodeRef::Action(name) => write!(f, "{}/action/{}", ROOT, name),
            NodeRef::ForwardOutcome(name) => write!(f, "{}/action/{}/outcome", ROOT, name),
            NodeRef::VoicemailRecorded(name) => write!(f, "{}/action/{}/recorded", ROOT, name),
        }
    }
}

impl FromStr for NodeRef {
    type Err = RequestDecodeError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let unknown = || RequestDecodeError::UnknownPath(path.to_string());
        let rest = path
            .strip_prefix(ROOT)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .ok_or_else(unknown)?;
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] => Ok(NodeRef::Welcome),
            ["menu"] => Ok(NodeRef::Menu),
            ["hangup"] => Ok(NodeRef::Hangup),
            ["action", name] if is_valid_name(name) => Ok(NodeRef::action(*name)),
            ["action", name, "outcome"] if is_valid_name(name) => {
                Ok(NodeRef::ForwardOutcome(name.to_string()))
            }
            ["action", name, "recorded"] if is_valid_name(name) => {
                Ok(NodeRef::VoicemailRecorded(name.to_string()))
            }
            _ => Err(unknown()),
        }
    }
}

/// True when `path` addresses a node of this call flow rather than some
/// other endpoint that only shares the prefix, like `/ivr-legacy`.
pub fn is_internal(path: &str) -> bool {
    match path.strip_prefix(ROOT) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
        None => false,
    }
}

/// A node plus the minimal per-call progress needed to resume it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub node: NodeRef,
    pub loop_count: u32,
}

impl Continuation {
    pub fn new(node: NodeRef, loop_count: u32) -> Self {
        Self { node, loop_count }
    }

    pub fn encode(&self) -> String {
        encode(&self.node, self.loop_count)
    }

    pub fn decode(path: &str) -> Result<Self, RequestDecodeError> {
        decode(path).map(|(node, loop_count)| Self { node, loop_count })
    }
}

pub fn encode(node: &NodeRef, loop_count: u32) -> String {
    if loop_count == 0 {
        node.to_string()
    } else {
        format!("{}/{}/{}", node, LOOP_SEGMENT, loop_count)
    }
}

/// Splits a request path into its node and loop count.
///
/// Query strings and trailing slashes are ignored. A `loop` segment whose
/// counter is missing or not a number decodes as zero loops.
pub fn decode(path: &str) -> Result<(NodeRef, u32), RequestDecodeError> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let trimmed = path.trim_end_matches('/');

    let loop_suffix = format!("/{}", LOOP_SEGMENT);
    let (node_path, loop_count) = if let Some(head) = trimmed.strip_suffix(&loop_suffix) {
        (head, 0)
    } else {
        match trimmed.rsplit_once('/') {
            Some((head, count)) if head.ends_with(&loop_suffix) => (
                &head[..head.len() - loop_suffix.len()],
                count.parse().unwrap_or(0),
            ),
            _ => (trimmed, 0),
        }
    };
    // `/ivr/action/loop` is an action named "loop", not a bare counter.
    match node_path.parse::<NodeRef>() {
        Ok(node) => Ok((node, loop_count)),
        Err(_) if node_path != trimmed => Ok((trimmed.parse::<NodeRef>()?, 0)),
        Err(e) => Err(e),
    }
}

/// Node names end up inside paths, so they are restricted to a URL-safe set.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_nodes() {
        let nodes = [
            NodeRef::Welcome,
            NodeRef::Menu,
            NodeRef::Hangup,
            NodeRef::action("sales"),
            NodeRef::ForwardOutcome("reception".to_string()),
            NodeRef::VoicemailRecorded("after-hours".to_string()),
            NodeRef::action("loop"),
        ];
        for node in nodes {
            for n in [0u32, 1, 2, 17, u32::MAX] {
                let path = encode(&node, n);
                assert_eq!(decode(&path), Ok((node.clone(), n)), "path {}", path);
            }
        }
    }

    #[test]
    fn test_zero_loops_has_no_counter_segment() {
        assert_eq!(encode(&NodeRef::Menu, 0), "/ivr/menu");
        assert_eq!(encode(&NodeRef::Menu, 3), "/ivr/menu/loop/3");
        assert_eq!(
            Continuation::new(NodeRef::action("sales"), 1).encode(),
            "/ivr/action/sales/loop/1"
        );
    }

    #[test]
    fn test_malformed_counter_defaults_to_zero() {
        assert_eq!(decode("/ivr/menu/loop/abc"), Ok((NodeRef::Menu, 0)));
        assert_eq!(decode("/ivr/menu/loop/-1"), Ok((NodeRef::Menu, 0)));
        assert_eq!(decode("/ivr/menu/loop"), Ok((NodeRef::Menu, 0)));
        assert_eq!(decode("/ivr/menu/loop/"), Ok((NodeRef::Menu, 0)));
    }

    #[test]
    fn test_internal_paths() {
        assert!(is_internal("/ivr"));
        assert!(is_internal("/ivr/"));
        assert!(is_internal("/ivr/menu"));
        assert!(is_internal("/ivr?x=1"));
        assert!(!is_internal("/ivr-legacy/x"));
        assert!(!is_internal("/ivrfoo"));
        assert!(!is_internal("/legacy/ivr"));
        assert!(decode("/ivrmenu").is_err());
        assert!(decode("/ivr-legacy/menu").is_err());
    }

    #[test]
    fn test_action_named_loop() {
        assert_eq!(decode("/ivr/action/loop"), Ok((NodeRef::action("loop"), 0)));
        assert_eq!(
            decode("/ivr/action/loop/loop/2"),
            Ok((NodeRef::action("loop"), 2))
        );
    }

    #[test]
    fn test_query_and_trailing_slash_ignored() {
        assert_eq!(decode("/ivr/"), Ok((NodeRef::Welcome, 0)));
        assert_eq!(
            decode("/ivr/menu/loop/2?CallSid=CA123"),
            Ok((NodeRef::Menu, 2))
        );
    }

    #[test]
    fn test_unknown_paths() {
        for path in [
            "",
            "/",
            "/other",
            "/ivrx",
            "/ivr/menu/7",
            "/ivr/action",
            "/ivr/action/bad name",
            "/ivr/action/a/b/c",
        ] {
            assert!(
                matches!(decode(path), Err(RequestDecodeError::UnknownPath(_))),
                "path {:?}",
                path
            );
        }
    }
}
