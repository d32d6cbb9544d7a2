//! Call-flow resolution.
//!
//! Each webhook hit is resolved from scratch: the request names a node
//! (through its continuation path), the resolver walks the configured
//! nodes until one of them settles the call for this round trip, and the
//! steps collected along the way form the response directive.
//!
//! ```text
//! welcome ──→ redirect /ivr/menu
//! menu ──┬─ digit matches ──→ menu option ──→ action
//!        ├─ silent, loops left ──→ gather + redirect /ivr/menu/loop/N+1
//!        └─ loops spent / no match ──→ no_input_action
//! action ──┬─ hangup
//!          ├─ redirect ──→ node inside /ivr (followed) | external path
//!          ├─ forward ──→ dial ... /outcome ──→ on_busy | on_no_answer | ...
//!          └─ voicemail ──→ record ... /recorded ──→ sms + hangup
//! ```
//!
//! Hours gating is checked on every node the walk visits, before anything
//! else on that node.

use super::codec::{self, NodeRef};
use super::directive::{ResponseDirective, Step};
use super::model::{ActionKind, CallFlow, CallOutcome, NodeCommon};
use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Hops allowed in one resolution before the flow is declared cyclic.
pub const DEFAULT_HOP_LIMIT: usize = 32;

/// Digits collected per menu gather.
const MENU_NUM_DIGITS: u8 = 1;

/// Everything the resolver needs from one inbound webhook request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub node: NodeRef,
    pub loop_count: u32,
    pub digits: Option<String>,
    pub outcome: Option<CallOutcome>,
    pub recording_url: Option<String>,
    pub now: DateTime<Utc>,
}

impl CallContext {
    pub fn new(node: NodeRef, now: DateTime<Utc>) -> Self {
        Self {
            node,
            loop_count: 0,
            digits: None,
            outcome: None,
            recording_url: None,
            now,
        }
    }

    pub fn with_loop_count(mut self, loop_count: u32) -> Self {
        self.loop_count = loop_count;
        self
    }

    pub fn with_digits(mut self, digits: impl Into<String>) -> Self {
        self.digits = Some(digits.into());
        self
    }

    pub fn with_outcome(mut self, outcome: CallOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_recording_url(mut self, url: impl Into<String>) -> Self {
        self.recording_url = Some(url.into());
        self
    }
}

/// A node the walk is about to visit. Menu options never arrive from a
/// request, only through the menu's dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Visit {
    Welcome,
    Menu,
    Hangup,
    MenuOption(u8),
    Action(String),
    ForwardOutcome(String),
    VoicemailRecorded(String),
}

impl Visit {
    fn label(&self) -> String {
        match self {
            Visit::MenuOption(digit) => format!("menu_option_{}", digit),
            Visit::Welcome => NodeRef::Welcome.label(),
            Visit::Menu => NodeRef::Menu.label(),
            Visit::Hangup => NodeRef::Hangup.label(),
            Visit::Action(name) => NodeRef::Action(name.clone()).label(),
            Visit::ForwardOutcome(name) => NodeRef::ForwardOutcome(name.clone()).label(),
            Visit::VoicemailRecorded(name) => NodeRef::VoicemailRecorded(name.clone()).label(),
        }
    }
}

impl From<NodeRef> for Visit {
    fn from(node: NodeRef) -> Self {
        match node {
            NodeRef::Welcome => Visit::Welcome,
            NodeRef::Menu => Visit::Menu,
            NodeRef::Hangup => Visit::Hangup,
            NodeRef::Action(name) => Visit::Action(name),
            NodeRef::ForwardOutcome(name) => Visit::ForwardOutcome(name),
            NodeRef::VoicemailRecorded(name) => Visit::VoicemailRecorded(name),
        }
    }
}

/// Request data that only applies to the node the request was addressed to.
#[derive(Debug, Default)]
struct Input<'c> {
    loop_count: u32,
    digits: Option<&'c str>,
    outcome: Option<CallOutcome>,
    recording_url: Option<&'c str>,
}

enum Next<'c> {
    Done,
    Goto(Visit, Input<'c>),
}

impl<'c> Next<'c> {
    fn goto(visit: Visit) -> Self {
        Next::Goto(visit, Input::default())
    }

    fn action(name: &str) -> Self {
        Self::goto(Visit::Action(name.to_string()))
    }
}

pub struct Resolver<'a> {
    flow: &'a CallFlow,
    max_hops: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(flow: &'a CallFlow) -> Self {
        Self {
            flow,
            max_hops: DEFAULT_HOP_LIMIT,
        }
    }

    pub fn with_hop_limit(mut self, limit: usize) -> Self {
        self.max_hops = limit;
        self
    }

    pub fn resolve(&self, ctx: &CallContext) -> Result<ResponseDirective, ConfigError> {
        let mut directive = ResponseDirective::new();
        let mut visit = Visit::from(ctx.node.clone());
        let mut input = Input {
            loop_count: ctx.loop_count,
            digits: ctx.digits.as_deref(),
            outcome: ctx.outcome,
            recording_url: ctx.recording_url.as_deref(),
        };

        for _ in 0..self.max_hops {
            debug!(node = %visit.label(), loop_count = input.loop_count, "resolving node");
            match self.visit(&visit, input, ctx.now, &mut directive)? {
                Next::Done => return Ok(directive),
                Next::Goto(next, next_input) => {
                    visit = next;
                    input = next_input;
                }
            }
        }
        Err(ConfigError::ChainTooLong {
            hops: self.max_hops,
            node: visit.label(),
        })
    }

    /// Returns the closed action to divert to when `common` is gated shut.
    fn closed_action<'n>(
        &self,
        common: &'n NodeCommon,
        now: DateTime<Utc>,
    ) -> Result<Option<&'n str>, ConfigError> {
        let Some(gate) = &common.gate else {
            return Ok(None);
        };
        if self.flow.is_open(&gate.calendar, now)? {
            Ok(None)
        } else {
            debug!(calendar = %gate.calendar, closed_action = %gate.closed_action, "closed");
            Ok(Some(&gate.closed_action))
        }
    }

    fn visit<'c>(
        &self,
        visit: &Visit,
        input: Input<'c>,
        now: DateTime<Utc>,
        directive: &mut ResponseDirective,
    ) -> Result<Next<'c>, ConfigError> {
        match visit {
            Visit::Welcome => {
                let welcome = &self.flow.welcome;
                if let Some(closed) = self.closed_action(&welcome.common, now)? {
                    return Ok(Next::action(closed));
                }
                directive.play(welcome.common.sample.as_deref());
                directive.push(Step::Redirect {
                    path: codec::encode(&NodeRef::Menu, 0),
                });
                Ok(Next::Done)
            }
            Visit::Menu => self.visit_menu(input, now, directive),
            Visit::Hangup => {
                directive.hangup();
                Ok(Next::Done)
            }
            Visit::MenuOption(digit) => {
                let option = self
                    .flow
                    .menu
                    .options
                    .get(digit)
                    .ok_or_else(|| ConfigError::MissingSection(visit.label()))?;
                if let Some(closed) = self.closed_action(&option.common, now)? {
                    return Ok(Next::action(closed));
                }
                directive.play(option.common.sample.as_deref());
                Ok(Next::action(&option.action))
            }
            Visit::Action(name) => self.visit_action(name, now, directive),
            Visit::ForwardOutcome(name) => {
                let action = self.flow.action(name)?;
                let ActionKind::Forward(forward) = &action.kind else {
                    warn!(action = %name, "dial outcome for an action that is not a forward");
                    directive.hangup();
                    return Ok(Next::Done);
                };
                match input.outcome {
                    Some(outcome) => {
                        let target = forward.action_on(outcome);
                        debug!(action = %name, ?outcome, target, "forward did not connect");
                        Ok(Next::action(target))
                    }
                    None => {
                        directive.hangup();
                        Ok(Next::Done)
                    }
                }
            }
            Visit::VoicemailRecorded(name) => {
                let action = self.flow.action(name)?;
                let ActionKind::Voicemail(voicemail) = &action.kind else {
                    warn!(action = %name, "recording callback for an action that is not a voicemail");
                    directive.hangup();
                    return Ok(Next::Done);
                };
                directive.play(Some(voicemail.hangup_sample.as_str()));
                match input.recording_url {
                    Some(url) => {
                        directive.push(Step::SendSms {
                            from: voicemail.alert_sms_from.clone(),
                            to: voicemail.alert_sms_to.clone(),
                            body: format!("New voicemail: {}", url),
                        });
                    }
                    None => warn!(action = %name, "voicemail finished without a recording"),
                }
                directive.hangup();
                Ok(Next::Done)
            }
        }
    }

    fn visit_menu<'c>(
        &self,
        input: Input<'c>,
        now: DateTime<Utc>,
        directive: &mut ResponseDirective,
    ) -> Result<Next<'c>, ConfigError> {
        let menu = &self.flow.menu;
        if let Some(closed) = self.closed_action(&menu.common, now)? {
            return Ok(Next::action(closed));
        }

        let fallback = |digits: Option<&str>| match &menu.no_input_action {
            Some(action) => Ok(Next::action(action)),
            None => Err(ConfigError::NoMenuFallback {
                digits: digits.map(str::to_string),
            }),
        };

        match input.digits {
            Some(digits) => match menu.option_for(digits) {
                Some(option) => Ok(Next::goto(Visit::MenuOption(option.digit))),
                None => {
                    debug!(digits, "no menu option matches");
                    fallback(Some(digits))
                }
            },
            None => {
                let loops_left = menu
                    .no_input_max_loops
                    .map_or(true, |max| input.loop_count < max);
                if !loops_left {
                    debug!(loop_count = input.loop_count, "no input loop budget spent");
                    return fallback(None);
                }
                directive.play(menu.common.sample.as_deref());
                directive.push(Step::Gather {
                    max_wait_secs: menu.pause,
                    num_digits: MENU_NUM_DIGITS,
                    callback: codec::encode(&NodeRef::Menu, input.loop_count),
                });
                directive.play(menu.no_input_sample.as_deref());
                directive.push(Step::Redirect {
                    path: codec::encode(&NodeRef::Menu, input.loop_count.saturating_add(1)),
                });
                Ok(Next::Done)
            }
        }
    }

    fn visit_action<'c>(
        &self,
        name: &str,
        now: DateTime<Utc>,
        directive: &mut ResponseDirective,
    ) -> Result<Next<'c>, ConfigError> {
        let action = self.flow.action(name)?;
        if let Some(closed) = self.closed_action(&action.common, now)? {
            return Ok(Next::action(closed));
        }
        directive.play(action.common.sample.as_deref());

        match &action.kind {
            ActionKind::Hangup => {
                directive.hangup();
                Ok(Next::Done)
            }
            ActionKind::Redirect { target_path } => {
                if codec::is_internal(target_path) {
                    let (node, loop_count) = codec::decode(target_path).map_err(|_| {
                        ConfigError::UnresolvedReference {
                            section: format!("action_{}", name),
                            field: "target_path".to_string(),
                            kind: "call-flow node",
                            target: target_path.clone(),
                        }
                    })?;
                    let input = Input {
                        loop_count,
                        ..Default::default()
                    };
                    return Ok(Next::Goto(Visit::from(node), input));
                }
                directive.push(Step::Redirect {
                    path: target_path.clone(),
                });
                Ok(Next::Done)
            }
            ActionKind::Forward(forward) => {
                directive.push(Step::Dial {
                    number: forward.phone_number.clone(),
                    callback: codec::encode(&NodeRef::ForwardOutcome(name.to_string()), 0),
                });
                Ok(Next::Done)
            }
            ActionKind::Voicemail(voicemail) => {
                directive.play(Some(voicemail.prompt_sample.as_str()));
                directive.push(Step::Record {
                    timeout_secs: voicemail.record_timeout_seconds,
                    max_length_secs: voicemail.max_length_seconds,
                    callback: codec::encode(&NodeRef::VoicemailRecorded(name.to_string()), 0),
                });
                Ok(Next::Done)
            }
        }
    }
}
