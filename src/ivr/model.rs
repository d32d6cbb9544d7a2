//! Typed call-flow configuration.
//!
//! Built once from the raw TOML sections and read-only afterwards. Every
//! name a node refers to is resolved here, so the resolver never meets a
//! dangling reference for a well-formed request.
//!
//! ```toml
//! [welcome]
//! sample = "https://cdn.example.com/welcome.mp3"
//! hours = "office"
//! closed_action = "closed"
//!
//! [menu]
//! sample = "https://cdn.example.com/menu.mp3"
//! pause = 3
//! no_input_max_loops = 2
//! no_input_action = "voicemail"
//!
//! [menu_option_1]
//! action = "sales"
//!
//! [action_sales]
//! type = "forward"
//! phone_number = "+441234567890"
//! on_busy = "voicemail"
//! on_no_answer = "voicemail"
//! on_failed = "voicemail"
//! on_canceled = "hangup"
//!
//! [hours_office]
//! mon = "0900-1730"
//! ```

use super::codec::{self, NodeRef};
use super::hours::{DayRange, HoursCalendar, WEEKDAYS};
use crate::error::{ConfigError, RequestDecodeError};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use tracing::warn;

pub const WELCOME_SECTION: &str = "welcome";
pub const MENU_SECTION: &str = "menu";
pub const MENU_OPTION_PREFIX: &str = "menu_option_";
pub const ACTION_PREFIX: &str = "action_";
pub const HOURS_PREFIX: &str = "hours_";

const DEFAULT_PAUSE_SECS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gate {
    pub calendar: String,
    pub closed_action: String,
}

/// Fields shared by every node except hours calendars.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeCommon {
    pub sample: Option<String>,
    pub gate: Option<Gate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Welcome {
    pub common: NodeCommon,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    pub common: NodeCommon,
    pub pause: u32,
    pub no_input_sample: Option<String>,
    pub no_input_max_loops: Option<u32>,
    pub no_input_action: Option<String>,
    pub options: BTreeMap<u8, MenuOption>,
}

impl Menu {
    /// Exact single-digit match against the configured option keys.
    pub fn option_for(&self, digits: &str) -> Option<&MenuOption> {
        let mut chars = digits.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => c
                .to_digit(10)
                .and_then(|d| self.options.get(&(d as u8))),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuOption {
    pub digit: u8,
    pub common: NodeCommon,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub common: NodeCommon,
    pub kind: ActionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Hangup,
    Redirect { target_path: String },
    Forward(ForwardAction),
    Voicemail(VoicemailAction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardAction {
    pub phone_number: String,
    pub on_busy: String,
    pub on_no_answer: String,
    pub on_failed: String,
    pub on_canceled: String,
}

impl ForwardAction {
    pub fn action_on(&self, outcome: CallOutcome) -> &str {
        match outcome {
            CallOutcome::Busy => &self.on_busy,
            CallOutcome::NoAnswer => &self.on_no_answer,
            CallOutcome::Failed => &self.on_failed,
            CallOutcome::Canceled => &self.on_canceled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicemailAction {
    pub prompt_sample: String,
    pub hangup_sample: String,
    pub alert_sms_from: String,
    pub alert_sms_to: String,
    pub record_timeout_seconds: u32,
    pub max_length_seconds: u32,
}

/// Result of a forwarded call that did not connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallOutcome {
    Busy,
    NoAnswer,
    Failed,
    Canceled,
}

impl CallOutcome {
    /// Maps a provider dial status. Statuses for a call that connected
    /// normally carry no outcome.
    pub fn from_status(status: &str) -> Result<Option<Self>, RequestDecodeError> {
        match status {
            "completed" | "answered" => Ok(None),
            other => other.parse().map(Some),
        }
    }
}

impl FromStr for CallOutcome {
    type Err = RequestDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "busy" => Ok(CallOutcome::Busy),
            "no-answer" => Ok(CallOutcome::NoAnswer),
            "failed" => Ok(CallOutcome::Failed),
            "canceled" => Ok(CallOutcome::Canceled),
            other => Err(RequestDecodeError::UnknownOutcome(other.to_string())),
        }
    }
}

/// The complete, validated call flow.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFlow {
    pub timezone: Tz,
    pub welcome: Welcome,
    pub menu: Menu,
    pub actions: BTreeMap<String, Action>,
    pub calendars: BTreeMap<String, HoursCalendar>,
}

impl CallFlow {
    /// Builds the model from top-level configuration sections.
    pub fn from_sections(timezone: &str, sections: &toml::Table) -> Result<Self, ConfigError> {
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| ConfigError::InvalidTimezone(timezone.to_string()))?;

        let mut welcome = None;
        let mut menu = None;
        let mut options = BTreeMap::new();
        let mut actions = BTreeMap::new();
        let mut calendars = BTreeMap::new();

        for (section, value) in sections {
            if section == WELCOME_SECTION {
                let raw: RawWelcome = parse_section(section, value)?;
                let common = RawCommon {
                    sample: raw.sample,
                    hours: raw.hours,
                    closed_action: raw.closed_action,
                };
                welcome = Some(Welcome {
                    common: common.build(section)?,
                });
            } else if section == MENU_SECTION {
                let raw: RawMenu = parse_section(section, value)?;
                menu = Some(raw.build(section)?);
            } else if let Some(digit) = section.strip_prefix(MENU_OPTION_PREFIX) {
                let digit = parse_option_digit(digit)
                    .ok_or_else(|| ConfigError::UnknownSection(section.clone()))?;
                let raw: RawMenuOption = parse_section(section, value)?;
                options.insert(digit, raw.build(section, digit)?);
            } else if let Some(name) = section.strip_prefix(ACTION_PREFIX) {
                check_name(name)?;
                let raw: RawAction = parse_section(section, value)?;
                actions.insert(name.to_string(), raw.build(section, name)?);
            } else if let Some(name) = section.strip_prefix(HOURS_PREFIX) {
                check_name(name)?;
                let raw: RawHours = parse_section(section, value)?;
                calendars.insert(name.to_string(), raw.build(section, name)?);
            } else {
                return Err(ConfigError::UnknownSection(section.clone()));
            }
        }

        let welcome = welcome.ok_or_else(|| ConfigError::MissingSection(WELCOME_SECTION.into()))?;
        let mut menu = menu.ok_or_else(|| ConfigError::MissingSection(MENU_SECTION.into()))?;
        menu.options = options;

        let flow = Self {
            timezone,
            welcome,
            menu,
            actions,
            calendars,
        };
        flow.validate()?;
        Ok(flow)
    }

    pub fn action(&self, name: &str) -> Result<&Action, ConfigError> {
        self.actions
            .get(name)
            .ok_or_else(|| ConfigError::UnknownAction(name.to_string()))
    }

    /// Whether calendar `name` is open at `now`, evaluated in the flow's timezone.
    pub fn is_open(&self, name: &str, now: DateTime<Utc>) -> Result<bool, ConfigError> {
        self.calendars
            .get(name)
            .map(|calendar| calendar.is_open_at(&self.timezone, now))
            .ok_or_else(|| ConfigError::UnknownCalendar(name.to_string()))
    }

    /// Section names in the order `check-config` reports them.
    pub fn section_names(&self) -> Vec<String> {
        let mut names = vec![WELCOME_SECTION.to_string(), MENU_SECTION.to_string()];
        names.extend(
            self.menu
                .options
                .keys()
                .map(|d| format!("{}{}", MENU_OPTION_PREFIX, d)),
        );
        names.extend(self.actions.keys().map(|n| format!("{}{}", ACTION_PREFIX, n)));
        names.extend(self.calendars.keys().map(|n| format!("{}{}", HOURS_PREFIX, n)));
        names
    }

    pub fn has_voicemail(&self) -> bool {
        self.actions
            .values()
            .any(|a| matches!(a.kind, ActionKind::Voicemail(_)))
    }

    /// Checks every cross-reference between sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.check_common(WELCOME_SECTION, &self.welcome.common)?;
        self.check_common(MENU_SECTION, &self.menu.common)?;
        if let Some(target) = &self.menu.no_input_action {
            self.check_action_ref(MENU_SECTION, "no_input_action", target)?;
        }
        for (digit, option) in &self.menu.options {
            let section = format!("{}{}", MENU_OPTION_PREFIX, digit);
            self.check_common(&section, &option.common)?;
            self.check_action_ref(&section, "action", &option.action)?;
        }
        for (name, action) in &self.actions {
            let section = format!("{}{}", ACTION_PREFIX, name);
            self.check_common(&section, &action.common)?;
            match &action.kind {
                ActionKind::Hangup | ActionKind::Voicemail(_) => {}
                ActionKind::Redirect { target_path } => {
                    self.check_target_path(&section, target_path)?;
                }
                ActionKind::Forward(forward) => {
                    self.check_action_ref(&section, "on_busy", &forward.on_busy)?;
                    self.check_action_ref(&section, "on_no_answer", &forward.on_no_answer)?;
                    self.check_action_ref(&section, "on_failed", &forward.on_failed)?;
                    self.check_action_ref(&section, "on_canceled", &forward.on_canceled)?;
                }
            }
        }
        self.check_redirect_cycles()?;

        if self.menu.options.len() < 10 && self.menu.no_input_action.is_none() {
            warn!(
                configured = self.menu.options.len(),
                "menu has unmapped digits and no no_input_action; unmatched input will fail"
            );
        }
        Ok(())
    }

    fn check_common(&self, section: &str, common: &NodeCommon) -> Result<(), ConfigError> {
        if let Some(gate) = &common.gate {
            if !self.calendars.contains_key(&gate.calendar) {
                return Err(ConfigError::UnresolvedReference {
                    section: section.to_string(),
                    field: "hours".to_string(),
                    kind: "hours calendar",
                    target: gate.calendar.clone(),
                });
            }
            self.check_action_ref(section, "closed_action", &gate.closed_action)?;
        }
        Ok(())
    }

    fn check_action_ref(&self, section: &str, field: &str, target: &str) -> Result<(), ConfigError> {
        if self.actions.contains_key(target) {
            Ok(())
        } else {
            Err(ConfigError::UnresolvedReference {
                section: section.to_string(),
                field: field.to_string(),
                kind: "action",
                target: target.to_string(),
            })
        }
    }

    fn check_target_path(&self, section: &str, target_path: &str) -> Result<(), ConfigError> {
        if !codec::is_internal(target_path) {
            // Paths outside the call flow are handed to the provider untouched.
            if target_path.starts_with('/')
                || target_path.starts_with("http://")
                || target_path.starts_with("https://")
            {
                return Ok(());
            }
            return Err(ConfigError::InvalidSection {
                section: section.to_string(),
                reason: format!(
                    "target_path '{}' must start with '/' or be an http(s) URL",
                    target_path
                ),
            });
        }
        let unresolved = || ConfigError::UnresolvedReference {
            section: section.to_string(),
            field: "target_path".to_string(),
            kind: "call-flow node",
            target: target_path.to_string(),
        };
        match codec::decode(target_path).map_err(|_| unresolved())?.0 {
            NodeRef::Welcome | NodeRef::Menu | NodeRef::Hangup => Ok(()),
            NodeRef::Action(name) if self.actions.contains_key(&name) => Ok(()),
            _ => Err(unresolved()),
        }
    }

    /// Follows redirect-to-redirect chains; a revisited action is a cycle
    /// the resolver could never leave.
    fn check_redirect_cycles(&self) -> Result<(), ConfigError> {
        for start in self.actions.keys() {
            let mut seen = HashSet::new();
            let mut current = start.as_str();
            while let Some(next) = self.redirect_target(current) {
                if !seen.insert(current) {
                    return Err(ConfigError::RedirectCycle(start.clone()));
                }
                current = next;
            }
        }
        Ok(())
    }

    fn redirect_target(&self, name: &str) -> Option<&str> {
        let action = self.actions.get(name)?;
        if action.common.gate.is_some() {
            // Gated redirects depend on the clock; the resolver's hop limit covers them.
            return None;
        }
        match &action.kind {
            ActionKind::Redirect { target_path } => match codec::decode(target_path) {
                Ok((NodeRef::Action(next), _)) => self.actions.get_key_value(&next).map(|(k, _)| k.as_str()),
                _ => None,
            },
            _ => None,
        }
    }
}

fn parse_option_digit(suffix: &str) -> Option<u8> {
    let mut chars = suffix.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.to_digit(10).map(|d| d as u8),
        _ => None,
    }
}

fn check_name(name: &str) -> Result<(), ConfigError> {
    if codec::is_valid_name(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidName(name.to_string()))
    }
}

fn parse_section<T: for<'de> Deserialize<'de>>(
    section: &str,
    value: &toml::Value,
) -> Result<T, ConfigError> {
    if !value.is_table() {
        return Err(ConfigError::UnknownSection(section.to_string()));
    }
    value
        .clone()
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::InvalidSection {
            section: section.to_string(),
            reason: e.message().to_string(),
        })
}

fn require<T>(section: &str, field: &str, value: Option<T>) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingField {
        section: section.to_string(),
        field: field.to_string(),
    })
}

fn require_positive(section: &str, field: &str, value: Option<u32>) -> Result<u32, ConfigError> {
    match require(section, field, value)? {
        0 => Err(ConfigError::InvalidSection {
            section: section.to_string(),
            reason: format!("'{}' must be a positive number of seconds", field),
        }),
        n => Ok(n),
    }
}

struct RawCommon {
    sample: Option<String>,
    hours: Option<String>,
    closed_action: Option<String>,
}

impl RawCommon {
    fn build(self, section: &str) -> Result<NodeCommon, ConfigError> {
        let gate = match (self.hours, self.closed_action) {
            (Some(calendar), Some(closed_action)) => Some(Gate {
                calendar,
                closed_action,
            }),
            (Some(_), None) => {
                return Err(ConfigError::MissingField {
                    section: section.to_string(),
                    field: "closed_action".to_string(),
                });
            }
            (None, Some(_)) => {
                warn!(section, "closed_action is ignored without hours");
                None
            }
            (None, None) => None,
        };
        Ok(NodeCommon {
            sample: self.sample,
            gate,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWelcome {
    sample: Option<String>,
    hours: Option<String>,
    closed_action: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMenu {
    sample: Option<String>,
    hours: Option<String>,
    closed_action: Option<String>,
    pause: Option<u32>,
    no_input_sample: Option<String>,
    no_input_max_loops: Option<u32>,
    no_input_action: Option<String>,
}

impl RawMenu {
    fn build(self, section: &str) -> Result<Menu, ConfigError> {
        let common = RawCommon {
            sample: self.sample,
            hours: self.hours,
            closed_action: self.closed_action,
        }
        .build(section)?;
        if self.no_input_max_loops.is_some() && self.no_input_action.is_none() {
            return Err(ConfigError::MissingField {
                section: section.to_string(),
                field: "no_input_action".to_string(),
            });
        }
        Ok(Menu {
            common,
            pause: self.pause.unwrap_or(DEFAULT_PAUSE_SECS),
            no_input_sample: self.no_input_sample,
            no_input_max_loops: self.no_input_max_loops,
            no_input_action: self.no_input_action,
            options: BTreeMap::new(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMenuOption {
    sample: Option<String>,
    hours: Option<String>,
    closed_action: Option<String>,
    action: Option<String>,
}

impl RawMenuOption {
    fn build(self, section: &str, digit: u8) -> Result<MenuOption, ConfigError> {
        let action = require(section, "action", self.action)?;
        let common = RawCommon {
            sample: self.sample,
            hours: self.hours,
            closed_action: self.closed_action,
        }
        .build(section)?;
        Ok(MenuOption {
            digit,
            common,
            action,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAction {
    #[serde(rename = "type")]
    kind: Option<String>,
    sample: Option<String>,
    hours: Option<String>,
    closed_action: Option<String>,
    target_path: Option<String>,
    phone_number: Option<String>,
    on_busy: Option<String>,
    on_no_answer: Option<String>,
    on_failed: Option<String>,
    on_canceled: Option<String>,
    prompt_sample: Option<String>,
    hangup_sample: Option<String>,
    alert_sms_from: Option<String>,
    alert_sms_to: Option<String>,
    record_timeout_seconds: Option<u32>,
    max_length_seconds: Option<u32>,
}

impl RawAction {
    /// Fields that only make sense for particular action types.
    fn kind_fields(&self) -> [(&'static str, &'static str, bool); 12] {
        [
            ("redirect", "target_path", self.target_path.is_some()),
            ("forward", "phone_number", self.phone_number.is_some()),
            ("forward", "on_busy", self.on_busy.is_some()),
            ("forward", "on_no_answer", self.on_no_answer.is_some()),
            ("forward", "on_failed", self.on_failed.is_some()),
            ("forward", "on_canceled", self.on_canceled.is_some()),
            ("voicemail", "prompt_sample", self.prompt_sample.is_some()),
            ("voicemail", "hangup_sample", self.hangup_sample.is_some()),
            ("voicemail", "alert_sms_from", self.alert_sms_from.is_some()),
            ("voicemail", "alert_sms_to", self.alert_sms_to.is_some()),
            ("voicemail", "record_timeout_seconds", self.record_timeout_seconds.is_some()),
            ("voicemail", "max_length_seconds", self.max_length_seconds.is_some()),
        ]
    }

    fn build(self, section: &str, name: &str) -> Result<Action, ConfigError> {
        let kind_name = require(section, "type", self.kind.clone())?;
        if !matches!(kind_name.as_str(), "hangup" | "redirect" | "forward" | "voicemail") {
            return Err(ConfigError::InvalidSection {
                section: section.to_string(),
                reason: format!("invalid action type '{}'", kind_name),
            });
        }
        if let Some((_, field, _)) = self
            .kind_fields()
            .into_iter()
            .find(|(owner, _, present)| *present && *owner != kind_name)
        {
            return Err(ConfigError::UnexpectedField {
                section: section.to_string(),
                field: field.to_string(),
            });
        }

        let kind = match kind_name.as_str() {
            "redirect" => ActionKind::Redirect {
                target_path: require(section, "target_path", self.target_path)?,
            },
            "forward" => ActionKind::Forward(ForwardAction {
                phone_number: require(section, "phone_number", self.phone_number)?,
                on_busy: require(section, "on_busy", self.on_busy)?,
                on_no_answer: require(section, "on_no_answer", self.on_no_answer)?,
                on_failed: require(section, "on_failed", self.on_failed)?,
                on_canceled: require(section, "on_canceled", self.on_canceled)?,
            }),
            "voicemail" => ActionKind::Voicemail(VoicemailAction {
                prompt_sample: require(section, "prompt_sample", self.prompt_sample)?,
                hangup_sample: require(section, "hangup_sample", self.hangup_sample)?,
                alert_sms_from: require(section, "alert_sms_from", self.alert_sms_from)?,
                alert_sms_to: require(section, "alert_sms_to", self.alert_sms_to)?,
                record_timeout_seconds: require_positive(
                    section,
                    "record_timeout_seconds",
                    self.record_timeout_seconds,
                )?,
                max_length_seconds: require_positive(
                    section,
                    "max_length_seconds",
                    self.max_length_seconds,
                )?,
            }),
            _ => ActionKind::Hangup,
        };
        let common = RawCommon {
            sample: self.sample,
            hours: self.hours,
            closed_action: self.closed_action,
        }
        .build(section)?;
        Ok(Action {
            name: name.to_string(),
            common,
            kind,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHours {
    mon: Option<String>,
    tue: Option<String>,
    wed: Option<String>,
    thu: Option<String>,
    fri: Option<String>,
    sat: Option<String>,
    sun: Option<String>,
}

impl RawHours {
    fn build(self, section: &str, name: &str) -> Result<HoursCalendar, ConfigError> {
        let values = [
            self.mon, self.tue, self.wed, self.thu, self.fri, self.sat, self.sun,
        ];
        let mut calendar = HoursCalendar::new(name);
        for ((day, weekday), value) in WEEKDAYS.iter().zip(values) {
            let Some(value) = value else { continue };
            let range = DayRange::parse(&value).map_err(|_| ConfigError::InvalidHours {
                section: section.to_string(),
                day: *day,
                value: value.clone(),
            })?;
            calendar.set_day(*weekday, range);
        }
        Ok(calendar)
    }
}
