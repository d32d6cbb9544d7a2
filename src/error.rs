use thiserror::Error;

/// Problems with the call-flow configuration.
///
/// These are operator errors: they are reported at load time whenever
/// possible and are never retried when they surface during resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required section [{0}] is missing")]
    MissingSection(String),

    #[error("unknown section [{0}]")]
    UnknownSection(String),

    #[error("section [{section}] is invalid: {reason}")]
    InvalidSection { section: String, reason: String },

    #[error("section [{section}] is missing mandatory field '{field}'")]
    MissingField { section: String, field: String },

    #[error("field '{field}' is not valid in section [{section}]")]
    UnexpectedField { section: String, field: String },

    #[error("section [{section}] field '{field}' references unknown {kind} '{target}'")]
    UnresolvedReference {
        section: String,
        field: String,
        kind: &'static str,
        target: String,
    },

    #[error("invalid name '{0}': only letters, digits, '_' and '-' are allowed")]
    InvalidName(String),

    #[error("section [{section}] has an invalid range for {day}: '{value}' (expected HHMM-HHMM, start before end)")]
    InvalidHours {
        section: String,
        day: &'static str,
        value: String,
    },

    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),

    #[error("hours calendar '{0}' does not exist")]
    UnknownCalendar(String),

    #[error("action '{0}' does not exist")]
    UnknownAction(String),

    #[error("menu received unmatched digits {digits:?} and has no no_input_action")]
    NoMenuFallback { digits: Option<String> },

    #[error("redirect cycle detected through action '{0}'")]
    RedirectCycle(String),

    #[error("resolution did not settle within {hops} hops (last node: {node})")]
    ChainTooLong { hops: usize, node: String },
}

/// Malformed data on an inbound webhook request.
///
/// The transport recovers from these by taking the default branch instead
/// of failing the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestDecodeError {
    #[error("unrecognised call-flow path '{0}'")]
    UnknownPath(String),

    #[error("unrecognised call outcome '{0}'")]
    UnknownOutcome(String),
}
