use super::codec::NodeRef;
use super::directive::{ResponseDirective, Step};
use super::model::{CallFlow, CallOutcome};
use super::resolver::{CallContext, Resolver, DEFAULT_HOP_LIMIT};
use crate::error::ConfigError;
use chrono::{DateTime, TimeZone, Utc};

const FLOW: &str = r#"
[welcome]
sample = "welcome.mp3"

[menu]
sample = "menu.mp3"
pause = 4
no_input_sample = "still-there.mp3"
no_input_max_loops = 2
no_input_action = "voicemail"

[menu_option_1]
sample = "connecting.mp3"
action = "reception"

[menu_option_2]
action = "support"

[menu_option_3]
action = "opening-times"

[menu_option_4]
action = "back"

[action_reception]
type = "forward"
hours = "office"
closed_action = "closed"
sample = "please-hold.mp3"
phone_number = "+15550100"
on_busy = "voicemail"
on_no_answer = "voicemail"
on_failed = "goodbye"
on_canceled = "goodbye"

[action_support]
type = "redirect"
sample = "transferring.mp3"
target_path = "/ivr/action/helpdesk"

[action_helpdesk]
type = "forward"
hours = "helpdesk"
closed_action = "closed"
sample = "helpdesk.mp3"
phone_number = "+15550200"
on_busy = "voicemail"
on_no_answer = "voicemail"
on_failed = "voicemail"
on_canceled = "goodbye"

[action_opening-times]
type = "hangup"
sample = "hours.mp3"

[action_back]
type = "redirect"
target_path = "/ivr"

[action_closed]
type = "hangup"
sample = "closed.mp3"

[action_goodbye]
type = "hangup"

[action_voicemail]
type = "voicemail"
prompt_sample = "leave-message.mp3"
hangup_sample = "thanks.mp3"
alert_sms_from = "+15550101"
alert_sms_to = "+15550102"
record_timeout_seconds = 5
max_length_seconds = 120

[hours_office]
mon = "0900-1730"
tue = "0900-1730"
wed = "0900-1730"
thu = "0900-1730"
fri = "0900-1730"

[hours_helpdesk]
mon = "0000-1159"
"#;

fn build(toml_str: &str) -> CallFlow {
    let sections: toml::Table = toml::from_str(toml_str).expect("parse TOML");
    CallFlow::from_sections("UTC", &sections).expect("valid flow")
}

fn flow() -> CallFlow {
    build(FLOW)
}

// 2025-01-05 is a Sunday, 2025-01-06 a Monday.
fn monday(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, hour, 0, 0).unwrap()
}

fn sunday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 5, 10, 0, 0).unwrap()
}

fn resolve(flow: &CallFlow, ctx: CallContext) -> ResponseDirective {
    Resolver::new(flow).resolve(&ctx).expect("resolve")
}

fn action(flow: &CallFlow, name: &str, now: DateTime<Utc>) -> ResponseDirective {
    resolve(flow, CallContext::new(NodeRef::action(name), now))
}

fn play(url: &str) -> Step {
    Step::Play {
        url: url.to_string(),
    }
}

#[test]
fn test_welcome_redirects_to_menu() {
    let flow = flow();
    let directive = resolve(&flow, CallContext::new(NodeRef::Welcome, monday(10)));
    assert_eq!(
        directive.steps,
        vec![
            play("welcome.mp3"),
            Step::Redirect {
                path: "/ivr/menu".to_string()
            }
        ]
    );
}

#[test]
fn test_gated_welcome_goes_to_closed_action() {
    let flow = build(&FLOW.replacen(
        "[welcome]\n",
        "[welcome]\nhours = \"office\"\nclosed_action = \"closed\"\n",
        1,
    ));
    let directive = resolve(&flow, CallContext::new(NodeRef::Welcome, sunday()));
    assert_eq!(directive, action(&flow, "closed", sunday()));
    assert_eq!(directive.steps, vec![play("closed.mp3"), Step::Hangup]);
}

#[test]
fn test_menu_prompt_encodes_next_loop() {
    let flow = flow();
    let directive = resolve(&flow, CallContext::new(NodeRef::Menu, monday(10)));
    assert_eq!(
        directive.steps,
        vec![
            play("menu.mp3"),
            Step::Gather {
                max_wait_secs: 4,
                num_digits: 1,
                callback: "/ivr/menu".to_string(),
            },
            play("still-there.mp3"),
            Step::Redirect {
                path: "/ivr/menu/loop/1".to_string()
            },
        ]
    );

    let directive = resolve(
        &flow,
        CallContext::new(NodeRef::Menu, monday(10)).with_loop_count(1),
    );
    assert_eq!(
        directive.steps.last(),
        Some(&Step::Redirect {
            path: "/ivr/menu/loop/2".to_string()
        })
    );
}

#[test]
fn test_menu_loop_budget_spent_uses_no_input_action() {
    let flow = flow();
    for loop_count in [2, 3, 50] {
        let directive = resolve(
            &flow,
            CallContext::new(NodeRef::Menu, monday(10)).with_loop_count(loop_count),
        );
        assert_eq!(directive, action(&flow, "voicemail", monday(10)));
    }
    assert_eq!(
        action(&flow, "voicemail", monday(10)).steps,
        vec![
            play("leave-message.mp3"),
            Step::Record {
                timeout_secs: 5,
                max_length_secs: 120,
                callback: "/ivr/action/voicemail/recorded".to_string(),
            }
        ]
    );
}

#[test]
fn test_menu_without_loop_limit_keeps_prompting() {
    let flow = build(&FLOW.replace("no_input_max_loops = 2\n", ""));
    let directive = resolve(
        &flow,
        CallContext::new(NodeRef::Menu, monday(10)).with_loop_count(1000),
    );
    assert!(matches!(directive.steps[1], Step::Gather { .. }));
    assert_eq!(
        directive.steps.last(),
        Some(&Step::Redirect {
            path: "/ivr/menu/loop/1001".to_string()
        })
    );
}

#[test]
fn test_digit_resolves_configured_option_action() {
    let flow = flow();
    for now in [monday(10), monday(13), sunday()] {
        let directive = resolve(
            &flow,
            CallContext::new(NodeRef::Menu, now).with_digits("2"),
        );
        assert_eq!(directive, action(&flow, "support", now));
    }

    // Other options do not influence digit 2.
    let trimmed = build(&FLOW.replace(
        "[menu_option_1]\nsample = \"connecting.mp3\"\naction = \"reception\"\n",
        "",
    ));
    let directive = resolve(
        &trimmed,
        CallContext::new(NodeRef::Menu, monday(10)).with_digits("2"),
    );
    assert_eq!(directive, action(&flow, "support", monday(10)));
}

#[test]
fn test_option_sample_precedes_action() {
    let flow = flow();
    let directive = resolve(
        &flow,
        CallContext::new(NodeRef::Menu, monday(10)).with_digits("1"),
    );
    assert_eq!(
        directive.steps,
        vec![
            play("connecting.mp3"),
            play("please-hold.mp3"),
            Step::Dial {
                number: "+15550100".to_string(),
                callback: "/ivr/action/reception/outcome".to_string(),
            }
        ]
    );
}

#[test]
fn test_hours_rechecked_on_each_node() {
    let flow = flow();
    // The option itself is ungated; its forward action is closed on Sunday.
    let directive = resolve(
        &flow,
        CallContext::new(NodeRef::Menu, sunday()).with_digits("1"),
    );
    assert_eq!(
        directive.steps,
        vec![play("connecting.mp3"), play("closed.mp3"), Step::Hangup]
    );
    assert_eq!(
        action(&flow, "reception", sunday()),
        action(&flow, "closed", sunday())
    );
}

#[test]
fn test_closed_menu_wins_over_prompt_and_digits() {
    let flow = build(&FLOW.replacen(
        "[menu]\n",
        "[menu]\nhours = \"office\"\nclosed_action = \"closed\"\n",
        1,
    ));
    let closed = action(&flow, "closed", sunday());

    let directive = resolve(&flow, CallContext::new(NodeRef::Menu, sunday()));
    assert_eq!(directive, closed);

    let directive = resolve(
        &flow,
        CallContext::new(NodeRef::Menu, sunday()).with_digits("1"),
    );
    assert_eq!(directive, closed);
    assert!(!directive.steps.contains(&play("connecting.mp3")));
    assert!(!directive
        .steps
        .iter()
        .any(|s| matches!(s, Step::Dial { .. })));

    // Spent loop budget does not reach the no-input action either.
    let directive = resolve(
        &flow,
        CallContext::new(NodeRef::Menu, sunday()).with_loop_count(5),
    );
    assert_eq!(directive, closed);

    // Open hours fall through to the usual dispatch.
    let directive = resolve(
        &flow,
        CallContext::new(NodeRef::Menu, monday(10)).with_digits("2"),
    );
    assert_eq!(directive, action(&flow, "support", monday(10)));
}

#[test]
fn test_closed_menu_option_skips_its_sample() {
    let flow = build(&FLOW.replacen(
        "[menu_option_2]\n",
        "[menu_option_2]\nsample = \"support-intro.mp3\"\nhours = \"office\"\nclosed_action = \"closed\"\n",
        1,
    ));
    let directive = resolve(
        &flow,
        CallContext::new(NodeRef::Menu, sunday()).with_digits("2"),
    );
    assert_eq!(directive, action(&flow, "closed", sunday()));
    assert_eq!(directive.steps, vec![play("closed.mp3"), Step::Hangup]);

    let directive = resolve(
        &flow,
        CallContext::new(NodeRef::Menu, monday(10)).with_digits("2"),
    );
    assert_eq!(directive.steps[0], play("support-intro.mp3"));
    assert_eq!(directive.steps[1], play("transferring.mp3"));
}

#[test]
fn test_unmatched_digits_use_fallback() {
    let flow = flow();
    let fallback = action(&flow, "voicemail", monday(10));
    for digits in ["9", "12", "", "*", "x"] {
        let directive = resolve(
            &flow,
            CallContext::new(NodeRef::Menu, monday(10)).with_digits(digits),
        );
        assert_eq!(directive, fallback, "digits {:?}", digits);
    }
}

#[test]
fn test_unmatched_digits_without_fallback() {
    let flow = build(
        &FLOW
            .replace("no_input_max_loops = 2\n", "")
            .replace("no_input_action = \"voicemail\"\n", ""),
    );
    let err = Resolver::new(&flow)
        .resolve(&CallContext::new(NodeRef::Menu, monday(10)).with_digits("9"))
        .unwrap_err();
    assert_eq!(
        err,
        ConfigError::NoMenuFallback {
            digits: Some("9".to_string())
        }
    );
}

#[test]
fn test_forward_outcomes() {
    let flow = flow();
    let outcome = |o: CallOutcome| {
        resolve(
            &flow,
            CallContext::new(NodeRef::ForwardOutcome("reception".into()), monday(10)).with_outcome(o),
        )
    };
    let voicemail = action(&flow, "voicemail", monday(10));
    assert_eq!(outcome(CallOutcome::Busy), voicemail);
    assert_eq!(outcome(CallOutcome::NoAnswer), voicemail);
    assert_eq!(outcome(CallOutcome::Failed).steps, vec![Step::Hangup]);
    assert_eq!(outcome(CallOutcome::Canceled).steps, vec![Step::Hangup]);
    assert!(!outcome(CallOutcome::Busy)
        .steps
        .iter()
        .any(|s| matches!(s, Step::Dial { .. })));

    // The forwarded call connected and ended normally.
    let directive = resolve(
        &flow,
        CallContext::new(NodeRef::ForwardOutcome("reception".into()), monday(10)),
    );
    assert_eq!(directive.steps, vec![Step::Hangup]);
}

#[test]
fn test_outcome_for_non_forward_hangs_up() {
    let flow = flow();
    let directive = resolve(
        &flow,
        CallContext::new(NodeRef::ForwardOutcome("goodbye".into()), monday(10))
            .with_outcome(CallOutcome::Busy),
    );
    assert_eq!(directive.steps, vec![Step::Hangup]);
}

#[test]
fn test_redirect_into_closed_target() {
    let flow = flow();
    // helpdesk is open Monday mornings only.
    let directive = action(&flow, "support", monday(13));
    assert_eq!(
        directive.steps,
        vec![play("transferring.mp3"), play("closed.mp3"), Step::Hangup]
    );
    assert!(!directive.steps.contains(&play("helpdesk.mp3")));

    let directive = action(&flow, "support", monday(10));
    assert_eq!(
        directive.steps,
        vec![
            play("transferring.mp3"),
            play("helpdesk.mp3"),
            Step::Dial {
                number: "+15550200".to_string(),
                callback: "/ivr/action/helpdesk/outcome".to_string(),
            }
        ]
    );
}

#[test]
fn test_redirect_back_to_welcome() {
    let flow = flow();
    let directive = resolve(
        &flow,
        CallContext::new(NodeRef::Menu, monday(10)).with_digits("4"),
    );
    assert_eq!(
        directive,
        resolve(&flow, CallContext::new(NodeRef::Welcome, monday(10)))
    );
}

#[test]
fn test_external_redirect_is_emitted() {
    let flow = build(&FLOW.replace(
        "target_path = \"/ivr\"",
        "target_path = \"https://other.example.com/voice\"",
    ));
    let directive = action(&flow, "back", monday(10));
    assert_eq!(
        directive.steps,
        vec![Step::Redirect {
            path: "https://other.example.com/voice".to_string()
        }]
    );

    let flow = build(&FLOW.replace(
        "target_path = \"/ivr\"",
        "target_path = \"/ivr-legacy/voice?lang=en\"",
    ));
    assert_eq!(
        action(&flow, "back", monday(10)).steps,
        vec![Step::Redirect {
            path: "/ivr-legacy/voice?lang=en".to_string()
        }]
    );
}

#[test]
fn test_voicemail_completion_sends_alert() {
    let flow = flow();
    let directive = resolve(
        &flow,
        CallContext::new(NodeRef::VoicemailRecorded("voicemail".into()), monday(10))
            .with_recording_url("https://api.example.com/recordings/RE1"),
    );
    assert_eq!(
        directive.steps,
        vec![
            play("thanks.mp3"),
            Step::SendSms {
                from: "+15550101".to_string(),
                to: "+15550102".to_string(),
                body: "New voicemail: https://api.example.com/recordings/RE1".to_string(),
            },
            Step::Hangup,
        ]
    );
    assert_eq!(directive.sms().count(), 1);

    let directive = resolve(
        &flow,
        CallContext::new(NodeRef::VoicemailRecorded("voicemail".into()), monday(10)),
    );
    assert_eq!(directive.steps, vec![play("thanks.mp3"), Step::Hangup]);
}

#[test]
fn test_hangup_path() {
    let flow = flow();
    let directive = resolve(&flow, CallContext::new(NodeRef::Hangup, monday(10)));
    assert_eq!(directive.steps, vec![Step::Hangup]);
}

#[test]
fn test_unknown_action_in_request() {
    let flow = flow();
    let err = Resolver::new(&flow)
        .resolve(&CallContext::new(NodeRef::action("ghost"), monday(10)))
        .unwrap_err();
    assert_eq!(err, ConfigError::UnknownAction("ghost".to_string()));
}

#[test]
fn test_closed_action_cycle_hits_hop_limit() {
    let flow = build(&format!(
        "{}\n[action_stuck]\ntype = \"hangup\"\nhours = \"never\"\nclosed_action = \"stuck\"\n\n[hours_never]\n",
        FLOW
    ));
    let err = Resolver::new(&flow)
        .resolve(&CallContext::new(NodeRef::action("stuck"), monday(10)))
        .unwrap_err();
    assert_eq!(
        err,
        ConfigError::ChainTooLong {
            hops: DEFAULT_HOP_LIMIT,
            node: "action_stuck".to_string(),
        }
    );

    let err = Resolver::new(&flow)
        .with_hop_limit(3)
        .resolve(&CallContext::new(NodeRef::action("stuck"), monday(10)))
        .unwrap_err();
    assert!(matches!(err, ConfigError::ChainTooLong { hops: 3, .. }));
}
