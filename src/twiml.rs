//! TwiML rendering of response directives.

use crate::ivr::{ResponseDirective, Step};
use std::fmt::Write as _;
use url::Url;

pub const CONTENT_TYPE: &str = "text/xml";

/// Silence between the voicemail prompt and the start of the recording.
const RECORD_LEAD_IN: &str = "<Pause length=\"1\"/>";

/// Renders `directive` as a TwiML document.
///
/// Continuation paths become absolute URLs against `base`, or stay relative
/// to the request URL without one. Play steps that
/// directly precede a gather are nested inside it so the caller can key in
/// digits while the prompt is still playing. SMS steps are delivered out of
/// band and have no TwiML form.
pub fn render(directive: &ResponseDirective, base: Option<&Url>) -> String {
    let mut body = String::new();
    let mut pending: Vec<&str> = Vec::new();

    for step in &directive.steps {
        match step {
            Step::Play { url } => pending.push(url),
            Step::Gather {
                max_wait_secs,
                num_digits,
                callback,
            } => {
                let _ = write!(
                    body,
                    "<Gather numDigits=\"{}\" timeout=\"{}\" action=\"{}\" method=\"POST\">",
                    num_digits,
                    max_wait_secs,
                    escape_xml(&absolute(base, callback))
                );
                flush_plays(&mut body, &mut pending);
                body.push_str("</Gather>");
            }
            Step::Redirect { path } => {
                flush_plays(&mut body, &mut pending);
                let _ = write!(
                    body,
                    "<Redirect method=\"POST\">{}</Redirect>",
                    escape_xml(&absolute(base, path))
                );
            }
            Step::Dial { number, callback } => {
                flush_plays(&mut body, &mut pending);
                let _ = write!(
                    body,
                    "<Dial action=\"{}\" method=\"POST\">{}</Dial>",
                    escape_xml(&absolute(base, callback)),
                    escape_xml(number)
                );
            }
            Step::Record {
                timeout_secs,
                max_length_secs,
                callback,
            } => {
                flush_plays(&mut body, &mut pending);
                body.push_str(RECORD_LEAD_IN);
                let _ = write!(
                    body,
                    "<Record action=\"{}\" method=\"POST\" timeout=\"{}\" maxLength=\"{}\"/>",
                    escape_xml(&absolute(base, callback)),
                    timeout_secs,
                    max_length_secs
                );
            }
            Step::SendSms { .. } => {}
            Step::Hangup => {
                flush_plays(&mut body, &mut pending);
                body.push_str("<Hangup/>");
            }
        }
    }
    flush_plays(&mut body, &mut pending);

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>{}</Response>",
        body
    )
}

fn flush_plays(body: &mut String, pending: &mut Vec<&str>) {
    for url in pending.drain(..) {
        let _ = write!(body, "<Play>{}</Play>", escape_xml(url));
    }
}

/// Appends a continuation path to the public base, keeping any path prefix
/// the base carries. A query on `path` replaces the base's query. Full URLs
/// pass through.
pub fn absolute(base: Option<&Url>, path: &str) -> String {
    let Some(base) = base.filter(|_| path.starts_with('/')) else {
        return path.to_string();
    };
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };
    let mut url = base.clone();
    url.set_path(&format!("{}{}", base.path().trim_end_matches('/'), path));
    url.set_query(query);
    url.to_string()
}

pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
