use serde::Serialize;

/// One call-control instruction handed to the renderer.
///
/// Callback paths are continuation paths relative to the service root; the
/// renderer decides how to make them absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Play {
        url: String,
    },
    Gather {
        max_wait_secs: u32,
        num_digits: u8,
        callback: String,
    },
    Redirect {
        path: String,
    },
    Dial {
        number: String,
        callback: String,
    },
    Record {
        timeout_secs: u32,
        max_length_secs: u32,
        callback: String,
    },
    SendSms {
        from: String,
        to: String,
        body: String,
    },
    Hangup,
}

/// Ordered list of steps the resolver produced for one webhook hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResponseDirective {
    pub steps: Vec<Step>,
}

impl ResponseDirective {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Step) -> &mut Self {
        self.steps.push(step);
        self
    }

    pub fn play(&mut self, url: Option<&str>) -> &mut Self {
        if let Some(url) = url {
            self.steps.push(Step::Play {
                url: url.to_string(),
            });
        }
        self
    }

    pub fn hangup(&mut self) -> &mut Self {
        self.push(Step::Hangup)
    }

    pub fn sms(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.steps.iter().filter_map(|step| match step {
            Step::SendSms { from, to, body } => Some((from.as_str(), to.as_str(), body.as_str())),
            _ => None,
        })
    }
}
