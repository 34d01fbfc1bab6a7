use crate::{Error, Result};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;

/// A feed guide: the ordered steps that lead from a site's front page to its files.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedGuide {
    /// Name of the feed, echoed into the run result.
    pub feed_name: String,

    /// Steps to execute, in order.
    #[serde(default)]
    pub steps: Vec<GuideStep>,
}

impl FeedGuide {
    /// Load a guide from a file. `.json` files are parsed as JSON, anything else as YAML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    /// Parse a guide from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let guide: FeedGuide = serde_json::from_str(json)?;
        guide.validate()?;
        Ok(guide)
    }

    /// Parse a guide from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let guide: FeedGuide = serde_yaml::from_str(yaml)?;
        guide.validate()?;
        Ok(guide)
    }

    /// Parse a guide in whatever shape it arrives: JSON, YAML, or a JSON
    /// string literal wrapping a JSON guide (as agent frameworks tend to pass it).
    pub fn parse(input: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(input) {
            Ok(Value::String(inner)) => Self::from_json(&inner),
            Ok(value) => {
                let guide: FeedGuide = serde_json::from_value(value)?;
                guide.validate()?;
                Ok(guide)
            }
            Err(_) => Self::from_yaml(input),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.feed_name.trim().is_empty() {
            return Err(Error::Config("feed_name is required".into()));
        }
        Ok(())
    }
}

/// One entry of a guide: the parsed step plus the record it came from.
#[derive(Debug, Clone)]
pub struct GuideStep {
    /// The step as written in the guide.
    pub raw: Value,
    /// Action name as written, lowercased. `click_text` stays `click_text`.
    pub action: String,
    /// Parsed step.
    pub step: Step,
    /// Record a failure of this step and keep going instead of aborting.
    pub continue_on_error: bool,
}

impl GuideStep {
    /// Build an entry from a raw step record.
    ///
    /// A field of the wrong type does not reject the guide: the step becomes
    /// [`Step::Malformed`] and fails when it runs.
    pub fn from_value(raw: Value) -> Self {
        let action = raw
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let continue_on_error = raw
            .get("continue_on_error")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let step = match Step::parse(&action, &raw) {
            Ok(step) => step,
            Err(e) => Step::Malformed {
                action: action.clone(),
                reason: e.to_string(),
            },
        };

        Self {
            raw,
            action,
            step,
            continue_on_error,
        }
    }
}

impl<'de> Deserialize<'de> for GuideStep {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        if !raw.is_object() {
            return Err(de::Error::custom("expected a step map with an 'action' key"));
        }
        Ok(GuideStep::from_value(raw))
    }
}

impl Serialize for GuideStep {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.raw.serialize(serializer)
    }
}

/// A target element - either by CSS selector or visible text.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Target {
    /// CSS selector.
    pub selector: Option<String>,
    /// Visible text to find.
    pub text: Option<String>,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.selector, &self.text) {
            (Some(s), _) => write!(f, "selector '{}'", s),
            (_, Some(t)) => write!(f, "text '{}'", t),
            _ => write!(f, "unknown"),
        }
    }
}

/// A step to execute in the browser.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Goto(GotoStep),
    Wait(WaitStep),
    WaitForSelector(WaitForSelectorStep),
    Fill(FillStep),
    Click(Target),
    ClickNewPage(Target),
    Download(DownloadStep),
    /// Action name that no step kind answers to.
    Unknown(String),
    /// Known action whose fields could not be read.
    Malformed { action: String, reason: String },
}

impl Step {
    /// Short name for logging and results.
    pub fn name(&self) -> &str {
        match self {
            Self::Goto(_) => "goto",
            Self::Wait(_) => "wait",
            Self::WaitForSelector(_) => "wait_for_selector",
            Self::Fill(_) => "fill",
            Self::Click(_) => "click",
            Self::ClickNewPage(_) => "click_new_page",
            Self::Download(_) => "download",
            Self::Unknown(name) => name.as_str(),
            Self::Malformed { action, .. } => action.as_str(),
        }
    }

    fn parse(action: &str, raw: &Value) -> std::result::Result<Self, serde_json::Error> {
        let fields = raw.clone();
        Ok(match action {
            "goto" => Self::Goto(serde_json::from_value(fields)?),
            "wait" => Self::Wait(serde_json::from_value(fields)?),
            "wait_for_selector" => Self::WaitForSelector(serde_json::from_value(fields)?),
            "fill" => Self::Fill(serde_json::from_value(fields)?),
            "click" | "click_text" => Self::Click(serde_json::from_value(fields)?),
            "click_new_page" => Self::ClickNewPage(serde_json::from_value(fields)?),
            "download" => Self::Download(serde_json::from_value(fields)?),
            _ => Self::Unknown(action.to_string()),
        })
    }
}

// --- Step payloads ---
//
// Locator fields stay optional here: a missing one is reported when the step
// runs, so the guide still yields one result per attempted step.

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GotoStep {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WaitStep {
    #[serde(default = "default_wait_seconds", deserialize_with = "number_or_string")]
    pub seconds: f64,
}

fn default_wait_seconds() -> f64 {
    1.0
}

/// Accept `2`, `2.5` or `"2"`.
fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(f64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("seconds must be a number, got '{}'", s))),
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WaitForSelectorStep {
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FillStep {
    pub selector: Option<String>,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DownloadStep {
    /// Fetch this URL directly, without the browser.
    pub url: Option<String>,
    /// Element whose click triggers the download.
    #[serde(flatten)]
    pub target: Target,
    /// File name to save under, inside the download directory.
    pub save_as: Option<String>,
}
