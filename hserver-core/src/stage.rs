//! Pipeline stages and registration options.

use crate::{Error, Verb};
use std::fmt;
use std::str::FromStr;

/// One of the five fixed pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Enter,
    Input,
    Accept,
    Output,
    Leave,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Enter,
        Stage::Input,
        Stage::Accept,
        Stage::Output,
        Stage::Leave,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Enter => "enter",
            Stage::Input => "input",
            Stage::Accept => "accept",
            Stage::Output => "output",
            Stage::Leave => "leave",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enter" => Ok(Stage::Enter),
            "input" => Ok(Stage::Input),
            "accept" => Ok(Stage::Accept),
            "output" => Ok(Stage::Output),
            "leave" => Ok(Stage::Leave),
            other => Err(Error::UnsupportedStage(other.to_string())),
        }
    }
}

/// Options for registering a handler.
///
/// Defaults to the wildcard verb and the `accept` stage. The stage name is
/// kept as given and validated when the handler is registered.
///
/// # Examples
///
/// ```
/// use hserver_core::RouteOptions;
///
/// let options = RouteOptions::new().verb("GET").stage("input");
/// assert_eq!(options.stage_name(), "input");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOptions {
    verbs: Vec<Verb>,
    stage: String,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the handler to a single verb.
    pub fn verb(mut self, verb: impl Into<Verb>) -> Self {
        self.verbs = vec![verb.into()];
        self
    }

    /// Register the handler for several verbs at once.
    pub fn verbs<I, V>(mut self, verbs: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Verb>,
    {
        self.verbs = verbs.into_iter().map(Into::into).collect();
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    pub fn verb_list(&self) -> &[Verb] {
        &self.verbs
    }

    pub fn stage_name(&self) -> &str {
        &self.stage
    }
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            verbs: vec![Verb::any()],
            stage: Stage::Accept.as_str().to_string(),
        }
    }
}
