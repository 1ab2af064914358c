//! View loading: fragment names, the content region, navigation highlighting
//! and the loading indicator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_VIEW_NAME_LENGTH: usize = 64;

/// Parameters passed along with a navigation request to the view's setup.
pub type ViewParams = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewName {
    Home,
    MyPdfs,
    Camera,
    /// A fragment the server knows about but that has no lifecycle behavior.
    Custom(String),
}

impl ViewName {
    pub fn parse(name: &str) -> Result<Self, LoadFailure> {
        match name {
            "home" => Ok(ViewName::Home),
            "my_pdfs" => Ok(ViewName::MyPdfs),
            "camera" => Ok(ViewName::Camera),
            other => {
                Self::validate_custom(other)?;
                Ok(ViewName::Custom(other.to_string()))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ViewName::Home => "home",
            ViewName::MyPdfs => "my_pdfs",
            ViewName::Camera => "camera",
            ViewName::Custom(name) => name.as_str(),
        }
    }

    fn validate_custom(name: &str) -> Result<(), LoadFailure> {
        let invalid = |reason: &str| LoadFailure::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("name cannot be empty"));
        }
        if name.len() > MAX_VIEW_NAME_LENGTH {
            return Err(invalid("name is too long"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid("name contains invalid characters"));
        }
        Ok(())
    }
}

impl fmt::Display for ViewName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadFailure {
    #[error("invalid view name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("could not load view: HTTP {status}")]
    Status { status: u16 },

    #[error("could not load view: {message}")]
    Network { message: String },

    #[error("view fragment is not valid UTF-8")]
    Decode,

    #[error("could not build fragment URL: {reason}")]
    Url { reason: String },
}

/// What the single content region currently shows.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    #[default]
    Empty,
    Fragment { view: String, markup: String },
    Error { message: String },
}

impl Content {
    pub fn load_error(name: &str) -> Self {
        Content::Error {
            message: format!("Error loading page: {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavEntry {
    pub view: ViewName,
    pub label: &'static str,
}

pub static NAV_ENTRIES: [NavEntry; 3] = [
    NavEntry {
        view: ViewName::Home,
        label: "Home",
    },
    NavEntry {
        view: ViewName::Camera,
        label: "Scan",
    },
    NavEntry {
        view: ViewName::MyPdfs,
        label: "My PDFs",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLoad {
    pub generation: u64,
    pub view: ViewName,
    pub params: ViewParams,
}

/// A load that finished and should be applied to the view lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    Loaded { view: ViewName, params: ViewParams },
    Failed { view: ViewName, failure: LoadFailure },
}

#[derive(Debug, Default)]
pub struct ViewLoader {
    generation: u64,
    pending: Option<PendingLoad>,
    content: Content,
    active: Option<ViewName>,
}

impl ViewLoader {
    /// Starts a load, superseding any load still in flight.
    ///
    /// An invalid name settles immediately: the content region shows the error
    /// and nothing is left pending.
    pub fn begin(&mut self, name: &str, params: ViewParams) -> Result<PendingLoad, LoadFailure> {
        self.generation += 1;

        match ViewName::parse(name) {
            Ok(view) => {
                let pending = PendingLoad {
                    generation: self.generation,
                    view,
                    params,
                };
                self.pending = Some(pending.clone());
                Ok(pending)
            }
            Err(failure) => {
                self.pending = None;
                self.active = None;
                self.content = Content::load_error(name);
                Err(failure)
            }
        }
    }

    /// Applies a fetch result. Returns `None` for responses of superseded loads.
    pub fn finish(
        &mut self,
        generation: u64,
        outcome: Result<String, LoadFailure>,
    ) -> Option<Settled> {
        if self.pending.as_ref().map(|p| p.generation) != Some(generation) {
            tracing::debug!(generation, current = self.generation, "ignoring stale fragment");
            return None;
        }
        let pending = self.pending.take()?;

        match outcome {
            Ok(markup) => {
                self.content = Content::Fragment {
                    view: pending.view.as_str().to_string(),
                    markup,
                };
                self.active = Some(pending.view.clone());
                Some(Settled::Loaded {
                    view: pending.view,
                    params: pending.params,
                })
            }
            Err(failure) => {
                self.content = Content::load_error(pending.view.as_str());
                self.active = None;
                Some(Settled::Failed {
                    view: pending.view,
                    failure,
                })
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&PendingLoad> {
        self.pending.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn active_view(&self) -> Option<&ViewName> {
        self.active.as_ref()
    }

    /// Navigation entries paired with whether each is highlighted.
    pub fn nav(&self) -> impl Iterator<Item = (&'static NavEntry, bool)> + '_ {
        NAV_ENTRIES
            .iter()
            .map(move |entry| (entry, self.active.as_ref() == Some(&entry.view)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_views() {
        assert_eq!(ViewName::parse("home"), Ok(ViewName::Home));
        assert_eq!(ViewName::parse("my_pdfs"), Ok(ViewName::MyPdfs));
        assert_eq!(ViewName::parse("camera"), Ok(ViewName::Camera));
        assert_eq!(
            ViewName::parse("settings"),
            Ok(ViewName::Custom("settings".into()))
        );
    }

    #[test]
    fn test_parse_rejects_traversal_and_empty() {
        assert!(ViewName::parse("").is_err());
        assert!(ViewName::parse("../secrets").is_err());
        assert!(ViewName::parse("a/b").is_err());
        assert!(ViewName::parse(&"x".repeat(MAX_VIEW_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_successful_load_highlights_exactly_one_entry() {
        let mut loader = ViewLoader::default();
        let pending = loader.begin("my_pdfs", ViewParams::new()).unwrap();
        assert!(loader.is_loading());

        let settled = loader.finish(pending.generation, Ok("<div></div>".into()));
        assert!(matches!(settled, Some(Settled::Loaded { view: ViewName::MyPdfs, .. })));
        assert!(!loader.is_loading());

        let active: Vec<_> = loader
            .nav()
            .filter(|(_, active)| *active)
            .map(|(entry, _)| entry.view.clone())
            .collect();
        assert_eq!(active, vec![ViewName::MyPdfs]);
    }

    #[test]
    fn test_failed_load_shows_inline_error_and_clears_indicator() {
        let mut loader = ViewLoader::default();
        let pending = loader.begin("settings", ViewParams::new()).unwrap();
        let settled = loader.finish(pending.generation, Err(LoadFailure::Status { status: 404 }));

        assert!(matches!(settled, Some(Settled::Failed { .. })));
        assert!(!loader.is_loading());
        assert_eq!(loader.content(), &Content::load_error("settings"));
        assert!(loader.nav().all(|(_, active)| !active));
    }

    #[test]
    fn test_invalid_name_settles_immediately() {
        let mut loader = ViewLoader::default();
        loader.begin("home", ViewParams::new()).unwrap();

        let result = loader.begin("../etc/passwd", ViewParams::new());
        assert!(matches!(result, Err(LoadFailure::InvalidName { .. })));
        assert!(!loader.is_loading());
        assert!(matches!(loader.content(), Content::Error { .. }));
    }

    #[test]
    fn test_stale_response_is_ignored() {
        let mut loader = ViewLoader::default();
        let first = loader.begin("home", ViewParams::new()).unwrap();
        let second = loader.begin("camera", ViewParams::new()).unwrap();

        assert_eq!(loader.finish(first.generation, Ok("home".into())), None);
        assert!(loader.is_loading());

        let settled = loader.finish(second.generation, Ok("camera".into()));
        assert!(matches!(settled, Some(Settled::Loaded { view: ViewName::Camera, .. })));
        assert_eq!(loader.active_view(), Some(&ViewName::Camera));
    }
}
