//! Positions within a book

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable description of where a reader is in a book
///
/// Sync treats a locator as opaque apart from its position key: the
/// resource `href` plus the anchor `fragments` within it. Two locators with
/// the same key describe the same position even if their progression
/// values differ slightly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LocatorRepr", into = "LocatorRepr")]
pub struct Locator {
    href: String,
    fragments: Vec<String>,
    progression: Option<f64>,
    total_progression: f64,
    title: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocatorRepr {
    href: String,
    #[serde(default)]
    fragments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    progression: Option<f64>,
    #[serde(default)]
    total_progression: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

impl TryFrom<LocatorRepr> for Locator {
    type Error = CoreError;

    fn try_from(repr: LocatorRepr) -> Result<Self> {
        let mut locator = Locator::new(repr.href)?
            .with_fragments(repr.fragments)
            .with_total_progression(repr.total_progression);
        if let Some(p) = repr.progression {
            locator = locator.with_progression(p);
        }
        if let Some(title) = repr.title {
            locator = locator.with_title(title);
        }
        Ok(locator)
    }
}

impl From<Locator> for LocatorRepr {
    fn from(l: Locator) -> Self {
        Self {
            href: l.href,
            fragments: l.fragments,
            progression: l.progression,
            total_progression: l.total_progression,
            title: l.title,
        }
    }
}

fn clamp_fraction(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

impl Locator {
    /// Creates a locator pointing at the start of a resource
    pub fn new(href: impl Into<String>) -> Result<Self> {
        let href = href.into();
        if href.trim().is_empty() {
            return Err(CoreError::EmptyHref);
        }
        Ok(Self {
            href,
            fragments: Vec::new(),
            progression: None,
            total_progression: 0.0,
            title: None,
        })
    }

    /// Sets the anchor fragments, dropping empty ones
    pub fn with_fragments<I, S>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fragments = fragments
            .into_iter()
            .map(Into::into)
            .filter(|f: &String| !f.is_empty())
            .collect();
        self
    }

    /// Sets the progression within the resource, clamped to [0, 1]
    pub fn with_progression(mut self, progression: f64) -> Self {
        self.progression = Some(clamp_fraction(progression));
        self
    }

    /// Sets the progression through the whole book, clamped to [0, 1]
    pub fn with_total_progression(mut self, total: f64) -> Self {
        self.total_progression = clamp_fraction(total);
        self
    }

    /// Sets a human-readable title (usually the chapter name)
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Parses the compact `href#frag1#frag2@0.42` form
    ///
    /// The `@fraction` suffix is optional and sets the total progression.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| CoreError::InvalidLocator {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (position, total) = match input.rsplit_once('@') {
            Some((position, fraction)) => {
                let total: f64 = fraction
                    .trim()
                    .parse()
                    .map_err(|_| invalid("progression is not a number"))?;
                (position, Some(total))
            }
            None => (input, None),
        };

        let mut parts = position.split('#');
        let href = parts.next().unwrap_or_default().trim();
        if href.is_empty() {
            return Err(invalid("missing href"));
        }

        let mut locator = Self::new(href)?.with_fragments(parts.map(str::trim));
        if let Some(total) = total {
            locator = locator.with_total_progression(total);
        }
        Ok(locator)
    }

    /// Resource identifier
    pub fn href(&self) -> &str {
        &self.href
    }

    /// Anchor ids within the resource
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    /// Progression within the resource, if known
    pub fn progression(&self) -> Option<f64> {
        self.progression
    }

    /// Progression through the whole book
    pub fn total_progression(&self) -> f64 {
        self.total_progression
    }

    /// Chapter title, if known
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// The parts of the locator that identify a position
    pub fn position_key(&self) -> (&str, &[String]) {
        (&self.href, &self.fragments)
    }

    /// Returns true if both locators point at the same position
    pub fn same_position(&self, other: &Locator) -> bool {
        self.position_key() == other.position_key()
    }

    /// Short human-readable description for history lists
    pub fn describe(&self) -> String {
        let percent = (self.total_progression * 100.0).round() as u32;
        match &self.title {
            Some(title) => format!("{} ({}%)", title, percent),
            None => format!("{} ({}%)", self.href, percent),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.href)?;
        for fragment in &self.fragments {
            write!(f, "#{}", fragment)?;
        }
        write!(f, "@{}", self.total_progression)
    }
}
