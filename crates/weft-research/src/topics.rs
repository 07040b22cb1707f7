use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use weft_core::capability::SearchDomain;
use weft_core::error::{Result, WeftError};

/// A section of the company analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Background,
    FinancialHealth,
    MarketPosition,
    RecentNews,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::Background,
        Topic::FinancialHealth,
        Topic::MarketPosition,
        Topic::RecentNews,
    ];

    /// Key used in state, branch keys and request criteria.
    pub fn key(&self) -> &'static str {
        match self {
            Topic::Background => "background",
            Topic::FinancialHealth => "financial_health",
            Topic::MarketPosition => "market_position",
            Topic::RecentNews => "recent_news",
        }
    }

    /// Human-readable section title.
    pub fn display_name(&self) -> &'static str {
        match self {
            Topic::Background => "Background Information",
            Topic::FinancialHealth => "Financial Health",
            Topic::MarketPosition => "Market Position",
            Topic::RecentNews => "Recent News",
        }
    }

    /// What the section should cover.
    pub fn subtopics(&self) -> &'static str {
        match self {
            Topic::Background => "mission, vision, history, leadership, company culture",
            Topic::FinancialHealth => "revenue, profits, debt, stock performance",
            Topic::MarketPosition => "competitors, market share, industry trends",
            Topic::RecentNews => "mergers, acquisitions, product launches, controversies",
        }
    }

    /// Initial research for recent news searches news sources only.
    pub fn search_domain(&self) -> SearchDomain {
        match self {
            Topic::RecentNews => SearchDomain::News,
            _ => SearchDomain::General,
        }
    }

    pub fn from_key(key: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|t| t.key() == key)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Topic {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self> {
        Topic::from_key(s.trim())
            .ok_or_else(|| WeftError::InvalidInput(format!("Unknown topic: '{}'", s.trim())))
    }
}

/// Parse `;`-separated criteria such as `"background;recent_news"`.
///
/// Order is kept and blank entries are skipped. Repeated topics are passed
/// through; the workflow rejects them when it fans out.
pub fn parse_topics(criteria: &str) -> Result<Vec<Topic>> {
    let topics = criteria
        .split(';')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect::<Result<Vec<Topic>>>()?;
    if topics.is_empty() {
        return Err(WeftError::InvalidInput("No topics requested".into()));
    }
    Ok(topics)
}
