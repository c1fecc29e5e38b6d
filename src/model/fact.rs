//! Structured facts: the closed classification schema for an entry.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Entry category. Closed set; classifier output outside it maps to
/// `Other` rather than failing the commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Coding,
    Learning,
    Debugging,
    Research,
    Meeting,
    Planning,
    Blockers,
    Achievement,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Coding,
        Category::Learning,
        Category::Debugging,
        Category::Research,
        Category::Meeting,
        Category::Planning,
        Category::Blockers,
        Category::Achievement,
        Category::Other,
    ];

    /// Lenient parse for classifier output: unknown strings become `Other`.
    pub fn from_classifier(s: &str) -> Self {
        s.parse().unwrap_or(Category::Other)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Coding => "coding",
            Category::Learning => "learning",
            Category::Debugging => "debugging",
            Category::Research => "research",
            Category::Meeting => "meeting",
            Category::Planning => "planning",
            Category::Blockers => "blockers",
            Category::Achievement => "achievement",
            Category::Other => "other",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "coding" => Ok(Category::Coding),
            "learning" => Ok(Category::Learning),
            "debugging" => Ok(Category::Debugging),
            "research" => Ok(Category::Research),
            "meeting" => Ok(Category::Meeting),
            "planning" => Ok(Category::Planning),
            "blockers" => Ok(Category::Blockers),
            "achievement" => Ok(Category::Achievement),
            "other" => Ok(Category::Other),
            other => Err(Error::Other(format!("unknown category: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Sentiment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "positive" => Ok(Sentiment::Positive),
            "neutral" => Ok(Sentiment::Neutral),
            "negative" => Ok(Sentiment::Negative),
            other => Err(Error::Other(format!("unknown sentiment: {other}"))),
        }
    }
}

/// Classification output for one entry. Immutable once stored; a
/// correction is a new entry, not an edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredFact {
    pub category: Category,
    pub activities: Vec<String>,
    pub blockers: Vec<String>,
    pub accomplishments: Vec<String>,
    pub learnings: Vec<String>,
    /// 3-5 lowercase keywords.
    pub keywords: Vec<String>,
    pub sentiment: Sentiment,
    /// Short summary, at most ~50 words.
    pub summary: String,
}

impl StructuredFact {
    /// Normalize classifier output: lowercase keywords, cap them at five,
    /// and truncate runaway summaries.
    pub fn normalized(mut self) -> Self {
        for k in &mut self.keywords {
            *k = k.trim().to_lowercase();
        }
        self.keywords.retain(|k| !k.is_empty());
        self.keywords.truncate(5);
        if self.summary.split_whitespace().count() > 60 {
            self.summary = self
                .summary
                .split_whitespace()
                .take(50)
                .collect::<Vec<_>>()
                .join(" ");
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_category_maps_to_other() {
        assert_eq!(Category::from_classifier("gardening"), Category::Other);
        assert_eq!(Category::from_classifier("debugging"), Category::Debugging);
    }

    #[test]
    fn normalization_lowercases_and_caps_keywords() {
        let fact = StructuredFact {
            category: Category::Coding,
            activities: vec![],
            blockers: vec![],
            accomplishments: vec![],
            learnings: vec![],
            keywords: vec![
                "Rust".into(),
                "ASYNC".into(),
                " sqlx ".into(),
                "pgmq".into(),
                "otel".into(),
                "extra".into(),
            ],
            sentiment: Sentiment::Positive,
            summary: "Shipped the worker loop.".into(),
        }
        .normalized();

        assert_eq!(fact.keywords.len(), 5);
        assert_eq!(fact.keywords[0], "rust");
        assert_eq!(fact.keywords[2], "sqlx");
    }
}
