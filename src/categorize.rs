//! Event categorization by title keywords.
//!
//! Classification priority (first match wins), in declaration order:
//!   1. Work
//!   2. Brand
//!   3. Research
//!   4. Holiday
//!   5. Date
//!   6. Childcare
//! Titles matching nothing (or empty titles) fall back to Research.

use serde::{Deserialize, Serialize};

/// Life category assigned to a calendar event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Work,
    Brand,
    Research,
    Holiday,
    Date,
    Childcare,
}

/// Category used when no keyword matches.
pub const FALLBACK: Category = Category::Research;

/// Static display and matching configuration for one category.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryInfo {
    pub category: Category,
    pub keywords: &'static [&'static str],
    pub color: &'static str,
    pub emoji: &'static str,
}

/// The category table. Order is precedence.
pub const CATEGORIES: &[CategoryInfo] = &[
    CategoryInfo {
        category: Category::Work,
        keywords: &[
            "work",
            "meeting",
            "office",
            "client",
            "call",
            "conference",
            "standup",
            "review",
            "interview",
            "presentation",
        ],
        color: "#007AFF",
        emoji: "💼",
    },
    CategoryInfo {
        category: Category::Brand,
        keywords: &["writing", "posting", "reaching out"],
        color: "#34C759",
        emoji: "🚀",
    },
    CategoryInfo {
        category: Category::Research,
        keywords: &[
            "research",
            "study",
            "analysis",
            "experiment",
            "investigation",
            "learning",
            "course",
            "workshop",
            "reading",
            "explore",
        ],
        color: "#8E8E93",
        emoji: "🔬",
    },
    CategoryInfo {
        category: Category::Holiday,
        keywords: &[
            "holiday", "vacation", "trip", "travel", "flight", "hotel", "beach", "resort",
            "getaway", "break",
        ],
        color: "#FFCC00",
        emoji: "🏖️",
    },
    CategoryInfo {
        category: Category::Date,
        keywords: &[
            "date",
            "dinner",
            "romantic",
            "anniversary",
            "restaurant",
            "movie",
            "theatre",
            "couples",
            "wine",
            "spa",
        ],
        color: "#FF69B4",
        emoji: "💕",
    },
    CategoryInfo {
        category: Category::Childcare,
        keywords: &[
            "seb",
            "sebastian",
            "school",
            "pickup",
            "practice",
            "doctor",
            "pediatric",
            "soccer",
            "swimming",
            "playdate",
            "birthday party",
            "recital",
            "parent-teacher",
            "homework",
        ],
        color: "#AF52DE",
        emoji: "👦",
    },
];

impl Category {
    /// Lowercase label used in settings, JSON and CSS classes.
    pub fn label(self) -> &'static str {
        match self {
            Category::Work => "work",
            Category::Brand => "brand",
            Category::Research => "research",
            Category::Holiday => "holiday",
            Category::Date => "date",
            Category::Childcare => "childcare",
        }
    }

    /// Parse a label case-insensitively. Unknown labels yield `None`.
    pub fn from_label(label: &str) -> Option<Category> {
        let lower = label.trim().to_lowercase();
        CATEGORIES
            .iter()
            .map(|info| info.category)
            .find(|c| c.label() == lower)
    }

    pub fn info(self) -> &'static CategoryInfo {
        CATEGORIES
            .iter()
            .find(|info| info.category == self)
            .unwrap_or(&CATEGORIES[2])
    }

    pub fn color(self) -> &'static str {
        self.info().color
    }

    pub fn emoji(self) -> &'static str {
        self.info().emoji
    }
}

/// Categorize an event title.
///
/// Total over all input: empty titles and titles with no keyword hit
/// return [`FALLBACK`].
pub fn categorize(title: &str) -> Category {
    if title.is_empty() {
        return FALLBACK;
    }

    let lower = title.to_lowercase();
    CATEGORIES
        .iter()
        .find(|info| info.keywords.iter().any(|kw| lower.contains(kw)))
        .map(|info| info.category)
        .unwrap_or(FALLBACK)
}

/// Display color for a category label; unknown labels get the fallback color.
pub fn color_of(label: &str) -> &'static str {
    Category::from_label(label).unwrap_or(FALLBACK).color()
}

/// Display emoji for a category label; unknown labels get the fallback emoji.
pub fn emoji_of(label: &str) -> &'static str {
    Category::from_label(label).unwrap_or(FALLBACK).emoji()
}
