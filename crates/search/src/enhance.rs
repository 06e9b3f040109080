use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use unicode_segmentation::UnicodeSegmentation;

/// What the caller appears to be asking for. The first matching intent wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Analysis,
    Comparison,
    RootCause,
    Trend,
    Urgency,
}

const INTENT_CUES: &[(QueryIntent, &[&str])] = &[
    (
        QueryIntent::Analysis,
        &["what", "how many", "list", "show", "find"],
    ),
    (
        QueryIntent::Comparison,
        &["compare", "vs", "versus", "difference", "similar"],
    ),
    (QueryIntent::RootCause, &["why", "reason", "cause", "root cause"]),
    (
        QueryIntent::Trend,
        &["trend", "pattern", "over time", "recent", "last"],
    ),
    (
        QueryIntent::Urgency,
        &["urgent", "critical", "immediate", "emergency"],
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancerConfig {
    pub enabled: bool,
    /// Query variants searched per request, the original text included
    pub max_variants: usize,
    /// Replacements tried for each expandable term
    pub expansions_per_term: usize,
    /// Product name -> cue phrases that mention it
    pub products: BTreeMap<String, Vec<String>>,
    /// Term -> replacement terms
    pub expansions: BTreeMap<String, Vec<String>>,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_variants: 2,
            expansions_per_term: 2,
            products: table(&[
                (
                    "credit card",
                    &["credit card", "card", "credit", "visa", "mastercard", "amex"],
                ),
                ("personal loan", &["personal loan", "loan", "borrowing", "debt"]),
                (
                    "savings account",
                    &["savings account", "savings", "account", "deposit"],
                ),
                (
                    "money transfers",
                    &["money transfer", "transfer", "wire", "send money", "remittance"],
                ),
            ]),
            expansions: table(&[
                ("fee", &["charge", "cost", "payment"]),
                ("delay", &["slow", "late", "waiting"]),
                ("fraud", &["unauthorized", "theft", "scam"]),
                ("interest", &["rate", "percentage", "yield"]),
            ]),
        }
    }
}

fn table(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(key, values)| {
            (
                (*key).to_string(),
                values.iter().map(|v| (*v).to_string()).collect(),
            )
        })
        .collect()
}

impl EnhancerConfig {
    /// Pass-through: every query is searched as written.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_variants: 1,
            expansions_per_term: 0,
            products: BTreeMap::new(),
            expansions: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_variants == 0 {
            return Err("enhancer max_variants must be > 0".to_string());
        }
        Ok(())
    }
}

/// Products, intent and expandable terms found in one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryAnalysis {
    pub products: Vec<String>,
    pub intent: QueryIntent,
    pub expandable_terms: Vec<String>,
}

/// Rewrites a query into a short, ordered list of search variants.
#[derive(Debug, Clone)]
pub struct QueryEnhancer {
    config: EnhancerConfig,
}

impl Default for QueryEnhancer {
    fn default() -> Self {
        Self::new(EnhancerConfig::disabled())
    }
}

impl QueryEnhancer {
    #[must_use]
    pub const fn new(config: EnhancerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &EnhancerConfig {
        &self.config
    }

    #[must_use]
    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        let words = words(query);
        let mentions = |cue: &str| contains_phrase(&words, cue);

        let products = self
            .config
            .products
            .iter()
            .filter(|(_, cues)| cues.iter().any(|cue| mentions(cue.as_str())))
            .map(|(product, _)| product.clone())
            .collect();
        let intent = INTENT_CUES
            .iter()
            .find(|(_, cues)| cues.iter().any(|cue| mentions(*cue)))
            .map_or(QueryIntent::Analysis, |(intent, _)| *intent);
        let expandable_terms = self
            .config
            .expansions
            .keys()
            .filter(|term| mentions(term.as_str()))
            .cloned()
            .collect();

        QueryAnalysis {
            products,
            intent,
            expandable_terms,
        }
    }

    /// The query itself first, then product, intent and synonym rewrites.
    ///
    /// Duplicates are dropped and the list is cut to `max_variants`.
    #[must_use]
    pub fn variants(&self, query: &str) -> Vec<String> {
        let query = query.trim();
        let mut variants = vec![query.to_string()];
        if !self.config.enabled || self.config.max_variants <= 1 {
            return variants;
        }

        let analysis = self.analyze(query);
        let mut candidates: Vec<String> = analysis
            .products
            .iter()
            .map(|product| format!("{query} {product}"))
            .collect();
        match analysis.intent {
            QueryIntent::Comparison => candidates.push(format!("compare {query}")),
            QueryIntent::RootCause => candidates.push(format!("reason for {query}")),
            _ => {}
        }
        for term in &analysis.expandable_terms {
            let replacements = self.config.expansions.get(term).into_iter().flatten();
            for replacement in replacements.take(self.config.expansions_per_term) {
                candidates.push(replace_word(query, term, replacement));
            }
        }

        for candidate in candidates {
            if variants.len() == self.config.max_variants {
                break;
            }
            if !variants.contains(&candidate) {
                variants.push(candidate);
            }
        }
        variants
    }
}

fn words(text: &str) -> Vec<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

/// Whole-word, case-insensitive phrase match.
fn contains_phrase(haystack: &[String], phrase: &str) -> bool {
    let phrase = words(phrase);
    !phrase.is_empty() && haystack.windows(phrase.len()).any(|window| window == phrase.as_slice())
}

/// Lowercased `text` with every whole-word `term` swapped for `replacement`.
fn replace_word(text: &str, term: &str, replacement: &str) -> String {
    text.to_lowercase()
        .split_word_bounds()
        .map(|segment| if segment == term { replacement } else { segment })
        .collect()
}
