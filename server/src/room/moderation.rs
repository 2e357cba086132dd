use std::collections::HashSet;

/// Words always blocked when the filter is on, including common evasions
const BLOCKED_WORDS: &[&str] = &[
    "fuck", "shit", "bitch", "bastard", "asshole", "cunt", "dick", "f4ck", "sh1t", "b1tch", "fvck",
    "fcuk", "phuck",
];

/// Word-level blocklist for chat messages.
///
/// Matching is per word after lowercasing, so blocked words inside longer
/// words do not trigger.
#[derive(Debug, Clone)]
pub struct ProfanityFilter {
    words: HashSet<String>,
}

impl ProfanityFilter {
    pub fn new(extra: &[String]) -> Self {
        let words = BLOCKED_WORDS
            .iter()
            .map(|word| word.to_string())
            .chain(extra.iter().map(|word| word.trim().to_lowercase()))
            .filter(|word| !word.is_empty())
            .collect();
        Self { words }
    }

    pub fn is_profane(&self, message: &str) -> bool {
        message
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .any(|word| self.words.contains(&word.to_lowercase()))
    }
}
