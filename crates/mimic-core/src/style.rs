//! Rolling style statistics for a conversation.
//!
//! Every update folds one message into the profile in constant time: averages
//! use a cumulative mean during warm-up and an exponential moving average
//! afterwards, and vocabulary is a bounded Space-Saving counter. Nothing here
//! ever rescans history.

use crate::config::StyleConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Words too common to say anything about a group's style.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "him", "his", "how", "its", "let", "she", "too", "use", "that",
    "this", "with", "have", "from", "they", "will", "what", "when", "your", "just", "there",
    "then", "them", "were", "been", "than", "into", "about",
];

/// Casual markers that pull the formality score down.
const SLANG: &[&str] = &[
    "lol", "lmao", "rofl", "omg", "idk", "imo", "tbh", "btw", "pls", "plz", "thx", "ty", "u",
    "ur", "ya", "yeah", "yep", "nah", "gonna", "wanna", "haha", "hahaha", "bruh", "k",
];

/// Aggregated style statistics for one conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleProfile {
    /// Number of messages folded in so far.
    pub message_count: u64,
    /// Smoothed message length in characters.
    pub avg_message_length: f64,
    /// Smoothed emoji-per-character ratio.
    pub emoji_rate: f64,
    /// Smoothed formality in `[0, 1]` (1 = capitalized, punctuated, no slang).
    pub formality_score: f64,
    /// Bounded term frequency counter.
    #[serde(default)]
    pub top_terms: BTreeMap<String, u64>,
}

impl StyleProfile {
    /// Return a new profile with `text` folded in. Empty text leaves it unchanged.
    pub fn updated(&self, text: &str, config: &StyleConfig) -> StyleProfile {
        let text = text.trim();
        if text.is_empty() {
            return self.clone();
        }

        let mut next = self.clone();
        next.message_count += 1;

        let alpha = smoothing_factor(next.message_count, config.window);
        let length = text.chars().count() as f64;
        let emojis = text.chars().filter(|c| is_emoji(*c)).count() as f64;

        next.avg_message_length = blend(self.avg_message_length, length, alpha);
        next.emoji_rate = blend(self.emoji_rate, emojis / length.max(1.0), alpha);
        next.formality_score = blend(self.formality_score, formality_of(text), alpha);

        for term in terms(text, config.min_term_length) {
            next.record_term(term, config.max_terms);
        }

        next
    }

    /// Most frequent terms, highest count first, ties in alphabetical order.
    pub fn top(&self, n: usize) -> Vec<&str> {
        let mut ranked: Vec<(&String, &u64)> = self.top_terms.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        ranked.into_iter().take(n).map(|(t, _)| t.as_str()).collect()
    }

    /// Render prompt hints describing how the group writes, or `None` while
    /// nothing has been observed.
    pub fn guidance(&self) -> Option<String> {
        if self.message_count == 0 {
            return None;
        }

        let mut hints = Vec::new();

        let common = self.top(5);
        if !common.is_empty() {
            hints.push(format!("Common slang/words: {}.", common.join(", ")));
        }

        if self.avg_message_length <= 40.0 {
            hints.push("Keep replies short and punchy.".to_string());
        } else if self.avg_message_length >= 120.0 {
            hints.push("Longer, more detailed replies are acceptable.".to_string());
        }

        if self.emoji_rate >= 0.02 {
            hints.push("Use emojis occasionally if it feels natural.".to_string());
        } else if self.emoji_rate <= 0.005 {
            hints.push("Avoid emojis unless the user uses them first.".to_string());
        }

        if self.formality_score >= 0.7 {
            hints.push("Write with proper capitalization and punctuation.".to_string());
        } else if self.formality_score <= 0.3 {
            hints.push("Keep it casual, lowercase and loose punctuation are fine.".to_string());
        }

        Some(format!("Style notes: {}", hints.join(" ")))
    }

    /// Space-Saving insert: a new term replaces the least frequent one and
    /// inherits its count plus one.
    fn record_term(&mut self, term: String, max_terms: usize) {
        if max_terms == 0 {
            return;
        }
        if let Some(count) = self.top_terms.get_mut(&term) {
            *count += 1;
            return;
        }
        if self.top_terms.len() < max_terms {
            self.top_terms.insert(term, 1);
            return;
        }

        // Least frequent, alphabetically first on ties (BTreeMap order).
        let evicted = self
            .top_terms
            .iter()
            .min_by_key(|(_, count)| **count)
            .map(|(t, c)| (t.clone(), *c));
        if let Some((victim, floor)) = evicted {
            self.top_terms.remove(&victim);
            self.top_terms.insert(term, floor + 1);
        }
    }
}

/// Cumulative mean until `window` samples are seen, then a fixed EMA factor.
fn smoothing_factor(count: u64, window: usize) -> f64 {
    let ema = 2.0 / (window.max(1) as f64 + 1.0);
    let cumulative = 1.0 / count.max(1) as f64;
    cumulative.max(ema)
}

fn blend(previous: f64, sample: f64, alpha: f64) -> f64 {
    previous + alpha * (sample - previous)
}

/// Pictographs, symbols and regional indicators.
pub fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F300..=0x1FAFF | 0x2600..=0x27BF | 0x1F1E6..=0x1F1FF
    )
}

/// Lowercased word tokens worth counting.
fn terms(text: &str, min_len: usize) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| w.chars().count() >= min_len)
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Per-message formality in `[0, 1]`, the share of formal signals present.
fn formality_of(text: &str) -> f64 {
    let mut signals = 0u32;

    let starts_upper = text
        .chars()
        .find(|c| c.is_alphabetic())
        .map(|c| c.is_uppercase())
        .unwrap_or(false);
    if starts_upper {
        signals += 1;
    }

    if text.ends_with(['.', '!', '?']) {
        signals += 1;
    }

    if !text.chars().any(is_emoji) {
        signals += 1;
    }

    let has_slang = text
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| SLANG.contains(&w.to_lowercase().as_str()));
    if !has_slang {
        signals += 1;
    }

    if !has_elongation(text) {
        signals += 1;
    }

    f64::from(signals) / 5.0
}

/// Three or more of the same character in a row ("sooo", "!!!").
fn has_elongation(text: &str) -> bool {
    let mut prev = None;
    let mut run = 0;
    for c in text.chars() {
        if Some(c) == prev {
            run += 1;
            if run >= 3 {
                return true;
            }
        } else {
            prev = Some(c);
            run = 1;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StyleConfig {
        StyleConfig {
            window: 50,
            max_terms: 3,
            min_term_length: 3,
        }
    }

    #[test]
    fn test_first_message_seeds_averages() {
        let p = StyleProfile::default().updated("hello world", &config());
        assert_eq!(p.message_count, 1);
        assert_eq!(p.avg_message_length, 11.0);
        assert_eq!(p.emoji_rate, 0.0);
    }

    #[test]
    fn test_warmup_is_cumulative_mean() {
        let cfg = config();
        let p = StyleProfile::default()
            .updated("aaaa bbbb", &cfg) // 9 chars
            .updated("c", &cfg); // 1 char
        assert!((p.avg_message_length - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_after_window_uses_ema() {
        let cfg = StyleConfig {
            window: 3,
            ..config()
        };
        let mut p = StyleProfile::default();
        for _ in 0..10 {
            p = p.updated("abcd", &cfg);
        }
        let before = p.avg_message_length;
        let p = p.updated("abcdefgh", &cfg);
        // alpha = 2 / (3 + 1) = 0.5
        assert!((p.avg_message_length - (before + 0.5 * (8.0 - before))).abs() < 1e-9);
    }

    #[test]
    fn test_empty_text_is_noop() {
        let p = StyleProfile::default().updated("hey there", &config());
        assert_eq!(p.updated("   ", &config()), p);
    }

    #[test]
    fn test_emoji_rate() {
        let p = StyleProfile::default().updated("ok \u{1F600}", &config());
        assert!((p.emoji_rate - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_term_counter_is_bounded_and_evicts_least_frequent() {
        let cfg = config();
        let p = StyleProfile::default()
            .updated("pizza pizza pizza", &cfg)
            .updated("tacos tacos", &cfg)
            .updated("sushi", &cfg)
            .updated("ramen", &cfg);

        assert_eq!(p.top_terms.len(), 3);
        assert_eq!(p.top_terms.get("pizza"), Some(&3));
        assert_eq!(p.top_terms.get("tacos"), Some(&2));
        // sushi (count 1) was the least frequent and got replaced.
        assert!(!p.top_terms.contains_key("sushi"));
        assert_eq!(p.top_terms.get("ramen"), Some(&2));
    }

    #[test]
    fn test_stopwords_digits_and_short_words_ignored() {
        let p = StyleProfile::default().updated("the 2024 ok and vibes", &config());
        assert_eq!(p.top(10), vec!["vibes"]);
    }

    #[test]
    fn test_updates_are_deterministic() {
        let cfg = config();
        let msgs = ["Good morning!", "lol sooo tired", "coffee time \u{2615}", "Coffee again."];
        let run = || {
            msgs.iter()
                .fold(StyleProfile::default(), |p, m| p.updated(m, &cfg))
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_formality_extremes() {
        assert_eq!(formality_of("Good morning, everyone."), 1.0);
        assert!(formality_of("lol sooo tired \u{1F634}") < 0.3);
    }

    #[test]
    fn test_guidance_empty_profile() {
        assert!(StyleProfile::default().guidance().is_none());
    }

    #[test]
    fn test_guidance_short_casual_emoji() {
        let mut p = StyleProfile::default();
        for _ in 0..5 {
            p = p.updated("lol yes \u{1F602}\u{1F602}", &config());
        }
        let g = p.guidance().unwrap();
        assert!(g.starts_with("Style notes:"));
        assert!(g.contains("short and punchy"));
        assert!(g.contains("Use emojis"));
        assert!(g.contains("casual"));
        assert!(g.contains("yes"));
    }
}
