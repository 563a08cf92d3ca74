//! Human-readable cluster labels via LLM generation.
//!
//! For each cluster the labeler selects the members closest to the centroid,
//! asks the text generator for a short descriptive label, and runs the raw
//! output through a validation pipeline (title-casing, banned/generic term
//! rejection, length checks, de-duplication). Any failure falls back to a
//! synthetic `Cluster_{id}` label; labeling never fails a run.
//!
//! The used-label set and validation statistics are instance state scoped to
//! one labeler, which is constructed fresh per clustering run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::LabelingConfig;
use crate::generation::TextGenerator;
use crate::services::clustering::{ClusterResult, DetectedCluster};
use crate::services::embedding_source::EmbeddingExtraction;
use crate::PodgraphError;

/// Labels rejected on exact (case-insensitive) match: generic words and
/// podcast-structural jargon that say nothing about the cluster's theme.
const BANNED_LABELS: &[&str] = &[
    "podcast",
    "episode",
    "episodes",
    "discussion",
    "conversation",
    "interview",
    "topics",
    "themes",
    "content",
    "general",
    "misc",
    "miscellaneous",
    "various",
    "other",
    "intro",
    "introduction",
    "outro",
    "sponsor",
    "advertisement",
    "recap",
    "summary",
    "highlights",
];

/// Labels rejected when they contain any of these as a substring.
const GENERIC_SUBSTRINGS: &[&str] = &["thing", "stuff", "topic", "cluster", "group", "misc"];

/// Validation statistics for one labeling run. Diagnostic only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LabelStats {
    pub total_generated: usize,
    pub fallbacks: usize,
    pub rejected_empty: usize,
    pub rejected_banned: usize,
    pub rejected_generic: usize,
    pub rejected_too_short: usize,
    pub rejected_numeric: usize,
    pub truncated: usize,
    pub duplicates_resolved: usize,
}

/// Title-case a label, preserving apostrophes and short acronyms.
///
/// - letters directly after an apostrophe stay lowercase ("Women's", never
///   "Women'S");
/// - all-caps words longer than 3 characters collapse to capitalized form;
/// - all-caps words of up to 3 characters are left as acronyms ("AI", "NBA").
pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case_word(word: &str) -> String {
    let alpha_count = word.chars().filter(|c| c.is_alphabetic()).count();
    let is_all_caps = alpha_count > 0
        && word
            .chars()
            .filter(|c| c.is_alphabetic())
            .all(|c| c.is_uppercase());
    if is_all_caps && word.chars().count() <= 3 {
        return word.to_string();
    }

    let mut out = String::with_capacity(word.len());
    let mut seen_alpha = false;
    for c in word.chars() {
        if c.is_alphabetic() {
            if seen_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
                seen_alpha = true;
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Run the raw LLM output through the validation pipeline.
///
/// Returns the cleaned label, or `None` when the caller must fall back to a
/// synthetic label. `budget` is the word limit (3 normally, 5 when widened
/// for duplicate resolution).
pub fn validate_label(raw: &str, budget: usize, stats: &mut LabelStats) -> Option<String> {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '*' || c == '.');
    if trimmed.trim().is_empty() {
        stats.rejected_empty += 1;
        return None;
    }

    let mut label = title_case(trimmed);

    let words: Vec<&str> = label.split_whitespace().collect();
    if words.len() > budget {
        label = words[..budget].join(" ");
        stats.truncated += 1;
    }

    let lowered = label.to_lowercase();
    if BANNED_LABELS.contains(&lowered.as_str()) {
        stats.rejected_banned += 1;
        return None;
    }
    if GENERIC_SUBSTRINGS.iter().any(|term| lowered.contains(term)) {
        stats.rejected_generic += 1;
        return None;
    }

    let stripped: String = label.chars().filter(|c| !c.is_whitespace()).collect();
    if stripped.chars().count() < 3 {
        stats.rejected_too_short += 1;
        return None;
    }
    if stripped.chars().all(|c| c.is_ascii_digit()) {
        stats.rejected_numeric += 1;
        return None;
    }

    Some(label)
}

/// Generates and validates labels for one clustering run.
pub struct ClusterLabeler {
    generator: Arc<dyn TextGenerator>,
    config: LabelingConfig,
    used_labels: HashSet<String>,
    stats: LabelStats,
}

impl ClusterLabeler {
    pub fn new(generator: Arc<dyn TextGenerator>, config: LabelingConfig) -> Self {
        Self {
            generator,
            config,
            used_labels: HashSet::new(),
            stats: LabelStats::default(),
        }
    }

    /// Produce a label per cluster id. Per-cluster failures fall back to
    /// `Cluster_{id}`; this method itself never fails.
    pub async fn generate_labels(
        &mut self,
        result: &ClusterResult,
        extraction: &EmbeddingExtraction,
    ) -> HashMap<i64, String> {
        let index: HashMap<&str, usize> = extraction
            .unit_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut labels = HashMap::with_capacity(result.clusters.len());
        for cluster in &result.clusters {
            let summaries = self.representative_summaries(cluster, extraction, &index);
            let label = self.label_cluster(cluster.cluster_id, &summaries).await;
            self.used_labels.insert(label.clone());
            labels.insert(cluster.cluster_id, label);
        }
        labels
    }

    /// Validation statistics accumulated so far in this run.
    pub fn stats(&self) -> &LabelStats {
        &self.stats
    }

    /// Drain this run's statistics and reset the dedup set for the next run.
    pub fn take_stats(&mut self) -> LabelStats {
        self.used_labels.clear();
        std::mem::take(&mut self.stats)
    }

    /// Top member summaries ranked by centroid similarity.
    fn representative_summaries<'a>(
        &self,
        cluster: &DetectedCluster,
        extraction: &'a EmbeddingExtraction,
        index: &HashMap<&str, usize>,
    ) -> Vec<&'a str> {
        let mut ranked: Vec<&crate::services::clustering::ClusterMember> =
            cluster.members.iter().collect();
        // Confidence is exactly the member's centroid similarity.
        ranked.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
            .iter()
            .take(self.config.representatives)
            .filter_map(|m| index.get(m.unit_id.as_str()))
            .map(|&i| extraction.summaries[i].as_str())
            .collect()
    }

    async fn label_cluster(&mut self, cluster_id: i64, summaries: &[&str]) -> String {
        self.stats.total_generated += 1;
        let fallback = format!("Cluster_{}", cluster_id);

        let raw = match self.request_label(summaries, self.config.max_words).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    "Label generation failed for cluster {}: {}. Using fallback",
                    cluster_id, e
                );
                self.stats.fallbacks += 1;
                return fallback;
            }
        };

        let Some(label) = validate_label(&raw, self.config.max_words, &mut self.stats) else {
            debug!(
                "Label '{}' for cluster {} rejected by validation. Using fallback",
                raw.trim(),
                cluster_id
            );
            self.stats.fallbacks += 1;
            return fallback;
        };

        if !self.used_labels.contains(&label) {
            return label;
        }

        // Collision: one regeneration with a widened word budget, then
        // numeric suffixes, then the synthetic fallback.
        if let Ok(raw) = self
            .request_label(summaries, self.config.widened_max_words)
            .await
        {
            if let Some(widened) = validate_label(&raw, self.config.widened_max_words, &mut self.stats)
            {
                if !self.used_labels.contains(&widened) {
                    self.stats.duplicates_resolved += 1;
                    return widened;
                }
            }
        }

        for suffix in 2..=10 {
            let candidate = format!("{} {}", label, suffix);
            if !self.used_labels.contains(&candidate) {
                self.stats.duplicates_resolved += 1;
                return candidate;
            }
        }

        warn!(
            "Could not de-duplicate label '{}' for cluster {}. Using fallback",
            label, cluster_id
        );
        self.stats.fallbacks += 1;
        fallback
    }

    /// One LLM call with up to `llm_attempts` tries and linearly growing
    /// delays (base, 2*base, ...). The last error propagates.
    async fn request_label(
        &self,
        summaries: &[&str],
        max_words: usize,
    ) -> Result<String, PodgraphError> {
        let prompt = self.build_prompt(summaries, max_words);
        let attempts = self.config.llm_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match self
                .generator
                .generate(&prompt, self.config.temperature)
                .await
            {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if attempt < attempts {
                        let delay =
                            Duration::from_millis(self.config.llm_retry_base_ms * attempt as u64);
                        debug!(
                            "Label request failed (attempt {}/{}): {}. Retrying in {:?}",
                            attempt, attempts, e, delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| PodgraphError::Generation("label request never attempted".into())))
    }

    fn build_prompt(&self, summaries: &[&str], max_words: usize) -> String {
        let mut prompt = format!(
            "The following podcast transcript excerpts belong to one semantic cluster.\n\
             Reply with a thematically specific, title-cased label of at most {} words.\n\
             Reply with the label only.\n\nExcerpts:\n",
            max_words
        );
        for (i, summary) in summaries.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, summary));
        }
        prompt
    }
}
