//! Hybrid classifier.
//!
//! A query runs through a chain of [`ClassificationStrategy`] objects in
//! cost order: the vector strategy decides when the top candidate is clearly
//! above (or clearly below) the thresholds, and the LLM strategy adjudicates
//! what is left. Decisions are cached per run so identical input gives an
//! identical label.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use moka::future::Cache;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ClassifierConfig, RetryPolicy};
use crate::llm::{complete_typed, LlmService};
use crate::store::ScoredPoint;
use crate::TaleforgeError;

// ---------------------------------------------------------------------------
// Query and result types
// ---------------------------------------------------------------------------

/// One option offered to the classifier, with its similarity to the query text.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    /// Human-readable description shown to the LLM.
    pub text: String,
    pub score: f32,
}

impl Candidate {
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            score,
        }
    }

    /// Build from a vector hit; the description is read from the `text`
    /// payload field, falling back to `name`, then the id.
    pub fn from_scored(point: &ScoredPoint) -> Self {
        let text = ["text", "name"]
            .iter()
            .find_map(|k| point.payload.get(*k).and_then(|v| v.as_str()))
            .unwrap_or(point.id.as_str());
        Self::new(point.id.clone(), text, point.score)
    }
}

/// Cheap-tier decision thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub accept: f32,
    pub min_margin: f32,
    pub reject_below: f32,
}

impl From<&ClassifierConfig> for Thresholds {
    fn from(config: &ClassifierConfig) -> Self {
        Self {
            accept: config.accept_threshold,
            min_margin: config.min_margin,
            reject_below: config.reject_below,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifyQuery {
    /// Task name; part of the cache key and the LLM schema name.
    pub task: String,
    pub text: String,
    /// Extra evidence for the LLM (surrounding prose).
    pub context: String,
    /// Sorted by score, highest first.
    pub candidates: Vec<Candidate>,
    pub thresholds: Thresholds,
}

impl ClassifyQuery {
    pub fn new(
        task: impl Into<String>,
        text: impl Into<String>,
        mut candidates: Vec<Candidate>,
        thresholds: Thresholds,
    ) -> Self {
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        Self {
            task: task.into(),
            text: text.into(),
            context: String::new(),
            candidates,
            thresholds,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    fn best(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    fn cache_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.task.hash(&mut hasher);
        self.text.hash(&mut hasher);
        for c in &self.candidates {
            c.id.hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "selection", rename_all = "snake_case")]
pub enum Selection {
    Match { id: String, score: f32 },
    NoMatch,
    /// No tier could decide. `best` is the top vector candidate, if any.
    Ambiguous { best: Option<String>, score: f32 },
}

/// Which tier produced a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Vector,
    Llm,
    /// Every tier was inconclusive or failed; policy default applies.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Labeled<T> {
    pub value: T,
    pub tier: Tier,
    pub confidence: f32,
    pub needs_review: bool,
}

/// What a single strategy concluded.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Decided { selection: Selection, confidence: f32 },
    /// Hand the query to the next strategy.
    Inconclusive,
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ClassificationStrategy: Send + Sync {
    fn tier(&self) -> Tier;

    async fn classify(&self, query: &ClassifyQuery) -> Result<Verdict, TaleforgeError>;
}

/// Nearest-neighbor decision on precomputed similarities.
pub struct VectorStrategy;

#[async_trait]
impl ClassificationStrategy for VectorStrategy {
    fn tier(&self) -> Tier {
        Tier::Vector
    }

    async fn classify(&self, query: &ClassifyQuery) -> Result<Verdict, TaleforgeError> {
        Ok(cheap_verdict(&query.candidates, &query.thresholds))
    }
}

/// Accept, conclusively reject, or escalate. Ties and narrow margins escalate.
/// An empty candidate set is a closed question with no answer: `NoMatch`.
pub fn cheap_verdict(candidates: &[Candidate], t: &Thresholds) -> Verdict {
    let Some(top) = candidates.first() else {
        return Verdict::Decided {
            selection: Selection::NoMatch,
            confidence: 1.0,
        };
    };
    let margin = candidates
        .get(1)
        .map(|second| top.score - second.score)
        .unwrap_or(f32::INFINITY);

    if top.score >= t.accept && margin >= t.min_margin {
        Verdict::Decided {
            selection: Selection::Match {
                id: top.id.clone(),
                score: top.score,
            },
            confidence: top.score,
        }
    } else if top.score < t.reject_below {
        Verdict::Decided {
            selection: Selection::NoMatch,
            confidence: 1.0 - top.score.max(0.0),
        }
    } else {
        Verdict::Inconclusive
    }
}

/// Structured answer of the adjudication prompt.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CandidateChoice {
    /// Id of the matching candidate, or null when none matches.
    pub selected_id: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

pub struct LlmStrategy {
    llm: Arc<dyn LlmService>,
    retry: RetryPolicy,
    schema_retries: u32,
}

impl LlmStrategy {
    pub fn new(llm: Arc<dyn LlmService>, retry: RetryPolicy, schema_retries: u32) -> Self {
        Self {
            llm,
            retry,
            schema_retries,
        }
    }

    fn prompt(query: &ClassifyQuery) -> String {
        let mut prompt = format!(
            "Task: {}\nDecide which candidate, if any, the text refers to.\n\nText: \"{}\"\n",
            query.task, query.text
        );
        if !query.context.is_empty() {
            prompt.push_str(&format!("\nContext:\n{}\n", query.context));
        }
        prompt.push_str("\nCandidates:\n");
        for c in &query.candidates {
            prompt.push_str(&format!("- id: {} | {} (similarity {:.2})\n", c.id, c.text, c.score));
        }
        prompt.push_str("\nAnswer with selected_id set to one candidate id, or null if none matches.");
        prompt
    }
}

#[async_trait]
impl ClassificationStrategy for LlmStrategy {
    fn tier(&self) -> Tier {
        Tier::Llm
    }

    async fn classify(&self, query: &ClassifyQuery) -> Result<Verdict, TaleforgeError> {
        let choice: CandidateChoice = complete_typed(
            self.llm.as_ref(),
            &self.retry,
            self.schema_retries,
            &query.task,
            Self::prompt(query),
        )
        .await?;

        let confidence = choice.confidence.unwrap_or(0.8).clamp(0.0, 1.0);
        let selection = match choice.selected_id {
            None => Selection::NoMatch,
            Some(id) => match query.candidates.iter().find(|c| c.id == id) {
                Some(c) => Selection::Match {
                    id: c.id.clone(),
                    score: c.score,
                },
                None => {
                    warn!(task = %query.task, selected = %id, "LLM picked an id outside the candidate set");
                    Selection::NoMatch
                }
            },
        };
        Ok(Verdict::Decided {
            selection,
            confidence,
        })
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

pub struct Classifier {
    strategies: Vec<Box<dyn ClassificationStrategy>>,
    llm: Arc<dyn LlmService>,
    retry: RetryPolicy,
    config: ClassifierConfig,
    cache: Cache<u64, Labeled<Selection>>,
}

impl Classifier {
    /// Vector tier, then LLM tier.
    pub fn new(llm: Arc<dyn LlmService>, config: ClassifierConfig, retry: RetryPolicy) -> Self {
        let strategies: Vec<Box<dyn ClassificationStrategy>> = vec![
            Box::new(VectorStrategy),
            Box::new(LlmStrategy::new(llm.clone(), retry.clone(), config.schema_retries)),
        ];
        Self::with_strategies(strategies, llm, config, retry)
    }

    pub fn with_strategies(
        strategies: Vec<Box<dyn ClassificationStrategy>>,
        llm: Arc<dyn LlmService>,
        config: ClassifierConfig,
        retry: RetryPolicy,
    ) -> Self {
        let cache = Cache::builder().max_capacity(config.cache_capacity).build();
        Self {
            strategies,
            llm,
            retry,
            config,
            cache,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn default_thresholds(&self) -> Thresholds {
        Thresholds::from(&self.config)
    }

    /// Drop every cached decision. Called at the start of a document run.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    /// `classify(text, candidate_set)`. Never fails: a tier error yields
    /// `Ambiguous` with `needs_review` set.
    ///
    /// The answer is always one of `query.candidates`, so an empty set is
    /// `NoMatch` without an LLM call. Open-world classification, where the
    /// label set is not known up front, goes through [`Classifier::extract`]
    /// with a schema instead.
    pub async fn classify(&self, query: &ClassifyQuery) -> Labeled<Selection> {
        let key = query.cache_key();
        if let Some(cached) = self.cache.get(&key).await {
            debug!(task = %query.task, "classification cache hit");
            return cached;
        }

        let labeled = self.run_chain(query).await;
        self.cache.insert(key, labeled.clone()).await;
        labeled
    }

    async fn run_chain(&self, query: &ClassifyQuery) -> Labeled<Selection> {
        let (best, best_score) = query
            .best()
            .map(|c| (Some(c.id.clone()), c.score))
            .unwrap_or((None, 0.0));

        for strategy in &self.strategies {
            match strategy.classify(query).await {
                Ok(Verdict::Decided {
                    selection,
                    confidence,
                }) => {
                    debug!(task = %query.task, tier = ?strategy.tier(), ?selection, "classified");
                    return Labeled {
                        value: selection,
                        tier: strategy.tier(),
                        confidence,
                        needs_review: false,
                    };
                }
                Ok(Verdict::Inconclusive) => continue,
                Err(e) => {
                    warn!(task = %query.task, tier = ?strategy.tier(), error = %e, "classification tier failed");
                    break;
                }
            }
        }

        Labeled {
            value: Selection::Ambiguous {
                best,
                score: best_score,
            },
            tier: Tier::Fallback,
            confidence: best_score,
            needs_review: true,
        }
    }

    /// Open-world structured extraction.
    pub async fn extract<T>(&self, task: &str, prompt: String) -> Result<T, TaleforgeError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        complete_typed(
            self.llm.as_ref(),
            &self.retry,
            self.config.schema_retries,
            task,
            prompt,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmRequest, NoopLlmService};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedLlm {
        answer: Value,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmService for FixedLlm {
        async fn complete(&self, _request: &LlmRequest) -> Result<Value, TaleforgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn thresholds() -> Thresholds {
        Thresholds {
            accept: 0.88,
            min_margin: 0.05,
            reject_below: 0.45,
        }
    }

    fn classifier(llm: Arc<dyn LlmService>) -> Classifier {
        Classifier::new(
            llm,
            ClassifierConfig::default(),
            RetryPolicy {
                max_attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
        )
    }

    #[test]
    fn test_cheap_tier_accepts_clear_winner() {
        let c = vec![Candidate::new("a", "A", 0.95), Candidate::new("b", "B", 0.5)];
        assert!(matches!(
            cheap_verdict(&c, &thresholds()),
            Verdict::Decided { selection: Selection::Match { .. }, .. }
        ));
    }

    #[test]
    fn test_cheap_tier_escalates_close_pair() {
        let c = vec![Candidate::new("a", "A", 0.92), Candidate::new("b", "B", 0.91)];
        assert_eq!(cheap_verdict(&c, &thresholds()), Verdict::Inconclusive);
    }

    #[test]
    fn test_cheap_tier_rejects_below_floor() {
        let c = vec![Candidate::new("a", "A", 0.2)];
        assert!(matches!(
            cheap_verdict(&c, &thresholds()),
            Verdict::Decided { selection: Selection::NoMatch, .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_candidate_set_never_reaches_llm() {
        let llm = Arc::new(FixedLlm {
            answer: json!({"selected_id": "anything"}),
            calls: AtomicUsize::new(0),
        });
        let classifier = classifier(llm.clone());
        let query = ClassifyQuery::new("pick", "the cat", Vec::new(), thresholds());

        let labeled = classifier.classify(&query).await;
        assert_eq!(labeled.value, Selection::NoMatch);
        assert_eq!(labeled.tier, Tier::Vector);
        assert!(!labeled.needs_review);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_open_world_labels_come_from_extract() {
        #[derive(Debug, Deserialize, JsonSchema)]
        struct MoodLabel {
            label: String,
        }
        let llm = Arc::new(FixedLlm {
            answer: json!({"label": "dread"}),
            calls: AtomicUsize::new(0),
        });
        let classifier = classifier(llm.clone());

        let mood: MoodLabel = classifier
            .extract("mood", "Label the mood of: the fog thickened.".to_string())
            .await
            .unwrap();
        assert_eq!(mood.label, "dread");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_llm_choice_outside_candidates_is_no_match() {
        let llm = Arc::new(FixedLlm {
            answer: json!({"selected_id": "invented"}),
            calls: AtomicUsize::new(0),
        });
        let classifier = classifier(llm);
        let query = ClassifyQuery::new(
            "pick",
            "the cat",
            vec![Candidate::new("mol-1", "Cheshire Cat", 0.7)],
            thresholds(),
        );
        let labeled = classifier.classify(&query).await;
        assert_eq!(labeled.value, Selection::NoMatch);
        assert_eq!(labeled.tier, Tier::Llm);
    }

    #[tokio::test]
    async fn test_identical_queries_hit_the_cache() {
        let llm = Arc::new(FixedLlm {
            answer: json!({"selected_id": "mol-1"}),
            calls: AtomicUsize::new(0),
        });
        let classifier = classifier(llm.clone());
        let query = ClassifyQuery::new(
            "pick",
            "the cat",
            vec![Candidate::new("mol-1", "Cheshire Cat", 0.7)],
            thresholds(),
        );
        let first = classifier.classify(&query).await;
        let second = classifier.classify(&query).await;
        assert_eq!(first, second);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);

        classifier.invalidate();
        classifier.classify(&query).await;
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_llm_failure_is_ambiguous_and_flagged() {
        let classifier = classifier(Arc::new(NoopLlmService));
        let query = ClassifyQuery::new(
            "pick",
            "the cat",
            vec![Candidate::new("mol-1", "Cheshire Cat", 0.7)],
            thresholds(),
        );
        let labeled = classifier.classify(&query).await;
        assert!(labeled.needs_review);
        assert_eq!(
            labeled.value,
            Selection::Ambiguous {
                best: Some("mol-1".into()),
                score: 0.7
            }
        );
    }
}
