//! Read-time relevance ranking and query grounding
//!
//! Facts are scored against a query with a cheap keyword heuristic: topic
//! token hits, entity containment, and content token hits. Grounding
//! composes the ranked facts with a couple of semantically similar
//! episodic memories into a single context-enriched query string.

use crate::config::MemoryConfig;
use crate::episodic::EpisodicStore;
use crate::error::MnemoResult;
use crate::facts::{FactRecord, FactStore};
use std::sync::Arc;

/// A fact scored against a query
#[derive(Debug, Clone)]
pub struct RankedFact {
    /// Fact-sheet topic
    pub topic: String,

    /// Fact statement
    pub content: String,

    /// Entities on the record
    pub entities: Vec<String>,

    /// Record category
    pub category: String,

    /// Relevance score (always > 0 for returned facts)
    pub score: u32,
}

/// Score one fact against a query.
///
/// +2 if any whitespace-split query token appears in the topic,
/// +3 per entity whose text appears in the query,
/// +1 if any query token longer than 3 characters appears in the content.
/// All comparisons are case-insensitive substring checks.
pub fn score_fact(query: &str, topic: &str, record: &FactRecord) -> u32 {
    let query_lower = query.to_lowercase();
    let tokens: Vec<&str> = query_lower.split_whitespace().collect();

    let topic_lower = topic.to_lowercase();
    let content_lower = record.content.to_lowercase();

    let mut score = 0;

    if tokens.iter().any(|t| topic_lower.contains(t)) {
        score += 2;
    }

    for entity in &record.metadata.entities {
        // An empty entity is contained in every query; never count it.
        if !entity.is_empty() && query_lower.contains(&entity.to_lowercase()) {
            score += 3;
        }
    }

    if tokens
        .iter()
        .any(|t| t.len() > 3 && content_lower.contains(t))
    {
        score += 1;
    }

    score
}

/// Rank a fact-sheet snapshot against a query: zero-score facts are
/// dropped, the rest sorted by descending score (ties keep encounter
/// order) and truncated to `max`.
pub fn rank_facts(query: &str, sheet: &[(String, FactRecord)], max: usize) -> Vec<RankedFact> {
    let mut ranked: Vec<RankedFact> = sheet
        .iter()
        .filter_map(|(topic, record)| {
            let score = score_fact(query, topic, record);
            (score > 0).then(|| RankedFact {
                topic: topic.clone(),
                content: record.content.clone(),
                entities: record.metadata.entities.clone(),
                category: record.metadata.category.clone(),
                score,
            })
        })
        .collect();

    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked.truncate(max);
    ranked
}

/// Enriches queries with relevant facts and episodic memories before they
/// reach the chat model
pub struct Grounder {
    facts: Arc<FactStore>,
    episodic: Arc<EpisodicStore>,
    config: MemoryConfig,
}

impl Grounder {
    /// Create a grounder over the two stores
    pub fn new(facts: Arc<FactStore>, episodic: Arc<EpisodicStore>, config: MemoryConfig) -> Self {
        Self {
            facts,
            episodic,
            config,
        }
    }

    /// The facts most relevant to a query, best first
    pub async fn relevant_facts(&self, query: &str, max: usize) -> Vec<RankedFact> {
        let sheet = self.facts.fact_sheet().await;
        rank_facts(query, &sheet, max)
    }

    /// Whether grounding would add anything to this query
    pub async fn should_ground(&self, query: &str) -> bool {
        !self.relevant_facts(query, 1).await.is_empty()
    }

    /// Compose a context-enriched version of the query: ranked facts,
    /// then up to two episodic memories not already covered by those
    /// facts, then the original query. When nothing relevant is found the
    /// original query is returned verbatim.
    pub async fn enrich_query(&self, query: &str) -> MnemoResult<String> {
        let facts = self
            .relevant_facts(query, self.config.max_grounding_facts)
            .await;

        let mut sections = Vec::new();

        if !facts.is_empty() {
            let lines: Vec<String> = facts
                .iter()
                .map(|f| format!("- {}: {}", f.topic, f.content))
                .collect();
            sections.push(format!(
                "Based on what I know about you:\n{}",
                lines.join("\n")
            ));
        }

        let memories = self
            .episodic
            .search(query, self.config.max_grounding_memories)
            .await?;

        let memory_lines: Vec<String> = memories
            .iter()
            .filter(|m| !facts.iter().any(|f| f.content == m.content))
            .map(|m| format!("- {}", m.content))
            .collect();

        if !memory_lines.is_empty() {
            sections.push(format!("Relevant past context:\n{}", memory_lines.join("\n")));
        }

        if sections.is_empty() {
            tracing::debug!("No relevant context found, using original query");
            return Ok(query.to_string());
        }

        tracing::debug!(
            facts = facts.len(),
            memories = memory_lines.len(),
            "Enriched query with stored context"
        );

        Ok(format!("{}\n\nUser query: {}", sections.join("\n\n"), query))
    }
}
