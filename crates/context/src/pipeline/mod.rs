//! Answer pipeline
//!
//! One request runs strictly in order: cache lookup, profile and themes,
//! degrade evaluation, expansion, retrieval, rerank, coverage (plus multi-hop
//! on failure), evidence and citations, draft, revision, claim alignment,
//! quality gate, cache write. Sub-calls inside a step run concurrently.

mod audit;
mod draft;

pub use audit::{emit_audit, mask_request, AuditRecord};
pub use draft::{compose_draft, guardrail_notes, DraftInput, GuardrailInput};

use crate::alignment::{attach_spans, ClaimAligner};
use crate::cache::{create_semantic_cache, fingerprint, SemanticCache};
use crate::coverage::{CoverageGate, CoverageReport};
use crate::degrade::{DegradeDecision, DegradePolicy};
use crate::evidence::EvidencePack;
use crate::expansion::{ExpandedQuery, ExpanderConfig, QueryExpander};
use crate::generation::{
    create_backends, GenerationOrchestrator, PromptContext, ProviderHealthMonitor, ProviderPool,
    RevisionInput, RoutingDecision, RoutingOutcome, Style,
};
use crate::planner::{MultiHopOutcome, PlannerConfig, QueryPlanner};
use crate::profile::{
    CalculatorProfileBuilder, KeywordThemeSummarizer, Profile, ProfileBuilder, ThemeSummarizer,
    ThemeSummary,
};
use crate::quality::{apply_quality_gate, FallbackInput, QualityFilter, TemplateFallbackBuilder};
use crate::schema::{AnswerBody, AnswerPayload, AnswerRequest, Mode};
use astrorag_common::embeddings::create_embedder;
use astrorag_common::errors::{AppError, Result};
use astrorag_common::metrics::{names, record_answer, record_cache, MetricsSink, RollingMetrics, StageTimer};
use astrorag_common::text::sanitize;
use astrorag_common::AppConfig;
use astrorag_search::corpus::seed_documents;
use astrorag_search::retrieval::{InMemoryDenseStore, InMemorySparseStore};
use astrorag_search::{
    ensure_paragraph_coverage, rerank_stats, AlphaPicker, CitationBuilder, HybridRetriever,
    RerankContext, RerankStats, Reranker, RetrievalMethod, RetrievalOutcome, RetrievalResult,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Serialized response plus whether it came from the cache
#[derive(Debug, Clone)]
pub struct AnswerOutput {
    pub body: String,
    pub cached: bool,
}

/// Wire shape of a fresh answer
#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    #[serde(flatten)]
    pub payload: AnswerPayload,
    pub debug: Value,
}

/// Collaborators chosen at startup
pub struct PipelineParts {
    pub retriever: Arc<HybridRetriever>,
    pub pool: Arc<ProviderPool>,
    pub cache: Arc<dyn SemanticCache>,
    pub profiles: Arc<dyn ProfileBuilder>,
    pub themes: Arc<dyn ThemeSummarizer>,
    pub metrics: Arc<dyn MetricsSink>,
}

pub struct AnswerPipeline {
    retriever: Arc<HybridRetriever>,
    reranker: Reranker,
    citations: CitationBuilder,
    expander: QueryExpander,
    coverage: CoverageGate,
    planner: QueryPlanner,
    degrade: DegradePolicy,
    orchestrator: GenerationOrchestrator,
    aligner: ClaimAligner,
    quality: QualityFilter,
    fallback: TemplateFallbackBuilder,
    cache: Arc<dyn SemanticCache>,
    profiles: Arc<dyn ProfileBuilder>,
    themes: Arc<dyn ThemeSummarizer>,
    metrics: Arc<dyn MetricsSink>,
    top_k: usize,
    cache_ttl_secs: u64,
}

/// Everything retrieval hands to the later stages
struct Retrieved {
    documents: Vec<RetrievalResult>,
    failures: Vec<String>,
    stats: Value,
    rerank: Option<RerankStats>,
    rerank_error: Option<String>,
}

impl AnswerPipeline {
    pub fn new(config: &AppConfig, parts: PipelineParts) -> Self {
        let health = Arc::new(ProviderHealthMonitor::new());
        let orchestrator =
            GenerationOrchestrator::new(&config.router, parts.pool, health, parts.metrics.clone());

        Self {
            retriever: parts.retriever,
            reranker: Reranker::default(),
            citations: CitationBuilder::new(),
            expander: QueryExpander::new(ExpanderConfig {
                max_expansions: config.retrieval.max_expansions,
            }),
            coverage: CoverageGate::new(config.retrieval.coverage_threshold),
            planner: QueryPlanner::with_defaults(PlannerConfig {
                budget_cap_ms: config.retrieval.hop_budget_cap_ms,
                hop_cost_ms: config.retrieval.hop_cost_ms,
            }),
            degrade: DegradePolicy::new(config.degrade.clone(), parts.metrics.clone()),
            orchestrator,
            aligner: ClaimAligner::new(config.alignment.clone()),
            quality: QualityFilter::new(config.quality.clone()),
            fallback: TemplateFallbackBuilder::new(),
            cache: parts.cache,
            profiles: parts.profiles,
            themes: parts.themes,
            metrics: parts.metrics,
            top_k: config.retrieval.top_k.max(1),
            cache_ttl_secs: config.cache.ttl_secs,
        }
    }

    /// Wire the default collaborators from configuration
    pub async fn bootstrap(config: &AppConfig) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let documents = seed_documents();
        let dense = InMemoryDenseStore::with_documents(embedder, documents.clone()).await?;
        let sparse = InMemorySparseStore::new(documents);
        let retriever = HybridRetriever::new(
            Some(Arc::new(dense)),
            Some(Arc::new(sparse)),
            AlphaPicker::from_config(&config.retrieval),
            config.store_timeout(),
        );

        let pool = ProviderPool::from_backends(create_backends(config)?);
        let metrics: Arc<dyn MetricsSink> = Arc::new(RollingMetrics::new(
            config.observability.rolling_capacity,
            Duration::from_secs(config.observability.rolling_retention_secs),
        ));

        info!(
            providers = ?pool.names(),
            cache_backend = %config.cache.backend,
            embedder = %config.embedding.provider,
            "Answer pipeline bootstrapped"
        );

        Ok(Self::new(
            config,
            PipelineParts {
                retriever: Arc::new(retriever),
                pool: Arc::new(pool),
                cache: create_semantic_cache(config).await,
                profiles: Arc::new(CalculatorProfileBuilder::fixture()),
                themes: Arc::new(KeywordThemeSummarizer),
                metrics,
            },
        ))
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    pub fn cache_name(&self) -> &'static str {
        self.cache.name()
    }

    /// Provider names and which of them are out of cooldown
    pub fn providers(&self) -> (Vec<String>, Vec<String>) {
        let pool = self.orchestrator.pool();
        (pool.names(), pool.available())
    }

    /// Answer one request, serving from the cache when possible
    #[instrument(skip(self, request), fields(mode = %request.mode, locale = request.locale.locale.as_str()))]
    pub async fn answer(&self, request: &AnswerRequest) -> Result<AnswerOutput> {
        let started = Instant::now();
        let mode = request.check()?;
        let key = fingerprint(request, mode);

        match self.cache.get(&key).await {
            Ok(Some(body)) => {
                record_cache(true, self.cache.name());
                record_answer(mode.as_str(), true);
                emit_audit(
                    request,
                    &AuditRecord {
                        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                        cached: true,
                        ..AuditRecord::default()
                    },
                );
                return Ok(AnswerOutput { body, cached: true });
            }
            Ok(None) => record_cache(false, self.cache.name()),
            Err(e) => warn!(error = %e, "Cache read failed, answering uncached"),
        }

        let degrade = self.degrade.evaluate();
        let (response, ttl_secs) = self.compose(request, mode, &degrade, started).await?;
        let body = serde_json::to_string(&response)?;

        if let Err(e) = self
            .cache
            .set(&key, &body, Duration::from_secs(ttl_secs))
            .await
        {
            warn!(error = %e, "Cache write failed");
        }

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_histogram(names::RAG_LATENCY, latency_ms);
        record_answer(mode.as_str(), false);
        emit_audit(
            request,
            &AuditRecord {
                latency_ms,
                cached: false,
                coverage_ok: Some(response.payload.limits.coverage_ok),
                coverage_score: response.payload.limits.coverage_score,
                confidence: Some(response.payload.confidence),
                degrade_active: degrade.active,
            },
        );

        Ok(AnswerOutput { body, cached: false })
    }

    async fn compose(
        &self,
        request: &AnswerRequest,
        mode: Mode,
        degrade: &DegradeDecision,
        started: Instant,
    ) -> Result<(AnswerResponse, u64)> {
        let language = request.language();
        let budget_ms = request.constraints.max_latency_ms;

        let profile = match self
            .profiles
            .build(request.subject_profile.as_ref(), mode)
            .await
        {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, "Profile builder failed, continuing without a profile");
                Profile::new()
            }
        };
        let theme = self.themes.summarize(&profile, &request.query, language);

        let expanded = if degrade.retrieval.expand_query.unwrap_or(true) {
            self.expander.expand(&request.query)
        } else {
            ExpandedQuery::unexpanded(&request.query)
        };

        let retrieved = self
            .retrieve(request, language, &theme, &expanded, degrade)
            .await;
        let Retrieved {
            mut documents,
            failures,
            stats: retrieval_stats,
            rerank,
            rerank_error,
        } = retrieved;

        let mut coverage = self
            .coverage
            .evaluate(&theme.main_elements, &documents, &request.query);
        self.metrics
            .record_histogram(names::COVERAGE_SCORE, coverage.score);
        let initial_coverage = coverage.clone();

        let mut multi_hop: Option<MultiHopOutcome> = None;
        if !coverage.passed && !degrade.flags.skip_multi_hop {
            let remaining = budget_ms.saturating_sub(elapsed_ms(started));
            let outcome = self
                .planner
                .run(
                    &theme.main_elements,
                    &coverage,
                    &profile,
                    remaining,
                    self.metrics.as_ref(),
                )
                .await;
            if !outcome.documents.is_empty() {
                merge_into(&mut documents, outcome.documents.clone());
                coverage = self
                    .coverage
                    .evaluate(&theme.main_elements, &documents, &request.query);
            }
            multi_hop = Some(outcome);
        }

        if documents.is_empty() {
            return Err(if failures.is_empty() {
                AppError::CitationsRequired
            } else {
                AppError::RetrievalExhausted {
                    message: failures.join("; "),
                }
            });
        }

        let evidence = EvidencePack::build(&documents, &theme.main_elements);
        let citations = self.citations.build(&documents);
        let mut payload = compose_draft(DraftInput {
            query: &request.query,
            language,
            theme: &theme,
            evidence: &evidence,
            citations,
            coverage: &coverage,
            latency_budget_ms: budget_ms,
        });
        payload.check_contract()?;

        let style = Style::pick(request.ab_flags.profile, request.locale.user_level);
        let doc_scores: Vec<f64> = documents.iter().map(|d| d.score).collect();
        let skip_revision = degrade.generation.skip_revision;
        let draft_value = serde_json::to_value(&payload)?;

        let mut routing: Option<RoutingDecision> = None;
        let mut revision_note: Option<String> = None;
        if !skip_revision {
            let timer = StageTimer::start("generation");
            let (decision, outcome) = self
                .revise(RevisionArgs {
                    request,
                    mode,
                    language,
                    style,
                    coverage: &coverage,
                    doc_scores: &doc_scores,
                    citation_count: payload.citations.len(),
                    degrade,
                    theme: &theme,
                    evidence: &evidence,
                    draft: &draft_value,
                })
                .await;
            if let Some(outcome) = outcome {
                revision_note = merge_revision(&mut payload, &outcome);
            }
            routing = Some(decision);
            debug!(elapsed_ms = timer.finish(), "Revision stage finished");
        }

        let mut alignment = self
            .aligner
            .score(&payload.answer, &payload.citations, &documents);
        let breach = self.aligner.breach_threshold();
        let mut upgrade_requested = false;
        let mut upgrade_routing: Option<RoutingDecision> = None;

        if alignment.breached(breach) && !skip_revision && elapsed_ms(started) < budget_ms {
            upgrade_requested = true;
            let mut upgraded = degrade.clone();
            upgraded.generation.force_upgrade = true;
            upgraded.flags.citation_alignment_score = alignment.score;
            warn!(
                score = ?alignment.score,
                supported_ratio = ?alignment.supported_ratio,
                "Citation alignment breach, retrying with an upgraded tier"
            );

            let (decision, outcome) = self
                .revise(RevisionArgs {
                    request,
                    mode,
                    language,
                    style,
                    coverage: &coverage,
                    doc_scores: &doc_scores,
                    citation_count: payload.citations.len(),
                    degrade: &upgraded,
                    theme: &theme,
                    evidence: &evidence,
                    draft: &draft_value,
                })
                .await;
            if let Some(outcome) = outcome {
                let mut candidate = payload.clone();
                let note = merge_revision(&mut candidate, &outcome);
                let report = self
                    .aligner
                    .score(&candidate.answer, &candidate.citations, &documents);
                if report.score.unwrap_or(0.0) > alignment.score.unwrap_or(0.0) {
                    payload = candidate;
                    alignment = report;
                    revision_note = note;
                }
            }
            upgrade_routing = Some(decision);
        }

        let gate = apply_quality_gate(
            &self.quality,
            &self.fallback,
            FallbackInput {
                payload: &payload,
                main_elements: &theme.main_elements,
                query: &request.query,
                language,
                documents: &documents,
                coverage_ok: coverage.passed,
                issues: &[],
            },
        );
        let fallback_served = gate.fallback.is_some();
        let quality_initial = gate.initial;
        let quality_fallback = gate.fallback;
        payload = gate.payload;
        if fallback_served {
            alignment = self
                .aligner
                .score(&payload.answer, &payload.citations, &documents);
        }
        if let Some(score) = alignment.score {
            self.metrics
                .record_histogram(names::CITATION_ALIGNMENT, score);
        }

        let (citations, backfilled) = ensure_paragraph_coverage(
            &payload.answer.general_profile,
            std::mem::take(&mut payload.citations),
        );
        payload.citations = citations;
        attach_spans(&mut payload.citations, &alignment);

        payload.limits.coverage_ok = coverage.passed;
        payload.limits.coverage_score = Some(coverage.score);
        payload.limits.latency_budget_ms = budget_ms;
        payload.limits.citation_alignment = alignment.score;
        payload.limits.claims_supported_ratio = alignment.supported_ratio;
        if payload.limits.validation.is_none() {
            payload.limits.validation = revision_note.clone();
        }
        payload.limits.processing_time_ms = elapsed_ms(started);
        payload.check_contract()?;

        let notes = guardrail_notes(&GuardrailInput {
            payload: &payload,
            coverage: &coverage,
            degrade,
            quality: &quality_initial,
            fallback_served,
            alignment: &alignment,
            breach_threshold: breach,
            upgrade_requested,
            evidence: &evidence,
            backfilled: &backfilled,
            retrieval_failures: &failures,
            revision_note: revision_note.as_deref(),
        });

        let debug = json!({
            "intent": expanded.question,
            "complexity": routing.as_ref().map(|r| r.classification.as_str()),
            "style": style.as_str(),
            "expansion": self.expander.stats(&expanded),
            "retrieval_stats": retrieval_stats,
            "rerank_stats": rerank,
            "rerank_error": rerank_error,
            "guardrail_notes": notes,
            "coverage": coverage,
            "coverage_initial": initial_coverage,
            "evidence": evidence,
            "plan": multi_hop.as_ref().map(|m| m.steps.clone()).unwrap_or_default(),
            "multi_hop": multi_hop.as_ref().map(|m| json!({
                "documents": m.documents.len(),
                "spent_ms": m.spent_ms,
                "budget_ms": m.budget_ms,
            })),
            "claim_alignment": alignment,
            "quality": {
                "initial": quality_initial,
                "fallback": quality_fallback,
                "fallback_served": fallback_served,
            },
            "degrade": degrade,
            "routing": routing,
            "routing_upgrade": upgrade_routing,
        });

        info!(
            documents = documents.len(),
            citations = payload.citations.len(),
            coverage_ok = coverage.passed,
            confidence = payload.confidence,
            fallback_served,
            elapsed_ms = elapsed_ms(started),
            "Answer composed"
        );

        Ok((
            AnswerResponse { payload, debug },
            degrade.cache_ttl(self.cache_ttl_secs),
        ))
    }

    async fn retrieve(
        &self,
        request: &AnswerRequest,
        language: &str,
        theme: &ThemeSummary,
        expanded: &ExpandedQuery,
        degrade: &DegradeDecision,
    ) -> Retrieved {
        let timer = StageTimer::start("retrieval");
        let top_k = degrade.retrieval.top_k.unwrap_or(self.top_k).max(1);
        let method = degrade
            .retrieval
            .retrieval_method
            .unwrap_or(RetrievalMethod::Hybrid);
        let rerank_enabled = degrade.retrieval.rerank_results.unwrap_or(true);
        let pool_size = degrade
            .cost_actions
            .rerank_top_k
            .or(degrade.retrieval.rerank_top_k)
            .unwrap_or(top_k * 2)
            .max(top_k);
        let fetch_k = if rerank_enabled { pool_size } else { top_k };

        let query = expanded.retrieval_query();
        let hypothetical = expanded.hypothetical.as_deref();
        let (primary, auxiliary) = tokio::join!(
            self.retriever
                .retrieve_with(&query, fetch_k, None, language, method),
            async {
                match hypothetical {
                    Some(text) => Some(
                        self.retriever
                            .retrieve_with(text, top_k, None, language, RetrievalMethod::Dense)
                            .await,
                    ),
                    None => None,
                }
            }
        );

        let mut failures = primary.failures.clone();
        let mut candidates = primary.results.clone();
        if let Some(aux) = &auxiliary {
            failures.extend(aux.failures.iter().cloned());
            merge_into(&mut candidates, aux.results.clone());
        }
        for candidate in &mut candidates {
            candidate.content = sanitize(&candidate.content);
        }
        candidates.retain(|c| !c.content.is_empty());
        let candidate_count = candidates.len();

        let mut rerank = None;
        let mut rerank_error = None;
        let documents: Vec<RetrievalResult> = if rerank_enabled && !candidates.is_empty() {
            let context = RerankContext {
                user_level: request.locale.user_level.as_str().to_string(),
                chart_elements: theme.main_elements.clone(),
            };
            match self
                .reranker
                .rerank(candidates.clone(), &request.query, &context)
                .await
            {
                Ok(ranked) => {
                    rerank = Some(rerank_stats(&ranked));
                    ranked
                        .into_iter()
                        .take(top_k)
                        .map(|r| RetrievalResult {
                            score: r.final_score,
                            ..r.result
                        })
                        .collect()
                }
                Err(e) => {
                    warn!(error = %e, "Reranker failed, keeping retrieval order");
                    rerank_error = Some(e.to_string());
                    candidates.into_iter().take(top_k).collect()
                }
            }
        } else {
            candidates.into_iter().take(top_k).collect()
        };

        let stats = retrieval_stats(&primary, auxiliary.as_ref(), top_k, candidate_count, &documents, rerank_enabled);
        debug!(
            elapsed_ms = timer.finish(),
            documents = documents.len(),
            degraded = primary.degraded,
            "Retrieval stage finished"
        );

        Retrieved {
            documents,
            failures,
            stats,
            rerank,
            rerank_error,
        }
    }

    async fn revise(&self, args: RevisionArgs<'_>) -> (RoutingDecision, Option<RoutingOutcome>) {
        let input = RevisionInput {
            query: &args.request.query,
            max_latency_ms: args.request.constraints.max_latency_ms,
            max_tokens: args.request.constraints.max_tokens,
            coverage: args.coverage,
            doc_scores: args.doc_scores,
            citation_count: args.citation_count,
            topic_count: args.coverage.topics.len(),
            degrade: args.degrade,
            prompt: PromptContext {
                mode: args.mode.as_str(),
                language: args.language,
                style: args.style,
                coverage_score: args.coverage.score,
                coverage_passed: args.coverage.passed,
                summary: &args.theme.summary,
                conflicts: &args.evidence.conflicts,
                draft: args.draft,
            },
        };
        self.orchestrator.revise(&input).await
    }
}

struct RevisionArgs<'a> {
    request: &'a AnswerRequest,
    mode: Mode,
    language: &'a str,
    style: Style,
    coverage: &'a CoverageReport,
    doc_scores: &'a [f64],
    citation_count: usize,
    degrade: &'a DegradeDecision,
    theme: &'a ThemeSummary,
    evidence: &'a EvidencePack,
    draft: &'a Value,
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Append results whose source id is not present yet
fn merge_into(target: &mut Vec<RetrievalResult>, extra: Vec<RetrievalResult>) {
    let mut seen: HashSet<String> = target.iter().map(|r| r.source_id.clone()).collect();
    for result in extra {
        if seen.insert(result.source_id.clone()) {
            target.push(result);
        }
    }
}

/// Take the revised answer body; citations always stay with the builder's list.
/// Returns the repair or validation note to surface.
fn merge_revision(payload: &mut AnswerPayload, outcome: &RoutingOutcome) -> Option<String> {
    if outcome.validation_error.as_deref() == Some("invalid_json") {
        warn!(provider = %outcome.provider, "Backend returned non-JSON output, keeping draft");
        return outcome.validation_error.clone();
    }
    match serde_json::from_value::<AnswerBody>(outcome.payload["answer"].clone()) {
        Ok(body) if !body.general_profile.trim().is_empty() => {
            payload.answer = body;
            outcome.validation_error.clone()
        }
        Ok(_) => Some("empty_general_profile".to_string()),
        Err(e) => Some(format!("answer body rejected: {}", e)),
    }
}

fn retrieval_stats(
    primary: &RetrievalOutcome,
    auxiliary: Option<&RetrievalOutcome>,
    top_k: usize,
    candidates: usize,
    documents: &[RetrievalResult],
    reranked: bool,
) -> Value {
    json!({
        "method": primary.method,
        "alpha": primary.alpha,
        "degraded": primary.degraded || auxiliary.is_some_and(|a| a.degraded),
        "failures": primary.failures,
        "top_k": top_k,
        "candidates": candidates,
        "returned": documents.len(),
        "hypothetical_hits": auxiliary.map(|a| a.results.len()),
        "reranked": reranked,
        "sources": documents.iter().map(|d| d.source_id.as_str()).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemorySemanticCache;
    use crate::generation::{ProviderEntry, ScriptStep, ScriptedBackend};
    use astrorag_common::embeddings::HashingEmbedder;
    use astrorag_search::retrieval::Document;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Map;

    /// Never hits; remembers the TTL of every write
    #[derive(Default)]
    struct TtlRecordingCache {
        ttls: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl SemanticCache for TtlRecordingCache {
        async fn get(&self, _fingerprint: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn set(&self, _fingerprint: &str, _body: &str, ttl: Duration) -> Result<()> {
            self.ttls.lock().push(ttl);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn document(id: &str, content: &str, meta: Value) -> Document {
        Document {
            id: id.to_string(),
            content: content.to_string(),
            metadata: meta.as_object().cloned().unwrap_or_else(Map::new),
        }
    }

    async fn retriever(documents: Vec<Document>) -> Arc<HybridRetriever> {
        let embedder = Arc::new(HashingEmbedder::new(128));
        let dense = InMemoryDenseStore::with_documents(embedder, documents.clone())
            .await
            .unwrap();
        let sparse = InMemorySparseStore::new(documents);
        Arc::new(HybridRetriever::new(
            Some(Arc::new(dense)),
            Some(Arc::new(sparse)),
            AlphaPicker::new(0.65, 0.55, 0.4, 0.85),
            Duration::from_millis(500),
        ))
    }

    fn parts(retriever: Arc<HybridRetriever>, backend: Arc<ScriptedBackend>) -> PipelineParts {
        PipelineParts {
            retriever,
            pool: Arc::new(ProviderPool::new(vec![ProviderEntry::new(
                "scripted",
                Duration::from_secs(60),
                backend,
            )])),
            cache: Arc::new(MemorySemanticCache::new(100)),
            profiles: Arc::new(CalculatorProfileBuilder::fixture()),
            themes: Arc::new(KeywordThemeSummarizer),
            metrics: Arc::new(RollingMetrics::new(1000, Duration::from_secs(3600))),
        }
    }

    fn parse(output: &AnswerOutput) -> Value {
        serde_json::from_str(&output.body).unwrap()
    }

    fn timing_docs() -> Vec<Document> {
        vec![
            document(
                "profection_doc",
                "Annual profections activate a house each year and the ruler of that house becomes the lord of the year.",
                json!({"topic": "profection", "school": "traditional", "language": "en",
                       "section": 1, "line_start": 2, "line_end": 6}),
            ),
            document(
                "career_doc",
                "Career timing questions benefit from looking at the tenth house ruler and its condition.",
                json!({"topic": "career", "school": "modern", "language": "en"}),
            ),
        ]
    }

    #[tokio::test]
    async fn test_coverage_gap_triggers_plan() {
        let backend = Arc::new(ScriptedBackend::echo("scripted"));
        let pipeline = AnswerPipeline::new(
            &AppConfig::default(),
            parts(retriever(timing_docs()).await, backend),
        );

        let mut request = AnswerRequest::new("When does zodiacal releasing bring my career peak?");
        request.mode = "technique".to_string();
        let output = pipeline.answer(&request).await.unwrap();
        assert!(!output.cached);

        let body = parse(&output);
        assert_eq!(body["debug"]["coverage_initial"]["pass"], false);
        let plan = body["debug"]["plan"].as_array().unwrap();
        assert!(!plan.is_empty());
        assert!(plan
            .iter()
            .any(|s| s["topic"].as_str().unwrap().starts_with("zodiacal")));

        let citations = body["citations"].as_array().unwrap();
        assert!(!citations.is_empty());
        for c in citations {
            assert!(c["line_end"].as_u64().unwrap() >= c["line_start"].as_u64().unwrap());
        }
        let confidence = body["confidence"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&confidence));
    }

    #[tokio::test]
    async fn test_second_request_served_from_cache() {
        let backend = Arc::new(ScriptedBackend::echo("scripted"));
        let pipeline = AnswerPipeline::new(
            &AppConfig::default(),
            parts(retriever(seed_documents()).await, backend.clone()),
        );

        let request = AnswerRequest::new("What does my almuten say about my direction?");
        let first = pipeline.answer(&request).await.unwrap();
        let calls = backend.calls();
        let second = pipeline.answer(&request).await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.body, second.body);
        assert_eq!(backend.calls(), calls);
    }

    #[tokio::test]
    async fn test_no_documents_is_unprocessable() {
        let backend = Arc::new(ScriptedBackend::echo("scripted"));
        let mut config = AppConfig::default();
        // no room for hops, so the knowledge graph cannot supply evidence
        config.retrieval.hop_budget_cap_ms = 0;
        let pipeline = AnswerPipeline::new(&config, parts(retriever(Vec::new()).await, backend));

        let mut request = AnswerRequest::new("Tell me something about my chart");
        request.mode = "definition".to_string();
        let err = pipeline.answer(&request).await.unwrap_err();
        assert!(matches!(err, AppError::CitationsRequired));
        assert_eq!(err.status_code().as_u16(), 422);
    }

    #[tokio::test]
    async fn test_invalid_mode_rejected_before_work() {
        let backend = Arc::new(ScriptedBackend::echo("scripted"));
        let pipeline = AnswerPipeline::new(
            &AppConfig::default(),
            parts(retriever(seed_documents()).await, backend.clone()),
        );

        let mut request = AnswerRequest::new("What is my almuten?");
        request.mode = "horary".to_string();
        assert!(matches!(
            pipeline.answer(&request).await,
            Err(AppError::InvalidMode { .. })
        ));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_provider_exhaustion_keeps_draft() {
        let backend = Arc::new(ScriptedBackend::failing("scripted"));
        let pipeline = AnswerPipeline::new(
            &AppConfig::default(),
            parts(retriever(seed_documents()).await, backend),
        );

        let request = AnswerRequest::new("How do annual profections work for my year?");
        let body = parse(&pipeline.answer(&request).await.unwrap());

        assert!(!body["answer"]["general_profile"].as_str().unwrap().is_empty());
        assert!(!body["citations"].as_array().unwrap().is_empty());
        assert!(body["debug"]["routing"]["provider"].is_null());
        assert!(!body["debug"]["routing"]["fallbacks"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_backend_output_falls_back_to_template() {
        let backend = Arc::new(ScriptedBackend::new(
            "scripted",
            vec![ScriptStep::Reply("not json at all".to_string())],
        ));
        let pipeline = AnswerPipeline::new(
            &AppConfig::default(),
            parts(retriever(seed_documents()).await, backend),
        );

        let request = AnswerRequest::new("What is antiscia?");
        let body = parse(&pipeline.answer(&request).await.unwrap());

        assert_eq!(body["limits"]["validation"], "invalid_json");
        let notes: Vec<String> = serde_json::from_value(body["debug"]["guardrail_notes"].clone()).unwrap();
        assert!(notes.iter().any(|n| n.contains("invalid_json")));
        assert!(!body["citations"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_degrade_active_applies_overrides() {
        let mut documents = timing_docs();
        for (id, topic) in [("firdaria_doc", "firdaria"), ("sect_doc", "sect"), ("dignity_doc", "dignity")] {
            documents.push(document(
                id,
                &format!("The {} doctrine refines how a chart ruler delivers its promise over time.", topic),
                json!({"topic": topic, "school": "traditional", "language": "en"}),
            ));
        }

        let metrics = Arc::new(RollingMetrics::new(1000, Duration::from_secs(3600)));
        for _ in 0..20 {
            metrics.record_histogram(names::RAG_LATENCY, 3000.0);
        }
        metrics.record_histogram(names::LLM_COST, 0.05);

        let mut config = AppConfig::default();
        config.retrieval.top_k = 5;
        config.degrade.low_top_k = 3;

        let backend = Arc::new(ScriptedBackend::echo("scripted"));
        let cache = Arc::new(TtlRecordingCache::default());
        let mut parts = parts(retriever(documents).await, backend.clone());
        parts.cache = cache.clone();
        parts.metrics = metrics.clone();
        let pipeline = AnswerPipeline::new(&config, parts);

        let mut request = AnswerRequest::new("When does zodiacal releasing bring my career peak?");
        request.mode = "technique".to_string();
        let body = parse(&pipeline.answer(&request).await.unwrap());
        let debug = &body["debug"];

        assert_eq!(debug["degrade"]["active"], true);
        assert_eq!(backend.calls(), 0);
        assert!(debug["routing"].is_null());

        assert_eq!(debug["coverage_initial"]["pass"], false);
        assert!(debug["plan"].as_array().unwrap().is_empty());
        assert!(debug["multi_hop"].is_null());

        assert_eq!(debug["retrieval_stats"]["top_k"], 3);
        assert_eq!(debug["retrieval_stats"]["returned"], 3);
        assert_eq!(debug["retrieval_stats"]["reranked"], false);
        assert_eq!(debug["retrieval_stats"]["method"], "dense");
        assert!(!body["citations"].as_array().unwrap().is_empty());

        let stretched = (config.cache.ttl_secs as f64 * config.degrade.cache_ttl_factor).round() as u64;
        assert_eq!(*cache.ttls.lock(), vec![Duration::from_secs(stretched)]);
    }

    #[tokio::test]
    async fn test_alignment_breach_retries_on_large_tier() {
        let unrelated = json!({
            "answer": {
                "general_profile": "Purple elephants dance quietly under neon umbrellas. \
                    Bicycles whisper forgotten recipes to marble statues. \
                    Lighthouses knit scarves for migrating submarines.",
                "strengths": ["Velvet trombones negotiate with sleepy glaciers."],
                "watchouts": ["Copper kettles audit the moonlit orchestra."]
            },
            "citations": []
        });
        let backend = Arc::new(ScriptedBackend::new(
            "scripted",
            vec![ScriptStep::Reply(unrelated.to_string())],
        ));
        let pipeline = AnswerPipeline::new(
            &AppConfig::default(),
            parts(retriever(seed_documents()).await, backend.clone()),
        );

        let mut request = AnswerRequest::new("What does my almuten say about my direction?");
        request.constraints.max_latency_ms = 10_000;
        let body = parse(&pipeline.answer(&request).await.unwrap());
        let debug = &body["debug"];

        assert_eq!(backend.calls(), 2);
        assert_eq!(backend.models().last().map(String::as_str), Some("gpt-4o"));

        let upgrade = &debug["routing_upgrade"];
        assert!(!upgrade.is_null());
        assert_eq!(upgrade["force_upgrade"], true);
        assert_eq!(upgrade["tiers"][0], "large");
        assert_eq!(upgrade["model"], "gpt-4o");

        let notes: Vec<String> = serde_json::from_value(debug["guardrail_notes"].clone()).unwrap();
        assert!(notes.iter().any(|n| n.contains("upgrade requested")));
    }
}
