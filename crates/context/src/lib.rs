//! AstroRAG Context Engine
//!
//! Everything between retrieval and the wire response:
//! - Query expansion, the coverage gate and multi-hop planning
//! - Evidence packs with tone conflicts and diversity stats
//! - Metrics-driven degrade policy
//! - Generation routing across providers with health-based failover
//! - Claim alignment, the quality gate and the semantic cache
//! - The answer pipeline composing all of the above

pub mod alignment;
pub mod cache;
pub mod coverage;
pub mod degrade;
pub mod evidence;
pub mod expansion;
pub mod generation;
pub mod pipeline;
pub mod planner;
pub mod profile;
pub mod quality;
pub mod schema;

pub use cache::SemanticCache;
pub use degrade::{DegradeDecision, DegradePolicy};
pub use pipeline::{AnswerOutput, AnswerPipeline, AnswerResponse, PipelineParts};
pub use schema::{AnswerPayload, AnswerRequest, Mode};
