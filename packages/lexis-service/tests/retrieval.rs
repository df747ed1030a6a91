use std::{
	collections::BTreeSet,
	sync::{Arc, atomic::Ordering},
	time::Duration,
};

use serde_json::{Map, Value};

use lexis_config::{
	Cache, Config, EmbeddingProviderConfig, LlmProviderConfig, ProviderConfig, Qdrant, Retrieval,
	Retry, Service, Storage,
};
use lexis_domain::{ACTIVE_STATUS, Degradation, Filters, Mode, ProviderError, Query, RankedAnswer};
use lexis_service::{Error, Providers, RetrievalService, RetrieveRequest};
use lexis_testkit::{
	FakeChunk, FakeCrossEncoder, FakeEmbedder, FakeGenerator, FakeIndex, MemoryCacheBackend,
};

const DIM: usize = 64;
const OPEN_BIDDING: &str = "what is open bidding";

struct Harness {
	service: Arc<RetrievalService>,
	generator: Arc<FakeGenerator>,
	embedder: Arc<FakeEmbedder>,
	index: Arc<FakeIndex>,
	encoder: Arc<FakeCrossEncoder>,
	l2: Arc<MemoryCacheBackend>,
}

fn provider(path: &str) -> ProviderConfig {
	ProviderConfig {
		provider_id: "test".to_string(),
		api_base: "http://127.0.0.1:1".to_string(),
		api_key: "test-key".to_string(),
		path: path.to_string(),
		model: "test-model".to_string(),
		timeout_ms: 1_000,
		default_headers: Map::new(),
	}
}

fn test_config() -> Config {
	Config {
		service: Service { log_level: "debug".to_string() },
		storage: Storage {
			postgres: None,
			qdrant: Qdrant {
				url: "http://127.0.0.1:6334".to_string(),
				collection: "lexis_test".to_string(),
				vector_name: "dense".to_string(),
				vector_dim: DIM as u32,
				timeout_ms: 1_000,
			},
		},
		providers: lexis_config::Providers {
			embedding: EmbeddingProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/embeddings".to_string(),
				model: "test-embedding".to_string(),
				dimensions: DIM as u32,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			rerank: provider("/rerank"),
			generation: LlmProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/chat/completions".to_string(),
				model: "test-llm".to_string(),
				temperature: 0.0,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
		},
		retrieval: Retrieval::default(),
		cache: Cache { key_prefix: "test".to_string(), ..Cache::default() },
		retry: Retry { max_retries: 1, base_delay_ms: 1, max_delay_ms: 2 },
	}
}

fn corpus() -> Vec<FakeChunk> {
	vec![
		FakeChunk::new(
			"c1",
			"law-bidding",
			"open bidding is contractor selection where the number of bidders is not limited",
		)
		.doc_type("law"),
		FakeChunk::new(
			"c2",
			"law-bidding",
			"bid security is submitted together with the bid before closing time",
		)
		.doc_type("law"),
		FakeChunk::new(
			"c3",
			"decree-63",
			"open bidding notices are published on the national procurement network",
		)
		.doc_type("decree"),
		FakeChunk::new("c4", "decree-63", "the evaluation team reviews technical proposals")
			.doc_type("decree"),
		FakeChunk::new("c5", "circular-08", "bidders in bankruptcy are not eligible")
			.doc_type("circular"),
		FakeChunk::new("c6", "law-repealed", "open bidding under the repealed regulation")
			.status("repealed"),
	]
}

fn harness_with(cfg: Config, chunks: Vec<FakeChunk>) -> Harness {
	let generator = Arc::new(FakeGenerator::new());
	let embedder = Arc::new(FakeEmbedder::new(DIM));
	let index = Arc::new(FakeIndex::with_chunks(DIM, chunks));
	let encoder = Arc::new(FakeCrossEncoder::new());
	let l2 = Arc::new(MemoryCacheBackend::new());
	let providers = Providers::new(
		generator.clone(),
		embedder.clone(),
		index.clone(),
		encoder.clone(),
		index.clone(),
	);
	let service = RetrievalService::new(&cfg, providers, Some(l2.clone()));

	Harness { service: Arc::new(service), generator, embedder, index, encoder, l2 }
}

fn harness() -> Harness {
	harness_with(test_config(), corpus())
}

fn query(text: &str, mode: Mode, top_k: u32) -> Query {
	Query::new(text, mode, Filters::default(), top_k).expect("Failed to build query.")
}

fn chunk_ids(answer: &RankedAnswer) -> Vec<String> {
	answer.chunks.iter().map(|chunk| chunk.chunk_id.clone()).collect()
}

#[tokio::test]
async fn concurrent_identical_queries_compute_once() {
	let h = harness();

	h.embedder.faults.set_delay(Duration::from_millis(50));

	let mut handles = Vec::new();

	for _ in 0..8 {
		let service = h.service.clone();

		handles.push(tokio::spawn(async move {
			service.retrieve(query(OPEN_BIDDING, Mode::Balanced, 5)).await
		}));
	}

	let mut answers = Vec::new();

	for handle in handles {
		answers.push(handle.await.expect("Task panicked.").expect("Retrieve failed."));
	}

	// One original, two paraphrases, one step-back.
	assert_eq!(h.generator.faults.calls(), 3);
	assert_eq!(h.embedder.faults.calls(), 4);
	assert_eq!(h.encoder.batches().len(), 1);
	assert!(answers.iter().all(|answer| chunk_ids(answer) == chunk_ids(&answers[0])));
	assert!(!answers[0].chunks.is_empty());
}

#[tokio::test]
async fn second_call_is_served_from_cache() {
	let h = harness();
	let first = h.service.retrieve(query(OPEN_BIDDING, Mode::Balanced, 5)).await.expect("first");
	let embeds = h.embedder.faults.calls();
	let second = h.service.retrieve(query(OPEN_BIDDING, Mode::Balanced, 5)).await.expect("second");

	assert!(!first.cache_hit);
	assert!(second.cache_hit);
	assert_eq!(first.chunks, second.chunks);
	assert_eq!(h.embedder.faults.calls(), embeds);
	assert!(h.l2.keys().iter().any(|key| key.starts_with("test:answer:")));
}

#[tokio::test]
async fn whitespace_and_case_variants_share_a_cache_entry() {
	let h = harness();

	h.service
		.retrieve(query("  What is   OPEN bidding ", Mode::Fast, 5))
		.await
		.expect("first");

	let second = h.service.retrieve(query(OPEN_BIDDING, Mode::Fast, 5)).await.expect("second");

	assert!(second.cache_hit);
}

#[tokio::test]
async fn different_modes_use_different_entries() {
	let h = harness();

	h.service.retrieve(query(OPEN_BIDDING, Mode::Fast, 5)).await.expect("fast");

	let balanced =
		h.service.retrieve(query(OPEN_BIDDING, Mode::Balanced, 5)).await.expect("balanced");

	assert!(!balanced.cache_hit);
}

#[tokio::test]
async fn generation_failure_falls_back_to_original_variant() {
	let h = harness();

	h.generator.faults.fail_always(ProviderError::transient("generation", "503"));

	let answer = h.service.retrieve(query(OPEN_BIDDING, Mode::Quality, 5)).await.expect("answer");

	assert!(answer.degraded);
	assert!(answer.degradations.contains(&Degradation::EnhancementFailed));
	assert_eq!(h.embedder.faults.calls(), 1);
	assert!(!answer.chunks.is_empty());
}

#[tokio::test]
async fn failed_variant_searches_degrade_without_failing() {
	let h = harness();

	h.embedder
		.faults
		.fail_when("alternative phrasing", ProviderError::permanent("embedding", "400"));

	let answer = h.service.retrieve(query(OPEN_BIDDING, Mode::Balanced, 3)).await.expect("answer");

	assert!(answer.degraded);
	assert_eq!(answer.degradations, BTreeSet::from([Degradation::VariantSearchFailed]));
	assert_eq!(answer.chunks.len(), 3);
}

#[tokio::test]
async fn zero_results_return_an_empty_answer() {
	let h = harness_with(test_config(), Vec::new());
	let answer = h.service.retrieve(query(OPEN_BIDDING, Mode::Balanced, 5)).await.expect("answer");

	assert!(answer.chunks.is_empty());
	assert!(!answer.degraded);
	assert!(h.encoder.batches().is_empty());
}

#[tokio::test]
async fn all_searches_failing_is_served_empty_and_not_cached() {
	let h = harness();

	h.embedder.faults.fail_always(ProviderError::transient("embedding", "503"));

	let first = h.service.retrieve(query(OPEN_BIDDING, Mode::Balanced, 5)).await.expect("first");

	assert!(first.chunks.is_empty());
	assert!(first.degradations.contains(&Degradation::VariantSearchFailed));

	h.embedder.faults.reset();

	let second = h.service.retrieve(query(OPEN_BIDDING, Mode::Balanced, 5)).await.expect("second");

	assert!(!second.cache_hit);
	assert!(!second.chunks.is_empty());
}

#[tokio::test]
async fn invalidation_forces_a_recompute() {
	let h = harness();
	let first = h.service.retrieve(query(OPEN_BIDDING, Mode::Fast, 5)).await.expect("first");
	let doc_id = first.chunks[0].doc_id().expect("doc id").to_string();

	assert!(h.service.retrieve(query(OPEN_BIDDING, Mode::Fast, 5)).await.expect("hit").cache_hit);

	h.index.remove_document(&doc_id);

	let invalidated = h.service.invalidate_by_document(&doc_id).await;

	assert!(invalidated.l2_entries >= 1);
	assert!(h.l2.keys().iter().all(|key| !key.starts_with("test:answer:")));

	let after = h.service.retrieve(query(OPEN_BIDDING, Mode::Fast, 5)).await.expect("after");

	assert!(!after.cache_hit);
	assert!(!after.chunks.iter().any(|chunk| chunk.doc_id() == Some(doc_id.as_str())));
}

#[tokio::test]
async fn invalidating_an_uncited_document_keeps_the_entry() {
	let h = harness();

	h.service.retrieve(query("bankruptcy", Mode::Fast, 1)).await.expect("first");

	let generation = h.service.cache().generation();

	h.service.invalidate_by_document("law-repealed").await;

	assert_eq!(h.service.cache().generation(), generation + 1);

	let second = h.service.retrieve(query("bankruptcy", Mode::Fast, 1)).await.expect("second");

	assert!(second.cache_hit);
}

#[tokio::test]
async fn clear_all_drops_every_answer() {
	let h = harness();

	h.service.retrieve(query(OPEN_BIDDING, Mode::Fast, 5)).await.expect("fast");
	h.service.retrieve(query("bid security", Mode::Fast, 5)).await.expect("fast");
	h.service.clear_all().await;

	assert!(h.l2.keys().is_empty());
	assert!(!h.service.retrieve(query(OPEN_BIDDING, Mode::Fast, 5)).await.expect("x").cache_hit);
}

#[tokio::test]
async fn reranker_failure_serves_fused_order() {
	let h = harness();

	h.encoder.faults.fail_always(ProviderError::transient("rerank", "503"));

	let answer = h.service.retrieve(query(OPEN_BIDDING, Mode::Balanced, 3)).await.expect("answer");

	assert!(answer.degraded);
	assert!(answer.degradations.contains(&Degradation::RerankFailed));
	assert_eq!(answer.chunks.len(), 3);
	assert!(answer.chunks.windows(2).all(|w| w[0].final_score >= w[1].final_score));
}

#[tokio::test]
async fn reranker_orders_by_cross_encoder_score() {
	let h = harness();
	let answer =
		h.service.retrieve(query("bid security", Mode::Balanced, 2)).await.expect("answer");

	assert!(!answer.degraded);
	assert_eq!(answer.chunks[0].chunk_id, "c2");
	assert_eq!(answer.chunks[0].final_score, 1.0);
}

#[tokio::test]
async fn fast_mode_skips_enhancement_and_rerank() {
	let h = harness();
	let answer = h.service.retrieve(query(OPEN_BIDDING, Mode::Fast, 5)).await.expect("answer");

	assert!(!h.service.modes().profile(Mode::Fast).rerank);
	assert_eq!(h.generator.faults.calls(), 0);
	assert!(h.encoder.batches().is_empty());
	assert!(!answer.degraded);
}

#[tokio::test]
async fn adaptive_mode_classifies_then_reranks() {
	let h = harness();

	h.service.retrieve(query("bid security", Mode::Adaptive, 5)).await.expect("short");

	assert_eq!(h.generator.faults.calls(), 0);
	assert_eq!(h.encoder.batches().len(), 1);

	h.service
		.retrieve(query(
			"if a bid arrives late, can the procuring entity accept it, and who decides?",
			Mode::Adaptive,
			5,
		))
		.await
		.expect("long");

	assert_eq!(h.generator.faults.calls(), 5);
}

#[tokio::test]
async fn status_filter_is_always_active() {
	let h = harness();
	let filters = Filters { status: Some("repealed".to_string()), ..Filters::default() };
	let query = Query::new("open bidding regulation", Mode::Balanced, filters, 10).expect("query");
	let answer = h.service.retrieve(query).await.expect("answer");

	assert!(!h.index.received().is_empty());
	assert!(h.index.received().iter().all(|(filter, _)| filter.status() == ACTIVE_STATUS));
	assert!(answer.chunks.iter().all(|chunk| chunk.chunk_id != "c6"));
	assert!(
		answer
			.chunks
			.iter()
			.all(|chunk| chunk.metadata.get("status") == Some(&Value::from(ACTIVE_STATUS)))
	);
}

#[tokio::test]
async fn doc_type_filter_reaches_the_index() {
	let h = harness();
	let filters =
		Filters { doc_types: BTreeSet::from(["decree".to_string()]), ..Filters::default() };
	let query = Query::new("open bidding", Mode::Fast, filters, 5).expect("query");
	let answer = h.service.retrieve(query).await.expect("answer");

	assert_eq!(
		chunk_ids(&answer).into_iter().collect::<BTreeSet<_>>(),
		BTreeSet::from(["c3".to_string(), "c4".to_string()])
	);
}

#[tokio::test]
async fn per_variant_search_width_covers_top_k() {
	let h = harness();

	h.service.retrieve(query(OPEN_BIDDING, Mode::Fast, 50)).await.expect("answer");

	assert!(h.index.received().iter().all(|(_, top_k)| *top_k == 50));
}

#[tokio::test]
async fn deadline_serves_variants_that_finished() {
	let mut cfg = test_config();

	cfg.retrieval.deadlines.balanced_ms = 300;

	let h = harness_with(cfg, corpus());

	h.embedder.faults.delay_when("alternative phrasing", Duration::from_secs(5));

	let answer = h.service.retrieve(query(OPEN_BIDDING, Mode::Balanced, 3)).await.expect("answer");

	assert!(answer.degraded);
	assert!(answer.degradations.contains(&Degradation::DeadlineExceeded));
	assert_eq!(answer.chunks.len(), 3);
	assert!(answer.latency_ms < 5_000);
	assert!(h.encoder.batches().is_empty());
}

#[tokio::test]
async fn deadline_without_finished_variants_is_an_error() {
	let mut cfg = test_config();

	cfg.retrieval.deadlines.fast_ms = 100;

	let h = harness_with(cfg, corpus());

	h.embedder.faults.set_delay(Duration::from_secs(5));

	let err = h.service.retrieve(query(OPEN_BIDDING, Mode::Fast, 5)).await.expect_err("deadline");

	assert_eq!(err, Error::DeadlineExceeded { deadline_ms: 100 });
	assert!(h.l2.keys().is_empty());
}

#[tokio::test]
async fn shared_cache_outage_does_not_fail_retrieval() {
	let h = harness();

	h.l2.set_unavailable(true);

	let first = h.service.retrieve(query(OPEN_BIDDING, Mode::Fast, 5)).await.expect("first");
	let second = h.service.retrieve(query(OPEN_BIDDING, Mode::Fast, 5)).await.expect("second");

	assert!(!first.chunks.is_empty());
	assert!(second.cache_hit);
	assert!(h.l2.sets.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn shared_cache_serves_a_fresh_process() {
	let h = harness();

	h.service.retrieve(query(OPEN_BIDDING, Mode::Fast, 5)).await.expect("warm");

	let providers = Providers::new(
		h.generator.clone(),
		h.embedder.clone(),
		h.index.clone(),
		h.encoder.clone(),
		h.index.clone(),
	);
	let other = RetrievalService::new(&test_config(), providers, Some(h.l2.clone()));
	let embeds = h.embedder.faults.calls();
	let answer = other.retrieve(query(OPEN_BIDDING, Mode::Fast, 5)).await.expect("cold");

	assert!(answer.cache_hit);
	assert_eq!(h.embedder.faults.calls(), embeds);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_any_provider_call() {
	let h = harness();
	let request = |text: &str, mode: &str, top_k: u32| RetrieveRequest {
		query: text.to_string(),
		mode: mode.to_string(),
		filters: Filters::default(),
		top_k,
	};

	let invalid =
		[request("   ", "fast", 5), request("tender", "turbo", 5), request("tender", "fast", 0)];

	for req in invalid {
		let err = h.service.retrieve_request(req).await.expect_err("invalid");

		assert!(matches!(err, Error::InvalidRequest(_)));
	}

	assert_eq!(h.embedder.faults.calls(), 0);
	assert!(h.l2.keys().is_empty());
}
