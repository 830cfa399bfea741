//! End-to-end pipeline tests over a scripted graph and language model.

mod common;

use common::{row, script_table_schema, CountingEmbedder, FakeGraph};
use graphqa::llm::MockCompletion;
use graphqa::pipeline::{Pipeline, PipelineConfig, Stage};
use serde_json::json;
use std::sync::Arc;

fn plan_response() -> String {
    json!({
        "query_plan": [{
            "purpose": "find the columns of the Work Order table",
            "query": "MATCH (t:Table)-[:HAS_COLUMN]->(c:Column) WHERE t.name = 'Work Order' RETURN id(c) AS id, c.name AS name"
        }],
        "thought_process": "One hop from the table to its columns."
    })
    .to_string()
}

fn verdict_response() -> String {
    json!({
        "answer": "The Work Order table has the columns priority and status.",
        "reasoning": "Both columns are attached via HAS_COLUMN.",
        "evidence": [
            {"fact": "Work Order has column priority", "source": "s0:101"},
            {"fact": "Work Order has column status", "source": "s0:102"}
        ],
        "confidence": 0.92
    })
    .to_string()
}

fn pipeline_over(graph: Arc<FakeGraph>, responses: Vec<String>) -> Pipeline {
    Pipeline::new(
        graph,
        Arc::new(MockCompletion::new(responses)),
        Arc::new(CountingEmbedder),
        PipelineConfig::default(),
    )
}

#[tokio::test]
async fn answers_work_order_question_end_to_end() {
    let graph = Arc::new(FakeGraph::new());
    script_table_schema(&graph);
    graph.respond(
        "WHERE t.name = 'Work Order'",
        vec![
            row(&[("id", json!(101)), ("name", json!("priority"))]),
            row(&[("id", json!(102)), ("name", json!("status"))]),
        ],
    );

    let pipeline = pipeline_over(graph, vec![plan_response(), verdict_response()]);
    let report = pipeline
        .answer_question("What columns does the Work Order table have?")
        .await;

    assert!(report.failure.is_none());
    assert!(report.answer.text.contains("priority"));
    assert!(report.answer.text.contains("status"));
    assert_eq!(report.answer.citations.len(), 2);
    // Citations reference structured evidence only.
    for citation in &report.answer.citations {
        assert!(citation.source.as_deref().unwrap().starts_with("s0:"));
    }
    assert!((report.answer.confidence - 0.92).abs() < 1e-9);
    assert!(!report.answer.insufficient_evidence);

    let plan = report.plan.expect("plan should be recorded");
    assert_eq!(plan.steps.len(), 1);
    assert!(plan.steps[0].flags.is_empty());
    assert_eq!(report.evidence_count, 2);
    assert_eq!(report.timings.len(), 3);
    assert_eq!(report.timings[0].stage, Stage::Planning);
    assert_eq!(report.timings[2].stage, Stage::Reasoning);
}

#[tokio::test]
async fn schema_unavailable_yields_planning_failure_answer() {
    let graph = Arc::new(FakeGraph::new());
    graph.set_down(true);

    let pipeline = pipeline_over(graph, vec![plan_response()]);
    let report = pipeline.answer_question("anything").await;

    let failure = report.failure.expect("should fail fatally");
    assert_eq!(failure.stage, Stage::Planning);
    assert_eq!(report.answer.confidence, 0.0);
    assert!(report.answer.insufficient_evidence);
    assert!(report.plan.is_none());
}

#[tokio::test]
async fn cached_schema_survives_graph_outage() {
    let graph = Arc::new(FakeGraph::new());
    script_table_schema(&graph);
    graph.respond(
        "WHERE t.name = 'Work Order'",
        vec![row(&[("id", json!(101)), ("name", json!("priority"))])],
    );

    let pipeline = pipeline_over(
        graph.clone(),
        vec![
            plan_response(),
            verdict_response(),
            plan_response(),
            verdict_response(),
        ],
    );

    let first = pipeline.answer_question("What columns?").await;
    assert!(first.failure.is_none());

    // The schema is already cached, so planning still works; retrieval sees
    // only connection failures and fails fatally.
    graph.set_down(true);
    let second = pipeline.answer_question("What columns?").await;
    let failure = second.failure.expect("retrieval should fail");
    assert_eq!(failure.stage, Stage::Retrieving);
    assert!(second.plan.is_some());
}

#[tokio::test]
async fn concurrent_questions_interleave_cleanly() {
    // Two pipelines share one runtime; their futures interleave at every
    // await point. Each report must keep its own question id and answer.
    let make = |answer_text: &str| {
        let graph = Arc::new(FakeGraph::new());
        script_table_schema(&graph);
        graph.respond(
            "WHERE t.name = 'Work Order'",
            vec![row(&[("id", json!(101)), ("name", json!("priority"))])],
        );
        let verdict = json!({
            "answer": answer_text,
            "reasoning": "r",
            "evidence": [{"fact": "f", "source": "s0:101"}],
            "confidence": 0.8
        })
        .to_string();
        pipeline_over(graph, vec![plan_response(), verdict])
    };

    let a = make("answer alpha");
    let b = make("answer beta");
    let (ra, rb) = tokio::join!(a.answer_question("first?"), b.answer_question("second?"));

    assert!(ra.failure.is_none());
    assert!(rb.failure.is_none());
    assert_eq!(ra.answer.text, "answer alpha");
    assert_eq!(rb.answer.text, "answer beta");
    assert_ne!(ra.question_id, rb.question_id);
}

#[tokio::test]
async fn schema_cache_serves_cached_descriptor_during_outage() {
    let graph = Arc::new(FakeGraph::new());
    script_table_schema(&graph);

    let cache = graphqa::schema::SchemaCache::new(graph.clone());
    let live = cache.get_schema(false).await.unwrap();

    graph.set_down(true);
    let cached = cache.get_schema(false).await.unwrap();
    assert!(Arc::ptr_eq(&live, &cached));
    // Even a forced refresh falls back to the cached descriptor.
    let forced = cache.get_schema(true).await.unwrap();
    assert_eq!(forced.fetched_at, live.fetched_at);
}

#[tokio::test]
async fn unplannable_question_fails_after_one_retry() {
    let graph = Arc::new(FakeGraph::new());
    script_table_schema(&graph);

    let llm = Arc::new(MockCompletion::new(vec![
        "I am not sure what to query.".to_string(),
        "Still no JSON from me.".to_string(),
    ]));
    let pipeline = Pipeline::new(
        graph,
        llm.clone(),
        Arc::new(CountingEmbedder),
        PipelineConfig::default(),
    );

    let report = pipeline.answer_question("gibberish").await;
    let failure = report.failure.expect("planning should fail");
    assert_eq!(failure.stage, Stage::Planning);
    assert_eq!(llm.calls(), 2);
}

#[tokio::test]
async fn no_matching_rows_produces_insufficient_evidence_without_reasoning() {
    let graph = Arc::new(FakeGraph::new());
    script_table_schema(&graph);
    // The plan query matches nothing and semantic search has no entities.
    let mut config = PipelineConfig::default();
    config.retrieval.enable_semantic = false;

    let llm = Arc::new(MockCompletion::new(vec![plan_response()]));
    let pipeline = Pipeline::new(graph, llm.clone(), Arc::new(CountingEmbedder), config);

    let report = pipeline.answer_question("What columns?").await;
    assert!(report.failure.is_none());
    assert!(report.answer.insufficient_evidence);
    assert_eq!(report.answer.confidence, 0.0);
    // One planning call, no reasoning call.
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn warm_up_populates_embedding_store() {
    let graph = Arc::new(FakeGraph::new());
    script_table_schema(&graph);
    graph.respond(
        "MATCH (n:`Column`) WHERE n.name IS NOT NULL",
        vec![
            row(&[
                ("id", json!(1)),
                ("text", json!("priority")),
                ("labels", json!(["Column"])),
            ]),
            row(&[
                ("id", json!(2)),
                ("text", json!("status")),
                ("labels", json!(["Column"])),
            ]),
        ],
    );

    let pipeline = pipeline_over(graph, vec![]);
    pipeline.warm_up().await.expect("warm up should succeed");

    // Column counts 240 in the scripted schema, which lands it in a lower
    // tier filled by the spawned background task.
    for _ in 0..50 {
        if pipeline.embedding_store().len() >= 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(pipeline.embedding_store().has_embedding("1"));
    assert!(pipeline.embedding_store().has_embedding("2"));
}
