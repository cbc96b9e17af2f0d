//! End-to-end: RAG ingest into the graph, retrieval through the knowledge tool, and
//! duplicate-content dedup.

mod support;

use parley::graph::EdgeDirection;
use parley::rag::{ChunkStrategy, DocumentStatus};
use parley::tools::TOOL_SEARCH_KNOWLEDGE;
use support::{agent, instance_with_agents_and, RUN_DEADLINE};

fn sample_document() -> String {
    let mut paragraphs = Vec::new();
    paragraphs.push(
        "The orchestrator is a durable event queue. Workers claim events under leases \
         and process them one thread at a time."
            .to_string(),
    );
    paragraphs.push(
        "Pelicans are large water birds with enormous throat pouches. They scoop fish \
         while swimming and can soar for hours on thermal currents."
            .to_string(),
    );
    paragraphs.push(
        "Chunk embeddings are stored in a vector table. Retrieval uses cosine \
         similarity over the requested namespaces."
            .to_string(),
    );
    paragraphs.push(
        "Sourdough bread needs a lively starter, patient fermentation, and a very hot \
         oven with steam for the first twenty minutes."
            .to_string(),
    );
    for i in 0..8 {
        paragraphs.push(format!(
            "Filler paragraph number {i} exists to push the document over the chunking \
             threshold with unremarkable content about item {i}."
        ));
    }
    paragraphs.join("\n\n")
}

/// **Scenario**: ingesting ~2 kB of text yields at least three chunk nodes linked by
/// `NEXT_CHUNK` edges, and a knowledge search for overlapping content returns a chunk
/// with similarity above 0.5.
#[tokio::test]
async fn ingest_then_search_roundtrip() {
    let fixture = instance_with_agents_and(vec![agent("helper-1", "Helper")], |config| {
        config.chunking.strategy = ChunkStrategy::Paragraph;
        config.chunking.chunk_size = 40;
        config.chunking.chunk_overlap = 0;
    })
    .await;

    let handle = fixture
        .instance
        .ingest(parley::event::IngestDocumentPayload {
            source: sample_document(),
            title: Some("runtime notes".to_string()),
            namespace: "demo".to_string(),
            metadata: None,
            force_reindex: false,
        })
        .await
        .unwrap();
    assert!(handle.wait_timeout(RUN_DEADLINE).await.unwrap(), "ingest did not settle");

    let deps = fixture.instance.deps();
    let chunks = deps
        .graph
        .nodes_in_namespace("demo", Some("chunk"))
        .await
        .unwrap();
    assert!(chunks.len() >= 3, "expected >= 3 chunks, got {}", chunks.len());

    // Chunks are linked sequentially: N-1 NEXT_CHUNK edges in total.
    let mut next_chunk_edges = 0;
    for chunk in &chunks {
        next_chunk_edges += deps
            .graph
            .edges_for_node(&chunk.id, EdgeDirection::Out, Some(&["NEXT_CHUNK".to_string()]))
            .await
            .unwrap()
            .len();
    }
    assert_eq!(next_chunk_edges, chunks.len() - 1);

    // Every chunk hangs off the document node.
    let documents = deps
        .graph
        .nodes_in_namespace("demo", Some("document"))
        .await
        .unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].name, "runtime notes");

    // Retrieval via the knowledge tool with a query overlapping one paragraph.
    let event = parley::Event::new(
        handle.thread_id().to_string(),
        parley::EventPayload::Custom {
            kind: "PROBE".into(),
            raw: serde_json::json!({}),
        },
    );
    let ctx = deps.tool_context(&event, "helper-1");
    let output = deps
        .tools
        .call(
            TOOL_SEARCH_KNOWLEDGE,
            serde_json::json!({
                "query": "pelicans are large water birds that scoop fish while swimming with throat pouches",
                "namespaces": ["demo"],
                "minSimilarity": 0.5,
            }),
            &ctx,
        )
        .await
        .unwrap();
    assert!(
        output.text.contains("Pelicans") || output.text.contains("pouches"),
        "unexpected search output: {}",
        output.text
    );

    fixture.instance.shutdown().await;
}

/// **Scenario**: re-ingesting identical content with `forceReindex=false` is a no-op —
/// the document is reported skipped and the graph is unchanged.
#[tokio::test]
async fn duplicate_ingest_is_skipped() {
    let fixture = instance_with_agents_and(vec![agent("helper-1", "Helper")], |config| {
        config.chunking.strategy = ChunkStrategy::Paragraph;
        config.chunking.chunk_size = 40;
        config.chunking.chunk_overlap = 0;
    })
    .await;
    let deps = fixture.instance.deps();

    let payload = parley::event::IngestDocumentPayload {
        source: sample_document(),
        title: Some("dedup check".to_string()),
        namespace: "dedup".to_string(),
        metadata: None,
        force_reindex: false,
    };
    let first = fixture.instance.ingest(payload.clone()).await.unwrap();
    assert!(first.wait_timeout(RUN_DEADLINE).await.unwrap());
    let chunks_before = deps
        .graph
        .nodes_in_namespace("dedup", Some("chunk"))
        .await
        .unwrap()
        .len();
    assert!(chunks_before >= 3);

    let second = fixture.instance.ingest(payload).await.unwrap();
    assert!(second.wait_timeout(RUN_DEADLINE).await.unwrap());

    let chunks_after = deps
        .graph
        .nodes_in_namespace("dedup", Some("chunk"))
        .await
        .unwrap()
        .len();
    assert_eq!(chunks_before, chunks_after, "graph changed on duplicate ingest");
    let documents = deps
        .graph
        .nodes_in_namespace("dedup", Some("document"))
        .await
        .unwrap();
    assert_eq!(documents.len(), 1, "duplicate document node created");

    // The relational mirror agrees and stayed indexed.
    let hash = parley::rag::content_hash(&parley::rag::normalize_content(
        &sample_document(),
        "text/plain",
    ));
    let record = deps
        .documents
        .find_by_hash("dedup", &hash)
        .await
        .unwrap()
        .expect("document record");
    assert_eq!(record.status, DocumentStatus::Indexed);

    fixture.instance.shutdown().await;
}
