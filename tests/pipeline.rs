//! End-to-end tests of the retain and recall pipelines through the `Memory`
//! facade, with a scripted text backend standing in for the model.

use std::collections::BTreeMap;
use std::sync::Arc;

use ontomem::config::MemoryConfig;
use ontomem::graph::namespace::{RDF_TYPE, RDFS_CLASS, TRIPLE_UUID};
use ontomem::graph::{Format, Graph, Namespaces, Term, Triple};
use ontomem::llm::{Prompt, ReplayBackend};
use ontomem::memory::Memory;
use ontomem::store::triple::Solution;
use ontomem::store::vector::HnswConfig;
use ontomem::store::{FactRecord, HnswVectorStore, OxigraphStore, StoreResult, TripleStore, VectorStore};

const BORN_IN_CORSICA: &str = r#"[
  {"op": "add_triple", "subject": "ex:napoleon", "predicate": "ex:bornIn", "object": "ex:corsica"}
]"#;

const BORN_IN_AJACCIO: &str = r#"[
  {"op": "add_triple", "subject": "ex:napoleon", "predicate": "ex:bornIn", "object": "ex:ajaccio"}
]"#;

fn namespaces() -> Namespaces {
    let mut ns = Namespaces::new();
    ns.bind("ex", "http://example.org/");
    ns
}

fn ex(local: &str) -> Term {
    Term::iri(format!("http://example.org/{local}"))
}

fn ontology() -> Graph {
    let mut graph = Graph::new();
    graph.add(Triple::new(ex("Person"), Term::iri(RDF_TYPE), Term::iri(RDFS_CLASS)));
    graph.add(Triple::new(ex("Place"), Term::iri(RDF_TYPE), Term::iri(RDFS_CLASS)));
    graph
}

fn ephemeral() -> MemoryConfig {
    MemoryConfig {
        ephemeral: true,
        auto_update: false,
        ..MemoryConfig::default()
    }
}

fn stored_memory(config: MemoryConfig, llm: Arc<ReplayBackend>) -> Memory {
    Memory::new(ontology(), namespaces(), config)
        .with_llm(llm)
        .with_triple_store(Arc::new(OxigraphStore::in_memory().unwrap()))
        .with_vector_store(Arc::new(HnswVectorStore::in_memory(HnswConfig::default())))
}

/// A stored memory plus handles on its stores.
fn observed_memory(config: MemoryConfig, llm: Arc<ReplayBackend>) -> (Memory, Arc<OxigraphStore>, Arc<HnswVectorStore>) {
    let triples = Arc::new(OxigraphStore::in_memory().unwrap());
    let vectors = Arc::new(HnswVectorStore::in_memory(HnswConfig::default()));
    let memory = Memory::new(ontology(), namespaces(), config)
        .with_llm(llm)
        .with_triple_store(triples.clone())
        .with_vector_store(vectors.clone());
    (memory, triples, vectors)
}

fn statement_count(store: &OxigraphStore) -> usize {
    store
        .select(&format!("SELECT ?stmt WHERE {{ GRAPH ?g {{ ?stmt <{TRIPLE_UUID}> ?id }} }}"))
        .unwrap()
        .len()
}

/// Stores that must never be reached.
struct Untouchable;

impl TripleStore for Untouchable {
    fn update(&self, _: &str) -> StoreResult<()> {
        panic!("triple store touched")
    }
    fn construct(&self, _: &str) -> StoreResult<Vec<Triple>> {
        panic!("triple store touched")
    }
    fn select(&self, _: &str) -> StoreResult<Vec<Solution>> {
        panic!("triple store touched")
    }
    fn name(&self) -> &str {
        "untouchable"
    }
}

impl VectorStore for Untouchable {
    fn save(&self, _: &Graph, _: &Namespaces, _: Option<&str>) -> StoreResult<usize> {
        panic!("vector store touched")
    }
    fn search(&self, _: &str, _: Option<&str>, _: usize) -> StoreResult<BTreeMap<String, FactRecord>> {
        panic!("vector store touched")
    }
    fn delete(&self, _: Option<&str>) -> StoreResult<()> {
        panic!("vector store touched")
    }
    fn delete_by_ids(&self, _: Option<&str>, _: &[String]) -> StoreResult<()> {
        panic!("vector store touched")
    }
    fn name(&self) -> &str {
        "untouchable"
    }
}

/// A triple store whose whole-group dump is fixed.
struct Fixture;

impl TripleStore for Fixture {
    fn update(&self, _: &str) -> StoreResult<()> {
        Ok(())
    }
    fn construct(&self, _: &str) -> StoreResult<Vec<Triple>> {
        Ok(Vec::new())
    }
    fn select(&self, _: &str) -> StoreResult<Vec<Solution>> {
        Ok(Vec::new())
    }
    fn name(&self) -> &str {
        "fixture"
    }
    fn get_all(&self, _: &Namespaces, _: Option<&str>) -> StoreResult<String> {
        Ok("ex:napoleon ex:bornIn ex:corsica .".to_string())
    }
}

#[test]
fn valid_commit_applies_without_repair() {
    let llm = Arc::new(ReplayBackend::new().respond(Prompt::CommitToMemory, BORN_IN_CORSICA));
    let mut memory = Memory::new(ontology(), namespaces(), ephemeral()).with_llm(llm.clone());

    let report = memory.retain("Napoleon was born in Corsica.", None).unwrap();
    let commit = report.commit.unwrap();
    assert!(commit.succeeded);
    assert_eq!(commit.attempts, 1);

    assert_eq!(llm.call_count(Prompt::CommitToMemory), 1);
    assert_eq!(llm.call_count(Prompt::CommitToMemoryErrorHandling), 0);
    assert!(memory.data().contains(&Triple::new(ex("napoleon"), ex("bornIn"), ex("corsica"))));
}

#[test]
fn broken_instructions_are_repaired_once_then_abandoned() {
    let llm = Arc::new(
        ReplayBackend::new()
            .respond(Prompt::CommitToMemory, "this is not an instruction list")
            .with_default(Prompt::CommitToMemoryErrorHandling, "still not one"),
    );
    let config = MemoryConfig {
        max_retries: 1,
        ..ephemeral()
    };
    let mut memory = Memory::new(ontology(), namespaces(), config).with_llm(llm.clone());

    let report = memory.retain("Napoleon was born in Corsica.", None).unwrap();
    let commit = report.commit.unwrap();
    assert!(!commit.succeeded);
    assert_eq!(commit.attempts, 2);
    assert!(commit.last_error.is_some());

    assert_eq!(llm.call_count(Prompt::CommitToMemoryErrorHandling), 1);
    assert!(memory.data().is_empty());
}

#[test]
fn repaired_instructions_are_applied() {
    let llm = Arc::new(
        ReplayBackend::new()
            .respond(
                Prompt::CommitToMemory,
                r#"[{"op": "add_triple", "subject": "nope:napoleon", "predicate": "ex:bornIn", "object": "ex:corsica"}]"#,
            )
            .respond(Prompt::CommitToMemoryErrorHandling, BORN_IN_CORSICA),
    );
    let mut memory = Memory::new(ontology(), namespaces(), ephemeral()).with_llm(llm.clone());

    let commit = memory.retain("Napoleon was born in Corsica.", None).unwrap().commit.unwrap();
    assert!(commit.succeeded);
    assert_eq!(commit.attempts, 2);

    let repair = &llm.calls()[1];
    assert_eq!(repair.prompt, Prompt::CommitToMemoryErrorHandling);
    assert!(repair.vars.get("script").unwrap().contains("nope:napoleon"));
    assert!(!repair.vars.get("error").unwrap().is_empty());
    assert_eq!(memory.data().len(), 1);
}

#[test]
fn resource_with_a_space_is_repaired_once() {
    let llm = Arc::new(
        ReplayBackend::new()
            .respond(
                Prompt::CommitToMemory,
                r#"[{"op": "add_triple", "subject": "ex:Napoleon Bonaparte", "predicate": "ex:bornIn", "object": "ex:corsica"}]"#,
            )
            .respond(Prompt::CommitToMemoryErrorHandling, BORN_IN_CORSICA),
    );
    let mut memory = Memory::new(ontology(), namespaces(), ephemeral()).with_llm(llm.clone());

    let commit = memory.retain("Napoleon Bonaparte was born in Corsica.", None).unwrap().commit.unwrap();
    assert!(commit.succeeded);
    assert_eq!(commit.attempts, 2);
    assert_eq!(llm.call_count(Prompt::CommitToMemoryErrorHandling), 1);

    let repair = &llm.calls()[1];
    assert!(repair.vars.get("error").unwrap().contains("Napoleon Bonaparte"));
    assert_eq!(memory.data().len(), 1);
    assert!(memory.data().contains(&Triple::new(ex("napoleon"), ex("bornIn"), ex("corsica"))));
}

#[test]
fn ephemeral_recall_never_touches_stores() {
    let llm = Arc::new(
        ReplayBackend::new()
            .respond(Prompt::CommitToMemory, BORN_IN_CORSICA)
            .with_default(Prompt::SummarizeMemory, "Napoleon was born in Corsica."),
    );
    let mut memory = Memory::new(ontology(), namespaces(), ephemeral())
        .with_llm(llm.clone())
        .with_triple_store(Arc::new(Untouchable))
        .with_vector_store(Arc::new(Untouchable));

    memory.retain("Napoleon was born in Corsica.", None).unwrap();
    let summary = memory.recall(Some("Where was Napoleon born?"), None).unwrap();
    assert_eq!(summary, "Napoleon was born in Corsica.");

    let call = llm.calls().pop().unwrap();
    assert_eq!(call.prompt, Prompt::SummarizeMemory);
    assert!(call.vars.get("memory").unwrap().contains("corsica"));
    assert_eq!(call.vars.get("context"), Some("Where was Napoleon born?"));
}

#[test]
fn recall_without_a_question_summarizes_the_whole_group() {
    let llm = Arc::new(ReplayBackend::new().with_default(Prompt::SummarizeMemory, "summary"));
    let memory = Memory::new(ontology(), namespaces(), MemoryConfig::default())
        .with_llm(llm.clone())
        .with_triple_store(Arc::new(Fixture))
        .with_vector_store(Arc::new(Untouchable));

    for question in [None, Some(""), Some("  ")] {
        assert_eq!(memory.recall(question, Some("u")).unwrap(), "summary");
        let call = llm.calls().pop().unwrap();
        assert_eq!(call.vars.get("memory"), Some("ex:napoleon ex:bornIn ex:corsica ."));
    }
}

#[test]
fn expansion_runs_once_before_commit() {
    let llm = Arc::new(
        ReplayBackend::new()
            .respond(
                Prompt::ExpandOntology,
                r#"[{"op": "add_class", "class": "ex:Island", "subclass_of": "ex:Place"}]"#,
            )
            .respond(
                Prompt::CommitToMemory,
                r#"[{"op": "add_triple", "subject": "ex:corsica", "predicate": "rdf:type", "object": "ex:Island"}]"#,
            ),
    );
    let config = MemoryConfig {
        auto_expand: true,
        ..ephemeral()
    };
    let mut memory = Memory::new(ontology(), namespaces(), config).with_llm(llm.clone());

    let report = memory.retain("Corsica is an island.", None).unwrap();
    assert!(report.expansion.unwrap().succeeded);
    assert!(report.commit.unwrap().succeeded);

    let prompts: Vec<Prompt> = llm.calls().iter().map(|c| c.prompt).collect();
    assert_eq!(prompts, vec![Prompt::ExpandOntology, Prompt::CommitToMemory]);
    let commit = &llm.calls()[1];
    assert!(commit.vars.get("ontology").unwrap().contains("Island"));
    assert!(
        memory
            .ontology()
            .contains(&Triple::new(ex("Island"), Term::iri(RDF_TYPE), Term::iri(RDFS_CLASS)))
    );
}

#[test]
fn stored_retain_then_recall() {
    let llm = Arc::new(
        ReplayBackend::new()
            .respond(Prompt::CommitToMemory, BORN_IN_CORSICA)
            .with_default(Prompt::SummarizeMemory, "Napoleon was born in Corsica."),
    );
    let mut memory = stored_memory(MemoryConfig::default(), llm.clone());

    let report = memory.retain("Napoleon was born in Corsica.", Some("alice")).unwrap();
    assert!(report.persisted);
    assert!(memory.data().is_empty());
    // Nothing stored yet, so nothing to reconcile.
    assert_eq!(llm.call_count(Prompt::UpdateMemory), 0);

    let summary = memory.recall(Some("Where was Napoleon born?"), Some("alice")).unwrap();
    assert_eq!(summary, "Napoleon was born in Corsica.");
    let call = llm.calls().pop().unwrap();
    assert!(call.vars.get("memory").unwrap().contains("corsica"));

    // Groups do not see each other.
    assert!(memory.query(Some("bob"), Some("ex:napoleon"), None).unwrap().is_empty());
    assert_eq!(memory.query(Some("alice"), Some("ex:napoleon"), None).unwrap().len(), 1);
}

#[test]
fn superseded_facts_are_retired_before_the_new_commit() {
    let llm = Arc::new(
        ReplayBackend::new()
            .respond(Prompt::CommitToMemory, BORN_IN_CORSICA)
            .respond(Prompt::CommitToMemory, BORN_IN_AJACCIO)
            // The model keeps none of the candidates it was shown.
            .respond(Prompt::UpdateMemory, "{}"),
    );
    let mut memory = stored_memory(MemoryConfig::default(), llm.clone());

    memory.retain("Napoleon was born in Corsica.", Some("alice")).unwrap();
    let report = memory
        .retain("Actually, Napoleon was born in Ajaccio.", Some("alice"))
        .unwrap();

    let update = report.update.unwrap();
    assert_eq!(update.removed, 1);
    assert!(update.inconsistent_ids.is_empty());
    assert_eq!(llm.call_count(Prompt::UpdateMemory), 1);

    let facts = memory.query(Some("alice"), Some("ex:napoleon"), None).unwrap();
    assert_eq!(facts, vec![Triple::new(ex("napoleon"), ex("bornIn"), ex("ajaccio"))]);
}

#[test]
fn retaining_a_known_fact_reuses_its_statement() {
    let llm = Arc::new(
        ReplayBackend::new()
            .respond(Prompt::CommitToMemory, BORN_IN_CORSICA)
            .respond(Prompt::CommitToMemory, BORN_IN_CORSICA),
    );
    let config = MemoryConfig {
        auto_update: false,
        ..MemoryConfig::default()
    };
    let (mut memory, triples, vectors) = observed_memory(config, llm);

    assert!(memory.retain("Napoleon was born in Corsica.", Some("alice")).unwrap().persisted);
    let stored = triples.len().unwrap();
    assert!(memory.retain("Napoleon was born in Corsica, again.", Some("alice")).unwrap().persisted);

    assert_eq!(statement_count(&triples), 1);
    assert_eq!(triples.len().unwrap(), stored);
    assert_eq!(vectors.len(Some("alice")), 1);
}

#[test]
fn superseded_facts_leave_the_remembered_graph() {
    let llm = Arc::new(
        ReplayBackend::new()
            .respond(Prompt::CommitToMemory, BORN_IN_CORSICA)
            .respond(Prompt::CommitToMemory, BORN_IN_AJACCIO)
            .respond(Prompt::UpdateMemory, "{}"),
    );
    let (mut memory, triples, vectors) = observed_memory(MemoryConfig::default(), llm);

    memory.retain("Napoleon was born in Corsica.", Some("alice")).unwrap();
    memory.remember(Some("alice")).unwrap();
    assert!(memory.data().contains(&Triple::new(ex("napoleon"), ex("bornIn"), ex("corsica"))));

    let report = memory
        .retain("Actually, Napoleon was born in Ajaccio.", Some("alice"))
        .unwrap();
    assert_eq!(report.update.unwrap().removed, 1);
    assert!(report.persisted);

    let facts = memory.query(Some("alice"), Some("ex:napoleon"), None).unwrap();
    assert_eq!(facts, vec![Triple::new(ex("napoleon"), ex("bornIn"), ex("ajaccio"))]);
    assert_eq!(statement_count(&triples), 1);
    assert_eq!(vectors.len(Some("alice")), 1);

    memory.remember(Some("alice")).unwrap();
    let turtle = memory.render(Format::Turtle).unwrap();
    assert!(turtle.contains("ajaccio"));
    assert!(!turtle.contains("corsica"));
}

#[test]
fn forget_then_remember_leaves_nothing() {
    let llm = Arc::new(ReplayBackend::new().respond(Prompt::CommitToMemory, BORN_IN_CORSICA));
    let config = MemoryConfig {
        auto_update: false,
        ..MemoryConfig::default()
    };
    let mut memory = stored_memory(config, llm);

    memory.retain("Napoleon was born in Corsica.", Some("alice")).unwrap();
    memory.remember(Some("alice")).unwrap();
    let turtle = memory.render(Format::Turtle).unwrap();
    assert!(turtle.contains("corsica"));
    assert!(!turtle.contains("uuid"));

    memory.forget(Some("alice")).unwrap();
    memory.remember(Some("alice")).unwrap();
    assert!(memory.data().is_empty());
    assert!(memory.query(Some("alice"), Some("ex:napoleon"), None).unwrap().is_empty());
}

#[cfg(feature = "async")]
#[tokio::test]
async fn async_memory_runs_off_the_event_loop() {
    use ontomem::memory::AsyncMemory;

    let llm = Arc::new(
        ReplayBackend::new()
            .respond(Prompt::CommitToMemory, BORN_IN_CORSICA)
            .with_default(Prompt::SummarizeMemory, "Corsica."),
    );
    let memory = AsyncMemory::new(stored_memory(MemoryConfig::default(), llm));

    let report = memory
        .retain("Napoleon was born in Corsica.".to_string(), Some("alice".to_string()))
        .await
        .unwrap();
    assert!(report.persisted);

    let summary = memory
        .recall(Some("Where?".to_string()), Some("alice".to_string()))
        .await
        .unwrap();
    assert_eq!(summary, "Corsica.");

    let facts = memory
        .query(Some("alice".to_string()), Some("ex:napoleon".to_string()), None)
        .await
        .unwrap();
    assert_eq!(facts.len(), 1);
}
