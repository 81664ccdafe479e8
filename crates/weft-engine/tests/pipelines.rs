//! End-to-end pipeline runs against deterministic backends.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use weft_backend::{FnBackend, ScriptedBackend};
use weft_core::error::WeftError;
use weft_core::state::StateStore;
use weft_core::traits::UnitBackend;
use weft_core::types::{LoopOutcome, PipelineEvent, UnitReply, TERMINATION_TOOL};
use weft_engine::{ExecutionEngine, Loop, Parallel, Pipeline, Sequential, Unit};
use weft_tools::ToolRegistry;

fn engine(backend: impl UnitBackend) -> ExecutionEngine {
    ExecutionEngine::new(Arc::new(backend), Arc::new(ToolRegistry::with_builtins()))
}

/// Backend that records every resolved instruction it receives.
fn capturing_backend(seen: Arc<Mutex<Vec<(String, String)>>>) -> FnBackend {
    FnBackend::from_sync(move |req| {
        let mut seen = seen.lock().unwrap();
        seen.push((req.unit.clone(), req.instruction.clone()));
        Ok(UnitReply::text(format!("{} output", req.unit)))
    })
}

fn blog_pipeline() -> Pipeline {
    Pipeline::with_inputs(
        "BlogPipeline",
        Sequential::new(
            "BlogPipeline",
            vec![
                Unit::new(
                    "OutlineUnit",
                    "Create a blog outline for {topic}.",
                    "blog_outline",
                )
                .into(),
                Unit::new(
                    "WriterUnit",
                    "Following this outline strictly: {blog_outline}\nWrite the post.",
                    "blog_draft",
                )
                .into(),
                Unit::new("EditorUnit", "Edit this draft: {blog_draft}", "final_blog").into(),
            ],
        ),
        vec!["topic".into()],
    )
    .unwrap()
}

#[tokio::test]
async fn sequential_children_observe_predecessor_writes_in_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let backend = capturing_backend(seen.clone());

    let initial = StateStore::from_pairs([("topic", serde_json::json!("container gardening"))]);
    let report = engine(backend)
        .run(&blog_pipeline(), initial)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].0, "OutlineUnit");
    assert!(seen[0].1.contains("container gardening"));
    // The writer sees the outline's output, the editor sees the writer's
    assert!(seen[1].1.contains("OutlineUnit output"));
    assert!(seen[2].1.contains("WriterUnit output"));

    assert_eq!(report.output_str("final_blog"), Some("EditorUnit output"));
    let keys: Vec<_> = report.state.keys().collect();
    assert_eq!(
        keys,
        vec!["topic", "blog_outline", "blog_draft", "final_blog"]
    );
}

#[tokio::test]
async fn sequential_scenario_x_then_f_of_x() {
    let backend = FnBackend::from_sync(|req| match req.unit.as_str() {
        "UnitA" => Ok(UnitReply::text("foo")),
        _ => Ok(UnitReply::text(format!("f({})", req.instruction))),
    });

    let pipeline = Pipeline::new(
        "XY",
        Sequential::new(
            "XY",
            vec![
                Unit::new("UnitA", "produce x", "x").into(),
                Unit::new("UnitB", "{x}", "y").into(),
            ],
        ),
    )
    .unwrap();

    let report = engine(backend).run(&pipeline, StateStore::new()).await.unwrap();
    assert_eq!(report.output_str("x"), Some("foo"));
    assert_eq!(report.output_str("y"), Some("f(foo)"));
}

#[tokio::test]
async fn parallel_branches_run_concurrently() {
    // Both branches must be in flight at once for the barrier to release;
    // serial dispatch would deadlock and trip the timeout instead.
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let backend = FnBackend::new(move |req| {
        let barrier = barrier.clone();
        Box::pin(async move {
            barrier.wait().await;
            Ok(UnitReply::text(format!("{} report", req.unit)))
        })
    });

    let pipeline = Pipeline::new(
        "Fan",
        Parallel::new(
            "Fan",
            vec![
                Unit::new("TechResearcher", "research tech", "tech_research").into(),
                Unit::new("HealthResearcher", "research health", "health_research").into(),
            ],
        ),
    )
    .unwrap();

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        engine(backend).run(&pipeline, StateStore::new()),
    )
    .await
    .expect("parallel branches were dispatched serially")
    .unwrap();

    assert_eq!(
        report.output_str("tech_research"),
        Some("TechResearcher report")
    );
    assert_eq!(
        report.output_str("health_research"),
        Some("HealthResearcher report")
    );
}

#[tokio::test]
async fn parallel_fan_in_sees_all_outputs_regardless_of_finish_order() {
    let backend = FnBackend::new(|req| {
        Box::pin(async move {
            match req.unit.as_str() {
                // The slow branch finishes last; the aggregator must still
                // see both keys.
                "SlowResearcher" => {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(UnitReply::text("slow findings"))
                }
                "FastResearcher" => Ok(UnitReply::text("fast findings")),
                _ => Ok(UnitReply::text(format!("summary of: {}", req.instruction))),
            }
        })
    });

    let pipeline = Pipeline::new(
        "ResearchSystem",
        Sequential::new(
            "ResearchSystem",
            vec![
                Parallel::new(
                    "ResearchTeam",
                    vec![
                        Unit::new("SlowResearcher", "dig deep", "p").into(),
                        Unit::new("FastResearcher", "skim", "q").into(),
                    ],
                )
                .into(),
                Unit::new("Aggregator", "Combine {p} and {q}.", "executive_summary").into(),
            ],
        ),
    )
    .unwrap();

    let report = engine(backend).run(&pipeline, StateStore::new()).await.unwrap();
    let summary = report.output_str("executive_summary").unwrap();
    assert!(summary.contains("slow findings"));
    assert!(summary.contains("fast findings"));
}

#[tokio::test]
async fn parallel_branches_are_isolated_from_sibling_writes() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let backend = capturing_backend(seen.clone());

    // Each branch is a sequence whose second unit reads its own branch's
    // write. Neither may observe the other branch's keys mid-flight.
    let pipeline = Pipeline::with_inputs(
        "Isolated",
        Parallel::new(
            "Isolated",
            vec![
                Sequential::new(
                    "Left",
                    vec![
                        Unit::new("LeftDraft", "draft from {seed}", "left_draft").into(),
                        Unit::new("LeftPolish", "polish {left_draft}", "left_final").into(),
                    ],
                )
                .into(),
                Sequential::new(
                    "Right",
                    vec![
                        Unit::new("RightDraft", "draft from {seed}", "right_draft").into(),
                        Unit::new("RightPolish", "polish {right_draft}", "right_final").into(),
                    ],
                )
                .into(),
            ],
        ),
        vec!["seed".into()],
    )
    .unwrap();

    let initial = StateStore::from_pairs([("seed", serde_json::json!("the shared seed"))]);
    let report = engine(backend).run(&pipeline, initial).await.unwrap();

    let seen = seen.lock().unwrap();
    let instruction_of = |unit: &str| {
        seen.iter()
            .find(|(u, _)| u == unit)
            .map(|(_, i)| i.clone())
            .unwrap()
    };

    // Within a branch, reads see the branch's own writes
    assert_eq!(instruction_of("LeftPolish"), "polish LeftDraft output");
    assert_eq!(instruction_of("RightPolish"), "polish RightDraft output");
    // Both branches resolved from the same pre-dispatch snapshot
    assert_eq!(instruction_of("LeftDraft"), "draft from the shared seed");
    assert_eq!(instruction_of("RightDraft"), "draft from the shared seed");

    // After the merge, every declared key from both branches is present
    for key in ["left_draft", "left_final", "right_draft", "right_final"] {
        assert!(report.state.contains_key(key), "missing {}", key);
    }
}

#[tokio::test]
async fn parallel_failure_waits_for_siblings_and_aggregates() {
    let completed = Arc::new(Mutex::new(Vec::new()));
    let done = completed.clone();
    let backend = FnBackend::new(move |req| {
        let done = done.clone();
        Box::pin(async move {
            match req.unit.as_str() {
                "Faulty" => Err(WeftError::Backend {
                    unit: req.unit,
                    message: "upstream 500".into(),
                }),
                "AlsoFaulty" => Err(WeftError::Backend {
                    unit: req.unit,
                    message: "connection refused".into(),
                }),
                _ => {
                    // Slow healthy sibling, must still run to completion
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    done.lock().unwrap().push(req.unit.clone());
                    Ok(UnitReply::text("fine"))
                }
            }
        })
    });

    let pipeline = Pipeline::new(
        "Fan",
        Parallel::new(
            "Fan",
            vec![
                Unit::new("Healthy", "work", "h").into(),
                Unit::new("Faulty", "work", "f1").into(),
                Unit::new("AlsoFaulty", "work", "f2").into(),
            ],
        ),
    )
    .unwrap();

    let err = engine(backend)
        .run(&pipeline, StateStore::new())
        .await
        .unwrap_err();

    match err {
        WeftError::ParallelBranches { failures } => {
            let names: Vec<_> = failures.iter().map(|(n, _)| n.as_str()).collect();
            assert_eq!(names, vec!["Faulty", "AlsoFaulty"]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    // The healthy branch was not cancelled by its siblings' failures
    assert_eq!(*completed.lock().unwrap(), vec!["Healthy".to_string()]);
}

fn story_pipeline(max_iterations: usize) -> Pipeline {
    Pipeline::with_inputs(
        "StoryPipeline",
        Sequential::new(
            "StoryPipeline",
            vec![
                Unit::new("InitialWriter", "Write a story about {prompt}.", "current_story")
                    .into(),
                Loop::new(
                    "RefinementLoop",
                    vec![
                        Unit::new("Critic", "Review the story: {current_story}", "critique")
                            .into(),
                        Unit::new(
                            "Refiner",
                            "Story: {current_story}\nCritique: {critique}\nRewrite or finish.",
                            "current_story",
                        )
                        .with_tools(vec![TERMINATION_TOOL.into()])
                        .into(),
                    ],
                    max_iterations,
                )
                .into(),
            ],
        ),
        vec!["prompt".into()],
    )
    .unwrap()
}

#[tokio::test]
async fn loop_stops_at_signalling_iteration() {
    // Iteration 1: critique asks for changes, refiner rewrites.
    // Iteration 2: critique approves, refiner raises the signal.
    let backend = ScriptedBackend::new()
        .text("InitialWriter", "draft v1")
        .text("Critic", "add a twist")
        .text("Critic", "APPROVED")
        .text("Refiner", "draft v2")
        .reply(
            "Refiner",
            UnitReply::tool(TERMINATION_TOOL, serde_json::json!({ "reason": "critique approved" })),
        );

    let engine = engine(backend);
    let mut events = engine.event_bus().subscribe();

    let initial = StateStore::from_pairs([("prompt", serde_json::json!("a lighthouse"))]);
    let report = engine.run(&story_pipeline(5), initial).await.unwrap();

    // The loop ran exactly two iterations of each child
    assert_eq!(report.invocations("Critic"), 2);
    assert_eq!(report.invocations("Refiner"), 2);
    // The refiner's signalling reply carried no value, so the story is v2
    assert_eq!(report.output_str("current_story"), Some("draft v2"));
    assert_eq!(report.output_str("critique"), Some("APPROVED"));

    let mut loop_finished = None;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::LoopFinished {
            outcome, iterations, ..
        } = event
        {
            loop_finished = Some((outcome, iterations));
        }
    }
    assert_eq!(loop_finished, Some((LoopOutcome::Signalled, 2)));
}

#[tokio::test]
async fn loop_signal_on_first_iteration_skips_the_rest() {
    let backend = ScriptedBackend::new()
        .text("InitialWriter", "draft v1")
        .text("Critic", "APPROVED")
        .reply(
            "Refiner",
            UnitReply::tool(TERMINATION_TOOL, serde_json::json!({})),
        );

    let report = engine(backend)
        .run(
            &story_pipeline(2),
            StateStore::from_pairs([("prompt", serde_json::json!("a comet"))]),
        )
        .await
        .unwrap();

    // Final state reflects iteration 1 only; iteration 2 never ran
    assert_eq!(report.invocations("Critic"), 1);
    assert_eq!(report.invocations("Refiner"), 1);
    assert_eq!(report.output_str("current_story"), Some("draft v1"));
}

#[tokio::test]
async fn loop_without_signal_exits_via_iteration_budget() {
    let calls = Arc::new(Mutex::new(0u32));
    let counter = calls.clone();
    let backend = FnBackend::from_sync(move |req| {
        if req.unit == "Critic" {
            let mut n = counter.lock().unwrap();
            *n += 1;
            Ok(UnitReply::text(format!("round {}", n)))
        } else {
            Ok(UnitReply::text(format!("rewrite after: {}", req.instruction)))
        }
    });

    let engine = engine(backend);
    let mut events = engine.event_bus().subscribe();
    let report = engine
        .run(
            &story_pipeline(3),
            StateStore::from_pairs([("prompt", serde_json::json!("a glacier"))]),
        )
        .await
        .unwrap();

    assert_eq!(report.invocations("Critic"), 3);
    assert_eq!(report.invocations("Refiner"), 3);
    // State left from the final iteration
    assert_eq!(report.output_str("critique"), Some("round 3"));

    let mut loop_finished = None;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::LoopFinished {
            outcome, iterations, ..
        } = event
        {
            loop_finished = Some((outcome, iterations));
        }
    }
    assert_eq!(loop_finished, Some((LoopOutcome::MaxIterations, 3)));
}

#[tokio::test]
async fn identical_runs_produce_identical_state() {
    let make_backend = || {
        FnBackend::from_sync(|req| Ok(UnitReply::text(format!("out<{}>", req.instruction))))
    };
    let initial =
        || StateStore::from_pairs([("topic", serde_json::json!("tidal power"))]);

    let first = engine(make_backend())
        .run(&blog_pipeline(), initial())
        .await
        .unwrap();
    let second = engine(make_backend())
        .run(&blog_pipeline(), initial())
        .await
        .unwrap();

    let pairs = |report: &weft_engine::RunReport| {
        report
            .state
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(pairs(&first), pairs(&second));
}

#[tokio::test]
async fn run_emits_lifecycle_events_in_order() {
    let backend = FnBackend::from_sync(|_| Ok(UnitReply::text("ok")));
    let engine = engine(backend);
    let mut events = engine.event_bus().subscribe();

    let initial = StateStore::from_pairs([("topic", serde_json::json!("kelp farming"))]);
    engine.run(&blog_pipeline(), initial).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(match event {
            PipelineEvent::RunStarted { .. } => "run_started",
            PipelineEvent::UnitStarted { .. } => "unit_started",
            PipelineEvent::UnitCompleted { .. } => "unit_completed",
            PipelineEvent::RunCompleted { .. } => "run_completed",
            _ => "other",
        });
    }

    assert_eq!(kinds.first(), Some(&"run_started"));
    assert_eq!(kinds.last(), Some(&"run_completed"));
    assert_eq!(kinds.iter().filter(|k| **k == "unit_completed").count(), 3);
}

#[tokio::test]
async fn report_records_follow_execution_order() {
    let backend = FnBackend::from_sync(|req| Ok(UnitReply::text(format!("{} done", req.unit))));

    let initial = StateStore::from_pairs([("topic", serde_json::json!("peat bogs"))]);
    let report = engine(backend)
        .run(&blog_pipeline(), initial)
        .await
        .unwrap();

    let units: Vec<_> = report.records.iter().map(|r| r.unit.as_str()).collect();
    assert_eq!(units, vec!["OutlineUnit", "WriterUnit", "EditorUnit"]);
    assert!(report.records.iter().all(|r| r.wrote_value));
}
