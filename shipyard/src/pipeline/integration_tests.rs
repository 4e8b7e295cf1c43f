//! End-to-end tests for graph building and execution.

use crate::core::{RunStatus, StageStatus};
use crate::errors::ConfigurationError;
use crate::events::kinds;
use crate::pipeline::{ExecutorConfig, PipelineBuilder, StageSpec};
use crate::stages::{CommandStage, FsOperation, FsStage, Stage};
use crate::testing::{
    assert_all_skipped, assert_run_status, assert_stage_status, ConcurrencyProbe, PanickingStage,
    RecordingStage, SlowStage, TestPipeline,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn fixture() -> (tempfile::TempDir, TestPipeline) {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = TestPipeline::new(dir.path());
    (dir, pipeline)
}

#[tokio::test]
async fn test_failure_skips_downstream_without_invoking_it() {
    let (_dir, fixture) = fixture();
    let a = RecordingStage::failing("a", "exit code 1");
    let b = RecordingStage::new("b");
    let c = RecordingStage::new("c");

    let graph = PipelineBuilder::new("chain")
        .stage("a", a.clone(), &[])
        .stage("b", b.clone(), &["a"])
        .stage("c", c.clone(), &["b"])
        .build()
        .unwrap();

    let result = fixture.run(&graph).await;

    assert_stage_status(&result, "a", StageStatus::Failed);
    assert_all_skipped(&result, &["b", "c"]);
    assert_eq!(a.execution_count(), 1);
    assert!(b.never_ran());
    assert!(c.never_ran());
    assert_run_status(&result, RunStatus::Failure);
}

#[tokio::test]
async fn test_independent_branches_keep_running() {
    let (_dir, fixture) = fixture();
    let d = RecordingStage::failing("d", "broken");
    let e = RecordingStage::new("e");

    let graph = PipelineBuilder::new("independent")
        .stage("d", d.clone(), &[])
        .stage("e", e.clone(), &[])
        .build()
        .unwrap();

    let result = fixture.run(&graph).await;

    assert_stage_status(&result, "d", StageStatus::Failed);
    assert_stage_status(&result, "e", StageStatus::Succeeded);
    assert_eq!(e.execution_count(), 1);
    assert_run_status(&result, RunStatus::PartialFailure);
}

#[tokio::test]
async fn test_diamond_waits_for_every_dependency() {
    let (_dir, fixture) = fixture();
    let export = RecordingStage::new("export");
    let themes = RecordingStage::new("themes");
    let plugins = RecordingStage::failing("plugins", "missing build");
    let package = RecordingStage::new("package");
    let lint = RecordingStage::new("lint");

    let graph = PipelineBuilder::new("diamond")
        .stage("export", export.clone(), &[])
        .stage("themes", themes.clone(), &["export"])
        .stage("plugins", plugins.clone(), &["export"])
        .stage("package", package.clone(), &["themes", "plugins"])
        .stage("lint", lint.clone(), &["export"])
        .build()
        .unwrap();

    let result = fixture.run(&graph).await;

    assert_stage_status(&result, "themes", StageStatus::Succeeded);
    assert_stage_status(&result, "lint", StageStatus::Succeeded);
    assert_stage_status(&result, "package", StageStatus::Skipped);
    assert!(package.never_ran());
    assert_eq!(
        result.stage("package").unwrap().error.as_deref(),
        Some("dependency 'plugins' failed")
    );
    assert_run_status(&result, RunStatus::PartialFailure);
}

#[tokio::test]
async fn test_dependencies_finish_before_dependents_start() {
    let (_dir, fixture) = fixture();
    let probe = ConcurrencyProbe::new();
    let slow: Arc<dyn Stage> =
        Arc::new(SlowStage::with_delay_ms("export", 30).with_probe(Arc::clone(&probe)));
    let after = RecordingStage::new("install");

    let graph = PipelineBuilder::new("ordered")
        .stage("install", after.clone(), &["export"])
        .stage("export", slow, &[])
        .build()
        .unwrap();

    let result = fixture.run(&graph).await;

    assert_run_status(&result, RunStatus::Success);
    assert_eq!(after.execution_count(), 1);
    assert_eq!(probe.peak(), 1);
    let export_done = probe.last_exit().unwrap();
    let install_started = after.executions()[0].started;
    assert!(
        install_started >= export_done,
        "install started {:?} before export finished",
        export_done - install_started
    );
    let export_ms = result.stage("export").unwrap().duration_ms.unwrap();
    assert!(export_ms >= 30.0);
}

#[tokio::test]
async fn test_identical_runs_report_identical_statuses() {
    let (_dir, fixture) = fixture();
    let graph = PipelineBuilder::new("repeat")
        .stage("a", RecordingStage::new("a"), &[])
        .stage("b", RecordingStage::failing("b", "nope"), &["a"])
        .stage("c", RecordingStage::new("c"), &["b"])
        .stage("d", RecordingStage::new("d"), &["a"])
        .build()
        .unwrap();

    let first = fixture.run(&graph).await;
    let second = fixture.run(&graph).await;

    assert_eq!(first.status_sequence(), second.status_sequence());
    assert_eq!(first.status, second.status);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_cycle_rejected_before_any_action() {
    let x = RecordingStage::new("x");
    let y = RecordingStage::new("y");
    let z = RecordingStage::new("z");

    let err = PipelineBuilder::new("cyclic")
        .stage("x", x.clone(), &["z"])
        .stage("y", y.clone(), &["x"])
        .stage("z", z.clone(), &["y"])
        .build()
        .unwrap_err();

    assert!(matches!(err, ConfigurationError::CycleDetected(_)));
    assert!(x.never_ran() && y.never_ran() && z.never_ran());
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
    let (_dir, fixture) = fixture();
    let fixture = fixture.with_config(ExecutorConfig::default().with_concurrency(2));
    let probe = ConcurrencyProbe::new();

    let mut builder = PipelineBuilder::new("wide");
    for i in 0..6 {
        let id = format!("stage-{i}");
        let stage = SlowStage::with_delay_ms(&id, 20).with_probe(Arc::clone(&probe));
        builder.add_stage_spec(StageSpec::new(id, Arc::new(stage)));
    }
    let graph = builder.build().unwrap();

    let result = fixture.run(&graph).await;

    assert_run_status(&result, RunStatus::Success);
    assert!(probe.peak() <= 2, "peak concurrency was {}", probe.peak());
    assert!(probe.peak() >= 1);
}

#[tokio::test]
async fn test_independent_stages_overlap() {
    let (_dir, fixture) = fixture();
    let fixture = fixture.with_config(ExecutorConfig::default().with_concurrency(4));
    let probe = ConcurrencyProbe::new();

    let graph = PipelineBuilder::new("parallel")
        .stage(
            "themes",
            Arc::new(SlowStage::with_delay_ms("themes", 50).with_probe(Arc::clone(&probe))),
            &[],
        )
        .stage(
            "plugins",
            Arc::new(SlowStage::with_delay_ms("plugins", 50).with_probe(Arc::clone(&probe))),
            &[],
        )
        .build()
        .unwrap();

    fixture.run(&graph).await;

    assert_eq!(probe.peak(), 2);
}

#[tokio::test]
async fn test_panicking_action_fails_only_its_stage() {
    let (_dir, fixture) = fixture();
    let sibling = RecordingStage::new("sibling");
    let dependent = RecordingStage::new("dependent");

    let graph = PipelineBuilder::new("panic")
        .stage("boom", Arc::new(PanickingStage::new("boom")), &[])
        .stage("dependent", dependent.clone(), &["boom"])
        .stage("sibling", sibling.clone(), &[])
        .build()
        .unwrap();

    let result = fixture.run(&graph).await;

    assert_stage_status(&result, "boom", StageStatus::Failed);
    assert!(result
        .stage("boom")
        .unwrap()
        .error
        .as_deref()
        .unwrap()
        .contains("panicked"));
    assert_stage_status(&result, "dependent", StageStatus::Skipped);
    assert_stage_status(&result, "sibling", StageStatus::Succeeded);
    assert!(dependent.never_ran());
}

#[tokio::test]
async fn test_cancellation_mid_run() {
    let (_dir, fixture) = fixture();
    let after = RecordingStage::new("after");

    let graph = PipelineBuilder::new("cancel")
        .stage(
            "slow",
            Arc::new(SlowStage::new("slow", Duration::from_secs(30))),
            &[],
        )
        .stage("after", after.clone(), &["slow"])
        .build()
        .unwrap();

    let token = Arc::clone(fixture.cancel_token());
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel("interrupted by user");
    });

    let result = tokio::time::timeout(Duration::from_secs(5), fixture.run(&graph))
        .await
        .expect("cancelled run should finish promptly");
    canceller.await.unwrap();

    assert_run_status(&result, RunStatus::Failure);
    assert_stage_status(&result, "slow", StageStatus::Failed);
    assert_eq!(
        result.stage("slow").unwrap().error.as_deref(),
        Some("cancelled: interrupted by user")
    );
    assert_stage_status(&result, "after", StageStatus::Skipped);
    assert!(after.never_ran());
    assert_eq!(fixture.events().events_of_type(kinds::RUN_CANCELLED).len(), 1);
}

#[tokio::test]
async fn test_stages_share_the_workspace() {
    let (dir, fixture) = fixture();

    let graph = PipelineBuilder::new("workspace")
        .stage(
            "mkdir",
            Arc::new(FsStage::new("mkdir", FsOperation::Mkdir { path: "build".into() })),
            &[],
        )
        .stage(
            "write",
            Arc::new(CommandStage::shell("write", "echo built > build/out.txt")),
            &["mkdir"],
        )
        .stage(
            "check",
            Arc::new(CommandStage::exec("check", "test", ["-f", "build/out.txt"])),
            &["write"],
        )
        .build()
        .unwrap();

    let result = fixture.run(&graph).await;

    assert_run_status(&result, RunStatus::Success);
    let written = std::fs::read_to_string(dir.path().join("build/out.txt")).unwrap();
    assert_eq!(written.trim(), "built");
}

#[tokio::test]
async fn test_event_order_for_a_single_stage() {
    let (_dir, fixture) = fixture();
    let graph = PipelineBuilder::new("events")
        .stage("only", RecordingStage::new("only"), &[])
        .build()
        .unwrap();

    fixture.run(&graph).await;

    assert_eq!(
        fixture.events().event_types(),
        vec![
            kinds::RUN_STARTED,
            kinds::STAGE_STARTED,
            kinds::STAGE_SUCCEEDED,
            kinds::RUN_COMPLETED,
        ]
    );
}
