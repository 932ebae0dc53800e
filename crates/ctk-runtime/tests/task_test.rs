//! Task lifecycle against an in-memory task service.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::BTreeMap;

use chrono::Utc;
use common::{Harness, recording_io};
use ctk_common::constants::{RUNTIME_RUNC_V2, RUNTIME_WINDOWS, UNKNOWN_EXIT_STATUS};
use ctk_common::error::CtkError;
use ctk_common::types::{ProcessStatus, ResourceLimits};
use ctk_runtime::container::NewTaskOpts;
use ctk_runtime::metrics::{RESOURCES_TYPE, UpdateTaskInfo};
use ctk_runtime::options::TaskOptions;
use ctk_runtime::process::{DeleteOpts, KillOpts};
use ctk_runtime::services::{Any, Code, Metric};
use nix::sys::signal::Signal;

#[tokio::test]
async fn start_records_the_pid() {
    let h = Harness::new();
    h.service.set_create_pid(0);
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    assert_eq!(task.pid(), 0);

    task.start().await.unwrap();
    assert_eq!(task.pid(), 42);
}

#[tokio::test]
async fn failed_start_cancels_and_closes_streams() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    h.service.fail("start", Code::Internal);

    let err = task.start().await.unwrap_err();
    assert!(matches!(err, CtkError::Internal { .. }));
    assert_eq!(h.log.after("rpc:start"), ["io:cancel", "io:close"]);
}

#[tokio::test]
async fn delete_of_stopped_task_drains_streams_then_closes_them() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    h.service.set_status("STOPPED");
    h.service.set_exit_status(3);

    let exit = task.delete(DeleteOpts::default()).await.unwrap();
    assert_eq!(exit.code(), 3);
    assert!(exit.exited_at().is_some());

    let events = h.log.after("rpc:get");
    assert_eq!(events, ["io:cancel", "io:wait", "rpc:delete", "io:close"]);
    assert!(task.io_config().await.is_none());
}

#[tokio::test]
async fn delete_of_running_task_is_refused_without_remote_delete() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    h.service.set_status("RUNNING");

    let err = task.delete(DeleteOpts::default()).await.unwrap_err();
    assert!(err.is_failed_precondition());
    assert!(err.to_string().contains("running"), "{err}");
    assert_eq!(h.log.count("rpc:delete"), 0);
    assert_eq!(h.log.count("io:close"), 0);
}

#[tokio::test]
async fn delete_of_paused_task_is_refused() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    h.service.set_status("PAUSED");

    let err = task.delete(DeleteOpts::default()).await.unwrap_err();
    assert!(err.is_failed_precondition());
    assert!(err.to_string().contains("paused"), "{err}");
}

#[tokio::test]
async fn delete_of_created_task_without_pid_proceeds() {
    let h = Harness::new();
    h.service.set_create_pid(0);
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    h.service.set_status("CREATED");

    let _ = task.delete(DeleteOpts::default()).await.unwrap();
    assert_eq!(h.log.count("rpc:delete"), 1);
}

#[tokio::test]
async fn delete_of_created_task_with_pid_is_refused() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    assert_eq!(task.pid(), 42);
    h.service.set_status("CREATED");

    let err = task.delete(DeleteOpts::default()).await.unwrap_err();
    assert!(err.is_failed_precondition());
    assert!(err.to_string().contains("created"), "{err}");
    assert_eq!(h.log.count("rpc:delete"), 0);
}

#[tokio::test]
async fn delete_of_created_task_on_windows_closes_streams_first() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_WINDOWS).await;
    h.service.set_status("CREATED");

    let _ = task.delete(DeleteOpts::default()).await.unwrap();
    let events = h.log.after("rpc:get");
    assert_eq!(
        events,
        ["io:close", "io:cancel", "io:wait", "rpc:delete", "io:close"]
    );
}

#[tokio::test]
async fn delete_of_task_in_unknown_status_proceeds() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    h.service.set_status("FROZEN");
    assert_eq!(task.status().await.unwrap().status, ProcessStatus::Unknown);

    let _ = task.delete(DeleteOpts::default()).await.unwrap();
    assert_eq!(h.log.count("rpc:delete"), 1);
}

#[tokio::test]
async fn delete_reports_a_missing_task_without_remote_delete() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    h.service.fail("get", Code::NotFound);

    let err = task.delete(DeleteOpts::default()).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(h.log.count("rpc:delete"), 0);
}

#[tokio::test]
async fn delete_proceeds_when_status_lookup_fails_otherwise() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    h.service.fail("get", Code::Unavailable);

    let _ = task.delete(DeleteOpts::default()).await.unwrap();
    assert_eq!(h.log.count("rpc:delete"), 1);
}

#[tokio::test]
async fn failed_remote_delete_leaves_streams_open() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    h.service.set_status("STOPPED");
    h.service.fail("delete", Code::Internal);

    let _ = task.delete(DeleteOpts::default()).await.unwrap_err();
    assert_eq!(h.log.count("io:close"), 0);
    assert!(task.io_config().await.is_some());
}

#[tokio::test]
async fn kill_first_hook_kills_everything_before_delete() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    h.service.set_status("STOPPED");

    let _ = task
        .delete(DeleteOpts::default().kill_first())
        .await
        .unwrap();

    let kills = h.service.kills();
    assert_eq!(kills.len(), 1);
    assert_eq!(kills[0].signal, 9);
    assert!(kills[0].all);
    assert!(h.log.position("rpc:kill").unwrap() < h.log.position("rpc:delete").unwrap());
}

#[tokio::test]
async fn wait_resolves_with_the_exit_status() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    h.service.set_exit_status(7);

    let exit = task.wait().await.unwrap().await.unwrap();
    assert_eq!(exit.code(), 7);
    assert!(exit.error().is_none());
}

#[tokio::test]
async fn failed_wait_resolves_with_the_unknown_exit_status() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    h.service.fail("wait", Code::Unavailable);

    let exit = task.wait().await.unwrap().await.unwrap();
    assert_eq!(exit.code(), UNKNOWN_EXIT_STATUS);
    assert!(exit.exited_at().is_none());
    assert_eq!(
        exit.error().map(CtkError::kind),
        Some(ctk_common::error::ErrorKind::Unavailable)
    );
}

#[tokio::test]
async fn kill_forwards_signal_and_target() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;

    task.kill(Signal::SIGTERM, KillOpts::default()).await.unwrap();
    task.kill(Signal::SIGHUP, KillOpts::exec("e1")).await.unwrap();

    let kills = h.service.kills();
    assert_eq!((kills[0].signal, kills[0].exec_id.as_str(), kills[0].all), (15, "", false));
    assert_eq!((kills[1].signal, kills[1].exec_id.as_str()), (1, "e1"));
}

#[tokio::test]
async fn remote_errors_are_normalized() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    h.service.fail("pause", Code::FailedPrecondition);
    h.service.fail("resume", Code::NotFound);

    assert!(task.pause().await.unwrap_err().is_failed_precondition());
    assert!(task.resume().await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn update_encodes_resource_limits() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    let limits = ResourceLimits {
        memory_bytes: Some(64 << 20),
        ..ResourceLimits::default()
    };

    task.update(UpdateTaskInfo {
        resources: Some(limits.clone()),
        annotations: BTreeMap::from([("owner".to_string(), "ops".to_string())]),
    })
    .await
    .unwrap();

    let update = &h.service.updates()[0];
    let resources = update.resources.as_ref().unwrap();
    assert_eq!(resources.type_url, RESOURCES_TYPE);
    assert_eq!(resources.decode_json::<ResourceLimits>().unwrap(), limits);
    assert_eq!(update.annotations["owner"], "ops");
}

#[tokio::test]
async fn metrics_returns_the_first_sample() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    h.service.set_metrics(vec![Metric {
        timestamp: Utc::now(),
        id: "c1".into(),
        data: None,
    }]);

    assert_eq!(task.metrics().await.unwrap().id, "c1");
}

#[tokio::test]
async fn empty_metrics_for_a_live_task_is_no_metrics() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;

    let err = task.metrics().await.unwrap_err();
    assert!(matches!(err, CtkError::NoMetrics { ref id } if id == "c1"));
}

#[tokio::test]
async fn empty_metrics_for_a_missing_task_is_not_found() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    h.service.fail("get", Code::NotFound);

    assert!(task.metrics().await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn new_task_rejects_foreign_options_on_runc_before_any_call() {
    let h = Harness::new();
    let _ = h.add_container("c1", RUNTIME_RUNC_V2).await;
    let opts = NewTaskOpts {
        options: Some(TaskOptions::Generic(Any {
            type_url: "io.kata.Options".into(),
            value: Vec::new(),
        })),
        ..NewTaskOpts::default()
    };

    let err = h
        .client
        .container("c1")
        .new_task(&recording_io(&h.log), opts)
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());
    assert_eq!(h.log.count("rpc:create"), 0);
    assert_eq!(h.log.count("io:create:c1"), 0);
}

#[tokio::test]
async fn failed_create_releases_streams() {
    let h = Harness::new();
    let _ = h.add_container("c1", RUNTIME_RUNC_V2).await;
    h.service.fail("create", Code::AlreadyExists);

    let err = h
        .client
        .container("c1")
        .new_task(&recording_io(&h.log), NewTaskOpts::default())
        .await
        .unwrap_err();
    assert!(err.is_already_exists());
    assert_eq!(h.log.after("rpc:create"), ["io:cancel", "io:close"]);
}

#[tokio::test]
async fn new_task_announces_stream_endpoints() {
    let h = Harness::new();
    let _task = h.new_task("c1", RUNTIME_RUNC_V2).await;

    let create = &h.service.creates()[0];
    assert_eq!(create.container_id, "c1");
    assert_eq!(create.stdout, "/run/ctk/c1/stdout");
    assert!(create.options.is_none());
}

#[tokio::test]
async fn loading_a_missing_task_is_not_found() {
    let h = Harness::new();
    let _ = h.add_container("c1", RUNTIME_RUNC_V2).await;
    h.service.fail("get", Code::NotFound);

    let err = h.client.container("c1").task(None).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("no running task found"), "{err}");
}

#[tokio::test]
async fn spec_is_read_from_the_container() {
    let h = Harness::new();
    let task = h.new_task("c1", RUNTIME_RUNC_V2).await;
    assert!(task.spec().await.unwrap_err().is_not_found());
}
