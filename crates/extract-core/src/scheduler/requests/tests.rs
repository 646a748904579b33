use super::*;
use crate::domain::HistoryRecord;
use crate::plugins::{TaskPlugin, TaskResult};
use crate::test_support::{
    connector_registry, create_test_context, sample_order, task_registry, wait_until,
    ScriptedTaskPlugin, StaticConnectorPlugin, TestContext,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn create_scheduler(
    ctx: &TestContext,
    task_plugins: Vec<Arc<dyn TaskPlugin>>,
    connector_plugin: Arc<StaticConnectorPlugin>,
) -> RequestsProcessingScheduler {
    RequestsProcessingScheduler::new(
        Arc::new(TaskRegistrar::new(CancellationToken::new())),
        SchedulingStep::from_secs(1).unwrap(),
        ctx.runner_context(),
        task_registry(task_plugins),
        connector_registry(vec![connector_plugin]),
        None,
    )
}

async fn wait_for_idle(scheduler: &RequestsProcessingScheduler) -> bool {
    wait_until(Duration::from_secs(3), move || async move {
        scheduler.running_task_count() == 0
    })
    .await
}

#[tokio::test]
async fn test_two_task_process_runs_sequentially() {
    let ctx = create_test_context().await;
    let connector = ctx.add_connector("Geoshop", "easysdiv4", 60).await;
    let (process, _) = ctx
        .add_process("Extraction", &[("fme", "Extract"), ("archive", "Archive")])
        .await;
    let request = ctx.add_ongoing_request(connector.id, process.id).await;

    let extract = Arc::new(ScriptedTaskPlugin::new("fme"));
    let archive = Arc::new(
        ScriptedTaskPlugin::new("archive").with_results(vec![TaskResult::error("disk full", "")]),
    );
    let scheduler = create_scheduler(
        &ctx,
        vec![extract.clone(), archive.clone()],
        Arc::new(StaticConnectorPlugin::new("easysdiv4")),
    );

    assert_eq!(scheduler.manage_task_processing().await.unwrap(), 1);
    assert!(wait_for_idle(&scheduler).await);

    let current = ctx.request(request.id).await;
    assert_eq!(current.status, RequestStatus::Ongoing);
    assert_eq!(current.tasknum, 2);
    let history = ctx.history(request.id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].step, 1);
    assert_eq!(history[0].status, HistoryStatus::Finished);

    assert_eq!(scheduler.manage_task_processing().await.unwrap(), 1);
    assert!(wait_for_idle(&scheduler).await);

    let current = ctx.request(request.id).await;
    assert_eq!(current.status, RequestStatus::Error);
    let history = ctx.history(request.id).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].step, 2);
    assert_eq!(history[0].status, HistoryStatus::Error);
    assert_eq!(history[0].message.as_deref(), Some("disk full"));

    assert_eq!(extract.calls(), 1);
    assert_eq!(archive.calls(), 1);
}

#[tokio::test]
async fn test_registered_request_is_skipped() {
    let ctx = create_test_context().await;
    let connector = ctx.add_connector("Geoshop", "easysdiv4", 60).await;
    let (process, _) = ctx.add_process("Extraction", &[("fme", "Extract")]).await;
    let request = ctx.add_ongoing_request(connector.id, process.id).await;

    let plugin = Arc::new(ScriptedTaskPlugin::new("fme"));
    let scheduler = create_scheduler(
        &ctx,
        vec![plugin.clone()],
        Arc::new(StaticConnectorPlugin::new("easysdiv4")),
    );
    assert!(scheduler.running_tasks().try_register(request.id));

    assert_eq!(scheduler.manage_task_processing().await.unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(plugin.calls(), 0);
    assert!(ctx.history(request.id).await.is_empty());
    assert_eq!(ctx.request(request.id).await.tasknum, 1);
}

#[tokio::test]
async fn test_interrupted_task_is_set_in_error() {
    let ctx = create_test_context().await;
    let connector = ctx.add_connector("Geoshop", "easysdiv4", 60).await;
    let (process, _) = ctx.add_process("Extraction", &[("fme", "Extract")]).await;
    let request = ctx.add_ongoing_request(connector.id, process.id).await;
    ctx.repositories
        .history
        .save(&HistoryRecord::ongoing(request.id, 1, 1, "Extract"))
        .await
        .unwrap();

    let plugin = Arc::new(ScriptedTaskPlugin::new("fme"));
    let scheduler = create_scheduler(
        &ctx,
        vec![plugin.clone()],
        Arc::new(StaticConnectorPlugin::new("easysdiv4")),
    );

    assert_eq!(scheduler.manage_task_processing().await.unwrap(), 0);

    assert_eq!(plugin.calls(), 0);
    assert_eq!(ctx.request(request.id).await.status, RequestStatus::Error);

    let history = ctx.history(request.id).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Error);
    assert_eq!(
        history[0].message.as_deref(),
        Some("The processing of this task was interrupted.")
    );
    assert!(history[0].end_date.is_some());
}

#[tokio::test]
async fn test_panicking_runner_is_unregistered() {
    let ctx = create_test_context().await;
    let connector = ctx.add_connector("Geoshop", "easysdiv4", 60).await;
    let (process, _) = ctx.add_process("Extraction", &[("fme", "Extract")]).await;
    let request = ctx.add_ongoing_request(connector.id, process.id).await;

    let scheduler = create_scheduler(
        &ctx,
        vec![Arc::new(ScriptedTaskPlugin::new("fme").panicking("index out of bounds"))],
        Arc::new(StaticConnectorPlugin::new("easysdiv4")),
    );

    assert_eq!(scheduler.manage_task_processing().await.unwrap(), 1);
    assert!(wait_for_idle(&scheduler).await);

    assert!(!scheduler.running_tasks().contains(request.id));
    assert_eq!(ctx.request(request.id).await.status, RequestStatus::Error);
    assert_eq!(
        ctx.history(request.id).await[0].message.as_deref(),
        Some("index out of bounds")
    );
}

#[tokio::test]
async fn test_at_most_one_runner_per_request() {
    let ctx = create_test_context().await;
    let connector = ctx.add_connector("Geoshop", "easysdiv4", 60).await;
    let (process, _) = ctx.add_process("Extraction", &[("fme", "Extract")]).await;
    let request = ctx.add_ongoing_request(connector.id, process.id).await;

    let plugin = Arc::new(ScriptedTaskPlugin::new("fme").with_delay(Duration::from_millis(300)));
    let scheduler = create_scheduler(
        &ctx,
        vec![plugin.clone()],
        Arc::new(StaticConnectorPlugin::new("easysdiv4")),
    );

    assert_eq!(scheduler.manage_task_processing().await.unwrap(), 1);
    assert_eq!(scheduler.manage_task_processing().await.unwrap(), 0);
    assert!(scheduler.running_tasks().contains(request.id));

    assert!(wait_for_idle(&scheduler).await);
    assert_eq!(plugin.calls(), 1);
    assert_eq!(ctx.request(request.id).await.tasknum, 2);
}

#[tokio::test]
async fn test_completion_of_unknown_request_is_ignored() {
    let ctx = create_test_context().await;
    let scheduler = create_scheduler(&ctx, vec![], Arc::new(StaticConnectorPlugin::new("easysdiv4")));

    scheduler.running_tasks().try_register(5);
    scheduler.notify_task_completion(42);
    scheduler.notify_task_completion(0);

    assert_eq!(scheduler.running_tasks().ids(), vec![5]);

    scheduler.notify_task_completion(5);
    assert_eq!(scheduler.running_task_count(), 0);
}

#[tokio::test]
async fn test_scheduled_jobs_carry_request_to_finished() {
    let ctx = create_test_context().await;
    let connector = ctx.add_connector("Geoshop", "easysdiv4", 60).await;
    let (process, _) = ctx.add_process("Extraction", &[("fme", "Extract")]).await;
    ctx.store.add_rule(connector.id, process.id, 1, "TRUE").await.unwrap();
    let request = ctx
        .add_request(crate::Request::from_order(connector.id, sample_order()))
        .await;

    let connector_plugin = Arc::new(StaticConnectorPlugin::new("easysdiv4"));
    let scheduler = create_scheduler(
        &ctx,
        vec![Arc::new(ScriptedTaskPlugin::new("fme"))],
        connector_plugin.clone(),
    );

    scheduler.schedule_jobs().await.unwrap();
    scheduler.schedule_jobs().await.unwrap();
    assert!(scheduler.is_scheduled().await);

    let requests = ctx.repositories.requests.clone();
    let id = request.id;
    let finished = wait_until(Duration::from_secs(10), move || {
        let requests = requests.clone();
        async move {
            requests
                .find_by_id(id)
                .await
                .ok()
                .flatten()
                .is_some_and(|r| r.status == RequestStatus::Finished)
        }
    })
    .await;
    assert!(finished);
    assert_eq!(connector_plugin.exported_ids(), vec![request.id]);

    scheduler.unschedule_jobs().await;
    assert!(!scheduler.is_scheduled().await);
}

#[tokio::test]
async fn test_unschedule_aborts_running_tasks() {
    let ctx = create_test_context().await;
    let connector = ctx.add_connector("Geoshop", "easysdiv4", 60).await;
    let (process, _) = ctx.add_process("Extraction", &[("fme", "Extract")]).await;
    let request = ctx.add_ongoing_request(connector.id, process.id).await;

    let plugin = Arc::new(ScriptedTaskPlugin::new("fme").with_delay(Duration::from_secs(30)));
    let scheduler = create_scheduler(
        &ctx,
        vec![plugin.clone()],
        Arc::new(StaticConnectorPlugin::new("easysdiv4")),
    );

    assert_eq!(scheduler.manage_task_processing().await.unwrap(), 1);
    let started = &plugin;
    assert!(wait_until(Duration::from_secs(2), move || async move { started.calls() == 1 }).await);

    scheduler.unschedule_jobs().await;
    assert!(wait_for_idle(&scheduler).await);

    let history = ctx.history(request.id).await;
    assert_eq!(history[0].status, HistoryStatus::Ongoing);

    assert_eq!(scheduler.manage_task_processing().await.unwrap(), 0);
    assert_eq!(ctx.request(request.id).await.status, RequestStatus::Error);
}
