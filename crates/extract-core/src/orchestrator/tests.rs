use super::*;
use crate::domain::{HistoryStatus, RequestStatus};
use crate::plugins::{ConnectorPlugin, TaskPlugin};
use crate::settings::{keys, TimeRange, TimeRangeCollection};
use crate::test_support::{
    connector_registry, create_test_context, sample_order, task_registry, wait_until,
    CountingSynchronizer, ScriptedTaskPlugin, StaticConnectorPlugin, TestContext,
};
use chrono::{Datelike, Local};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn components(
    ctx: &TestContext,
    settings: OrchestratorSettings,
    connectors: Vec<Arc<dyn ConnectorPlugin>>,
    tasks: Vec<Arc<dyn TaskPlugin>>,
) -> OrchestratorComponents {
    OrchestratorComponents::builder()
        .registrar(Arc::new(TaskRegistrar::new(CancellationToken::new())))
        .language("en")
        .repositories(ctx.repositories.clone())
        .connector_plugins(connector_registry(connectors))
        .task_plugins(task_registry(tasks))
        .email_settings(ctx.mailer.clone())
        .settings(settings)
        .build()
        .unwrap()
}

fn settings(frequency_secs: u64, mode: SchedulerMode, ranges: Vec<TimeRange>) -> OrchestratorSettings {
    OrchestratorSettings::new(frequency_secs, mode, TimeRangeCollection::new(ranges))
}

/// A range covering only the day after tomorrow
fn range_excluding_today() -> TimeRange {
    let day = Local::now().weekday().succ().succ().number_from_monday();
    TimeRange::new(day, day, "00:00", "24:00")
}

#[test]
fn test_builder_requires_collaborators() {
    let result = OrchestratorComponents::builder().language("en").build();
    assert!(matches!(
        result,
        Err(Error::InvalidConfig { ref field, .. }) if field == "registrar"
    ));

    let result = OrchestratorComponents::builder()
        .registrar(Arc::new(TaskRegistrar::new(CancellationToken::new())))
        .language("  ")
        .build();
    assert!(matches!(
        result,
        Err(Error::InvalidConfig { ref field, .. }) if field == "language"
    ));
}

#[tokio::test]
async fn test_builder_defaults_settings() {
    let ctx = create_test_context().await;
    let components = OrchestratorComponents::builder()
        .registrar(Arc::new(TaskRegistrar::new(CancellationToken::new())))
        .language("fr")
        .repositories(ctx.repositories.clone())
        .connector_plugins(connector_registry(vec![]))
        .task_plugins(task_registry(vec![]))
        .email_settings(ctx.mailer.clone())
        .build()
        .unwrap();

    assert_eq!(components.settings, OrchestratorSettings::default());
    assert!(components.directory_synchronizer.is_none());
    assert!(components.max_concurrent_tasks.is_none());
}

#[tokio::test]
async fn test_operations_require_initialization() {
    let orchestrator = Orchestrator::new();

    assert!(!orchestrator.is_initialized());
    assert!(!orchestrator.is_monitoring().await);
    assert!(matches!(
        orchestrator.working_state().await,
        Err(Error::NotInitialized)
    ));
    assert!(matches!(
        orchestrator.update_settings(OrchestratorSettings::default(), true).await,
        Err(Error::NotInitialized)
    ));
    assert!(matches!(
        orchestrator.reschedule_monitoring().await,
        Err(Error::NotInitialized)
    ));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_second_initialization_is_rejected() {
    let ctx = create_test_context().await;
    let orchestrator = Orchestrator::new();

    orchestrator
        .initialize(components(&ctx, settings(60, SchedulerMode::Off, vec![]), vec![], vec![]))
        .await
        .unwrap();

    let result = orchestrator
        .initialize(components(&ctx, settings(60, SchedulerMode::On, vec![]), vec![], vec![]))
        .await;
    assert!(matches!(result, Err(Error::AlreadyInitialized)));

    assert_eq!(orchestrator.working_state().await.unwrap(), WorkingState::Stopped);
    assert!(!orchestrator.is_monitoring().await);
}

#[tokio::test]
async fn test_invalid_settings_prevent_initialization() {
    let ctx = create_test_context().await;
    let orchestrator = Orchestrator::new();

    let result = orchestrator
        .initialize(components(&ctx, settings(0, SchedulerMode::On, vec![]), vec![], vec![]))
        .await;

    assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    assert!(!orchestrator.is_initialized());
}

#[tokio::test]
async fn test_on_mode_schedules_every_job() {
    let ctx = create_test_context().await;
    ctx.add_connector("Geoshop", "easysdiv4", 60).await;
    let orchestrator = Orchestrator::new();

    orchestrator
        .initialize(components(
            &ctx,
            settings(1, SchedulerMode::On, vec![]),
            vec![Arc::new(StaticConnectorPlugin::new("easysdiv4"))],
            vec![],
        ))
        .await
        .unwrap();

    assert!(orchestrator.is_monitoring().await);
    assert!(orchestrator.requests_scheduler().await.unwrap().is_scheduled().await);

    let imports = orchestrator.import_scheduler().await.unwrap();
    assert!(imports.is_scheduled().await);
    let scheduled = &imports;
    assert!(
        wait_until(Duration::from_secs(2), move || async move {
            scheduled.scheduled_job_ids().len() == 1
        })
        .await
    );

    orchestrator.shutdown().await;
    assert!(!orchestrator.is_monitoring().await);
    assert!(imports.scheduled_job_ids().is_empty());
    assert!(orchestrator.is_initialized());
}

#[tokio::test]
async fn test_update_settings_validates_and_ignores_unchanged() {
    let ctx = create_test_context().await;
    let orchestrator = Orchestrator::new();
    let initial = settings(1, SchedulerMode::Off, vec![]);

    orchestrator
        .initialize(components(&ctx, initial.clone(), vec![], vec![]))
        .await
        .unwrap();
    let requests = orchestrator.requests_scheduler().await.unwrap();

    let invalid = settings(1, SchedulerMode::Ranges, vec![TimeRange::new(0, 9, "08:00", "17:00")]);
    assert!(orchestrator.update_settings(invalid, true).await.is_err());
    assert_eq!(orchestrator.settings().await.unwrap(), initial);

    orchestrator.update_settings(initial.clone(), true).await.unwrap();
    assert!(Arc::ptr_eq(&requests, &orchestrator.requests_scheduler().await.unwrap()));

    orchestrator
        .update_settings(settings(2, SchedulerMode::Off, vec![]), true)
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&requests, &orchestrator.requests_scheduler().await.unwrap()));
}

#[tokio::test]
async fn test_switching_modes_reschedules() {
    let ctx = create_test_context().await;
    let orchestrator = Orchestrator::new();

    orchestrator
        .initialize(components(&ctx, settings(1, SchedulerMode::Off, vec![]), vec![], vec![]))
        .await
        .unwrap();
    assert!(!orchestrator.is_monitoring().await);

    orchestrator
        .update_settings(settings(1, SchedulerMode::On, vec![]), false)
        .await
        .unwrap();
    assert!(!orchestrator.is_monitoring().await);
    assert_eq!(orchestrator.working_state().await.unwrap(), WorkingState::Running);

    orchestrator.reschedule_monitoring().await.unwrap();
    assert!(orchestrator.is_monitoring().await);

    orchestrator
        .update_settings(settings(1, SchedulerMode::Off, vec![]), true)
        .await
        .unwrap();
    assert!(!orchestrator.is_monitoring().await);
    assert!(!orchestrator.requests_scheduler().await.unwrap().is_scheduled().await);
}

#[tokio::test]
async fn test_ranges_mode_follows_working_hours() {
    let ctx = create_test_context().await;
    let orchestrator = Orchestrator::new();

    orchestrator
        .initialize(components(
            &ctx,
            settings(1, SchedulerMode::Ranges, vec![range_excluding_today()]),
            vec![],
            vec![],
        ))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!orchestrator.is_monitoring().await);
    assert_eq!(
        orchestrator.working_state().await.unwrap(),
        WorkingState::ScheduledStop
    );

    orchestrator
        .update_settings(settings(1, SchedulerMode::Ranges, vec![TimeRange::default()]), false)
        .await
        .unwrap();

    let monitored = &orchestrator;
    assert!(
        wait_until(Duration::from_secs(3), move || async move {
            monitored.is_monitoring().await
        })
        .await
    );

    orchestrator
        .update_settings(settings(1, SchedulerMode::Ranges, vec![range_excluding_today()]), false)
        .await
        .unwrap();
    assert!(
        wait_until(Duration::from_secs(3), move || async move {
            !monitored.is_monitoring().await
        })
        .await
    );

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_ranges_mode_without_range() {
    let ctx = create_test_context().await;
    let orchestrator = Orchestrator::new();

    orchestrator
        .initialize(components(&ctx, settings(1, SchedulerMode::Ranges, vec![]), vec![], vec![]))
        .await
        .unwrap();

    assert_eq!(
        orchestrator.working_state().await.unwrap(),
        WorkingState::ScheduleConfigError
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!orchestrator.is_monitoring().await);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_settings_reloaded_from_parameters() {
    let ctx = create_test_context().await;
    let orchestrator = Orchestrator::new();

    orchestrator
        .initialize(components(&ctx, settings(1, SchedulerMode::On, vec![]), vec![], vec![]))
        .await
        .unwrap();
    assert!(orchestrator.is_monitoring().await);

    let parameters = &ctx.repositories.parameters;
    parameters.set(keys::SCHEDULER_FREQUENCY, "5").await.unwrap();
    parameters.set(keys::SCHEDULER_MODE, "OFF").await.unwrap();

    orchestrator.update_settings_from_parameters().await.unwrap();

    let current = orchestrator.settings().await.unwrap();
    assert_eq!(current.frequency_secs, 5);
    assert_eq!(current.mode, SchedulerMode::Off);
    assert!(!orchestrator.is_monitoring().await);
}

#[tokio::test]
async fn test_directory_sync_scheduled_with_monitoring() {
    let ctx = create_test_context().await;
    let parameters = &ctx.repositories.parameters;
    parameters.set(keys::LDAP_ENABLED, "true").await.unwrap();
    parameters.set(keys::LDAP_SYNCHRONIZATION_ENABLED, "true").await.unwrap();
    parameters.set(keys::LDAP_SYNCHRONIZATION_FREQUENCY, "24").await.unwrap();

    let synchronizer = Arc::new(CountingSynchronizer::new(false));
    let mut components = components(&ctx, settings(1, SchedulerMode::On, vec![]), vec![], vec![]);
    components.directory_synchronizer = Some(synchronizer.clone());

    let orchestrator = Orchestrator::new();
    orchestrator.initialize(components).await.unwrap();

    let synchronized = &synchronizer;
    assert!(
        wait_until(Duration::from_secs(3), move || async move {
            synchronized.runs() == 1
        })
        .await
    );

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_order_travels_from_import_to_export() {
    let ctx = create_test_context().await;
    let connector = ctx.add_connector("Geoshop", "easysdiv4", 1).await;
    let (process, _) = ctx
        .add_process("Extraction", &[("fme", "Extract"), ("archive", "Archive")])
        .await;
    ctx.store
        .add_rule(connector.id, process.id, 1, "productguid == \"a8405d50-f712-4e3e-96b2-a5452cf4e03e\"")
        .await
        .unwrap();

    let connector_plugin =
        Arc::new(StaticConnectorPlugin::new("easysdiv4").with_orders(vec![sample_order()]));
    let extract = Arc::new(ScriptedTaskPlugin::new("fme"));
    let archive = Arc::new(ScriptedTaskPlugin::new("archive"));

    let orchestrator = Orchestrator::new();
    orchestrator
        .initialize(components(
            &ctx,
            settings(1, SchedulerMode::On, vec![]),
            vec![connector_plugin.clone()],
            vec![extract.clone(), archive.clone()],
        ))
        .await
        .unwrap();

    let exported = &connector_plugin;
    assert!(
        wait_until(Duration::from_secs(20), move || async move {
            !exported.exported_ids().is_empty()
        })
        .await
    );

    let request_id = connector_plugin.exported_ids()[0];
    let requests = ctx.repositories.requests.clone();
    assert!(
        wait_until(Duration::from_secs(5), move || {
            let requests = requests.clone();
            async move {
                requests
                    .find_by_id(request_id)
                    .await
                    .ok()
                    .flatten()
                    .is_some_and(|r| r.status == RequestStatus::Finished)
            }
        })
        .await
    );

    orchestrator.shutdown().await;

    let request = ctx.request(request_id).await;
    assert_eq!(request.process_id, Some(process.id));
    assert_eq!(request.tasknum, 3);
    assert!(request.end_date.is_some());
    assert_eq!(extract.calls(), 1);
    assert_eq!(archive.calls(), 1);

    let history = ctx.history(request_id).await;
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|r| r.status == HistoryStatus::Finished));
}
