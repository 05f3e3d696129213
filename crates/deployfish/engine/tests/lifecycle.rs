//! Service lifecycle against the in-memory provider

use deployfish_engine::{
    Action, CapacityOptions, CreateOptions, EngineError, Outcome, PollerConfig, RunOptions,
    ScaleOptions, ServiceManager,
};
use deployfish_provider::{InMemoryProvider, InfrastructureClient, Operation};
use deployfish_types::{CapacityGroupState, DeployfishConfig, LoadOptions, ServiceSpec};
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
services:
  - name: web
    cluster: prod
    count: 3
    load_balancer:
      target_group_arn: arn:tg/web
      container_name: web
      container_port: 8000
    autoscalinggroup_name: prod-asg
    containers:
      - name: web
        image: registry.local/web:1.0.0
    tasks:
      - name: migrate
        command: ["manage.py", "migrate"]
    config:
      - DB_HOST=db.internal
"#;

fn spec() -> ServiceSpec {
    DeployfishConfig::from_yaml_str(CONFIG, &LoadOptions::default())
        .unwrap()
        .load_spec("web")
        .unwrap()
}

fn setup() -> (Arc<InMemoryProvider>, ServiceManager) {
    let provider = Arc::new(InMemoryProvider::new());
    provider.register_capacity_group(CapacityGroupState {
        name: "prod-asg".into(),
        min_size: 1,
        max_size: 4,
        desired_capacity: 1,
    });
    let manager = ServiceManager::new(
        provider.clone(),
        PollerConfig {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(120),
        },
    );
    (provider, manager)
}

async fn created() -> (Arc<InMemoryProvider>, ServiceManager) {
    let (provider, manager) = setup();
    let outcome = manager
        .create(&spec(), CreateOptions::default())
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Completed(_)));
    provider.clear_calls();
    (provider, manager)
}

fn operations(provider: &InMemoryProvider) -> Vec<Operation> {
    provider.calls().iter().map(|c| c.operation).collect()
}

#[tokio::test(start_paused = true)]
async fn create_converges_to_desired_count() {
    let (provider, manager) = setup();
    let outcome = manager
        .create(&spec(), CreateOptions::default())
        .await
        .unwrap();

    let Outcome::Completed(report) = outcome else {
        panic!("expected completion");
    };
    assert!(report.poll.unwrap().is_stable());
    assert!(report.helper_failures.is_empty());

    let live = provider.describe_service("prod", "web").await.unwrap().unwrap();
    assert!(live.is_stable());
    assert_eq!(live.running_count, 3);
    assert_eq!(live.helper_tasks["migrate"].desired_count, 1);
    assert_eq!(provider.capacity_group("prod-asg").unwrap().desired_capacity, 3);
}

#[tokio::test]
async fn create_dry_run_plan_has_no_scale_step() {
    let (provider, manager) = setup();
    let options = CreateOptions {
        run: RunOptions {
            dry_run: true,
            ..RunOptions::default()
        },
        ..CreateOptions::default()
    };

    let Outcome::DryRun(plan) = manager.create(&spec(), options).await.unwrap() else {
        panic!("expected a dry run");
    };
    assert!(plan.actions.iter().any(|a| matches!(
        a.action,
        Action::CreateService {
            desired_count: 3,
            ..
        }
    )));
    assert!(!plan
        .actions
        .iter()
        .any(|a| matches!(a.action, Action::ScaleService { .. })));
    assert!(provider.mutating_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn create_on_existing_service_issues_no_mutations() {
    let (provider, manager) = created().await;

    let err = manager
        .create(&spec(), CreateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists { .. }));
    assert!(provider.mutating_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn create_writes_configs_only_when_asked() {
    let (provider, manager) = setup();
    let options = CreateOptions {
        update_configs: true,
        ..CreateOptions::default()
    };
    manager.create(&spec(), options).await.unwrap();

    let parameters = manager.service_parameters("prod", "web").await.unwrap();
    assert_eq!(parameters.len(), 1);
    assert_eq!(parameters[0].name, "DB_HOST");
    assert_eq!(parameters[0].value, "db.internal");
    assert!(operations(&provider).contains(&Operation::PutParameters));
}

#[tokio::test(start_paused = true)]
async fn update_rolls_out_new_image() {
    let (provider, manager) = created().await;

    let mut spec = spec();
    spec.task_definition.containers[0].image = "registry.local/web:1.1.0".into();
    let outcome = manager.update(&spec, RunOptions::default()).await.unwrap();
    assert!(matches!(outcome, Outcome::Completed(_)));

    assert_eq!(manager.version(&spec).await.unwrap(), "1.1.0");
    let live = provider.describe_service("prod", "web").await.unwrap().unwrap();
    assert_eq!(live.desired_count_live, 3);
    assert!(live.is_stable());
}

#[tokio::test(start_paused = true)]
async fn update_with_changed_load_balancer_is_rejected_before_any_mutation() {
    let (provider, manager) = created().await;

    let mut spec = spec();
    if let deployfish_types::ServiceKind::LoadBalanced { load_balancer } = &mut spec.kind {
        load_balancer.container_port = 9000;
    }
    let err = manager.update(&spec, RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::ImmutableField { .. }));
    assert!(provider.mutating_calls().is_empty());
}

#[tokio::test]
async fn negative_scale_is_rejected_before_any_call() {
    let (provider, manager) = setup();
    let err = manager
        .scale(&spec(), -2, ScaleOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidCount(-2)));
    assert!(provider.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn scale_beyond_capacity_is_rejected_before_any_mutation() {
    let (provider, manager) = created().await;

    let err = manager
        .scale(&spec(), 5, ScaleOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Capacity {
            requested: 5,
            max: 4,
            ..
        }
    ));
    assert!(provider.mutating_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn forced_scale_grows_capacity_group() {
    let (provider, manager) = created().await;
    let options = ScaleOptions {
        capacity: CapacityOptions {
            asg: true,
            force_asg: true,
        },
        ..ScaleOptions::default()
    };
    manager.scale(&spec(), 5, options).await.unwrap();

    let group = provider.capacity_group("prod-asg").unwrap();
    assert_eq!(group.desired_capacity, 5);
    assert_eq!(group.max_size, 5);
}

#[tokio::test(start_paused = true)]
async fn delete_drains_before_deleting() {
    let (provider, manager) = created().await;

    let outcome = manager
        .delete(&spec(), RunOptions::default(), |_| true)
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Completed(_)));

    let ops = operations(&provider);
    let scale = ops.iter().position(|o| *o == Operation::ScaleService).unwrap();
    let delete = ops.iter().position(|o| *o == Operation::DeleteService).unwrap();
    assert!(scale < delete);
    assert!(ops[scale..delete].contains(&Operation::DescribeService));
    assert!(provider.describe_service("prod", "web").await.unwrap().is_none());
}

#[tokio::test]
async fn declined_delete_makes_no_calls() {
    let (provider, manager) = setup();
    let outcome = manager
        .delete(&spec(), RunOptions::default(), |_| false)
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Declined));
    assert!(provider.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn delete_stops_when_drain_times_out() {
    let (provider, manager) = created().await;
    provider.set_stalled(true);

    let options = RunOptions {
        timeout: Some(Duration::from_secs(30)),
        ..RunOptions::default()
    };
    let outcome = manager.delete(&spec(), options, |_| true).await.unwrap();
    assert!(matches!(outcome, Outcome::TimedOut(_)));
    assert!(!operations(&provider).contains(&Operation::DeleteService));
}

#[tokio::test(start_paused = true)]
async fn soft_restart_waits_between_kills() {
    let (provider, manager) = created().await;

    manager
        .restart(&spec(), false, RunOptions::default())
        .await
        .unwrap();

    let ops = operations(&provider);
    let kills: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, o)| **o == Operation::KillTask)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(kills.len(), 3);
    for pair in kills.windows(2) {
        assert!(ops[pair[0]..pair[1]].contains(&Operation::DescribeService));
    }
}

#[tokio::test(start_paused = true)]
async fn hard_restart_kills_without_waiting() {
    let (provider, manager) = created().await;
    let before = provider.list_running_task_instances("prod", "web").await.unwrap();
    provider.clear_calls();

    manager
        .restart(&spec(), true, RunOptions::default())
        .await
        .unwrap();

    let ops = operations(&provider);
    let first = ops.iter().position(|o| *o == Operation::KillTask).unwrap();
    assert_eq!(&ops[first..], &[Operation::KillTask; 3]);

    // Oldest first
    let killed: Vec<String> = provider
        .calls()
        .into_iter()
        .filter(|c| c.operation == Operation::KillTask)
        .map(|c| c.subject)
        .collect();
    let expected: Vec<String> = before.iter().map(|t| t.task_id.clone()).collect();
    assert_eq!(killed, expected);
}

#[tokio::test(start_paused = true)]
async fn run_task_uses_active_revision() {
    let (provider, manager) = created().await;
    let command = vec!["manage.py".to_string(), "shell".to_string()];

    let outcome = manager
        .run_task(&spec(), &command, RunOptions::default())
        .await
        .unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.invocation.as_ref().unwrap().task_ids.len(), 1);

    let live = provider.describe_service("prod", "web").await.unwrap().unwrap();
    let run = provider
        .calls()
        .into_iter()
        .find(|c| c.operation == Operation::RunOneOffTask)
        .unwrap();
    assert_eq!(Some(run.subject), live.active_task_definition_arn);
}

#[tokio::test(start_paused = true)]
async fn create_times_out_when_provider_stalls() {
    let (provider, manager) = setup();
    provider.set_stalled(true);

    let options = CreateOptions {
        run: RunOptions {
            timeout: Some(Duration::from_secs(30)),
            ..RunOptions::default()
        },
        ..CreateOptions::default()
    };
    let outcome = manager.create(&spec(), options).await.unwrap();
    let Outcome::TimedOut(report) = outcome else {
        panic!("expected timeout");
    };
    assert_eq!(report.poll.unwrap().elapsed(), Duration::from_secs(30));
}

#[tokio::test]
async fn info_on_absent_service_is_not_an_error() {
    let (provider, manager) = setup();
    let info = manager.info(&spec()).await.unwrap();

    assert!(!info.live.exists);
    assert!(info.tasks.is_empty());
    assert!(info.active_definition.is_none());
    assert!(provider.mutating_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dry_run_scale_past_capacity_is_rejected() {
    let (provider, manager) = created().await;
    let options = ScaleOptions {
        run: RunOptions {
            dry_run: true,
            ..RunOptions::default()
        },
        ..ScaleOptions::default()
    };

    let err = manager.scale(&spec(), 5, options).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Capacity {
            requested: 5,
            max: 4,
            ..
        }
    ));
    assert!(provider.mutating_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn info_reports_helpers_and_tasks() {
    let (_provider, manager) = created().await;
    let info = manager.info(&spec()).await.unwrap();

    assert_eq!(info.tasks.len(), 3);
    assert!(info.helper_definitions.contains_key("migrate"));
    assert_eq!(info.version(), Some("1.0.0"));
    assert_eq!(info.capacity_group.unwrap().desired_capacity, 3);
}
