use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use signoff_core::config::{AppConfig, LoadOptions};
use signoff_core::transport::bus::{DeadLetterLog, QueueBus, QueueConsumer};
use signoff_core::transport::ingress::{RequestIngress, ResultIngress};
use signoff_core::transport::messages::{REQUEST_ROUTING_KEY, RESULT_ROUTING_KEY};
use signoff_core::{
    ApprovalStatus, Caller, Dispatcher, Employee, EmployeeId, NewApproval, NotificationPayload,
    NotificationSink, OrchestratorSettings, RequestId, RequestOrchestrator, RetryPolicy, Role,
    StepPlan,
};
use signoff_db::{
    connect_with_config, migrations, InMemoryApprovalStore, InMemoryEmployeeDirectory,
    InMemorySequenceGenerator,
};

use crate::commands::{CommandResult, ExitClass};

const REQUESTER: EmployeeId = EmployeeId(1);
const FIRST: EmployeeId = EmployeeId(10);
const SECOND: EmployeeId = EmployeeId(20);
const POLL_ATTEMPTS: u32 = 200;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: format!(
                    "configuration loaded; transport mode `{}`",
                    config.transport.mode.as_str()
                ),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("approval_round_trip"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("approval_round_trip"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let db_started = Instant::now();
    let pool = match runtime.block_on(connect_with_config(&config.database)) {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: elapsed_since(db_started),
                message: format!("connected using `{}`", config.database.url),
            });
            pool
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: elapsed_since(db_started),
                message: format!("failed to connect: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("approval_round_trip"));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let migration_started = Instant::now();
    let migration_result = runtime.block_on(migrations::run_pending(&pool));
    runtime.block_on(pool.close());

    match migration_result {
        Ok(()) => checks.push(SmokeCheck {
            name: "migration_visibility",
            status: SmokeStatus::Pass,
            elapsed_ms: elapsed_since(migration_started),
            message: "migrations are visible and executable".to_string(),
        }),
        Err(error) => checks.push(SmokeCheck {
            name: "migration_visibility",
            status: SmokeStatus::Fail,
            elapsed_ms: elapsed_since(migration_started),
            message: format!("migration execution failed: {error}"),
        }),
    }

    let round_trip_started = Instant::now();
    let round_trip = runtime.block_on(approval_round_trip(&config));
    checks.push(SmokeCheck {
        name: "approval_round_trip",
        status: if round_trip.is_ok() { SmokeStatus::Pass } else { SmokeStatus::Fail },
        elapsed_ms: elapsed_since(round_trip_started),
        message: round_trip.unwrap_or_else(|error| error),
    });

    finalize_report(checks, elapsed_since(started))
}

#[derive(Default)]
struct CountingNotifications {
    sent: AtomicUsize,
}

#[async_trait]
impl NotificationSink for CountingNotifications {
    async fn notify(&self, _recipient: EmployeeId, _payload: &NotificationPayload) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }
}

/// Drives a two-step request through the in-process queue against in-memory
/// storage, so the configured database is left untouched.
async fn approval_round_trip(config: &AppConfig) -> Result<String, String> {
    let directory = InMemoryEmployeeDirectory::with_employees([
        Employee { id: REQUESTER, name: "smoke requester".to_string(), role: Role::Employee },
        Employee { id: FIRST, name: "smoke first approver".to_string(), role: Role::Approver },
        Employee { id: SECOND, name: "smoke second approver".to_string(), role: Role::Approver },
    ]);
    let (bus, subscriptions) = QueueBus::new(config.transport.queue_capacity);
    let bus = Arc::new(bus);
    let notifications = Arc::new(CountingNotifications::default());
    let dead_letters = DeadLetterLog::default();

    let dispatcher =
        Arc::new(Dispatcher::new(bus.clone(), config.retry.result_delivery.policy()));
    let orchestrator = Arc::new(RequestOrchestrator::new(
        Arc::new(InMemoryApprovalStore::default()),
        Arc::new(InMemorySequenceGenerator::default()),
        Arc::new(directory),
        notifications.clone(),
        bus,
        OrchestratorSettings {
            propagation: config.retry.propagation.policy(),
            lock: config.retry.lock.policy(),
        },
    ));
    let redelivery = RetryPolicy::new(
        config.transport.max_redeliveries,
        config.transport.redelivery_backoff_millis,
    );
    let consumers = [
        QueueConsumer::new(
            REQUEST_ROUTING_KEY,
            subscriptions.requests,
            Arc::new(RequestIngress::new(dispatcher.clone())),
            redelivery,
            dead_letters.clone(),
        )
        .spawn(),
        QueueConsumer::new(
            RESULT_ROUTING_KEY,
            subscriptions.results,
            Arc::new(
                ResultIngress::new(orchestrator.clone()).acknowledging(dispatcher.clone()),
            ),
            redelivery,
            dead_letters.clone(),
        )
        .spawn(),
    ];

    let outcome = async {
        let requester = Caller::new(REQUESTER, Role::Employee);
        let draft = NewApproval {
            title: "smoke check".to_string(),
            content: "two-step round trip".to_string(),
            steps: vec![StepPlan::new(1, FIRST), StepPlan::new(2, SECOND)],
        };
        let created =
            orchestrator.create(&requester, draft).await.map_err(|error| error.to_string())?;

        for approver in [FIRST, SECOND] {
            let caller = Caller::new(approver, Role::Approver);
            wait_for_head(&dispatcher, &caller, created.request_id).await?;
            dispatcher
                .handle(&caller, approver, created.request_id, ApprovalStatus::Approved)
                .await
                .map_err(|error| error.to_string())?;
        }

        for _ in 0..POLL_ATTEMPTS {
            let document = orchestrator
                .find_one(&requester, created.request_id)
                .await
                .map_err(|error| error.to_string())?;
            let notified = notifications.sent.load(Ordering::SeqCst);
            if document.final_status == ApprovalStatus::Approved && notified > 0 {
                return Ok(format!(
                    "request {} approved in {} steps; {} notice(s) sent",
                    created.request_id,
                    document.steps.len(),
                    notified
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Err(format!("request {} never reached approved", created.request_id))
    }
    .await;

    for consumer in consumers {
        consumer.abort();
    }
    if !dead_letters.is_empty() {
        return Err(format!("{} message(s) dead-lettered during round trip", dead_letters.len()));
    }
    outcome
}

async fn wait_for_head(
    dispatcher: &Dispatcher,
    caller: &Caller,
    request_id: RequestId,
) -> Result<(), String> {
    for _ in 0..POLL_ATTEMPTS {
        let queued = dispatcher.queue_for(caller, caller.id).map_err(|error| error.to_string())?;
        if queued.first().map(|request| request.request_id) == Some(request_id) {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Err(format!("request {request_id} never reached approver {}", caller.id))
}

fn elapsed_since(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((elapsed_since(started), value)),
        Err(error) => Err((elapsed_since(started), error)),
    }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult::report(failed, ExitClass::SmokeFailed, format!("{human}\n{machine}"))
}
