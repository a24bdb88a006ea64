use std::sync::Arc;

use axum::Router;
use signoff_core::config::{AppConfig, ConfigError, LoadOptions, TransportMode};
use signoff_core::ports::{EmployeeDirectory, NotificationSink};
use signoff_core::transport::bus::{DeadLetterLog, QueueBus, QueueConsumer};
use signoff_core::transport::ingress::{RequestIngress, ResultIngress};
use signoff_core::transport::messages::{REQUEST_ROUTING_KEY, RESULT_ROUTING_KEY};
use signoff_core::transport::{RequestDelivery, ResultDelivery};
use signoff_core::{Dispatcher, OrchestratorSettings, RequestOrchestrator, RetryPolicy};
use signoff_db::{
    connect_with_config, migrations, DbPool, SqlApprovalStore, SqlEmployeeRepository,
    SqlSequenceGenerator,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::clients::{
    build_client, HttpEmployeeDirectory, HttpNotificationSink, HttpRequestDelivery,
    HttpResultDelivery, LoggingNotificationSink,
};
use crate::health::{self, HealthState};
use crate::state::AppState;
use crate::{approvals, processing};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
    pub dead_letters: DeadLetterLog,
    pub consumers: Vec<JoinHandle<()>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("configuration incomplete: {0}")]
    Incomplete(&'static str),
}

impl Application {
    /// Every route the service exposes, request side and processing side alike.
    pub fn router(&self) -> Router {
        Router::new()
            .merge(approvals::router())
            .merge(processing::router())
            .with_state(self.state.clone())
            .merge(health::router(HealthState {
                db_pool: self.db_pool.clone(),
                transport_mode: self.config.transport.mode,
                dead_letters: self.dead_letters.clone(),
            }))
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        transport_mode = config.transport.mode.as_str(),
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.database_ready",
        correlation_id = "bootstrap",
        "database connected and migrations applied"
    );

    let client =
        build_client(config.transport.call_timeout_secs).map_err(BootstrapError::HttpClient)?;

    let directory: Arc<dyn EmployeeDirectory> = match &config.directory.base_url {
        Some(base_url) => Arc::new(HttpEmployeeDirectory::new(client.clone(), base_url)),
        None => Arc::new(SqlEmployeeRepository::new(db_pool.clone())),
    };
    let notifications: Arc<dyn NotificationSink> = match &config.notification.base_url {
        Some(base_url) => Arc::new(HttpNotificationSink::new(
            client.clone(),
            base_url,
            config.retry.notification.policy(),
        )),
        None => Arc::new(LoggingNotificationSink),
    };

    let dead_letters = DeadLetterLog::default();
    let mut consumers = Vec::new();

    let requests: Arc<dyn RequestDelivery>;
    let results: Arc<dyn ResultDelivery>;
    let mut subscriptions = None;
    match config.transport.mode {
        TransportMode::Queue => {
            let (bus, receivers) = QueueBus::new(config.transport.queue_capacity);
            let bus = Arc::new(bus);
            requests = bus.clone();
            results = bus;
            subscriptions = Some(receivers);
        }
        TransportMode::Call => {
            let token = config.transport.shared_secret.clone();
            let processing = config
                .transport
                .processing_base_url
                .as_deref()
                .ok_or(BootstrapError::Incomplete("transport.processing_base_url"))?;
            let request_side = config
                .transport
                .request_base_url
                .as_deref()
                .ok_or(BootstrapError::Incomplete("transport.request_base_url"))?;
            requests =
                Arc::new(HttpRequestDelivery::new(client.clone(), processing, token.clone()));
            results = Arc::new(HttpResultDelivery::new(client, request_side, token));
        }
    }

    let dispatcher = Arc::new(Dispatcher::new(results, config.retry.result_delivery.policy()));
    let orchestrator = Arc::new(RequestOrchestrator::new(
        Arc::new(SqlApprovalStore::new(db_pool.clone())),
        Arc::new(SqlSequenceGenerator::new(db_pool.clone())),
        directory,
        notifications,
        requests,
        OrchestratorSettings {
            propagation: config.retry.propagation.policy(),
            lock: config.retry.lock.policy(),
        },
    ));

    if let Some(subscriptions) = subscriptions {
        let redelivery = RetryPolicy::new(
            config.transport.max_redeliveries,
            config.transport.redelivery_backoff_millis,
        );
        consumers.push(
            QueueConsumer::new(
                REQUEST_ROUTING_KEY,
                subscriptions.requests,
                Arc::new(RequestIngress::new(dispatcher.clone())),
                redelivery,
                dead_letters.clone(),
            )
            .spawn(),
        );
        consumers.push(
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
        );
    }

    let state = AppState {
        orchestrator,
        dispatcher,
        transport: Arc::new(config.transport.clone()),
    };

    Ok(Application { config, db_pool, state, dead_letters, consumers })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use signoff_core::config::{ConfigOverrides, LoadOptions, TransportMode};
    use signoff_core::domain::approval::ApprovalStatus;
    use signoff_core::domain::employee::{Caller, EmployeeId, Role};
    use signoff_core::{NewApproval, StepPlan};
    use signoff_db::DemoDirectory;

    use super::{bootstrap, BootstrapError};

    fn overrides(transport_mode: TransportMode) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                transport_mode: Some(transport_mode),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn call_mode_without_peer_urls_fails_fast() {
        let error = bootstrap(overrides(TransportMode::Call)).await.err().expect("must fail");
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("processing_base_url"));
    }

    #[tokio::test]
    async fn queue_mode_wires_both_sides_through_the_bus() {
        let app = bootstrap(overrides(TransportMode::Queue)).await.expect("bootstrap");
        assert_eq!(app.consumers.len(), 2);
        DemoDirectory::load(&app.db_pool).await.expect("seed");

        let requester = Caller::new(EmployeeId(1), Role::Employee);
        let draft = NewApproval {
            title: "Headset".to_string(),
            content: "Noise cancelling headset".to_string(),
            steps: vec![StepPlan::new(1, EmployeeId(10))],
        };
        let created = app.state.orchestrator.create(&requester, draft).await.expect("create");

        let approver = Caller::new(EmployeeId(10), Role::Approver);
        let mut queued = Vec::new();
        for _ in 0..200 {
            queued = app.state.dispatcher.queue_for(&approver, EmployeeId(10)).expect("queue");
            if !queued.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(queued.len(), 1);

        app.state
            .dispatcher
            .handle(&approver, EmployeeId(10), created.request_id, ApprovalStatus::Approved)
            .await
            .expect("approve");

        let mut status = ApprovalStatus::Pending;
        for _ in 0..200 {
            status = app
                .state
                .orchestrator
                .find_one(&requester, created.request_id)
                .await
                .expect("find")
                .final_status;
            if status != ApprovalStatus::Pending {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, ApprovalStatus::Approved);
        assert!(app.dead_letters.is_empty());
    }
}
