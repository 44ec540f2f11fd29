//! Application startup and lifecycle management.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::Router;
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{request_id_middleware, RequestId};
use service_core::retry::RetryConfig;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::{EstimatingConfig, ProcessorKind};
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::services::clients::ClientService;
use crate::services::estimates::EstimateService;
use crate::services::gateway::{PaymentSettings, PublicGateway};
use crate::services::invoices::InvoiceService;
use crate::services::jobs::{EventPublisher, JobProjector, JobService};
use crate::services::metrics::init_metrics;
use crate::services::notifications::{MockNotifier, NotificationService, Notifier, SmtpNotifier};
use crate::services::payments::{HttpPaymentProcessor, MockPaymentProcessor, PaymentProcessor};
use crate::services::reconciler::Reconciler;
use crate::services::store::{DocumentStore, MemoryStore, PgStore, ReconciliationStore, RecordStore};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: EstimatingConfig,
    pub documents: Arc<dyn DocumentStore>,
    pub reconciliations: Arc<dyn ReconciliationStore>,
    pub estimates: EstimateService,
    pub invoices: InvoiceService,
    pub clients: ClientService,
    pub jobs: JobService,
    pub gateway: PublicGateway,
    pub reconciler: Reconciler,
}

/// External collaborators, swappable for tests.
pub struct Collaborators {
    pub processor: Arc<dyn PaymentProcessor>,
    pub notifier: Arc<dyn Notifier>,
}

impl Collaborators {
    pub fn from_config(config: &EstimatingConfig) -> Result<Self, AppError> {
        let processor: Arc<dyn PaymentProcessor> = match config.payment.processor {
            ProcessorKind::Http => {
                let client = HttpPaymentProcessor::new(config.payment.clone())
                    .map_err(|e| AppError::ConfigError(e.into()))?;
                if client.is_configured() {
                    tracing::info!("Payment processor client initialized");
                } else {
                    tracing::warn!("Payment processor API key not configured");
                }
                Arc::new(client)
            }
            ProcessorKind::Mock => {
                tracing::warn!("Using mock payment processor; no real charges will be made");
                Arc::new(MockPaymentProcessor::default())
            }
        };

        let notifier: Arc<dyn Notifier> = if config.smtp.enabled {
            Arc::new(
                SmtpNotifier::new(config.smtp.clone())
                    .map_err(|e| AppError::ConfigError(e.into()))?,
            )
        } else {
            tracing::warn!("SMTP disabled; notifications are recorded but not delivered");
            Arc::new(MockNotifier::new())
        };

        Ok(Self {
            processor,
            notifier,
        })
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    state: AppState,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Application {
    /// Build the application with collaborators chosen by configuration.
    pub async fn build(config: EstimatingConfig) -> Result<Self, AppError> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::build_with(config, collaborators).await
    }

    pub async fn build_with(
        config: EstimatingConfig,
        collaborators: Collaborators,
    ) -> Result<Self, AppError> {
        init_metrics();

        let (documents, records, reconciliations) = connect_stores(&config).await?;

        let notifications = NotificationService::new(
            collaborators.notifier,
            RetryConfig::default(),
            config.public_base_url.clone(),
        );
        let (events, event_rx) = EventPublisher::channel(config.workers.event_queue_size);

        let estimates = EstimateService::new(documents.clone(), events, notifications.clone());
        let invoices = InvoiceService::new(
            documents.clone(),
            notifications,
            config.payment.currency.clone(),
        );
        let gateway = PublicGateway::new(
            documents.clone(),
            estimates.clone(),
            invoices.clone(),
            collaborators.processor.clone(),
            reconciliations.clone(),
            PaymentSettings {
                currency: config.payment.currency.clone(),
                timeout: config.payment.timeout(),
                // Short backoffs: the whole authorization shares one timeout.
                retry: RetryConfig {
                    max_retries: config.payment.max_retries,
                    ..RetryConfig::quick()
                },
            },
        );
        let reconciler = Reconciler::new(
            reconciliations.clone(),
            invoices.clone(),
            collaborators.processor,
            config.workers.reconcile_batch_size,
            config.workers.reconcile_max_attempts,
        );

        let shutdown = CancellationToken::new();
        let workers = vec![
            JobProjector::new(records.clone(), event_rx).spawn(shutdown.clone()),
            reconciler
                .clone()
                .spawn(config.workers.reconcile_interval(), shutdown.clone()),
        ];

        let state = AppState {
            config: config.clone(),
            documents,
            reconciliations,
            estimates,
            invoices,
            clients: ClientService::new(records.clone()),
            jobs: JobService::new(records),
            gateway,
            reconciler,
        };

        let router = build_router(state.clone());

        // Port 0 binds a random port for testing
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Estimating service listening");

        Ok(Self {
            port,
            listener,
            router,
            state,
            shutdown,
            workers,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Serve until Ctrl-C, then stop the background workers.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let shutdown = self.shutdown.clone();
        let result = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
            .await;

        shutdown.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Background worker ended abnormally");
            }
        }

        result
    }
}

async fn connect_stores(
    config: &EstimatingConfig,
) -> Result<
    (
        Arc<dyn DocumentStore>,
        Arc<dyn RecordStore>,
        Arc<dyn ReconciliationStore>,
    ),
    AppError,
> {
    match &config.database {
        Some(database) => {
            let store = PgStore::new(
                database.url.expose_secret(),
                database.max_connections,
                database.min_connections,
            )
            .await?;
            store.run_migrations().await?;
            let store = Arc::new(store);
            Ok((store.clone(), store.clone(), store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store");
            let store = Arc::new(MemoryStore::new());
            Ok((store.clone(), store.clone(), store))
        }
    }
}

fn build_router(state: AppState) -> Router {
    let owner_routes = Router::new()
        .route(
            "/estimates",
            post(handlers::estimates::create_estimate).get(handlers::estimates::list_estimates),
        )
        .route(
            "/estimates/:id",
            get(handlers::estimates::get_estimate)
                .patch(handlers::estimates::update_estimate)
                .delete(handlers::estimates::delete_estimate),
        )
        .route("/estimates/:id/send", post(handlers::estimates::send_estimate))
        .route(
            "/estimates/:id/convert",
            post(handlers::estimates::convert_estimate),
        )
        .route(
            "/invoices",
            post(handlers::invoices::create_invoice).get(handlers::invoices::list_invoices),
        )
        .route(
            "/invoices/:id",
            get(handlers::invoices::get_invoice)
                .patch(handlers::invoices::update_invoice)
                .delete(handlers::invoices::delete_invoice),
        )
        .route("/invoices/:id/send", post(handlers::invoices::send_invoice))
        .route(
            "/invoices/:id/payments",
            post(handlers::invoices::record_payment),
        )
        .route("/jobs", get(handlers::jobs::list_jobs))
        .route("/dashboard", get(handlers::jobs::dashboard))
        .route(
            "/clients",
            post(handlers::clients::create_client).get(handlers::clients::list_clients),
        )
        .route(
            "/clients/:id",
            get(handlers::clients::get_client)
                .patch(handlers::clients::update_client)
                .delete(handlers::clients::delete_client),
        )
        .route(
            "/reconciliations",
            get(handlers::reconciliations::list_reconciliations),
        );

    let public_routes = Router::new()
        .route("/view-estimate/:token", get(handlers::public::view_estimate))
        .route(
            "/view-estimate/:token/sign",
            post(handlers::public::sign_estimate),
        )
        .route(
            "/view-estimate/:token/reject",
            post(handlers::public::reject_estimate),
        )
        .route("/view-invoice/:token", get(handlers::public::view_invoice))
        .route("/view-invoice/:token/pay", post(handlers::public::pay_invoice));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .merge(owner_routes)
        .merge(public_routes)
        .fallback(handlers::public::not_found)
        .route_layer(from_fn(http_metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .extensions()
                    .get::<RequestId>()
                    .map(|id| id.0.as_str())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    path = %loggable_path(request.uri().path()),
                    owner_id = tracing::field::Empty,
                )
            }),
        )
        // Outermost, so the trace span sees the id it assigns.
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Request path with any view token replaced, safe to log.
fn loggable_path(path: &str) -> String {
    for prefix in ["/view-estimate/", "/view-invoice/"] {
        if let Some(rest) = path.strip_prefix(prefix) {
            return match rest.split_once('/') {
                Some((_, action)) => format!("{}:token/{}", prefix, action),
                None => format!("{}:token", prefix),
            };
        }
    }
    path.to_string()
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                // Without a signal handler, only an explicit cancel stops the server.
                shutdown.cancelled().await;
            }
            tracing::info!("Shutdown signal received");
        }
        _ = shutdown.cancelled() => {}
    }
}
