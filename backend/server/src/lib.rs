//! Backend of a point-of-sale and ledger app for fertilizer and agri-input shops.
//!
//! A shop owner signs up, adds staff, keeps a catalog of products with stock
//! levels, a list of customers with running dues, and the shop's bank accounts.
//! Every bill, purchase, payment and expense is a transaction; recording one
//! moves stock and dues, deleting one moves them back.
//!
//!
//!
//! # Tenancy
//! - Every document carries the owner's user id
//! - Staff tokens carry their owner's id, so staff read and write the owner's shop
//! - Deleting products or transactions and managing staff or settings is owner-only
//!
//!
//!
//! # Voice Billing
//!
//! The browser transcribes speech, this server asks an LLM to turn the text into
//! a bill, then matches every name it produced against the shop's own catalog.
//! Nothing is saved until the counter reviews the bill and submits it like any
//! other.
//!
//!
//!
//! # Storage
//!
//! Redis in deployments, see [`database`] for the key layout. `STORE=memory`
//! runs without Redis, which is what the integration tests do.
//!
//!
//!
//! # Setup
//!
//! Run against a local Redis.
//! ```sh
//! JWT_SECRET=dev REDIS_URL=redis://127.0.0.1:6379 RUST_LOG=info cargo run --bin khaad-server
//! ```
//!
//! Run without Redis.
//! ```sh
//! JWT_SECRET=dev STORE=memory RUST_LOG=info cargo run --bin khaad-server
//! ```
//!
//! Seed the standard catalog into a shop.
//! ```sh
//! cargo run --bin khaad-seed -- --owner owner@example.com
//! ```
//!
//! View docs.
//! ```sh
//! cargo doc --open
//! ```
use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, post, put},
};
use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod billing;
pub mod config;
pub mod database;
pub mod error;
pub mod invoice;
pub mod ledger;
pub mod mailer;
pub mod models;
pub mod reports;
pub mod resolve;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;
pub mod voice;

use config::Config;
use routes::*;
use state::State;

pub fn router(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    let api = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/forgot-password", post(forgot_password_handler))
        .route("/auth/reset-password", post(reset_password_handler))
        .route("/auth/me", get(me_handler))
        .route("/settings", get(settings_handler).put(update_settings_handler))
        .route("/settings/staff", get(staff_handler).post(create_staff_handler))
        .route("/products", get(products_handler).post(create_product_handler))
        .route(
            "/products/{id}",
            put(update_product_handler).delete(delete_product_handler),
        )
        .route("/customers", get(customers_handler).post(create_customer_handler))
        .route("/customers/{id}", put(update_customer_handler))
        .route("/customers/{id}/transactions", get(customer_transactions_handler))
        .route(
            "/bank-accounts",
            get(bank_accounts_handler).post(create_bank_account_handler),
        )
        .route(
            "/transactions",
            get(transactions_handler).post(create_transaction_handler),
        )
        .route(
            "/transactions/{id}",
            get(transaction_handler)
                .patch(add_payments_handler)
                .delete(delete_transaction_handler),
        )
        .route("/transactions/{id}/invoice", get(invoice_handler))
        .route("/dashboard/stats", get(dashboard_stats_handler))
        .route("/dashboard/dues", get(dues_handler))
        .route("/reports/summary", get(summary_handler))
        .route("/reports/export", get(export_handler))
        .route("/ai/process-voice", post(process_voice_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = State::new(config).await?;

    info!("Starting server...");
    let app = router(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
