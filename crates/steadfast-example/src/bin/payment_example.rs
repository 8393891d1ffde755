// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Payment Example - Demonstrates early responses and resuming a failed payment.
//!
//! This example shows:
//! - Answering the caller as soon as the card is authorized
//! - Retrying a flaky capture call with a per-step schedule
//! - Resuming after a failure without authorizing or capturing twice
//!
//! Run with: cargo run -p steadfast-example --bin payment_example

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use steadfast_core::{
    Engine, EngineConfig, MemoryStore, OperationContext, OperationDefinition, OperationError,
    OperationResponse, ResumeOperation, SaveModel, StartOperation, StepOptions,
};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct PaymentRequest {
    order_id: String,
    amount_cents: u64,
    currency: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Receipt {
    authorization: String,
    capture: String,
    amount_cents: u64,
    currency: String,
}

#[derive(Debug, thiserror::Error)]
#[error("payment gateway timed out")]
struct GatewayTimeout;

/// Simulated payment gateway and mailer.
#[derive(Default)]
struct PaymentServices {
    authorizations: AtomicU32,
    capture_attempts: AtomicU32,
    mailer_down: AtomicBool,
}

impl PaymentServices {
    async fn authorize(&self, request: &PaymentRequest) -> Result<String, OperationError> {
        let n = self.authorizations.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(format!("auth-{}-{}", request.order_id, n))
    }

    async fn capture(&self, authorization: &str) -> Result<String, OperationError> {
        let attempt = self.capture_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < 3 {
            return Err(OperationError::failed(GatewayTimeout));
        }
        Ok(format!("cap-{}", authorization))
    }

    async fn send_receipt(&self, receipt: &Receipt) -> Result<(), OperationError> {
        if self.mailer_down.load(Ordering::SeqCst) {
            return Err(OperationError::msg("mailer unavailable"));
        }
        info!(capture = %receipt.capture, "Receipt sent");
        Ok(())
    }
}

fn payment_operation() -> OperationDefinition<PaymentServices> {
    OperationDefinition::from_fn("payment", |ctx: OperationContext<PaymentServices>| async move {
        let request: PaymentRequest = ctx.input_as()?;
        let gateway = ctx.services();

        if request.amount_cents == 0 {
            return Err(OperationError::rejected(
                "INVALID_AMOUNT",
                "Amount must be greater than zero.",
            ));
        }

        ctx.log(format!("authorizing {} {}", request.amount_cents, request.currency));
        let authorization: String = ctx
            .step("authorize", || gateway.authorize(&request))
            .await?;

        let capture_options = StepOptions::new("capture")
            .retry_intervals(vec![Duration::from_millis(50), Duration::from_millis(100)])
            .transient_when(|err| err.downcast_ref::<GatewayTimeout>().is_some());
        let capture: String = ctx
            .step_with(capture_options, || gateway.capture(&authorization))
            .await?;

        let receipt = Receipt {
            authorization,
            capture,
            amount_cents: request.amount_cents,
            currency: request.currency.clone(),
        };
        ctx.output(&receipt)?;

        let _: bool = ctx
            .step("send-receipt", || async {
                gateway.send_receipt(&receipt).await?;
                Ok(true)
            })
            .await?;
        Ok(())
    })
    .with_save_model(SaveModel::Rejection)
    .with_input_type::<PaymentRequest>()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("=== Payment Example: early responses and resume ===");

    let config = EngineConfig::from_env()?;
    let services = Arc::new(PaymentServices::default());
    services.mailer_down.store(true, Ordering::SeqCst);

    let engine = Engine::builder()
        .store(Arc::new(MemoryStore::new()))
        .shared_services(services.clone())
        .config(config)
        .operation(payment_operation())
        .build()?;

    let operation_id = format!("payment-{}", uuid::Uuid::new_v4());
    let request = StartOperation::new(
        "payment",
        json!({ "order_id": "order-1001", "amount_cents": 4999, "currency": "EUR" }),
    )
    .with_id(operation_id.clone())
    .resolve("authorize");

    // The caller is answered once the card is authorized; the rest runs on.
    let record = engine
        .start_operation(request, |response| {
            info!(
                operation_id = %response.operation_id,
                status = %response.status,
                last_step = %response.last_completed_step_token(),
                "Caller answered"
            );
        })
        .await?;

    warn!(
        status = %record.status,
        error = ?OperationResponse::from_record(&record).client_error(),
        "First attempt ended"
    );

    // The mailer comes back; resume picks up at the receipt step.
    services.mailer_down.store(false, Ordering::SeqCst);
    let record = engine
        .resume_operation(ResumeOperation::new(operation_id.clone()), |response| {
            info!(
                status = %response.status,
                output = ?response.output,
                "Resume answered"
            );
        })
        .await?;

    info!(
        status = %record.status,
        duration_ms = record.duration_in_ms,
        authorizations = services.authorizations.load(Ordering::SeqCst),
        capture_attempts = services.capture_attempts.load(Ordering::SeqCst),
        "Payment finished"
    );

    let stored = engine.get_operation(&operation_id).await?;
    for entry in &stored.step_data_entries {
        info!(step = %entry.name, data = %entry.data, "Journaled step");
    }

    // A rejected request never reaches the gateway.
    let rejected = engine
        .start_operation(
            StartOperation::new(
                "payment",
                json!({ "order_id": "order-1002", "amount_cents": 0, "currency": "EUR" }),
            ),
            |response| {
                info!(
                    status = %response.status,
                    error = ?response.client_error(),
                    "Zero-amount request answered"
                );
            },
        )
        .await?;
    info!(status = %rejected.status, "Zero-amount request finished");

    Ok(())
}
