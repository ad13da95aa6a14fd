//! Chain reconciliation.
//!
//! Correlates recent transfers to a merchant's receiving address with an
//! open payment intent and settles the intent on the first match. Safe to
//! call repeatedly: the only side effect is the single guarded `settle`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use sbtc_types::{
    AppError, BlockExplorer, GatewayRepository, PaymentIntent, PaymentIntentId,
    PaymentIntentStatus, ReconcileResponse, ReconcileStatus, TransferCall,
};

use crate::PaymentService;

pub const DEFAULT_SBTC_CONTRACT_ID: &str =
    "SM3VDXK3WZZSA84XXFKAFAF15NNZX32CTSG82JFQ4.sbtc-token";

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Fully qualified contract id of the settlement token.
    pub contract_id: String,
    /// Transactions requested from the explorer per reconcile.
    pub page_size: u32,
    /// Pending intents examined per background pass.
    pub batch_size: i64,
    /// Background pass period. Zero disables the worker.
    pub interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            contract_id: DEFAULT_SBTC_CONTRACT_ID.to_string(),
            page_size: 50,
            batch_size: 25,
            interval: Duration::from_secs(60),
        }
    }
}

/// Result of one reconcile call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    AlreadySucceeded(PaymentIntent),
    Settled {
        intent: PaymentIntent,
        tx_id: String,
    },
    Pending {
        intent: PaymentIntent,
        candidates_examined: usize,
    },
}

impl From<ReconcileOutcome> for ReconcileResponse {
    fn from(outcome: ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::AlreadySucceeded(intent) => Self {
                status: ReconcileStatus::AlreadySucceeded,
                tx_id: intent.tx_id.clone(),
                payment_intent: intent,
                candidates_examined: None,
            },
            ReconcileOutcome::Settled { intent, tx_id } => Self {
                status: ReconcileStatus::Settled,
                payment_intent: intent,
                tx_id: Some(tx_id),
                candidates_examined: None,
            },
            ReconcileOutcome::Pending {
                intent,
                candidates_examined,
            } => Self {
                status: ReconcileStatus::Pending,
                payment_intent: intent,
                tx_id: None,
                candidates_examined: Some(candidates_examined),
            },
        }
    }
}

pub struct Reconciler<R: GatewayRepository> {
    service: Arc<PaymentService<R>>,
    explorer: Arc<dyn BlockExplorer>,
    config: ReconcilerConfig,
}

impl<R: GatewayRepository> Reconciler<R> {
    pub fn new(
        service: Arc<PaymentService<R>>,
        explorer: Arc<dyn BlockExplorer>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            service,
            explorer,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Looks for a transfer settling `id` and settles it on the first match.
    #[tracing::instrument(skip(self), fields(intent_id = %id))]
    pub async fn reconcile(&self, id: &PaymentIntentId) -> Result<ReconcileOutcome, AppError> {
        let intent = self.service.get_payment_intent(id).await?;
        let merchant = self.service.get_merchant(&intent.merchant_id).await?;
        let address = merchant
            .receiving_address()
            .ok_or_else(|| {
                AppError::Configuration(format!(
                    "Merchant {} has no receiving address",
                    merchant.id
                ))
            })?
            .to_string();

        match intent.status {
            PaymentIntentStatus::Succeeded => {
                return Ok(ReconcileOutcome::AlreadySucceeded(intent));
            }
            PaymentIntentStatus::Failed | PaymentIntentStatus::Canceled => {
                return Err(AppError::InvalidState(format!(
                    "Payment intent {} is {}, nothing to reconcile",
                    id, intent.status
                )));
            }
            PaymentIntentStatus::Created | PaymentIntentStatus::Pending => {}
        }

        let transactions = self
            .explorer
            .recent_transactions(&address, self.config.page_size)
            .await?;

        let mut candidates_examined = 0;
        for tx in &transactions {
            let transfer = match TransferCall::from_transaction(tx, &self.config.contract_id) {
                None => continue,
                Some(Ok(transfer)) => transfer,
                Some(Err(e)) => {
                    candidates_examined += 1;
                    tracing::debug!(tx_id = %tx.tx_id, error = %e, "skipping undecodable transfer");
                    continue;
                }
            };
            candidates_examined += 1;

            if !transfer.matches(&intent, &address) {
                continue;
            }

            tracing::info!(tx_id = %transfer.tx_id, sender = %transfer.sender, "matching transfer found");
            return match self
                .service
                .settle(id, transfer.tx_id.clone(), Some(transfer.sender.clone()))
                .await
            {
                Ok(intent) => Ok(ReconcileOutcome::Settled {
                    intent,
                    tx_id: transfer.tx_id,
                }),
                // Another trigger settled it between our read and our write.
                Err(AppError::InvalidState(msg)) => {
                    let latest = self.service.get_payment_intent(id).await?;
                    if latest.status == PaymentIntentStatus::Succeeded {
                        Ok(ReconcileOutcome::AlreadySucceeded(latest))
                    } else {
                        Err(AppError::InvalidState(msg))
                    }
                }
                Err(e) => Err(e),
            };
        }

        tracing::debug!(candidates_examined, "no matching transfer yet");
        Ok(ReconcileOutcome::Pending {
            intent,
            candidates_examined,
        })
    }

    /// Reconciles the least recently touched pending intents once.
    /// Returns how many were settled.
    pub async fn reconcile_pending(&self) -> Result<usize, AppError> {
        let pending = self
            .service
            .list_payment_intents_by_status(PaymentIntentStatus::Pending, self.config.batch_size)
            .await?;

        let mut settled = 0;
        for intent in pending {
            match self.reconcile(&intent.id).await {
                Ok(ReconcileOutcome::Settled { .. }) => settled += 1,
                Ok(_) => {}
                Err(AppError::Upstream(e)) => {
                    // The explorer is shared by every intent; stop this pass.
                    tracing::warn!(error = %e, "explorer unavailable, ending reconcile pass");
                    break;
                }
                Err(e) => {
                    tracing::warn!(intent_id = %intent.id, error = %e, "reconcile failed");
                }
            }
        }
        Ok(settled)
    }
}

/// Background loop running [`Reconciler::reconcile_pending`] on an interval.
pub struct ReconcileWorker<R: GatewayRepository> {
    reconciler: Arc<Reconciler<R>>,
}

impl<R: GatewayRepository> ReconcileWorker<R> {
    pub fn new(reconciler: Arc<Reconciler<R>>) -> Self {
        Self { reconciler }
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.reconciler.config().interval;
        if period.is_zero() {
            tracing::info!("reconcile worker disabled");
            return;
        }

        tracing::info!(interval_secs = period.as_secs(), "reconcile worker started");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    match self.reconciler.reconcile_pending().await {
                        Ok(0) => {}
                        Ok(settled) => tracing::info!(settled, "reconcile pass settled intents"),
                        Err(e) => tracing::error!(error = %e, "reconcile pass failed"),
                    }
                }
            }
        }

        tracing::info!("reconcile worker stopped");
    }
}
