//! Queue Arbiter (C5): the single-owner FIFO waiting queue. Nothing else ever touches `queue`,
//! which removes the check-then-act race between `can_admit` and `acquire` without a global
//! lock — admission decisions are confined to this one task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::interval;

use sim_common::Config;

use crate::admission::AdmissionGuard;
use crate::capacity::CapacityAccountant;
use crate::context::RequestContext;
use crate::ingress::IngressDepth;
use crate::lora::LoraRegistry;
use crate::request::charge_for;

const TICK_INTERVAL: Duration = Duration::from_millis(10);

pub struct Arbiter;

impl Arbiter {
    /// Spawns the arbiter task. Returns immediately; the task runs until `shutdown` observes
    /// `true` or the ingress channel is closed with nothing left to drain.
    pub fn spawn(
        config: Arc<Config>,
        accountant: Arc<CapacityAccountant>,
        lora: Arc<LoraRegistry>,
        mut ingress_rx: mpsc::Receiver<RequestContext>,
        ingress_depth: IngressDepth,
        dispatch_tx: mpsc::Sender<RequestContext>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tokio::spawn(async move {
            let mut queue: Vec<RequestContext> = Vec::new();
            let mut ticker = interval(TICK_INTERVAL);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            tracing::info!(target: "arbiter", "shutdown observed, stopping");
                            break;
                        }
                    }

                    maybe_ctx = ingress_rx.recv() => {
                        match maybe_ctx {
                            Some(ctx) => {
                                ingress_depth.decr();
                                queue.push(ctx);
                            }
                            None => break,
                        }
                        publish_metrics(&config, &accountant, &lora, &queue, ingress_depth.get());
                    }

                    _ = ticker.tick() => {
                        scan_and_dispatch(&config, &accountant, &lora, &mut queue, &dispatch_tx).await;
                        publish_metrics(&config, &accountant, &lora, &queue, ingress_depth.get());
                    }
                }
            }
        });
    }
}

/// Scans the queue head-to-tail, admitting every entry that currently fits. Entries that don't
/// fit are kept in place; a later, smaller entry may still be admitted past them (§4.5 — this
/// reordering is intentional, not a bug).
async fn scan_and_dispatch(
    config: &Config,
    accountant: &Arc<CapacityAccountant>,
    lora: &Arc<LoraRegistry>,
    queue: &mut Vec<RequestContext>,
    dispatch_tx: &mpsc::Sender<RequestContext>,
) {
    let current = std::mem::take(queue);
    let mut remaining = Vec::with_capacity(current.len());
    let mut iter = current.into_iter();

    while let Some(mut ctx) = iter.next() {
        let charge = charge_for(&ctx.request, config.max_model_len);
        if !accountant.can_admit(charge) {
            remaining.push(ctx);
            continue;
        }
        accountant.acquire(charge);
        ctx.admission = Some(AdmissionGuard::new(accountant.clone(), lora.clone(), charge));
        if dispatch_tx.send(ctx).await.is_err() {
            // Worker pool is gone (shutdown race). Nothing further can be serviced either.
            remaining.extend(iter);
            break;
        }
    }

    *queue = remaining;
}

fn publish_metrics(
    config: &Config,
    accountant: &CapacityAccountant,
    lora: &LoraRegistry,
    queue: &[RequestContext],
    ingress_depth: i64,
) {
    let model = config.display_model();
    sim_obs::set_running_requests(model, accountant.running());
    // Intentionally the ingress channel's depth, not `queue.len()` — items already moved into
    // this arbiter's private queue are undercounted (§9 open question).
    sim_obs::set_waiting_requests(model, ingress_depth);
    sim_obs::set_kv_cache_usage_percent(model, accountant.usage_percent());
    let waiting_lora = queue.iter().filter(|c| c.lora_name.is_some()).count();
    sim_obs::set_lora_info(&lora.running_names(), waiting_lora, config.lora_modules.len());
}
