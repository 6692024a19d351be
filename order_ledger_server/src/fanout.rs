//! Delivery of finished order patches to the live-dashboard collaborator.
//!
//! The engine publishes [`OrderUpdatedEvent`]s through its hook system; this
//! module installs the handler that carries them out of the process. The
//! transport on the far side (SSE, websockets) is somebody else's problem:
//! we POST the formatted patch message to a configured endpoint, or log it
//! when none is configured.
use std::{future::Future, pin::Pin};

use log::*;
use order_ledger_engine::events::{EventHooks, OrderUpdatedEvent};

pub fn install_fanout_hook(hooks: &mut EventHooks, fanout_url: Option<String>) {
    let client = reqwest::Client::new();
    hooks.on_order_update(move |event: OrderUpdatedEvent| {
        let client = client.clone();
        let url = fanout_url.clone();
        Box::pin(async move {
            let order_id = event.message.order_update.order_id.clone();
            let payload = match serde_json::to_string(&event.message) {
                Ok(p) => p,
                Err(e) => {
                    error!("📢️ Could not serialize fanout message for order {order_id}: {e}");
                    return;
                },
            };
            match url {
                Some(url) => match client.post(&url).header("Content-Type", "application/json").body(payload).send().await {
                    Ok(response) if response.status().is_success() => {
                        trace!("📢️ Fanout patch for order {order_id} delivered");
                    },
                    Ok(response) => {
                        warn!("📢️ Fanout endpoint returned {} for order {order_id}", response.status());
                    },
                    Err(e) => {
                        warn!("📢️ Could not deliver fanout patch for order {order_id}: {e}");
                    },
                },
                None => {
                    debug!("📢️ Order update (no fanout endpoint configured): {payload}");
                },
            }
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
}
