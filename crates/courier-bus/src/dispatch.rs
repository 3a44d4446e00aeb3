// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-delivery handler invocation shared by every bus backend.
//!
//! A failing or panicking handler only loses the delivery it was given; the
//! subscription loop that called it keeps running.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{error, trace, warn};

use courier_core::{Delivery, DeliveryHandler};

/// How a single handler invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    Failed,
    Panicked,
}

/// Runs `handler` for one delivery, containing errors and panics.
pub async fn dispatch(handler: &dyn DeliveryHandler, delivery: Delivery) -> DispatchOutcome {
    let partition_key = delivery.partition_key.clone();
    let delivery_id = delivery.delivery_id.clone();

    match AssertUnwindSafe(handler.handle(delivery)).catch_unwind().await {
        Ok(Ok(())) => {
            trace!(%partition_key, %delivery_id, "delivery handled");
            DispatchOutcome::Handled
        }
        Ok(Err(e)) => {
            warn!(
                %partition_key,
                %delivery_id,
                kind = e.kind(),
                error = %e,
                "delivery handler failed, dropping message"
            );
            DispatchOutcome::Failed
        }
        Err(panic) => {
            error!(
                %partition_key,
                %delivery_id,
                panic = panic_message(panic.as_ref()),
                "delivery handler panicked, dropping message"
            );
            DispatchOutcome::Panicked
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}
