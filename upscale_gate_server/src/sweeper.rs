use std::time::Duration;

use log::*;
use tokio::task::JoinHandle;
use upscale_gate_engine::{RateLimitApi, StoreBackend};

/// Starts the store sweeper, which drops closed rate-limit windows and expired webhook markers from every store in
/// `stores` every `period`. Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_sweeper(stores: Vec<RateLimitApi<StoreBackend>>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        info!("🕰️ Store sweeper started for {} store(s)", stores.len());
        loop {
            timer.tick().await;
            trace!("🕰️ Running store sweep");
            for api in &stores {
                match api.purge_expired().await {
                    Ok(0) => {},
                    Ok(n) => debug!("🕰️ Swept {n} expired entries"),
                    Err(e) => error!("🕰️ Error running store sweep: {e}"),
                }
            }
        }
    })
}
