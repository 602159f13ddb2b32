//! Supervisor: owns the run end to end. Starts the stats logger, spawns one
//! capture worker per configured source, waits on a completion channel with
//! a short periodic timeout so Ctrl-C stays responsive, and tears everything
//! down once every worker has reported in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::capture::{CaptureWorker, ClassifyPolicy, SharedLinktype};
use crate::config::{RawConfig, SUPERVISOR_POLL_MS};
use crate::error::RouterError;
use crate::registry::Registry;
use crate::route::compiler::compile;
use crate::stats::Stats;

/// Default source name when the configuration lists no interfaces: the
/// capture library's notion of "the default device".
const DEFAULT_SOURCE: &str = "any";

struct WorkerDone {
    name: String,
    result: Result<(), RouterError>,
}

/// Run the full pipeline to completion and return the process exit code:
/// 0 clean, 1 on interrupt, non-zero on any worker failure.
///
/// `shutdown` is the cooperative stop flag workers poll; `interrupted` is
/// set only by the Ctrl-C handler, so the exit code can distinguish "the
/// user asked us to stop" from "a worker failed and we stopped everything
/// else in response".
pub fn run(
    raw: RawConfig,
    policy: ClassifyPolicy,
    shutdown: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
) -> Result<(), RouterError> {
    let table = compile(&raw)?;
    let sources: Vec<String> = raw
        .interfaces
        .clone()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![DEFAULT_SOURCE.to_string()]);
    let snaplen = raw.snaplen;

    let stats = Stats::new();
    let stats_logger = stats.spawn_logger(Arc::clone(&shutdown));

    // The registry reads the negotiated linktype lazily, on first Dump File
    // creation, which only ever happens after a worker has classified a
    // packet from an already-negotiated source.
    let shared_linktype = SharedLinktype::new();
    let registry = Arc::new(Registry::new(table, Arc::clone(&shared_linktype)));

    let (tx, rx) = mpsc::channel::<WorkerDone>();
    let mut handles = Vec::with_capacity(sources.len());
    for name in &sources {
        let worker = CaptureWorker::new(
            name.clone(),
            snaplen,
            policy,
            Arc::clone(&shared_linktype),
            Arc::clone(&shutdown),
            Arc::clone(&registry),
            Arc::clone(&stats),
        );
        let tx = tx.clone();
        let worker_name = name.clone();
        let handle = std::thread::Builder::new()
            .name(format!("capture-{worker_name}"))
            .spawn(move || {
                let result = worker.run();
                let _ = tx.send(WorkerDone {
                    name: worker_name,
                    result,
                });
            })
            .expect("failed to spawn capture worker thread");
        handles.push(handle);
    }
    drop(tx);

    let mut remaining = sources.len();
    let mut first_error: Option<RouterError> = None;
    while remaining > 0 {
        match rx.recv_timeout(Duration::from_millis(SUPERVISOR_POLL_MS)) {
            Ok(done) => {
                remaining -= 1;
                if let Err(e) = done.result {
                    tracing::error!(source = %done.name, error = %e, "capture worker failed");
                    if first_error.is_none() {
                        shutdown.store(true, Ordering::Relaxed);
                        first_error = Some(e);
                    }
                } else {
                    tracing::debug!(source = %done.name, "capture worker completed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if shutdown.load(Ordering::Relaxed) {
                    continue;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    for handle in handles {
        let _ = handle.join();
    }

    registry.close_all();
    shutdown.store(true, Ordering::Relaxed);
    let _ = stats_logger.join();

    match first_error {
        Some(e) => Err(e),
        None if interrupted.load(Ordering::Relaxed) => Err(RouterError::Interrupted),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_interfaces_falls_back_to_default_source() {
        let raw = RawConfig::default();
        let sources = raw
            .interfaces
            .clone()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_SOURCE.to_string()]);
        assert_eq!(sources, vec![DEFAULT_SOURCE.to_string()]);
    }

    #[test]
    fn configured_interfaces_are_used_verbatim() {
        let mut raw = RawConfig::default();
        raw.interfaces = Some(vec!["eth0".into(), "eth1".into()]);
        let sources = raw
            .interfaces
            .clone()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_SOURCE.to_string()]);
        assert_eq!(sources, vec!["eth0".to_string(), "eth1".to_string()]);
    }
}
