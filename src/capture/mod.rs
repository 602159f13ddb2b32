//! Capture Worker: drives one capture source (a live interface or a saved
//! capture file) through its lifecycle and hands each frame to the
//! classifier and then the registry.
//!
//! Built on the `pcap` crate, the concrete capture library behind the
//! worker's state machine. `pcap`'s safe API doesn't expose libpcap's raw
//! `dispatch`/`breakloop` pair; `Capture::next_packet` already yields one
//! packet (or a timeout/EOF/error) per call, so the dispatch loop here
//! collapses to checking the shutdown flag around each `next_packet` call
//! rather than threading a callback through a breakloop handle.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use pcap::{Active, Capture, Error as PcapError, Linktype, Offline};

use crate::classify::classify;
use crate::config::{DEFAULT_SNAPLEN, LIVE_READ_TIMEOUT_MS};
use crate::error::RouterError;
use crate::registry::{Registry, Resolution};
use crate::stats::Stats;

/// Policy for a frame the classifier cannot parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyPolicy {
    /// Log and rethrow, killing the worker (diagnostic runs).
    Abort,
    /// Log, count, and drop the frame, keeping the worker alive.
    DropAndCount,
}

/// Shared, process-wide linktype negotiation. Every worker must agree on a
/// single linktype since all dump files are opened bound to one value.
#[derive(Debug, Default)]
pub struct SharedLinktype {
    value: Mutex<Option<i32>>,
}

impl SharedLinktype {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The negotiated linktype, once at least one worker has published it.
    pub fn get(&self) -> Option<Linktype> {
        self.value
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .map(Linktype)
    }

    /// Publish this worker's linktype, or verify it matches one already
    /// published. Fails if a prior worker set a different linktype.
    pub(crate) fn negotiate(&self, source: &str, linktype: Linktype) -> Result<Linktype, RouterError> {
        let mut guard = self.value.lock().unwrap_or_else(|p| p.into_inner());
        match *guard {
            None => {
                *guard = Some(linktype.0);
                Ok(linktype)
            }
            Some(existing) if existing == linktype.0 => Ok(linktype),
            Some(existing) => Err(RouterError::LinktypeMismatch {
                source: source.to_string(),
                expected: existing,
                actual: linktype.0,
            }),
        }
    }
}

enum Source {
    Live(Capture<Active>),
    Offline(Capture<Offline>),
}

impl Source {
    fn open(spec: &str, snaplen: i32) -> Result<Self, RouterError> {
        let io_err = |e: PcapError| RouterError::CaptureIo {
            source: spec.to_string(),
            message: e.to_string(),
        };
        if Path::new(spec).is_file() {
            let cap = Capture::from_file(spec).map_err(io_err)?;
            Ok(Source::Offline(cap))
        } else {
            let cap = Capture::from_device(spec)
                .map_err(io_err)?
                .promisc(true)
                .snaplen(snaplen)
                .timeout(LIVE_READ_TIMEOUT_MS)
                .open()
                .map_err(io_err)?;
            Ok(Source::Live(cap))
        }
    }

    fn datalink(&self) -> Linktype {
        match self {
            Source::Live(c) => c.get_datalink(),
            Source::Offline(c) => c.get_datalink(),
        }
    }

    fn next_packet(&mut self) -> Result<pcap::Packet<'_>, PcapError> {
        match self {
            Source::Live(c) => c.next_packet(),
            Source::Offline(c) => c.next_packet(),
        }
    }

    fn is_offline(&self) -> bool {
        matches!(self, Source::Offline(_))
    }
}

/// One capture source's worker. Runs on its own OS thread until shutdown
/// or EOF (offline sources), reporting its outcome to the Supervisor.
pub struct CaptureWorker {
    name: String,
    snaplen: i32,
    policy: ClassifyPolicy,
    shared_linktype: Arc<SharedLinktype>,
    shutdown: Arc<AtomicBool>,
    registry: Arc<Registry>,
    stats: Arc<Stats>,
    classify_errors: AtomicI32,
}

impl CaptureWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        snaplen: Option<i32>,
        policy: ClassifyPolicy,
        shared_linktype: Arc<SharedLinktype>,
        shutdown: Arc<AtomicBool>,
        registry: Arc<Registry>,
        stats: Arc<Stats>,
    ) -> Self {
        CaptureWorker {
            name,
            snaplen: snaplen.unwrap_or(DEFAULT_SNAPLEN),
            policy,
            shared_linktype,
            shutdown,
            registry,
            stats,
            classify_errors: AtomicI32::new(0),
        }
    }

    pub fn classify_error_count(&self) -> i32 {
        self.classify_errors.load(Ordering::Relaxed)
    }

    /// Run the worker to completion: open, negotiate, dispatch loop, drain.
    pub fn run(&self) -> Result<(), RouterError> {
        tracing::debug!(source = %self.name, "opening capture source");
        let mut source = Source::open(&self.name, self.snaplen)?;

        let linktype = source.datalink();
        self.shared_linktype.negotiate(&self.name, linktype)?;
        tracing::debug!(source = %self.name, linktype = linktype.0, "linktype negotiated");

        let offline = source.is_offline();
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                tracing::debug!(source = %self.name, "shutdown observed, draining");
                break;
            }
            match source.next_packet() {
                Ok(packet) => {
                    self.handle_packet(&packet)?;
                }
                Err(PcapError::TimeoutExpired) => {
                    // Live mode read timeout: loop back to re-check shutdown.
                    continue;
                }
                Err(PcapError::NoMorePackets) if offline => {
                    tracing::debug!(source = %self.name, "offline source exhausted");
                    break;
                }
                Err(e) => {
                    return Err(RouterError::CaptureIo {
                        source: self.name.clone(),
                        message: e.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    fn handle_packet(&self, packet: &pcap::Packet<'_>) -> Result<(), RouterError> {
        // Copy the bytes: the capture library's buffer is only valid for
        // the duration of this call.
        let data = packet.data.to_vec();
        let header = *packet.header;

        let fingerprint = match classify(&data) {
            Ok(fp) => fp,
            Err(e) => {
                tracing::error!(
                    source = %self.name,
                    error = %e,
                    data = %hex_dump(&data),
                    caplen = header.caplen,
                    len = header.len,
                    "classifier error"
                );
                self.classify_errors.fetch_add(1, Ordering::Relaxed);
                return match self.policy {
                    ClassifyPolicy::Abort => Err(e),
                    ClassifyPolicy::DropAndCount => Ok(()),
                };
            }
        };

        match self.registry.resolve(&fingerprint)? {
            Resolution::Miss => {}
            Resolution::Writer(dump) => dump.save(&header, &data, &self.stats)?,
        }
        Ok(())
    }
}

fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_linktype_accepts_first_and_matching_subsequent() {
        let shared = SharedLinktype::new();
        assert!(shared.negotiate("a", Linktype(1)).is_ok());
        assert!(shared.negotiate("b", Linktype(1)).is_ok());
    }

    #[test]
    fn shared_linktype_rejects_mismatch() {
        let shared = SharedLinktype::new();
        shared.negotiate("a", Linktype(1)).unwrap();
        let err = shared.negotiate("b", Linktype(2)).unwrap_err();
        assert!(matches!(err, RouterError::LinktypeMismatch { .. }));
    }

    #[test]
    fn hex_dump_formats_bytes_lowercase_space_separated() {
        assert_eq!(hex_dump(&[0x0a, 0xff]), "0a ff");
    }
}
