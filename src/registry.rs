//! Dump File Registry: resolves a fingerprint to an open pcap writer,
//! opening writers lazily and exactly once per filename.
//!
//! Locking is two-tier, matching the original's `KeyDefaultDict`-backed
//! registry: one registry-wide [`Mutex`] guards the find-or-create lookup
//! (held only long enough to check the map and, on miss, insert a fresh
//! handle), and each [`DumpFile`] carries its own `Mutex` around the actual
//! write so two workers writing to two different files never block each
//! other past that brief insert.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use pcap::{Capture, Linktype, Packet, PacketHeader, Savefile};

use crate::capture::SharedLinktype;
use crate::error::RouterError;
use crate::route::{format_pattern, EthertypeTable, Fingerprint, LookupResult};
use crate::stats::Stats;

/// A single opened output file, bound to the process-wide linktype.
pub struct DumpFile {
    filename: String,
    writer: Mutex<Savefile>,
}

impl DumpFile {
    /// `pcap::Capture::dead` has no snaplen parameter — it always opens the
    /// dead handle at libpcap's own 65535 internally, so the writer's header
    /// snaplen isn't configurable from here. See DESIGN.md for why this is
    /// an acknowledged divergence rather than a gap.
    fn open(filename: &str, linktype: Linktype) -> Result<Self, RouterError> {
        let capture = Capture::dead(linktype).map_err(|e| RouterError::DumpWrite {
            filename: filename.to_string(),
            message: e.to_string(),
        })?;
        let writer = capture
            .savefile(filename)
            .map_err(|e| RouterError::DumpWrite {
                filename: filename.to_string(),
                message: e.to_string(),
            })?;
        Ok(DumpFile {
            filename: filename.to_string(),
            writer: Mutex::new(writer),
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Write one packet, updating the shared [`Stats`] counters alongside.
    pub fn save(&self, header: &PacketHeader, data: &[u8], stats: &Stats) -> Result<(), RouterError> {
        let packet = Packet { header, data };
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write(&packet);
        stats.record(header.len as u64);
        tracing::trace!(filename = %self.filename, bytes = header.len, "wrote packet");
        Ok(())
    }
}

/// Outcome of a registry lookup, mirroring the route table's own result
/// shape plus the registry's own I/O failure case.
pub enum Resolution {
    /// No route covers this fingerprint; the caller drops the packet
    /// silently.
    Miss,
    /// An open (or newly opened) writer for this fingerprint.
    Writer(Arc<DumpFile>),
}

/// Keyed lookup from fingerprint (via the route table) to an open writer.
/// Filename → writer mappings are permanent for the run.
pub struct Registry {
    table: EthertypeTable,
    linktype: Arc<SharedLinktype>,
    files: Mutex<HashMap<String, Arc<DumpFile>>>,
}

impl Registry {
    /// `linktype` is read lazily on first writer creation, after whichever
    /// worker opens its source first has published it — a Dump File is
    /// never created before the first packet arrives, and no packet
    /// reaches the registry until its worker has already negotiated the
    /// shared linktype.
    pub fn new(table: EthertypeTable, linktype: Arc<SharedLinktype>) -> Self {
        Registry {
            table,
            linktype,
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a fingerprint to a writer, opening one on first use.
    pub fn resolve(&self, fp: &Fingerprint) -> Result<Resolution, RouterError> {
        let pattern = match self.table.lookup(fp) {
            LookupResult::NoMatch | LookupResult::Drop => return Ok(Resolution::Miss),
            LookupResult::Pattern(p) => p,
        };
        let filename = format_pattern(&pattern, fp);

        let mut files = self.files.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = files.get(&filename) {
            return Ok(Resolution::Writer(Arc::clone(existing)));
        }
        let linktype = self
            .linktype
            .get()
            .ok_or_else(|| RouterError::Config("no linktype negotiated yet".into()))?;
        let dump = Arc::new(DumpFile::open(&filename, linktype)?);
        files.insert(filename, Arc::clone(&dump));
        Ok(Resolution::Writer(dump))
    }

    /// Flush and drop every open writer. Each `Savefile` is closed when its
    /// last `Arc` is dropped; this just releases the registry's references.
    pub fn close_all(&self) {
        let mut files = self.files.lock().unwrap_or_else(|p| p.into_inner());
        for (_, file) in files.drain() {
            drop(file);
        }
    }

    pub fn open_filenames(&self) -> Vec<String> {
        let files = self.files.lock().unwrap_or_else(|p| p.into_inner());
        files.keys().cloned().collect()
    }
}
