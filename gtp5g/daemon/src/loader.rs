//! eBPF program loader
//!
//! Handles loading the eBPF object and attaching the gtp5g kprobes.

use crate::types::ProducerStats;
use anyhow::{Context, Result};
use aya::{
    maps::{MapData, PerCpuArray, RingBuf},
    programs::{kprobe::KProbeLinkId, KProbe},
    Bpf,
};
use gtp5g_common::{constants::*, CallSite};
use log::{info, warn};
use std::path::PathBuf;

/// eBPF program loader and manager
pub struct ProbeLoader {
    ebpf: Bpf,
    links: Vec<(CallSite, KProbeLinkId)>,
}

impl ProbeLoader {
    /// Load eBPF program from file or embedded bytecode
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to eBPF object file. If None, uses embedded bytecode.
    ///
    /// A kernel that rejects the object (for example because the GPL-only
    /// helpers are refused) fails here.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        info!("Loading eBPF program...");

        let ebpf = if let Some(obj_path) = path {
            info!("Loading eBPF object from: {:?}", obj_path);
            let data = std::fs::read(&obj_path)
                .with_context(|| format!("Failed to read eBPF object file: {:?}", obj_path))?;
            Bpf::load(&data).context("Failed to load eBPF program")?
        } else {
            #[cfg(feature = "embedded")]
            {
                info!("Loading embedded eBPF program...");
                let data = include_bytes!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/../../target/bpfel-unknown-none/release/gtp5g-probe"
                ));
                Bpf::load(data).context("Failed to load embedded eBPF program")?
            }
            #[cfg(not(feature = "embedded"))]
            {
                anyhow::bail!(
                    "No eBPF object file provided. Use --ebpf-object or compile with 'embedded' feature"
                );
            }
        };

        info!("eBPF program loaded successfully");

        Ok(Self {
            ebpf,
            links: Vec::new(),
        })
    }

    /// Attach both capture handlers to the gtp5g driver
    ///
    /// Attaches to:
    /// - gtp5g_handle_skb_ipv4
    /// - gtp5g_dev_xmit
    ///
    /// Any failure is fatal: a missing symbol usually means the gtp5g module
    /// is not loaded or was renamed.
    pub fn attach_kprobes(&mut self) -> Result<()> {
        info!("Attaching kprobes to gtp5g...");

        for call_site in CallSite::ALL {
            self.attach_call_site(call_site)?;
        }

        info!("All kprobes attached successfully");

        Ok(())
    }

    fn attach_call_site(&mut self, call_site: CallSite) -> Result<()> {
        let name = call_site.symbol();

        let program: &mut KProbe = self
            .ebpf
            .program_mut(name)
            .with_context(|| format!("{} program not found in eBPF object", name))?
            .try_into()
            .with_context(|| format!("Failed to get {} as KProbe", name))?;
        program
            .load()
            .with_context(|| format!("Failed to load {}", name))?;
        let link = program.attach(name, 0).with_context(|| {
            format!(
                "Failed to attach {} kprobe (is the gtp5g module loaded?)",
                name
            )
        })?;
        info!("  ✓ Attached to {} (call site {})", name, call_site.as_raw());
        self.links.push((call_site, link));

        Ok(())
    }

    /// Take the EVENTS ring buffer for reading
    pub fn ring_buffer(&mut self) -> Result<RingBuf<MapData>> {
        let map = self
            .ebpf
            .take_map(EVENTS_MAP)
            .with_context(|| format!("{} map not found in eBPF object", EVENTS_MAP))?;

        RingBuf::try_from(map)
            .with_context(|| format!("Failed to create RingBuf from {} map", EVENTS_MAP))
    }

    /// Take the per-CPU STATS map for reading
    pub fn stats_reader(&mut self) -> Result<StatsReader> {
        let map = self
            .ebpf
            .take_map(STATS_MAP)
            .with_context(|| format!("{} map not found in eBPF object", STATS_MAP))?;

        let stats = PerCpuArray::try_from(map)
            .with_context(|| format!("Failed to create PerCpuArray from {} map", STATS_MAP))?;

        Ok(StatsReader { stats })
    }

    /// Detach every attached kprobe
    ///
    /// After this no handler runs, so the counters and the ring buffer stop
    /// changing. Taken maps stay readable.
    pub fn detach_kprobes(&mut self) -> Result<()> {
        for (call_site, link) in self.links.drain(..) {
            let name = call_site.symbol();
            let program: &mut KProbe = self
                .ebpf
                .program_mut(name)
                .with_context(|| format!("{} program not found in eBPF object", name))?
                .try_into()
                .with_context(|| format!("Failed to get {} as KProbe", name))?;
            if let Err(e) = program.detach(link) {
                warn!("Failed to detach {}: {}", name, e);
            }
        }

        info!("Kprobes detached");

        Ok(())
    }
}

/// Reads the producer counters kept by the kprobes
pub struct StatsReader {
    stats: PerCpuArray<MapData, u64>,
}

impl StatsReader {
    /// Sum every CPU's counters
    pub fn read(&self) -> Result<ProducerStats> {
        Ok(ProducerStats {
            ingress_hits: self.counter(STAT_INGRESS_HITS)?,
            egress_hits: self.counter(STAT_EGRESS_HITS)?,
            dropped_events: self.counter(STAT_DROPPED_EVENTS)?,
        })
    }

    fn counter(&self, stat_id: u32) -> Result<u64> {
        let values = self
            .stats
            .get(&stat_id, 0)
            .with_context(|| format!("Failed to read stat {} from {}", stat_id, STATS_MAP))?;

        Ok(values.iter().sum())
    }
}
