//! Report exporters
//!
//! Provides different exporters for capture reports (JSON, Prometheus)

use crate::types::{CallSite, CaptureReport};
use anyhow::{bail, Context, Result};
use std::{fs::File, io::Write, path::PathBuf, str::FromStr};

/// Trait for report exporters
pub trait MetricsExporter {
    /// Export a report
    ///
    /// # Arguments
    ///
    /// * `report` - Aggregated capture report to export
    fn export(&self, report: &CaptureReport) -> Result<()>;
}

/// Export format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterType {
    /// JSON format
    Json,
    /// Prometheus format
    Prometheus,
}

impl ExporterType {
    /// Build the exporter writing to `output_path`
    pub fn build(self, output_path: PathBuf) -> Box<dyn MetricsExporter> {
        match self {
            ExporterType::Json => Box::new(JsonExporter::new(output_path, true)),
            ExporterType::Prometheus => Box::new(PrometheusExporter::new(output_path)),
        }
    }
}

impl FromStr for ExporterType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExporterType::Json),
            "prometheus" | "prom" => Ok(ExporterType::Prometheus),
            other => bail!("Unknown export format: {} (expected json or prometheus)", other),
        }
    }
}

fn write_output(output_path: &PathBuf, data: &str) -> Result<()> {
    let mut file = File::create(output_path)
        .with_context(|| format!("Failed to create output file: {:?}", output_path))?;

    file.write_all(data.as_bytes())
        .with_context(|| format!("Failed to write to output file: {:?}", output_path))?;

    Ok(())
}

/// JSON exporter
pub struct JsonExporter {
    output_path: PathBuf,
    pretty: bool,
}

impl JsonExporter {
    /// Create a new JSON exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    /// * `pretty` - Enable pretty-printing
    pub fn new(output_path: PathBuf, pretty: bool) -> Self {
        Self {
            output_path,
            pretty,
        }
    }
}

impl MetricsExporter for JsonExporter {
    fn export(&self, report: &CaptureReport) -> Result<()> {
        let json = if self.pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };

        write_output(&self.output_path, &json)
    }
}

/// Prometheus exporter
pub struct PrometheusExporter {
    output_path: PathBuf,
}

impl PrometheusExporter {
    /// Create a new Prometheus exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    /// Convert a report to Prometheus text format
    fn to_prometheus_format(report: &CaptureReport) -> String {
        let mut output = String::new();

        output.push_str("# HELP gtp5g_probe_info Event record layout of the capture\n");
        output.push_str("# TYPE gtp5g_probe_info gauge\n");
        output.push_str(&format!("gtp5g_probe_info{{wire_version=\"{}\"}} 1\n", report.wire_version));
        output.push('\n');

        // Total events
        output.push_str("# HELP gtp5g_probe_events_total Events received from the ring buffer\n");
        output.push_str("# TYPE gtp5g_probe_events_total counter\n");
        output.push_str(&format!("gtp5g_probe_events_total {}\n", report.total_events));
        output.push('\n');

        output.push_str("# HELP gtp5g_probe_malformed_records_total Records that failed to decode\n");
        output.push_str("# TYPE gtp5g_probe_malformed_records_total counter\n");
        output.push_str(&format!("gtp5g_probe_malformed_records_total {}\n", report.malformed_records));
        output.push('\n');

        // Duration
        output.push_str("# HELP gtp5g_probe_duration_seconds Duration of collection period\n");
        output.push_str("# TYPE gtp5g_probe_duration_seconds gauge\n");
        output.push_str(&format!("gtp5g_probe_duration_seconds {}\n", report.duration_seconds));
        output.push('\n');

        // Call sites
        output.push_str("# HELP gtp5g_probe_events_by_function Events broken down by instrumented function\n");
        output.push_str("# TYPE gtp5g_probe_events_by_function counter\n");
        for call_site in CallSite::ALL {
            output.push_str(&format!(
                "gtp5g_probe_events_by_function{{function=\"{}\"}} {}\n",
                call_site.symbol(),
                report.call_sites.get(call_site)
            ));
        }
        output.push('\n');

        // CPUs
        output.push_str("# HELP gtp5g_probe_events_by_cpu Events broken down by CPU\n");
        output.push_str("# TYPE gtp5g_probe_events_by_cpu counter\n");
        for (cpu, stats) in &report.cpus {
            output.push_str(&format!("gtp5g_probe_events_by_cpu{{cpu=\"{}\"}} {}\n", cpu, stats.events));
        }
        output.push('\n');

        // Processes
        output.push_str("# HELP gtp5g_probe_events_by_process Events broken down by process\n");
        output.push_str("# TYPE gtp5g_probe_events_by_process counter\n");
        for (tgid, stats) in &report.processes {
            output.push_str(&format!(
                "gtp5g_probe_events_by_process{{tgid=\"{}\",comm=\"{}\"}} {}\n",
                tgid,
                escape_label(&stats.comm),
                stats.events
            ));
        }
        output.push('\n');

        if let Some(producer) = report.producer {
            output.push_str("# HELP gtp5g_probe_handler_invocations_total Kprobe handler invocations\n");
            output.push_str("# TYPE gtp5g_probe_handler_invocations_total counter\n");
            output.push_str(&format!(
                "gtp5g_probe_handler_invocations_total{{function=\"{}\"}} {}\n",
                CallSite::Ingress.symbol(),
                producer.ingress_hits
            ));
            output.push_str(&format!(
                "gtp5g_probe_handler_invocations_total{{function=\"{}\"}} {}\n",
                CallSite::Egress.symbol(),
                producer.egress_hits
            ));
            output.push('\n');

            output.push_str("# HELP gtp5g_probe_dropped_events_total Events dropped because the ring buffer was full\n");
            output.push_str("# TYPE gtp5g_probe_dropped_events_total counter\n");
            output.push_str(&format!("gtp5g_probe_dropped_events_total {}\n", producer.dropped_events));
            output.push('\n');
        }

        output
    }
}

/// Command names are task-controlled
fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

impl MetricsExporter for PrometheusExporter {
    fn export(&self, report: &CaptureReport) -> Result<()> {
        write_output(&self.output_path, &Self::to_prometheus_format(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use std::collections::BTreeMap;

    fn create_test_report() -> CaptureReport {
        let mut cpus = BTreeMap::new();
        cpus.insert(
            3,
            CpuStats {
                events: 1000,
                first_ts_ns: 1,
                last_ts_ns: 2,
                out_of_order: 0,
            },
        );
        let mut processes = BTreeMap::new();
        processes.insert(
            4242,
            ProcessStats {
                comm: "nr-gnb".to_string(),
                threads: 2,
                events: 1000,
            },
        );

        CaptureReport {
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            duration_seconds: 60,
            wire_version: 1,
            total_events: 1000,
            malformed_records: 0,
            call_sites: CallSiteBreakdown {
                gtp5g_handle_skb_ipv4: 600,
                gtp5g_dev_xmit: 400,
            },
            cpus,
            processes,
            producer: Some(ProducerStats {
                ingress_hits: 610,
                egress_hits: 400,
                dropped_events: 10,
            }),
            estimated_loss: Some(10),
        }
    }

    #[test]
    fn test_prometheus_format() {
        let report = create_test_report();
        let prometheus = PrometheusExporter::to_prometheus_format(&report);

        assert!(prometheus.contains("gtp5g_probe_info{wire_version=\"1\"} 1"));
        assert!(prometheus.contains("gtp5g_probe_events_total 1000"));
        assert!(prometheus.contains("gtp5g_probe_duration_seconds 60"));
        assert!(prometheus.contains("gtp5g_probe_events_by_function{function=\"gtp5g_handle_skb_ipv4\"} 600"));
        assert!(prometheus.contains("gtp5g_probe_events_by_cpu{cpu=\"3\"} 1000"));
        assert!(prometheus.contains("tgid=\"4242\",comm=\"nr-gnb\""));
        assert!(prometheus.contains("gtp5g_probe_dropped_events_total 10"));
    }

    #[test]
    fn test_prometheus_without_producer_stats() {
        let mut report = create_test_report();
        report.producer = None;
        let prometheus = PrometheusExporter::to_prometheus_format(&report);

        assert!(!prometheus.contains("gtp5g_probe_dropped_events_total"));
    }

    #[test]
    fn test_escape_label() {
        assert_eq!(escape_label("a\"b\\c"), "a\\\"b\\\\c");
    }

    #[test]
    fn test_exporter_type_parsing() {
        assert_eq!("json".parse::<ExporterType>().unwrap(), ExporterType::Json);
        assert_eq!("Prometheus".parse::<ExporterType>().unwrap(), ExporterType::Prometheus);
        assert!("influx".parse::<ExporterType>().is_err());
    }

    #[test]
    fn test_json_export_writes_file() {
        let path = std::env::temp_dir().join(format!("gtp5g-probe-test-{}.json", std::process::id()));
        let report = create_test_report();

        ExporterType::Json.build(path.clone()).export(&report).unwrap();

        let written: CaptureReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(written.total_events, 1000);
        assert_eq!(written.wire_version, 1);
        assert_eq!(written.call_sites, report.call_sites);
        assert_eq!(written.processes[&4242].comm, "nr-gnb");
    }
}
