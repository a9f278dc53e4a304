//! Probe layer
//!
//! A [`ProbeMethod`] is one detection technique for one hardware class. A
//! [`DeviceProbe`] runs an ordered list of methods for its class and merges
//! their signals into a single capability record:
//!
//! - the first positive signal seeds the record (identity fields)
//! - later positive signals only fill fields that are still unset
//! - no positive signal at all yields the default "not available" record
//!
//! Methods never fail for absence. Environment errors are logged and count
//! as "no signal" for that method only.

pub mod cpu;
pub mod igpu;
mod mock;
pub mod npu;
pub mod nvidia;
mod tool;

pub use mock::ScriptedTools;
pub use tool::{SystemToolRunner, ToolOutput, ToolRunner};

use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::context::DetectionContext;
use crate::record::CapabilityRecord;

/// Errors a probe method may report
#[derive(Debug, Error)]
pub enum ProbeError {
    /// External tool is not installed
    #[error("Tool not found: {0}")]
    ToolMissing(String),

    /// External tool did not finish in time
    #[error("{tool} timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    /// Unexpected file content or tool output
    #[error("Malformed {what}: {detail}")]
    Malformed { what: String, detail: String },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl ProbeError {
    /// Create a malformed-input error
    pub fn malformed(what: impl Into<String>, detail: impl Into<String>) -> Self {
        ProbeError::Malformed {
            what: what.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error only means "the thing is not there"
    pub fn is_absence(&self) -> bool {
        match self {
            ProbeError::ToolMissing(_) => true,
            ProbeError::IoError(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// A single detection technique for one hardware class
#[async_trait]
pub trait ProbeMethod<R: CapabilityRecord>: Send + Sync {
    /// Short stable name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Enrichment methods only run once an earlier method found the device
    fn enrichment_only(&self) -> bool {
        false
    }

    /// Probe the host.
    ///
    /// `Ok(None)` means no signal; `Ok(Some(record))` is a positive signal
    /// carrying the fields this method could resolve.
    async fn probe(&self, ctx: &DetectionContext) -> Result<Option<R>, ProbeError>;
}

/// Ordered set of probe methods for one hardware class
pub struct DeviceProbe<R: CapabilityRecord> {
    methods: Vec<Box<dyn ProbeMethod<R>>>,
}

impl<R: CapabilityRecord> Default for DeviceProbe<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CapabilityRecord> DeviceProbe<R> {
    /// Create an empty probe
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
        }
    }

    /// Append a method (lower priority than those already added)
    pub fn with_method(mut self, method: impl ProbeMethod<R> + 'static) -> Self {
        self.methods.push(Box::new(method));
        self
    }

    /// Method names in priority order
    pub fn method_names(&self) -> Vec<&'static str> {
        self.methods.iter().map(|m| m.name()).collect()
    }

    /// Run every method and merge the results
    pub async fn run(&self, ctx: &DetectionContext) -> R {
        let class = R::CLASS;
        let mut merged: Option<R> = None;

        for method in &self.methods {
            if method.enrichment_only() && merged.is_none() {
                trace!(class = %class, method = method.name(), "Skipping enrichment, class absent");
                continue;
            }

            let start = Instant::now();
            let result = method.probe(ctx).await;
            ctx.metrics()
                .observe_probe(class, method.name(), start.elapsed());

            match result {
                Ok(Some(signal)) => {
                    if merged.is_none() && !signal.is_available() {
                        trace!(class = %class, method = method.name(), "Signal without availability ignored");
                        continue;
                    }
                    debug!(class = %class, method = method.name(), "Positive signal");
                    match merged.as_mut() {
                        Some(record) => record.fill_missing(signal),
                        None => merged = Some(signal),
                    }
                }
                Ok(None) => {
                    trace!(class = %class, method = method.name(), "No signal");
                }
                Err(e) if e.is_absence() => {
                    debug!(class = %class, method = method.name(), reason = %e, "No signal");
                }
                Err(e) => {
                    warn!(class = %class, method = method.name(), error = %e, "Probe method failed, treating as no signal");
                    ctx.metrics().record_probe_error(class, method.name());
                }
            }
        }

        let record = merged.unwrap_or_default();
        if record.is_available() {
            info!(class = %class, "{} detected", class.label());
        } else {
            debug!(class = %class, "{} not detected", class.label());
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SystemIdentity;
    use crate::context::ProbeSettings;
    use crate::record::{AmdNpuRecord, NpuTier};

    struct Fixed(&'static str, Result<Option<AmdNpuRecord>, &'static str>);

    #[async_trait]
    impl ProbeMethod<AmdNpuRecord> for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn probe(&self, _ctx: &DetectionContext) -> Result<Option<AmdNpuRecord>, ProbeError> {
            self.1.clone().map_err(|e| ProbeError::malformed("fixture", e))
        }
    }

    struct Enrich;

    #[async_trait]
    impl ProbeMethod<AmdNpuRecord> for Enrich {
        fn name(&self) -> &'static str {
            "enrich"
        }

        fn enrichment_only(&self) -> bool {
            true
        }

        async fn probe(&self, _ctx: &DetectionContext) -> Result<Option<AmdNpuRecord>, ProbeError> {
            Ok(Some(AmdNpuRecord::identified(NpuTier::Xdna2, 50)))
        }
    }

    fn ctx() -> DetectionContext {
        DetectionContext::new(
            SystemIdentity::new("Linux", "x86_64", "", 1),
            ProbeSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_first_signal_wins_identity() {
        let probe = DeviceProbe::new()
            .with_method(Fixed("a", Ok(Some(AmdNpuRecord::with_driver("xdna")))))
            .with_method(Fixed("b", Ok(Some(AmdNpuRecord::with_driver("npu")))))
            .with_method(Fixed("c", Ok(Some(AmdNpuRecord::identified(NpuTier::Xdna1, 16)))));

        let record = probe.run(&ctx()).await;
        assert!(record.available);
        assert_eq!(record.driver.as_deref(), Some("xdna"));
        assert_eq!(record.tops, Some(16));
    }

    #[tokio::test]
    async fn test_errors_are_contained() {
        let probe = DeviceProbe::new()
            .with_method(Fixed("broken", Err("garbage")))
            .with_method(Fixed("b", Ok(Some(AmdNpuRecord::with_driver("npu")))));

        let context = ctx();
        let record = probe.run(&context).await;
        assert_eq!(record.driver.as_deref(), Some("npu"));
        assert!(context.metrics().export().contains("hwdetect_probe_errors_total"));
    }

    #[tokio::test]
    async fn test_no_signal_yields_default() {
        let probe = DeviceProbe::new()
            .with_method(Fixed("a", Ok(None)))
            .with_method(Fixed("broken", Err("garbage")))
            .with_method(Enrich);

        let record = probe.run(&ctx()).await;
        assert!(record.is_unset());
    }

    #[tokio::test]
    async fn test_enrichment_after_signal() {
        let probe = DeviceProbe::new()
            .with_method(Fixed("a", Ok(Some(AmdNpuRecord::with_driver("xdna")))))
            .with_method(Enrich);

        let record = probe.run(&ctx()).await;
        assert_eq!(record.tier, Some(NpuTier::Xdna2));
        assert_eq!(probe.method_names(), vec!["a", "enrich"]);
    }

    #[test]
    fn test_absence_classification() {
        assert!(ProbeError::ToolMissing("vainfo".into()).is_absence());
        assert!(ProbeError::IoError(std::io::Error::from(std::io::ErrorKind::NotFound)).is_absence());
        assert!(!ProbeError::malformed("cpuinfo", "binary data").is_absence());
        assert!(!ProbeError::Timeout {
            tool: "nvidia-smi".into(),
            timeout: Duration::from_secs(5)
        }
        .is_absence());
    }
}
