//! Static host identification
//!
//! OS, architecture and processor facts captured once per detection run.

use std::fmt;

use serde::{Deserialize, Serialize};
use sysinfo::{CpuRefreshKind, RefreshKind, System};

/// Static OS/architecture facts about the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemIdentity {
    /// Operating system name (e.g. "Linux")
    pub os: String,
    /// CPU architecture (e.g. "x86_64")
    pub arch: String,
    /// Raw processor model string as reported by the platform
    pub processor: String,
    /// Logical CPU count
    pub cpu_count: usize,
}

impl SystemIdentity {
    /// Build an identity from explicit values
    pub fn new(
        os: impl Into<String>,
        arch: impl Into<String>,
        processor: impl Into<String>,
        cpu_count: usize,
    ) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            processor: processor.into(),
            cpu_count,
        }
    }

    /// Capture the identity of the running host
    pub fn capture() -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::everything()),
        );

        let processor = sys
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .unwrap_or_default();

        let os = System::name().unwrap_or_else(|| std::env::consts::OS.to_string());

        Self {
            os,
            arch: std::env::consts::ARCH.to_string(),
            processor,
            cpu_count: sys.cpus().len().max(1),
        }
    }

    /// Lowercased processor string, used by pattern-based probes
    pub fn processor_lower(&self) -> String {
        self.processor.to_lowercase()
    }
}

impl fmt::Display for SystemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.os, self.arch, self.processor)
    }
}
