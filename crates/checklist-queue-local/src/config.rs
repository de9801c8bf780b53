use std::path::PathBuf;
use std::time::Duration;

use checklist_queue_core::{DrainPolicy, QueueOptions};
use clap::{Parser, Subcommand};

/// Configuration for the checklist-queue client.
#[derive(Parser, Debug, Clone)]
#[command(name = "checklist-queue")]
#[command(about = "Offline write queue for route checklist notas and paletes")]
pub struct Config {
    /// Base URL of the checklist API
    #[arg(long, default_value = "http://127.0.0.1:3000", env = "CHECKLIST_API_BASE")]
    pub api_base: String,

    /// Directory holding the pending queues
    #[arg(long, env = "CHECKLIST_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Timeout for a single remote call, in seconds
    #[arg(long, default_value = "12", env = "CHECKLIST_SUBMIT_TIMEOUT_SECS")]
    pub submit_timeout_secs: u64,

    /// Interval between reachability probes, in seconds
    #[arg(long, default_value = "5", env = "CHECKLIST_PROBE_INTERVAL_SECS")]
    pub probe_interval_secs: u64,

    /// Timeout for a single reachability probe, in milliseconds
    #[arg(long, default_value = "2000", env = "CHECKLIST_PROBE_TIMEOUT_MS")]
    pub probe_timeout_ms: u64,

    /// host:port probed for reachability (defaults to the API host)
    #[arg(long, env = "CHECKLIST_PROBE_TARGET")]
    pub probe_target: Option<String>,

    /// What to do with records that fail during a sync
    #[arg(long, default_value = "clear-all", env = "CHECKLIST_DRAIN_POLICY")]
    pub drain_policy: DrainPolicyArg,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Queue one record (JSON) for a later sync
    Enqueue {
        kind: KindArg,
        /// Read the record from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Submit one record (JSON) now, or queue it when offline
    Capture {
        kind: KindArg,
        /// Read the record from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print the pending records of one kind
    Pending { kind: KindArg },
    /// Print pending counts
    Count,
    /// Print the sync status line
    Status,
    /// Probe once and sync pending records if online
    Sync,
    /// Watch connectivity and sync whenever the network comes back
    Run,
    /// Summarize a day's records on the server plus what is still pending
    Summary {
        /// Day as YYYY-MM-DD (defaults to today)
        #[arg(long)]
        day: Option<chrono::NaiveDate>,
        /// Restrict to one route
        #[arg(long)]
        rota: Option<i64>,
    },
}

impl Config {
    /// Get the effective queue directory.
    pub fn effective_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("checklist-queue")
        })
    }

    /// Get the effective reachability probe target.
    pub fn effective_probe_target(&self) -> anyhow::Result<String> {
        if let Some(target) = &self.probe_target {
            return Ok(target.clone());
        }
        let url = reqwest::Url::parse(&self.api_base)?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("API base URL has no host: {}", self.api_base))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| anyhow::anyhow!("API base URL has no port: {}", self.api_base))?;
        Ok(format!("{}:{}", host, port))
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            drain_policy: self.drain_policy.into(),
            submit_timeout: self.submit_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DrainPolicyArg {
    ClearAll,
    RetainFailed,
}

impl From<DrainPolicyArg> for DrainPolicy {
    fn from(arg: DrainPolicyArg) -> Self {
        match arg {
            DrainPolicyArg::ClearAll => DrainPolicy::ClearAll,
            DrainPolicyArg::RetainFailed => DrainPolicy::RetainFailed,
        }
    }
}

impl std::fmt::Display for DrainPolicyArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrainPolicyArg::ClearAll => write!(f, "clear-all"),
            DrainPolicyArg::RetainFailed => write!(f, "retain-failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum KindArg {
    #[value(alias = "notas")]
    Nota,
    #[value(alias = "paletes")]
    Palete,
}

impl From<KindArg> for checklist_queue_core::RecordKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Nota => checklist_queue_core::RecordKind::Notas,
            KindArg::Palete => checklist_queue_core::RecordKind::Paletes,
        }
    }
}
