//! Helper functions for integration tests

#![allow(dead_code)]

use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::broadcast;
use watchpost::{
    actors::{
        incident::IncidentHandle,
        messages::{CheckEvent, IncidentEvent, StatEvent},
        storage::{StorageHandle, StorageInputs},
    },
    config::{ProbeConfig, ResolvedBatchConfig, ResolvedCheckConfig},
    incidents::IncidentEngine,
    probes::{ProbeResult, ProbeStatus},
    storage::StorageBackend,
    wire::{
        CpuInfo, CpuLoad, Metric, SchedulerType, Timestamp, TransactionInfo, TransactionMeta,
        TransactionStatus, TransactionType,
    },
};

/// Incident and storage actors wired the way the hub wires them
pub struct Pipeline {
    pub check_tx: broadcast::Sender<CheckEvent>,
    pub stat_tx: broadcast::Sender<StatEvent>,
    pub incident_tx: broadcast::Sender<IncidentEvent>,
    pub storage: StorageHandle,
    pub incidents: IncidentHandle,
}

impl Pipeline {
    pub fn spawn(backend: Arc<dyn StorageBackend>, batch_size: usize) -> Self {
        let (check_tx, _) = broadcast::channel(256);
        let (stat_tx, _) = broadcast::channel(256);
        let (incident_tx, _) = broadcast::channel(256);

        let storage = StorageHandle::spawn(
            backend,
            &ResolvedBatchConfig {
                size: batch_size,
                flush_interval: Duration::from_secs(3600),
            },
            None,
            StorageInputs {
                check_rx: check_tx.subscribe(),
                stat_rx: stat_tx.subscribe(),
                incident_rx: incident_tx.subscribe(),
            },
        );
        let incidents = IncidentHandle::spawn(
            Arc::new(IncidentEngine::new()),
            check_tx.subscribe(),
            incident_tx.clone(),
        );

        Self {
            check_tx,
            stat_tx,
            incident_tx,
            storage,
            incidents,
        }
    }

    pub async fn shutdown(self) {
        self.incidents.shutdown().await;
        self.storage.shutdown().await;
    }
}

/// Poll `condition` until it holds, failing the test after about two seconds
pub async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).unwrap()
}

pub fn probe_result(status: ProbeStatus, seconds: i64, elapsed_ms: u64) -> ProbeResult {
    ProbeResult {
        id: format!("result-{seconds}"),
        kind: SchedulerType::Http,
        status,
        description: match status {
            ProbeStatus::Ok => String::new(),
            ProbeStatus::Error => "WRONG_STATUS_CODE".to_string(),
        },
        location: "https://svc.test/health".to_string(),
        port: 443,
        timestamp: at(seconds),
        elapsed: Duration::from_millis(elapsed_ms),
    }
}

pub fn http_check(id: &str, url: &str) -> ResolvedCheckConfig {
    ResolvedCheckConfig {
        id: id.to_string(),
        rule: format!("{id}-rule"),
        interval: Duration::from_secs(3600),
        timeout: Duration::from_secs(2),
        probe: ProbeConfig::Http {
            url: url.to_string(),
            method: "GET".to_string(),
            headers: Default::default(),
            expected_status: 200,
        },
    }
}

pub fn metric(agent: &str, seconds: i64) -> Metric {
    Metric {
        agent_id: agent.to_string(),
        agent_name: format!("{agent}-host"),
        cpu_info: Some(CpuInfo {
            cpus: vec![CpuLoad { load: 25.0 }, CpuLoad { load: 75.0 }],
        }),
        time: Some(Timestamp { seconds, nanos: 0 }),
        ..Default::default()
    }
}

pub fn stat_event(agent: &str, seconds: i64) -> StatEvent {
    StatEvent {
        agent_id: agent.to_string(),
        metric: metric(agent, seconds),
        received_at: Utc::now(),
    }
}

/// A transaction in application `app` running from `start` for `duration` nanoseconds
pub fn transaction(
    id: &str,
    parent: &str,
    name: &str,
    status: TransactionStatus,
    start: i64,
    duration: i64,
) -> TransactionInfo {
    let ts = |nanos: i64| Timestamp {
        seconds: nanos.div_euclid(1_000_000_000),
        nanos: nanos.rem_euclid(1_000_000_000) as i32,
    };
    TransactionInfo {
        id: id.to_string(),
        application_id: "app".to_string(),
        parent_id: parent.to_string(),
        meta: Some(TransactionMeta {
            host: "api.test".to_string(),
            path: format!("/{name}"),
            method: "GET".to_string(),
        }),
        name: name.to_string(),
        start_time: Some(ts(start)),
        end_time: Some(ts(start + duration)),
        status: status.code(),
        transaction_type: TransactionType::Fetch.code(),
        error: None,
    }
}
