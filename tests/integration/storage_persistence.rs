//! Integration tests for SQLite persistence
//!
//! These tests verify that:
//! - Stats flow through the storage actor into SQLite in batches
//! - Snapshots and incidents survive reopening the database
//! - Open incidents can be restored into a fresh engine
//! - Retention cleanup removes old data but keeps open incidents

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::tempdir;
use watchpost::{
    convert::snapshot_from_probe,
    incidents::{IncidentEngine, RuleHealth, Transition},
    probes::ProbeStatus,
    storage::{StorageBackend, StorageService, sqlite::SqliteBackend},
    wire::{
        GetAgentInformationRequest, GetSchedulerInformationRequest, GetSchedulerUptimeRequest,
        IncidentStatus, Pagination, SortDirection, TimeFilter, Timestamp,
    },
};

use crate::helpers::{Pipeline, at, eventually, probe_result, stat_event};

#[tokio::test]
async fn test_stats_pipeline_into_sqlite() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("stats.db");

    let backend = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let pipeline = Pipeline::spawn(backend.clone(), 5);

    for t in 0..12 {
        pipeline.stat_tx.send(stat_event("a1", 1_000 + t)).unwrap();
    }

    let storage = pipeline.storage.clone();
    eventually("two size-triggered flushes", || {
        let storage = storage.clone();
        async move { storage.get_stats().await.is_some_and(|s| s.stats_written == 10) }
    })
    .await;
    assert_eq!(pipeline.storage.flush().await.unwrap(), 2);

    let response = pipeline
        .storage
        .service()
        .get_agent_information(&GetAgentInformationRequest {
            agent_id: "a1".to_string(),
            time_range: None,
            pagination: Some(Pagination::new(1, 5)),
        })
        .await
        .unwrap();
    assert_eq!(response.count, 12);
    assert_eq!(response.stats.len(), 5);
    // Newest first
    assert_eq!(response.stats[0].time, Some(Timestamp { seconds: 1_011, nanos: 0 }));
    assert_eq!(response.stats[0].cpu_info.as_ref().unwrap().cpus.len(), 2);
    assert!(response.stats[0].memory_info.is_none());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("reopen.db");

    let engine = IncidentEngine::new();
    let opened = engine
        .observe("db-rule", RuleHealth::Failing, at(500))
        .await
        .into_incident()
        .unwrap();

    {
        let backend = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
        let service = StorageService::new(backend.clone());

        for (i, status) in [ProbeStatus::Ok, ProbeStatus::Ok, ProbeStatus::Error]
            .into_iter()
            .enumerate()
        {
            let result = probe_result(status, 100 + i as i64, 20);
            service
                .save_response(&snapshot_from_probe("db", &result))
                .await
                .unwrap();
        }
        service.save_incident(&opened).await.unwrap();
        backend.close().await.unwrap();
    }

    let backend = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let service = StorageService::new(backend.clone());

    let snapshots = service
        .get_scheduler_information(&GetSchedulerInformationRequest {
            scheduler_id: "db".to_string(),
            direction: SortDirection::Asc.code(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(snapshots.count, 3);
    let starts: Vec<i64> = snapshots
        .snapshots
        .iter()
        .map(|s| s.meta.as_ref().unwrap().start_time.unwrap().seconds)
        .collect();
    assert_eq!(starts, vec![100, 101, 102]);
    let value = snapshots.snapshots[0].meta.as_ref().unwrap().value.clone().unwrap();
    assert_eq!(value["port"], 443);

    let uptime = service
        .get_scheduler_uptime(&GetSchedulerUptimeRequest {
            scheduler_id: "db".to_string(),
            time_range: Some(TimeFilter::default()),
        })
        .await
        .unwrap();
    assert!((uptime.uptime - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(uptime.latency, 20_000_000.0);

    // A fresh engine picks up where the previous run stopped.
    let restored = IncidentEngine::new();
    for incident in service.get_active_incidents().await.unwrap() {
        assert!(restored.restore(incident).await);
    }
    let transition = restored.observe("db-rule", RuleHealth::Healthy, at(600)).await;
    let closed = match transition {
        Transition::Closed(incident) => incident,
        other => panic!("expected a closed incident, got {other:?}"),
    };
    assert_eq!(closed.id, opened.id);
    service.save_incident(&closed).await.unwrap();

    let row = backend.get_incident(&opened.id).await.unwrap().unwrap();
    assert_eq!(row.status, IncidentStatus::Closed);
    assert_eq!(row.start_time, 500 * 1_000_000_000);
    assert_eq!(row.end_time, 600 * 1_000_000_000);
    assert!(service.get_active_incidents().await.unwrap().is_empty());

    backend.close().await.unwrap();
}

#[tokio::test]
async fn test_retention_cleanup() {
    let temp_dir = tempdir().unwrap();
    let backend = Arc::new(SqliteBackend::new(temp_dir.path().join("cleanup.db")).await.unwrap());
    let service = StorageService::new(backend.clone());

    for seconds in [10, 20, 3_000] {
        let result = probe_result(ProbeStatus::Ok, seconds, 1);
        service
            .save_response(&snapshot_from_probe("web", &result))
            .await
            .unwrap();
    }

    let engine = IncidentEngine::new();
    // Closed long ago
    engine.observe("old", RuleHealth::Failing, at(10)).await;
    let closed = engine
        .observe("old", RuleHealth::Healthy, at(20))
        .await
        .into_incident()
        .unwrap();
    service.save_incident(&closed).await.unwrap();
    // Opened long ago and still open
    let open = engine
        .observe("stuck", RuleHealth::Failing, at(10))
        .await
        .into_incident()
        .unwrap();
    service.save_incident(&open).await.unwrap();

    let report = backend.cleanup_before(1_000 * 1_000_000_000).await.unwrap();
    assert_eq!(report.snapshots, 2);
    assert_eq!(report.incidents, 1);

    assert!(backend.get_incident(&closed.id).await.unwrap().is_none());
    assert!(backend.get_incident(&open.id).await.unwrap().is_some());

    let remaining = service
        .get_scheduler_information(&GetSchedulerInformationRequest {
            scheduler_id: "web".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(remaining.count, 1);

    let health = backend.health_check().await.unwrap();
    assert!(health.healthy);
}

#[tokio::test]
async fn test_closed_backend_is_fatal() {
    let temp_dir = tempdir().unwrap();
    let backend = SqliteBackend::new(temp_dir.path().join("closed.db")).await.unwrap();
    backend.close().await.unwrap();

    let err = backend.insert_stats(vec![]).await.unwrap_err();
    assert!(err.is_fatal(), "{err}");
}
