//! Check results flowing through the incident and storage actors

use std::{sync::Arc, time::Duration};

use assert_matches::assert_matches;
use watchpost::{
    actors::{messages::CheckEvent, scheduler::SchedulerHandle},
    convert::snapshot_from_probe,
    incidents::Transition,
    probes::ProbeStatus,
    storage::{MemoryBackend, StorageBackend},
    wire::{
        GetIncidentsListRequest, GetSchedulerInformationRequest, GetSchedulerUptimeRequest,
        IncidentStatus, SchedulerCode,
    },
};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{Pipeline, eventually, http_check, probe_result};

fn check_event(rule: &str, status: ProbeStatus, seconds: i64) -> CheckEvent {
    let result = probe_result(status, seconds, 10);
    CheckEvent {
        check_id: "web".to_string(),
        rule: rule.to_string(),
        response: snapshot_from_probe("web", &result),
        result,
    }
}

#[tokio::test]
async fn test_outage_opens_and_recovery_closes_incident() {
    let backend = Arc::new(MemoryBackend::new());
    let pipeline = Pipeline::spawn(backend.clone(), 100);
    let mut incident_rx = pipeline.incident_tx.subscribe();

    pipeline.check_tx.send(check_event("web-rule", ProbeStatus::Ok, 100)).unwrap();
    pipeline.check_tx.send(check_event("web-rule", ProbeStatus::Error, 110)).unwrap();
    pipeline.check_tx.send(check_event("web-rule", ProbeStatus::Error, 120)).unwrap();
    pipeline.check_tx.send(check_event("web-rule", ProbeStatus::Ok, 130)).unwrap();

    let mut transitions = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(1), incident_rx.recv())
            .await
            .unwrap()
            .unwrap();
        transitions.push(event.transition);
    }
    assert_matches!(transitions[0], Transition::Opened(_));
    assert_matches!(transitions[1], Transition::Updated(_));
    let closed = assert_matches!(&transitions[2], Transition::Closed(i) => i.clone());
    assert_eq!(closed.histories.len(), 3);

    let storage = pipeline.storage.clone();
    eventually("snapshots and incident writes", || {
        let storage = storage.clone();
        async move {
            storage
                .get_stats()
                .await
                .is_some_and(|s| s.snapshots_written == 4 && s.incidents_written == 3)
        }
    })
    .await;

    let service = pipeline.storage.service().clone();
    assert!(
        service
            .get_active_incident_by_rule_id("web-rule")
            .await
            .unwrap()
            .is_none()
    );

    let stored = service.get_incident_by_id(&closed.id).await.unwrap().unwrap();
    assert_eq!(stored.status, IncidentStatus::Closed.code());
    assert_eq!(stored.histories, closed.histories);

    let row = backend.get_incident(&closed.id).await.unwrap().unwrap();
    assert_eq!(row.start_time, 110 * 1_000_000_000);
    assert_eq!(row.end_time, 130 * 1_000_000_000);

    let closed_list = service
        .get_incidents_list(&GetIncidentsListRequest {
            rule_id: Some("web-rule".to_string()),
            status: IncidentStatus::Closed.code(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(closed_list.count, 1);

    let uptime = service
        .get_scheduler_uptime(&GetSchedulerUptimeRequest {
            scheduler_id: "web".to_string(),
            time_range: None,
        })
        .await
        .unwrap();
    assert_eq!(uptime.uptime, 0.5);
    assert_eq!(uptime.latency, 10_000_000.0);

    let failures = service
        .get_scheduler_information(&GetSchedulerInformationRequest {
            scheduler_id: "web".to_string(),
            code: SchedulerCode::Error.code(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failures.count, 2);
    assert!(failures.snapshots.iter().all(|s| s.error.is_some()));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_scheduler_drives_pipeline() {
    let server = MockServer::start().await;
    // The first request fails, everything after succeeds.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let backend = Arc::new(MemoryBackend::new());
    let pipeline = Pipeline::spawn(backend.clone(), 100);
    let mut check_rx = pipeline.check_tx.subscribe();

    let scheduler =
        SchedulerHandle::spawn(&http_check("web", &server.uri()), pipeline.check_tx.clone())
            .unwrap();

    // First tick runs immediately and hits the failing mock.
    let first = tokio::time::timeout(Duration::from_secs(2), check_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(!first.result.is_ok());

    let engine = pipeline.incidents.engine().clone();
    eventually("incident opened", || {
        let engine = engine.clone();
        async move { engine.open_incident("web-rule").await.is_some() }
    })
    .await;

    let second = scheduler.check_now().await.unwrap();
    assert!(second.is_ok());

    eventually("incident closed", || {
        let engine = engine.clone();
        async move { engine.open_incident("web-rule").await.is_none() }
    })
    .await;

    let storage = pipeline.storage.clone();
    eventually("closing incident persisted", || {
        let storage = storage.clone();
        async move {
            storage
                .get_stats()
                .await
                .is_some_and(|s| s.incidents_written == 2 && s.snapshots_written == 2)
        }
    })
    .await;

    let list = pipeline
        .storage
        .service()
        .get_incidents_list(&GetIncidentsListRequest::default())
        .await
        .unwrap();
    assert_eq!(list.count, 1);
    assert_eq!(list.incidents[0].status, IncidentStatus::Closed.code());

    scheduler.shutdown().await;
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_restored_incident_is_closed_on_recovery() {
    let backend = Arc::new(MemoryBackend::new());
    let pipeline = Pipeline::spawn(backend.clone(), 100);

    // An incident left open by a previous run
    let previous = watchpost::incidents::IncidentEngine::new();
    let opened = previous
        .observe_result("web-rule", &probe_result(ProbeStatus::Error, 50, 5))
        .await
        .into_incident()
        .unwrap();
    pipeline.storage.service().save_incident(&opened).await.unwrap();

    for incident in pipeline.storage.service().get_active_incidents().await.unwrap() {
        assert!(pipeline.incidents.engine().restore(incident).await);
    }

    let transition = pipeline
        .incidents
        .observe("web-rule", probe_result(ProbeStatus::Ok, 60, 5))
        .await
        .unwrap();
    let closed = assert_matches!(transition, Transition::Closed(i) => i);
    assert_eq!(closed.id, opened.id);

    let service = pipeline.storage.service().clone();
    let id = closed.id.clone();
    eventually("restored incident closed in storage", || {
        let service = service.clone();
        let id = id.clone();
        async move {
            service
                .get_incident_by_id(&id)
                .await
                .ok()
                .flatten()
                .is_some_and(|i| i.status == IncidentStatus::Closed.code())
        }
    })
    .await;

    pipeline.shutdown().await;
}
