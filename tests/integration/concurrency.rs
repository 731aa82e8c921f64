//! Concurrent producers against the incident engine, stat batch and storage actor

use std::{sync::Arc, time::Duration};

use watchpost::{
    actors::scheduler::SchedulerHandle,
    convert::to_stat_row,
    incidents::{IncidentEngine, RuleHealth, Transition},
    storage::{MemoryBackend, StatBatch, StorageBackend},
    wire::GetAgentInformationRequest,
};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{Pipeline, at, eventually, http_check, metric, stat_event};

#[tokio::test]
async fn test_many_rules_in_parallel() {
    let engine = Arc::new(IncidentEngine::new());
    let mut tasks = Vec::new();

    for rule in 0..20 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            let rule = format!("rule-{rule}");
            let mut transitions = Vec::new();
            for t in 0..10 {
                let health = if t % 4 == 3 {
                    RuleHealth::Healthy
                } else {
                    RuleHealth::Failing
                };
                transitions.push(engine.observe(&rule, health, at(t)).await);
            }
            transitions
        }));
    }

    for task in tasks {
        let transitions = task.await.unwrap();
        let opened = transitions
            .iter()
            .filter(|t| matches!(t, Transition::Opened(_)))
            .count();
        let closed = transitions
            .iter()
            .filter(|t| matches!(t, Transition::Closed(_)))
            .count();
        // Failing 0..=2, healthy 3, failing 4..=6, healthy 7, failing 8..=9
        assert_eq!(opened, 3);
        assert_eq!(closed, 2);
    }

    for rule in 0..20 {
        assert!(engine.open_incident(&format!("rule-{rule}")).await.is_some());
    }
}

#[tokio::test]
async fn test_stat_batch_from_many_producers_is_one_write() {
    let batch = Arc::new(StatBatch::new());
    let mut tasks = Vec::new();
    for agent in 0..8 {
        let batch = batch.clone();
        tasks.push(tokio::spawn(async move {
            for t in 0..25 {
                let row = to_stat_row(&metric(&format!("agent-{agent}"), t)).unwrap();
                batch.push(row);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(batch.len(), 200);

    let backend = MemoryBackend::new();
    backend.insert_stats(batch.take()).await.unwrap();
    assert!(batch.is_empty());

    let agents = backend.list_agents().await.unwrap();
    assert_eq!(agents.len(), 8);
}

#[tokio::test]
async fn test_concurrent_stat_events_are_all_persisted() {
    let backend = Arc::new(MemoryBackend::new());
    let pipeline = Pipeline::spawn(backend.clone(), 16);

    let mut tasks = Vec::new();
    for agent in 0..4 {
        let stat_tx = pipeline.stat_tx.clone();
        tasks.push(tokio::spawn(async move {
            for t in 0..20 {
                stat_tx.send(stat_event(&format!("agent-{agent}"), t)).unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let storage = pipeline.storage.clone();
    eventually("all stats received", || {
        let storage = storage.clone();
        async move {
            storage
                .get_stats()
                .await
                .is_some_and(|s| s.stats_written + s.pending_stats as u64 == 80)
        }
    })
    .await;
    pipeline.storage.flush().await.unwrap();

    let response = pipeline
        .storage
        .service()
        .get_agent_information(&GetAgentInformationRequest {
            agent_id: "agent-2".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(response.count, 20);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_parallel_schedulers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(50)))
        .mount(&server)
        .await;

    let backend = Arc::new(MemoryBackend::new());
    let pipeline = Pipeline::spawn(backend.clone(), 100);

    let mut schedulers = Vec::new();
    for i in 0..10 {
        let check = http_check(&format!("check-{i}"), &server.uri());
        schedulers.push(SchedulerHandle::spawn(&check, pipeline.check_tx.clone()).unwrap());
    }

    let storage = pipeline.storage.clone();
    eventually("one snapshot per scheduler", || {
        let storage = storage.clone();
        async move {
            storage
                .get_stats()
                .await
                .is_some_and(|s| s.snapshots_written == 10)
        }
    })
    .await;

    for scheduler in schedulers {
        scheduler.shutdown().await;
    }
    let stats = pipeline.storage.get_stats().await.unwrap();
    assert_eq!(stats.incidents_written, 0);
    pipeline.shutdown().await;
}
