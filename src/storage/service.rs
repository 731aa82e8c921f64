//! Request-level storage operations
//!
//! `StorageService` is the read/write surface a transport layer would sit
//! on: it takes wire requests, converts them, runs them against a backend and
//! shapes wire responses.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use super::backend::StorageBackend;
use super::error::StorageError;
use super::tree::build_tree;
use crate::convert::{self, ConvertError};
use crate::util::now_nanos;
use crate::wire::{
    AgentSummary, GetAgentInformationRequest, GetAgentInformationResponse,
    GetIncidentsListRequest, GetIncidentsListResponse, GetSchedulerInformationRequest,
    GetSchedulerInformationResponse, GetSchedulerUptimeRequest, GetSchedulerUptimeResponse,
    GetTransactionByIdRequest, GetTransactionByIdResponse, GetTransactionGroupRequest,
    GetTransactionGroupResponse, GetTransactionsRequest, GetTransactionsResponse, Incident,
    Metric, SchedulerResponse, TransactionInfo, TransactionTree,
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ServiceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServiceError::Storage(e) if e.is_fatal())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Clone)]
pub struct StorageService {
    backend: Arc<dyn StorageBackend>,
}

impl StorageService {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    // ========================================================================
    // Writes
    // ========================================================================

    #[instrument(skip(self, response), fields(scheduler_id = %response.scheduler_id))]
    pub async fn save_response(&self, response: &SchedulerResponse) -> ServiceResult<()> {
        let row = convert::to_snapshot_row(response)?;
        self.backend.insert_snapshot(row).await?;
        Ok(())
    }

    #[instrument(skip(self, incident), fields(incident_id = %incident.id))]
    pub async fn save_incident(&self, incident: &Incident) -> ServiceResult<()> {
        let row = convert::to_incident_row(incident, now_nanos())?;
        self.backend.upsert_incident(row).await?;
        Ok(())
    }

    /// Write one stat report directly, bypassing batching
    pub async fn save_stat(&self, metric: &Metric) -> ServiceResult<()> {
        let row = convert::to_stat_row(metric)?;
        self.backend.insert_stats(vec![row]).await?;
        Ok(())
    }

    #[instrument(skip(self, info), fields(transaction_id = %info.id))]
    pub async fn save_transaction(&self, info: &TransactionInfo) -> ServiceResult<()> {
        let row = convert::to_transaction_row(info)?;
        self.backend.insert_transaction(row).await?;
        Ok(())
    }

    // ========================================================================
    // Snapshots and agents
    // ========================================================================

    pub async fn get_scheduler_information(
        &self,
        request: &GetSchedulerInformationRequest,
    ) -> ServiceResult<GetSchedulerInformationResponse> {
        let query = convert::snapshot_query(request)?;
        let page = self.backend.query_snapshots(query).await?;
        Ok(GetSchedulerInformationResponse {
            snapshots: convert::from_snapshot_rows(&page.items),
            count: page.total,
        })
    }

    pub async fn get_scheduler_uptime(
        &self,
        request: &GetSchedulerUptimeRequest,
    ) -> ServiceResult<GetSchedulerUptimeResponse> {
        if request.scheduler_id.is_empty() {
            return Err(ConvertError::EmptyRequest("scheduler_id").into());
        }
        let range = convert::time_range(request.time_range.as_ref())?;
        let result = self.backend.uptime(&request.scheduler_id, range).await?;
        Ok(convert::uptime_response(&result))
    }

    pub async fn get_agent_information(
        &self,
        request: &GetAgentInformationRequest,
    ) -> ServiceResult<GetAgentInformationResponse> {
        let query = convert::stat_query(request)?;
        let page = self.backend.query_stats(query).await?;
        Ok(GetAgentInformationResponse {
            stats: convert::from_stat_rows(&page.items),
            count: page.total,
        })
    }

    pub async fn get_agent_list(&self) -> ServiceResult<Vec<AgentSummary>> {
        Ok(self
            .backend
            .list_agents()
            .await?
            .into_iter()
            .map(|agent| AgentSummary {
                agent_id: agent.agent_id,
                agent_name: agent.agent_name,
            })
            .collect())
    }

    // ========================================================================
    // Incidents
    // ========================================================================

    pub async fn get_incident_by_id(&self, incident_id: &str) -> ServiceResult<Option<Incident>> {
        let row = self.backend.get_incident(incident_id).await?;
        Ok(row.as_ref().map(convert::from_incident_row))
    }

    pub async fn get_active_incident_by_rule_id(
        &self,
        rule_id: &str,
    ) -> ServiceResult<Option<Incident>> {
        let row = self.backend.get_active_incident_by_rule_id(rule_id).await?;
        Ok(row.as_ref().map(convert::from_incident_row))
    }

    /// Every incident still open, used to resume incident tracking at startup
    pub async fn get_active_incidents(&self) -> ServiceResult<Vec<Incident>> {
        let rows = self.backend.list_active_incidents().await?;
        Ok(rows.iter().map(convert::from_incident_row).collect())
    }

    pub async fn get_incidents_list(
        &self,
        request: &GetIncidentsListRequest,
    ) -> ServiceResult<GetIncidentsListResponse> {
        let query = convert::incident_query(request)?;
        let page = self.backend.query_incidents(query).await?;
        Ok(GetIncidentsListResponse {
            incidents: page.items.iter().map(convert::from_incident_row).collect(),
            count: page.total,
        })
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    pub async fn get_transactions(
        &self,
        request: &GetTransactionsRequest,
    ) -> ServiceResult<GetTransactionsResponse> {
        let query = convert::transaction_query(request)?;
        let page = self.backend.query_transactions(query).await?;
        Ok(GetTransactionsResponse {
            transactions: convert::from_transaction_rows(&page.items),
            count: page.total,
        })
    }

    /// A transaction with every descendant, flattened
    pub async fn get_transaction_by_id(
        &self,
        request: &GetTransactionByIdRequest,
    ) -> ServiceResult<GetTransactionByIdResponse> {
        if request.transaction_id.is_empty() {
            return Err(ConvertError::EmptyRequest("transaction_id").into());
        }

        let Some((root, children)) = self
            .backend
            .transaction_with_descendants(&request.transaction_id)
            .await?
        else {
            return Err(StorageError::NotFound(format!(
                "transaction {}",
                request.transaction_id
            ))
            .into());
        };

        Ok(GetTransactionByIdResponse {
            transaction: Some(convert::from_transaction_row(&root)),
            children: convert::from_transaction_rows(&children),
        })
    }

    /// A transaction with its descendants as a nested tree
    pub async fn get_transaction_tree(&self, transaction_id: &str) -> ServiceResult<TransactionTree> {
        let Some(root) = self.backend.get_transaction(transaction_id).await? else {
            return Err(StorageError::NotFound(format!("transaction {}", transaction_id)).into());
        };
        let rows = self
            .backend
            .application_transactions(&root.application_id)
            .await?;

        Ok(build_tree(&root, &rows, &convert::from_transaction_row))
    }

    pub async fn get_transaction_group(
        &self,
        request: &GetTransactionGroupRequest,
    ) -> ServiceResult<GetTransactionGroupResponse> {
        let query = convert::group_query(request)?;
        let groups = self.backend.group_transactions(query).await?;
        Ok(convert::group_response(groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use crate::wire::{
        CpuInfo, CpuLoad, GroupKey, IncidentHistoryItem, IncidentStatus, TimeFilter, Timestamp,
        TransactionStatus, TransactionType,
    };
    use assert_matches::assert_matches;

    fn service() -> StorageService {
        StorageService::new(Arc::new(MemoryBackend::new()))
    }

    fn tx(id: &str, parent: &str, name: &str, status: TransactionStatus, end: i64) -> TransactionInfo {
        TransactionInfo {
            id: id.to_string(),
            application_id: "app".to_string(),
            parent_id: parent.to_string(),
            meta: None,
            name: name.to_string(),
            start_time: Some(Timestamp {
                seconds: 0,
                nanos: 0,
            }),
            end_time: Some(Timestamp {
                seconds: 0,
                nanos: end as i32,
            }),
            status: status.code(),
            transaction_type: TransactionType::Internal.code(),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_incident_roundtrip_through_service() {
        let service = service();
        let incident = Incident {
            id: "inc-1".to_string(),
            status: IncidentStatus::Opened.code(),
            rule_id: "rule-1".to_string(),
            histories: vec![IncidentHistoryItem {
                status: IncidentStatus::Opened.code(),
                timestamp: Some(Timestamp {
                    seconds: 5,
                    nanos: 0,
                }),
            }],
        };
        service.save_incident(&incident).await.unwrap();

        let active = service.get_active_incident_by_rule_id("rule-1").await.unwrap();
        assert_eq!(active, Some(incident.clone()));

        let list = service
            .get_incidents_list(&GetIncidentsListRequest {
                status: IncidentStatus::Opened.code(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(list.count, 1);
    }

    #[tokio::test]
    async fn test_group_and_tree() {
        let service = service();
        service
            .save_transaction(&tx("root", "", "X", TransactionStatus::Success, 10))
            .await
            .unwrap();
        service
            .save_transaction(&tx("child", "root", "X", TransactionStatus::Failed, 20))
            .await
            .unwrap();

        let groups = service
            .get_transaction_group(&GetTransactionGroupRequest {
                application_id: "app".to_string(),
                time_range: Some(TimeFilter::default()),
                group_type: GroupKey::Name.code(),
                ..Default::default()
            })
            .await
            .unwrap();
        let x = &groups.transactions["X"];
        assert_eq!((x.count, x.success_count), (2, 1));
        assert_eq!(x.average_time, 15.0);

        let by_id = service
            .get_transaction_by_id(&GetTransactionByIdRequest {
                transaction_id: "root".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(by_id.children.len(), 1);

        let tree = service.get_transaction_tree("root").await.unwrap();
        assert_eq!(tree.children[0].transaction.id, "child");
    }

    #[tokio::test]
    async fn test_invalid_request_is_convert_error() {
        let err = service()
            .get_transactions(&GetTransactionsRequest {
                application_id: "app".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::Convert(ConvertError::MissingField("time_range")));
        assert!(!err.is_fatal());
    }

    fn window(from: i64, to: i64) -> Option<TimeFilter> {
        Some(TimeFilter {
            from: Some(Timestamp { seconds: from, nanos: 0 }),
            to: Some(Timestamp { seconds: to, nanos: 0 }),
        })
    }

    #[tokio::test]
    async fn test_inverted_time_range_is_rejected_by_every_read() {
        let service = service();
        service
            .save_stat(&Metric {
                agent_id: "a1".to_string(),
                time: Some(Timestamp { seconds: 70, nanos: 0 }),
                ..Default::default()
            })
            .await
            .unwrap();

        let inverted = || window(100, 50);
        let is_invalid_range = |err: ServiceError| {
            matches!(err, ServiceError::Convert(ConvertError::InvalidRange { .. }))
        };

        let err = service
            .get_agent_information(&GetAgentInformationRequest {
                agent_id: "a1".to_string(),
                time_range: inverted(),
                pagination: None,
            })
            .await
            .unwrap_err();
        assert!(is_invalid_range(err));

        let err = service
            .get_scheduler_information(&GetSchedulerInformationRequest {
                scheduler_id: "s1".to_string(),
                time_range: inverted(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(is_invalid_range(err));

        let err = service
            .get_scheduler_uptime(&GetSchedulerUptimeRequest {
                scheduler_id: "s1".to_string(),
                time_range: inverted(),
            })
            .await
            .unwrap_err();
        assert!(is_invalid_range(err));

        let err = service
            .get_incidents_list(&GetIncidentsListRequest {
                time_range: inverted(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(is_invalid_range(err));

        let err = service
            .get_transactions(&GetTransactionsRequest {
                application_id: "app".to_string(),
                time_range: inverted(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(is_invalid_range(err));

        let err = service
            .get_transaction_group(&GetTransactionGroupRequest {
                application_id: "app".to_string(),
                time_range: inverted(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(is_invalid_range(err));
    }

    #[tokio::test]
    async fn test_single_instant_time_range() {
        let service = service();
        service
            .save_stat(&Metric {
                agent_id: "a1".to_string(),
                cpu_info: Some(CpuInfo {
                    cpus: vec![CpuLoad { load: 0.5 }],
                }),
                time: Some(Timestamp { seconds: 70, nanos: 0 }),
                ..Default::default()
            })
            .await
            .unwrap();
        service
            .save_transaction(&tx("root", "", "X", TransactionStatus::Success, 10))
            .await
            .unwrap();

        let stats = service
            .get_agent_information(&GetAgentInformationRequest {
                agent_id: "a1".to_string(),
                time_range: window(70, 70),
                pagination: None,
            })
            .await
            .unwrap();
        assert_eq!(stats.count, 1);

        let missed = service
            .get_agent_information(&GetAgentInformationRequest {
                agent_id: "a1".to_string(),
                time_range: window(71, 71),
                pagination: None,
            })
            .await
            .unwrap();
        assert_eq!(missed.count, 0);

        let transactions = service
            .get_transactions(&GetTransactionsRequest {
                application_id: "app".to_string(),
                time_range: window(0, 0),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(transactions.count, 1);

        let uptime = service
            .get_scheduler_uptime(&GetSchedulerUptimeRequest {
                scheduler_id: "s1".to_string(),
                time_range: window(0, 0),
            })
            .await
            .unwrap();
        assert_eq!(uptime.uptime, 0.0);
    }

    #[tokio::test]
    async fn test_missing_transaction_is_not_found() {
        let err = service()
            .get_transaction_by_id(&GetTransactionByIdRequest {
                transaction_id: "nope".to_string(),
            })
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::Storage(StorageError::NotFound(_)));
    }
}
