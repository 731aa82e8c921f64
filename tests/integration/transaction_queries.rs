//! Transaction listing, tree reconstruction and grouping

use std::sync::Arc;

use pretty_assertions::assert_eq;
use watchpost::{
    storage::{MemoryBackend, StorageService},
    wire::{
        GetTransactionByIdRequest, GetTransactionGroupRequest, GetTransactionsRequest, GroupKey,
        Pagination, SortDirection, SortingTransactionList, TimeFilter, Timestamp,
        TransactionSortKey, TransactionStatus,
    },
};

use crate::helpers::transaction;

const MS: i64 = 1_000_000;

async fn seeded() -> StorageService {
    let service = StorageService::new(Arc::new(MemoryBackend::new()));
    let rows = [
        transaction("t1", "", "checkout", TransactionStatus::Success, 1_000 * MS, 30 * MS),
        transaction("t2", "t1", "payment", TransactionStatus::Failed, 1_005 * MS, 20 * MS),
        transaction("t3", "t1", "stock", TransactionStatus::Success, 1_010 * MS, 5 * MS),
        transaction("t4", "t2", "payment", TransactionStatus::Success, 1_012 * MS, 10 * MS),
        transaction("t5", "", "checkout", TransactionStatus::Failed, 2_000 * MS, 50 * MS),
    ];
    for row in &rows {
        service.save_transaction(row).await.unwrap();
    }
    service
}

fn list_request() -> GetTransactionsRequest {
    GetTransactionsRequest {
        application_id: "app".to_string(),
        time_range: Some(TimeFilter::default()),
        ..Default::default()
    }
}

fn ids(transactions: &[watchpost::wire::TransactionInfo]) -> Vec<&str> {
    transactions.iter().map(|t| t.id.as_str()).collect()
}

#[tokio::test]
async fn test_default_sort_is_newest_first() {
    let service = seeded().await;
    let page = service.get_transactions(&list_request()).await.unwrap();
    assert_eq!(page.count, 5);
    assert_eq!(ids(&page.transactions), vec!["t5", "t4", "t3", "t2", "t1"]);
}

#[tokio::test]
async fn test_sort_by_duration_with_pagination() {
    let service = seeded().await;
    let request = GetTransactionsRequest {
        sort: Some(SortingTransactionList {
            sort_by: TransactionSortKey::Duration.code(),
            direction: SortDirection::Asc.code(),
        }),
        pagination: Some(Pagination::new(1, 2)),
        ..list_request()
    };
    let page = service.get_transactions(&request).await.unwrap();
    assert_eq!(page.count, 5);
    assert_eq!(ids(&page.transactions), vec!["t3", "t4"]);

    let last = GetTransactionsRequest {
        pagination: Some(Pagination::new(-1, 2)),
        ..request.clone()
    };
    let page = service.get_transactions(&last).await.unwrap();
    assert_eq!(ids(&page.transactions), vec!["t1", "t5"]);

    let beyond = GetTransactionsRequest {
        pagination: Some(Pagination::new(10, 2)),
        ..request
    };
    let page = service.get_transactions(&beyond).await.unwrap();
    assert!(page.transactions.is_empty());
    assert_eq!(page.count, 5);
}

#[tokio::test]
async fn test_equality_filters() {
    let service = seeded().await;

    let request = GetTransactionsRequest {
        name: Some("payment".to_string()),
        status: TransactionStatus::Success.code(),
        ..list_request()
    };
    let page = service.get_transactions(&request).await.unwrap();
    assert_eq!(ids(&page.transactions), vec!["t4"]);

    let request = GetTransactionsRequest {
        path: Some("/checkout".to_string()),
        method: Some("GET".to_string()),
        host: Some("api.test".to_string()),
        ..list_request()
    };
    assert_eq!(service.get_transactions(&request).await.unwrap().count, 2);

    let request = GetTransactionsRequest {
        time_range: Some(TimeFilter {
            from: Some(Timestamp {
                seconds: 1,
                nanos: 500_000_000,
            }),
            to: None,
        }),
        ..list_request()
    };
    let page = service.get_transactions(&request).await.unwrap();
    assert_eq!(ids(&page.transactions), vec!["t5"]);
}

#[tokio::test]
async fn test_transaction_by_id_returns_all_descendants() {
    let service = seeded().await;
    let response = service
        .get_transaction_by_id(&GetTransactionByIdRequest {
            transaction_id: "t1".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(response.transaction.unwrap().id, "t1");
    let mut children = ids(&response.children);
    children.sort();
    assert_eq!(children, vec!["t2", "t3", "t4"]);

    let tree = service.get_transaction_tree("t1").await.unwrap();
    let direct: Vec<&str> = tree.children.iter().map(|c| c.transaction.id.as_str()).collect();
    assert_eq!(direct, vec!["t2", "t3"]);
    assert_eq!(tree.children[0].children[0].transaction.id, "t4");
}

#[tokio::test]
async fn test_parent_cycle_terminates() {
    let service = StorageService::new(Arc::new(MemoryBackend::new()));
    service
        .save_transaction(&transaction("a", "b", "x", TransactionStatus::Success, 0, MS))
        .await
        .unwrap();
    service
        .save_transaction(&transaction("b", "a", "x", TransactionStatus::Success, MS, MS))
        .await
        .unwrap();

    let response = service
        .get_transaction_by_id(&GetTransactionByIdRequest {
            transaction_id: "a".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(ids(&response.children), vec!["b"]);

    let tree = service.get_transaction_tree("a").await.unwrap();
    assert_eq!(tree.children.len(), 1);
    assert!(tree.children[0].children.is_empty());
}

#[tokio::test]
async fn test_group_by_name() {
    let service = seeded().await;
    let response = service
        .get_transaction_group(&GetTransactionGroupRequest {
            application_id: "app".to_string(),
            time_range: Some(TimeFilter::default()),
            group_type: GroupKey::Name.code(),
            ..Default::default()
        })
        .await
        .unwrap();

    let checkout = &response.transactions["checkout"];
    assert_eq!(checkout.count, 2);
    assert_eq!(checkout.success_count, 1);
    assert_eq!(checkout.average_time, (40 * MS) as f64);
    assert_eq!(checkout.min_time, 30 * MS);
    assert_eq!(checkout.max_time, 50 * MS);
    assert_eq!(checkout.low_time, 1_030 * MS);

    let payment = &response.transactions["payment"];
    assert_eq!((payment.count, payment.success_count), (2, 1));
    assert_eq!(response.transactions.len(), 3);
}

#[tokio::test]
async fn test_group_defaults_to_type() {
    let service = seeded().await;
    let response = service
        .get_transaction_group(&GetTransactionGroupRequest {
            application_id: "app".to_string(),
            time_range: Some(TimeFilter::default()),
            status: TransactionStatus::Failed.code(),
            ..Default::default()
        })
        .await
        .unwrap();

    let fetch = watchpost::wire::TransactionType::Fetch.code().to_string();
    assert_eq!(response.transactions.len(), 1);
    assert_eq!(response.transactions[&fetch].count, 2);
    assert_eq!(response.transactions[&fetch].success_count, 0);
}

#[tokio::test]
async fn test_deep_parent_chain() {
    const DEPTH: usize = 50_000;
    let service = StorageService::new(Arc::new(MemoryBackend::new()));
    for i in 0..DEPTH {
        let parent = if i == 0 {
            String::new()
        } else {
            format!("c{}", i - 1)
        };
        service
            .save_transaction(&transaction(
                &format!("c{i}"),
                &parent,
                "hop",
                TransactionStatus::Success,
                i as i64 * MS,
                MS,
            ))
            .await
            .unwrap();
    }

    let tree = service.get_transaction_tree("c0").await.unwrap();
    let mut depth = 0;
    let mut node = &tree;
    while let Some(child) = node.children.first() {
        depth += 1;
        node = child;
    }
    assert_eq!(depth, DEPTH - 1);
    assert_eq!(node.transaction.id, format!("c{}", DEPTH - 1));

    let response = service
        .get_transaction_by_id(&GetTransactionByIdRequest {
            transaction_id: "c0".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(response.children.len(), DEPTH - 1);
}
