//! Recording path: counters, buckets and the recent-events list as seen
//! through the stats query after requests are recorded.

mod common;

use chrono::Utc;
use req_telemetry::buckets::{day_key, hour_key};
use req_telemetry::event::now_millis;
use req_telemetry::recorder::RequestContext;
use req_telemetry::ring::RecentEntry;
use req_telemetry::{HttpMethod, MemoryStore, StatusCategory};
use std::sync::Arc;

fn ctx(method: HttpMethod, role: &str, path: &str) -> RequestContext {
    RequestContext {
        timestamp: now_millis(),
        method,
        path: path.to_string(),
        role: role.to_string(),
        client_address: "192.0.2.10".to_string(),
        user_agent: "Mozilla/5.0".to_string(),
    }
}

#[tokio::test]
async fn single_request_scenario() {
    let store = Arc::new(MemoryStore::new());
    let api = common::services(store, Default::default());

    let request = ctx(HttpMethod::Get, "admin", "/api/bookings");
    api.recorder.record_request(&request);
    api.recorder.record_response(request.clone(), 200);
    api.recorder.drain().await;

    let stats = api.stats.query().await;
    assert!(!stats.is_degraded());
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.method_counts["GET"], 1);
    assert_eq!(stats.method_counts["POST"], 0);
    assert_eq!(stats.role_counts["admin"], 1);
    assert_eq!(stats.role_method_counts["admin"]["GET"], 1);
    assert_eq!(stats.status_counts["200"], 1);
    assert_eq!(stats.status_category_counts["2xx"], 1);
    assert_eq!(stats.status_category_counts["4xx"], 0);

    let hour = stats.hourly.last().expect("hourly bucket");
    assert_eq!(hour.timestamp, hour_key(request.timestamp));
    assert_eq!(hour.success, 1);
    assert_eq!(hour.total, 1);
    let day = stats.daily.last().expect("daily bucket");
    assert_eq!(day.timestamp, day_key(request.timestamp));
    assert_eq!(day.total, 1);

    assert_eq!(stats.recent_requests.len(), 1);
    let event = stats.recent_requests[0].event().expect("decoded event");
    assert_eq!(event.method, HttpMethod::Get);
    assert_eq!(event.path, "/api/bookings");
    assert_eq!(event.role, "admin");
    assert_eq!(event.status_code, 200);
    assert_eq!(event.client_address, "192.0.2.10");
    assert_eq!(event.user_agent, "Mozilla/5.0");
    assert_eq!(event.timestamp, request.timestamp);
}

#[tokio::test]
async fn concurrent_requests_sum_per_method() {
    let store = Arc::new(MemoryStore::new());
    let api = common::services(store, Default::default());

    let plan = [
        (HttpMethod::Get, 60usize),
        (HttpMethod::Post, 25),
        (HttpMethod::Put, 10),
        (HttpMethod::Delete, 5),
    ];
    let mut handles = Vec::new();
    for (method, count) in plan {
        for i in 0..count {
            let recorder = api.recorder.clone();
            handles.push(tokio::spawn(async move {
                let role = if i % 2 == 0 { "user" } else { "anonymous" };
                let request = ctx(method, role, "/api/cards");
                recorder.record_request(&request);
                recorder.record_response(request, if i % 10 == 0 { 500 } else { 200 });
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }
    api.recorder.drain().await;

    let stats = api.stats.query().await;
    let expected_total: usize = plan.iter().map(|(_, n)| n).sum();
    assert_eq!(stats.total_requests, expected_total as i64);
    for (method, count) in plan {
        assert_eq!(stats.method_counts[method.as_str()], count as i64, "{method}");
    }
    let method_sum: i64 = stats.method_counts.values().sum();
    assert_eq!(method_sum, stats.total_requests);
    assert_eq!(
        stats.role_counts["user"] + stats.role_counts["anonymous"],
        stats.total_requests
    );

    let category_sum: i64 = stats.status_category_counts.values().sum();
    assert_eq!(category_sum, stats.total_requests);
    for point in stats.hourly.iter().chain(stats.daily.iter()) {
        let sum: i64 = StatusCategory::ALL.iter().map(|c| point.count(*c)).sum();
        assert_eq!(point.total, sum);
    }
    assert_eq!(stats.recent_requests.len(), expected_total);
}

#[tokio::test]
async fn unknown_status_lands_in_unknown_category() {
    let store = Arc::new(MemoryStore::new());
    let api = common::services(store, Default::default());

    let request = ctx(HttpMethod::Patch, "manager", "/api/mail/3");
    api.recorder.write_request(&request).await.unwrap();
    api.recorder
        .write_response(&request.finish(999))
        .await
        .unwrap();

    let stats = api.stats.query().await;
    assert_eq!(stats.status_counts["999"], 1);
    assert_eq!(stats.status_category_counts["unknown"], 1);
    let hour = stats.hourly.last().unwrap();
    assert_eq!(hour.unknown, 1);
    assert_eq!(hour.total, 1);
}

#[tokio::test]
async fn store_outage_is_swallowed() {
    let store = Arc::new(MemoryStore::new());
    let api = common::services(store.clone(), Default::default());

    store.set_available(false);
    let request = ctx(HttpMethod::Get, "user", "/api/users");
    api.recorder.record_request(&request);
    api.recorder.record_response(request, 200);
    api.recorder.drain().await;
    store.set_available(true);

    let stats = api.stats.query().await;
    assert_eq!(stats.total_requests, 0);
    assert!(stats.recent_requests.is_empty());
}

#[tokio::test]
async fn recent_list_is_newest_first() {
    let store = Arc::new(MemoryStore::new());
    let api = common::services(store, Default::default());

    for n in 0..3 {
        let request = ctx(HttpMethod::Get, "user", &format!("/page/{n}"));
        api.recorder
            .write_response(&request.finish(200))
            .await
            .unwrap();
    }
    let stats = api.stats.query().await;
    let paths: Vec<&str> = stats
        .recent_requests
        .iter()
        .filter_map(RecentEntry::event)
        .map(|e| e.path.as_str())
        .collect();
    assert_eq!(paths, vec!["/page/2", "/page/1", "/page/0"]);
    assert!(stats.recent_requests.iter().all(|e| e.event().unwrap().timestamp <= Utc::now()));
}
