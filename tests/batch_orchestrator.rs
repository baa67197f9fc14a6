mod common;

use common::{accepted, harness, harness_with, settings, FakeConnector, Gate, RecordingNotifier, BUDGET};
use household_crawler::clients::PortalOutcome;
use household_crawler::error::{AppError, RequestError, StoreError};
use household_crawler::models::{BatchQueryRequest, BatchStatus, DistrictStatus};
use household_crawler::orchestrator::OrchestratorSettings;
use household_crawler::services::NotificationKind;
use household_crawler::utils::clock;
use tokio_test::{assert_err, assert_ok};

fn request(districts: &[&str]) -> BatchQueryRequest {
    BatchQueryRequest::new("114-09-01", "114-11-30").with_districts(districts)
}

#[tokio::test]
async fn test_two_districts_succeed() {
    let connector = FakeConnector::new();
    connector.script("中正區", vec![accepted("中正區", 20)]);
    connector.script("大安區", vec![accepted("大安區", 22)]);
    let h = harness(connector);

    let response = assert_ok!(h.orchestrator.run_batch(&request(&["中正區", "大安區"])).await);

    assert!(response.success);
    assert_eq!(response.total_count, 42);
    assert_eq!(response.district_results.get("中正區"), Some(&20));
    assert_eq!(response.district_results.get("大安區"), Some(&22));
    assert!(response.failed_districts.is_empty());
    assert!(response.error_message.is_none());
    assert_eq!(response.data.as_ref().map(Vec::len), Some(42));

    let batch_id = response.batch_id.unwrap();
    let run = h.store.batch(batch_id).unwrap().unwrap();
    assert_eq!(run.status, BatchStatus::Completed);
    assert_eq!(run.records_fetched, 42);
    assert!(run.end_time.is_some());
    assert_eq!(run.api_endpoint, "fake://ris/inquiry/date");

    let districts = h.store.district_results(batch_id).unwrap();
    assert_eq!(districts.len(), 2);
    assert!(districts.iter().all(|d| d.status == DistrictStatus::Success));
    assert_eq!(h.store.households_for_batch(batch_id).unwrap().len(), 42);

    // 每个行政区一个新会话
    assert_eq!(h.connector.opens.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert!(h.notifier.sent().is_empty());
    assert!(!h.orchestrator.status().running);
}

#[tokio::test]
async fn test_empty_district_is_no_data_and_notifies_active_recipients() {
    let connector = FakeConnector::new();
    connector.script("南港區", vec![PortalOutcome::Accepted(Vec::new())]);
    let h = harness(connector);
    h.store.add_recipient("ops@example.com", Some("值班")).unwrap();
    h.store.add_recipient("old@example.com", None).unwrap();
    h.store.deactivate_recipient("old@example.com").unwrap();

    let response = assert_ok!(h.orchestrator.run_batch(&request(&["南港區"])).await);

    assert!(response.success);
    assert_eq!(response.total_count, 0);
    assert_eq!(response.district_results.get("南港區"), Some(&0));
    assert!(response.failed_districts.is_empty());

    let batch_id = response.batch_id.unwrap();
    let districts = h.store.district_results(batch_id).unwrap();
    assert_eq!(districts[0].status, DistrictStatus::NoData);
    assert_eq!(districts[0].record_count, 0);
    assert_eq!(
        h.store.batch(batch_id).unwrap().unwrap().status,
        BatchStatus::Completed
    );

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::EmptyData);
    assert_eq!(sent[0].to, vec!["ops@example.com".to_string()]);
    assert!(sent[0].subject.starts_with("[戶政爬蟲] 異常通知"));
    assert!(sent[0].body.contains(&batch_id.to_string()));
}

#[tokio::test]
async fn test_exhausted_district_fails_batch_without_retracting_others() {
    let connector = FakeConnector::new();
    connector.script("大安區", vec![accepted("大安區", 5)]);
    let h = harness(connector);
    h.store.add_recipient("ops@example.com", None).unwrap();

    let response = assert_ok!(h.orchestrator.run_batch(&request(&["中正區", "大安區"])).await);

    assert!(!response.success);
    assert_eq!(response.failed_districts, vec!["中正區".to_string()]);
    assert_eq!(response.total_count, 5);
    assert!(!response.district_results.contains_key("中正區"));
    assert!(response.error_message.unwrap().contains("中正區"));

    // 中正區 用完全部预算，大安區 一次成功
    assert_eq!(h.connector.fetch_count(), BUDGET as usize + 1);

    let batch_id = response.batch_id.unwrap();
    let run = h.store.batch(batch_id).unwrap().unwrap();
    assert_eq!(run.status, BatchStatus::Failed);
    assert_eq!(run.records_fetched, 5);
    assert!(run.error_message.unwrap().contains("中正區"));

    let districts = h.store.district_results(batch_id).unwrap();
    let failed = districts
        .iter()
        .find(|d| d.district_name == "中正區")
        .unwrap();
    assert_eq!(failed.status, DistrictStatus::Failed);
    assert!(failed.error_message.is_some());
    let ok = districts
        .iter()
        .find(|d| d.district_name == "大安區")
        .unwrap();
    assert_eq!(ok.status, DistrictStatus::Success);
    assert_eq!(h.store.households_for_batch(batch_id).unwrap().len(), 5);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::CrawlerFailure);
}

#[tokio::test]
async fn test_district_recovers_after_rejections_and_transient_errors() {
    let connector = FakeConnector::new();
    connector.script(
        "信義區",
        vec![
            PortalOutcome::CaptchaRejected("驗證碼錯誤".to_string()),
            PortalOutcome::TransientError("HTTP 502".to_string()),
            accepted("信義區", 4),
        ],
    );
    let h = harness(connector);

    let response = assert_ok!(h.orchestrator.run_batch(&request(&["信義區"])).await);

    assert!(response.success);
    assert_eq!(response.total_count, 4);
    assert_eq!(h.connector.fetch_count(), 3);
}

#[tokio::test]
async fn test_concurrent_batch_is_rejected_while_one_runs() {
    let gate = Gate::default();
    let connector = FakeConnector::new().with_gate(gate.clone());
    connector.script("中正區", vec![accepted("中正區", 3)]);
    let h = harness(connector);

    let first = request(&["中正區"]);
    let second = request(&["大安區"]);
    let (first, second) = tokio::join!(h.orchestrator.run_batch(&first), async {
        gate.entered.notified().await;
        let status = h.orchestrator.status();
        let result = h.orchestrator.run_batch(&second).await;
        gate.release.notify_one();
        (status, result)
    });

    let (status_during, second) = second;
    assert!(status_during.running);
    assert!(status_during.batch_id.is_some());

    let err = assert_err!(second);
    assert!(err.is_already_running());

    let first = assert_ok!(first);
    assert!(first.success);
    assert_eq!(first.total_count, 3);
    // 被拒绝的批次没有打开会话，也没有留下批次记录
    assert_eq!(h.connector.opens.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(h.store.latest_batch().unwrap().unwrap().id, first.batch_id.unwrap());

    // 互斥标志在批次结束后释放
    assert!(!h.orchestrator.status().running);
}

#[tokio::test]
async fn test_running_row_in_store_rejects_new_batch() {
    let h = harness(FakeConnector::new());
    let stale = h.store.begin_batch("other-process", clock::now()).unwrap();

    let status = h.orchestrator.status();
    assert!(status.running);
    assert_eq!(status.batch_id, Some(stale));

    let err = assert_err!(h.orchestrator.run_batch(&request(&["中正區"])).await);
    match err {
        AppError::BatchAlreadyRunning { batch_id } => assert_eq!(batch_id, Some(stale)),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.connector.opens.load(std::sync::atomic::Ordering::SeqCst), 0);

    // 恢复后可以正常执行
    assert_eq!(h.orchestrator.recover_interrupted().unwrap(), vec![stale]);
    h.connector.script("中正區", vec![accepted("中正區", 1)]);
    let response = assert_ok!(h.orchestrator.run_batch(&request(&["中正區"])).await);
    assert!(response.success);
}

#[tokio::test]
async fn test_running_row_in_store_rejects_unpersisted_batch() {
    let h = harness(FakeConnector::new());
    let other = h.store.begin_batch("other-process", clock::now()).unwrap();
    assert!(h.orchestrator.status().running);

    let err = assert_err!(
        h.orchestrator
            .run_batch(&request(&["中正區"]).without_persistence())
            .await
    );
    match err {
        AppError::BatchAlreadyRunning { batch_id } => assert_eq!(batch_id, Some(other)),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.connector.opens.load(std::sync::atomic::Ordering::SeqCst), 0);
    // 没有新建批次，原来的 running 行保持不变
    let latest = h.store.latest_batch().unwrap().unwrap();
    assert_eq!(latest.id, other);
    assert_eq!(latest.status, BatchStatus::Running);
}

#[tokio::test]
async fn test_lost_batch_row_surfaces_finish_error_and_releases_guard() {
    let gate = Gate::default();
    let connector = FakeConnector::new().with_gate(gate.clone());
    connector.script("中正區", vec![accepted("中正區", 3)]);
    let h = harness(connector);
    h.store.add_recipient("ops@example.com", None).unwrap();

    // 中正區 第一次取验证码时删掉批次行：之后的写入与终态更新都会失败
    let req = request(&["中正區", "南港區"]);
    let (result, deleted) = tokio::join!(h.orchestrator.run_batch(&req), async {
        gate.entered.notified().await;
        let id = h.store.running_batch().unwrap().unwrap().id;
        assert!(h.store.delete_batch(id).unwrap());
        gate.release.notify_one();
        id
    });

    let err = assert_err!(result);
    assert!(
        matches!(err, AppError::Store(StoreError::BatchNotFound(id)) if id == deleted),
        "unexpected error: {err}"
    );

    // 写入失败只记录日志，两个行政区都跑完
    assert_eq!(h.connector.opens.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(h.store.count_households().unwrap(), 0);
    assert!(h.store.district_results(deleted).unwrap().is_empty());

    // 南港區 用完预算，通知照常发送
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, NotificationKind::CrawlerFailure);

    // 互斥标志已释放，下一批可以执行
    assert!(!h.orchestrator.status().running);
    h.connector.script("中正區", vec![accepted("中正區", 1)]);
    let next = assert_ok!(h.orchestrator.run_batch(&request(&["中正區"])).await);
    assert!(next.success);
    assert_eq!(h.store.count_households().unwrap(), 1);
}

#[tokio::test]
async fn test_large_result_omits_data() {
    let connector = FakeConnector::new();
    connector.script("中山區", vec![accepted("中山區", 11)]);
    let h = harness_with(
        connector,
        RecordingNotifier::default(),
        OrchestratorSettings {
            max_response_records: 10,
            ..settings()
        },
    );

    let response = assert_ok!(h.orchestrator.run_batch(&request(&["中山區"])).await);

    assert_eq!(response.total_count, 11);
    assert!(response.data.is_none());
    let json = serde_json::to_value(&response).unwrap();
    assert!(json.get("data").is_none());
    assert_eq!(json["total_count"], 11);
    assert!(json["execution_time"].is_number());
}

#[tokio::test]
async fn test_without_persistence_writes_nothing() {
    let connector = FakeConnector::new();
    connector.script("士林區", vec![accepted("士林區", 2)]);
    let h = harness(connector);

    let response = assert_ok!(
        h.orchestrator
            .run_batch(&request(&["士林區"]).without_persistence())
            .await
    );

    assert!(response.success);
    assert_eq!(response.total_count, 2);
    assert!(response.batch_id.is_none());
    assert!(h.store.latest_batch().unwrap().is_none());
    assert_eq!(h.store.count_households().unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_request_is_rejected_before_any_query() {
    let h = harness(FakeConnector::new());

    let err = assert_err!(h.orchestrator.run_batch(&request(&["板橋區"])).await);
    assert!(matches!(
        err,
        AppError::Request(RequestError::UnknownDistricts(ref names)) if names == &vec!["板橋區".to_string()]
    ));

    let reversed = BatchQueryRequest::new("114-11-30", "114-09-01");
    let err = assert_err!(h.orchestrator.run_batch(&reversed).await);
    assert!(matches!(err, AppError::Request(RequestError::ReversedRange { .. })));

    assert_eq!(h.connector.opens.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(h.store.latest_batch().unwrap().is_none());
    assert!(!h.orchestrator.status().running);
}

#[tokio::test]
async fn test_notification_failure_does_not_change_result() {
    let connector = FakeConnector::new();
    connector.script("南港區", vec![PortalOutcome::Accepted(Vec::new())]);
    let h = harness_with(connector, RecordingNotifier::failing(), settings());
    h.store.add_recipient("ops@example.com", None).unwrap();

    let response = assert_ok!(h.orchestrator.run_batch(&request(&["南港區"])).await);

    assert!(response.success);
    assert_eq!(h.notifier.sent().len(), 1);
    let run = h.store.batch(response.batch_id.unwrap()).unwrap().unwrap();
    assert_eq!(run.status, BatchStatus::Completed);
}

#[tokio::test]
async fn test_batches_run_back_to_back() {
    let connector = FakeConnector::new();
    connector.script("北投區", vec![accepted("北投區", 1), accepted("北投區", 2)]);
    let h = harness(connector);

    let first = assert_ok!(h.orchestrator.run_batch(&request(&["北投區"])).await);
    let second = assert_ok!(h.orchestrator.run_batch(&request(&["北投區"])).await);

    assert!(second.batch_id.unwrap() > first.batch_id.unwrap());
    assert_eq!(second.total_count, 2);
    assert_eq!(h.store.count_households().unwrap(), 3);
}
