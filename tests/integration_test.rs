use household_crawler::clients::{PortalConnector, PortalSession, RisConnector};
use household_crawler::config::Config;
use household_crawler::infrastructure::ResultStore;
use household_crawler::models::BatchQueryRequest;
use household_crawler::orchestrator::{BatchOrchestrator, OrchestratorSettings};
use household_crawler::services::{build_solver, NotificationTrigger};
use household_crawler::utils::logging;
use std::sync::Arc;

#[tokio::test]
#[ignore] // 需要访问真实网站：cargo test -- --ignored
async fn test_portal_challenge() {
    logging::init(true);

    let config = Config::from_env();
    let connector = RisConnector::new(&config).expect("创建客户端失败");

    let mut session = connector
        .open(&config.city_code)
        .await
        .expect("建立会话失败");
    let image = session.fetch_challenge().await.expect("取验证码失败");

    assert!(image.len() > 100, "验证码图片过小: {} bytes", image.len());
}

#[tokio::test]
#[ignore] // 需要真实网站与识别服务（OCR_SERVICE_URL 或 LLM_API_KEY）
async fn test_single_district_batch() {
    logging::init(true);

    let config = Config::from_env();
    let orchestrator = BatchOrchestrator::new(
        Arc::new(RisConnector::new(&config).expect("创建客户端失败")),
        Arc::from(build_solver(&config)),
        ResultStore::in_memory().expect("创建数据库失败"),
        NotificationTrigger::disabled(),
        OrchestratorSettings::from_config(&config),
    );

    let request = BatchQueryRequest::new("114-09-01", "114-09-30").with_districts(&["中正區"]);
    let response = orchestrator.run_batch(&request).await.expect("批次执行失败");

    println!("{}", serde_json::to_string_pretty(&response).unwrap());
    assert!(response.success, "失败行政区: {:?}", response.failed_districts);
}
