// Many screens firing at once with an expired token must produce exactly one
// refresh call, and every request must go out with the refreshed token.

#[cfg(test)]
mod test {

use std::time::Duration;

use futures::future::join_all;
use httpmock::Method::{GET, POST};
use httpmock::MockServer;

use crate::auth::lifecycle::REFRESH_PATH;
use crate::tests::common::{json, sample_jwt, test_client, NOW};

const CALLERS: usize = 10;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_token_requests_share_one_refresh() {
    let server = MockServer::start_async().await;
    let fresh = sample_jwt(NOW + 3600);
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST).path(REFRESH_PATH);
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({"success": true, "data": {"token": fresh}}))
                .delay(Duration::from_millis(300));
        })
        .await;

    let (client, _clock) = test_client(&server.base_url(), vec![]);
    client.lifecycle().store().save(&sample_jwt(NOW - 60)).unwrap();

    let lifecycle = client.lifecycle().clone();
    let tokens = join_all((0..CALLERS).map(|_| {
        let lc = lifecycle.clone();
        tokio::spawn(async move { lc.get_valid_token().await })
    }))
    .await;

    for token in tokens {
        assert_eq!(token.unwrap(), Some(fresh.clone()));
    }
    refresh.assert_hits_async(1).await;
    assert!(!client.lifecycle().is_refreshing());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatches_wait_for_the_same_refresh() {
    let server = MockServer::start_async().await;
    let fresh = sample_jwt(NOW + 3600);
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST).path(REFRESH_PATH);
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({"success": true, "data": {"token": fresh}}))
                .delay(Duration::from_millis(300));
        })
        .await;
    let dashboard = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/dashboard")
                .header("authorization", format!("Bearer {}", fresh));
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({"success": true, "data": {"week": 24}}));
        })
        .await;

    let (client, _clock) = test_client(&server.base_url(), vec![]);
    // inside the refresh lead window, not yet past exp
    client.lifecycle().store().save(&sample_jwt(NOW + 120)).unwrap();

    let results = join_all((0..CALLERS).map(|_| {
        let c = client.clone();
        tokio::spawn(async move { c.get("/dashboard").await })
    }))
    .await;

    for result in results {
        let response = result.unwrap().unwrap();
        assert!(response.success);
        assert_eq!(response.data, Some(json!({"week": 24})));
    }
    refresh.assert_hits_async(1).await;
    dashboard.assert_hits_async(CALLERS).await;
}

#[tokio::test]
async fn refresh_is_retried_by_the_next_caller_after_a_failure() {
    let server = MockServer::start_async().await;
    let mut failing = server
        .mock_async(|when, then| {
            when.method(POST).path(REFRESH_PATH);
            then.status(503);
        })
        .await;

    let (client, _clock) = test_client(&server.base_url(), vec![]);
    client.lifecycle().store().save(&sample_jwt(NOW - 60)).unwrap();
    assert!(client.lifecycle().refresh().await.is_err());
    failing.assert_hits_async(1).await;
    failing.delete_async().await;

    // a failed flight does not stay cached
    let fresh = sample_jwt(NOW + 3600);
    let succeeding = server
        .mock_async(|when, then| {
            when.method(POST).path(REFRESH_PATH);
            then.status(200).json_body(json!({"token": fresh}));
        })
        .await;
    client.lifecycle().store().save(&sample_jwt(NOW - 60)).unwrap();
    assert_eq!(client.lifecycle().refresh().await.unwrap().token, fresh);
    succeeding.assert_hits_async(1).await;
}

}
