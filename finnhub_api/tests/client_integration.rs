use std::time::Duration;

use finnhub_api::{Client, Error};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn load_fixture(name: &str) -> String {
    std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
}

fn client_for(server: &MockServer) -> Client {
    Client::with_base_url(&server.uri(), "test-key".to_string()).unwrap()
}

#[tokio::test]
async fn get_quote_success() {
    let mock_server = MockServer::start().await;
    let body = load_fixture("quote_aapl.json");

    Mock::given(method("GET"))
        .and(path("/quote"))
        .and(query_param("symbol", "AAPL"))
        .and(query_param("token", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_string(&body))
        .mount(&mock_server)
        .await;

    let quote = client_for(&mock_server).get_quote("aapl").await.unwrap();
    assert_eq!(quote.current, 227.52);
    assert_eq!(quote.previous_close, 225.21);
}

#[tokio::test]
async fn get_quote_unknown_symbol_is_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(ResponseTemplate::new(200).set_body_string(load_fixture("quote_unknown.json")))
        .mount(&mock_server)
        .await;

    let result = client_for(&mock_server).get_quote("NOPE").await;
    assert_eq!(result.unwrap_err(), Error::NotFound);
}

#[tokio::test]
async fn get_quote_404_is_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let result = client_for(&mock_server).get_quote("NOPE").await;
    assert_eq!(result.unwrap_err(), Error::NotFound);
}

#[tokio::test]
async fn get_quote_rate_limited() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(ResponseTemplate::new(429).set_body_string(r#"{"error":"API limit reached"}"#))
        .mount(&mock_server)
        .await;

    let err = client_for(&mock_server).get_quote("AAPL").await.unwrap_err();
    assert_eq!(err, Error::RateLimited);
    assert!(err.is_transient());
}

#[tokio::test]
async fn get_quote_server_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&mock_server)
        .await;

    let err = client_for(&mock_server).get_quote("AAPL").await.unwrap_err();
    match err {
        Error::Upstream { status, ref body } => {
            assert_eq!(status, 502);
            assert_eq!(body, "Bad Gateway");
        }
        other => panic!("expected upstream error, got {:?}", other),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn get_quote_invalid_key() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid API key"))
        .mount(&mock_server)
        .await;

    let err = client_for(&mock_server).get_quote("AAPL").await.unwrap_err();
    assert_eq!(err, Error::InvalidApiKey { status: 401 });
    assert!(!err.is_transient());
}

#[tokio::test]
async fn get_quote_malformed_json() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not valid json}"))
        .mount(&mock_server)
        .await;

    let err = client_for(&mock_server).get_quote("AAPL").await.unwrap_err();
    assert!(matches!(err, Error::Malformed(_)));
}

#[tokio::test]
async fn get_quote_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/quote"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(load_fixture("quote_aapl.json"))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;

    let client = Client::with_timeout(
        &mock_server.uri(),
        "test-key".to_string(),
        Duration::from_millis(50),
    )
    .unwrap();
    let err = client.get_quote("AAPL").await.unwrap_err();
    assert_eq!(err, Error::Timeout);
}

#[tokio::test]
async fn get_company_profile_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/stock/profile2"))
        .and(query_param("symbol", "MSFT"))
        .respond_with(ResponseTemplate::new(200).set_body_string(load_fixture("profile_msft.json")))
        .mount(&mock_server)
        .await;

    let profile = client_for(&mock_server)
        .get_company_profile("MSFT")
        .await
        .unwrap();
    assert_eq!(profile.name.as_deref(), Some("Microsoft Corp"));
}

#[tokio::test]
async fn get_company_profile_empty_is_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/stock/profile2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&mock_server)
        .await;

    let err = client_for(&mock_server)
        .get_company_profile("ZZZZ")
        .await
        .unwrap_err();
    assert_eq!(err, Error::NotFound);
}

#[tokio::test]
async fn get_daily_candles_zips_bars() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/stock/candle"))
        .and(query_param("symbol", "MSFT"))
        .and(query_param("resolution", "D"))
        .and(query_param("from", "1717286400"))
        .and(query_param("to", "1717804800"))
        .respond_with(ResponseTemplate::new(200).set_body_string(load_fixture("candles_msft.json")))
        .mount(&mock_server)
        .await;

    let candles = client_for(&mock_server)
        .get_daily_candles("MSFT", 1_717_286_400, 1_717_804_800)
        .await
        .unwrap();
    assert_eq!(candles.len(), 5);
    assert_eq!(candles[0].close, 402.56);
    assert_eq!(candles[4].timestamp, 1_717_718_400);
    assert_eq!(candles[4].volume, 13_640_100.0);
}

#[tokio::test]
async fn get_daily_candles_no_data_is_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/stock/candle"))
        .respond_with(ResponseTemplate::new(200).set_body_string(load_fixture("candles_no_data.json")))
        .mount(&mock_server)
        .await;

    let result = client_for(&mock_server).get_daily_candles("NOPE", 0, 1).await;
    assert_eq!(result.unwrap_err(), Error::NotFound);
}

#[tokio::test]
async fn get_daily_candles_ragged_arrays_are_malformed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/stock/candle"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"s":"ok","t":[1,2],"o":[1.0],"h":[1.0,2.0],"l":[1.0,2.0],"c":[1.0,2.0],"v":[1,2]}"#,
        ))
        .mount(&mock_server)
        .await;

    let result = client_for(&mock_server).get_daily_candles("MSFT", 0, 3).await;
    assert!(matches!(result.unwrap_err(), Error::Malformed(_)));
}
