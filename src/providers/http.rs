use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde_json::Value;

use crate::error::FetchError;

/// Send a library request and decode the JSON body, classifying failures so
/// the sync engine can tell transient ones apart.
pub async fn get_json(request: reqwest::RequestBuilder) -> Result<Value, FetchError> {
    let response = request.send().await.map_err(FetchError::from_reqwest)?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(FetchError::RateLimited { retry_after });
    }
    if !status.is_success() {
        return Err(FetchError::Rejected {
            status: status.as_u16(),
            body: response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error text".to_string()),
        });
    }

    response.json::<Value>().await.map_err(FetchError::from_reqwest)
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;

    use super::*;
    use crate::test_utils::spawn_fake_provider;

    async fn server() -> String {
        let router = Router::new()
            .route("/ok", get(|| async { axum::Json(serde_json::json!({"items": []})) }))
            .route(
                "/limited",
                get(|| async { (AxumStatus::TOO_MANY_REQUESTS, [("retry-after", "7")], "slow down") }),
            )
            .route(
                "/unavailable",
                get(|| async { (AxumStatus::SERVICE_UNAVAILABLE, "maintenance") }),
            )
            .route(
                "/forbidden",
                get(|| async { (AxumStatus::FORBIDDEN, "insufficient scope") }),
            )
            .route("/garbage", get(|| async { "not json" }));
        spawn_fake_provider(router).await
    }

    #[tokio::test]
    async fn test_status_classification() {
        let base = server().await;
        let http = reqwest::Client::new();

        let ok = get_json(http.get(format!("{base}/ok"))).await.unwrap();
        assert!(ok["items"].is_array());

        let limited = get_json(http.get(format!("{base}/limited"))).await.unwrap_err();
        assert!(matches!(
            limited,
            FetchError::RateLimited {
                retry_after: Some(d)
            } if d == Duration::from_secs(7)
        ));
        assert!(limited.is_transient());

        let unavailable = get_json(http.get(format!("{base}/unavailable")))
            .await
            .unwrap_err();
        assert!(unavailable.is_transient());

        let forbidden = get_json(http.get(format!("{base}/forbidden")))
            .await
            .unwrap_err();
        assert!(!forbidden.is_transient());

        let garbage = get_json(http.get(format!("{base}/garbage"))).await.unwrap_err();
        assert!(matches!(garbage, FetchError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_connection_failure_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = get_json(reqwest::Client::new().get(format!("http://{addr}/")))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
