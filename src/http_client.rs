use anyhow::Result;
use reqwest::{header, Client};
use std::time::Duration;

/// Creates the HTTP client shared by every site flow.
/// Sends browser-like headers and keeps a session cookie store, which the
/// portals expect between paginated requests.
pub fn create_http_client(user_agent: &str, timeout: Duration) -> Result<Client> {
    let mut headers = header::HeaderMap::new();

    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        header::HeaderValue::from_static("ja,en-US;q=0.8,en;q=0.6")
    );
    headers.insert(
        header::CONNECTION,
        header::HeaderValue::from_static("keep-alive")
    );
    headers.insert(
        "Upgrade-Insecure-Requests",
        header::HeaderValue::from_static("1")
    );

    let client = Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .cookie_store(true)
        .build()?;

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_http_client_succeeds() {
        let result = create_http_client("rent-survey-test/1.0", Duration::from_secs(5));
        assert!(result.is_ok(), "Client creation should succeed");
    }

    #[test]
    fn test_http_client_with_different_user_agents() {
        let user_agents = vec![
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_5) AppleWebKit/605.1.15",
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36",
            "rent-survey/0.1 (+https://example.com/contact)",
        ];

        for ua in user_agents {
            let client = create_http_client(ua, Duration::from_secs(30));
            assert!(client.is_ok(), "Failed to create client with user agent: {}", ua);
        }
    }

    #[tokio::test]
    async fn test_http_client_sends_user_agent() {
        use wiremock::matchers::{header as header_matcher, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_matcher("user-agent", "rent-survey-test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = create_http_client("rent-survey-test/1.0", Duration::from_secs(5)).unwrap();
        let body = client.get(server.uri()).send().await.unwrap().text().await.unwrap();
        assert_eq!(body, "ok");
    }
}
