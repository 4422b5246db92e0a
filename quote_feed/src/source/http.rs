//! HTTP-транспорт источников котировок.
//!
//! Источники не обращаются к `reqwest` напрямую: запрос идёт через трейт
//! [`HttpTransport`], что позволяет подменить сеть в тестах. Коды ответа и
//! ошибки разбора приводятся к [`FeedError`] здесь же.

use crate::config::REQUEST_TIMEOUT_SECS;
use commons::errors::FeedError;
use log::debug;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// Ответ сервера: код и тело целиком.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Успешный ответ (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Блокирующий GET-запрос.
///
/// Реализация обязана ограничивать запрос по времени и возвращать
/// [`FeedError::Network`] при сбое соединения. Неуспешный код ответа
/// ошибкой транспорта не считается.
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &Url, headers: &[(&str, String)]) -> Result<HttpResponse, FeedError>;
}

/// Транспорт на `reqwest::blocking`.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Клиент с таймаутом по умолчанию.
    pub fn new() -> Result<Self, FeedError> {
        Self::with_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FeedError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("quote_feed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedError::network_err(format!("не удалось создать HTTP-клиент: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &Url, headers: &[(&str, String)]) -> Result<HttpResponse, FeedError> {
        debug!("GET {}{}", url.origin().ascii_serialization(), url.path());

        let mut request = self
            .client
            .get(url.clone())
            .header("accept", "application/json");
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        // URL может содержать ключ API: в сообщение об ошибке он не попадает.
        let response = request
            .send()
            .map_err(|e| FeedError::network_err(e.without_url().to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| FeedError::network_err(e.without_url().to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

/// Адрес метода API: базовый адрес плюс сегменты пути.
///
/// Сегменты экранируются, поэтому идентификатор символа не может изменить
/// путь запроса.
pub fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, FeedError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| FeedError::value_err(format!("некорректный базовый адрес: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Разобрать базовый адрес API.
pub fn parse_base(raw: &str) -> Result<Url, FeedError> {
    Url::parse(raw).map_err(|e| FeedError::value_err(format!("некорректный адрес {raw}: {e}")))
}

/// Привести код ответа к виду ошибки.
///
/// 429 — [`FeedError::Transient`], 401/403 — [`FeedError::Auth`],
/// 404 — [`FeedError::NotFound`], остальные не-2xx — [`FeedError::Network`].
pub fn check_status(response: HttpResponse, what: &str) -> Result<HttpResponse, FeedError> {
    match response.status {
        200..=299 => Ok(response),
        429 => Err(FeedError::transient_err(format!("{what}: HTTP 429"))),
        401 | 403 => Err(FeedError::auth_err(format!(
            "{what}: ключ API отклонён (HTTP {})",
            response.status
        ))),
        404 => Err(FeedError::not_found_err(format!("{what}: HTTP 404"))),
        status => Err(FeedError::network_err(format!("{what}: HTTP {status}"))),
    }
}

/// Разобрать тело ответа как JSON. Ошибка разбора — [`FeedError::Network`].
pub fn decode<T: DeserializeOwned>(response: &HttpResponse, what: &str) -> Result<T, FeedError> {
    serde_json::from_str(&response.body)
        .map_err(|e| FeedError::network_err(format!("{what}: некорректный ответ: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use commons::errors::FeedErrorKind;
    use serde::Deserialize;

    #[test]
    fn status_mapping() {
        let kind = |status| {
            check_status(HttpResponse::new(status, ""), "test")
                .unwrap_err()
                .kind()
        };
        assert_eq!(kind(429), FeedErrorKind::Transient);
        assert_eq!(kind(401), FeedErrorKind::Auth);
        assert_eq!(kind(403), FeedErrorKind::Auth);
        assert_eq!(kind(404), FeedErrorKind::NotFound);
        assert_eq!(kind(500), FeedErrorKind::Network);
        assert_eq!(kind(302), FeedErrorKind::Network);
        assert!(check_status(HttpResponse::new(204, ""), "test").is_ok());
    }

    #[test]
    fn endpoint_appends_escaped_segments() {
        let base = parse_base("https://api.example.com/api/v3").unwrap();
        let url = endpoint(&base, &["coins", "bitcoin"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/api/v3/coins/bitcoin");

        let sneaky = endpoint(&base, &["coins", "../global"]).unwrap();
        assert_eq!(sneaky.path(), "/api/v3/coins/..%2Fglobal");

        let trailing = parse_base("https://api.example.com/api/v3/").unwrap();
        assert_eq!(
            endpoint(&trailing, &["global"]).unwrap().path(),
            "/api/v3/global"
        );
        assert!(parse_base("not a url").is_err());
    }

    #[test]
    fn malformed_json_is_network_error() {
        #[derive(Deserialize, Debug)]
        struct Payload {
            #[allow(dead_code)]
            price: f64,
        }

        let bad = HttpResponse::new(200, "<html>gateway</html>");
        let err = decode::<Payload>(&bad, "test").unwrap_err();
        assert_eq!(err.kind(), FeedErrorKind::Network);

        let good = HttpResponse::new(200, r#"{"price": 1.5}"#);
        assert!(decode::<Payload>(&good, "test").is_ok());
    }
}
