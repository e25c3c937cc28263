//! REST client for the scolarité backend's bulletin endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::FetchError;
use crate::models::{Bulletin, Departement, EmailPayload, Etudiant, Semestre};
use crate::source::{BulletinSource, MailDispatcher};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for one backend instance. Built once in `main` and shared by
/// reference.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// * `base_url` - e.g. `http://localhost:8080`, without the `/api` suffix.
    /// * `token` - optional bearer token sent on every request.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, base_url, token))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            token: token.filter(|token| !token.trim().is_empty()),
        }
    }

    /// Endpoint under `/api/bulletins`. Each segment is percent-encoded as a
    /// single path segment, so a `/`, `?` or `#` in a matricule stays inside it.
    pub fn bulletins_url(&self, segments: &[&str]) -> Result<reqwest::Url, FetchError> {
        if let Some(bad) = segments.iter().find(|s| matches!(s.trim(), "" | "." | "..")) {
            return Err(FetchError::InvalidPath(bad.to_string()));
        }
        let mut url = reqwest::Url::parse(&format!("{}/api/bulletins", self.base_url))
            .map_err(|err| FetchError::InvalidPath(format!("{}: {err}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| FetchError::InvalidPath(self.base_url.clone()))?
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: reqwest::Url,
        query: &[(&str, String)],
        resource: &str,
        matricule: Option<&str>,
    ) -> Result<T, FetchError> {
        tracing::debug!(%url, "GET");
        let response = self
            .authorized(self.client.get(url).query(query))
            .send()
            .await?;

        Self::parse_response(response, resource, matricule).await
    }

    // ---- private helpers ----

    async fn ensure_success(
        response: reqwest::Response,
        resource: &str,
        matricule: Option<&str>,
    ) -> Result<reqwest::Response, FetchError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            let err = FetchError::from_status(status.as_u16(), body, resource, matricule);
            tracing::warn!(status = ?err.status(), resource, "backend request failed");
            return Err(err);
        }
        Ok(response)
    }

    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
        resource: &str,
        matricule: Option<&str>,
    ) -> Result<T, FetchError> {
        let response = Self::ensure_success(response, resource, matricule).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|err| FetchError::Decode(err.to_string()))
    }
}

#[async_trait]
impl BulletinSource for ApiClient {
    async fn bulletin(&self, matricule: &str, semestre_id: i64) -> Result<Bulletin, FetchError> {
        let semestre_id = semestre_id.to_string();
        let url = self.bulletins_url(&["data", matricule, semestre_id.as_str()])?;
        self.get_json(url, &[], "bulletin", Some(matricule)).await
    }

    async fn roster(
        &self,
        departement_id: i64,
        promotion: &str,
        semestre_id: i64,
    ) -> Result<Vec<Etudiant>, FetchError> {
        let departement_id = departement_id.to_string();
        let url = self.bulletins_url(&["departement", departement_id.as_str(), promotion])?;
        let query = [("semestreId", semestre_id.to_string())];
        self.get_json(url, &query, "roster", None).await
    }

    async fn semestres(&self) -> Result<Vec<Semestre>, FetchError> {
        let url = self.bulletins_url(&["semestres"])?;
        self.get_json(url, &[], "semestres", None).await
    }

    async fn departements(&self) -> Result<Vec<Departement>, FetchError> {
        let url = self.bulletins_url(&["forselction", "departements"])?;
        self.get_json(url, &[], "departements", None).await
    }
}

#[async_trait]
impl MailDispatcher for ApiClient {
    async fn send_transcripts(&self, payloads: &[EmailPayload]) -> Result<(), FetchError> {
        let url = self.bulletins_url(&["send-emails"])?;
        tracing::info!(count = payloads.len(), %url, "dispatching transcripts by e-mail");
        let response = self
            .authorized(self.client.post(url).json(payloads))
            .send()
            .await?;

        Self::ensure_success(response, "send-emails", None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_built_under_bulletins_api() {
        let client = ApiClient::with_client(reqwest::Client::new(), "http://scolarite:8080/", None);
        assert_eq!(
            client.bulletins_url(&["data", "C19042", "5"]).unwrap().as_str(),
            "http://scolarite:8080/api/bulletins/data/C19042/5"
        );
    }

    #[test]
    fn path_values_stay_in_one_segment() {
        let client = ApiClient::with_client(reqwest::Client::new(), "http://h:8080", None);
        let url = client
            .bulletins_url(&["data", "C1/../../../admin/users?x=#top", "5"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://h:8080/api/bulletins/data/C1%2F..%2F..%2F..%2Fadmin%2Fusers%3Fx=%23top/5"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);

        let err = client.bulletins_url(&["data", "..", "5"]).unwrap_err();
        assert_matches::assert_matches!(err, FetchError::InvalidPath(_));
    }

    #[test]
    fn blank_token_is_ignored() {
        let client = ApiClient::with_client(reqwest::Client::new(), "http://x", Some("  ".into()));
        assert!(client.token.is_none());
    }

    #[tokio::test]
    async fn unreachable_backend_maps_to_connection_error() {
        // A port freed just before the request has no listener.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = ApiClient::new(format!("http://127.0.0.1:{port}"), None).unwrap();
        let err = client.bulletin("C1", 1).await.unwrap_err();
        assert_eq!(err.status(), Some(0));
    }
}
