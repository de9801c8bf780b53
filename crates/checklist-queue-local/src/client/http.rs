use std::time::Duration;

use async_trait::async_trait;
use checklist_queue_core::{NetworkError, Nota, Palete, ServerRecord, SubmissionClient};
use chrono::NaiveDate;
use reqwest::{Client as HttpClient, Response};
use serde::Serialize;
use tracing::{debug, instrument};

/// HTTP client for the checklist API.
///
/// Creates records with `POST {base}/notas` and `POST {base}/paletes`, and
/// lists a day's records with `GET {base}/notas?dia=YYYY-MM-DD[&rota=N]`.
#[derive(Debug, Clone)]
pub struct HttpSubmissionClient {
    http_client: HttpClient,
    base_url: String,
    timeout: Duration,
}

impl HttpSubmissionClient {
    /// Create a new client. `timeout` bounds every request.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client: HttpClient::new(),
            base_url,
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn map_send_error(&self, e: reqwest::Error) -> NetworkError {
        if e.is_timeout() {
            NetworkError::Timeout(self.timeout.as_millis() as u64)
        } else {
            NetworkError::Transport(e.to_string())
        }
    }

    /// Read the body and fail on non-2xx, keeping the server's message.
    async fn read_body(&self, response: Response) -> Result<String, NetworkError> {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let body = if text.is_empty() {
                format!(
                    "Erro {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("")
                )
            } else {
                text
            };
            return Err(NetworkError::from_status(status.as_u16(), body));
        }
        Ok(text)
    }

    async fn create<T: Serialize + Sync>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<ServerRecord, NetworkError> {
        let response = self
            .http_client
            .post(self.url(path))
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let text = self.read_body(response).await?;
        match serde_json::from_str(&text) {
            Ok(value) => Ok(ServerRecord(value)),
            Err(_) => {
                debug!("POST /{} returned a non-JSON body ({} bytes)", path, text.len());
                Ok(ServerRecord::accepted())
            }
        }
    }

    async fn list(
        &self,
        path: &str,
        day: NaiveDate,
        rota: Option<i64>,
    ) -> Result<Vec<serde_json::Value>, NetworkError> {
        let mut query = vec![("dia", day.format("%Y-%m-%d").to_string())];
        if let Some(rota) = rota {
            query.push(("rota", rota.to_string()));
        }

        let response = self
            .http_client
            .get(self.url(path))
            .timeout(self.timeout)
            .query(&query)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let text = self.read_body(response).await?;
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(serde_json::Value::Array(items)) => {
                debug!("GET /{} returned {} items", path, items.len());
                Ok(items)
            }
            _ => {
                debug!("GET /{} did not return an array", path);
                Ok(Vec::new())
            }
        }
    }

    /// Notas registered on `day`, optionally for a single route.
    #[instrument(skip(self), level = "debug")]
    pub async fn list_notas(
        &self,
        day: NaiveDate,
        rota: Option<i64>,
    ) -> Result<Vec<serde_json::Value>, NetworkError> {
        self.list("notas", day, rota).await
    }

    /// Paletes registered on `day`, optionally for a single route.
    #[instrument(skip(self), level = "debug")]
    pub async fn list_paletes(
        &self,
        day: NaiveDate,
        rota: Option<i64>,
    ) -> Result<Vec<serde_json::Value>, NetworkError> {
        self.list("paletes", day, rota).await
    }
}

#[async_trait]
impl SubmissionClient for HttpSubmissionClient {
    #[instrument(skip(self, nota), level = "debug", fields(numero_nota = nota.numero_nota))]
    async fn create_nota(&self, nota: &Nota) -> Result<ServerRecord, NetworkError> {
        self.create("notas", nota).await
    }

    #[instrument(skip(self, palete), level = "debug", fields(numero_pallet = %palete.numero_pallet))]
    async fn create_palete(&self, palete: &Palete) -> Result<ServerRecord, NetworkError> {
        self.create("paletes", palete).await
    }
}
