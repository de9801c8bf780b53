use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::NetworkError;
use crate::record::{Nota, Palete, QueueRecord};

/// Record as returned by the remote service after creation.
///
/// Only used for logging and user feedback, never for reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerRecord(pub serde_json::Value);

impl ServerRecord {
    /// Body used when the server accepted the record but returned no JSON.
    pub fn accepted() -> Self {
        Self(serde_json::json!({ "success": true }))
    }
}

/// Remote service that creates notas and paletes.
///
/// Both calls fail on non-2xx status, transport errors and timeouts.
#[async_trait]
pub trait SubmissionClient: Send + Sync {
    async fn create_nota(&self, nota: &Nota) -> Result<ServerRecord, NetworkError>;

    async fn create_palete(&self, palete: &Palete) -> Result<ServerRecord, NetworkError>;

    /// Dispatch on the record kind.
    async fn submit(&self, record: &QueueRecord) -> Result<ServerRecord, NetworkError> {
        match record {
            QueueRecord::Nota(nota) => self.create_nota(nota).await,
            QueueRecord::Palete(palete) => self.create_palete(palete).await,
        }
    }
}
