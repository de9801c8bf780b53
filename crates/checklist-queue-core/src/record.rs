use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Placeholder stored when a pallet has no visible number.
pub const PALLET_WITHOUT_FLAG: &str = "sem bandeira";

/// Cargo temperature class shared by notas and paletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tipologia {
    Resfriado,
    Congelado,
    Seco,
}

/// Yes/no flag as the checklist API spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimNao {
    Sim,
    #[default]
    Nao,
}

impl From<bool> for SimNao {
    fn from(value: bool) -> Self {
        if value {
            Self::Sim
        } else {
            Self::Nao
        }
    }
}

/// A damage or discrepancy line reported on a nota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Avaria {
    pub tipo_erro: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cod_produto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc_produto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantidade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unidade_medida: Option<String>,
}

/// Delivery note inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nota {
    pub numero_rota: i64,
    pub numero_nota: i64,
    pub tipologia: Tipologia,
    pub conferido_por: String,
    pub avaria: SimNao,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub avarias: Vec<Avaria>,
}

/// Pallet inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Palete {
    pub numero_rota: i64,
    pub numero_pallet: String,
    pub tipologia: Tipologia,
    pub remontado: SimNao,
    pub conferido: SimNao,
}

impl Palete {
    /// Trim the pallet number, falling back to [`PALLET_WITHOUT_FLAG`] when blank.
    pub fn normalized(mut self) -> Self {
        let trimmed = self.numero_pallet.trim();
        self.numero_pallet = if trimmed.is_empty() {
            PALLET_WITHOUT_FLAG.to_string()
        } else {
            trimmed.to_string()
        };
        self
    }
}

/// The two record kinds the queue knows how to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Notas,
    Paletes,
}

impl RecordKind {
    /// Drain order: notas are always fully drained before paletes.
    pub const DRAIN_ORDER: [RecordKind; 2] = [RecordKind::Notas, RecordKind::Paletes];

    /// Durable store key holding this kind's pending sequence.
    pub fn storage_key(self) -> &'static str {
        match self {
            RecordKind::Notas => "offline_notas",
            RecordKind::Paletes => "offline_paletes",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Notas => write!(f, "notas"),
            RecordKind::Paletes => write!(f, "paletes"),
        }
    }
}

/// A record waiting for (or going through) remote submission.
///
/// Serializes as the bare payload object, which is both the queue's on-disk
/// element shape and the POST body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueueRecord {
    Nota(Nota),
    Palete(Palete),
}

impl QueueRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            QueueRecord::Nota(_) => RecordKind::Notas,
            QueueRecord::Palete(_) => RecordKind::Paletes,
        }
    }

    pub fn numero_rota(&self) -> i64 {
        match self {
            QueueRecord::Nota(nota) => nota.numero_rota,
            QueueRecord::Palete(palete) => palete.numero_rota,
        }
    }

    /// Short human-readable identifier for log lines.
    pub fn describe(&self) -> String {
        match self {
            QueueRecord::Nota(nota) => {
                format!("nota {} (rota {})", nota.numero_nota, nota.numero_rota)
            }
            QueueRecord::Palete(palete) => {
                format!("palete {} (rota {})", palete.numero_pallet, palete.numero_rota)
            }
        }
    }
}

impl From<Nota> for QueueRecord {
    fn from(nota: Nota) -> Self {
        QueueRecord::Nota(nota)
    }
}

impl From<Palete> for QueueRecord {
    fn from(palete: Palete) -> Self {
        QueueRecord::Palete(palete)
    }
}

/// Parse a persisted JSON array as a sequence of `kind` records.
pub fn decode_batch(kind: RecordKind, json: &str) -> Result<Vec<QueueRecord>, StorageError> {
    let parsed = match kind {
        RecordKind::Notas => serde_json::from_str::<Vec<Nota>>(json)
            .map(|notas| notas.into_iter().map(QueueRecord::Nota).collect()),
        RecordKind::Paletes => serde_json::from_str::<Vec<Palete>>(json)
            .map(|paletes| paletes.into_iter().map(QueueRecord::Palete).collect()),
    };
    parsed.map_err(|e| {
        StorageError::Serialization(format!("Failed to parse pending {}: {}", kind, e))
    })
}

/// Serialize a sequence of `kind` records as a JSON array.
pub fn encode_batch(kind: RecordKind, records: &[QueueRecord]) -> Result<String, StorageError> {
    if let Some(stray) = records.iter().find(|r| r.kind() != kind) {
        return Err(StorageError::InvalidArgument(format!(
            "Cannot store {} in the {} queue",
            stray.describe(),
            kind
        )));
    }
    serde_json::to_string(records).map_err(|e| {
        StorageError::Serialization(format!("Failed to serialize pending {}: {}", kind, e))
    })
}
