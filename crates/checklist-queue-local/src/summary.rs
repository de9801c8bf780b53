use std::collections::BTreeSet;

use chrono::NaiveDate;
use checklist_queue_core::OfflineCount;
use serde::Serialize;
use serde_json::Value;

/// A day's checklist activity: what the server has plus what is still queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySummary {
    pub day: NaiveDate,
    pub rota: Option<i64>,
    pub notas: usize,
    pub paletes: usize,
    /// Distinct routes seen in the remote records, ascending.
    pub rotas: Vec<i64>,
    pub pending: OfflineCount,
}

impl DaySummary {
    pub fn build(
        day: NaiveDate,
        rota: Option<i64>,
        notas: &[Value],
        paletes: &[Value],
        pending: OfflineCount,
    ) -> Self {
        Self {
            day,
            rota,
            notas: notas.len(),
            paletes: paletes.len(),
            rotas: distinct_rotas(notas.iter().chain(paletes)),
            pending,
        }
    }
}

/// Records without an integral `numeroRota` are ignored.
fn distinct_rotas<'a>(records: impl Iterator<Item = &'a Value>) -> Vec<i64> {
    records
        .filter_map(|r| r.get("numeroRota").and_then(Value::as_i64))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl std::fmt::Display for DaySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Dia {}", self.day)?;
        if let Some(rota) = self.rota {
            write!(f, " (rota {})", rota)?;
        }
        writeln!(f)?;
        writeln!(f, "  notas:   {}", self.notas)?;
        writeln!(f, "  paletes: {}", self.paletes)?;
        let rotas: Vec<String> = self.rotas.iter().map(i64::to_string).collect();
        writeln!(f, "  rotas:   {}", if rotas.is_empty() { "-".to_string() } else { rotas.join(", ") })?;
        write!(
            f,
            "  pendentes: {} nota(s), {} palete(s)",
            self.pending.notas, self.pending.paletes
        )
    }
}
