use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::AnalysisResult;

/// Record of a (mock) claim filed against a finished analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub claim_id: String,
    pub submitted_at: String,
    pub image_name: String,
    pub image_bytes: u64,
    pub provider: String,
    pub result: AnalysisResult,
}

impl ClaimReceipt {
    /// Fails if `result` is still a loading snapshot.
    pub fn new(
        image_name: &str,
        image_bytes: u64,
        provider: &str,
        result: AnalysisResult,
    ) -> anyhow::Result<Self> {
        if result.is_loading {
            anyhow::bail!("cannot file a claim while analysis is still running");
        }
        Ok(Self {
            claim_id: format!("claim-{}", &Uuid::new_v4().simple().to_string()[..8]),
            submitted_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            image_name: image_name.to_string(),
            image_bytes,
            provider: provider.to_string(),
            result,
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.claim_id)
    }
}

pub fn write_claim_receipt(path: &Path, receipt: &ClaimReceipt) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(receipt)?)?;
    log::info!(
        "CLAIM_WRITTEN claim_id={} path={}",
        receipt.claim_id,
        path.display()
    );
    Ok(())
}
