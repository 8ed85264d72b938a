//! Upload request/receipt and batch summary types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JobStatus, MappingErrorReason};

/// A distributor file submitted for one branch
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub branch: String,
    /// Original file name; only its extension is used
    pub filename: String,
    pub content: Vec<u8>,
    pub uploaded_by: String,
}

impl UploadRequest {
    /// Lower-cased extension of the uploaded file name, without the dot
    pub fn extension(&self) -> String {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase()
    }
}

/// Synchronous answer to an upload; resolution results come later
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub upload_batch_id: Uuid,
    pub total_row: usize,
    pub job_id: i64,
}

/// Count of error rows with one status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonCount {
    pub status: MappingErrorReason,
    pub count: i64,
}

/// Reconciliation state of one upload batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub upload_batch_id: Uuid,
    pub job_status: Option<JobStatus>,
    pub staged_rows: i64,
    pub pending_rows: i64,
    pub fact_rows: i64,
    pub error_rows: i64,
    pub errors_by_reason: Vec<ReasonCount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(filename: &str) -> UploadRequest {
        UploadRequest {
            branch: "B01".to_string(),
            filename: filename.to_string(),
            content: vec![],
            uploaded_by: "admin".to_string(),
        }
    }

    #[test]
    fn test_extension_is_lowercased() {
        assert_eq!(request("SELLOUT_MAR.XLSX").extension(), "xlsx");
        assert_eq!(request("export.2026.csv").extension(), "csv");
        assert_eq!(request("noext").extension(), "");
    }

    #[test]
    fn test_receipt_serializes_to_camel_case() {
        let receipt = UploadReceipt {
            upload_batch_id: Uuid::nil(),
            total_row: 12,
            job_id: 3,
        };
        let json = serde_json::to_string(&receipt).unwrap();
        assert!(json.contains("uploadBatchId"));
        assert!(json.contains("totalRow"));
    }
}
