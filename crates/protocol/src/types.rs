use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A repository as projected from the forge listing.
///
/// `description` and `language` serialize as explicit `null` when absent;
/// the mobile store distinguishes "no description" from a missing field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: u64,
    pub full_name: String,
    pub description: Option<String>,
    pub default_branch: String,
    pub language: Option<String>,
    #[serde(rename = "private")]
    pub is_private: bool,
    pub updated_at: DateTime<Utc>,
}
