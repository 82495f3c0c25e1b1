//! Companion protocol payloads
//!
//! Typed request and response bodies exchanged with the companion binary,
//! plus the protocol-wide constants. Field names follow the companion's
//! camelCase wire format.

use serde::{Deserialize, Serialize};

/// Brand identifier the companion reports and the installer roots under
pub const BRAND_NAME: &str = "codepop";

/// Maximum number of characters of context sent around the cursor
pub const CHAR_LIMIT: usize = 100_000;

/// Maximum number of completion results requested per call
pub const MAX_NUM_RESULTS: usize = 5;

// ============================================================================
// Completion types
// ============================================================================

/// Where a completion result was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompleteOrigin {
    Cloud,
    Local,
    Lsp,
    Unknown,
}

/// Parameters for a `complete` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteParams {
    /// Absolute path of the file being edited
    pub file_name: String,

    /// Text before the cursor, truncated to [`CHAR_LIMIT`]
    pub before: String,

    /// Text after the cursor, truncated to [`CHAR_LIMIT`]
    pub after: String,

    /// Whether `before` reaches the start of the document
    pub region_includes_beginning: bool,

    /// Whether `after` reaches the end of the document
    pub region_includes_end: bool,

    /// Result cap, normally [`MAX_NUM_RESULTS`]
    pub max_num_results: usize,
}

/// One completion result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEntry {
    /// Replacement text for the region before the cursor
    pub new_prefix: String,

    /// Text after the cursor that the completion consumes
    pub old_suffix: String,

    /// Replacement text for the region after the cursor
    pub new_suffix: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<CompleteOrigin>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Response body of a `complete` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResult {
    /// The prefix the results replace
    pub old_prefix: String,

    pub results: Vec<ResultEntry>,

    /// Messages the companion wants surfaced to the user
    #[serde(default)]
    pub user_message: Vec<String>,
}

// ============================================================================
// State types
// ============================================================================

/// Response body of a `state` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteState {
    pub version: String,
    pub language: String,
    pub cloud_enabled: bool,
    pub local_enabled: bool,
    pub lsp_enabled: bool,
}

// ============================================================================
// Tests
// ============================================================================
