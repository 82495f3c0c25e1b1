//! Typed request facade
//!
//! Wraps the [`Runtime`] value-level request API with the typed payloads
//! from [`proto`](crate::proto). A `null` response from the companion maps
//! to `None` rather than an error; the companion answers `null` when it has
//! nothing to offer.

use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::proto::{CHAR_LIMIT, CompleteParams, CompleteResult, CompleteState, MAX_NUM_RESULTS};
use crate::runtime::{Runtime, RuntimeError};

/// Keep the last `limit` characters of the text before the cursor
fn clamp_tail(text: &str, limit: usize) -> &str {
    let count = text.chars().count();
    if count <= limit {
        return text;
    }
    match text.char_indices().nth(count - limit) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Keep the first `limit` characters of the text after the cursor
fn clamp_head(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Typed view over one [`Runtime`]
pub struct Requests {
    runtime: Runtime,
}

impl Requests {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }

    /// Install (if needed) and start the companion
    pub async fn init(&self) -> Result<(), RuntimeError> {
        self.runtime.init().await
    }

    /// Request completions around a cursor position.
    ///
    /// Context larger than [`CHAR_LIMIT`] is clamped around the cursor
    /// before it crosses the pipe, and the result cap never exceeds
    /// [`MAX_NUM_RESULTS`].
    pub async fn complete(
        &self,
        mut params: CompleteParams,
    ) -> Result<Option<CompleteResult>, RuntimeError> {
        params.before = clamp_tail(&params.before, CHAR_LIMIT).to_string();
        params.after = clamp_head(&params.after, CHAR_LIMIT).to_string();
        params.max_num_results = params.max_num_results.min(MAX_NUM_RESULTS);

        let payload = json!({ "complete": params });
        self.typed_request(payload).await
    }

    /// Query the companion's reported state
    pub async fn state(&self) -> Result<Option<CompleteState>, RuntimeError> {
        self.typed_request(json!({ "state": {} })).await
    }

    /// Forward an untyped payload, for callers speaking raw JSON
    pub async fn raw(&self, payload: Value) -> Result<Value, RuntimeError> {
        self.runtime.request(payload).await
    }

    /// Tear down the companion
    pub async fn deinit(&self) {
        self.runtime.deinit().await;
    }

    async fn typed_request<R: DeserializeOwned>(
        &self,
        payload: Value,
    ) -> Result<Option<R>, RuntimeError> {
        let response = self.runtime.request(payload).await?;
        if response.is_null() {
            return Ok(None);
        }
        serde_json::from_value(response)
            .map(Some)
            .map_err(RuntimeError::Deserialize)
    }
}
