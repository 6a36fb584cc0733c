//! `genflow queue`: show the server's queue counters.

use genflow_core::{CancellationToken, HttpClient};

use super::print_json;

pub async fn status(client: &HttpClient, cancel: &CancellationToken) -> Result<(), String> {
    let status = client
        .get_queue_status(cancel)
        .await
        .map_err(|e| e.to_string())?;
    let value = serde_json::to_value(status).map_err(|e| e.to_string())?;
    print_json(&value);
    Ok(())
}
