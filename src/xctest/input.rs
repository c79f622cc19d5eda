//! Keyboard input over WebDriverAgent.

use serde_json::{json, Value};

use super::device::WdaClient;
use crate::device::DeviceError;

/// Keys per minute sent to `wda/keys`.
const TYPING_FREQUENCY: u32 = 60;
const MAX_BACKSPACES: usize = 100;
const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

pub(crate) async fn type_text(client: &WdaClient, text: &str) -> Result<(), DeviceError> {
    let payload = keys_payload(text);
    client.post(&client.session_url("wda/keys"), Some(&payload)).await?;
    Ok(())
}

/// Clear the focused element, falling back to a burst of backspaces.
pub(crate) async fn clear_text(client: &WdaClient) -> Result<(), DeviceError> {
    match clear_active_element(client).await {
        Ok(true) => return Ok(()),
        Ok(false) => {}
        Err(e) => tracing::debug!("element clear failed: {}", e),
    }

    let payload = json!({ "value": vec!["\u{8}"; MAX_BACKSPACES] });
    client.post(&client.session_url("wda/keys"), Some(&payload)).await?;
    Ok(())
}

async fn clear_active_element(client: &WdaClient) -> Result<bool, DeviceError> {
    let data = client.get(&client.session_url("element/active")).await?;
    let Some(element_id) = active_element_id(&data) else {
        return Ok(false);
    };

    client
        .post(&client.session_url(&format!("element/{}/clear", element_id)), None)
        .await?;
    Ok(true)
}

fn active_element_id(data: &Value) -> Option<&str> {
    let value = data.get("value")?;
    value
        .get("ELEMENT")
        .or_else(|| value.get(W3C_ELEMENT_KEY))
        .and_then(Value::as_str)
}

fn keys_payload(text: &str) -> Value {
    let keys: Vec<String> = text.chars().map(String::from).collect();
    json!({ "value": keys, "frequency": TYPING_FREQUENCY })
}
