//! Text entry through `uitest uiInput`.

use crate::device::{DeviceError, ShellTarget};

const KEY_ENTER: &str = "2054";
const KEY_CTRL: &str = "2072";
const KEY_A: &str = "2017";
const KEY_DELETE: &str = "2055";

/// Type into the focused field. Lines are joined with ENTER key events.
pub async fn type_text(target: &ShellTarget, text: &str) -> Result<(), DeviceError> {
    let lines: Vec<&str> = text.split('\n').collect();
    let last = lines.len() - 1;

    for (i, line) in lines.iter().enumerate() {
        if !line.is_empty() {
            let escaped = escape(line);
            target.exec(&["uitest", "uiInput", "text", &escaped]).await?;
        }
        if i < last {
            if let Err(e) = target.exec(&["uitest", "uiInput", "keyEvent", KEY_ENTER]).await {
                tracing::warn!("ENTER keyEvent failed: {}", e);
            }
        }
    }

    Ok(())
}

/// Select all, then delete.
pub async fn clear_text(target: &ShellTarget) -> Result<(), DeviceError> {
    target.exec(&["uitest", "uiInput", "keyEvent", KEY_CTRL, KEY_A]).await?;
    target.exec(&["uitest", "uiInput", "keyEvent", KEY_DELETE]).await?;
    Ok(())
}

fn escape(text: &str) -> String {
    text.replace('"', "\\\"").replace('$', "\\$")
}
