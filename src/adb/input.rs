//! Text input through the ADB Keyboard IME.
//!
//! Requires ADB Keyboard to be installed on the device.
//! See: https://github.com/senzhk/ADBKeyBoard

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::device::{DeviceError, ShellTarget};

pub const ADB_KEYBOARD_IME: &str = "com.android.adbkeyboard/.AdbIME";

/// Broadcast `text` to the focused field, base64 encoded so any script survives.
pub async fn type_text(target: &ShellTarget, text: &str) -> Result<(), DeviceError> {
    let encoded = STANDARD.encode(text.as_bytes());
    target
        .exec(&["am", "broadcast", "-a", "ADB_INPUT_B64", "--es", "msg", &encoded])
        .await?;
    Ok(())
}

/// Clear the focused field.
pub async fn clear_text(target: &ShellTarget) -> Result<(), DeviceError> {
    target.exec(&["am", "broadcast", "-a", "ADB_CLEAR_TEXT"]).await?;
    Ok(())
}

/// Switch to ADB Keyboard, returning the IME to restore afterwards.
pub async fn detect_and_set_adb_keyboard(target: &ShellTarget) -> Result<String, DeviceError> {
    let output = target
        .shell(&["settings", "get", "secure", "default_input_method"])
        .await?;
    let current_ime = output.combined().trim().to_string();

    if !current_ime.contains(ADB_KEYBOARD_IME) {
        target.exec(&["ime", "set", ADB_KEYBOARD_IME]).await?;
    }

    // Warm up the keyboard
    type_text(target, "").await?;

    Ok(current_ime)
}

/// Restore the IME that was active before typing.
pub async fn restore_keyboard(target: &ShellTarget, ime: &str) -> Result<(), DeviceError> {
    if ime.is_empty() || ime.contains(ADB_KEYBOARD_IME) {
        return Ok(());
    }
    target.exec(&["ime", "set", ime]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_type_text_is_base64() {
        let runner = Arc::new(ScriptedRunner::new("adb"));
        let target = ShellTarget::new(runner.clone(), vec![], Duration::from_secs(1));

        type_text(&target, "Hello, 世界!").await.unwrap();

        let encoded = STANDARD.encode("Hello, 世界!".as_bytes());
        assert_eq!(
            runner.calls(),
            vec![format!("shell am broadcast -a ADB_INPUT_B64 --es msg {}", encoded)]
        );
    }

    #[tokio::test]
    async fn test_keyboard_switch_and_restore() {
        let runner = Arc::new(ScriptedRunner::new("adb"));
        runner.push_stdout("com.google.android.inputmethod.latin/.LatinIME\n");
        let target = ShellTarget::new(runner.clone(), vec![], Duration::from_secs(1));

        let original = detect_and_set_adb_keyboard(&target).await.unwrap();
        restore_keyboard(&target, &original).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls[1], "shell ime set com.android.adbkeyboard/.AdbIME");
        assert_eq!(calls[3], "shell ime set com.google.android.inputmethod.latin/.LatinIME");
    }

    #[tokio::test]
    async fn test_restore_skips_adb_keyboard() {
        let runner = Arc::new(ScriptedRunner::new("adb"));
        let target = ShellTarget::new(runner.clone(), vec![], Duration::from_secs(1));

        restore_keyboard(&target, ADB_KEYBOARD_IME).await.unwrap();
        restore_keyboard(&target, "").await.unwrap();
        assert!(runner.calls().is_empty());
    }
}
