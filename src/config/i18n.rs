//! Localized console strings for the agent banners and the CLI.

/// UI messages structure
#[derive(Debug, Clone)]
pub struct Messages {
    pub thinking: &'static str,
    pub action: &'static str,
    pub task_completed: &'static str,
    pub done: &'static str,
    pub task_result: &'static str,
    pub max_steps_reached: &'static str,
    pub connection_failed: &'static str,
    pub connection_successful: &'static str,
}

/// Chinese messages
pub static MESSAGES_ZH: Messages = Messages {
    thinking: "思考过程",
    action: "执行动作",
    task_completed: "任务完成",
    done: "完成",
    task_result: "任务结果",
    max_steps_reached: "已达到最大步数",
    connection_failed: "连接失败",
    connection_successful: "连接成功",
};

/// English messages
pub static MESSAGES_EN: Messages = Messages {
    thinking: "Thinking",
    action: "Action",
    task_completed: "Task Completed",
    done: "Done",
    task_result: "Task Result",
    max_steps_reached: "Max steps reached",
    connection_failed: "Connection Failed",
    connection_successful: "Connection Successful",
};

/// Get UI messages by language.
///
/// # Arguments
/// * `lang` - Language code, "cn" for Chinese, "en" for English.
pub fn get_messages(lang: &str) -> &'static Messages {
    match lang {
        "en" => &MESSAGES_EN,
        _ => &MESSAGES_ZH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_messages() {
        let zh = get_messages("cn");
        assert_eq!(zh.thinking, "思考过程");

        let en = get_messages("en");
        assert_eq!(en.thinking, "Thinking");

        assert_eq!(get_messages("fr").done, "完成");
    }
}
