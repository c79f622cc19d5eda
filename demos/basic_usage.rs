//! Basic usage example for Mobile Agent.

use mobile_agent::{AgentConfig, DeviceSession, ModelClient, ModelConfig, PhoneAgent, Platform, SessionOptions};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt::init();

    // Configure the model client
    // You can customize these settings based on your setup
    let model_config = ModelConfig::default()
        .with_base_url("http://localhost:8000/v1")
        .with_model_name("autoglm-phone-9b");

    // Open a session on the first ADB device
    let session = DeviceSession::open(Platform::Adb, SessionOptions::default()).await?;

    // Configure the agent
    let agent_config = AgentConfig::default()
        .with_lang("cn")        // Use Chinese prompts
        .with_max_steps(50);    // Maximum 50 steps

    // Create the agent
    let mut agent = PhoneAgent::new(
        Arc::new(session),
        Box::new(ModelClient::new(model_config)),
        agent_config,
        None,
        None,
    );

    // Run a simple task
    println!("🤖 Starting Mobile Agent...\n");

    let task = "打开微信";
    println!("📝 Task: {}\n", task);

    match agent.run(task).await {
        Ok(report) => {
            println!("\n✅ Task completed after {} steps: {}", report.step_count, report.message());
        }
        Err(e) => {
            eprintln!("\n❌ Task failed: {}", e);
        }
    }

    Ok(())
}
