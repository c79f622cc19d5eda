//! Mobile Agent - AI-powered phone automation
//!
//! This is the CLI entry point for the mobile-agent tool.
//! Run with: cargo run --bin mobile-agent -- [options] [task]

use mobile_agent::adb::AdbConnection;
use mobile_agent::config::get_messages;
use mobile_agent::hdc::HdcConnection;
use mobile_agent::xctest::XcTestConnection;
use mobile_agent::{
    AppSettings, ConnectionManager, DeviceSession, ModelClient, PhoneAgent, Platform, RunOutcome,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage: mobile-agent [options] [task...]

Options:
  --device-type <adb|hdc|ios>   Backend to drive (default: adb)
  --device-id <id>              Target device serial / UDID
  --lang <cn|en>                Prompt and console language
  --max-steps <n>               Step budget per task
  --quiet                       Hide per-step thinking and actions
  --list-devices                List connected devices and exit
  --connect <addr>              Connect to a remote device and exit
  --disconnect [addr|all]       Disconnect a remote device (or all) and exit
  --enable-remote <port>        Switch a USB device to network mode and exit
  --pair                        Pair with an iOS device and exit
  -h, --help                    Show this help";

/// One-shot device management commands.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    ListDevices,
    Connect(String),
    Disconnect(Option<String>),
    EnableRemote(u16),
    Pair,
}

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    device_type: Option<String>,
    device_id: Option<String>,
    lang: Option<String>,
    max_steps: Option<u32>,
    quiet: bool,
    help: bool,
    command: Option<Command>,
    task: Vec<String>,
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut parsed = CliArgs::default();
    let mut iter = args.iter().peekable();

    let value = |iter: &mut std::iter::Peekable<std::slice::Iter<'_, String>>, flag: &str| {
        iter.next()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{} requires a value", flag))
    };

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => parsed.help = true,
            "--quiet" => parsed.quiet = true,
            "--device-type" => parsed.device_type = Some(value(&mut iter, arg)?),
            "--device-id" => parsed.device_id = Some(value(&mut iter, arg)?),
            "--lang" => parsed.lang = Some(value(&mut iter, arg)?),
            "--max-steps" => parsed.max_steps = Some(value(&mut iter, arg)?.parse()?),
            "--list-devices" => parsed.command = Some(Command::ListDevices),
            "--pair" => parsed.command = Some(Command::Pair),
            "--connect" => parsed.command = Some(Command::Connect(value(&mut iter, arg)?)),
            "--enable-remote" => {
                parsed.command = Some(Command::EnableRemote(value(&mut iter, arg)?.parse()?))
            }
            "--disconnect" => {
                let target = match iter.peek() {
                    Some(next) if !next.starts_with("--") => iter.next().cloned(),
                    _ => None,
                };
                parsed.command = Some(Command::Disconnect(target.filter(|t| t != "all")));
            }
            _ => parsed.task.push(arg.clone()),
        }
    }

    Ok(parsed)
}

fn connection_for(platform: Platform, settings: &AppSettings) -> Box<dyn ConnectionManager> {
    match platform {
        Platform::Adb => Box::new(AdbConnection::new()),
        Platform::Hdc => Box::new(HdcConnection::new()),
        Platform::XcTest => Box::new(XcTestConnection::new().with_wda_url(&settings.wda_url)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let cli = parse_args(&args)?;
    if cli.help {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut settings = AppSettings::load();
    settings.apply_env()?;
    if let Some(device_type) = cli.device_type {
        settings.device_type = device_type;
    }
    if let Some(device_id) = cli.device_id {
        settings.device_id = device_id;
    }
    if let Some(lang) = cli.lang {
        settings.lang = lang;
    }
    if let Some(max_steps) = cli.max_steps {
        settings.max_steps = max_steps;
    }

    let platform = settings.platform()?;
    let connection = connection_for(platform, &settings);
    let device_id = Some(settings.device_id.as_str()).filter(|id| !id.is_empty());

    if let Some(command) = cli.command {
        return run_command(command, platform, connection.as_ref(), &settings, device_id).await;
    }

    // Preflight: the backend tool must be installed before a session opens
    match connection.check_tooling().await {
        Ok(version) => tracing::info!("{}", version),
        Err(e) => {
            eprintln!("❌ {}", e);
            if let Some(hint) = e.remediation() {
                eprintln!("{}", hint);
            }
            std::process::exit(1);
        }
    }

    let model_config = settings.model_config();
    let mut agent_config = settings.agent_config();
    if cli.quiet {
        agent_config = agent_config.quiet();
    }

    println!("🤖 Mobile Agent - AI-powered Phone Automation");
    println!("================================================");
    println!("Model: {} @ {}", model_config.model_name, model_config.base_url);
    println!("Backend: {}", platform);
    println!("Language: {}", agent_config.lang);
    println!(
        "Retry: max {} attempts, {}s delay",
        model_config.max_retries, model_config.retry_delay_secs
    );
    if let Some(ref id) = agent_config.device_id {
        println!("Device: {}", id);
    }
    println!("================================================\n");

    let session = DeviceSession::open(platform, settings.session_options()).await?;
    let mut agent = PhoneAgent::new(
        Arc::new(session),
        Box::new(ModelClient::new(model_config)),
        agent_config,
        None,
        None,
    );

    if !cli.task.is_empty() {
        let task = cli.task.join(" ");
        println!("📝 Task: {}\n", task);
        run_task(&mut agent, &task, &settings.lang).await;
        return Ok(());
    }

    // Interactive mode
    println!("Interactive mode. Type your task and press Enter.");
    println!("Type 'quit' or 'exit' to exit.\n");

    let stdin = io::stdin();
    loop {
        print!("📝 Task: ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let task = line.trim();

        if task.is_empty() {
            continue;
        }

        if task == "quit" || task == "exit" {
            println!("Goodbye! 👋");
            break;
        }

        run_task(&mut agent, task, &settings.lang).await;
    }

    Ok(())
}

async fn run_task(agent: &mut PhoneAgent, task: &str, lang: &str) {
    let msgs = get_messages(lang);
    match agent.run(task).await {
        Ok(report) => match report.outcome {
            RunOutcome::Finished(message) => println!("\n✅ {}: {}\n", msgs.task_result, message),
            RunOutcome::StepBudgetExhausted { steps } => {
                println!("\n⚠️ {} ({})\n", msgs.max_steps_reached, steps)
            }
        },
        Err(e) => eprintln!("\n❌ Error: {}\n", e),
    }
}

async fn run_command(
    command: Command,
    platform: Platform,
    connection: &dyn ConnectionManager,
    settings: &AppSettings,
    device_id: Option<&str>,
) -> anyhow::Result<()> {
    let msgs = get_messages(&settings.lang);
    let report = |result: Result<String, mobile_agent::ConnectionError>| match result {
        Ok(message) => println!("✅ {}: {}", msgs.connection_successful, message),
        Err(e) => {
            eprintln!("❌ {}: {}", msgs.connection_failed, e);
            if let Some(hint) = e.remediation() {
                eprintln!("{}", hint);
            }
        }
    };

    match command {
        Command::ListDevices => {
            let devices = connection.list().await?;
            if devices.is_empty() {
                println!("No devices connected.");
            }
            for device in devices {
                println!(
                    "  ✓ {:<32} {:<10} {:?} {}{}",
                    device.device_id,
                    device.status,
                    device.connection_kind,
                    device.model.as_deref().unwrap_or(""),
                    device.os_version.map(|v| format!(" ({})", v)).unwrap_or_default()
                );
            }
        }
        Command::Connect(address) => report(connection.connect(&address).await),
        Command::Disconnect(address) => report(connection.disconnect(address.as_deref()).await),
        Command::EnableRemote(port) => {
            report(connection.enable_remote_bridge(port, device_id).await);
            if let Some(ip) = connection.device_ip(device_id).await {
                println!("You can now connect using: --connect {}:{}", ip, port);
            }
        }
        Command::Pair => {
            if platform != Platform::XcTest {
                anyhow::bail!("--pair is only available with --device-type ios");
            }
            let conn = XcTestConnection::new().with_wda_url(&settings.wda_url);
            report(conn.pair(device_id).await);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_task_words_are_collected() {
        let cli = parse_args(&args(&["--device-type", "hdc", "open", "settings"])).unwrap();
        assert_eq!(cli.device_type.as_deref(), Some("hdc"));
        assert_eq!(cli.task, vec!["open", "settings"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_disconnect_forms() {
        let all = parse_args(&args(&["--disconnect", "all"])).unwrap();
        assert_eq!(all.command, Some(Command::Disconnect(None)));

        let bare = parse_args(&args(&["--disconnect", "--quiet"])).unwrap();
        assert_eq!(bare.command, Some(Command::Disconnect(None)));
        assert!(bare.quiet);

        let one = parse_args(&args(&["--disconnect", "192.168.1.5:5555"])).unwrap();
        assert_eq!(one.command, Some(Command::Disconnect(Some("192.168.1.5:5555".into()))));
    }

    #[test]
    fn test_values_are_validated() {
        assert!(parse_args(&args(&["--connect"])).is_err());
        assert!(parse_args(&args(&["--enable-remote", "port"])).is_err());
        let cli = parse_args(&args(&["--enable-remote", "5555", "--max-steps", "10"])).unwrap();
        assert_eq!(cli.command, Some(Command::EnableRemote(5555)));
        assert_eq!(cli.max_steps, Some(10));
    }
}
