use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use saferide::app::Application;
use saferide::shutdown::ShutdownManager;
use saferide_config::AppConfig;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn cli() -> Command {
    Command::new("saferide")
        .version(env!("CARGO_PKG_VERSION"))
        .about("互助出行请求调度与司机活跃度监控")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("配置文件路径，缺省时查找 config/saferide.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .global(true)
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .global(true)
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .subcommand(Command::new("serve").about("运行API服务、调度总线和活跃度轮询"))
        .subcommand(
            Command::new("transition")
                .about("执行分组的年度年级转换")
                .arg(Arg::new("group").long("group").value_name("ID").required(true)),
        )
        .subcommand(
            Command::new("transfer-role")
                .about("移交分组管理员")
                .arg(Arg::new("group").long("group").value_name("ID").required(true))
                .arg(Arg::new("from").long("from").value_name("MEMBER").required(true))
                .arg(Arg::new("to").long("to").value_name("MEMBER").required(true)),
        )
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("缺少参数 --{name}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let config = AppConfig::load(config_path).context("加载配置失败")?;

    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.observability.log_level);
    let log_format = matches
        .get_one::<String>("log-format")
        .unwrap_or(&config.observability.log_format);
    init_logging(log_level, log_format)?;

    let app = Application::new(config.clone()).await?;

    match matches.subcommand() {
        Some(("serve", _)) => serve(app).await,
        Some(("transition", sub)) => {
            let log = app.run_transition(required(sub, "group")?).await?;
            println!("{}", serde_json::to_string_pretty(&log)?);
            Ok(())
        }
        Some(("transfer-role", sub)) => {
            let log = app
                .run_role_transfer(required(sub, "group")?, required(sub, "from")?, required(sub, "to")?)
                .await?;
            println!("{}", serde_json::to_string_pretty(&log)?);
            Ok(())
        }
        Some((other, _)) => Err(anyhow::anyhow!("不支持的子命令: {other}")),
        None => Err(anyhow::anyhow!("缺少子命令")),
    }
}

async fn serve(app: Application) -> Result<()> {
    info!("启动 SafeRide 调度服务");
    let shutdown_manager = ShutdownManager::new();

    let app = Arc::new(app);
    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await?;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
        _ => return Err(anyhow::anyhow!("不支持的日志格式: {log_format}")),
    }

    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("安装SIGTERM信号处理器失败")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("安装Ctrl+C信号处理器失败")?;
                info!("收到Ctrl+C信号");
            }
            _ = terminate.recv() => info!("收到SIGTERM信号"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.context("安装Ctrl+C信号处理器失败")?;
        info!("收到Ctrl+C信号");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn test_transfer_role_arguments() {
        let matches = cli()
            .try_get_matches_from([
                "saferide",
                "--log-format",
                "json",
                "transfer-role",
                "--group",
                "g1",
                "--from",
                "a",
                "--to",
                "b",
            ])
            .unwrap();
        assert_eq!(matches.get_one::<String>("log-format").unwrap(), "json");
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "transfer-role");
        assert_eq!(required(sub, "from").unwrap(), "a");
        assert_eq!(required(sub, "to").unwrap(), "b");
    }

    #[test]
    fn test_transition_requires_group() {
        assert!(cli().try_get_matches_from(["saferide", "transition"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let matches = cli()
            .try_get_matches_from(["saferide", "serve", "--log-level", "debug"])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        assert_eq!(sub.get_one::<String>("log-level").unwrap(), "debug");
    }
}
