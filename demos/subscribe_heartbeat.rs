//! 心跳订阅演示 - 登录后监听一段时间心跳再干净退出
//!
//! 用法:
//! ```bash
//! cargo run --example subscribe_heartbeat -- <config.toml>
//! ```
//! 口令可用环境变量 XAPI_PASSWORD 覆盖, 避免写进配置文件。

use std::env;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use xapi_client::{XapiClient, XapiConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("xapi_client=info,subscribe_heartbeat=info")),
        )
        .init();

    // 解析命令行参数
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("用法: {} <config.toml>", args[0]);
        std::process::exit(1);
    }
    let config = XapiConfig::from_file(&args[1])?;

    println!("==================================================");
    println!("xAPI 心跳订阅演示");
    println!("==================================================");

    let client = XapiClient::connect(config).await?;
    client.login().await?;
    println!("[OK] 登录成功");

    client.start_listening_heartbeat(30).await?;
    println!("[OK] 心跳监护已启动, 运行 60 秒...");
    tokio::time::sleep(Duration::from_secs(60)).await;

    client.stop_listening_heartbeat().await?;
    client.logout().await?;
    client.close().await?;
    println!("[OK] 会话已关闭");

    Ok(())
}
