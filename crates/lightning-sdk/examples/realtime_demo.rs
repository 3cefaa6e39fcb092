//! 实时连接演示
//!
//! 连接服务器、订阅房间、监听聊天消息，并打印连接状态

use lightning_sdk::events::handler;
use lightning_sdk::{LightningConfig, LightningSDK, LocalEvent};
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    lightning_sdk::logging::init_tracing(false);

    println!("\n🚀 实时连接演示\n");

    let config = LightningConfig::builder()
        .data_dir("/tmp/lightning_realtime_demo")
        .server_url("ws://127.0.0.1:3000/ws")
        .origin("http://127.0.0.1:3000")
        .build();

    let sdk = LightningSDK::initialize(config).await?;
    let realtime = sdk.realtime();

    realtime.on(LocalEvent::Connected, handler(|data| println!("✅ 已连接: {}", data)));
    realtime.on(LocalEvent::Disconnected, handler(|data| println!("⚠️ 连接断开: {}", data)));
    realtime.on(LocalEvent::ChatMessage, handler(|data| println!("💬 {}", data)));
    realtime.on(
        LocalEvent::MaxReconnectAttemptsReached,
        handler(|data| println!("❌ 重连次数耗尽: {}", data)),
    );

    // 未连接时订阅，连接成功后自动重放
    realtime.subscribe_room("lobby", json!({ "nickname": "demo" })).await;
    realtime.connect().await;

    sleep(Duration::from_secs(2)).await;
    let report = realtime.get_connection_status();
    println!("📊 连接状态: {}", serde_json::to_string_pretty(&report)?);

    if realtime.send_chat_message("lobby", "hello from demo", json!({})).await {
        println!("📤 消息已发送");
    } else {
        println!("📥 未连接，消息未发送");
    }

    sleep(Duration::from_secs(5)).await;
    sdk.shutdown().await?;
    println!("\n👋 演示结束");
    Ok(())
}
