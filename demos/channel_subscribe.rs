use std::sync::Arc;
use std::time::Duration;

use dl_api_sdk::{ChannelOptions, DlClient, DlOptions, DlResult, PublishOptions};
use serde_json::{json, Value};

#[tokio::main(flavor = "current_thread")]
async fn main() -> DlResult<()> {
    let client = DlClient::new(DlOptions::from_env())?;
    let channel = client.channel("messages", ChannelOptions::default())?;

    channel
        .subscribe(
            None,
            Arc::new(|event: &str, payload: &Value| println!("{event}: {payload}")),
        )
        .await?;
    channel
        .subscribe(
            Some("state:error"),
            Arc::new(|_: &str, _: &Value| eprintln!("stream dropped, retrying")),
        )
        .await?;

    channel
        .publish("chat", json!({"text": "hello"}), PublishOptions::default())
        .await?;

    tokio::time::sleep(Duration::from_secs(30)).await;
    channel.disconnect(true).await
}
