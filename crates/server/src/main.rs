#[tokio::main]
async fn main() -> anyhow::Result<()> {
    notechat_server::run().await
}
