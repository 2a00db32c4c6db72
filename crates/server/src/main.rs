use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    taskpay_server::run().await
}
