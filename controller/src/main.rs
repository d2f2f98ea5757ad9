mod api;
mod host;
mod sim;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
