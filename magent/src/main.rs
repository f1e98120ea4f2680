#[tokio::main]
async fn main() -> anyhow::Result<()> {
    magent::run_cli().await
}
