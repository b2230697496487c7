#[tokio::main]
async fn main() -> anyhow::Result<()> {
    khaad::start_server().await
}
