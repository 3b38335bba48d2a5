#[tokio::main]
async fn main() -> eyre::Result<()> {
    sonde::App::new().run().await
}
