use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    warmbox::cli::run().await
}
