#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    stegvault_lib::run().await
}
