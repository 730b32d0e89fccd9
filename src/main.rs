#[tokio::main]
async fn main() {
    underwriter::run::run().await;
}
