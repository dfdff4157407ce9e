#[tokio::main]
async fn main() {
    daemon::start(std::env::args()).await;
}
