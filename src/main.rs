#[tokio::main]
async fn main() {
    if let Err(e) = persona_chat_lib::cli::run().await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
