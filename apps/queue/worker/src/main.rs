//! Queue Worker - Entry Point
//!
//! Sends messages to and consumes messages from a Redis stream queue.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    queue_worker::run().await
}
