use seqbus::Message;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (publisher, broker) = seqbus::broker(2)?;

    publisher.publish("Hello").await?;
    publisher.publish("World").await?;

    // "Hello" sits at index 0, so only "World" is replayed before going live.
    let mut subscription = broker.subscribe_from(1);
    publisher.publish("Bye").await?;
    drop(publisher);

    while let Some(Message { index, payload }) = subscription.recv().await {
        println!("{index}: {payload}");
    }

    Ok(())
}
