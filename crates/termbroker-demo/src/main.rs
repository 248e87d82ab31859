//! Manual exercise of the broker against the real process streams.
//!
//! Two tasks compete for the console: one prompts for a password at the
//! top level, the other converses inside an exclusive subsession. Run it
//! and watch the exchanges stay un-interleaved.

use std::error::Error;
use std::time::Duration;

use termbroker::{Broker, SessionConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let broker = Broker::new();
    broker.write_line(["Hello,", "world!"]).await?;

    let ask_secret = {
        let broker = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let secret = broker.password("Secret: ").await?;
            broker.write_line([format!("Your secret is {secret}")]).await?;
            Ok::<(), termbroker::BrokerError>(())
        })
    };

    let converse = {
        let broker = broker.clone();
        tokio::spawn(async move {
            let sess = broker
                .subsession(SessionConfig {
                    autoflush: Some(true),
                    ..Default::default()
                })
                .await?;
            let scope = sess.enter()?;
            scope.write(["Hello! Are you there? Say something! "]).await?;
            let reply = scope.read_line().await?;
            if !reply.trim().is_empty() {
                scope.write_line(["Too late now. >:c"]).await?;
            }
            Ok::<(), termbroker::BrokerError>(())
        })
    };

    let (a, b) = tokio::join!(ask_secret, converse);
    a??;
    b??;
    log::debug!("demo tasks joined");
    Ok(())
}
