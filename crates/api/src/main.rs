use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use stockledger_infra::LedgerConfig;
use stockledger_observability::LogFormat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let format = LogFormat::from_env_value(std::env::var("LOG_FORMAT").ok().as_deref());
    stockledger_observability::init_with(format);

    let config = LedgerConfig::from_env().context("invalid ledger configuration")?;
    let app = stockledger_api::app::build_app(&config)
        .await
        .context("failed to initialize ledger store")?;

    tracing::info!("reading requests from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let response = app.handle_line(&line).await;
        let mut out = serde_json::to_vec(&response).context("failed to encode response")?;
        out.push(b'\n');
        stdout.write_all(&out).await.context("failed to write stdout")?;
        stdout.flush().await?;
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}
