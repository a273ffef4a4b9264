use std::{future::Future, time::Duration};

use {
    anyhow::{Context, Result},
    janus_client::{Connection, Gateway, GatewayOptions},
    janus_config::GatewayConfig,
    serde_json::Value,
    tracing::{info, warn},
};

async fn connect(config: &GatewayConfig) -> Result<(Gateway, Connection)> {
    Gateway::connect(&config.url, GatewayOptions::from(config))
        .await
        .with_context(|| format!("failed to connect to {}", config.url))
}

/// Drive `work` while watching the connection, so a dead connection fails
/// the command instead of leaving it waiting.
///
/// When the work fails because the connection went down, the error that
/// ended the connection is reported instead.
async fn supervise<T>(
    connection: &mut Connection,
    work: impl Future<Output = janus_client::Result<T>>,
) -> Result<T> {
    let result = tokio::select! {
        result = work => result,
        result = connection.wait() => {
            result?;
            anyhow::bail!("gateway closed the connection");
        },
    };
    match result {
        Ok(value) => Ok(value),
        Err(e) if connection.is_shutdown() => {
            connection.wait().await?;
            Err(e.into())
        },
        Err(e) => Err(e.into()),
    }
}

async fn finish(gateway: Gateway, mut connection: Connection) -> Result<()> {
    gateway.close().await?;
    connection.wait().await?;
    Ok(())
}

pub async fn info(config: &GatewayConfig) -> Result<()> {
    let (gateway, mut connection) = connect(config).await?;
    let info = supervise(&mut connection, gateway.info()).await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    finish(gateway, connection).await
}

pub async fn session(config: &GatewayConfig, duration: Option<u64>) -> Result<()> {
    let (gateway, mut connection) = connect(config).await?;
    let session = supervise(&mut connection, gateway.create()).await?;
    println!("session {}", session.id());

    let keepalive = session.start_keepalive()?;
    let hold = async move {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "cannot listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            },
        }
    };
    tokio::pin!(hold);

    loop {
        tokio::select! {
            () = &mut hold => break,
            event = session.next_event() => match event {
                Some(event) => info!(session_id = session.id(), kind = event.kind(), ?event, "session event"),
                None => anyhow::bail!("session {} ended", session.id()),
            },
            result = connection.wait() => {
                result?;
                anyhow::bail!("gateway closed the connection");
            },
        }
    }

    keepalive.stop().await?;
    supervise(&mut connection, session.destroy()).await?;
    finish(gateway, connection).await
}

pub async fn echo(
    config: &GatewayConfig,
    plugin: &str,
    body: &str,
    jsep: Option<&str>,
) -> Result<()> {
    let body: Value = serde_json::from_str(body).context("--body is not valid JSON")?;
    let jsep: Option<Value> = jsep
        .map(serde_json::from_str)
        .transpose()
        .context("--jsep is not valid JSON")?;

    let (gateway, mut connection) = connect(config).await?;
    let session = supervise(&mut connection, gateway.create()).await?;
    let handle = supervise(&mut connection, session.attach(plugin)).await?;
    info!(session_id = session.id(), handle_id = handle.id(), plugin, "attached");

    let event = supervise(&mut connection, handle.message(body, jsep)).await?;
    println!("{}", serde_json::to_string_pretty(&event)?);

    supervise(&mut connection, handle.detach()).await?;
    supervise(&mut connection, session.destroy()).await?;
    finish(gateway, connection).await
}
