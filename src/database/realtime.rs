/// Push-style wakeups from PostgreSQL LISTEN/NOTIFY
use futures_util::{stream, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_postgres::AsyncMessage;

use crate::database::connection::{create_ssl_connector, split_ssl_params};

/// Listen on `channel` and nudge `wake` for every notification
///
/// Wakeups coalesce: if one is already pending, further notifications are
/// dropped. Returns when the connection or the receiver goes away.
pub async fn listen_for_measurements(
    database_url: &str,
    channel: &str,
    wake: mpsc::Sender<()>,
) -> Result<(), String> {
    let (clean_url, sslrootcert_path) = split_ssl_params(database_url)?;
    let connector = create_ssl_connector(&sslrootcert_path)?;

    let (client, mut connection) = tokio_postgres::connect(&clean_url, connector)
        .await
        .map_err(|e| format!("Realtime connection error: {}", e))?;

    // The connection must be polled for LISTEN itself to complete
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let driver = tokio::spawn(async move {
        let mut messages = Box::pin(stream::poll_fn(move |cx| connection.poll_message(cx)));
        while let Some(message) = messages.next().await {
            match message {
                Ok(AsyncMessage::Notification(notification)) => {
                    if notify_tx.send(notification.payload().to_string()).is_err() {
                        break;
                    }
                }
                Ok(AsyncMessage::Notice(notice)) => debug!("Realtime notice: {}", notice),
                Ok(_) => {}
                Err(e) => {
                    error!("Realtime connection error: {}", e);
                    break;
                }
            }
        }
    });

    if let Err(e) = client.batch_execute(&listen_statement(channel)).await {
        driver.abort();
        return Err(format!("LISTEN {} failed: {}", channel, e));
    }
    info!("Listening for realtime measurement updates on '{}'", channel);

    while let Some(payload) = notify_rx.recv().await {
        debug!("Realtime notification: {}", payload);
        match wake.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => break,
        }
    }

    warn!("Realtime listener on '{}' stopped", channel);
    driver.abort();
    drop(client);
    Ok(())
}

/// `LISTEN` with the channel as a quoted identifier
fn listen_statement(channel: &str) -> String {
    format!("LISTEN \"{}\"", channel.replace('"', "\"\""))
}
