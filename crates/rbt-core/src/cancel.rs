use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug)]
pub(crate) struct Cancelled;

pub(crate) fn cancel_requested(cancel_rx: Option<&watch::Receiver<bool>>) -> bool {
    cancel_rx.map(|rx| *rx.borrow()).unwrap_or(false)
}

/// Sleeps for `duration` unless cancellation is requested first.
pub(crate) async fn sleep_or_cancel(
    duration: Duration,
    cancel_rx: Option<&watch::Receiver<bool>>,
) -> Result<(), Cancelled> {
    if cancel_requested(cancel_rx) {
        return Err(Cancelled);
    }
    let Some(cancel_rx) = cancel_rx else {
        tokio::time::sleep(duration).await;
        return Ok(());
    };

    let mut cancel_rx = cancel_rx.clone();
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return Ok(()),
            changed = cancel_rx.changed() => {
                if changed.is_err() {
                    // Sender dropped; nobody can cancel any more.
                    (&mut sleep).await;
                    return Ok(());
                }
                if *cancel_rx.borrow() {
                    return Err(Cancelled);
                }
            }
        }
    }
}
