use tokio::sync::watch;

/// Resolve once the watched flag is true, or once its sender is gone
pub async fn flag_raised(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
