use tokio::sync::watch;

/// Owner side of a stop signal. Dropping the source does not stop anything;
/// only [`StopSource::stop`] does.
#[derive(Debug)]
pub struct StopSource {
    tx: watch::Sender<bool>,
}

/// Cheap, cloneable view of a [`StopSource`], checked by loops at each
/// iteration boundary.
#[derive(Debug, Clone)]
pub struct StopToken {
    rx: watch::Receiver<bool>,
}

impl StopSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> StopToken {
        StopToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for StopSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StopToken {
    /// A token that never fires.
    pub fn never() -> Self {
        StopSource::new().token()
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop was requested. Pends forever if the source was
    /// dropped without stopping.
    pub async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_wakes_waiters() {
        let source = StopSource::new();
        let mut token = source.token();
        assert!(!token.is_stopped());

        let waiter = tokio::spawn(async move {
            token.stopped().await;
            token.is_stopped()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        source.stop();
        assert!(waiter.await.unwrap());
        assert!(source.is_stopped());
    }

    #[tokio::test]
    async fn test_token_created_after_stop() {
        let source = StopSource::new();
        source.stop();
        let mut token = source.token();
        assert!(token.is_stopped());
        tokio::time::timeout(Duration::from_millis(100), token.stopped())
            .await
            .expect("already stopped token should resolve immediately");
    }

    #[tokio::test]
    async fn test_never_pends() {
        let mut token = StopToken::never();
        let res = tokio::time::timeout(Duration::from_millis(20), token.stopped()).await;
        assert!(res.is_err());
    }
}
