// Archivo: connectivity.rs
// Propósito: disparar un drenado en cada transición offline -> online.
use crate::engine::SyncEngine;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Observa un canal `watch` con el estado de red (`true` = online).
///
/// Al arrancar online, y en cada paso de offline a online, recuenta el
/// outbox y drena si hay items elegibles. Termina cuando se suelta el
/// `Sender`.
pub struct ConnectivityMonitor {
    engine: Arc<SyncEngine>,
    online: watch::Receiver<bool>,
}

impl ConnectivityMonitor {
    pub fn new(engine: Arc<SyncEngine>, online: watch::Receiver<bool>) -> Self {
        Self { engine, online }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let mut was_online = false;
        loop {
            let online = *self.online.borrow_and_update();
            if online && !was_online {
                log::info!("conectividad recuperada");
                self.trigger().await;
            } else if !online && was_online {
                log::info!("sin conectividad; drenado en pausa");
            }
            was_online = online;
            if self.online.changed().await.is_err() {
                log::debug!("monitor de conectividad detenido");
                break;
            }
        }
    }

    async fn trigger(&self) {
        match self.engine.refresh_pending().await {
            Ok(0) => log::debug!("outbox vacío; nada para drenar"),
            Ok(n) => {
                log::debug!("{} items pendientes; drenando", n);
                if let Err(e) = self.engine.drain().await {
                    log::warn!("drenado disparado por conectividad falló: {}", e);
                }
            }
            Err(e) => log::warn!("no se pudo contar el outbox: {}", e),
        }
    }
}
