use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use microfin_core::TenantId;
use microfin_events::{EventBus, Subscription, TenantScoped};

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request shutdown and wait for the loop to exit.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!(worker = self.name, "worker thread panicked");
            }
        }
    }
}

/// Single blocking consumer of the in-process bus.
///
/// The handler must tolerate redelivery; projections do so through their
/// stream cursors. Handler failures are logged and the loop carries on.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Subscribe to `bus` and run `handler` for every message on a named thread.
    ///
    /// With `tenant_id` set, messages of other tenants are dropped.
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: &B,
        tenant_id: Option<TenantId>,
        mut handler: H,
    ) -> anyhow::Result<WorkerHandle>
    where
        M: TenantScoped + Send + 'static,
        B: EventBus<M> + ?Sized,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        // Subscribe before returning so nothing published afterwards is missed.
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, tenant_id, &mut handler))
            .with_context(|| format!("failed to spawn worker thread {name}"))?;

        info!(worker = name, "worker started");
        Ok(WorkerHandle { name, shutdown: shutdown_tx, join: Some(join) })
    }
}

fn worker_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    tenant_id: Option<TenantId>,
    handler: &mut H,
) where
    M: TenantScoped,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(100);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if tenant_id.is_some_and(|t| msg.tenant_id() != t) {
                    continue;
                }
                if let Err(err) = handler(msg) {
                    warn!(worker = name, error = ?err, "worker handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(worker = name, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use microfin_core::AggregateId;
    use microfin_events::{EventEnvelope, InMemoryEventBus};
    use uuid::Uuid;

    fn envelope(tenant_id: TenantId) -> EventEnvelope<u32> {
        EventEnvelope::new(Uuid::now_v7(), tenant_id, AggregateId::new(), "test.stream", 1, 7)
    }

    #[test]
    fn tenant_filter_drops_foreign_messages() {
        let bus = InMemoryEventBus::<EventEnvelope<u32>>::new();
        let (mine, other) = (TenantId::new(), TenantId::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let handle = ProjectionWorker::spawn("test-worker", &bus, Some(mine), move |env: EventEnvelope<u32>| {
            sink.lock().unwrap().push(env.tenant_id());
            Ok::<(), ()>(())
        })
        .unwrap();

        bus.publish(envelope(other)).unwrap();
        bus.publish(envelope(mine)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        handle.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![mine]);
    }
}
