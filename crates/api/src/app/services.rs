use std::{collections::BTreeSet, convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tracing::{info, warn};

use microfin_auth::{Permission, RoleDefinition, resolve_role, role_aggregate_id};
use microfin_core::{Aggregate, AggregateId, DomainError, TenantId};
use microfin_events::{EventEnvelope, InMemoryEventBus};
use microfin_infra::{
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{EventStore, InMemoryEventStore, StoredEvent},
    postings::post_derived_entries,
    projections::ReadModels,
    workers::{ProjectionWorker, WorkerHandle},
};
use microfin_tenancy::{Entitlement, Plan, Tenant, tenant_aggregate_id};

#[cfg(feature = "postgres")]
use microfin_infra::{event_store::PostgresEventStore, projections::cursor_store::PostgresCursorStore};

use crate::config::AppConfig;

/// Realtime message broadcast via SSE.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeMessage {
    pub tenant_id: TenantId,
    pub topic: String,
    pub payload: JsonValue,
}

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

type InMemoryDispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Bus>;

#[cfg(feature = "postgres")]
type PostgresDispatcher = CommandDispatcher<Arc<PostgresEventStore>, Bus>;

enum Backend {
    InMemory(InMemoryDispatcher),
    #[cfg(feature = "postgres")]
    Postgres(PostgresDispatcher),
}

/// Everything a handler needs: the command path, the read models and the
/// realtime fan-out.
pub struct AppServices {
    backend: Backend,
    read_models: Arc<ReadModels>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
    default_plan: Plan,
    _projections: WorkerHandle,
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let bus: Bus = Arc::new(InMemoryEventBus::new());

    let (backend, read_models) = if config.use_persistent_stores {
        persistent_backend(config, bus.clone()).await?
    } else {
        in_memory_backend(bus.clone())
    };
    let read_models = Arc::new(read_models);

    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(config.realtime_buffer);

    let projections = {
        let read_models = read_models.clone();
        let realtime_tx = realtime_tx.clone();
        // Durable cursor stores block on the runtime; the worker thread enters it per message.
        let runtime = tokio::runtime::Handle::try_current().ok();

        ProjectionWorker::spawn("projections", &bus, None, move |env: EventEnvelope<JsonValue>| {
            let _entered = runtime.as_ref().map(|h| h.enter());
            read_models.apply_envelope(&env)?;

            let at = env.aggregate_type();
            // lossy: nobody listening is fine
            let _ = realtime_tx.send(RealtimeMessage {
                tenant_id: env.tenant_id(),
                topic: format!("{at}.projection_updated"),
                payload: serde_json::json!({
                    "kind": "projection_update",
                    "aggregate_type": at,
                    "aggregate_id": env.aggregate_id().to_string(),
                    "sequence_number": env.sequence_number(),
                }),
            });
            Ok::<(), microfin_infra::projections::ProjectionError>(())
        })?
    };

    Ok(AppServices { backend, read_models, realtime_tx, default_plan: config.default_plan, _projections: projections })
}

fn in_memory_backend(bus: Bus) -> (Backend, ReadModels) {
    info!("using in-memory event store");
    let store = Arc::new(InMemoryEventStore::new());
    (Backend::InMemory(CommandDispatcher::new(store, bus)), ReadModels::new())
}

#[cfg(feature = "postgres")]
async fn persistent_backend(config: &AppConfig, bus: Bus) -> anyhow::Result<(Backend, ReadModels)> {
    use anyhow::Context;

    let url = config.database_url.as_deref().context("DATABASE_URL is required for persistent stores")?;
    let store = PostgresEventStore::connect(url).await.context("failed to connect to postgres")?;
    store.ensure_schema().await.context("failed to create event store schema")?;

    let cursors = Arc::new(PostgresCursorStore::new(store.pool().clone()));
    let read_models = ReadModels::new().with_cursor_store(cursors);

    let history = store.fetch_all().await.context("failed to load event history")?;
    let replayed = read_models.replay(&history).context("startup replay failed")?;
    info!(events = replayed, "read models rebuilt from postgres");

    Ok((Backend::Postgres(CommandDispatcher::new(Arc::new(store), bus)), read_models))
}

#[cfg(not(feature = "postgres"))]
async fn persistent_backend(_config: &AppConfig, bus: Bus) -> anyhow::Result<(Backend, ReadModels)> {
    warn!("USE_PERSISTENT_STORES=true but the postgres feature is not enabled; falling back to in-memory");
    Ok(in_memory_backend(bus))
}

impl AppServices {
    pub fn read_models(&self) -> &ReadModels {
        &self.read_models
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }

    /// Run a command, then post the journal entries its events imply.
    ///
    /// A posting failure does not undo the committed business events; it is
    /// logged and the entry is picked up again on the next post for the event
    /// (entry ids are derived from event ids).
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: microfin_events::Event + Serialize + DeserializeOwned,
    {
        match &self.backend {
            Backend::InMemory(d) => dispatch_and_post(d, tenant_id, aggregate_id, aggregate_type, command, make_aggregate),
            #[cfg(feature = "postgres")]
            Backend::Postgres(d) => dispatch_and_post(d, tenant_id, aggregate_id, aggregate_type, command, make_aggregate),
        }
    }

    /// Current aggregate state straight from the event store.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        match &self.backend {
            Backend::InMemory(d) => d.load(tenant_id, aggregate_id, make_aggregate),
            #[cfg(feature = "postgres")]
            Backend::Postgres(d) => d.load(tenant_id, aggregate_id, make_aggregate),
        }
    }

    /// Entitlements in force for a tenant; unregistered tenants get the default plan.
    pub fn entitlements(&self, tenant_id: TenantId) -> Result<BTreeSet<Entitlement>, DispatchError> {
        let tenant: Tenant = self.load(tenant_id, tenant_aggregate_id(tenant_id), |_, id| Tenant::empty(id))?;
        if tenant.is_registered() {
            Ok(tenant.effective_entitlements())
        } else {
            Ok(self.default_plan.entitlements().iter().copied().collect())
        }
    }

    pub fn default_plan(&self) -> Plan {
        self.default_plan
    }

    /// What `role` grants in the tenant: its own definition, else the built-in seed.
    pub fn role_permissions(&self, tenant_id: TenantId, role: &str) -> Result<Vec<Permission>, DispatchError> {
        let def: RoleDefinition = self.load(tenant_id, role_aggregate_id(role), |_, id| RoleDefinition::empty(id))?;
        Ok(resolve_role(role, def.defined.then_some(def.permissions.as_slice())))
    }
}

fn dispatch_and_post<S, A>(
    dispatcher: &CommandDispatcher<S, Bus>,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
    aggregate_type: &str,
    command: A::Command,
    make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
) -> Result<Vec<StoredEvent>, DispatchError>
where
    S: EventStore,
    A: Aggregate<Error = DomainError>,
    A::Event: microfin_events::Event + Serialize + DeserializeOwned,
{
    let committed = dispatcher.dispatch::<A>(tenant_id, aggregate_id, aggregate_type, command, make_aggregate)?;
    if let Err(err) = post_derived_entries(dispatcher, &committed) {
        warn!(tenant_id = %tenant_id, aggregate_id = %aggregate_id, error = %err, "ledger posting failed");
    }
    Ok(committed)
}

/// Build an SSE stream for a tenant (used by `/stream`).
pub fn tenant_sse_stream(
    services: Arc<AppServices>,
    tenant_id: TenantId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.tenant_id == tenant_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        // other tenants, or a lagging receiver that lost messages
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
