use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use shopfront_catalog::ProductId;
use shopfront_core::{Aggregate, AggregateId, DomainError};
use shopfront_events::{EventBus, EventEnvelope, InMemoryEventBus};
use shopfront_infra::{
    cart_service::CartService,
    checkout::CheckoutEngine,
    command_dispatcher::{CommandDispatcher, DispatchError, load_aggregate},
    event_store::{EventStore, InMemoryEventStore, PostgresEventStore, StoredEvent},
    projections::{
        catalog::{ProductCatalogProjection, ProductReadModel},
        order_history::{OrderHistoryProjection, OrderReadModel},
    },
    read_model::InMemoryReadModelStore,
};
use shopfront_orders::{Order, OrderId};

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type DynStore = Arc<dyn EventStore>;

type CatalogProjectionHandle =
    Arc<ProductCatalogProjection<Arc<InMemoryReadModelStore<ProductId, ProductReadModel>>>>;
type HistoryProjectionHandle =
    Arc<OrderHistoryProjection<Arc<InMemoryReadModelStore<OrderId, OrderReadModel>>>>;

/// Wired application services shared by all handlers.
pub struct AppServices {
    store: DynStore,
    dispatcher: CommandDispatcher<DynStore, Bus>,
    cart_service: CartService<DynStore, Bus>,
    checkout: CheckoutEngine<DynStore, Bus>,
    catalog_projection: CatalogProjectionHandle,
    history_projection: HistoryProjectionHandle,
}

impl AppServices {
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: shopfront_events::Event + Serialize + DeserializeOwned,
    {
        self.dispatcher
            .dispatch(aggregate_id, aggregate_type, command, make_aggregate)
    }

    pub fn cart(&self) -> &CartService<DynStore, Bus> {
        &self.cart_service
    }

    pub fn checkout(&self) -> &CheckoutEngine<DynStore, Bus> {
        &self.checkout
    }

    pub fn catalog(&self) -> &CatalogProjectionHandle {
        &self.catalog_projection
    }

    pub fn order_history(&self) -> &HistoryProjectionHandle {
        &self.history_projection
    }

    /// Rehydrate an order from its stream (strongly consistent, used for
    /// ownership checks before status commands).
    pub fn load_order(&self, order_id: OrderId) -> Result<Order, DispatchError> {
        let (order, _) =
            load_aggregate(&self.store, order_id.0, |id| Order::empty(OrderId::new(id)))?;
        Ok(order)
    }
}

/// Build services: event store (in-memory by default, Postgres when
/// `USE_PERSISTENT_STORE=true` and `DATABASE_URL` is set), bus, projections,
/// and the bus→projection subscriber.
pub async fn build_services() -> AppServices {
    let use_persistent = std::env::var("USE_PERSISTENT_STORE")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    let store: DynStore = if use_persistent {
        match std::env::var("DATABASE_URL") {
            Ok(url) => {
                let pool = sqlx::PgPool::connect(&url)
                    .await
                    .expect("failed to connect to DATABASE_URL");
                tracing::info!("using Postgres event store");
                Arc::new(PostgresEventStore::new(
                    pool,
                    tokio::runtime::Handle::current(),
                ))
            }
            Err(_) => {
                tracing::warn!(
                    "USE_PERSISTENT_STORE=true but DATABASE_URL not set, falling back to in-memory"
                );
                Arc::new(InMemoryEventStore::new())
            }
        }
    } else {
        Arc::new(InMemoryEventStore::new())
    };

    let bus: Bus = Arc::new(InMemoryEventBus::new());

    let catalog_projection: CatalogProjectionHandle = Arc::new(ProductCatalogProjection::new(
        Arc::new(InMemoryReadModelStore::new()),
    ));
    let history_projection: HistoryProjectionHandle = Arc::new(OrderHistoryProjection::new(
        Arc::new(InMemoryReadModelStore::new()),
    ));

    // Read models are disposable: seed them from whatever the store already
    // holds (no-op for a fresh in-memory store).
    match store.load_all() {
        Ok(stored) => {
            let envelopes: Vec<_> = stored.iter().map(|e| e.to_envelope()).collect();
            if let Err(e) = catalog_projection.rebuild_from_scratch(envelopes.clone()) {
                tracing::error!("catalog projection rebuild failed: {e}");
            }
            if let Err(e) = history_projection.rebuild_from_scratch(envelopes) {
                tracing::error!("order history projection rebuild failed: {e}");
            }
        }
        Err(e) => tracing::error!("failed to load events for projection rebuild: {e}"),
    }

    // Background subscriber: bus -> projections.
    {
        let sub = bus.subscribe();
        let catalog_projection = catalog_projection.clone();
        let history_projection = history_projection.clone();
        std::thread::spawn(move || {
            while let Ok(env) = sub.recv() {
                if let Err(e) = catalog_projection.apply_envelope(&env) {
                    tracing::error!("catalog projection failed to apply event: {e}");
                }
                if let Err(e) = history_projection.apply_envelope(&env) {
                    tracing::error!("order history projection failed to apply event: {e}");
                }
            }
        });
    }

    AppServices {
        store: store.clone(),
        dispatcher: CommandDispatcher::new(store.clone(), bus.clone()),
        cart_service: CartService::new(store.clone(), bus.clone()),
        checkout: CheckoutEngine::new(store, bus),
        catalog_projection,
        history_projection,
    }
}
