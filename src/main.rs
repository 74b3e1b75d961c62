use axum::Json;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use distributed_map::cluster::directory::{ClusterDirectory, MemberList};
use distributed_map::cluster::types::{Member, NodeId};
use distributed_map::config::{MapConfig, MapStoreConfig, NodeConfig, ReplicatedMapConfig};
use distributed_map::invalidation::broadcaster::InvalidationBroadcaster;
use distributed_map::invalidation::near_cache::NearCacheRegistry;
use distributed_map::invalidation::transport::{InvalidationListener, UdpInvalidationTransport};
use distributed_map::proxy::handlers::{ObjectCatalog, handle_create, handle_objects};
use distributed_map::proxy::protocol::{ENDPOINT_CREATE, ENDPOINT_OBJECTS};
use distributed_map::replicated::handlers as replicated_handlers;
use distributed_map::replicated::protocol as replicated_protocol;
use distributed_map::replicated::record::RecordMigrationInfo;
use distributed_map::replicated::replicator::Replicator;
use distributed_map::replicated::service::ReplicatedMapService;
use distributed_map::storage::backup::NoBackups;
use distributed_map::storage::handlers::*;
use distributed_map::storage::map_store::{InMemoryMapStore, MapStore};
use distributed_map::storage::partitioner::PartitionTable;
use distributed_map::storage::protocol::*;
use distributed_map::storage::service::MapService;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

type Map = MapService<String, Value>;
type NearCaches = NearCacheRegistry<String, Value>;
type ReplicatedMaps = ReplicatedMapService<String, Value>;

const DEFAULT_MAP: &str = "default";
const WRITE_DELAY_SECONDS: u64 = 5;
const REPLICA_COUNT: usize = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = match NodeConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!(
                "Usage: {} --bind <addr:port> [--member <addr:port>]... [--lite] [--partitions <n>]",
                args[0]
            );
            eprintln!(
                "Example: {} --bind 127.0.0.1:5001 --member 127.0.0.1:5000",
                args[0]
            );
            std::process::exit(1);
        }
    };

    tracing::info!("Starting node on {}", config.bind);

    // 1. Cluster view (members are identified by their UDP address):
    let local_id = NodeId(config.bind.to_string());
    let local = if config.lite_member {
        Member::lite(local_id.clone(), config.bind)
    } else {
        Member::new(local_id.clone(), config.bind)
    };
    let members = MemberList::new(local.clone());
    for addr in &config.members {
        members.add_member(Member::new(NodeId(addr.to_string()), *addr));
    }
    let partitions =
        PartitionTable::with_members(config.partition_count, &members.list_members(), REPLICA_COUNT);

    // 2. Invalidation (UDP):
    let near_caches = NearCaches::new();
    let transport = UdpInvalidationTransport::bind(config.bind).await?;
    InvalidationListener::<String>::new(transport.socket(), near_caches.clone()).start();

    let invalidator: Arc<InvalidationBroadcaster<String>> = Arc::new(
        InvalidationBroadcaster::<String>::new(local_id.clone(), transport.clone())
            .with_local_handler(near_caches.clone()),
    );
    for member in members.list_members() {
        invalidator.register_consumer(DEFAULT_MAP, member);
    }
    near_caches.get_or_create(DEFAULT_MAP, true);

    // 3. Partitioned map with write-behind persistence:
    let map = Map::new(
        local_id.clone(),
        partitions,
        Arc::new(NoBackups),
        invalidator.clone(),
    );
    let map_config = MapConfig {
        backup_count: 0,
        near_cache_enabled: true,
        ..MapConfig::default()
    }
    .with_map_store(MapStoreConfig::write_behind(WRITE_DELAY_SECONDS));
    let store: Arc<dyn MapStore<String, Value>> = InMemoryMapStore::new();
    map.add_map(DEFAULT_MAP, map_config, Some(store));
    map.start_expiration_task(Duration::from_secs(1));

    // 4. Replicated maps:
    let replicated = ReplicatedMaps::new(ReplicatedMapConfig::default());
    let replicator = Replicator::new(replicated.clone(), members.clone());
    replicator.start_anti_entropy(Duration::from_secs(30));

    // 5. Distributed objects:
    let catalog = ObjectCatalog::new(&["map", "replicated_map"]);

    // 6. HTTP Router:
    let app = Router::new()
        .route(ENDPOINT_PUT, post(handle_map_put))
        .route(ENDPOINT_GET, get(handle_map_get))
        .route(ENDPOINT_REMOVE, post(handle_map_remove))
        .route(ENDPOINT_EVICT, post(handle_map_evict))
        .route(ENDPOINT_FLUSH, post(handle_map_flush))
        .route(ENDPOINT_SIZE, get(handle_map_size))
        .route(replicated_protocol::ENDPOINT_PUT, post(handle_replicated_put))
        .route(replicated_protocol::ENDPOINT_GET, get(handle_replicated_get))
        .route(replicated_protocol::ENDPOINT_REMOVE, post(handle_replicated_remove))
        .route(
            replicated_protocol::ENDPOINT_PUT_RECORD,
            post(handle_replicated_put_record),
        )
        .route(
            replicated_protocol::ENDPOINT_REMOVE_RECORD,
            post(handle_replicated_remove_record),
        )
        .route(replicated_protocol::ENDPOINT_VERSION, get(handle_replicated_version))
        .route(replicated_protocol::ENDPOINT_SNAPSHOT, get(handle_replicated_snapshot))
        .route(ENDPOINT_CREATE, post(handle_create))
        .route(ENDPOINT_OBJECTS, get(handle_objects))
        .layer(Extension(map.clone()))
        .layer(Extension(near_caches.clone()))
        .layer(Extension(replicated))
        .layer(Extension(replicator))
        .layer(Extension(catalog));

    // 7. Spawn stats reporter:
    let stats_map = map.clone();
    let stats_caches = near_caches.clone();
    let stats_invalidator = invalidator.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));

        loop {
            interval.tick().await;
            let size = stats_map.size(DEFAULT_MAP).await.unwrap_or(0);
            let pending = stats_map.pending_writes(DEFAULT_MAP);
            let (hits, misses) = stats_caches
                .get(DEFAULT_MAP)
                .map(|cache| cache.stats())
                .unwrap_or((0, 0));
            tracing::info!(
                "Map {}: {} local entries, {} pending writes, near cache {}/{} hits, {} invalidations sent",
                DEFAULT_MAP,
                size,
                pending,
                hits,
                hits + misses,
                stats_invalidator.messages_sent()
            );
        }
    });

    // 8. Start HTTP server:
    let http_addr = config.http_addr();
    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("Flushing pending writes before exit");
    if let Err(e) = map.flush(DEFAULT_MAP).await {
        tracing::error!("Final flush failed: {}", e);
    }
    map.shutdown();

    Ok(())
}

async fn handle_map_put(
    map: Extension<Arc<Map>>,
    name: Path<String>,
    json: Json<PutRequest>,
) -> (StatusCode, Json<MutationResponse>) {
    handle_put::<String, Value>(map, name, json).await
}

async fn handle_map_get(
    map: Extension<Arc<Map>>,
    near_caches: Extension<Arc<NearCaches>>,
    path: Path<(String, String)>,
) -> (StatusCode, Json<GetResponse>) {
    handle_get::<String, Value>(map, near_caches, path).await
}

async fn handle_map_remove(
    map: Extension<Arc<Map>>,
    name: Path<String>,
    json: Json<KeyRequest>,
) -> (StatusCode, Json<MutationResponse>) {
    handle_remove::<String, Value>(map, name, json).await
}

async fn handle_map_evict(
    map: Extension<Arc<Map>>,
    name: Path<String>,
    json: Json<KeyRequest>,
) -> (StatusCode, Json<EvictResponse>) {
    handle_evict::<String, Value>(map, name, json).await
}

async fn handle_map_flush(
    map: Extension<Arc<Map>>,
    name: Path<String>,
) -> (StatusCode, Json<FlushResponse>) {
    handle_flush::<String, Value>(map, name).await
}

async fn handle_map_size(
    map: Extension<Arc<Map>>,
    name: Path<String>,
) -> (StatusCode, Json<SizeResponse>) {
    handle_size::<String, Value>(map, name).await
}

async fn handle_replicated_put(
    service: Extension<Arc<ReplicatedMaps>>,
    replicator: Extension<Arc<Replicator<String, Value>>>,
    name: Path<String>,
    json: Json<replicated_protocol::ReplicatedPutRequest>,
) -> (StatusCode, Json<replicated_protocol::ReplicatedPutResponse>) {
    replicated_handlers::handle_put::<String, Value>(service, replicator, name, json).await
}

async fn handle_replicated_get(
    service: Extension<Arc<ReplicatedMaps>>,
    path: Path<(String, String)>,
) -> (StatusCode, Json<replicated_protocol::ReplicatedGetResponse>) {
    replicated_handlers::handle_get::<String, Value>(service, path).await
}

async fn handle_replicated_remove(
    service: Extension<Arc<ReplicatedMaps>>,
    replicator: Extension<Arc<Replicator<String, Value>>>,
    path: Path<(String, String)>,
) -> (StatusCode, Json<replicated_protocol::ReplicatedPutResponse>) {
    replicated_handlers::handle_remove::<String, Value>(service, replicator, path).await
}

async fn handle_replicated_remove_record(
    service: Extension<Arc<ReplicatedMaps>>,
    name: Path<String>,
    json: Json<replicated_protocol::RemoveRecordRequest<String>>,
) -> (StatusCode, Json<replicated_protocol::PutRecordResponse>) {
    replicated_handlers::handle_remove_record::<String, Value>(service, name, json).await
}

async fn handle_replicated_put_record(
    service: Extension<Arc<ReplicatedMaps>>,
    name: Path<String>,
    json: Json<RecordMigrationInfo<String, Value>>,
) -> (StatusCode, Json<replicated_protocol::PutRecordResponse>) {
    replicated_handlers::handle_put_record::<String, Value>(service, name, json).await
}

async fn handle_replicated_version(
    service: Extension<Arc<ReplicatedMaps>>,
    name: Path<String>,
) -> (StatusCode, Json<replicated_protocol::VersionResponse>) {
    replicated_handlers::handle_version::<String, Value>(service, name).await
}

async fn handle_replicated_snapshot(
    service: Extension<Arc<ReplicatedMaps>>,
    name: Path<String>,
) -> (StatusCode, Json<replicated_protocol::SnapshotResponse<String, Value>>) {
    replicated_handlers::handle_snapshot::<String, Value>(service, name).await
}
