//! Replicated Map Propagation
//!
//! Pushes local updates and removals to every other data member and
//! periodically compares versions with a random peer, pulling a full snapshot
//! when behind or diverged.

use anyhow::Result;
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::protocol::{
    ENDPOINT_PUT_RECORD, ENDPOINT_REMOVE_RECORD, ENDPOINT_SNAPSHOT, ENDPOINT_VERSION,
    RemoveRecordRequest, SnapshotResponse, VersionResponse, path_for,
};
use super::record::RecordMigrationInfo;
use super::service::ReplicatedMapService;
use super::store::SyncDecision;
use crate::cluster::directory::ClusterDirectory;
use crate::cluster::types::Member;
use crate::storage::record::{MapKey, MapValue};

const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

pub struct Replicator<K, V> {
    service: Arc<ReplicatedMapService<K, V>>,
    directory: Arc<dyn ClusterDirectory>,
    http_client: reqwest::Client,
}

impl<K, V> Replicator<K, V>
where
    K: MapKey + Serialize + DeserializeOwned,
    V: MapValue + PartialEq + Serialize + DeserializeOwned,
{
    pub fn new(service: Arc<ReplicatedMapService<K, V>>, directory: Arc<dyn ClusterDirectory>) -> Arc<Self> {
        Arc::new(Self {
            service,
            directory,
            http_client: reqwest::Client::new(),
        })
    }

    fn peers(&self) -> Vec<Member> {
        let local = &self.directory.local_member().id;
        self.directory
            .list_members()
            .into_iter()
            .filter(|member| &member.id != local && member.is_data_member())
            .collect()
    }

    /// Sends `record` to every peer without waiting for answers.
    pub fn broadcast_record(&self, name: &str, record: RecordMigrationInfo<K, V>) {
        self.broadcast(ENDPOINT_PUT_RECORD, name, record);
    }

    /// Sends the removal of `key` to every peer without waiting for answers.
    pub fn broadcast_remove(&self, name: &str, key: K) {
        self.broadcast(ENDPOINT_REMOVE_RECORD, name, RemoveRecordRequest { key });
    }

    fn broadcast<B>(&self, endpoint: &'static str, name: &str, body: B)
    where
        B: Serialize + Clone + Send + 'static,
    {
        for peer in self.peers() {
            let url = format!("http://{}{}", peer.http_addr, path_for(endpoint, name));
            let client = self.http_client.clone();
            let body = body.clone();
            tokio::spawn(async move {
                let result = client
                    .post(url)
                    .json(&body)
                    .timeout(REQUEST_TIMEOUT)
                    .send()
                    .await;
                if let Err(e) = result {
                    tracing::debug!("{} to {:?} failed: {}", endpoint, peer.id, e);
                }
            });
        }
    }

    /// Compares versions with `peer` and pulls its snapshot when behind or
    /// diverged.
    pub async fn resync_from(&self, name: &str, peer: &Member) -> Result<SyncDecision> {
        let url = format!("http://{}{}", peer.http_addr, path_for(ENDPOINT_VERSION, name));
        let response = self
            .http_client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Version request failed {}", response.status()));
        }
        let peer_version: VersionResponse = response.json().await?;

        let store = self.service.get_or_create(name);
        let decision = store.sync_decision(peer_version.version, peer_version.digest);
        if decision == SyncDecision::UpToDate {
            return Ok(decision);
        }

        tracing::info!(
            "Replicated map {} at version {} differs from {:?} ({}), resynchronizing",
            name,
            store.version(),
            peer.id,
            peer_version.version
        );

        let url = format!("http://{}{}", peer.http_addr, path_for(ENDPOINT_SNAPSHOT, name));
        let response = self
            .http_client
            .get(url)
            .timeout(REQUEST_TIMEOUT * 4)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Snapshot request failed {}", response.status()));
        }
        let snapshot: SnapshotResponse<K, V> = response.json().await?;
        store.apply_snapshot(snapshot.version, snapshot.records);

        Ok(decision)
    }

    /// Every `period`, resyncs each known map against one random peer.
    pub fn start_anti_entropy(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let replicator = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;

                let peers = replicator.peers();
                if peers.is_empty() {
                    continue;
                }
                let idx = rand::thread_rng().gen_range(0..peers.len());
                let peer = &peers[idx];

                for name in replicator.service.map_names() {
                    if let Err(e) = replicator.resync_from(&name, peer).await {
                        tracing::warn!(
                            "Anti-entropy for {} with {:?} failed: {}",
                            name,
                            peer.id,
                            e
                        );
                    }
                }
            }
        })
    }
}
