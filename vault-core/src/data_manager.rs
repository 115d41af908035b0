//! Replication coordinator.
//!
//! Every vault acts as data manager for the names it is close to. Mutations are only committed
//! once a quorum of the close group voted for the same pending write, and churn triggers
//! `Holdings` refreshes so that new group members fetch the data they are now responsible for.

use crate::accumulator::Accumulator;
use crate::config::VaultConfig;
use crate::data::{AppendWrapper, Data, DataIdentifier, IdAndVersion, is_next_version};
use crate::error::{GetError, MutationError, Result, VaultError};
use crate::messages::{Authority, MessageId, RefreshData, RefreshPayload, Request, Response};
use crate::routing_node::RoutingNode;
use crate::routing_table::RoutingTable;
use crate::storage::ChunkStore;
use crate::xor_name::XorName;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

/// The chunk store counts as full once this percentage of its capacity is used.
pub const MAX_FULL_PERCENT: u64 = 50;
/// Entries per `Holdings` refresh, keeping each message well under the codec size limit.
pub const MAX_HOLDINGS_PER_MESSAGE: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
enum MutationKind {
    Put,
    Post,
    Delete,
    Append,
}

impl MutationKind {
    fn success(self, data_id: DataIdentifier) -> Response {
        match self {
            MutationKind::Put => Response::PutSuccess(data_id),
            MutationKind::Post => Response::PostSuccess(data_id),
            MutationKind::Delete => Response::DeleteSuccess(data_id),
            MutationKind::Append => Response::AppendSuccess(data_id),
        }
    }

    fn failure(self, data_id: DataIdentifier, error: MutationError) -> Response {
        match self {
            MutationKind::Put => Response::PutFailure { data_id, error },
            MutationKind::Post => Response::PostFailure { data_id, error },
            MutationKind::Delete => Response::DeleteFailure { data_id, error },
            MutationKind::Append => Response::AppendFailure { data_id, error },
        }
    }
}

/// A mutation waiting for the close group to agree on it.
struct PendingWrite {
    hash: u64,
    data: Data,
    timestamp: Instant,
    src: Authority,
    dst: Authority,
    message_id: MessageId,
    kind: MutationKind,
    /// Rejected writes were already answered with a failure, but are still committed if the
    /// group agrees on them.
    rejected: bool,
}

struct Cache {
    /// Chunks we are no longer responsible for, evicted when the chunk store runs full.
    unneeded_chunks: VecDeque<DataIdentifier>,
    /// Data we need, by the peers known to hold it.
    data_holders: HashMap<XorName, HashSet<IdAndVersion>>,
    /// The get we are waiting for from each peer.
    ongoing_gets: HashMap<XorName, (Instant, IdAndVersion)>,
    ongoing_gets_count: usize,
    data_holder_items_count: usize,
    logging_time: Instant,
    pending_writes: HashMap<DataIdentifier, Vec<PendingWrite>>,
    get_timeout: Duration,
    pending_write_timeout: Duration,
    status_log_interval: Duration,
}

impl Cache {
    fn new(config: &VaultConfig) -> Self {
        Self {
            unneeded_chunks: VecDeque::new(),
            data_holders: HashMap::new(),
            ongoing_gets: HashMap::new(),
            ongoing_gets_count: 0,
            data_holder_items_count: 0,
            logging_time: Instant::now(),
            pending_writes: HashMap::new(),
            get_timeout: config.get_from_holder_timeout,
            pending_write_timeout: config.pending_write_timeout,
            status_log_interval: config.status_log_interval,
        }
    }

    fn insert_into_ongoing_gets(&mut self, idle_holder: &XorName, data_idv: &IdAndVersion) {
        let _ = self
            .ongoing_gets
            .insert(*idle_holder, (Instant::now(), *data_idv));
    }

    fn handle_get_success(&mut self, src: XorName, data_id: &DataIdentifier, version: u64) {
        if let Some((timestamp, expected_idv)) = self.ongoing_gets.remove(&src) {
            if expected_idv.0 != *data_id {
                let _ = self.ongoing_gets.insert(src, (timestamp, expected_idv));
            }
        }
        for data_idvs in self.data_holders.values_mut() {
            let _ = data_idvs.remove(&(*data_id, version));
        }
    }

    fn is_expecting(&self, src: &XorName, data_id: &DataIdentifier) -> bool {
        self.ongoing_gets
            .get(src)
            .is_some_and(|(_, (expected_id, _))| expected_id == data_id)
    }

    /// Returns `false` if we were not waiting for `data_id` from `src`.
    fn handle_get_failure(&mut self, src: XorName, data_id: &DataIdentifier) -> bool {
        if let Some((timestamp, data_idv)) = self.ongoing_gets.remove(&src) {
            if data_idv.0 == *data_id {
                return true;
            }
            let _ = self.ongoing_gets.insert(src, (timestamp, data_idv));
        }
        false
    }

    /// Records `src` as a holder if some other peer is already known to hold `data_idv`.
    fn register_data_with_holder(&mut self, src: &XorName, data_idv: &IdAndVersion) -> bool {
        if self
            .data_holders
            .values()
            .any(|data_idvs| data_idvs.contains(data_idv))
        {
            let _ = self
                .data_holders
                .entry(*src)
                .or_default()
                .insert(*data_idv);
            return true;
        }
        false
    }

    fn add_records(&mut self, data_idv: IdAndVersion, holders: HashSet<XorName>) {
        for holder in holders {
            let _ = self.data_holders.entry(holder).or_default().insert(data_idv);
        }
    }

    fn is_in_unneeded(&self, data_id: &DataIdentifier) -> bool {
        self.unneeded_chunks.contains(data_id)
    }

    fn add_as_unneeded(&mut self, data_id: DataIdentifier) {
        self.unneeded_chunks.push_back(data_id);
    }

    /// Takes `data_id` off the unneeded list. Returns `true` if it was on it.
    fn reclaim_unneeded(&mut self, data_id: &DataIdentifier) -> bool {
        let before = self.unneeded_chunks.len();
        self.unneeded_chunks.retain(|id| id != data_id);
        before != self.unneeded_chunks.len()
    }

    /// All data we hold or are about to fetch, without chunks marked as unneeded.
    fn chain_records_in_cache<I>(&self, records_in_store: I) -> HashSet<IdAndVersion>
    where
        I: IntoIterator<Item = IdAndVersion>,
    {
        let mut records: HashSet<_> = self
            .data_holders
            .values()
            .flat_map(|idvs| idvs.iter().copied())
            .chain(self.ongoing_gets.values().map(|&(_, idv)| idv))
            .chain(records_in_store)
            .collect();
        for data_id in &self.unneeded_chunks {
            let _ = records.remove(&(*data_id, 0));
        }
        records
    }

    /// Takes back unneeded chunks we are responsible for again and returns how many there were.
    fn prune_unneeded_chunks(&mut self, routing_table: &RoutingTable) -> u64 {
        let before = self.unneeded_chunks.len();
        self.unneeded_chunks
            .retain(|data_id| !routing_table.is_closest(&data_id.name()));
        (before - self.unneeded_chunks.len()) as u64
    }

    fn pop_unneeded_chunk(&mut self) -> Option<DataIdentifier> {
        self.unneeded_chunks.pop_front()
    }

    /// Forgets holders that are not in the close group of the data anymore.
    fn prune_data_holders(&mut self, routing_table: &RoutingTable) {
        for (holder, data_idvs) in &mut self.data_holders {
            data_idvs.retain(|(data_id, _)| {
                routing_table
                    .other_closest_names(&data_id.name())
                    .is_some_and(|group| group.contains(holder))
            });
        }
        self.data_holders.retain(|_, data_idvs| !data_idvs.is_empty());
    }

    /// Drops gets from holders that left the close group. Returns `true` if any was dropped.
    fn prune_ongoing_gets(&mut self, routing_table: &RoutingTable) -> bool {
        let before = self.ongoing_gets.len();
        self.ongoing_gets.retain(|holder, (_, (data_id, _))| {
            routing_table
                .other_closest_names(&data_id.name())
                .is_some_and(|group| group.contains(holder))
        });
        before != self.ongoing_gets.len()
    }

    /// Picks the next get for every idle holder, at most one per data identifier.
    fn needed_data(&mut self) -> Vec<(XorName, IdAndVersion)> {
        self.data_holders.retain(|_, data_idvs| !data_idvs.is_empty());

        let timeout = self.get_timeout;
        self.ongoing_gets
            .retain(|_, (timestamp, _)| timestamp.elapsed() <= timeout);

        let mut outstanding_data_ids: HashSet<DataIdentifier> = self
            .ongoing_gets
            .values()
            .map(|&(_, (data_id, _))| data_id)
            .collect();
        let mut idle_holders: Vec<XorName> = self
            .data_holders
            .keys()
            .filter(|holder| !self.ongoing_gets.contains_key(holder))
            .copied()
            .collect();
        idle_holders.sort();

        let mut candidates = Vec::new();
        for idle_holder in idle_holders {
            let Some(data_idvs) = self.data_holders.get_mut(&idle_holder) else {
                continue;
            };
            let next = data_idvs
                .iter()
                .find(|(data_id, _)| !outstanding_data_ids.contains(data_id))
                .copied();
            if let Some(data_idv) = next {
                let _ = data_idvs.remove(&data_idv);
                let _ = outstanding_data_ids.insert(data_idv.0);
                candidates.push((idle_holder, data_idv));
            }
        }
        candidates
    }

    fn print_stats(&mut self) {
        if self.logging_time.elapsed() < self.status_log_interval {
            return;
        }
        self.logging_time = Instant::now();
        let new_og_count = self.ongoing_gets.len();
        let new_dhi_count: usize = self.data_holders.values().map(HashSet::len).sum();
        if new_og_count != self.ongoing_gets_count
            || new_dhi_count != self.data_holder_items_count
        {
            self.ongoing_gets_count = new_og_count;
            self.data_holder_items_count = new_dhi_count;
            tracing::info!(
                "Cache Stats - Expecting {} Get responses. {} entries in data_holders.",
                new_og_count,
                new_dhi_count
            );
        }
    }

    /// Removes and returns all timed out pending writes.
    fn remove_expired_writes(&mut self) -> Vec<PendingWrite> {
        let timeout = self.pending_write_timeout;
        let mut expired_writes = Vec::new();
        for writes in self.pending_writes.values_mut() {
            // Newest writes come first, so everything after the first expired one is expired too.
            if let Some(index) = writes
                .iter()
                .position(|write| write.timestamp.elapsed() > timeout)
            {
                expired_writes.extend(writes.split_off(index));
            }
        }
        self.pending_writes.retain(|_, writes| !writes.is_empty());
        expired_writes
    }

    /// Records a pending write. If it is the first accepted one for its identifier, returns the
    /// vote to send to the close group.
    fn insert_pending_write(
        &mut self,
        data: Data,
        kind: MutationKind,
        src: Authority,
        dst: Authority,
        message_id: MessageId,
        rejected: bool,
    ) -> Result<Option<RefreshData>> {
        let hash = write_hash(&data, kind)?;
        let id_and_version = data.id_and_version();

        let writes = self.pending_writes.entry(id_and_version.0).or_default();
        let vote = if !rejected && writes.iter().all(|write| write.rejected) {
            Some(RefreshData {
                id_and_version,
                hash,
            })
        } else {
            None
        };
        writes.insert(
            0,
            PendingWrite {
                hash,
                data,
                timestamp: Instant::now(),
                src,
                dst,
                message_id,
                kind,
                rejected,
            },
        );
        Ok(vote)
    }

    fn take_pending_writes(&mut self, data_id: &DataIdentifier) -> Vec<PendingWrite> {
        self.pending_writes.remove(data_id).unwrap_or_default()
    }

    fn pending_write_count(&self) -> usize {
        self.pending_writes.values().map(Vec::len).sum()
    }
}

/// Fingerprint of a pending write, identical on every group member that received the same request.
fn write_hash(data: &Data, kind: MutationKind) -> Result<u64> {
    let serialised = serde_json::to_vec(&(data, kind))?;
    let digest = Sha256::digest(&serialised);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    Ok(u64::from_be_bytes(prefix))
}

/// Counters exposed on the stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataManagerStats {
    pub immutable_data_count: u64,
    pub structured_data_count: u64,
    pub appendable_data_count: u64,
    pub client_get_requests: u64,
    pub used_space: u64,
    pub max_space: u64,
    pub pending_writes: usize,
    pub ongoing_gets: usize,
    pub unneeded_chunks: usize,
}

pub struct DataManager {
    chunk_store: ChunkStore,
    /// Holdings refreshes per data item, by sender.
    refresh_accumulator: Accumulator<IdAndVersion, XorName>,
    /// Group write votes per pending write, by sender.
    write_accumulator: Accumulator<RefreshData, XorName>,
    cache: Cache,
    immutable_data_count: u64,
    structured_data_count: u64,
    appendable_data_count: u64,
    client_get_requests: u64,
    logging_time: Instant,
    status_log_interval: Duration,
}

impl fmt::Debug for DataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats : Client Get requests received {} ; Data stored - ID {} - SD {} - AD {} - \
             total {} bytes",
            self.client_get_requests,
            self.immutable_data_count,
            self.structured_data_count,
            self.appendable_data_count,
            self.chunk_store.used_space()
        )
    }
}

impl DataManager {
    pub fn new(config: &VaultConfig) -> Result<Self> {
        let chunk_store = ChunkStore::new(config.chunk_store_root.clone(), config.max_capacity)?;

        let mut data_manager = Self {
            chunk_store,
            refresh_accumulator: Accumulator::with_duration(config.accumulator_timeout),
            write_accumulator: Accumulator::with_duration(config.accumulator_timeout),
            cache: Cache::new(config),
            immutable_data_count: 0,
            structured_data_count: 0,
            appendable_data_count: 0,
            client_get_requests: 0,
            logging_time: Instant::now(),
            status_log_interval: config.status_log_interval,
        };
        for data_id in data_manager.chunk_store.keys() {
            data_manager.count_added_data(&data_id);
        }
        Ok(data_manager)
    }

    pub async fn handle_get(
        &mut self,
        routing_node: &mut RoutingNode,
        src: Authority,
        dst: Authority,
        data_id: DataIdentifier,
        message_id: MessageId,
    ) -> Result<()> {
        if src.is_client() {
            self.client_get_requests += 1;
            self.maybe_log_status();
        }
        let response = match self.chunk_store.get(&data_id).await {
            Ok(data) => {
                tracing::trace!("As {:?} sending data {:?} to {:?}", dst, data_id, src);
                Response::GetSuccess(data)
            }
            Err(error) => {
                tracing::trace!("DM sending get_failure of {:?}: {}", data_id, error);
                Response::GetFailure {
                    data_id,
                    error: GetError::NoSuchData,
                }
            }
        };
        routing_node.send_response(dst, src, response, message_id);
        Ok(())
    }

    pub async fn handle_put(
        &mut self,
        routing_node: &mut RoutingNode,
        src: Authority,
        dst: Authority,
        data: Data,
        message_id: MessageId,
    ) -> Result<()> {
        let data_id = data.identifier();

        if !data.validate_size() {
            tracing::trace!("DM sending PutFailure for data {:?}, it exceeds the size limit.", data_id);
            let response = MutationKind::Put.failure(data_id, MutationError::DataTooLarge);
            routing_node.send_response(dst, src, response, message_id);
            return Ok(());
        }

        let mut valid = true;
        if self.chunk_store.has(&data_id) {
            if data_id.is_immutable() {
                tracing::trace!("DM sending PutSuccess for data {:?}, it already exists.", data_id);
                routing_node.send_response(dst, src, Response::PutSuccess(data_id), message_id);
                return Ok(());
            }
            // Only a deleted structured data may be put again, by its successor.
            valid = match (self.chunk_store.get(&data_id).await, &data) {
                (Ok(Data::Structured(old_data)), Data::Structured(new_data)) => {
                    old_data.deleted && is_next_version(old_data.version, new_data.version)
                }
                _ => false,
            };
            if !valid {
                tracing::trace!("DM sending PutFailure for data {:?}, it already exists.", data_id);
            }
        }

        self.clean_chunk_store().await;
        let is_full = self.chunk_store_full();

        let error = if !valid {
            Some(MutationError::DataExists)
        } else if is_full {
            Some(MutationError::NetworkFull)
        } else {
            None
        };
        if let Some(error) = error {
            routing_node.send_response(dst, src, MutationKind::Put.failure(data_id, error), message_id);
            if is_full {
                tracing::warn!("Chunk store is full, rejected put of {:?}", data_id);
                return Ok(());
            }
        }

        self.update_pending_writes(routing_node, data, MutationKind::Put, src, dst, message_id, !valid)
    }

    /// Handles a post to structured or appendable data.
    pub async fn handle_post(
        &mut self,
        routing_node: &mut RoutingNode,
        src: Authority,
        dst: Authority,
        new_data: Data,
        message_id: MessageId,
    ) -> Result<()> {
        let data_id = new_data.identifier();

        if !new_data.validate_size() {
            tracing::trace!("DM sending post_failure for data {:?}, data exceeds size limit.", data_id);
            let response = MutationKind::Post.failure(data_id, MutationError::DataTooLarge);
            routing_node.send_response(dst, src, response, message_id);
            return Ok(());
        }

        // A structured post we cannot apply is still recorded: if the group agrees on it, we
        // were the ones lagging behind.
        let mut error = None;
        let update_result = match (new_data, self.chunk_store.get(&data_id).await) {
            (Data::Structured(new_sd), Err(_)) => {
                tracing::warn!("Post operation for nonexistent data. {:?} - {:?}", data_id, message_id);
                error = Some(MutationError::NoSuchData);
                Ok(Data::Structured(new_sd))
            }
            (_, Err(_)) => Err(MutationError::NoSuchData),
            (Data::Structured(new_sd), Ok(Data::Structured(mut sd))) => {
                if sd.deleted {
                    tracing::warn!("Post operation for deleted data. {:?} - {:?}", data_id, message_id);
                    error = Some(MutationError::InvalidOperation);
                } else if sd.replace_with_other(new_sd.clone()).is_err() {
                    error = Some(MutationError::InvalidSuccessor);
                }
                Ok(Data::Structured(new_sd))
            }
            (Data::Appendable(new_ad), Ok(Data::Appendable(mut ad))) => ad
                .update_with_other(new_ad)
                .map(|()| Data::Appendable(ad)),
            (_, Ok(_)) => {
                tracing::warn!("Post operation for invalid data type. {:?} - {:?}", data_id, message_id);
                Err(MutationError::InvalidOperation)
            }
        };

        let data = match update_result {
            Ok(data) => data,
            Err(error) => {
                tracing::trace!(
                    "DM sending post_failure for: {:?} with {:?} - {:?}",
                    data_id,
                    message_id,
                    error
                );
                let response = MutationKind::Post.failure(data_id, error);
                routing_node.send_response(dst, src, response, message_id);
                return Ok(());
            }
        };

        if let Some(error) = error.clone() {
            let response = MutationKind::Post.failure(data_id, error);
            routing_node.send_response(dst, src, response, message_id);
        }
        self.update_pending_writes(
            routing_node,
            data,
            MutationKind::Post,
            src,
            dst,
            message_id,
            error.is_some(),
        )
    }

    /// The structured data in a delete request must be a valid successor of the stored one.
    pub async fn handle_delete(
        &mut self,
        routing_node: &mut RoutingNode,
        src: Authority,
        dst: Authority,
        new_data: Data,
        message_id: MessageId,
    ) -> Result<()> {
        let data_id = new_data.identifier();

        let error = match (new_data, self.chunk_store.get(&data_id).await) {
            (Data::Structured(new_sd), Ok(Data::Structured(mut data))) => {
                let error = if data.deleted {
                    Some(MutationError::InvalidOperation)
                } else if data.delete_if_valid_successor(&new_sd).is_ok() {
                    None
                } else {
                    Some(MutationError::InvalidSuccessor)
                };
                self.update_pending_writes(
                    routing_node,
                    Data::Structured(data),
                    MutationKind::Delete,
                    src,
                    dst,
                    message_id,
                    error.is_some(),
                )?;
                error
            }
            (Data::Structured(_), Err(_)) => Some(MutationError::NoSuchData),
            _ => Some(MutationError::InvalidOperation),
        };

        if let Some(error) = error {
            tracing::trace!("DM sending delete_failure for {:?}", data_id);
            let response = MutationKind::Delete.failure(data_id, error);
            routing_node.send_response(dst, src, response, message_id);
        }
        Ok(())
    }

    /// Handles a request to append an item to an appendable data.
    pub async fn handle_append(
        &mut self,
        routing_node: &mut RoutingNode,
        src: Authority,
        dst: Authority,
        wrapper: AppendWrapper,
        message_id: MessageId,
    ) -> Result<()> {
        let data_id = wrapper.identifier();

        let result = match self.chunk_store.get(&data_id).await {
            Ok(Data::Appendable(mut ad)) => {
                if ad.apply_wrapper(wrapper) {
                    let data = Data::Appendable(ad);
                    if data.validate_size() {
                        Ok(data)
                    } else {
                        tracing::trace!(
                            "DM sending append_failure for data {:?}, data exceeds size limit.",
                            data_id
                        );
                        Err(MutationError::DataTooLarge)
                    }
                } else {
                    Err(MutationError::InvalidSuccessor)
                }
            }
            Ok(_) => {
                tracing::warn!("Append operation for invalid data type. {:?} - {:?}", data_id, message_id);
                Err(MutationError::InvalidOperation)
            }
            Err(_) => Err(MutationError::NoSuchData),
        };

        match result {
            Ok(data) => self.update_pending_writes(
                routing_node,
                data,
                MutationKind::Append,
                src,
                dst,
                message_id,
                false,
            ),
            Err(error) => {
                tracing::trace!(
                    "DM sending append_failure for: {:?} with {:?} - {:?}",
                    data_id,
                    message_id,
                    error
                );
                let response = MutationKind::Append.failure(data_id, error);
                routing_node.send_response(dst, src, response, message_id);
                Ok(())
            }
        }
    }

    /// Stores data fetched from a holder, never downgrading what we already have.
    pub async fn handle_get_success(
        &mut self,
        routing_node: &mut RoutingNode,
        src: XorName,
        mut data: Data,
    ) -> Result<()> {
        let (data_id, version) = data.id_and_version();
        // Mutable data carries no proof of its content, so only take what we asked for.
        if !matches!(data_id, DataIdentifier::Immutable(_)) && !self.cache.is_expecting(&src, &data_id)
        {
            return Err(VaultError::InvalidMessage(format!(
                "unrequested GetSuccess for {:?} from {:?}",
                data_id, src
            )));
        }
        self.cache.handle_get_success(src, &data_id, version);
        self.send_gets_for_needed_data(routing_node);

        if routing_node.close_group(&data_id.name()).is_none() {
            return Ok(());
        }

        let mut got_new_data = true;
        match data_id {
            DataIdentifier::Appendable(_) => {
                if let Ok(Data::Appendable(stored)) = self.chunk_store.get(&data_id).await {
                    if stored.version > version {
                        return Ok(());
                    }
                    if stored.version == version {
                        if let Data::Appendable(received) = &mut data {
                            received.items.extend(stored.items);
                        }
                    }
                    got_new_data = false;
                }
            }
            DataIdentifier::Structured(..) => {
                if let Ok(Data::Structured(stored)) = self.chunk_store.get(&data_id).await {
                    if stored.version >= version {
                        return Ok(());
                    }
                    got_new_data = false;
                }
            }
            DataIdentifier::Immutable(_) => {
                if self.chunk_store.has(&data_id) {
                    if self.cache.reclaim_unneeded(&data_id) {
                        self.count_added_data(&data_id);
                    }
                    return Ok(());
                }
            }
        }

        self.clean_chunk_store().await;
        self.chunk_store.put(&data_id, &data).await?;
        if got_new_data {
            self.count_added_data(&data_id);
            self.maybe_log_status();
        }
        Ok(())
    }

    pub fn handle_get_failure(
        &mut self,
        routing_node: &mut RoutingNode,
        src: XorName,
        data_id: DataIdentifier,
    ) -> Result<()> {
        if !self.cache.handle_get_failure(src, &data_id) {
            return Err(VaultError::InvalidMessage(format!(
                "unexpected GetFailure for {:?} from {:?}",
                data_id, src
            )));
        }
        self.send_gets_for_needed_data(routing_node);
        Ok(())
    }

    /// Handles a `Holdings` refresh: `src` claims to hold the listed data.
    pub async fn handle_refresh(
        &mut self,
        routing_node: &mut RoutingNode,
        src: XorName,
        data_list: Vec<IdAndVersion>,
    ) -> Result<()> {
        for data_idv in data_list {
            let (data_id, version) = data_idv;
            if routing_node.close_group(&data_id.name()).is_none() {
                continue;
            }
            if self.cache.register_data_with_holder(&src, &data_idv) {
                continue;
            }
            let quorum = routing_node.routing_table().refresh_quorum(&data_id.name());
            let holders = match self.refresh_accumulator.add(data_idv, src, quorum) {
                Some(holders) => holders.clone(),
                None => continue,
            };
            self.refresh_accumulator.delete(&data_idv);

            let data_needed = match data_id {
                DataIdentifier::Immutable(_) => !self.chunk_store.has(&data_id),
                DataIdentifier::Structured(..) => match self.chunk_store.get(&data_id).await {
                    Ok(Data::Structured(sd)) => sd.version < version,
                    Ok(_) => false,
                    Err(_) => true,
                },
                DataIdentifier::Appendable(_) => match self.chunk_store.get(&data_id).await {
                    Ok(Data::Appendable(ad)) => ad.version <= version,
                    Ok(_) => false,
                    Err(_) => true,
                },
            };
            if data_needed {
                self.cache.add_records(data_idv, holders);
            }
        }
        self.send_gets_for_needed_data(routing_node);
        Ok(())
    }

    /// Handles a group member's vote to commit a pending write.
    pub async fn handle_group_write(
        &mut self,
        routing_node: &mut RoutingNode,
        src: XorName,
        refresh_data: RefreshData,
    ) -> Result<()> {
        let name = refresh_data.id_and_version.0.name();
        match routing_node.close_group(&name) {
            Some(group) if group.contains(&src) => {}
            _ => {
                tracing::debug!(
                    "Ignoring group write vote for {:?} from {:?} outside the close group",
                    refresh_data.id_and_version.0,
                    src
                );
                return Ok(());
            }
        }

        let quorum = routing_node.routing_table().group_quorum(&name);
        if self
            .write_accumulator
            .add(refresh_data, src, quorum)
            .is_none()
        {
            return Ok(());
        }
        self.write_accumulator.delete(&refresh_data);
        self.handle_group_refresh(routing_node, refresh_data).await
    }

    /// Resolves the pending writes of a data item once the group agreed on one of them.
    async fn handle_group_refresh(
        &mut self,
        routing_node: &mut RoutingNode,
        refresh_data: RefreshData,
    ) -> Result<()> {
        let RefreshData {
            id_and_version: (data_id, version),
            hash: refresh_hash,
        } = refresh_data;
        let mut success = false;

        for write in self.cache.take_pending_writes(&data_id) {
            let PendingWrite {
                hash,
                data,
                src,
                dst,
                message_id,
                kind,
                rejected,
                ..
            } = write;

            if hash == refresh_hash {
                let already_existed = self.chunk_store.has(&data_id);
                if let Err(error) = self.chunk_store.put(&data_id, &data).await {
                    tracing::warn!("DM failed to store {:?} in chunk store: {}", data_id, error);
                    let error = MutationError::NetworkOther(format!("Failed to store chunk: {}", error));
                    routing_node.send_response(dst, src, kind.failure(data_id, error), message_id);
                    continue;
                }

                tracing::trace!("DM updated for: {:?}", data_id);
                // A put over a deleted tombstone is not new data.
                if kind == MutationKind::Put && !already_existed {
                    self.count_added_data(&data_id);
                    self.maybe_log_status();
                }
                routing_node.send_response(dst, src, kind.success(data_id), message_id);
                self.send_refresh(
                    routing_node,
                    Authority::NaeManager(data_id.name()),
                    vec![(data_id, version)],
                );
                success = true;
            } else if !rejected {
                tracing::trace!("{:?} did not accumulate. Sending failure", data_id);
                let error = MutationError::NetworkOther("Concurrent modification.".to_string());
                routing_node.send_response(dst, src, kind.failure(data_id, error), message_id);
            }
        }

        if !success {
            // The group agreed on a write we never saw; fetch the result from the others.
            if let Some(group) = routing_node.close_group(&data_id.name()) {
                let our_name = routing_node.name();
                let data_idv = (data_id, version);
                let holders: HashSet<XorName> =
                    group.into_iter().filter(|name| *name != our_name).collect();
                self.cache.add_records(data_idv, holders);
                self.send_gets_for_needed_data(routing_node);
            }
        }
        Ok(())
    }

    pub async fn handle_node_added(&mut self, routing_node: &mut RoutingNode, node_name: &XorName) {
        self.cache.prune_data_holders(routing_node.routing_table());
        if self.cache.prune_ongoing_gets(routing_node.routing_table()) {
            self.send_gets_for_needed_data(routing_node);
        }

        let records = self.cache.chain_records_in_cache(self.stored_records());
        let mut has_pruned_data = false;
        let mut data_list = Vec::new();
        for (data_id, version) in records {
            match routing_node
                .routing_table()
                .other_closest_names(&data_id.name())
            {
                None => {
                    if self.chunk_store.has(&data_id) && !self.cache.is_in_unneeded(&data_id) {
                        tracing::trace!("No longer a DM for {:?}", data_id);
                        self.count_removed_data(&data_id);
                        has_pruned_data = true;
                        if data_id.is_immutable() {
                            self.cache.add_as_unneeded(data_id);
                        } else if let Err(error) = self.chunk_store.delete(&data_id).await {
                            tracing::warn!("Failed to delete {:?}: {}", data_id, error);
                        }
                    }
                }
                Some(close_group) => {
                    if close_group.contains(node_name) {
                        data_list.push((data_id, version));
                    }
                }
            }
        }

        if !data_list.is_empty() {
            self.send_refresh(routing_node, Authority::ManagedNode(*node_name), data_list);
        }
        if has_pruned_data {
            self.maybe_log_status();
        }
    }

    /// Sends `Holdings` to the vaults that replaced `node_name` in a close group.
    pub fn handle_node_lost(&mut self, routing_node: &mut RoutingNode, node_name: &XorName) {
        let reclaimed = self.cache.prune_unneeded_chunks(routing_node.routing_table());
        if reclaimed != 0 {
            self.immutable_data_count += reclaimed;
            self.maybe_log_status();
        }
        self.cache.prune_data_holders(routing_node.routing_table());
        if self.cache.prune_ongoing_gets(routing_node.routing_table()) {
            self.send_gets_for_needed_data(routing_node);
        }

        let records = self.cache.chain_records_in_cache(self.stored_records());
        let outer_index = routing_node.routing_table().group_size().saturating_sub(2);
        let mut data_lists: HashMap<XorName, Vec<IdAndVersion>> = HashMap::new();
        for data_idv in records {
            let data_name = data_idv.0.name();
            match routing_node.routing_table().other_closest_names(&data_name) {
                None => {
                    tracing::warn!(
                        "Moved out of close group of {:?} in a node lost event of {:?}",
                        data_idv.0,
                        node_name
                    );
                }
                Some(close_group) => {
                    // A group that is not full did not gain a member. Otherwise the outer member
                    // only replaced the lost node if the lost node was closer to the data.
                    if let Some(outer_node) = close_group.get(outer_index) {
                        if data_name.closer(node_name, outer_node) {
                            data_lists.entry(*outer_node).or_default().push(data_idv);
                        }
                    }
                }
            }
        }

        for (node_name, data_list) in data_lists {
            self.send_refresh(routing_node, Authority::ManagedNode(node_name), data_list);
        }
    }

    /// Expires pending writes and retries gets that timed out.
    pub fn check_timeouts(&mut self, routing_node: &mut RoutingNode) {
        self.send_expired_write_failures(routing_node);
        self.send_gets_for_needed_data(routing_node);
        self.maybe_log_status();
    }

    /// Data we are responsible for and hold, excluding chunks kept only until eviction.
    pub fn stored_names(&self) -> Vec<IdAndVersion> {
        self.stored_records()
            .into_iter()
            .filter(|(data_id, _)| !self.cache.is_in_unneeded(data_id))
            .collect()
    }

    pub fn stats(&self) -> DataManagerStats {
        DataManagerStats {
            immutable_data_count: self.immutable_data_count,
            structured_data_count: self.structured_data_count,
            appendable_data_count: self.appendable_data_count,
            client_get_requests: self.client_get_requests,
            used_space: self.chunk_store.used_space(),
            max_space: self.chunk_store.max_space(),
            pending_writes: self.cache.pending_write_count(),
            ongoing_gets: self.cache.ongoing_gets.len(),
            unneeded_chunks: self.cache.unneeded_chunks.len(),
        }
    }

    fn stored_records(&self) -> Vec<IdAndVersion> {
        self.chunk_store
            .keys()
            .into_iter()
            .filter_map(|data_id| {
                self.chunk_store
                    .version_of(&data_id)
                    .map(|version| (data_id, version))
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn update_pending_writes(
        &mut self,
        routing_node: &mut RoutingNode,
        data: Data,
        kind: MutationKind,
        src: Authority,
        dst: Authority,
        message_id: MessageId,
        rejected: bool,
    ) -> Result<()> {
        self.send_expired_write_failures(routing_node);

        let data_name = data.name();
        if let Some(refresh_data) = self
            .cache
            .insert_pending_write(data, kind, src, dst, message_id, rejected)?
        {
            tracing::trace!("DM sending refresh data to group {:?}.", data_name);
            routing_node.send_request(
                Authority::NaeManager(data_name),
                Authority::NaeManager(data_name),
                Request::Refresh(RefreshPayload::GroupWrite(refresh_data)),
                message_id,
            );
        }
        Ok(())
    }

    fn send_expired_write_failures(&mut self, routing_node: &mut RoutingNode) {
        for write in self.cache.remove_expired_writes() {
            let data_id = write.data.identifier();
            tracing::trace!("{:?} did not accumulate. Sending failure", data_id);
            let error = MutationError::NetworkOther("Request expired.".to_string());
            routing_node.send_response(
                write.dst,
                write.src,
                write.kind.failure(data_id, error),
                write.message_id,
            );
        }
    }

    fn send_gets_for_needed_data(&mut self, routing_node: &mut RoutingNode) {
        let src = Authority::ManagedNode(routing_node.name());
        for (idle_holder, data_idv) in self.cache.needed_data() {
            let Some(group) = routing_node.close_group(&data_idv.0.name()) else {
                continue;
            };
            if group.contains(&idle_holder) {
                self.cache.insert_into_ongoing_gets(&idle_holder, &data_idv);
                routing_node.send_request(
                    src,
                    Authority::ManagedNode(idle_holder),
                    Request::Get(data_idv.0),
                    MessageId::new(),
                );
            }
        }
        self.cache.print_stats();
    }

    fn send_refresh(
        &self,
        routing_node: &mut RoutingNode,
        dst: Authority,
        data_list: Vec<IdAndVersion>,
    ) {
        tracing::trace!("DM sending refresh of {} entries to {:?}.", data_list.len(), dst);
        let src = Authority::ManagedNode(routing_node.name());
        for batch in data_list.chunks(MAX_HOLDINGS_PER_MESSAGE) {
            routing_node.send_request(
                src,
                dst,
                Request::Refresh(RefreshPayload::Holdings(batch.to_vec())),
                MessageId::new(),
            );
        }
    }

    fn count_added_data(&mut self, data_id: &DataIdentifier) {
        match data_id {
            DataIdentifier::Immutable(_) => self.immutable_data_count += 1,
            DataIdentifier::Structured(..) => self.structured_data_count += 1,
            DataIdentifier::Appendable(_) => self.appendable_data_count += 1,
        }
    }

    fn count_removed_data(&mut self, data_id: &DataIdentifier) {
        let count = match data_id {
            DataIdentifier::Immutable(_) => &mut self.immutable_data_count,
            DataIdentifier::Structured(..) => &mut self.structured_data_count,
            DataIdentifier::Appendable(_) => &mut self.appendable_data_count,
        };
        *count = count.saturating_sub(1);
    }

    /// Returns whether our data uses more than `MAX_FULL_PERCENT` percent of available space.
    fn chunk_store_full(&self) -> bool {
        self.chunk_store.used_space() > (self.chunk_store.max_space() / 100) * MAX_FULL_PERCENT
    }

    /// Evicts unneeded chunks until the chunk store is not full anymore.
    async fn clean_chunk_store(&mut self) {
        while self.chunk_store_full() {
            let Some(data_id) = self.cache.pop_unneeded_chunk() else {
                break;
            };
            if let Err(error) = self.chunk_store.delete(&data_id).await {
                tracing::warn!("Failed to evict {:?}: {}", data_id, error);
            }
        }
    }

    fn maybe_log_status(&mut self) {
        if self.logging_time.elapsed() > self.status_log_interval {
            self.logging_time = Instant::now();
            tracing::info!("{:?}", self);
        }
    }
}
