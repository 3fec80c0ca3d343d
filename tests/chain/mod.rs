#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};

use waygate_core::blockchain::{
    Address, Blockchain, ChainAdapter, Error, FeePriority, LockQuery, LockRequest, LockStatus,
    LockTx, Network, RedeemRequest, RefundRequest, SwapQuery, TxStatus,
};
use waygate_core::crypto::{Secret, SecretHashAlgo};
use waygate_core::events::UpdateReceiver;
use waygate_core::machine::{RedeemPolicy, SwapStateMachine};
use waygate_core::role::SwapRole;
use waygate_core::store::{MemoryStore, SwapStore};
use waygate_core::swap::{StateFlag, StateFlags, SwapId, SwapRecord};
use waygate_core::timelock::SwapTimings;
use waygate_core::transaction::{TxId, TxLabel};

/// A transaction on the scripted chain. `signed` flips when the engine signs it and `from`
/// remembers the signer; broadcasting an unsigned transaction fails the test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTx {
    pub label: TxLabel,
    pub signed: bool,
    pub from: Option<Address>,
}

impl MockTx {
    pub fn unsigned(label: TxLabel) -> Self {
        MockTx {
            label,
            signed: false,
            from: None,
        }
    }
}

/// Build one transaction of a lock plan.
pub fn lock_tx(label: TxLabel, from: &str) -> LockTx<MockTx> {
    LockTx {
        label,
        from: Address(from.to_string()),
        tx: MockTx::unsigned(label),
    }
}

struct State {
    lock_plans: VecDeque<Result<Vec<LockTx<MockTx>>, Error>>,
    spendable: Option<Address>,
    failing_signers: HashSet<Address>,
    open_signings: HashSet<Address>,
    signing_overlaps: u32,
    reject_broadcasts: u32,
    broadcast_log: Vec<(TxLabel, TxId)>,
    tx_statuses: HashMap<TxId, VecDeque<TxStatus>>,
    default_tx_status: TxStatus,
    lock_statuses: VecDeque<LockStatus>,
    last_lock_status: LockStatus,
    revealed_secret: Option<Secret>,
    refunded: bool,
}

impl Default for State {
    fn default() -> Self {
        State {
            lock_plans: VecDeque::new(),
            spendable: None,
            failing_signers: HashSet::new(),
            open_signings: HashSet::new(),
            signing_overlaps: 0,
            reject_broadcasts: 0,
            broadcast_log: Vec::new(),
            tx_statuses: HashMap::new(),
            default_tx_status: TxStatus::Confirmed,
            lock_statuses: VecDeque::new(),
            last_lock_status: LockStatus::Missing,
            revealed_secret: None,
            refunded: false,
        }
    }
}

/// A chain adapter the tests script. Queues drive the answers: lock plans are consumed one per
/// payment, lock statuses one per watcher poll sticking to the last one, transaction statuses
/// one per poll falling back to the default, which confirms everything immediately.
pub struct MockChain {
    blockchain: Blockchain,
    state: Mutex<State>,
    sequence: AtomicU64,
}

impl MockChain {
    pub fn new(blockchain: Blockchain) -> Self {
        MockChain {
            blockchain,
            state: Mutex::new(State::default()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Queue the transactions the next payment builds.
    pub fn plan_lock(&self, txs: Vec<LockTx<MockTx>>) {
        self.state.lock().unwrap().lock_plans.push_back(Ok(txs));
    }

    /// Queue a failure for the next payment build.
    pub fn plan_lock_failure(&self, error: Error) {
        self.state.lock().unwrap().lock_plans.push_back(Err(error));
    }

    /// The address fee-paying transactions spend from. Unset, every fee lookup reports
    /// insufficient funds.
    pub fn set_spendable(&self, address: &str) {
        self.state.lock().unwrap().spendable = Some(Address(address.to_string()));
    }

    /// Make every signature with the given address fail.
    pub fn fail_signing_for(&self, address: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_signers
            .insert(Address(address.to_string()));
    }

    /// Reject the next broadcast with a node error.
    pub fn reject_next_broadcast(&self) {
        self.state.lock().unwrap().reject_broadcasts += 1;
    }

    /// Everything broadcast so far, in order.
    pub fn broadcasts(&self) -> Vec<(TxLabel, TxId)> {
        self.state.lock().unwrap().broadcast_log.clone()
    }

    pub fn broadcast_labels(&self) -> Vec<TxLabel> {
        self.broadcasts().into_iter().map(|(label, _)| label).collect()
    }

    /// How many times a signature was requested while another signed transaction of the same
    /// address still waited for its broadcast.
    pub fn signing_overlaps(&self) -> u32 {
        self.state.lock().unwrap().signing_overlaps
    }

    /// Script the confirmation polls of one transaction; exhausted, polls fall back to the
    /// chain default.
    pub fn script_tx_statuses(&self, id: TxId, statuses: Vec<TxStatus>) {
        self.state
            .lock()
            .unwrap()
            .tx_statuses
            .insert(id, statuses.into());
    }

    pub fn set_default_tx_status(&self, status: TxStatus) {
        self.state.lock().unwrap().default_tx_status = status;
    }

    /// Script the lock watcher polls. The last status sticks once the queue is exhausted.
    pub fn script_lock_statuses(&self, statuses: Vec<LockStatus>) {
        self.state
            .lock()
            .unwrap()
            .lock_statuses
            .extend(statuses);
    }

    /// Make the redeem of the watched lock visible, revealing its secret.
    pub fn reveal_secret(&self, secret: Secret) {
        self.state.lock().unwrap().revealed_secret = Some(secret);
    }

    /// Make the watched lock refunded.
    pub fn set_refunded(&self) {
        self.state.lock().unwrap().refunded = true;
    }

    fn next_tx_id(&self) -> TxId {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        TxId(format!("{}-tx-{}", self.blockchain, n))
    }
}

#[async_trait]
impl ChainAdapter for MockChain {
    type Tx = MockTx;

    fn blockchain(&self) -> Blockchain {
        self.blockchain
    }

    async fn build_lock_txs(&self, _request: &LockRequest) -> Result<Vec<LockTx<MockTx>>, Error> {
        self.state
            .lock()
            .unwrap()
            .lock_plans
            .pop_front()
            .unwrap_or_else(|| Ok(vec![]))
    }

    async fn build_redeem_tx(&self, _request: &RedeemRequest) -> Result<MockTx, Error> {
        Ok(MockTx::unsigned(TxLabel::Redeem))
    }

    async fn build_refund_tx(&self, _request: &RefundRequest) -> Result<MockTx, Error> {
        Ok(MockTx::unsigned(TxLabel::Refund))
    }

    async fn sign(&self, tx: &mut MockTx, from: &Address) -> Result<(), Error> {
        {
            let mut state = self.state.lock().unwrap();
            if state.failing_signers.contains(from) {
                return Err(Error::SigningRejected(from.clone()));
            }
            if !state.open_signings.insert(from.clone()) {
                state.signing_overlaps += 1;
            }
        }
        // Keep the signature window open across a yield, overlapping windows must be observable.
        sleep(Duration::from_millis(1)).await;
        tx.signed = true;
        tx.from = Some(from.clone());
        Ok(())
    }

    async fn broadcast(&self, tx: &MockTx) -> Result<TxId, Error> {
        assert!(tx.signed, "broadcast of an unsigned transaction");
        let mut state = self.state.lock().unwrap();
        if let Some(from) = tx.from.as_ref() {
            state.open_signings.remove(from);
        }
        if state.reject_broadcasts > 0 {
            state.reject_broadcasts -= 1;
            return Err(Error::BroadcastFailed("rejected by the node".to_string()));
        }
        let id = self.next_tx_id();
        state.broadcast_log.push((tx.label, id.clone()));
        Ok(id)
    }

    async fn tx_status(&self, id: &TxId) -> Result<TxStatus, Error> {
        let mut state = self.state.lock().unwrap();
        let scripted = state
            .tx_statuses
            .get_mut(id)
            .and_then(|queue| queue.pop_front());
        Ok(scripted.unwrap_or(state.default_tx_status))
    }

    async fn lock_status(&self, _query: &LockQuery) -> Result<LockStatus, Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.lock_statuses.pop_front() {
            state.last_lock_status = status;
        }
        Ok(state.last_lock_status.clone())
    }

    async fn redeemed_secret(&self, _query: &SwapQuery) -> Result<Option<Secret>, Error> {
        Ok(self.state.lock().unwrap().revealed_secret)
    }

    async fn is_refunded(&self, _query: &SwapQuery) -> Result<bool, Error> {
        Ok(self.state.lock().unwrap().refunded)
    }

    async fn spendable_address(
        &self,
        min_balance: u64,
        _priority: FeePriority,
    ) -> Result<Address, Error> {
        self.state
            .lock()
            .unwrap()
            .spendable
            .clone()
            .ok_or(Error::InsufficientFunds {
                needed: min_balance,
                available: 0,
            })
    }

    async fn find_locks(&self, _query: &SwapQuery) -> Result<Vec<MockTx>, Error> {
        Ok(vec![])
    }

    async fn find_additional_locks(&self, _query: &SwapQuery) -> Result<Vec<MockTx>, Error> {
        Ok(vec![])
    }

    async fn find_redeems(&self, _query: &SwapQuery) -> Result<Vec<MockTx>, Error> {
        Ok(vec![])
    }

    async fn find_refunds(&self, _query: &SwapQuery) -> Result<Vec<MockTx>, Error> {
        Ok(vec![])
    }
}

/// The fixed preimage of every test swap.
pub fn test_secret() -> Secret {
    Secret::from_bytes([42u8; 32])
}

/// The default timings with polls fast enough for tests.
pub fn fast_timings() -> SwapTimings {
    SwapTimings {
        poll_interval: Duration::from_millis(10),
        ..SwapTimings::default()
    }
}

/// A record between Ethereum and Tezos under the fixed test secret. The secret holder carries
/// the preimage, the counterparty starts without it.
pub fn test_record(swap_id: SwapId, role: SwapRole) -> SwapRecord {
    let secret = test_secret();
    let hash_algo = SecretHashAlgo::Sha256;
    let held = if role.holds_secret() {
        Some(secret)
    } else {
        None
    };
    SwapRecord {
        swap_id,
        role,
        blockchain: Blockchain::Ethereum,
        party_blockchain: Blockchain::Tezos,
        network: Network::Testnet,
        hash_algo,
        secret_hash: hash_algo.hash(&secret),
        secret: held,
        created_at: chrono::Utc::now(),
        to_address: Address("tz1-receive".to_string()),
        party_address: Address("0x-party".to_string()),
        refund_address: Address("0x-refund".to_string()),
        party_refund_address: Address("tz1-refund".to_string()),
        amount: 100_000,
        party_amount: 250_000,
        reward_for_redeem: 0,
        party_reward_for_redeem: 0,
        state: StateFlags::empty(),
        payment_tx: None,
        redeem_tx: None,
        refund_tx: None,
    }
}

/// One engine over two scripted chains and a fresh in-memory store.
pub struct Setup {
    pub machine: SwapStateMachine<MockChain, MockChain>,
    pub updates: UpdateReceiver,
    pub own: Arc<MockChain>,
    pub party: Arc<MockChain>,
    pub store: Arc<MemoryStore>,
}

pub fn setup(policy: RedeemPolicy) -> Setup {
    setup_with(policy, fast_timings())
}

pub fn setup_with(policy: RedeemPolicy, timings: SwapTimings) -> Setup {
    let own = Arc::new(MockChain::new(Blockchain::Ethereum));
    let party = Arc::new(MockChain::new(Blockchain::Tezos));
    let store = Arc::new(MemoryStore::new());
    let (machine, updates) = SwapStateMachine::new(
        Arc::clone(&own),
        Arc::clone(&party),
        store.clone() as Arc<dyn SwapStore>,
        timings,
        policy,
    )
    .expect("valid timings");
    Setup {
        machine,
        updates,
        own,
        party,
        store,
    }
}

/// Poll the store until the flag is recorded, failing the test after five seconds.
pub async fn wait_for_flag(store: &MemoryStore, swap_id: SwapId, flag: StateFlag) -> SwapRecord {
    timeout(Duration::from_secs(5), async {
        loop {
            let record = store.get(swap_id).await.expect("stored swap");
            if record.has(flag) {
                return record;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} was not recorded in time", flag))
}
