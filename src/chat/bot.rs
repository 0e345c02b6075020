//! Tally Chat Bot
//!
//! Routes each inbound event by command, menu entry, callback or active
//! session. Completed flows run their ledger action here. Ledger writes run
//! on the blocking pool and return before any platform call is awaited, so
//! no notification is ever sent while a ledger lock is held.
//!
//! `run` gives every user one queue drained by one worker task: a user's
//! events are handled strictly in arrival order, different users in
//! parallel.

use super::commands::{parse_command, Callback, Command, MenuItem};
use super::messages::{self, Money};
use super::retry::{is_transient, retry_with_backoff, RetryPolicy};
use super::traits::*;
use crate::claims;
use crate::ledger::{
    self, Accounts, Amount, LedgerError, LedgerStore, MutateError, Profile, UserAccount, UserId,
    WithdrawalRequest,
};
use crate::session::{Advance, FlowAction, FlowContext, FlowKind, Input, SessionError, SessionManager};
use crate::withdrawal::{self, Decision, Submitted, WithdrawalLimits};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Bot configuration
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// The single moderator allowed to run moderator-only operations.
    pub moderator: UserId,
    pub support_contact: String,
    /// Shown in the join prompt when the membership gate refuses a user.
    pub join_link: String,
    pub currency_symbol: String,
    pub limits: WithdrawalLimits,
    pub min_claim_key_len: usize,
    pub idle_timeout: Duration,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
    /// Retry schedule for the moderator notification of a new withdrawal.
    pub notify_retry: RetryPolicy,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            moderator: UserId::new("0"),
            support_contact: "@support".to_string(),
            join_link: "https://t.me/".to_string(),
            currency_symbol: "₹".to_string(),
            limits: WithdrawalLimits::default(),
            min_claim_key_len: claims::DEFAULT_MIN_CLAIM_KEY_LEN,
            idle_timeout: crate::session::DEFAULT_IDLE_TIMEOUT,
            poll_interval: Duration::from_millis(100),
            sweep_interval: Duration::from_secs(60),
            notify_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Storage(#[from] LedgerError),
}

/// One user's pending events, drained in order by a single worker.
struct UserQueue {
    tx: mpsc::UnboundedSender<Event>,
    /// Events sent but not yet handled.
    pending: Arc<AtomicUsize>,
}

impl UserQueue {
    fn spawn<C: ChatClient, G: MembershipGate>(
        bot: &TallyBot<C, G>,
        tasks: &mut JoinSet<()>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let pending = Arc::new(AtomicUsize::new(0));
        let bot = bot.clone();
        let remaining = Arc::clone(&pending);
        tasks.spawn(async move {
            while let Some(event) = rx.recv().await {
                bot.dispatch(event).await;
                remaining.fetch_sub(1, Ordering::AcqRel);
            }
        });
        Self { tx, pending }
    }

    fn is_idle(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }
}

fn storage(err: MutateError<Infallible>) -> BotError {
    match err {
        MutateError::Storage(e) => e.into(),
        MutateError::Rejected(never) => match never {},
    }
}

/// Validator view over the live ledger.
struct StoreContext<'a> {
    store: &'a LedgerStore,
    config: &'a BotConfig,
}

impl FlowContext for StoreContext<'_> {
    fn balance_of(&self, user: &UserId) -> Option<Amount> {
        self.store.load::<Accounts>().balance_of(user)
    }

    fn limits(&self) -> &WithdrawalLimits {
        &self.config.limits
    }

    fn min_claim_key_len(&self) -> usize {
        self.config.min_claim_key_len
    }
}

/// Tally bot. Cheap to clone; `run` handles each user's events on one task.
#[derive(Clone)]
pub struct TallyBot<C: ChatClient, G: MembershipGate> {
    client: C,
    gate: G,
    store: Arc<LedgerStore>,
    sessions: Arc<SessionManager>,
    config: Arc<BotConfig>,
    money: Money,
}

impl<C: ChatClient, G: MembershipGate> TallyBot<C, G> {
    pub fn new(client: C, gate: G, store: Arc<LedgerStore>, config: BotConfig) -> Self {
        let sessions = Arc::new(SessionManager::new(config.idle_timeout));
        let money = Money::new(config.currency_symbol.clone());
        Self {
            client,
            gate,
            store,
            sessions,
            config: Arc::new(config),
            money,
        }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Run a ledger call on the blocking pool.
    async fn with_ledger<T, F>(&self, f: F) -> Result<T, BotError>
    where
        F: FnOnce(&LedgerStore) -> T + Send + 'static,
        T: Send + 'static,
    {
        Ok(ledger::run_blocking(&self.store, f).await?)
    }

    /// Poll for events until the client reports `Closed`.
    pub async fn run(&self) -> Result<(), BotError> {
        let mut poll = tokio::time::interval(self.config.poll_interval);
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        let mut tasks = JoinSet::new();
        let mut queues: HashMap<UserId, UserQueue> = HashMap::new();

        info!(moderator = %self.config.moderator, "bot running");

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    let events = match self.client.receive_events().await {
                        Ok(events) => events,
                        Err(ChatError::Closed) => break,
                        Err(e) => {
                            warn!("Error receiving events, will retry: {}", e);
                            continue;
                        }
                    };
                    for event in events {
                        self.enqueue(&mut queues, &mut tasks, event);
                    }
                }
                _ = sweep.tick() => {
                    let removed = self.sessions.sweep_expired();
                    if removed > 0 {
                        debug!(removed, "expired idle sessions");
                    }
                    // Dropping an idle queue ends its worker
                    queues.retain(|_, queue| !queue.is_idle());
                }
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        warn!("event task failed: {}", e);
                    }
                }
            }
        }

        drop(queues);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("event task failed: {}", e);
            }
        }
        info!("event source closed, bot stopped");
        Ok(())
    }

    /// Hand `event` to its sender's worker, starting one if needed.
    fn enqueue(
        &self,
        queues: &mut HashMap<UserId, UserQueue>,
        tasks: &mut JoinSet<()>,
        event: Event,
    ) {
        let sender = event.sender.clone();
        let queue = queues
            .entry(sender.clone())
            .or_insert_with(|| UserQueue::spawn(self, tasks));
        queue.pending.fetch_add(1, Ordering::AcqRel);

        if let Err(mpsc::error::SendError(event)) = queue.tx.send(event) {
            warn!(user = %sender, "event worker gone, starting a new one");
            let queue = UserQueue::spawn(self, tasks);
            queue.pending.fetch_add(1, Ordering::AcqRel);
            if queue.tx.send(event).is_err() {
                warn!(user = %sender, "dropping event, worker did not start");
            }
            queues.insert(sender, queue);
        }
    }

    async fn dispatch(&self, event: Event) {
        let sender = event.sender.clone();
        if let Err(e) = self.handle_event(event).await {
            // A single failed event must not take the bot down.
            warn!(user = %sender, "Error handling event: {}", e);
            self.deliver(&sender, &messages::internal_error()).await;
        }
    }

    /// Handle one inbound event to completion.
    pub async fn handle_event(&self, event: Event) -> Result<(), BotError> {
        let user = event.sender;
        match event.content {
            EventContent::Text(text) => {
                if let Some(command) = parse_command(&text) {
                    return self.on_command(&user, event.profile, command).await;
                }
                self.ensure_account(&user, event.profile).await?;
                match MenuItem::parse(&text) {
                    Some(item) => self.on_menu(&user, item).await,
                    None => self.on_input(&user, Input::Text(text)).await,
                }
            }
            EventContent::Callback(data) => {
                self.ensure_account(&user, event.profile).await?;
                match Callback::parse(&data) {
                    Some(callback) => self.on_callback(&user, callback).await,
                    None => {
                        debug!(user = %user, data = %data, "ignoring unknown callback");
                        Ok(())
                    }
                }
            }
            EventContent::Upload => {
                self.ensure_account(&user, event.profile).await?;
                self.on_input(&user, Input::Upload).await
            }
        }
    }

    fn is_moderator(&self, user: &UserId) -> bool {
        *user == self.config.moderator
    }

    /// Membership check; lookup failures count as not a member.
    async fn is_member(&self, user: &UserId) -> bool {
        match self.gate.is_member(user).await {
            Ok(member) => member,
            Err(e) => {
                warn!(user = %user, "membership lookup failed, denying: {}", e);
                false
            }
        }
    }

    /// Gate a user operation, sending the join prompt when refused.
    async fn require_member(&self, user: &UserId) -> bool {
        if self.is_member(user).await {
            return true;
        }
        self.deliver(user, &messages::join_prompt(&self.config.join_link))
            .await;
        false
    }

    async fn deny(&self, user: &UserId, what: &str) {
        warn!(user = %user, operation = what, "unauthorized moderator operation");
        self.deliver(user, &messages::unauthorized()).await;
    }

    /// Best-effort send. Failures are logged, never propagated.
    async fn deliver(&self, to: &UserId, message: &Outgoing) {
        if let Err(e) = self.client.send(to, message).await {
            warn!(recipient = %to, "delivery failed: {}", e);
        }
    }

    async fn ensure_account(&self, user: &UserId, profile: Profile) -> Result<(), BotError> {
        if self.store.load::<Accounts>().get(user).is_none() {
            self.register(user, profile).await?;
        }
        Ok(())
    }

    async fn register(&self, user: &UserId, profile: Profile) -> Result<UserAccount, BotError> {
        let user = user.clone();
        self.with_ledger(move |store| ledger::register(store, &user, profile))
            .await?
            .map_err(storage)
    }

    fn account(&self, user: &UserId) -> Option<UserAccount> {
        self.store.load::<Accounts>().get(user).cloned()
    }

    async fn start_flow(&self, user: &UserId, kind: FlowKind) {
        let step = self.sessions.start_flow(user, kind);
        debug!(user = %user, flow = kind.name(), "flow started");
        self.deliver(
            user,
            &messages::step_prompt(step, &self.config.limits, &self.money),
        )
        .await;
    }

    async fn on_command(
        &self,
        user: &UserId,
        profile: Profile,
        command: Command,
    ) -> Result<(), BotError> {
        match command {
            Command::Start => {
                let account = self.register(user, profile).await?;
                self.sessions.cancel(user);
                if self.is_member(user).await {
                    self.deliver(user, &messages::welcome(&account)).await;
                } else {
                    self.deliver(user, &messages::join_prompt(&self.config.join_link))
                        .await;
                }
            }
            Command::Admin => {
                if !self.is_moderator(user) {
                    self.deny(user, "admin").await;
                    return Ok(());
                }
                self.ensure_account(user, profile).await?;
                self.sessions.cancel(user);
                self.deliver(user, &messages::moderator_panel()).await;
            }
            Command::Cancel => {
                let message = if self.sessions.cancel(user) {
                    messages::cancelled()
                } else {
                    messages::nothing_to_cancel()
                };
                self.deliver(user, &message).await;
            }
            Command::Unknown(name) => {
                self.deliver(user, &messages::unknown_command(&name)).await;
            }
        }
        Ok(())
    }

    async fn on_menu(&self, user: &UserId, item: MenuItem) -> Result<(), BotError> {
        if item.is_moderator_only() && !self.is_moderator(user) {
            self.deny(user, item.label()).await;
            return Ok(());
        }

        match item {
            MenuItem::SubmitProof => {
                if self.require_member(user).await {
                    self.start_flow(user, FlowKind::SubmitProof).await;
                }
            }
            MenuItem::Balance => {
                if self.require_member(user).await {
                    if let Some(account) = self.account(user) {
                        self.deliver(user, &messages::balance(&account, &self.money))
                            .await;
                    }
                }
            }
            MenuItem::Withdraw => {
                if self.require_member(user).await {
                    let balance = self
                        .account(user)
                        .map(|a| a.balance)
                        .unwrap_or(Amount::ZERO);
                    if balance.is_zero() {
                        self.deliver(user, &messages::withdraw_needs_balance()).await;
                    } else {
                        self.start_flow(user, FlowKind::Withdraw).await;
                    }
                }
            }
            MenuItem::Support => {
                self.deliver(user, &messages::support(&self.config.support_contact))
                    .await;
            }
            MenuItem::AddBalance => self.start_flow(user, FlowKind::AdminAddBalance).await,
            MenuItem::RemoveBalance => self.start_flow(user, FlowKind::AdminRemoveBalance).await,
            MenuItem::AddClaims => self.start_flow(user, FlowKind::AdminBulkClaims).await,
            MenuItem::Statistics => {
                let stats = ledger::statistics(&self.store);
                self.deliver(user, &messages::statistics(&stats, &self.money))
                    .await;
            }
            MenuItem::RecentUsers => {
                let users = ledger::recent_users(&self.store, ledger::report::RECENT_USERS_LIMIT);
                self.deliver(user, &messages::recent_users(&users, &self.money))
                    .await;
            }
            MenuItem::MainMenu => {
                self.sessions.cancel(user);
                self.deliver(user, &messages::use_menu()).await;
            }
        }
        Ok(())
    }

    async fn on_callback(&self, user: &UserId, callback: Callback) -> Result<(), BotError> {
        match callback {
            Callback::CheckJoin => {
                if self.require_member(user).await {
                    if let Some(account) = self.account(user) {
                        self.deliver(user, &messages::welcome(&account)).await;
                    }
                }
                Ok(())
            }
            Callback::Cancel => {
                self.on_command(user, Profile::default(), Command::Cancel)
                    .await
            }
            Callback::Method(method) => {
                self.on_input(user, Input::Choice(method.code().to_string()))
                    .await
            }
            Callback::Resolve { id, decision } => {
                if !self.is_moderator(user) {
                    self.deny(user, "resolve withdrawal").await;
                    return Ok(());
                }
                self.resolve_withdrawal(user, id, decision).await
            }
        }
    }

    async fn on_input(&self, user: &UserId, input: Input) -> Result<(), BotError> {
        let ctx = StoreContext {
            store: &self.store,
            config: &self.config,
        };
        let advance = self.sessions.advance(user, &input, &ctx);

        match advance {
            Ok(Advance::Reprompt { step, message }) => {
                self.deliver(
                    user,
                    &messages::reprompt(step, &message, &self.config.limits, &self.money),
                )
                .await;
                Ok(())
            }
            Ok(Advance::Next { step }) => {
                self.deliver(
                    user,
                    &messages::step_prompt(step, &self.config.limits, &self.money),
                )
                .await;
                Ok(())
            }
            Ok(Advance::Complete(action)) => self.execute(user, action).await,
            Err(SessionError::Expired) => {
                self.deliver(user, &messages::session_expired()).await;
                Ok(())
            }
            Err(SessionError::NoActiveFlow) => {
                self.deliver(user, &messages::use_menu()).await;
                Ok(())
            }
            Err(e @ SessionError::Incomplete(_)) => {
                warn!(user = %user, "flow ended without its action: {}", e);
                self.deliver(user, &messages::internal_error()).await;
                Ok(())
            }
        }
    }

    /// Run the side effect of a completed flow.
    async fn execute(&self, user: &UserId, action: FlowAction) -> Result<(), BotError> {
        match action {
            FlowAction::SubmitProof { link } => {
                let outcome = {
                    let (token, user) = (link.clone(), user.clone());
                    self.with_ledger(move |store| claims::consume(store, &token, &user))
                        .await?
                        .map_err(storage)?
                };
                self.deliver(user, &messages::submission_result(&outcome, &self.money))
                    .await;
                if let Some(account) = self.account(user) {
                    self.deliver(
                        &self.config.moderator,
                        &messages::submission_audit(&account, &link, &outcome, &self.money),
                    )
                    .await;
                }
                Ok(())
            }
            FlowAction::Withdraw(draft) => {
                let label = self
                    .account(user)
                    .map(|a| a.label().to_string())
                    .unwrap_or_else(|| user.to_string());
                let submitted = withdrawal::submit(
                    &self.store,
                    &draft,
                    &self.config.limits,
                    |request: WithdrawalRequest| {
                        let message =
                            messages::withdrawal_for_moderator(&request, &label, &self.money);
                        self.notify_moderator(message)
                    },
                )
                .await;

                match submitted {
                    Ok(Submitted::Opened(request)) => {
                        self.deliver(user, &messages::withdrawal_opened(&request, &self.money))
                            .await;
                    }
                    Ok(Submitted::Compensated(request)) => {
                        self.deliver(
                            user,
                            &messages::withdrawal_compensated(&request, &self.money),
                        )
                        .await;
                    }
                    Ok(Submitted::Resolved(request)) => {
                        // The moderator's decision already reached the user
                        debug!(
                            user = %user,
                            request = request.id,
                            "withdrawal resolved during notification"
                        );
                    }
                    Err(MutateError::Rejected(e)) => {
                        self.deliver(user, &messages::withdrawal_refused(&e)).await;
                    }
                    Err(MutateError::Storage(e)) => return Err(e.into()),
                }
                Ok(())
            }
            FlowAction::AdjustBalance { target, adjustment } => {
                if !self.is_moderator(user) {
                    self.deny(user, "adjust balance").await;
                    return Ok(());
                }
                let adjusted = {
                    let target = target.clone();
                    self.with_ledger(move |store| {
                        ledger::adjust_balance(store, &target, adjustment)
                    })
                    .await?
                };
                match adjusted {
                    Ok(change) => {
                        self.deliver(user, &messages::balance_adjusted(&change, &self.money))
                            .await;
                        self.deliver(
                            &target,
                            &messages::balance_notice(adjustment, &change, &self.money),
                        )
                        .await;
                    }
                    Err(MutateError::Rejected(e)) => {
                        self.deliver(user, &messages::action_failed(&e.to_string()))
                            .await;
                    }
                    Err(MutateError::Storage(e)) => return Err(e.into()),
                }
                Ok(())
            }
            FlowAction::AddClaims { keys, reward } => {
                if !self.is_moderator(user) {
                    self.deny(user, "add claims").await;
                    return Ok(());
                }
                let import = self
                    .with_ledger(move |store| claims::add_claims(store, &keys, reward))
                    .await?
                    .map_err(storage)?;
                self.deliver(
                    user,
                    &messages::claims_imported(&import, reward, &self.money),
                )
                .await;
                Ok(())
            }
        }
    }

    async fn notify_moderator(&self, message: Outgoing) -> ChatResult<()> {
        let moderator = &self.config.moderator;
        retry_with_backoff(
            &self.config.notify_retry,
            || self.client.send(moderator, &message),
            is_transient,
        )
        .await
    }

    async fn resolve_withdrawal(
        &self,
        moderator: &UserId,
        id: ledger::RequestId,
        decision: Decision,
    ) -> Result<(), BotError> {
        let resolved = self
            .with_ledger(move |store| withdrawal::resolve(store, id, decision, None))
            .await?;
        match resolved {
            Ok(resolution) => {
                self.deliver(moderator, &messages::resolution_ack(&resolution))
                    .await;
                if resolution.applied {
                    self.deliver(
                        &resolution.request.user_id,
                        &messages::resolution_notice(&resolution.request, &self.money),
                    )
                    .await;
                }
                Ok(())
            }
            Err(MutateError::Rejected(e)) => {
                self.deliver(moderator, &messages::action_failed(&e.to_string()))
                    .await;
                Ok(())
            }
            Err(MutateError::Storage(e)) => Err(e.into()),
        }
    }
}
