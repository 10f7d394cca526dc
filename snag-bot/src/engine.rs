//! Conversation engine
//!
//! Single entry point for inbound events. Every event and every debounce
//! firing is routed through the actor's lane in [`ActorQueue`] before it
//! touches any state, so one actor's events never interleave.

use crate::actor_queue::ActorQueue;
use crate::db::DefectStore;
use crate::debounce::{DebounceFired, DebounceScheduler};
use crate::ephemeral::EphemeralStore;
use crate::flows::after_mode::caption_close_target;
use crate::inbound::{ButtonAction, Command, InboundEvent, InboundKind, ListKind};
use crate::messaging::{MessageKind, Messenger, OutboundMessage};
use futures::future::{self, BoxFuture, FutureExt};
use snag_common::config::{CaptureConfig, ControlConfig, TomlConfig};
use snag_common::db::{find_human_id, DefectStatus};
use snag_common::events::SnagEvent;
use snag_common::Result;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of [`Engine::handle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Consumed,
    /// No flow owns the event; left to other collaborators
    Ignored,
    /// Repeated delivery of a button press already handled
    Duplicate,
}

/// Bounded memory of one-time callback identifiers
struct CallbackWindow {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl CallbackWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Record `id`, returning `false` if it was already recorded
    fn first_seen(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

pub struct Engine {
    pub(crate) store: DefectStore,
    pub(crate) ephemeral: Arc<dyn EphemeralStore>,
    messenger: Arc<dyn Messenger>,
    queue: ActorQueue,
    pub(crate) debounce: DebounceScheduler,
    pub(crate) capture: CaptureConfig,
    pub(crate) control: ControlConfig,
    callbacks: Mutex<CallbackWindow>,
    event_tx: broadcast::Sender<SnagEvent>,
}

impl Engine {
    /// Build the engine and start its debounce pump
    ///
    /// Must be called inside a tokio runtime. The pump stops once the last
    /// `Arc<Engine>` is dropped.
    pub fn new(
        store: DefectStore,
        ephemeral: Arc<dyn EphemeralStore>,
        messenger: Arc<dyn Messenger>,
        config: &TomlConfig,
    ) -> Arc<Self> {
        let (debounce, fired_rx) = DebounceScheduler::new();
        let (event_tx, _) = broadcast::channel(100);

        let engine = Arc::new(Self {
            store,
            ephemeral,
            messenger,
            queue: ActorQueue::new(),
            debounce,
            capture: config.capture.clone(),
            control: config.control.clone(),
            callbacks: Mutex::new(CallbackWindow::new(config.capture.dedup_window)),
            event_tx,
        });

        tokio::spawn(pump_debounce(Arc::downgrade(&engine), fired_rx));
        engine
    }

    pub fn store(&self) -> &DefectStore {
        &self.store
    }

    /// Subscribe to committed defect events
    pub fn subscribe(&self) -> broadcast::Receiver<SnagEvent> {
        self.event_tx.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<SnagEvent> {
        self.event_tx.clone()
    }

    pub(crate) fn publish(&self, event: SnagEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Best-effort send; failures are logged and swallowed
    pub(crate) async fn deliver(&self, message: OutboundMessage) {
        let recipient = message.recipient.clone();
        if let Err(e) = self.messenger.send(message).await {
            warn!(recipient = %recipient, "Message delivery failed: {}", e);
        }
    }

    /// No debounce timer pending and no actor with queued work
    pub fn is_idle(&self) -> bool {
        self.debounce.pending_total() == 0 && self.queue.active_lanes() == 0
    }

    /// Wait for [`is_idle`](Self::is_idle), giving up after `limit`
    ///
    /// Returns whether the engine went idle in time.
    pub async fn settle(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while !self.is_idle() {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        true
    }

    /// Process one inbound event after everything already queued for its actor
    pub async fn handle(self: &Arc<Self>, event: InboundEvent) -> Result<Handled> {
        self.submit(event).await
    }

    /// Enqueue an event now and return a future for its outcome
    ///
    /// Submission order is execution order per actor, even when the returned
    /// futures are awaited out of order or on other tasks.
    pub fn submit(self: &Arc<Self>, event: InboundEvent) -> BoxFuture<'static, Result<Handled>> {
        if let InboundKind::Button { callback_id, .. } = &event.kind {
            let first = self
                .callbacks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .first_seen(callback_id);
            if !first {
                debug!(actor = %event.actor, callback_id = %callback_id, "Duplicate button press ignored");
                return future::ready(Ok(Handled::Duplicate)).boxed();
            }
        }

        let engine = Arc::clone(self);
        let actor = event.actor.clone();
        self.queue
            .run_exclusive(&actor, async move { engine.dispatch(event).await })
            .boxed()
    }

    async fn dispatch(&self, event: InboundEvent) -> Result<Handled> {
        let actor = event.actor.as_str();
        match event.kind {
            InboundKind::Photo {
                photo_ref,
                group_id,
                caption,
            } => {
                self.route_photo(actor, &photo_ref, group_id.as_deref(), caption.as_deref())
                    .await
            }
            InboundKind::Text { text } => self.route_text(actor, &text).await,
            InboundKind::Button { data, .. } => match ButtonAction::decode(&data) {
                Some(action) => self.route_button(actor, action).await,
                None => Ok(Handled::Ignored),
            },
        }
    }

    async fn route_photo(
        &self,
        actor: &str,
        photo_ref: &str,
        group_id: Option<&str>,
        caption: Option<&str>,
    ) -> Result<Handled> {
        if let Some(state) = self.load_after_mode(actor).await? {
            return self.after_mode_photo(actor, state, photo_ref).await;
        }

        if let Some(target) = caption.and_then(caption_close_target) {
            if self.load_draft(actor).await?.is_none() {
                return self.caption_close(actor, &target, photo_ref).await;
            }
        }

        self.draft_photo(actor, photo_ref, group_id).await
    }

    async fn route_text(&self, actor: &str, text: &str) -> Result<Handled> {
        if let Some(command) = Command::parse(text) {
            return self.run_command(actor, command).await;
        }
        if let Some(state) = self.load_card_edit(actor).await? {
            return self.card_edit_text(actor, state, text).await;
        }
        if let Some(state) = self.load_wizard(actor).await? {
            return self.wizard_text(actor, state, text).await;
        }
        if let Some(draft) = self.load_draft(actor).await? {
            return self.draft_text(actor, draft, text).await;
        }
        if let Some(human_id) = find_human_id(text) {
            return self.show_card(actor, &human_id).await;
        }
        Ok(Handled::Ignored)
    }

    async fn route_button(&self, actor: &str, action: ButtonAction) -> Result<Handled> {
        match action {
            ButtonAction::Category(_)
            | ButtonAction::Severity(_)
            | ButtonAction::UnknownOption(_)
            | ButtonAction::EditMenu
            | ButtonAction::EditStep(_)
            | ButtonAction::ClearPhotos
            | ButtonAction::BackToPreview
            | ButtonAction::Save
            | ButtonAction::Cancel => self.draft_button(actor, action).await,

            ButtonAction::Open(id) => self.show_card(actor, &id).await,
            ButtonAction::AddAfter(id) => self.after_mode_start(actor, &id).await,
            ButtonAction::SetStatus(status, id) => self.set_status(actor, status, &id).await,
            ButtonAction::SetFixed(id) => self.set_status(actor, DefectStatus::Fixed, &id).await,
            ButtonAction::CardEditMenu(id) => self.card_edit_menu(actor, &id).await,
            ButtonAction::CardEditField(field, id) => self.card_edit_start(actor, field, &id).await,

            ButtonAction::ControlMenu(id) => self.wizard_start(actor, &id).await,
            ButtonAction::AssignMe(id) => self.wizard_assign_me(actor, &id).await,
            ButtonAction::AssignEnter(id) => self.wizard_assign_enter(actor, &id).await,
            ButtonAction::ControlCancel(_) => self.wizard_cancel(actor).await,
            ButtonAction::Due(choice, id) => self.wizard_due(actor, choice, &id).await,
            ButtonAction::DueCustom(id) => self.wizard_due_custom(actor, &id).await,

            ButtonAction::ListsMenu => self.show_lists_menu(actor).await,
            ButtonAction::List(kind, page) => self.show_list(actor, kind, page).await,
        }
    }

    async fn run_command(&self, actor: &str, command: Command) -> Result<Handled> {
        match command {
            Command::New => self.draft_start(actor).await,
            Command::Cancel => {
                self.reset_actor(actor).await?;
                self.deliver(OutboundMessage::new(actor, MessageKind::DraftCancelled, "Cancelled."))
                    .await;
                Ok(Handled::Consumed)
            }
            Command::Reset => {
                self.reset_actor(actor).await?;
                self.deliver(OutboundMessage::new(actor, MessageKind::Reset, "Everything reset."))
                    .await;
                Ok(Handled::Consumed)
            }
            Command::My(kind) => self.show_list(actor, kind, 0).await,
            Command::Overdue => self.show_list(actor, ListKind::OverdueAll, 0).await,
            Command::OnControl => self.show_list(actor, ListKind::Future, 0).await,
            Command::Other(name) => {
                debug!(actor = %actor, command = %name, "Command not handled here");
                Ok(Handled::Ignored)
            }
        }
    }

    /// Clear every flow of `actor` and its pending timers
    async fn reset_actor(&self, actor: &str) -> Result<()> {
        self.discard_draft(actor).await?;
        self.clear_after_mode(actor).await?;
        self.clear_wizard(actor).await?;
        self.clear_card_edit(actor).await?;
        info!(actor = %actor, "Conversation state reset");
        Ok(())
    }
}

/// Feed debounce firings back through the owning actor's lane
async fn pump_debounce(engine: Weak<Engine>, mut fired_rx: mpsc::UnboundedReceiver<DebounceFired>) {
    while let Some(fired) = fired_rx.recv().await {
        let Some(engine) = engine.upgrade() else {
            break;
        };

        let actor = fired.actor.clone();
        let worker = Arc::clone(&engine);
        // Enqueued immediately; the queue logs failures so the waiter can be dropped
        drop(engine.queue.run_exclusive(&actor, async move {
            worker.on_debounce_fired(fired).await
        }));
        engine.debounce.handed_off();
    }
    debug!("Debounce pump stopped");
}
