//! Async tick loop around a `BattleEngine`, plus the registry of running battles

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::command::BattleCommand;
use super::engine::BattleEngine;
use super::error::{BattleError, RejectReason};
use super::fleet::FleetLoadout;
use super::reinforcement::ReinforcementPriority;
use super::result::BattleResult;
use super::snapshot::BattleSnapshot;
use super::supply::{SupplyState, SupplyTopUp};
use super::types::{BattleId, BattleStatus, FleetId};
use crate::store::BattleStore;
use crate::util::time::{tick_duration, Timer};
use crate::world::GridCoord;

/// Bounded inbound queue per battle
pub const INPUT_CHANNEL_CAPACITY: usize = 256;
/// Outbound messages a slow subscriber may fall behind by
pub const BROADCAST_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<T>;

/// Inbound traffic for one battle
#[derive(Debug)]
pub enum BattleInput {
    Command(BattleCommand),
    Join {
        loadout: FleetLoadout,
        reply: Reply<Result<(), RejectReason>>,
    },
    Leave {
        fleet_id: FleetId,
        reply: Reply<Result<(), RejectReason>>,
    },
    Start {
        reply: Reply<Result<bool, BattleError>>,
    },
    Pause {
        reply: Reply<Result<bool, BattleError>>,
    },
    Resume {
        reply: Reply<Result<bool, BattleError>>,
    },
    Stop {
        reply: Reply<BattleResult>,
    },
    Retreat {
        fleet_id: FleetId,
        destination: Option<GridCoord>,
        reply: Reply<Result<u64, RejectReason>>,
    },
    CancelRetreat {
        fleet_id: FleetId,
        reply: Reply<Result<(), RejectReason>>,
    },
    Reinforce {
        loadout: FleetLoadout,
        priority: ReinforcementPriority,
        reply: Reply<Result<u64, RejectReason>>,
    },
    Resupply {
        fleet_id: FleetId,
        top_up: SupplyTopUp,
        reply: Reply<Result<SupplyState, RejectReason>>,
    },
}

/// Outbound fan-out for one battle
#[derive(Debug, Clone)]
pub enum BattleMessage {
    Snapshot(Arc<BattleSnapshot>),
    Started { tick: u64 },
    Paused { tick: u64 },
    Resumed { tick: u64 },
    Ended { tick: u64, result: BattleResult },
}

/// Handle to a running battle
#[derive(Clone)]
pub struct BattleHandle {
    pub id: BattleId,
    input_tx: mpsc::Sender<BattleInput>,
    message_tx: broadcast::Sender<BattleMessage>,
    state_rx: watch::Receiver<Arc<BattleSnapshot>>,
}

impl BattleHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<BattleMessage> {
        self.message_tx.subscribe()
    }

    /// Most recent published state
    pub fn latest(&self) -> Arc<BattleSnapshot> {
        self.state_rx.borrow().clone()
    }

    pub fn status(&self) -> BattleStatus {
        self.state_rx.borrow().status
    }

    /// Fleets still taking part
    pub fn participant_count(&self) -> usize {
        self.state_rx
            .borrow()
            .fleets
            .iter()
            .filter(|f| !f.defeated && !f.withdrawn)
            .count()
    }

    /// Queue a command without waiting for the tick
    pub fn queue(&self, command: BattleCommand) -> Result<(), RejectReason> {
        self.input_tx
            .try_send(BattleInput::Command(command))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => RejectReason::QueueFull,
                mpsc::error::TrySendError::Closed(_) => RejectReason::BattleEnded,
            })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> BattleInput,
    ) -> Result<T, RejectReason> {
        let (reply, rx) = oneshot::channel();
        self.input_tx
            .send(build(reply))
            .await
            .map_err(|_| RejectReason::BattleEnded)?;
        rx.await.map_err(|_| RejectReason::BattleEnded)
    }

    pub async fn join(&self, loadout: FleetLoadout) -> Result<(), RejectReason> {
        self.request(|reply| BattleInput::Join { loadout, reply })
            .await?
    }

    pub async fn leave(&self, fleet_id: FleetId) -> Result<(), RejectReason> {
        self.request(|reply| BattleInput::Leave { fleet_id, reply })
            .await?
    }

    pub async fn start(&self) -> Result<Result<bool, BattleError>, RejectReason> {
        self.request(|reply| BattleInput::Start { reply }).await
    }

    pub async fn pause(&self) -> Result<Result<bool, BattleError>, RejectReason> {
        self.request(|reply| BattleInput::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<Result<bool, BattleError>, RejectReason> {
        self.request(|reply| BattleInput::Resume { reply }).await
    }

    pub async fn stop(&self) -> Result<BattleResult, RejectReason> {
        self.request(|reply| BattleInput::Stop { reply }).await
    }

    pub async fn retreat(
        &self,
        fleet_id: FleetId,
        destination: Option<GridCoord>,
    ) -> Result<u64, RejectReason> {
        self.request(|reply| BattleInput::Retreat {
            fleet_id,
            destination,
            reply,
        })
        .await?
    }

    pub async fn cancel_retreat(&self, fleet_id: FleetId) -> Result<(), RejectReason> {
        self.request(|reply| BattleInput::CancelRetreat { fleet_id, reply })
            .await?
    }

    pub async fn reinforce(
        &self,
        loadout: FleetLoadout,
        priority: ReinforcementPriority,
    ) -> Result<u64, RejectReason> {
        self.request(|reply| BattleInput::Reinforce {
            loadout,
            priority,
            reply,
        })
        .await?
    }

    pub async fn resupply(
        &self,
        fleet_id: FleetId,
        top_up: SupplyTopUp,
    ) -> Result<SupplyState, RejectReason> {
        self.request(|reply| BattleInput::Resupply {
            fleet_id,
            top_up,
            reply,
        })
        .await?
    }
}

/// Registry of all running battles
pub struct BattleRegistry {
    battles: DashMap<BattleId, BattleHandle>,
}

impl BattleRegistry {
    pub fn new() -> Self {
        Self {
            battles: DashMap::new(),
        }
    }

    pub fn get(&self, id: &BattleId) -> Option<BattleHandle> {
        self.battles.get(id).map(|b| b.value().clone())
    }

    pub fn insert(&self, handle: BattleHandle) {
        self.battles.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &BattleId) -> Option<BattleHandle> {
        self.battles.remove(id).map(|(_, h)| h)
    }

    pub fn ids(&self) -> Vec<BattleId> {
        self.battles.iter().map(|b| *b.key()).collect()
    }

    pub fn active_battles(&self) -> usize {
        self.battles.len()
    }

    pub fn total_participants(&self) -> usize {
        self.battles
            .iter()
            .map(|b| b.value().participant_count())
            .sum()
    }
}

impl Default for BattleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns one engine and drives it at its tick rate
pub struct BattleRunner {
    engine: BattleEngine,
    input_rx: mpsc::Receiver<BattleInput>,
    message_tx: broadcast::Sender<BattleMessage>,
    state_tx: watch::Sender<Arc<BattleSnapshot>>,
    store: Arc<dyn BattleStore>,
    running: bool,
    stop_replies: Vec<Reply<BattleResult>>,
    // Periodic saves still in flight
    pending_saves: Vec<JoinHandle<()>>,
}

impl BattleRunner {
    pub fn new(engine: BattleEngine, store: Arc<dyn BattleStore>) -> (Self, BattleHandle) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let (message_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(Arc::new(engine.snapshot()));

        let handle = BattleHandle {
            id: engine.id(),
            input_tx,
            message_tx: message_tx.clone(),
            state_rx,
        };

        let runner = Self {
            engine,
            input_rx,
            message_tx,
            state_tx,
            store,
            running: false,
            stop_replies: Vec::new(),
            pending_saves: Vec::new(),
        };

        (runner, handle)
    }

    /// Run until the battle ends, is stopped, or every handle is dropped
    pub async fn run(mut self) -> BattleResult {
        let battle_id = self.engine.id();
        info!(battle_id = %battle_id, tick_rate = self.engine.config().tick_rate, "Battle loop started");

        let mut ticker = interval(tick_duration(self.engine.config().tick_rate));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.running = true;
        while self.running {
            tokio::select! {
                biased;

                _ = ticker.tick() => self.on_tick(),
                input = self.input_rx.recv() => match input {
                    Some(input) => self.handle_input(input),
                    None => {
                        info!(battle_id = %battle_id, "All handles dropped, stopping battle");
                        self.running = false;
                    }
                },
            }
        }
        // No tick may start once stopping
        drop(ticker);

        self.finish().await
    }

    fn on_tick(&mut self) {
        let timer = Timer::new();
        let Some(snapshot) = self.engine.step() else {
            return;
        };
        let elapsed = timer.elapsed_micros();
        debug!(battle_id = %self.engine.id(), tick = snapshot.tick, events = snapshot.events.len(), elapsed_us = elapsed, "Tick");
        if elapsed > tick_duration(self.engine.config().tick_rate).as_micros() as u64 {
            warn!(battle_id = %self.engine.id(), tick = snapshot.tick, elapsed_us = elapsed, "Tick overran its budget");
        }

        self.state_tx.send_replace(snapshot.clone());
        let _ = self.message_tx.send(BattleMessage::Snapshot(snapshot));

        if self.engine.status() == BattleStatus::Ended {
            self.running = false;
        } else if self.engine.should_persist() {
            self.persist_in_background();
        }
    }

    fn persist_in_background(&mut self) {
        self.pending_saves.retain(|save| !save.is_finished());
        let store = self.store.clone();
        let record = self.engine.record();
        let save = tokio::spawn(async move {
            if let Err(err) = store.save(&record).await {
                // Retried at the next save point
                error!(battle_id = %record.battle_id, tick = record.tick, error = %err, "Failed to persist battle");
            }
        });
        self.pending_saves.push(save);
    }

    fn handle_input(&mut self, input: BattleInput) {
        let tick = self.engine.tick();
        match input {
            BattleInput::Command(command) => {
                if let Err(reason) = self.engine.queue_command(command.clone()) {
                    warn!(
                        battle_id = %self.engine.id(),
                        fleet_id = %command.fleet_id,
                        command = ?command.kind,
                        reason = reason.code(),
                        "Command rejected"
                    );
                }
                return;
            }
            BattleInput::Join { loadout, reply } => {
                let _ = reply.send(self.engine.add_participant(loadout));
            }
            BattleInput::Leave { fleet_id, reply } => {
                let _ = reply.send(self.engine.remove_participant(&fleet_id).map(|_| ()));
            }
            BattleInput::Start { reply } => {
                let outcome = self.engine.start();
                if matches!(outcome, Ok(true)) {
                    let _ = self.message_tx.send(BattleMessage::Started { tick });
                }
                let _ = reply.send(outcome);
            }
            BattleInput::Pause { reply } => {
                let outcome = self.engine.pause();
                if matches!(outcome, Ok(true)) {
                    let _ = self.message_tx.send(BattleMessage::Paused { tick });
                }
                let _ = reply.send(outcome);
            }
            BattleInput::Resume { reply } => {
                let outcome = self.engine.resume();
                if matches!(outcome, Ok(true)) {
                    let _ = self.message_tx.send(BattleMessage::Resumed { tick });
                }
                let _ = reply.send(outcome);
            }
            BattleInput::Stop { reply } => {
                self.running = false;
                self.stop_replies.push(reply);
                return;
            }
            BattleInput::Retreat {
                fleet_id,
                destination,
                reply,
            } => {
                let _ = reply.send(self.engine.request_retreat(fleet_id, destination));
            }
            BattleInput::CancelRetreat { fleet_id, reply } => {
                let _ = reply.send(self.engine.cancel_retreat(fleet_id));
            }
            BattleInput::Reinforce {
                loadout,
                priority,
                reply,
            } => {
                let _ = reply.send(self.engine.request_reinforcement(loadout, priority));
            }
            BattleInput::Resupply {
                fleet_id,
                top_up,
                reply,
            } => {
                let _ = reply.send(self.engine.resupply(fleet_id, top_up));
            }
        }

        // Control traffic changes state between ticks
        self.state_tx.send_replace(Arc::new(self.engine.snapshot()));
    }

    /// Terminal bookkeeping: result, final snapshot, awaited save, notify
    async fn finish(mut self) -> BattleResult {
        let battle_id = self.engine.id();
        let result = self.engine.stop();

        let snapshot = Arc::new(self.engine.publish());
        self.state_tx.send_replace(snapshot.clone());
        let _ = self.message_tx.send(BattleMessage::Snapshot(snapshot));

        // The terminal record has to be the last write
        for save in self.pending_saves.drain(..) {
            if let Err(err) = save.await {
                warn!(battle_id = %battle_id, error = %err, "Periodic save task failed");
            }
        }
        if let Err(err) = self.store.save(&self.engine.record()).await {
            error!(battle_id = %battle_id, error = %err, "Failed to persist final battle record");
        }

        let _ = self.message_tx.send(BattleMessage::Ended {
            tick: self.engine.tick(),
            result: result.clone(),
        });
        for reply in self.stop_replies.drain(..) {
            let _ = reply.send(result.clone());
        }

        info!(battle_id = %battle_id, reason = ?result.reason, winner = ?result.winner, "Battle loop finished");
        result
    }
}
