//! Per-frame input sets and the input ledger
//!
//! [`FrameInputs`] is what the simulation consumes for one tick.
//! [`InputLedger`] holds the inputs that have actually been received and
//! builds a complete [`FrameInputs`] for any frame, filling the gaps with the
//! carry-forward rule documented on [`InputLedger::build`].

use std::collections::BTreeMap;

use hashbrown::HashMap;
use rollsync_shared::{Frame, PlayerId, QuantizedInput};
use smallvec::SmallVec;

/// Inputs for every active player on one frame, sorted by player id.
///
/// Inline storage covers a full eight-player room without allocating.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameInputs {
    entries: SmallVec<[(PlayerId, QuantizedInput); 8]>,
}

impl FrameInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Input for `player`, if present
    pub fn get(&self, player: PlayerId) -> Option<&QuantizedInput> {
        self.entries
            .binary_search_by_key(&player, |(id, _)| *id)
            .ok()
            .map(|index| &self.entries[index].1)
    }

    /// Set the input for `player`, returning the previous value
    pub fn set(&mut self, player: PlayerId, input: QuantizedInput) -> Option<QuantizedInput> {
        match self.entries.binary_search_by_key(&player, |(id, _)| *id) {
            Ok(index) => Some(std::mem::replace(&mut self.entries[index].1, input)),
            Err(index) => {
                self.entries.insert(index, (player, input));
                None
            }
        }
    }

    pub fn contains(&self, player: PlayerId) -> bool {
        self.get(player).is_some()
    }

    /// Iterate `(player, input)` pairs in player order
    pub fn iter(&self) -> impl Iterator<Item = (PlayerId, QuantizedInput)> + '_ {
        self.entries.iter().copied()
    }

    pub fn players(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(PlayerId, QuantizedInput)> for FrameInputs {
    fn from_iter<I: IntoIterator<Item = (PlayerId, QuantizedInput)>>(iter: I) -> Self {
        let mut inputs = Self::new();
        for (player, input) in iter {
            inputs.set(player, input);
        }
        inputs
    }
}

/// Received inputs, keyed by frame.
///
/// Only inputs that arrived (locally sampled or from the network) are stored
/// here. Predictions are never written back, so a prediction made before a
/// correction arrived cannot outlive the correction.
#[derive(Debug, Default)]
pub struct InputLedger {
    received: BTreeMap<Frame, FrameInputs>,
    /// Highest-frame input seen per player. Survives trimming.
    latest: HashMap<PlayerId, (Frame, QuantizedInput)>,
}

impl InputLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an input for `(frame, player)`.
    ///
    /// Returns `true` when this changes what the ledger holds for that pair,
    /// i.e. the input is new or differs from the one previously recorded.
    pub fn record(&mut self, frame: Frame, player: PlayerId, input: QuantizedInput) -> bool {
        let previous = self.received.entry(frame).or_default().set(player, input);
        match self.latest.get(&player) {
            Some((latest_frame, _)) if *latest_frame > frame => {}
            _ => {
                self.latest.insert(player, (frame, input));
            }
        }
        previous != Some(input)
    }

    /// Input actually received for `(frame, player)`
    pub fn received(&self, frame: Frame, player: PlayerId) -> Option<QuantizedInput> {
        self.received
            .get(&frame)
            .and_then(|inputs| inputs.get(player))
            .copied()
    }

    /// Build the inputs for `frame` covering every player in `players`.
    ///
    /// Carry-forward rule, applied per player:
    ///
    /// 1. the input received for `frame`, if any;
    /// 2. otherwise the input received for the nearest earlier frame still
    ///    held by the ledger;
    /// 3. otherwise the player's most recent input seen at any frame;
    /// 4. otherwise [`QuantizedInput::NEUTRAL`].
    ///
    /// Players not listed in `players` are left out even if the ledger holds
    /// input for them.
    pub fn build(&self, frame: Frame, players: impl IntoIterator<Item = PlayerId>) -> FrameInputs {
        players
            .into_iter()
            .map(|player| (player, self.carried_input(frame, player)))
            .collect()
    }

    fn carried_input(&self, frame: Frame, player: PlayerId) -> QuantizedInput {
        self.received
            .range(..=frame)
            .rev()
            .find_map(|(_, inputs)| inputs.get(player).copied())
            .or_else(|| self.latest.get(&player).map(|(_, input)| *input))
            .unwrap_or(QuantizedInput::NEUTRAL)
    }

    /// Drop every frame older than `min_frame`
    pub fn trim(&mut self, min_frame: Frame) {
        self.received = self.received.split_off(&min_frame);
    }

    /// Forget a player entirely (after they leave)
    pub fn forget(&mut self, player: PlayerId) {
        self.latest.remove(&player);
        for inputs in self.received.values_mut() {
            if inputs.contains(player) {
                inputs.entries.retain(|(id, _)| *id != player);
            }
        }
    }

    pub fn clear(&mut self) {
        self.received.clear();
        self.latest.clear();
    }

    /// Oldest frame with any received input
    pub fn oldest_frame(&self) -> Option<Frame> {
        self.received.keys().next().copied()
    }
}
