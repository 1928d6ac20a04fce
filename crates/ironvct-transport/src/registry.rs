use std::collections::HashMap;

use ironvct_pdu::{ChannelName, ChannelOptions};
use slab::Slab;

use crate::backend::BackendHandle;
use crate::pool::Reliability;
use crate::{TransportError, TransportResult};

/// Identifies a registered channel within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(usize);

impl ChannelId {
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Registered with the transport, not yet confirmed by the backend.
    Registered,
    /// The backend confirmed initialization; the channel is readable and writable.
    Open(BackendHandle),
    /// Explicitly closed, or shut down by a backend disconnect. The name stays
    /// reserved until session teardown.
    Closed,
}

#[derive(Debug)]
pub struct ChannelEntry {
    name: ChannelName,
    options: ChannelOptions,
    reliability: Reliability,
    state: ChannelState,
}

impl ChannelEntry {
    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    pub fn options(&self) -> ChannelOptions {
        self.options
    }

    pub fn reliability(&self) -> Reliability {
        self.reliability
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn handle(&self) -> Option<BackendHandle> {
        match self.state {
            ChannelState::Open(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ChannelState::Open(_))
    }
}

/// Tracks named channels, their open handles and lifecycle state.
///
/// The name index is built at registration time: lookups are O(1),
/// case-insensitive, first seven characters significant.
#[derive(Debug)]
pub struct ChannelRegistry {
    channels: Slab<ChannelEntry>,
    by_name: HashMap<[u8; ChannelName::SIGNIFICANT], ChannelId>,
    limit: usize,
}

impl ChannelRegistry {
    pub fn new(limit: usize) -> Self {
        Self {
            channels: Slab::new(),
            by_name: HashMap::new(),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn register(
        &mut self,
        name: ChannelName,
        options: ChannelOptions,
        reliability: Reliability,
    ) -> TransportResult<ChannelId> {
        if self.channels.len() >= self.limit {
            return Err(TransportError::TooManyChannels { limit: self.limit });
        }

        let key = name.normalized();
        if self.by_name.contains_key(&key) {
            return Err(TransportError::DuplicateName(name));
        }

        let id = ChannelId(self.channels.insert(ChannelEntry {
            name,
            options,
            reliability,
            state: ChannelState::Registered,
        }));
        self.by_name.insert(key, id);

        debug!(name = %name, ?id, "channel registered");

        Ok(id)
    }

    /// Binds `handle` to the channel once the backend has confirmed
    /// initialization.
    pub fn open(&mut self, id: ChannelId, handle: BackendHandle) -> TransportResult<()> {
        let entry = self.channels.get_mut(id.0).ok_or(TransportError::BadChannel)?;

        match entry.state {
            ChannelState::Open(_) => Err(TransportError::AlreadyOpen),
            ChannelState::Registered | ChannelState::Closed => {
                entry.state = ChannelState::Open(handle);
                Ok(())
            }
        }
    }

    /// Transitions the channel to Closed and returns the handle it held.
    ///
    /// Closing a channel that is not open fails with `NotOpen` and has no
    /// other side effect.
    pub fn close(&mut self, id: ChannelId) -> TransportResult<BackendHandle> {
        let entry = self.channels.get_mut(id.0).ok_or(TransportError::BadChannel)?;

        match entry.state {
            ChannelState::Open(handle) => {
                entry.state = ChannelState::Closed;
                Ok(handle)
            }
            ChannelState::Registered | ChannelState::Closed => Err(TransportError::NotOpen),
        }
    }

    /// Transitions every channel that is not already Closed to Closed, for
    /// session teardown.
    ///
    /// Returns the affected channels along with the backend handle each one
    /// held, if it was open. Channels already Closed are skipped, which makes
    /// a second teardown signal a no-op.
    pub fn teardown(&mut self) -> Vec<(ChannelId, Option<BackendHandle>)> {
        let mut closed = Vec::new();

        for (key, entry) in self.channels.iter_mut() {
            match entry.state {
                ChannelState::Closed => {}
                ChannelState::Registered => {
                    entry.state = ChannelState::Closed;
                    closed.push((ChannelId(key), None));
                }
                ChannelState::Open(handle) => {
                    entry.state = ChannelState::Closed;
                    closed.push((ChannelId(key), Some(handle)));
                }
            }
        }

        closed
    }

    pub fn lookup(&self, name: &ChannelName) -> Option<ChannelId> {
        self.by_name.get(&name.normalized()).copied()
    }

    pub fn get(&self, id: ChannelId) -> Option<&ChannelEntry> {
        self.channels.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, &ChannelEntry)> {
        self.channels.iter().map(|(key, entry)| (ChannelId(key), entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ChannelRegistry {
        ChannelRegistry::new(30)
    }

    #[test]
    fn lookup_is_case_insensitive_over_seven_characters() {
        let mut registry = registry();

        let id = registry
            .register(
                ChannelName::from_utf8("CLIPRDR").unwrap(),
                ChannelOptions::empty(),
                Reliability::Reliable,
            )
            .unwrap();

        let probe = ChannelName::from_utf8("cliprdr").unwrap();
        assert_eq!(registry.lookup(&probe), Some(id));
    }

    #[test]
    fn names_identical_in_first_seven_characters_collide() {
        let mut registry = registry();

        registry
            .register(
                ChannelName::from_utf8("TELEMETRY").unwrap(),
                ChannelOptions::empty(),
                Reliability::Reliable,
            )
            .unwrap();

        let err = registry
            .register(
                ChannelName::from_utf8("telemetr").unwrap(),
                ChannelOptions::empty(),
                Reliability::Reliable,
            )
            .unwrap_err();

        assert!(matches!(err, TransportError::DuplicateName(_)));
    }

    #[test]
    fn channel_limit_is_enforced() {
        let mut registry = ChannelRegistry::new(2);

        for name in ["one", "two"] {
            registry
                .register(
                    ChannelName::from_utf8(name).unwrap(),
                    ChannelOptions::empty(),
                    Reliability::Reliable,
                )
                .unwrap();
        }

        let err = registry
            .register(
                ChannelName::from_utf8("three").unwrap(),
                ChannelOptions::empty(),
                Reliability::Reliable,
            )
            .unwrap_err();

        assert_eq!(err, TransportError::TooManyChannels { limit: 2 });
    }

    #[test]
    fn open_before_registration_fails_with_bad_channel() {
        let mut registry = registry();

        assert_eq!(
            registry.open(ChannelId(7), BackendHandle(1)),
            Err(TransportError::BadChannel)
        );
    }

    #[test]
    fn double_open_fails_with_already_open() {
        let mut registry = registry();

        let id = registry
            .register(
                ChannelName::from_utf8("SND").unwrap(),
                ChannelOptions::empty(),
                Reliability::Reliable,
            )
            .unwrap();

        registry.open(id, BackendHandle(1)).unwrap();
        assert_eq!(
            registry.open(id, BackendHandle(2)),
            Err(TransportError::AlreadyOpen)
        );
    }

    #[test]
    fn double_close_fails_with_not_open_and_no_side_effects() {
        let mut registry = registry();

        let id = registry
            .register(
                ChannelName::from_utf8("SND").unwrap(),
                ChannelOptions::empty(),
                Reliability::Reliable,
            )
            .unwrap();

        registry.open(id, BackendHandle(1)).unwrap();
        assert_eq!(registry.close(id), Ok(BackendHandle(1)));

        assert_eq!(registry.close(id), Err(TransportError::NotOpen));
        assert_eq!(registry.get(id).unwrap().state(), ChannelState::Closed);
        assert_eq!(registry.len(), 1);
    }
}
