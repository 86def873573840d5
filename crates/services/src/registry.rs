//! Room registry: code allocation, lookup and presence.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use pointroom_config::LifecycleSettings;
use pointroom_db::models::{Participant, Room};
use pointroom_protocol::ids::ROOM_CODE_LEN;
use pointroom_protocol::{Role, RoomCode, RoomSettings, RoomSettingsPatch, RoomStatus, UserId};
use tracing::{debug, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::room::RoomState;

pub type RoomHandle = Arc<Mutex<RoomState>>;

const CODE_ALPHABET: [char; 36] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
    'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Source of candidate room codes.
pub trait CodeGenerator: Send + Sync + 'static {
    fn generate(&self) -> String;
}

/// Uniform draw over `[A-Z0-9]{6}`.
pub struct RandomCodes;

impl CodeGenerator for RandomCodes {
    fn generate(&self) -> String {
        nanoid::nanoid!(ROOM_CODE_LEN, &CODE_ALPHABET)
    }
}

/// Hands out a fixed sequence of codes, then repeats the last one. Lets
/// tests and fixtures predict room codes and force collisions.
pub struct SequenceCodes {
    codes: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl SequenceCodes {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: Mutex::new(codes.into_iter().map(Into::into).collect()),
            last: Mutex::new("ZZZZZZ".to_string()),
        }
    }
}

impl CodeGenerator for SequenceCodes {
    fn generate(&self) -> String {
        let mut last = self.last.lock();
        if let Some(next) = self.codes.lock().pop_front() {
            *last = next;
        }
        last.clone()
    }
}

pub struct NewRoom {
    pub host_id: UserId,
    pub host_name: String,
    pub name: String,
    pub description: Option<String>,
    pub settings: RoomSettings,
}

pub struct Registry {
    rooms: DashMap<RoomCode, RoomHandle>,
    codes: Box<dyn CodeGenerator>,
    code_retries: u32,
    idle_window: TimeDelta,
    retention: TimeDelta,
}

impl Registry {
    pub fn new(settings: &LifecycleSettings, codes: Box<dyn CodeGenerator>) -> Self {
        Self {
            rooms: DashMap::new(),
            codes,
            code_retries: settings.code_retries.max(1),
            idle_window: TimeDelta::hours(settings.inactivity_hours),
            retention: TimeDelta::days(settings.retention_days),
        }
    }

    /// Allocates a fresh code and inserts the room with the host as its only
    /// participant. Each attempt claims the code atomically; a taken code is
    /// retried with a new draw until the retry budget runs out.
    pub fn create_room(&self, new: NewRoom, now: DateTime<Utc>) -> ServiceResult<RoomHandle> {
        for attempt in 1..=self.code_retries {
            let candidate = self.codes.generate();
            let code = match RoomCode::parse(&candidate) {
                Ok(code) => code,
                Err(e) => {
                    warn!(%candidate, error = %e, "Code generator produced an invalid code");
                    continue;
                }
            };
            match self.rooms.entry(code.clone()) {
                Entry::Occupied(_) => {
                    debug!(%code, attempt, "Room code collision");
                }
                Entry::Vacant(slot) => {
                    let state = self.new_state(code, &new, now);
                    let handle = Arc::new(Mutex::new(state));
                    slot.insert(handle.clone());
                    return Ok(handle);
                }
            }
        }
        Err(ServiceError::Conflict(format!(
            "Could not allocate a room code after {} attempts",
            self.code_retries
        )))
    }

    fn new_state(&self, code: RoomCode, new: &NewRoom, now: DateTime<Utc>) -> RoomState {
        let at = bson::DateTime::from_chrono(now);
        let room = Room {
            id: code.to_string(),
            name: new.name.trim().to_string(),
            description: new.description.clone(),
            host_id: new.host_id.clone(),
            participants: vec![Participant {
                user_id: new.host_id.clone(),
                display_name: new.host_name.clone(),
                role: Role::Host,
                is_online: true,
                joined_at: at,
                last_activity: at,
            }],
            settings: new.settings.clone(),
            status: RoomStatus::Active,
            created_at: at,
            last_activity: at,
            expires_at: bson::DateTime::from_chrono(now + self.idle_window),
            archived_at: None,
        };
        RoomState::new(code, room, self.idle_window)
    }

    pub fn get(&self, code: &RoomCode) -> ServiceResult<RoomHandle> {
        self.rooms
            .get(code)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceError::NotFound(format!("Room {code} not found")))
    }

    /// Normalizes raw user input before the lookup.
    pub fn lookup(&self, raw: &str) -> ServiceResult<(RoomCode, RoomHandle)> {
        let code = RoomCode::parse(raw)?;
        let handle = self.get(&code)?;
        Ok((code, handle))
    }

    /// Inserts a room rebuilt from the store. An existing entry wins.
    pub fn restore(&self, state: RoomState) -> Option<RoomHandle> {
        match self.rooms.entry(state.code.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let handle = Arc::new(Mutex::new(state));
                slot.insert(handle.clone());
                Some(handle)
            }
        }
    }

    pub fn remove(&self, code: &RoomCode) -> Option<RoomHandle> {
        self.rooms.remove(code).map(|(_, handle)| handle)
    }

    /// Handles of every room, collected so no map guard is held while a room
    /// lock is taken.
    pub fn handles(&self) -> Vec<RoomHandle> {
        self.rooms.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn idle_window(&self) -> TimeDelta {
        self.idle_window
    }

    pub fn retention(&self) -> TimeDelta {
        self.retention
    }
}

// ── Presence and room administration ────────────────────────────

pub struct JoinOutcome {
    pub participant: Participant,
    pub rejoined: bool,
}

impl RoomState {
    /// Reactivates a known participant or appends a new one. Known
    /// participants keep their role; newcomers may ask for `participant` or,
    /// when the room allows it, `spectator`.
    pub fn join(
        &mut self,
        user_id: &str,
        display_name: String,
        requested: Option<Role>,
        now: DateTime<Utc>,
    ) -> ServiceResult<JoinOutcome> {
        if !self.is_active() {
            return Err(ServiceError::NotFound(format!(
                "Room {} is no longer active",
                self.code
            )));
        }
        let at = bson::DateTime::from_chrono(now);

        if let Some(existing) = self.room.participant_mut(user_id) {
            existing.is_online = true;
            existing.display_name = display_name;
            existing.last_activity = at;
            let participant = existing.clone();
            self.touch(now);
            return Ok(JoinOutcome {
                participant,
                rejoined: true,
            });
        }

        let role = match requested.unwrap_or(Role::Participant) {
            Role::Participant => Role::Participant,
            Role::Spectator if self.room.settings.allow_spectators => Role::Spectator,
            Role::Spectator => {
                return Err(ServiceError::Authorization(
                    "This room does not allow spectators".to_string(),
                ));
            }
            Role::Host | Role::Facilitator => {
                return Err(ServiceError::Authorization(
                    "Only the host can grant elevated roles".to_string(),
                ));
            }
        };

        let participant = Participant {
            user_id: user_id.to_string(),
            display_name,
            role,
            is_online: true,
            joined_at: at,
            last_activity: at,
        };
        self.room.participants.push(participant.clone());
        self.touch(now);
        Ok(JoinOutcome {
            participant,
            rejoined: false,
        })
    }

    /// Marks the participant offline. Votes are left alone. Returns false
    /// when the user was already offline or unknown.
    pub fn leave(&mut self, user_id: &str, now: DateTime<Utc>) -> bool {
        let at = bson::DateTime::from_chrono(now);
        let changed = match self.room.participant_mut(user_id) {
            Some(p) if p.is_online => {
                p.is_online = false;
                p.last_activity = at;
                true
            }
            _ => false,
        };
        if changed {
            self.touch(now);
        }
        changed
    }

    pub fn update_settings(
        &mut self,
        caller: &str,
        patch: &RoomSettingsPatch,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        self.ensure_active()?;
        self.require_host(caller, "change room settings")?;
        self.room.settings.merge(patch);
        self.touch(now);
        Ok(())
    }

    pub fn assign_role(
        &mut self,
        caller: &str,
        target: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> ServiceResult<Participant> {
        self.ensure_active()?;
        self.require_host(caller, "assign roles")?;
        if role == Role::Host {
            return Err(ServiceError::Validation(
                "The host role cannot be assigned".to_string(),
            ));
        }
        if role == Role::Spectator && !self.room.settings.allow_spectators {
            return Err(ServiceError::Validation(
                "This room does not allow spectators".to_string(),
            ));
        }
        let code = self.code.clone();
        let member = self
            .room
            .participant_mut(target)
            .ok_or_else(|| ServiceError::NotFound(format!("{target} is not a member of room {code}")))?;
        if member.role == Role::Host {
            return Err(ServiceError::Conflict(
                "The host's role cannot be changed".to_string(),
            ));
        }
        member.role = role;
        let participant = member.clone();
        self.touch(now);
        Ok(participant)
    }

    /// Explicit archive by the host.
    pub fn archive(&mut self, caller: &str, now: DateTime<Utc>) -> ServiceResult<()> {
        self.ensure_active()?;
        self.require_host(caller, "archive the room")?;
        self.mark_archived(now);
        Ok(())
    }

    pub(crate) fn mark_archived(&mut self, now: DateTime<Utc>) {
        self.cancel_timers();
        self.room.status = RoomStatus::Archived;
        self.room.archived_at = Some(bson::DateTime::from_chrono(now));
        for p in &mut self.room.participants {
            p.is_online = false;
        }
    }

    /// Active and untouched for longer than the inactivity window.
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && now - self.last_activity() > self.idle_window
    }

    /// Archived for longer than `retention`.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: TimeDelta) -> bool {
        match (self.room.status, self.room.archived_at) {
            (RoomStatus::Archived, Some(at)) => now - at.to_chrono() > retention,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(list: &[&str]) -> Box<SequenceCodes> {
        Box::new(SequenceCodes::new(list.iter().copied()))
    }

    fn lifecycle(retries: u32) -> LifecycleSettings {
        LifecycleSettings {
            code_retries: retries,
            ..LifecycleSettings::default()
        }
    }

    fn new_room(host: &str) -> NewRoom {
        NewRoom {
            host_id: host.to_string(),
            host_name: host.to_string(),
            name: "Sprint 12".to_string(),
            description: None,
            settings: RoomSettings::default(),
        }
    }

    #[test]
    fn random_codes_match_the_format() {
        for _ in 0..100 {
            let code = RandomCodes.generate();
            assert!(RoomCode::parse(&code).is_ok(), "bad code {code}");
            assert_eq!(code, code.to_ascii_uppercase());
        }
    }

    #[test]
    fn collision_draws_a_fresh_code() {
        let registry = Registry::new(&lifecycle(10), codes(&["ABC123", "ABC123", "XYZ789"]));
        let first = registry.create_room(new_room("alice"), Utc::now()).unwrap();
        let second = registry.create_room(new_room("bob"), Utc::now()).unwrap();

        assert_eq!(first.lock().code.as_str(), "ABC123");
        assert_eq!(second.lock().code.as_str(), "XYZ789");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn exhausted_retries_is_a_conflict() {
        let registry = Registry::new(&lifecycle(2), codes(&["ABC123", "ABC123", "ABC123"]));
        registry.create_room(new_room("alice"), Utc::now()).unwrap();
        let err = registry.create_room(new_room("bob"), Utc::now()).err().unwrap();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[test]
    fn host_is_sole_participant() {
        let registry = Registry::new(&lifecycle(10), codes(&["ABC123"]));
        let handle = registry.create_room(new_room("alice"), Utc::now()).unwrap();
        let room = handle.lock();
        assert_eq!(room.room.host_id, "alice");
        assert_eq!(room.room.participants.len(), 1);
        assert_eq!(room.room.participants[0].role, Role::Host);
        assert!(room.room.participants[0].is_online);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = Registry::new(&lifecycle(10), codes(&["ABC123"]));
        registry.create_room(new_room("alice"), Utc::now()).unwrap();

        let (code, _) = registry.lookup("abc123").unwrap();
        assert_eq!(code.as_str(), "ABC123");
        assert!(matches!(registry.lookup("ABC124"), Err(ServiceError::NotFound(_))));
        assert!(matches!(registry.lookup("AB!123"), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn rejoin_keeps_history_and_role() {
        let registry = Registry::new(&lifecycle(10), codes(&["ABC123"]));
        let handle = registry.create_room(new_room("alice"), Utc::now()).unwrap();
        let mut room = handle.lock();

        let first = room.join("bob", "Bob".to_string(), None, Utc::now()).unwrap();
        assert!(!first.rejoined);
        assert_eq!(first.participant.role, Role::Participant);

        assert!(room.leave("bob", Utc::now()));
        assert!(!room.leave("bob", Utc::now()));
        assert!(!room.room.participant("bob").unwrap().is_online);

        let again = room.join("bob", "Bobby".to_string(), None, Utc::now()).unwrap();
        assert!(again.rejoined);
        assert_eq!(again.participant.display_name, "Bobby");
        assert_eq!(room.room.participants.len(), 2);
    }

    #[test]
    fn spectators_need_permission() {
        let registry = Registry::new(&lifecycle(10), codes(&["ABC123"]));
        let handle = registry.create_room(new_room("alice"), Utc::now()).unwrap();
        let mut room = handle.lock();

        let denied = room.join("eve", "Eve".to_string(), Some(Role::Spectator), Utc::now());
        assert!(matches!(denied, Err(ServiceError::Authorization(_))));

        let patch = RoomSettingsPatch {
            allow_spectators: Some(true),
            ..Default::default()
        };
        room.update_settings("alice", &patch, Utc::now()).unwrap();
        let joined = room
            .join("eve", "Eve".to_string(), Some(Role::Spectator), Utc::now())
            .unwrap();
        assert_eq!(joined.participant.role, Role::Spectator);
        assert_eq!(room.eligible_voters().collect::<Vec<_>>(), vec!["alice"]);
    }

    #[test]
    fn only_host_changes_settings_and_roles() {
        let registry = Registry::new(&lifecycle(10), codes(&["ABC123"]));
        let handle = registry.create_room(new_room("alice"), Utc::now()).unwrap();
        let mut room = handle.lock();
        room.join("bob", "Bob".to_string(), None, Utc::now()).unwrap();

        let patch = RoomSettingsPatch {
            timer_duration: Some(90),
            ..Default::default()
        };
        assert!(matches!(
            room.update_settings("bob", &patch, Utc::now()),
            Err(ServiceError::Authorization(_))
        ));
        assert_eq!(room.room.settings.timer_duration, 60);

        let promoted = room
            .assign_role("alice", "bob", Role::Facilitator, Utc::now())
            .unwrap();
        assert_eq!(promoted.role, Role::Facilitator);
        assert!(room.require_admin("bob", "reveal votes").is_ok());
        assert!(matches!(
            room.assign_role("bob", "alice", Role::Participant, Utc::now()),
            Err(ServiceError::Authorization(_))
        ));
        assert!(matches!(
            room.assign_role("alice", "bob", Role::Host, Utc::now()),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn idle_and_expiry_windows() {
        let registry = Registry::new(&lifecycle(10), codes(&["ABC123"]));
        let start = Utc::now();
        let handle = registry.create_room(new_room("alice"), start).unwrap();
        let mut room = handle.lock();

        assert!(!room.is_idle(start + TimeDelta::hours(23)));
        assert!(room.is_idle(start + TimeDelta::hours(25)));

        let archived_at = start + TimeDelta::hours(25);
        room.mark_archived(archived_at);
        assert!(!room.is_idle(archived_at + TimeDelta::hours(1)));
        assert!(!room.is_expired(archived_at + TimeDelta::days(6), registry.retention()));
        assert!(room.is_expired(archived_at + TimeDelta::days(8), registry.retention()));

        let rejoin = room.join("alice", "Alice".to_string(), None, archived_at);
        assert!(matches!(rejoin, Err(ServiceError::NotFound(_))));
    }
}
