//! Match and player session tracking for the game server
//!
//! This module owns the in-memory session state, including:
//! - Match lifecycle (created on first reference, removed with the last player)
//! - Player membership and endpoint tracking within a match
//! - Endpoint-to-identity indices for O(1) sender resolution
//!
//! The two endpoint indices are maintained in lockstep with match/player
//! membership: every index entry refers to a live player, and every mutation
//! updates membership and indices together. The registry has a single writer
//! (the transport loop dispatches datagrams sequentially), so no internal
//! locking is needed.
//!
//! The documented command set never populates the registry; it exists as
//! infrastructure for session-establishing commands and is consulted for
//! sender resolution only.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;

/// A player tracked within a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    /// User identifier from the originating command.
    pub user_id: String,
    /// Transport endpoint the player last spoke from. Overwritten when the
    /// player reconnects from a new address.
    pub endpoint: SocketAddr,
}

/// A match and its current players, keyed by user identifier.
#[derive(Debug, Default)]
pub struct Match {
    players: HashMap<String, Player>,
}

impl Match {
    /// Number of players currently in the match.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Looks up a player by user identifier.
    pub fn player(&self, user_id: &str) -> Option<&Player> {
        self.players.get(user_id)
    }
}

/// In-memory registry of matches, players, and endpoint indices.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    matches: HashMap<String, Match>,
    addr_to_match: HashMap<SocketAddr, String>,
    addr_to_player: HashMap<SocketAddr, String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a sender endpoint to its logical identity, if any.
    pub fn resolve(&self, endpoint: SocketAddr) -> Option<(&str, &str)> {
        let match_id = self.addr_to_match.get(&endpoint)?;
        let user_id = self.addr_to_player.get(&endpoint)?;
        Some((match_id.as_str(), user_id.as_str()))
    }

    /// Adds a player to a match, creating the match if absent.
    ///
    /// If the player is already present, their endpoint is overwritten and
    /// the stale index entries for the previous endpoint are dropped first,
    /// keeping the indices consistent with membership.
    pub fn ensure_player(&mut self, match_id: &str, user_id: &str, endpoint: SocketAddr) {
        let game_match = self.matches.entry(match_id.to_string()).or_default();

        if let Some(existing) = game_match.players.get(user_id) {
            if existing.endpoint != endpoint {
                self.addr_to_match.remove(&existing.endpoint);
                self.addr_to_player.remove(&existing.endpoint);
                info!(
                    "Player {} in match {} reconnected from {}",
                    user_id, match_id, endpoint
                );
            }
        } else {
            info!("Player {} joined match {} from {}", user_id, match_id, endpoint);
        }

        game_match.players.insert(
            user_id.to_string(),
            Player {
                user_id: user_id.to_string(),
                endpoint,
            },
        );
        self.addr_to_match.insert(endpoint, match_id.to_string());
        self.addr_to_player.insert(endpoint, user_id.to_string());
    }

    /// Removes a player from a match.
    ///
    /// Drops the player's index entries and removes the match when its last
    /// player leaves. Returns false if the match or player was unknown.
    pub fn remove_player(&mut self, match_id: &str, user_id: &str) -> bool {
        let Some(game_match) = self.matches.get_mut(match_id) else {
            return false;
        };
        let Some(player) = game_match.players.remove(user_id) else {
            return false;
        };

        // Another identity may have since claimed this endpoint; only drop
        // index entries that still point at the removed player.
        if self.addr_to_player.get(&player.endpoint).map(String::as_str) == Some(user_id) {
            self.addr_to_match.remove(&player.endpoint);
            self.addr_to_player.remove(&player.endpoint);
        }

        if game_match.is_empty() {
            self.matches.remove(match_id);
            info!("Match {} is empty, removing", match_id);
        }
        info!("Player {} left match {}", user_id, match_id);
        true
    }

    /// Returns the user identifiers in a match, sorted for deterministic
    /// iteration. Empty if the match is unknown.
    pub fn snapshot(&self, match_id: &str) -> Vec<String> {
        let mut user_ids: Vec<String> = self
            .matches
            .get(match_id)
            .map(|m| m.players.keys().cloned().collect())
            .unwrap_or_default();
        user_ids.sort();
        user_ids
    }

    /// Looks up a match by identifier.
    pub fn get_match(&self, match_id: &str) -> Option<&Match> {
        self.matches.get(match_id)
    }

    /// Number of live matches.
    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// Total number of tracked players across all matches.
    pub fn player_count(&self) -> usize {
        self.matches.values().map(Match::len).sum()
    }
}
