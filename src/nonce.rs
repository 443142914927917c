// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server nonces and opaque values for `Digest` challenges.
//!
//! By default nonces are stateless: each is 128 random bits, handed to the
//! client and never recorded. Replay protection is then the job of a
//! [`crate::digest::NonceValidator`]. A [`NonceManager::tracking`] manager
//! instead remembers what it issued, expires nonces after a TTL and rejects
//! nonce counts that do not increase.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::debug;
use rand::Rng as _;

/// Returns 128 random bits as 32 lowercase hex digits.
pub fn random_token() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Limits for a tracking [`NonceManager`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NonceTracking {
    /// How long an issued nonce stays valid. Defaults to five minutes.
    pub ttl: Duration,

    /// The most nonces remembered at once; the oldest are forgotten first.
    /// Defaults to 65 536.
    pub max_entries: usize,
}

impl Default for NonceTracking {
    fn default() -> Self {
        NonceTracking {
            ttl: Duration::from_secs(300),
            max_entries: 65_536,
        }
    }
}

/// Result of [`NonceManager::check`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NonceStatus {
    /// Acceptable; the nonce count has been recorded.
    Fresh,

    /// Expired, unknown, or already used without a nonce count. The client
    /// should retry with a new nonce.
    Stale,

    /// The nonce count did not increase.
    Replayed,
}

/// Remembered nonces. `order` holds every key of `last_nc` exactly once, in
/// issue order; since `Instant` never decreases, its front is always the
/// oldest entry.
#[derive(Debug, Default)]
struct Table {
    /// Highest nonce count accepted so far per nonce; 0 if unused.
    last_nc: HashMap<String, u32>,
    order: VecDeque<(Instant, String)>,
}

impl Table {
    fn pop_oldest(&mut self) {
        if let Some((_, nonce)) = self.order.pop_front() {
            self.last_nc.remove(&nonce);
        }
    }
}

#[derive(Debug)]
struct Tracker {
    limits: NonceTracking,
    table: Mutex<Table>,
}

impl Tracker {
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forgets expired nonces, oldest first.
    fn prune(&self, table: &mut Table, now: Instant) {
        while let Some(&(issued, _)) = table.order.front() {
            if now.duration_since(issued) < self.limits.ttl {
                break;
            }
            table.pop_oldest();
        }
    }
}

/// Issues nonces, optionally remembering them.
#[derive(Debug)]
pub struct NonceManager {
    tracker: Option<Tracker>,
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::stateless()
    }
}

impl NonceManager {
    /// A manager which records nothing; [`NonceManager::check`] always
    /// reports [`NonceStatus::Fresh`].
    pub fn stateless() -> Self {
        NonceManager { tracker: None }
    }

    /// A manager which records issued nonces and enforces `limits`.
    pub fn tracking(limits: NonceTracking) -> Self {
        NonceManager {
            tracker: Some(Tracker {
                limits: NonceTracking {
                    max_entries: limits.max_entries.max(1),
                    ..limits
                },
                table: Mutex::new(Table::default()),
            }),
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.tracker.is_some()
    }

    /// Returns a fresh nonce.
    ///
    /// A tracking manager never hands out a nonce it is still remembering.
    pub fn issue(&self) -> String {
        let tracker = match &self.tracker {
            None => return random_token(),
            Some(t) => t,
        };
        let now = Instant::now();
        let mut table = tracker.lock();
        tracker.prune(&mut table, now);
        while table.order.len() >= tracker.limits.max_entries {
            table.pop_oldest();
        }
        loop {
            let nonce = random_token();
            if table.last_nc.contains_key(&nonce) {
                continue;
            }
            table.last_nc.insert(nonce.clone(), 0);
            table.order.push_back((now, nonce.clone()));
            return nonce;
        }
    }

    /// Checks a nonce presented with verified credentials, recording its use.
    ///
    /// `nc` is the client's nonce count, absent when no `qop` was used. A
    /// nonce used without a count is good for one request.
    pub fn check(&self, nonce: &str, nc: Option<u32>) -> NonceStatus {
        let tracker = match &self.tracker {
            None => return NonceStatus::Fresh,
            Some(t) => t,
        };
        let mut table = tracker.lock();
        tracker.prune(&mut table, Instant::now());
        let last_nc = match table.last_nc.get_mut(nonce) {
            None => {
                debug!("nonce {:?} is unknown or expired", nonce);
                return NonceStatus::Stale;
            }
            Some(n) => n,
        };
        match nc {
            Some(nc) if nc > *last_nc => {
                *last_nc = nc;
                NonceStatus::Fresh
            }
            Some(nc) => {
                debug!(
                    "nonce {:?} replayed with nc={} (last {})",
                    nonce, nc, *last_nc
                );
                NonceStatus::Replayed
            }
            None if *last_nc == 0 => {
                *last_nc = u32::MAX;
                NonceStatus::Fresh
            }
            None => NonceStatus::Stale,
        }
    }

    /// The number of remembered nonces, including any not yet pruned.
    pub fn len(&self) -> usize {
        self.tracker.as_ref().map_or(0, |t| t.lock().last_nc.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
