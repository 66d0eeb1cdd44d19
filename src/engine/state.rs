// src/engine/state.rs

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::debug;

use crate::file::{File, FileData};
use crate::watch::PathFilter;

/// Identity of one unit of work: a file path under transformation, or a
/// registered generator. Generators are keyed by registration index rather
/// than by path, because a generator's output path may only be known after
/// it runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Path(String),
    Generator(usize),
}

/// Dependency key requested through `get`: a concrete path or a path
/// predicate. All waiter and edge bookkeeping is keyed on this union.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DepKey {
    Path(String),
    Filter(PathFilter),
}

impl DepKey {
    /// Does a change to `path` concern this dependency?
    pub fn matches(&self, path: &str) -> bool {
        match self {
            DepKey::Path(p) => p == path,
            DepKey::Filter(f) => f.matches(path),
        }
    }
}

/// Engine lifecycle phase. Monotonic: never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    InitialWave,
    Steady,
}

/// A shared waiter for one awaited key: every suspended `get` for that key
/// holds one receiver, and `blocked` records which identities are suspended
/// (the deadlock check needs to know who is stuck on what).
#[derive(Debug, Default)]
pub struct Waiter {
    senders: Vec<oneshot::Sender<()>>,
    blocked: Vec<Identity>,
}

/// All mutable engine state, owned by one mutex and never locked across an
/// await; suspension is done through the oneshot channels handed out here.
#[derive(Debug)]
pub struct State {
    pub phase: Phase,
    /// Original paths of all physical files.
    pub paths: BTreeSet<String>,
    /// Pre-transform snapshots, kept for dependency-triggered re-runs.
    pub orig: HashMap<String, FileData>,
    /// Published transformed files (physical and virtual).
    pub files: HashMap<String, Arc<File>>,
    /// Identities currently mid-execution. The current wave is complete iff
    /// this is empty.
    pub active: HashSet<Identity>,
    /// Discovered dependency edges. Transient: an identity's edges are
    /// discarded when it re-runs and rebuilt from what that run requests.
    pub deps: Vec<(Identity, DepKey)>,
    /// Shared waiters for keys requested but not yet available.
    pub waiters: HashMap<DepKey, Waiter>,
    /// Resolver for the current wave's completion gate.
    pub wave: Option<oneshot::Sender<()>>,
}

impl State {
    pub fn new() -> State {
        State {
            phase: Phase::NotStarted,
            paths: BTreeSet::new(),
            orig: HashMap::new(),
            files: HashMap::new(),
            active: HashSet::new(),
            deps: Vec::new(),
            waiters: HashMap::new(),
            wave: None,
        }
    }

    /// Begin a wave; the returned receiver resolves when `active` drains.
    pub fn start_wave(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.wave = Some(tx);
        rx
    }

    /// Discard the previously recorded edges of a dependent about to re-run.
    pub fn clear_edges(&mut self, identity: &Identity) {
        self.deps.retain(|(dependent, _)| dependent != identity);
    }

    /// Collect every dependent whose dependency matches the changed path and
    /// consume their edges; each dependent's edges will be rebuilt by its
    /// next run.
    pub fn take_dependents(&mut self, path: &str) -> Vec<Identity> {
        let mut dependents: Vec<Identity> = Vec::new();
        for (dependent, dependency) in &self.deps {
            if dependency.matches(path) && !dependents.contains(dependent) {
                dependents.push(dependent.clone());
            }
        }
        self.deps
            .retain(|(dependent, _)| !dependents.contains(dependent));
        dependents
    }

    /// Register `who` as suspended on `key`, sharing the key's waiter.
    pub fn await_key(&mut self, key: DepKey, who: Identity) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let waiter = self.waiters.entry(key).or_default();
        waiter.senders.push(tx);
        waiter.blocked.push(who);
        rx
    }

    /// Resolve the waiter for a key, waking everything suspended on it.
    pub fn mark_found(&mut self, key: &DepKey) {
        if let Some(waiter) = self.waiters.remove(key) {
            for sender in waiter.senders {
                let _ = sender.send(());
            }
        }
    }

    /// Re-check wave completion. Called after every change to `active` or to
    /// the waiter map.
    ///
    /// If nothing is active, the wave gate fires. Otherwise, during the
    /// initial wave, apply the two-tier deadlock-breaking heuristic:
    ///
    /// 1. If every active identity is blocked on a filter or on another
    ///    active identity, resolve all filter-keyed waiters — a filter may
    ///    match more once the concrete paths still pending have published,
    ///    so filters get first chance to re-evaluate.
    /// 2. Otherwise, if every active identity is blocked on something,
    ///    resolve all concrete-path waiters whose subject is not itself
    ///    active, treating those paths as permanently absent.
    ///
    /// This ordering is a heuristic carried over from the discovered
    /// contract, not a proof of progress for arbitrary graphs.
    pub fn check_wave(&mut self) {
        if self.active.is_empty() {
            if let Some(gate) = self.wave.take() {
                let _ = gate.send(());
            }
            return;
        }
        if self.phase != Phase::InitialWave {
            return;
        }

        let mut all_waiting: HashSet<Identity> = HashSet::new();
        let mut filter_waiting: HashSet<Identity> = HashSet::new();
        for (key, waiter) in &self.waiters {
            let pending_subject = match key {
                DepKey::Filter(_) => true,
                DepKey::Path(path) => self.active.contains(&Identity::Path(path.clone())),
            };
            for who in &waiter.blocked {
                all_waiting.insert(who.clone());
                if pending_subject {
                    filter_waiting.insert(who.clone());
                }
            }
        }

        if self.active.iter().all(|id| filter_waiting.contains(id)) {
            debug!("wave stalled on filters; resolving filter-keyed waiters");
            let keys: Vec<DepKey> = self
                .waiters
                .keys()
                .filter(|key| matches!(key, DepKey::Filter(_)))
                .cloned()
                .collect();
            for key in keys {
                self.mark_found(&key);
            }
        } else if self.active.iter().all(|id| all_waiting.contains(id)) {
            debug!("wave stalled on absent files; resolving their waiters");
            let keys: Vec<DepKey> = self
                .waiters
                .keys()
                .filter(|key| match key {
                    DepKey::Path(path) => {
                        !self.active.contains(&Identity::Path(path.clone()))
                    }
                    DepKey::Filter(_) => false,
                })
                .cloned()
                .collect();
            for key in keys {
                self.mark_found(&key);
            }
        }
    }
}

impl Default for State {
    fn default() -> Self {
        State::new()
    }
}
