// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory coordination store.
//!
//! One [`MemoryEnsemble`] holds the tree; every [`Session`] opened on it is a
//! client with its own lifetime. Ephemeral nodes belong to the session that
//! created them and disappear when it stops.

use super::{
    validate_path, Coordinator, CreateMode, EventKind, RegistryError, SessionState, WatchedEvent,
    Watcher,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

type SessionId = u64;

#[derive(Debug)]
struct ZNode {
    value: Vec<u8>,
    owner: Option<SessionId>,
    children: BTreeSet<String>,
}

impl ZNode {
    fn new(value: Vec<u8>, owner: Option<SessionId>) -> Self {
        Self {
            value,
            owner,
            children: BTreeSet::new(),
        }
    }
}

struct PendingWatch {
    session: SessionId,
    watcher: Watcher,
}

/// Watches ready to fire once the tree lock is released.
type Fired = Vec<(Watcher, WatchedEvent)>;

struct Tree {
    nodes: HashMap<String, ZNode>,
    data_watches: HashMap<String, Vec<PendingWatch>>,
    child_watches: HashMap<String, Vec<PendingWatch>>,
    next_session: SessionId,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), ZNode::new(Vec::new(), None));
        Self {
            nodes,
            data_watches: HashMap::new(),
            child_watches: HashMap::new(),
            next_session: 1,
        }
    }

    fn create(
        &mut self,
        session: SessionId,
        path: &str,
        value: Vec<u8>,
        mode: CreateMode,
        fired: &mut Fired,
    ) -> Result<(), RegistryError> {
        if self.nodes.contains_key(path) {
            return Err(RegistryError::NodeExists(path.to_string()));
        }
        let (parent, name) = split_path(path);
        let parent_node = self
            .nodes
            .get_mut(parent)
            .ok_or_else(|| RegistryError::NoNode(parent.to_string()))?;
        if parent_node.owner.is_some() {
            return Err(RegistryError::EphemeralParent(parent.to_string()));
        }
        parent_node.children.insert(name.to_string());

        let owner = match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => Some(session),
        };
        self.nodes.insert(path.to_string(), ZNode::new(value, owner));

        self.trigger_data(path, EventKind::Created, fired);
        self.trigger_child(parent, fired);
        Ok(())
    }

    fn delete(&mut self, path: &str, fired: &mut Fired) -> Result<(), RegistryError> {
        if path == "/" {
            return Err(RegistryError::InvalidPath(path.to_string()));
        }
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| RegistryError::NoNode(path.to_string()))?;
        if !node.children.is_empty() {
            return Err(RegistryError::NotEmpty(path.to_string()));
        }
        self.nodes.remove(path);
        let (parent, name) = split_path(path);
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.remove(name);
        }

        self.trigger_data(path, EventKind::Deleted, fired);
        if let Some(watches) = self.child_watches.remove(path) {
            fired.extend(watches.into_iter().map(|w| (w.watcher, event(EventKind::Deleted, path))));
        }
        self.trigger_child(parent, fired);
        Ok(())
    }

    fn trigger_data(&mut self, path: &str, kind: EventKind, fired: &mut Fired) {
        if let Some(watches) = self.data_watches.remove(path) {
            fired.extend(watches.into_iter().map(|w| (w.watcher, event(kind, path))));
        }
    }

    fn trigger_child(&mut self, path: &str, fired: &mut Fired) {
        if let Some(watches) = self.child_watches.remove(path) {
            fired.extend(
                watches
                    .into_iter()
                    .map(|w| (w.watcher, event(EventKind::Child, path))),
            );
        }
    }

    /// Remove every ephemeral owned by `session`, deepest paths first.
    fn expire(&mut self, session: SessionId, fired: &mut Fired) -> usize {
        let mut owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        owned.sort_by_key(|path| std::cmp::Reverse(path.len()));
        let mut removed = 0;
        for path in owned {
            if self.delete(&path, fired).is_ok() {
                removed += 1;
            }
        }
        for watches in self
            .data_watches
            .values_mut()
            .chain(self.child_watches.values_mut())
        {
            watches.retain(|w| w.session != session);
        }
        removed
    }
}

fn add_watch(
    table: &mut HashMap<String, Vec<PendingWatch>>,
    path: &str,
    session: SessionId,
    watcher: Watcher,
) {
    let watches = table.entry(path.to_string()).or_default();
    if !watches
        .iter()
        .any(|w| w.session == session && Arc::ptr_eq(&w.watcher, &watcher))
    {
        watches.push(PendingWatch { session, watcher });
    }
}

fn event(kind: EventKind, path: &str) -> WatchedEvent {
    WatchedEvent {
        kind,
        state: SessionState::Connected,
        path: path.to_string(),
    }
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(index) => (&path[..index], &path[index + 1..]),
        None => ("/", path),
    }
}

fn fire(fired: Fired) {
    for (watcher, event) in fired {
        watcher(event);
    }
}

/// Shared in-memory tree.
///
/// Cloning shares the tree. Open clients with [`MemoryEnsemble::session`].
#[derive(Clone)]
pub struct MemoryEnsemble {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
        }
    }

    /// Open a connected session.
    pub fn session(&self) -> Session {
        let id = self.allocate();
        tracing::debug!(session = id, "registry session opened");
        Session {
            ensemble: self.clone(),
            inner: Mutex::new(SessionInner {
                id,
                state: SessionState::Connected,
            }),
        }
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.tree.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    fn allocate(&self) -> SessionId {
        let mut tree = self.tree.lock();
        let id = tree.next_session;
        tree.next_session += 1;
        id
    }
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

struct SessionInner {
    id: SessionId,
    state: SessionState,
}

/// A client session on a [`MemoryEnsemble`].
///
/// A stopped session is `Lost`; [`Coordinator::start`] reopens it under a
/// fresh identity, so ephemerals created before the loss are gone for good.
pub struct Session {
    ensemble: MemoryEnsemble,
    inner: Mutex<SessionInner>,
}

impl Session {
    /// Simulate a connection hiccup: the session keeps its ephemerals but
    /// refuses operations until [`Session::resume`].
    pub fn suspend(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Connected {
            inner.state = SessionState::Suspended;
        }
    }

    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Suspended {
            inner.state = SessionState::Connected;
        }
    }

    fn connected_id(&self) -> Result<SessionId, RegistryError> {
        let inner = self.inner.lock();
        match inner.state {
            SessionState::Connected => Ok(inner.id),
            _ => Err(RegistryError::SessionLost),
        }
    }

    fn with_tree<T>(
        &self,
        path: &str,
        op: impl FnOnce(&mut Tree, SessionId, &mut Fired) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        validate_path(path)?;
        let session = self.connected_id()?;
        let mut fired = Vec::new();
        let result = {
            let mut tree = self.ensemble.tree.lock();
            op(&mut tree, session, &mut fired)
        };
        fire(fired);
        result
    }
}

impl Coordinator for Session {
    fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    fn start(&self) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Connected => {}
            SessionState::Suspended => inner.state = SessionState::Connected,
            SessionState::Lost => {
                inner.id = self.ensemble.allocate();
                inner.state = SessionState::Connected;
                tracing::info!(session = inner.id, "registry session restarted");
            }
        }
        Ok(())
    }

    fn stop(&self) {
        let id = {
            let mut inner = self.inner.lock();
            if inner.state == SessionState::Lost {
                return;
            }
            inner.state = SessionState::Lost;
            inner.id
        };
        let mut fired = Vec::new();
        let removed = self.ensemble.tree.lock().expire(id, &mut fired);
        fire(fired);
        tracing::debug!(session = id, removed, "registry session stopped");
    }

    fn ensure_path(&self, path: &str) -> Result<(), RegistryError> {
        self.with_tree(path, |tree, session, fired| {
            let mut current = String::new();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                current.push('/');
                current.push_str(segment);
                if !tree.nodes.contains_key(&current) {
                    tree.create(session, &current, Vec::new(), CreateMode::Persistent, fired)?;
                }
            }
            Ok(())
        })
    }

    fn create(&self, path: &str, value: Vec<u8>, mode: CreateMode) -> Result<(), RegistryError> {
        self.with_tree(path, |tree, session, fired| {
            tree.create(session, path, value, mode, fired)
        })
    }

    fn exists(&self, path: &str) -> Result<bool, RegistryError> {
        self.with_tree(path, |tree, _, _| Ok(tree.nodes.contains_key(path)))
    }

    fn get(&self, path: &str, watch: Option<Watcher>) -> Result<Vec<u8>, RegistryError> {
        self.with_tree(path, |tree, session, _| {
            let value = tree
                .nodes
                .get(path)
                .map(|node| node.value.clone())
                .ok_or_else(|| RegistryError::NoNode(path.to_string()))?;
            if let Some(watcher) = watch {
                add_watch(&mut tree.data_watches, path, session, watcher);
            }
            Ok(value)
        })
    }

    fn set(&self, path: &str, value: Vec<u8>) -> Result<(), RegistryError> {
        self.with_tree(path, |tree, _, fired| {
            let node = tree
                .nodes
                .get_mut(path)
                .ok_or_else(|| RegistryError::NoNode(path.to_string()))?;
            node.value = value;
            tree.trigger_data(path, EventKind::Changed, fired);
            Ok(())
        })
    }

    fn get_children(
        &self,
        path: &str,
        watch: Option<Watcher>,
    ) -> Result<Vec<String>, RegistryError> {
        self.with_tree(path, |tree, session, _| {
            let children: Vec<String> = tree
                .nodes
                .get(path)
                .map(|node| node.children.iter().cloned().collect())
                .ok_or_else(|| RegistryError::NoNode(path.to_string()))?;
            if let Some(watcher) = watch {
                add_watch(&mut tree.child_watches, path, session, watcher);
            }
            Ok(children)
        })
    }

    fn delete(&self, path: &str) -> Result<(), RegistryError> {
        self.with_tree(path, |tree, _, fired| tree.delete(path, fired))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;

    fn recorder() -> (Watcher, channel::Receiver<WatchedEvent>) {
        let (tx, rx) = channel::unbounded();
        let watcher: Watcher = Arc::new(move |event: WatchedEvent| {
            let _ = tx.send(event);
        });
        (watcher, rx)
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/masters"), ("/", "masters"));
        assert_eq!(split_path("/api/cats/drone=1"), ("/api/cats", "drone=1"));
    }

    #[test]
    fn test_create_requires_parent() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.session();
        assert!(matches!(
            session.create("/a/b", Vec::new(), CreateMode::Persistent),
            Err(RegistryError::NoNode(_))
        ));
        session.ensure_path("/a/b").expect("ensure");
        assert!(session.exists("/a").expect("exists"));
        assert!(session.exists("/a/b").expect("exists"));
        // idempotent
        session.ensure_path("/a/b").expect("ensure again");
    }

    #[test]
    fn test_create_duplicate() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.session();
        session.create("/x", b"1".to_vec(), CreateMode::Persistent).expect("create");
        assert!(matches!(
            session.create("/x", b"2".to_vec(), CreateMode::Persistent),
            Err(RegistryError::NodeExists(_))
        ));
        assert_eq!(session.get("/x", None).expect("get"), b"1");
    }

    #[test]
    fn test_ephemeral_cannot_have_children() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.session();
        session.create("/e", Vec::new(), CreateMode::Ephemeral).expect("create");
        assert!(matches!(
            session.create("/e/child", Vec::new(), CreateMode::Persistent),
            Err(RegistryError::EphemeralParent(_))
        ));
    }

    #[test]
    fn test_delete_not_empty() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.session();
        session.ensure_path("/api/cats").expect("ensure");
        assert!(matches!(session.delete("/api"), Err(RegistryError::NotEmpty(_))));
        session.delete("/api/cats").expect("delete");
        session.delete("/api").expect("delete");
        assert!(ensemble.is_empty());
    }

    #[test]
    fn test_ephemerals_vanish_on_stop() {
        let ensemble = MemoryEnsemble::new();
        let owner = ensemble.session();
        let observer = ensemble.session();
        owner.ensure_path("/masters").expect("ensure");
        owner
            .create("/masters/master=1", Vec::new(), CreateMode::Ephemeral)
            .expect("create");
        assert_eq!(
            observer.get_children("/masters", None).expect("children"),
            vec!["master=1".to_string()]
        );

        owner.stop();
        assert_eq!(owner.state(), SessionState::Lost);
        assert!(observer.get_children("/masters", None).expect("children").is_empty());
        // persistent parent survives
        assert!(observer.exists("/masters").expect("exists"));
    }

    #[test]
    fn test_lost_session_refuses_then_restarts() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.session();
        session.stop();
        assert!(matches!(session.exists("/"), Err(RegistryError::SessionLost)));
        session.start().expect("start");
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.exists("/").expect("exists"));
    }

    #[test]
    fn test_suspended_session_keeps_ephemerals() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.session();
        let observer = ensemble.session();
        session.create("/e", Vec::new(), CreateMode::Ephemeral).expect("create");
        session.suspend();
        assert_eq!(session.state(), SessionState::Suspended);
        assert!(session.exists("/e").is_err());
        assert!(observer.exists("/e").expect("exists"));
        session.resume();
        assert!(session.exists("/e").expect("exists"));
    }

    #[test]
    fn test_child_watch_fires_once() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.session();
        session.ensure_path("/masters").expect("ensure");
        let (watcher, events) = recorder();
        session
            .get_children("/masters", Some(Arc::clone(&watcher)))
            .expect("children");
        // same watcher registered twice is kept once
        session
            .get_children("/masters", Some(Arc::clone(&watcher)))
            .expect("children");

        session
            .create("/masters/a", Vec::new(), CreateMode::Ephemeral)
            .expect("create");
        session
            .create("/masters/b", Vec::new(), CreateMode::Ephemeral)
            .expect("create");

        let event = events.try_recv().expect("event");
        assert_eq!(event.kind, EventKind::Child);
        assert_eq!(event.path, "/masters");
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_data_watch_on_delete() {
        let ensemble = MemoryEnsemble::new();
        let owner = ensemble.session();
        let observer = ensemble.session();
        owner.create("/m", b"v".to_vec(), CreateMode::Ephemeral).expect("create");
        let (watcher, events) = recorder();
        observer.get("/m", Some(watcher)).expect("get");

        drop(owner);
        let event = events.try_recv().expect("event");
        assert_eq!(event.kind, EventKind::Deleted);
        assert_eq!(event.path, "/m");
    }

    #[test]
    fn test_data_watch_on_change() {
        let ensemble = MemoryEnsemble::new();
        let session = ensemble.session();
        session.create("/m", b"v".to_vec(), CreateMode::Persistent).expect("create");
        let (watcher, events) = recorder();
        session.get("/m", Some(watcher)).expect("get");
        session.set("/m", b"w".to_vec()).expect("set");
        assert_eq!(events.try_recv().expect("event").kind, EventKind::Changed);
    }

    #[test]
    fn test_watch_may_reenter_store() {
        let ensemble = MemoryEnsemble::new();
        let session = Arc::new(ensemble.session());
        session.ensure_path("/masters").expect("ensure");
        let (tx, rx) = channel::unbounded();
        let reentrant = Arc::clone(&session);
        let watcher: Watcher = Arc::new(move |_: WatchedEvent| {
            let children = reentrant.get_children("/masters", None).unwrap_or_default();
            let _ = tx.send(children.len());
        });
        session.get_children("/masters", Some(watcher)).expect("children");
        session
            .create("/masters/a", Vec::new(), CreateMode::Persistent)
            .expect("create");
        assert_eq!(rx.try_recv().expect("count"), 1);
    }
}
