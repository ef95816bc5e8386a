//! Flush queue.
//!
//! Memtables travel through the queue inside [`Node`]s. A node starts
//! unsealed while it is the writable head; sealing it hands it to the
//! flusher. `pop` returns the oldest sealed node; `push` applies
//! backpressure once the hard limit is reached.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::memtable::Memtable;
use crate::types::{Key, Value};

pub struct Node<K: Key, V: Value> {
    pub mem: Arc<Memtable<K, V>>,
    sealed: AtomicBool,
}

impl<K: Key, V: Value> Node<K, V> {
    pub fn new(mem: Arc<Memtable<K, V>>) -> Node<K, V> {
        Node {
            mem,
            sealed: AtomicBool::new(false),
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct QueueOpts {
    /// Maximum queued nodes before `push` blocks; 0 means unbounded.
    pub hard_limit: usize,
}

pub struct Queue<K: Key, V: Value> {
    nodes: Mutex<VecDeque<Arc<Node<K, V>>>>,
    // signaled when a node is pushed or sealed
    available: Condvar,
    // signaled when a pop frees a slot
    vacated: Condvar,
    hard_limit: usize,
}

impl<K: Key, V: Value> Queue<K, V> {
    pub fn new(opts: QueueOpts) -> Queue<K, V> {
        Queue {
            nodes: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            vacated: Condvar::new(),
            hard_limit: opts.hard_limit,
        }
    }

    /// Appends to the tail, blocking while the queue is at its hard limit.
    pub fn push(&self, node: Arc<Node<K, V>>) {
        let mut nodes = self.nodes.lock().unwrap();
        while self.hard_limit > 0 && nodes.len() >= self.hard_limit {
            nodes = self.vacated.wait(nodes).unwrap();
        }
        nodes.push_back(node);
        self.available.notify_all();
    }

    /// Marks `node` flushable and wakes a waiting `pop`.
    pub fn seal(&self, node: &Node<K, V>) {
        let _nodes = self.nodes.lock().unwrap();
        node.sealed.store(true, Ordering::SeqCst);
        self.available.notify_all();
    }

    /// Removes `node` without flushing it (used by `clear`).
    pub fn remove(&self, node: &Arc<Node<K, V>>) {
        let mut nodes = self.nodes.lock().unwrap();
        if let Some(pos) = nodes.iter().position(|n| Arc::ptr_eq(n, node)) {
            let _ = nodes.remove(pos);
            self.vacated.notify_all();
        }
    }

    /// Waits up to `wait` for the oldest sealed node, removes it from the
    /// queue and returns its memtable.
    pub fn pop(&self, wait: Duration) -> Option<Arc<Memtable<K, V>>> {
        let deadline = Instant::now() + wait;
        let mut nodes = self.nodes.lock().unwrap();
        loop {
            if let Some(pos) = nodes.iter().position(|n| n.is_sealed()) {
                let node = nodes.remove(pos).unwrap();
                self.vacated.notify_all();
                return Some(node.mem.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.available.wait_timeout(nodes, deadline - now).unwrap();
            nodes = guard;
        }
    }

    /// Snapshot of the current nodes, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<Node<K, V>>> {
        self.nodes.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
