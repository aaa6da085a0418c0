use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use tracing::debug;

use crate::error::TransportError;

/// Final state of one HTTP exchange, stored on the handle so the
/// classifier can inspect it after the transfer completes.
#[derive(Clone, Debug)]
pub(crate) struct CompletedExchange {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    /// DER certificates presented by the peer, outermost first, when the
    /// section records them for attribute extraction.
    pub(crate) peer_chain: Option<Vec<Vec<u8>>>,
}

/// Per-exchange transport session state.
///
/// A handle is leased for exactly one exchange, carries its completed
/// response between the I/O driver and the classifier, and is reset
/// before going back to the pool. It is never returned dirty.
#[derive(Debug)]
pub struct Handle {
    id: usize,
    exchange: Option<CompletedExchange>,
}

impl Handle {
    pub(crate) fn new(id: usize) -> Self {
        Self { id, exchange: None }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.exchange.is_none()
    }

    pub(crate) fn complete(&mut self, exchange: CompletedExchange) {
        self.exchange = Some(exchange);
    }

    pub(crate) fn exchange(&self) -> Option<&CompletedExchange> {
        self.exchange.as_ref()
    }

    pub(crate) fn reset(&mut self) {
        self.exchange = None;
    }
}

type HandleCtor = Box<dyn Fn(usize) -> Result<Handle, TransportError>>;

/// Bounded pool of connection handles, exclusively owned by one worker.
///
/// Handles are constructed lazily through the supplied constructor, up
/// to capacity. Leasing beyond capacity fails; releasing never fails.
pub struct HandlePool {
    free: Vec<Handle>,
    constructed: usize,
    capacity: usize,
    ctor: HandleCtor,
}

impl HandlePool {
    pub fn new(capacity: usize) -> Self {
        Self::with_ctor(capacity, Box::new(|id| Ok(Handle::new(id))))
    }

    pub(crate) fn with_ctor(capacity: usize, ctor: HandleCtor) -> Self {
        Self {
            free: Vec::new(),
            constructed: 0,
            capacity: capacity.max(1),
            ctor,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Handles currently available without constructing a new one.
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    /// Handles leased out right now.
    pub fn in_use(&self) -> usize {
        self.constructed - self.free.len()
    }

    pub fn lease(&mut self) -> Result<Handle, TransportError> {
        if let Some(handle) = self.free.pop() {
            return Ok(handle);
        }
        if self.constructed >= self.capacity {
            return Err(TransportError::PoolExhausted {
                capacity: self.capacity,
            });
        }

        let handle = (self.ctor)(self.constructed)?;
        self.constructed += 1;
        debug!(handle = handle.id(), total = self.constructed, "constructed connection handle");
        Ok(handle)
    }

    pub fn release(&mut self, mut handle: Handle) {
        handle.reset();
        self.free.push(handle);
    }

    /// Drops every idle handle. Called on worker shutdown.
    pub fn close_all(&mut self) {
        self.constructed -= self.free.len();
        self.free.clear();
    }
}

/// Lease guard tying a handle's lifetime to the invocation.
///
/// Dropping the guard returns the handle to the pool, so every exit
/// path, including cancellation of the invocation future, releases
/// exactly once.
pub(crate) struct Leased {
    pool: Rc<RefCell<HandlePool>>,
    handle: Option<Handle>,
}

impl Leased {
    pub(crate) fn acquire(pool: &Rc<RefCell<HandlePool>>) -> Result<Self, TransportError> {
        let handle = pool.borrow_mut().lease()?;
        Ok(Self {
            pool: Rc::clone(pool),
            handle: Some(handle),
        })
    }

    pub(crate) fn handle(&self) -> &Handle {
        self.handle.as_ref().expect("handle present until drop")
    }

    pub(crate) fn handle_mut(&mut self) -> &mut Handle {
        self.handle.as_mut().expect("handle present until drop")
    }
}

impl Drop for Leased {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.borrow_mut().release(handle);
        }
    }
}
