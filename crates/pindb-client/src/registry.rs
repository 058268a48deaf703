//! Thread-scoped connection registry.
//!
//! The driver's primary style is explicit context passing; this registry
//! exists for callers that want an ambient "current connection", with
//! scoped shadowing. It is a deliberate global: each thread keeps a stack
//! of active connections, [`push_current`] shadows the top for the lifetime
//! of the returned guard, and a process-wide default slot backs the empty
//! stack. The default is installed explicitly ([`set_default`]) and torn
//! down by [`clear_default`] or process exit.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use crate::connection::Connection;

/// Shareable handle to a [`Connection`]. One logical writer at a time: the
/// async mutex serializes access across tasks.
pub type SharedConnection = Arc<tokio::sync::Mutex<Connection>>;

thread_local! {
    static STACK: RefCell<Vec<SharedConnection>> = const { RefCell::new(Vec::new()) };
}

static DEFAULT: Mutex<Option<SharedConnection>> = Mutex::new(None);

/// Wrap a connection for sharing.
pub fn share(connection: Connection) -> SharedConnection {
    Arc::new(tokio::sync::Mutex::new(connection))
}

/// Install the process-wide default connection.
pub fn set_default(connection: SharedConnection) {
    *DEFAULT.lock().expect("registry mutex poisoned") = Some(connection);
}

/// Tear down the process-wide default connection.
pub fn clear_default() {
    *DEFAULT.lock().expect("registry mutex poisoned") = None;
}

/// The current connection: the top of this thread's stack, else the
/// process-wide default.
pub fn current() -> Option<SharedConnection> {
    STACK
        .with(|stack| stack.borrow().last().cloned())
        .or_else(|| DEFAULT.lock().expect("registry mutex poisoned").clone())
}

/// Scope guard returned by [`push_current`]; restores the previous current
/// connection when dropped. Not `Send`: the scope belongs to the thread
/// that opened it.
pub struct ConnectionScope {
    _thread_bound: PhantomData<*const ()>,
}

/// Make `connection` current for this thread until the returned guard is
/// dropped.
pub fn push_current(connection: SharedConnection) -> ConnectionScope {
    STACK.with(|stack| stack.borrow_mut().push(connection));
    ConnectionScope { _thread_bound: PhantomData }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
