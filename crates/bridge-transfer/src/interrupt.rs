//! Operator interrupt handling for a blocking session.
//!
//! The session blocks in `accept()` and `read()` with no timeout. Triggering
//! the handle unblocks both: the registered connection is shut down in both
//! directions, and a blocked accept is woken by a throwaway connection to the
//! listener's own address.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Inner {
    triggered: AtomicBool,
    connection: Mutex<Option<TcpStream>>,
    listener: Mutex<Option<SocketAddr>>,
}

/// Cloneable handle shared between the session and whoever delivers the
/// interrupt (a signal thread, a test).
#[derive(Clone, Default)]
pub struct InterruptHandle {
    inner: Arc<Inner>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Request the session to stop. Idempotent.
    pub fn trigger(&self) {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(stream) = lock(&self.inner.connection).as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!("interrupt: connection shut down");
        }
        let listener = *lock(&self.inner.listener);
        if let Some(addr) = listener {
            wake_listener(addr);
        }
    }

    /// Clear the flag so the same handle can serve another session.
    pub fn reset(&self) {
        self.inner.triggered.store(false, Ordering::SeqCst);
    }

    /// Register the address a blocked accept is waiting on.
    pub fn watch_listener(&self, addr: SocketAddr) -> Registration<'_> {
        *lock(&self.inner.listener) = Some(addr);
        if self.is_triggered() {
            wake_listener(addr);
        }
        Registration { handle: self, slot: Slot::Listener }
    }

    /// Register the active connection. `stream` must be a clone of the socket
    /// the session reads from.
    pub fn watch_connection(&self, stream: TcpStream) -> Registration<'_> {
        // Check under the lock: a trigger either sees the stored stream or has
        // already set the flag this check reads.
        let mut connection = lock(&self.inner.connection);
        if self.is_triggered() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        *connection = Some(stream);
        drop(connection);
        Registration { handle: self, slot: Slot::Connection }
    }
}

enum Slot {
    Listener,
    Connection,
}

/// Releases a registration on drop, on every exit path.
pub struct Registration<'a> {
    handle: &'a InterruptHandle,
    slot: Slot,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        match self.slot {
            Slot::Listener => {
                lock(&self.handle.inner.listener).take();
            }
            Slot::Connection => {
                lock(&self.handle.inner.connection).take();
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn wake_listener(addr: SocketAddr) {
    let target = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port())
        }
        _ => addr,
    };
    match TcpStream::connect_timeout(&target, WAKE_TIMEOUT) {
        Ok(_) => debug!(%target, "interrupt: accept woken"),
        Err(e) => debug!(%target, "interrupt: wake connect failed: {}", e),
    }
}
