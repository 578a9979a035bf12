//! The callback bundle delivered to user code by [`crate::AsyncSocket`].

use crate::AsyncSocket;

/// Optional notification callbacks associated with one [`AsyncSocket`].
///
/// Every field is `None` by default. All callbacks receive the socket they
/// fired on by mutable reference and may re-enter the reactor API from
/// inside the callback (issue a write, close the socket, install a new
/// bundle, arm a timer). They run inline on the reactor thread that is
/// currently inside [`crate::Reactor::wait_for_input`].
pub struct Callbacks {
    /// A non-blocking `connect` completed successfully.
    pub on_connected: Option<Box<dyn FnMut(&mut AsyncSocket)>>,
    /// The peer closed the connection (orderly close or a reset translated
    /// to a clean disconnect). The last callback ever delivered for a
    /// socket.
    pub on_disconnected: Option<Box<dyn FnMut(&mut AsyncSocket)>>,
    /// `len` bytes landed in `buf`. A single logical message may be split
    /// across multiple invocations, or several messages may arrive in one.
    pub on_received: Option<Box<dyn FnMut(&mut AsyncSocket, &[u8])>>,
    /// `bytes` bytes previously handed to [`AsyncSocket::write`] have now
    /// left the socket.
    pub on_sent: Option<Box<dyn FnMut(&mut AsyncSocket, usize)>>,
    /// A listening socket accepted a new connection. `new_socket` is
    /// already registered with the reactor and in the `Connected` state;
    /// ownership moves to the callback.
    pub on_accepted: Option<Box<dyn FnMut(&mut AsyncSocket, AsyncSocket)>>,
    /// A non-retryable error occurred. `code` is the platform error
    /// number, `message` is its human-readable text, `hint` names the
    /// operation that failed (e.g. `"connect"`, `"accept"`, `"recv"`,
    /// `"send"`).
    pub on_error: Option<Box<dyn FnMut(&mut AsyncSocket, i32, String, &'static str)>>,
}

impl Default for Callbacks {
    fn default() -> Self {
        Callbacks {
            on_connected: None,
            on_disconnected: None,
            on_received: None,
            on_sent: None,
            on_accepted: None,
            on_error: None,
        }
    }
}

impl Callbacks {
    /// An empty bundle; equivalent to [`Default::default`].
    pub fn new() -> Self {
        Callbacks::default()
    }

    pub fn on_connected(mut self, f: impl FnMut(&mut AsyncSocket) + 'static) -> Self {
        self.on_connected = Some(Box::new(f));
        self
    }

    pub fn on_disconnected(mut self, f: impl FnMut(&mut AsyncSocket) + 'static) -> Self {
        self.on_disconnected = Some(Box::new(f));
        self
    }

    pub fn on_received(mut self, f: impl FnMut(&mut AsyncSocket, &[u8]) + 'static) -> Self {
        self.on_received = Some(Box::new(f));
        self
    }

    pub fn on_sent(mut self, f: impl FnMut(&mut AsyncSocket, usize) + 'static) -> Self {
        self.on_sent = Some(Box::new(f));
        self
    }

    pub fn on_accepted(
        mut self,
        f: impl FnMut(&mut AsyncSocket, AsyncSocket) + 'static,
    ) -> Self {
        self.on_accepted = Some(Box::new(f));
        self
    }

    pub fn on_error(
        mut self,
        f: impl FnMut(&mut AsyncSocket, i32, String, &'static str) + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bundle_has_no_callbacks_set() {
        let callbacks = Callbacks::new();
        assert!(callbacks.on_connected.is_none());
        assert!(callbacks.on_disconnected.is_none());
        assert!(callbacks.on_received.is_none());
        assert!(callbacks.on_sent.is_none());
        assert!(callbacks.on_accepted.is_none());
        assert!(callbacks.on_error.is_none());
    }

    #[test]
    fn builder_methods_set_only_the_requested_callback() {
        let callbacks = Callbacks::new().on_received(|_sock, _data| {});
        assert!(callbacks.on_received.is_some());
        assert!(callbacks.on_connected.is_none());
    }
}
