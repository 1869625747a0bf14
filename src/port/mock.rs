//! In-memory backend for testing.
//!
//! [`MockBackend`] behaves like a port whose peer is the test itself: bytes
//! queued with [`enqueue_read`](MockBackend::enqueue_read) are received,
//! written bytes are logged, and writability, partial writes and end of stream
//! are under the test's control.

use super::traits::{ModemLine, PortConfiguration, Queue, SerialBackend};
use crate::error::{SerialError, SerialResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug)]
struct MockPortState {
    open: bool,
    /// Configurations applied by open/reconfigure, with the force flag.
    applied: Vec<(PortConfiguration, bool)>,
    /// Message for the next rejected configuration, if any.
    reject_next: Option<String>,
    read_queue: VecDeque<u8>,
    eof: bool,
    write_log: Vec<Vec<u8>>,
    max_write_chunk: Option<usize>,
    writable: bool,
    send_calls: usize,
    wait_writable_calls: usize,
    receive_sizes: Vec<usize>,
    notified_closes: usize,
    quiet_closes: usize,
    discarded: Vec<Queue>,
    breaks: Vec<Duration>,
    cts: bool,
    rts: bool,
    dtr: bool,
    dsr: bool,
    cd: bool,
    ri: bool,
}

impl Default for MockPortState {
    fn default() -> Self {
        Self {
            open: false,
            applied: Vec::new(),
            reject_next: None,
            read_queue: VecDeque::new(),
            eof: false,
            write_log: Vec::new(),
            max_write_chunk: None,
            writable: true,
            send_calls: 0,
            wait_writable_calls: 0,
            receive_sizes: Vec::new(),
            notified_closes: 0,
            quiet_closes: 0,
            discarded: Vec::new(),
            breaks: Vec::new(),
            cts: false,
            rts: false,
            dtr: false,
            dsr: false,
            cd: false,
            ri: false,
        }
    }
}

/// Mock serial backend.
///
/// Clones share state, so a test keeps one clone for inspection and hands the
/// other to [`SerialStream::with_backend`](super::SerialStream::with_backend).
///
/// # Example
/// ```
/// use serial_stream::{MockBackend, PortConfiguration, SerialStream};
///
/// # tokio_test::block_on(async {
/// let mock = MockBackend::new("MOCK0");
/// let stream = SerialStream::with_backend(PortConfiguration::new("MOCK0"), Box::new(mock.clone()));
/// stream.aopen().await.unwrap();
///
/// mock.enqueue_read(b"OK\r\n");
/// assert_eq!(stream.receive_some(None).await.unwrap(), b"OK\r\n");
///
/// stream.send_all(b"AT\r\n").await.unwrap();
/// assert_eq!(mock.written(), b"AT\r\n");
/// # });
/// ```
#[derive(Clone)]
pub struct MockBackend {
    name: String,
    state: Arc<Mutex<MockPortState>>,
    changed: Arc<Notify>,
}

impl MockBackend {
    /// Create a closed mock port with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockPortState::default())),
            changed: Arc::new(Notify::new()),
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut MockPortState) -> R) -> R {
        let result = f(&mut self.state.lock());
        self.changed.notify_waiters();
        result
    }

    /// Make bytes available to subsequent receives.
    pub fn enqueue_read(&self, data: &[u8]) {
        self.update(|state| state.read_queue.extend(data));
    }

    /// Report end of stream once the read queue is drained.
    pub fn set_eof(&self) {
        self.update(|state| state.eof = true);
    }

    /// Block or unblock `wait_writable`.
    pub fn set_writable(&self, writable: bool) {
        self.update(|state| state.writable = writable);
    }

    /// Accept at most `chunk` bytes per send call.
    pub fn set_max_write_chunk(&self, chunk: Option<usize>) {
        self.update(|state| state.max_write_chunk = chunk);
    }

    /// Make the next open or reconfiguration fail with a configuration error.
    pub fn reject_next_configuration(&self, message: impl Into<String>) {
        self.update(|state| state.reject_next = Some(message.into()));
    }

    /// Set the state of a line driven by the peer.
    pub fn set_input_line(&self, line: ModemLine, value: bool) {
        self.update(|state| match line {
            ModemLine::Cts => state.cts = value,
            ModemLine::Dsr => state.dsr = value,
            ModemLine::Cd => state.cd = value,
            ModemLine::Ri => state.ri = value,
            ModemLine::Rts => state.rts = value,
            ModemLine::Dtr => state.dtr = value,
        });
    }

    /// Everything written so far, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().write_log.concat()
    }

    /// Every individual write call.
    pub fn write_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_log.clone()
    }

    /// Configurations applied so far, each with its force flag.
    pub fn applied_configurations(&self) -> Vec<(PortConfiguration, bool)> {
        self.state.lock().applied.clone()
    }

    pub fn send_calls(&self) -> usize {
        self.state.lock().send_calls
    }

    pub fn wait_writable_calls(&self) -> usize {
        self.state.lock().wait_writable_calls
    }

    /// Number of closes that woke waiters, and number that did not.
    /// `max_bytes` of every receive call, in order.
    pub fn receive_sizes(&self) -> Vec<usize> {
        self.state.lock().receive_sizes.clone()
    }

    pub fn closes(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.notified_closes, state.quiet_closes)
    }

    pub fn discarded(&self) -> Vec<Queue> {
        self.state.lock().discarded.clone()
    }

    pub fn breaks(&self) -> Vec<Duration> {
        self.state.lock().breaks.clone()
    }

    fn require_open(&self, state: &MockPortState) -> SerialResult<()> {
        if state.open {
            Ok(())
        } else {
            Err(SerialError::closed(&self.name))
        }
    }

    fn take_rejection(state: &mut MockPortState) -> SerialResult<()> {
        match state.reject_next.take() {
            Some(message) => Err(SerialError::configuration("mock", message)),
            None => Ok(()),
        }
    }

    /// Suspend until `ready` holds, failing if the port is or becomes closed.
    async fn wait_until<F>(&self, ready: F) -> SerialResult<()>
    where
        F: Fn(&MockPortState) -> bool + Send,
    {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.state.lock();
                self.require_open(&state)?;
                if ready(&state) {
                    return Ok(());
                }
            }
            notified.await;
        }
    }
}

#[async_trait]
impl SerialBackend for MockBackend {
    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn open(&self, config: &PortConfiguration) -> SerialResult<()> {
        self.update(|state| {
            if state.open {
                return Err(SerialError::AlreadyOpen(self.name.clone()));
            }
            Self::take_rejection(state)?;
            state.applied.push((config.clone(), true));
            state.open = true;
            Ok(())
        })
    }

    fn close(&self) -> SerialResult<()> {
        self.update(|state| {
            if state.open {
                state.open = false;
                state.quiet_closes += 1;
            }
        });
        Ok(())
    }

    async fn aclose(&self) -> SerialResult<()> {
        self.update(|state| {
            if state.open {
                state.open = false;
                state.notified_closes += 1;
            }
        });
        Ok(())
    }

    fn reconfigure(&self, config: &PortConfiguration, force: bool) -> SerialResult<()> {
        self.update(|state| {
            if !state.open {
                return Ok(());
            }
            Self::take_rejection(state)?;
            state.applied.push((config.clone(), force));
            Ok(())
        })
    }

    fn discard(&self, queue: Queue) -> SerialResult<()> {
        self.update(|state| {
            self.require_open(state)?;
            if queue == Queue::Input {
                state.read_queue.clear();
            }
            state.discarded.push(queue);
            Ok(())
        })
    }

    async fn send_break(&self, duration: Duration) -> SerialResult<()> {
        self.update(|state| {
            self.require_open(state)?;
            state.breaks.push(duration);
            Ok(())
        })
    }

    async fn wait_writable(&self) -> SerialResult<()> {
        self.update(|state| state.wait_writable_calls += 1);
        self.wait_until(|state| state.writable).await
    }

    async fn send(&self, data: &[u8]) -> SerialResult<usize> {
        self.update(|state| {
            self.require_open(state)?;
            state.send_calls += 1;
            let n = state
                .max_write_chunk
                .map_or(data.len(), |chunk| chunk.min(data.len()));
            state.write_log.push(data[..n].to_vec());
            Ok(n)
        })
    }

    async fn receive(&self, max_bytes: usize) -> SerialResult<Vec<u8>> {
        self.update(|state| state.receive_sizes.push(max_bytes));
        self.wait_until(|state| !state.read_queue.is_empty() || state.eof)
            .await?;
        Ok(self.update(|state| {
            let n = max_bytes.min(state.read_queue.len());
            state.read_queue.drain(..n).collect()
        }))
    }

    fn modem_line(&self, line: ModemLine) -> SerialResult<bool> {
        let state = self.state.lock();
        self.require_open(&state)?;
        Ok(match line {
            ModemLine::Cts => state.cts,
            ModemLine::Rts => state.rts,
            ModemLine::Dtr => state.dtr,
            ModemLine::Dsr => state.dsr,
            ModemLine::Cd => state.cd,
            ModemLine::Ri => state.ri,
        })
    }

    fn set_modem_line(&self, line: ModemLine, value: bool) -> SerialResult<()> {
        self.update(|state| {
            self.require_open(state)?;
            match line {
                ModemLine::Rts => state.rts = value,
                ModemLine::Dtr => state.dtr = value,
                other => {
                    return Err(SerialError::configuration(
                        "modem line",
                        format!("{:?} is an input line", other),
                    ))
                }
            }
            Ok(())
        })
    }

    fn hangup(&self) -> SerialResult<bool> {
        let state = self.state.lock();
        self.require_open(&state)?;
        Ok(state.applied.last().is_some_and(|(config, _)| config.hangup))
    }

    fn baudrate(&self) -> SerialResult<u32> {
        let state = self.state.lock();
        self.require_open(&state)?;
        Ok(state.applied.last().map_or(0, |(config, _)| config.baudrate))
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockBackend")
            .field("name", &self.name)
            .field("open", &state.open)
            .field("available_bytes", &state.read_queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened() -> MockBackend {
        let mock = MockBackend::new("MOCK0");
        mock.open(&PortConfiguration::new("MOCK0")).unwrap();
        mock
    }

    #[tokio::test]
    async fn test_enqueue_and_receive() {
        let mock = opened();
        mock.enqueue_read(b"Hello");

        let data = mock.receive(3).await.unwrap();
        assert_eq!(data, b"Hel");
        let data = mock.receive(10).await.unwrap();
        assert_eq!(data, b"lo");
    }

    #[tokio::test]
    async fn test_partial_writes() {
        let mock = opened();
        mock.set_max_write_chunk(Some(2));

        assert_eq!(mock.send(b"abcde").await.unwrap(), 2);
        assert_eq!(mock.write_log(), vec![b"ab".to_vec()]);
    }

    #[tokio::test]
    async fn test_eof_after_drain() {
        let mock = opened();
        mock.enqueue_read(b"x");
        mock.set_eof();

        assert_eq!(mock.receive(10).await.unwrap(), b"x");
        assert!(mock.receive(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_wakes_waiter() {
        let mock = opened();
        let waiter = {
            let mock = mock.clone();
            tokio::spawn(async move { mock.receive(10).await })
        };
        tokio::task::yield_now().await;
        mock.aclose().await.unwrap();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(SerialError::ClosedResource(_))));
        assert_eq!(mock.closes(), (1, 0));
    }

    #[test]
    fn test_rejected_open_stays_closed() {
        let mock = MockBackend::new("MOCK0");
        mock.reject_next_configuration("unsupported");

        let result = mock.open(&PortConfiguration::new("MOCK0"));
        assert!(matches!(result, Err(SerialError::Configuration { .. })));
        assert!(!mock.is_open());
    }

    #[test]
    fn test_reconfigure_closed_is_noop() {
        let mock = MockBackend::new("MOCK0");
        mock.reconfigure(&PortConfiguration::new("MOCK0"), true)
            .unwrap();
        assert!(mock.applied_configurations().is_empty());
    }

    #[test]
    fn test_input_lines_cannot_be_driven() {
        let mock = opened();
        assert!(mock.set_modem_line(ModemLine::Cts, true).is_err());
        mock.set_modem_line(ModemLine::Rts, true).unwrap();
        assert!(mock.modem_line(ModemLine::Rts).unwrap());
    }
}
