use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tracing::{info, warn};

use burrow_core::config::ClientConfig;
use burrow_core::error::EventBusError;
use burrow_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use burrow_core::frame::OutboundFrame;

use crate::dispatcher::FrameDispatcher;
use crate::error::ConnectionError;
use crate::transport::{Transport, WebSocketTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Lost the transport; a reconnection attempt is scheduled
    Reconnecting,
    /// Explicitly closed; no reconnection will be scheduled
    Closed,
}

/// Owns the single live transport to the chat endpoint.
///
/// `run` drives the whole lifecycle: connect, pump frames both ways,
/// reconnect after a fixed delay whenever the peer closes the stream.
/// Reconnection repeats unboundedly; only [`ConnectionManager::close`]
/// stops it. Transport-level errors are logged and do not tear the
/// connection down — closure is driven by the peer-close signal alone.
///
/// Outbound frames arrive over the bus (`ui.frame.send`); decoded inbound
/// frames leave through the [`FrameDispatcher`]. Consumers never hold the
/// raw transport.
pub struct ConnectionManager<T: Transport = WebSocketTransport> {
    socket_url: String,
    reconnect_delay: Duration,
    event_bus: Arc<dyn EventBus>,
    dispatcher: FrameDispatcher,
    state: Mutex<ConnectionState>,
    running: AtomicBool,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
    _transport: PhantomData<fn() -> T>,
}

impl<T: Transport> ConnectionManager<T> {
    const OUTBOUND_QUEUE_CAPACITY: usize = 64;

    pub fn new(config: &ClientConfig, event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            socket_url: config.socket_url.clone(),
            reconnect_delay: config.reconnect_delay(),
            event_bus: event_bus.clone(),
            dispatcher: FrameDispatcher::new(event_bus),
            state: Mutex::new(ConnectionState::Connecting),
            running: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            _transport: PhantomData,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    /// Queue a frame for transmission. Fails when the connection is not
    /// open; nothing is buffered across a disconnect.
    pub fn send(&self, frame: OutboundFrame) -> Result<(), ConnectionError> {
        if self.state() != ConnectionState::Open {
            return Err(ConnectionError::NotOpen);
        }
        self.emit(
            "ui.frame.send",
            EventPayload::FrameSendRequested { frame },
        );
        Ok(())
    }

    /// Shut the connection down for good: closes the transport and
    /// suppresses the reconnection schedule. Distinct from a transport-level
    /// closure, which always reconnects.
    pub fn close(&self) {
        info!("closing chat connection");
        self.shutdown.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_one();
    }

    /// Drive the connection until [`close`](Self::close).
    ///
    /// There is at most one live transport per manager: a second `run` call
    /// is rejected instead of racing a second socket into existence.
    pub async fn run(self: Arc<Self>) -> Result<(), ConnectionError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ConnectionError::AlreadyRunning);
        }

        let mut frame_rx = self.spawn_outbound_relay()?;
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            match T::connect(&self.socket_url).await {
                Ok(mut transport) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Open);
                    info!("chat socket connected");
                    self.emit(
                        "system.connection.established",
                        EventPayload::ConnectionEstablished,
                    );

                    let reason = self.pump(&mut transport, &mut frame_rx).await;
                    let _ = transport.close().await;

                    if !self.shutdown.load(Ordering::SeqCst) {
                        warn!(reason = %reason, "chat socket closed");
                        self.emit(
                            "system.connection.lost",
                            EventPayload::ConnectionLost {
                                reason,
                                will_retry: true,
                            },
                        );
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to reach chat endpoint");
                }
            }

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            attempt += 1;
            self.set_state(ConnectionState::Reconnecting);
            self.emit(
                "system.connection.reconnecting",
                EventPayload::ConnectionReconnecting { attempt },
            );

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = self.shutdown_notify.notified() => break,
            }
        }

        self.set_state(ConnectionState::Closed);
        self.emit(
            "system.connection.lost",
            EventPayload::ConnectionLost {
                reason: "client closed".to_string(),
                will_retry: false,
            },
        );
        Ok(())
    }

    /// Forward `ui.frame.send` events into an mpsc the pump can select on
    /// without losing frames to cancellation.
    fn spawn_outbound_relay(
        &self,
    ) -> Result<mpsc::Receiver<OutboundFrame>, ConnectionError> {
        let mut sub = self
            .event_bus
            .subscribe("ui.frame.send")
            .map_err(|e| ConnectionError::EventBus(e.to_string()))?;
        let (frame_tx, frame_rx) = mpsc::channel(Self::OUTBOUND_QUEUE_CAPACITY);

        tokio::spawn(async move {
            loop {
                match sub.recv().await {
                    Ok(event) => {
                        if let EventPayload::FrameSendRequested { frame } = event.payload {
                            if frame_tx.send(frame).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(EventBusError::Lagged(count)) => {
                        warn!(count, "outbound frame relay lagged");
                    }
                    Err(_) => return,
                }
            }
        });

        Ok(frame_rx)
    }

    /// Pump one live transport until it closes. Returns the close reason.
    async fn pump(
        &self,
        transport: &mut T,
        frames: &mut mpsc::Receiver<OutboundFrame>,
    ) -> String {
        loop {
            tokio::select! {
                _ = self.shutdown_notify.notified() => {
                    return "client closed".to_string();
                }
                frame = frames.recv() => match frame {
                    Some(frame) => match frame.encode() {
                        Ok(text) => {
                            if let Err(e) = transport.send(&text).await {
                                warn!(error = %e, "failed to write frame");
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to encode outbound frame"),
                    },
                    None => return "outbound relay stopped".to_string(),
                },
                inbound = transport.recv() => match inbound {
                    Ok(Some(raw)) => self.dispatcher.dispatch(&raw),
                    Ok(None) => return "closed by server".to_string(),
                    Err(e) => warn!(error = %e, "transport error"),
                },
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    fn emit(&self, channel: &str, payload: EventPayload) {
        let Ok(channel) = Channel::new(channel) else {
            return;
        };
        let _ = self
            .event_bus
            .publish(Event::new(channel, EventSource::Transport, payload));
    }
}
