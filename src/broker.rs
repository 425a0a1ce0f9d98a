//! Message broker: multiplexes one framed [`Transport`] into per-request
//! completion futures, an event-handler registry, and a reverse-request
//! handler registry.
//!
//! Generalizes `lsp_transport::transport::LspTransport`
//! (`PendingRequests` keyed `oneshot` map, sequence counter, `read_loop`
//! dispatch on response vs. notification vs. request) to also service
//! adapter-initiated requests with a registered handler, and to fan an
//! event out to an ordered list of subscribers rather than just logging
//! it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::message::{Message, Request, Response};
use crate::transport::{FrameEvent, Transport};

/// A handler for an adapter-initiated (reverse) request.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, arguments: Option<serde_json::Value>) -> Result<serde_json::Value>;
}

/// A handler for an inbound event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, body: Option<serde_json::Value>);
}

/// Renders a decoded frame's kind, command/event name, and `seq` for the
/// receipt trace log — e.g. `request "launch" seq=4`.
fn describe_message(message: &Message) -> String {
    match message {
        Message::Request(r) => format!("request \"{}\" seq={}", r.command, r.seq),
        Message::Response(r) => format!(
            "response \"{}\" seq={} request_seq={}",
            r.command, r.seq, r.request_seq
        ),
        Message::Event(e) => format!("event \"{}\" seq={}", e.event, e.seq),
    }
}

type PendingTable = Mutex<HashMap<u64, oneshot::Sender<Response>>>;
type RequestHandlerTable = Mutex<HashMap<String, Arc<dyn RequestHandler>>>;
type EventHandlerTable = Mutex<HashMap<String, Vec<Arc<dyn EventHandler>>>>;

/// De-multiplexes a [`Transport`]. Owns the transport; dropped with it.
pub struct Broker {
    transport: Arc<Transport>,
    next_seq: Mutex<u64>,
    pending: Arc<PendingTable>,
    request_handlers: Arc<RequestHandlerTable>,
    event_handlers: Arc<EventHandlerTable>,
}

impl Broker {
    /// Spawns the transport's reader loop and wires its decoded frames
    /// into this broker's ingress routing.
    pub fn spawn<R, W>(reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: Arc<PendingTable> = Arc::new(Mutex::new(HashMap::new()));
        let request_handlers: Arc<RequestHandlerTable> = Arc::new(Mutex::new(HashMap::new()));
        let event_handlers: Arc<EventHandlerTable> = Arc::new(Mutex::new(HashMap::new()));

        // The transport's frame handler is synchronous and must never
        // block the reader loop, so it only forwards decoded frames
        // into this channel. A single router task drains the channel
        // and processes frames strictly in wire-receive order: this is
        // what keeps event fan-out (and response correlation) ordered
        // even though reverse-request servicing below is detached into
        // its own task so a slow host delegate never stalls routing.
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let transport = Arc::new(Transport::spawn(reader, writer, move |event| match event {
            FrameEvent::Message(message) => {
                debug!("received {}", describe_message(&message));
                let _ = tx.send(message);
            }
            FrameEvent::InvalidMessage(reason) => {
                warn!("dropping malformed frame: {reason}");
            }
        }));

        let broker = Arc::new(Self {
            transport,
            next_seq: Mutex::new(1),
            pending,
            request_handlers,
            event_handlers,
        });

        let router_broker = broker.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                router_broker.route(message).await;
            }
        });

        broker
    }

    fn allocate_seq(&self) -> u64 {
        let mut seq = self.next_seq.lock();
        let allocated = *seq;
        *seq += 1;
        allocated
    }

    /// Sends `command` with `arguments`, suspending until the correlated
    /// response arrives or the broker closes.
    pub async fn send_request(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<Response> {
        let seq = self.allocate_seq();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(seq, tx);

        let request = Message::Request(Request {
            seq,
            command: command.to_string(),
            arguments,
        });

        if let Err(e) = self.transport.send(&request).await {
            self.pending.lock().remove(&seq);
            return Err(e);
        }

        rx.await
            .map_err(|_| Error::TransportFailure("broker closed while awaiting response".into()))
    }

    /// Sends an event with no response tracking.
    pub async fn send_event(&self, name: &str, body: Option<serde_json::Value>) -> Result<()> {
        let seq = self.allocate_seq();
        let event = Message::Event(crate::message::Event {
            seq,
            event: name.to_string(),
            body,
        });
        self.transport.send(&event).await
    }

    /// Installs or replaces the handler for a reverse-request command.
    pub fn register_request_handler(&self, command: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.request_handlers.lock().insert(command.into(), handler);
    }

    /// Appends to the ordered handler list for an event name.
    pub fn register_event_handler(&self, event: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.event_handlers
            .lock()
            .entry(event.into())
            .or_default()
            .push(handler);
    }

    async fn route(self: &Arc<Self>, message: Message) {
        match message {
            Message::Response(response) => self.route_response(response),
            // Detached: a reverse request may suspend on host-delegate
            // work for a while, and must not stall the router task
            // (and thus response correlation / event ordering) behind it.
            Message::Request(request) => {
                let broker = self.clone();
                tokio::spawn(async move { broker.route_request(request).await });
            }
            Message::Event(event) => self.route_event(event).await,
        }
    }

    fn route_response(&self, response: Response) {
        let sender = self.pending.lock().remove(&response.request_seq);
        match sender {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => {
                warn!(
                    "dropping stale response for request_seq={} (command={})",
                    response.request_seq, response.command
                );
            }
        }
    }

    async fn route_request(&self, request: Request) {
        debug!("dispatching reverse request `{}`", request.command);
        let handler = self.request_handlers.lock().get(&request.command).cloned();
        let seq = self.allocate_seq();

        let response = match handler {
            None => Response::failure(
                seq,
                request.seq,
                request.command.clone(),
                format!("Unsupported request: {}", request.command),
            ),
            Some(handler) => match handler.handle(request.arguments.clone()).await {
                Ok(body) => Response::success(seq, request.seq, request.command.clone(), Some(body)),
                Err(e) => Response::failure(seq, request.seq, request.command.clone(), e.to_string()),
            },
        };

        if let Err(e) = self.transport.send(&Message::Response(response)).await {
            warn!("failed to send reverse-request response: {e}");
        }
    }

    async fn route_event(&self, event: crate::message::Event) {
        let handlers = self
            .event_handlers
            .lock()
            .get(&event.event)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler.handle(event.body.clone()).await;
        }
    }

    /// Closes the underlying transport and fails all outstanding
    /// `send_request` callers with `TransportFailure`.
    pub async fn close(&self) {
        self.transport.close().await;
        for (_, tx) in self.pending.lock().drain() {
            drop(tx);
        }
    }
}
