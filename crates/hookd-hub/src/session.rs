//! Event hub session over TCP.
//!
//! A session authenticates once per link, keeps its subscribers locally and
//! announces them to the hub when the wait loop starts. Events pushed by the
//! hub are dispatched synchronously on the task driving
//! [`wait_for_events`](Connection::wait_for_events).

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use hookd_core::{
    Connection, Event, EventCallback, Subscriber, Subscription, SubscriptionId, panic_message,
};

use crate::config::HubConfig;
use crate::error::{HubError, Result};
use crate::protocol::{
    AuthenticateParams, AuthenticateResult, Inbound, METHOD_AUTHENTICATE, METHOD_EVENT,
    METHOD_PING, METHOD_SUBSCRIBE, Message, Notification, Request, RequestId, Response, RpcError,
    SubscribeParams,
};
use crate::transport::JsonRpcCodec;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type Link = Framed<TcpStream, JsonRpcCodec>;

struct HubSubscriber {
    id: String,
    subscription: Subscription,
    callback: EventCallback,
}

/// An authenticated link handed over by the auto-connect task.
struct Established {
    link: Link,
    session_id: String,
}

pub struct HubSession {
    config: HubConfig,
    connected: Arc<AtomicBool>,
    link: Option<Link>,
    session_id: Option<String>,
    auto_task: Option<JoinHandle<()>>,
    auto_link: Option<oneshot::Receiver<Established>>,
    subscribers: Vec<HubSubscriber>,
    outbox: VecDeque<Message>,
}

impl HubSession {
    /// Create a session. With `config.auto_connect` set, a background task
    /// starts connecting right away (requires a Tokio runtime).
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        let mut session = Self {
            config,
            connected: Arc::new(AtomicBool::new(false)),
            link: None,
            session_id: None,
            auto_task: None,
            auto_link: None,
            subscribers: Vec::new(),
            outbox: VecDeque::new(),
        };
        if session.config.auto_connect {
            session.spawn_auto_connect();
        }
        session
    }

    /// Connector producing auto-connecting sessions, for server restarts.
    pub fn connector(config: HubConfig) -> impl FnMut() -> HubSession + Send + 'static {
        let config = config.with_auto_connect(true);
        move || HubSession::new(config.clone())
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Session id assigned by the hub on the current link.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn spawn_auto_connect(&mut self) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime available, event hub auto-connect disabled");
            return;
        };

        let (tx, rx) = oneshot::channel();
        let config = self.config.clone();
        let connected = Arc::clone(&self.connected);

        self.auto_task = Some(runtime.spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                match open(&config).await {
                    Ok(established) => {
                        if tx.send(established).is_ok() {
                            connected.store(true, Ordering::SeqCst);
                        }
                        return;
                    }
                    Err(e) => {
                        debug!(
                            "Event hub at {} not reachable ({}), retrying in {}s",
                            config.address,
                            e,
                            backoff.as_secs()
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }));
        self.auto_link = Some(rx);
    }

    /// Take over a link the auto-connect task has finished setting up.
    fn adopt_auto_link(&mut self) {
        let Some(rx) = self.auto_link.as_mut() else {
            return;
        };

        match rx.try_recv() {
            Ok(Established { link, session_id }) => {
                info!("Connected to event hub at {} (session {})", self.config.address, session_id);
                self.link = Some(link);
                self.session_id = Some(session_id);
                self.auto_link = None;
                self.auto_task = None;
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
            Err(oneshot::error::TryRecvError::Closed) => {
                self.auto_link = None;
                self.auto_task = None;
            }
        }
    }

    fn cancel_auto_connect(&mut self) {
        if let Some(task) = self.auto_task.take() {
            task.abort();
        }
        self.auto_link = None;
    }

    fn drop_link(&mut self) {
        self.link = None;
        self.session_id = None;
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Subscriber for HubSession {
    fn subscribe(
        &mut self,
        expression: &str,
        callback: EventCallback,
    ) -> hookd_core::Result<SubscriptionId> {
        let subscription = Subscription::parse(expression)?;
        let id = Uuid::new_v4().to_string();

        let params = serde_json::to_value(SubscribeParams {
            subscriber_id: id.clone(),
            subscription: expression.to_string(),
        })?;
        self.outbox
            .push_back(Message::Notification(Notification::new(METHOD_SUBSCRIBE, Some(params))));

        debug!("Subscriber {} registered for \"{}\"", id, expression);
        self.subscribers.push(HubSubscriber {
            id: id.clone(),
            subscription,
            callback,
        });
        Ok(SubscriptionId(id))
    }
}

impl Connection for HubSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn auto_connects(&self) -> bool {
        self.config.auto_connect
    }

    fn connect_timeout(&self) -> Option<Duration> {
        self.config.request_timeout
    }

    async fn connect(&mut self) -> hookd_core::Result<()> {
        self.adopt_auto_link();
        if self.link.is_some() {
            return Ok(());
        }
        self.cancel_auto_connect();

        let Established { link, session_id } = open(&self.config).await?;
        info!("Connected to event hub at {} (session {})", self.config.address, session_id);
        self.link = Some(link);
        self.session_id = Some(session_id);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> hookd_core::Result<()> {
        self.cancel_auto_connect();
        if let Some(mut link) = self.link.take()
            && let Err(e) = link.close().await
        {
            debug!("Error while closing event hub link: {}", e);
        }
        self.drop_link();
        info!("Disconnected from event hub");
        Ok(())
    }

    fn close(&mut self) {
        self.cancel_auto_connect();
        self.drop_link();
        self.subscribers.clear();
        self.outbox.clear();
    }

    /// Announce pending subscriptions, then dispatch hub traffic until the
    /// hub closes the link.
    ///
    /// Cancelling between frames loses nothing; a pong being written when
    /// cancelled may be dropped.
    async fn wait_for_events(&mut self) -> hookd_core::Result<()> {
        self.adopt_auto_link();
        let Some(link) = self.link.as_mut() else {
            return Err(HubError::NotConnected.into());
        };

        while let Some(message) = self.outbox.front() {
            link.feed(message.clone()).await.map_err(HubError::from)?;
            self.outbox.pop_front();
        }
        link.flush().await.map_err(HubError::from)?;
        debug!("Listening for events with {} subscribers", self.subscribers.len());

        loop {
            let frame = match link.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    warn!("Event hub link failed: {}", e);
                    self.drop_link();
                    return Err(HubError::from(e).into());
                }
                None => {
                    info!("Event hub closed the connection");
                    self.drop_link();
                    return Ok(());
                }
            };

            match frame.into_inbound() {
                Inbound::Notify { method, params } if method == METHOD_EVENT => {
                    dispatch(&self.subscribers, params);
                }
                Inbound::Notify { method, .. } => {
                    debug!("Ignoring `{}` notification from event hub", method);
                }
                Inbound::Call { id, method, .. } => {
                    let response = answer(id, &method);
                    link.send(Message::Response(response))
                        .await
                        .map_err(HubError::from)?;
                }
                Inbound::Response(response) => {
                    trace!("Ignoring unsolicited response {}", response.id);
                }
            }
        }
    }
}

impl Drop for HubSession {
    fn drop(&mut self) {
        self.cancel_auto_connect();
    }
}

/// Connect to the hub and authenticate, bounded by the request timeout.
async fn open(config: &HubConfig) -> Result<Established> {
    let timeout = config.effective_timeout();
    tokio::time::timeout(timeout, async {
        let stream = TcpStream::connect(&config.address).await?;
        let mut link = Framed::new(stream, JsonRpcCodec::new());
        let session_id = authenticate(&mut link, config).await?;
        Ok::<_, HubError>(Established { link, session_id })
    })
    .await
    .map_err(|_| HubError::Timeout(timeout))?
}

async fn authenticate(link: &mut Link, config: &HubConfig) -> Result<String> {
    let id = RequestId::from(METHOD_AUTHENTICATE);
    let params = serde_json::to_value(AuthenticateParams {
        user: config.api_user.clone(),
        api_key: config.api_key.clone(),
    })?;
    link.send(Message::Request(Request::new(METHOD_AUTHENTICATE, Some(params), id.clone())))
        .await?;

    while let Some(frame) = link.next().await {
        match frame?.into_inbound() {
            Inbound::Response(response) if response.id == id => {
                if let Some(error) = response.error {
                    return Err(error.into());
                }
                let result = response.result.ok_or(HubError::UnexpectedResponse)?;
                let AuthenticateResult { session_id } = serde_json::from_value(result)?;
                return Ok(session_id);
            }
            other => trace!("Ignoring frame before authentication: {:?}", other),
        }
    }

    Err(HubError::ConnectionClosed)
}

fn answer(id: RequestId, method: &str) -> Response {
    if method == METHOD_PING {
        Response::success(id, json!("pong"))
    } else {
        warn!("Event hub called unknown method `{}`", method);
        Response::error(id, RpcError::method_not_found(method))
    }
}

/// Run every matching callback. A panicking callback is logged and does not
/// affect the others.
fn dispatch(subscribers: &[HubSubscriber], params: Option<Value>) {
    let Some(params) = params else {
        warn!("Event notification without payload");
        return;
    };
    let event: Event = match serde_json::from_value(params) {
        Ok(event) => event,
        Err(e) => {
            warn!("Malformed event from hub: {}", e);
            return;
        }
    };

    trace!("Event {} on {}", event.id, event.topic);
    for subscriber in subscribers
        .iter()
        .filter(|s| s.subscription.matches(&event))
    {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(&event))) {
            warn!(
                "Subscriber {} (\"{}\") panicked on event {}: {}",
                subscriber.id,
                subscriber.subscription,
                event.id,
                panic_message(payload.as_ref())
            );
        }
    }
}
