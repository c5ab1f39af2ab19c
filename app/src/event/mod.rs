use std::marker::PhantomData;

use infrastructure::{EventHub, SubscriptionToken};

use crate::command::ExecuteCommand;
use crate::device::TopicDiff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum SyncReason {
    #[display("control topic")]
    ControlTopic,
    #[display("configuration reload")]
    ConfigReloaded,
}

/// The assistant should fetch the device list again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequested {
    pub reason: SyncReason,
}

/// Commands from an EXECUTE intent, waiting to be turned into bus publications.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReceived {
    pub commands: Vec<ExecuteCommand>,
    pub correlation_id: Option<String>,
}

/// The device configuration was replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChanged {
    pub diff: TopicDiff,
}

/// Typed publish/subscribe between the gateway, the fulfillment endpoint and the services.
///
/// Publishing never waits for handlers. Each handler runs on its own task, so one failing
/// handler does not keep the others from seeing the event.
#[derive(Clone, Default)]
pub struct EventRouter {
    sync_requested: EventHub<SyncRequested>,
    command_received: EventHub<CommandReceived>,
    config_changed: EventHub<ConfigChanged>,
}

pub trait RoutedEvent: Clone + Send + std::fmt::Debug + Sized + 'static {
    fn hub(router: &EventRouter) -> &EventHub<Self>;
}

impl RoutedEvent for SyncRequested {
    fn hub(router: &EventRouter) -> &EventHub<Self> {
        &router.sync_requested
    }
}

impl RoutedEvent for CommandReceived {
    fn hub(router: &EventRouter) -> &EventHub<Self> {
        &router.command_received
    }
}

impl RoutedEvent for ConfigChanged {
    fn hub(router: &EventRouter) -> &EventHub<Self> {
        &router.config_changed
    }
}

/// Handle of one registered handler, bound to the event type it was registered for.
#[derive(Debug)]
pub struct RouterToken<E> {
    token: SubscriptionToken,
    _event: PhantomData<fn() -> E>,
}

impl<E> Clone for RouterToken<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for RouterToken<E> {}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of handlers the event was queued for.
    pub fn publish<E: RoutedEvent>(&self, event: E) -> usize {
        tracing::debug!("Publishing {:?}", event);
        E::hub(self).publish(event)
    }

    pub fn subscribe<E, F, Fut>(&self, handler: F) -> RouterToken<E>
    where
        E: RoutedEvent,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        RouterToken {
            token: E::hub(self).subscribe(handler),
            _event: PhantomData,
        }
    }

    /// Idempotent. Returns `true` only for the call that actually removed the handler.
    pub fn unsubscribe<E: RoutedEvent>(&self, token: RouterToken<E>) -> bool {
        E::hub(self).unsubscribe(token.token)
    }
}
