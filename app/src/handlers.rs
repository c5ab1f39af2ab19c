use std::path::Path;
use std::sync::Arc;

use infrastructure::{TraceContext, meter};
use tracing::Instrument as _;

use crate::command::CommandService;
use crate::device::{DeviceStore, TopicDiff};
use crate::event::{CommandReceived, ConfigChanged, EventRouter, SyncReason, SyncRequested};
use crate::homegraph::HomeGraph;
use crate::mqtt::MqttBus;
use crate::subscription::SubscriptionManager;

/// Connects the services to the events they react on.
pub fn register_handlers<H: HomeGraph, B: MqttBus>(
    router: &EventRouter,
    homegraph: Arc<H>,
    commands: Arc<CommandService<B>>,
    subscriptions: Arc<SubscriptionManager<B>>,
) {
    router.subscribe(move |event: SyncRequested| {
        let homegraph = homegraph.clone();
        async move {
            let reason = event.reason.to_string();
            tracing::info!("Requesting sync after {}", reason);
            meter::increment("gbridge_sync_requested", &[("reason", reason.as_str())]);

            homegraph.request_sync().await
        }
    });

    router.subscribe(move |event: CommandReceived| {
        let commands = commands.clone();
        async move {
            let span = tracing::info_span!("handle_commands");
            span.in_scope(|| TraceContext::continue_from(&event.correlation_id));

            commands.execute(&event.commands).instrument(span).await;
            Ok::<(), anyhow::Error>(())
        }
    });

    router.subscribe(move |event: ConfigChanged| {
        let subscriptions = subscriptions.clone();
        async move {
            subscriptions.apply(&event.diff).await;
            Ok::<(), anyhow::Error>(())
        }
    });
}

/// Re-reads the device file and announces the change. A file that fails validation keeps the
/// current configuration active and announces nothing.
pub async fn reload_once(devices: &DeviceStore, router: &EventRouter, path: impl AsRef<Path>) -> anyhow::Result<TopicDiff> {
    let diff = devices.reload(path).await?;

    router.publish(ConfigChanged { diff: diff.clone() });
    router.publish(SyncRequested {
        reason: SyncReason::ConfigReloaded,
    });

    Ok(diff)
}
