use std::sync::Arc;

use settings::Settings;
use tokio::signal::unix::{SignalKind, signal};

use crate::command::CommandService;
use crate::device::{DeviceRegistry, DeviceStore};
use crate::event::EventRouter;
use crate::gateway::GatewayRunner;
use crate::homegraph::HomeGraphClient;
use crate::state::StateCache;
use crate::subscription::SubscriptionManager;

mod command;
mod device;
mod event;
mod fulfillment;
mod gateway;
mod handlers;
mod homegraph;
mod mqtt;
mod settings;
mod state;
mod subscription;

#[tokio::main(flavor = "multi_thread")]
pub async fn main() {
    let settings = Settings::new().expect("Error reading configuration");
    settings.monitoring.init().expect("Error initializing monitoring");

    let google_home = settings.google_home.clone();
    let control_topic = google_home.control_topic();

    let registry = DeviceRegistry::load(&google_home.device_config_file)
        .await
        .expect("Error loading device configuration");

    let cache = StateCache::seeded(&registry, &control_topic);
    let devices = Arc::new(DeviceStore::new(registry));

    let mut mqtt_client = settings.mqtt.new_client();
    let mqtt_subscription = mqtt_client.subscription().expect("MQTT subscription already taken");
    let mqtt_sender = mqtt_client.sender();

    let homegraph = Arc::new(
        HomeGraphClient::new(
            &google_home.homegraph_url,
            &google_home.agent_user_id,
            google_home.access_token.clone(),
            google_home.retry,
        )
        .expect("Error creating HomeGraph client"),
    );

    let router = EventRouter::new();
    let subscriptions = Arc::new(SubscriptionManager::new(mqtt_sender.clone(), cache.clone(), &control_topic));
    let commands = Arc::new(CommandService::new(devices.clone(), mqtt_sender));

    handlers::register_handlers(&router, homegraph.clone(), commands, subscriptions.clone());

    let gateway = GatewayRunner::new(
        cache.clone(),
        devices.clone(),
        router.clone(),
        homegraph.clone(),
        &control_topic,
    );

    let http_server_exec = {
        let devices = devices.clone();
        let cache = cache.clone();
        let router = router.clone();
        let agent_user_id = google_home.agent_user_id.clone();

        async move {
            settings
                .http_server
                .run_server(move || {
                    vec![fulfillment::routes(fulfillment::FulfillmentState {
                        devices: devices.clone(),
                        cache: cache.clone(),
                        router: router.clone(),
                        agent_user_id: agent_user_id.clone(),
                    })]
                })
                .await
                .expect("HTTP server execution failed");
        }
    };

    let subscriptions_exec = {
        let sessions = mqtt_client.sessions();
        async move { subscriptions.follow_sessions(sessions).await }
    };

    tracing::info!("Starting main loop");

    tokio::select!(
        _ = mqtt_client.run() => {},
        _ = subscriptions_exec => {},
        _ = gateway.run(mqtt_subscription) => {},
        _ = http_server_exec => {},
        res = reload_on_hangup(devices, router, google_home.device_config_file) => {
            if let Err(e) = res {
                tracing::error!("Configuration reload stopped: {:?}", e);
            }
        },
    );
}

/// Re-reads the device file on every SIGHUP.
async fn reload_on_hangup(devices: Arc<DeviceStore>, router: EventRouter, path: String) -> anyhow::Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;

    while hangup.recv().await.is_some() {
        tracing::info!("Reloading device configuration from {}", path);

        if let Err(e) = handlers::reload_once(&devices, &router, &path).await {
            tracing::error!("Keeping current device configuration: {:?}", e);
        }
    }

    Ok(())
}
