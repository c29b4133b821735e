//! End-to-end publisher run
//!
//! Certificate → token → connect → publish loop → disconnect. Failures abort
//! the remaining steps; once connected, disconnect runs on every exit path.

use crate::auth::{Clock, TokenMinter};
use crate::certificate::RootCertificate;
use crate::config::PublisherConfig;
use crate::error::{PublisherError, PublisherResult};
use crate::publisher::{run_publish_loop, PublishPlan, PublishReport};
use crate::transport::{
    observe_session_events, ConnectRequest, EventTally, SessionSettings, Transport,
    TransportFactory,
};
use crate::{lifecycle_span, session_span};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

/// How long to wait for the observer to drain after the session is gone
const OBSERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub publish: PublishReport,
    pub events: EventTally,
}

/// Execute one publisher run against transports built by `factory`
pub async fn run<F, C>(
    config: &PublisherConfig,
    minter: &TokenMinter<C>,
    factory: &F,
    mut shutdown: watch::Receiver<bool>,
) -> PublisherResult<RunReport>
where
    F: TransportFactory,
    C: Clock,
{
    let span = lifecycle_span!(device_id = %config.device.device_id);

    async move {
        let root_certificate = RootCertificate::load(&config.credentials.root_ca_path)?;
        info!(
            certificates = root_certificate.len(),
            "Loaded root certificate"
        );

        let token = minter.mint_from_file(&config.credentials.private_key_path)?;

        let settings = SessionSettings::from_config(config, root_certificate)?;
        let mut transport = factory.create(settings)?;
        let observer = transport
            .take_events()
            .map(|events| tokio::spawn(observe_session_events(events)));

        let request = ConnectRequest {
            client_id: config.client_id(),
            token,
        };
        let session = session_span!(client_id = %request.client_id);

        if let Err(e) = transport.connect(request).instrument(session.clone()).await {
            error!("Unable to connect to GCP IoT Core.");
            drop(transport);
            drain_observer(observer).await;
            return Err(PublisherError::connection(e));
        }

        let plan = PublishPlan::from_config(config);
        let publish_result = run_publish_loop(&transport, &plan, &mut shutdown)
            .instrument(session.clone())
            .await;

        if let Err(e) = transport.disconnect().instrument(session).await {
            warn!("Disconnect failed: {}", e);
        }
        drop(transport);

        let events = drain_observer(observer).await;
        let publish = publish_result?;

        if publish.interrupted {
            info!(
                published = publish.published,
                "Run interrupted before all messages were sent"
            );
        } else {
            info!(
                published = publish.published,
                failed = publish.failed,
                "Run complete"
            );
        }

        Ok(RunReport { publish, events })
    }
    .instrument(span)
    .await
}

async fn drain_observer(observer: Option<JoinHandle<EventTally>>) -> EventTally {
    let Some(handle) = observer else {
        return EventTally::default();
    };

    match tokio::time::timeout(OBSERVER_DRAIN_TIMEOUT, handle).await {
        Ok(Ok(tally)) => tally,
        Ok(Err(e)) => {
            warn!("Session observer task failed: {}", e);
            EventTally::default()
        }
        Err(_) => {
            warn!("Session observer did not finish in time");
            EventTally::default()
        }
    }
}
