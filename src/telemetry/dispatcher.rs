//! Telemetry dispatcher
//!
//! `start` binds the four telemetry queues to one vehicle's routing keys and
//! spawns one worker per topic. Each worker owns its `StreamHandler` (and so
//! its `StreamStats`) outright; topics share nothing, so a slow or stuck
//! handler only holds up its own stream.
//!
//! Worker loop, per delivery: decode and account (`on_message`), then settle
//! the delivery with the returned disposition. The shutdown signal is only
//! observed between deliveries, so a delivery that was pulled is always
//! settled before the worker exits. On shutdown the worker cancels its
//! consumer so the broker stops pushing to it.
//!
//! A broken consumer stream moves its topic to `Failed` and is reported on
//! the failure channel; the other topics keep running until `stop`.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::report::Presenter;
use crate::session::{Broker, DeliveryStream};
use crate::telemetry::{StatsSnapshot, StreamHandler, StreamStats, TopicState, TopicSummary};
use crate::topic::{Topic, VehicleId, queue_for, routing_key_for};
use crate::utils::Result;

/// A topic whose consumer broke while the dispatcher was running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFailure {
    pub topic: Topic,
    pub reason: String,
}

struct Worker {
    topic: Topic,
    state: watch::Receiver<TopicState>,
    handle: JoinHandle<TopicSummary>,
}

pub struct Dispatcher {
    broker: Arc<dyn Broker>,
    vehicle: VehicleId,
    shutdown: watch::Sender<bool>,
    workers: Vec<Worker>,
    failures: mpsc::UnboundedReceiver<TopicFailure>,
}

impl Dispatcher {
    /// Bind every telemetry queue for `vehicle`, then start consuming.
    ///
    /// All four bindings must succeed before any consumer is registered. If
    /// registering a consumer fails, the workers started so far are stopped
    /// before the error is returned.
    pub async fn start(
        broker: Arc<dyn Broker>,
        exchange: &str,
        vehicle: VehicleId,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self> {
        let mut routes = Vec::with_capacity(Topic::TELEMETRY.len());
        for topic in Topic::TELEMETRY {
            let queue = queue_for(topic)?;
            let routing_key = routing_key_for(topic, &vehicle)?;
            broker.bind_queue(queue, exchange, &routing_key).await?;
            routes.push((topic, queue));
        }
        info!("Queues bound for vehicle {vehicle} on '{exchange}'");

        let (shutdown, _) = watch::channel(false);
        let (failure_tx, failures) = mpsc::unbounded_channel();
        let mut dispatcher = Self {
            broker,
            vehicle,
            shutdown,
            workers: Vec::with_capacity(routes.len()),
            failures,
        };

        for (topic, queue) in routes {
            let consumer_tag = format!("fleetlink-{topic}-{}", Uuid::new_v4());
            let deliveries = match dispatcher.broker.consume(queue, &consumer_tag).await {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    error!("Cannot consume '{queue}': {e}");
                    dispatcher.stop().await;
                    return Err(e);
                }
            };
            let handler = StreamHandler::new(topic, dispatcher.vehicle.clone(), presenter.clone());
            let (state_tx, state) = watch::channel(TopicState::Consuming);
            let handle = tokio::spawn(run_worker(
                handler,
                Consumer {
                    broker: dispatcher.broker.clone(),
                    tag: consumer_tag,
                    deliveries,
                },
                dispatcher.shutdown.subscribe(),
                state_tx,
                failure_tx.clone(),
            ));
            dispatcher.workers.push(Worker {
                topic,
                state,
                handle,
            });
        }

        info!("Consuming telemetry for vehicle {}", dispatcher.vehicle);
        Ok(dispatcher)
    }

    pub fn vehicle(&self) -> &VehicleId {
        &self.vehicle
    }

    /// Current state of `topic`, `None` for topics this dispatcher does not run.
    pub fn state(&self, topic: Topic) -> Option<TopicState> {
        self.workers
            .iter()
            .find(|worker| worker.topic == topic)
            .map(|worker| worker.state.borrow().clone())
    }

    /// Wait for the next topic failure. `None` once every worker has exited.
    pub async fn failure(&mut self) -> Option<TopicFailure> {
        self.failures.recv().await
    }

    /// Signal every worker to stop pulling deliveries, wait for in-flight
    /// handlers to settle, and return the final stats. The session stays open.
    pub async fn stop(self) -> StatsSnapshot {
        self.shutdown.send_replace(true);

        let mut topics = Vec::with_capacity(self.workers.len());
        for Worker { topic, handle, .. } in self.workers {
            match handle.await {
                Ok(summary) => topics.push(summary),
                Err(e) => {
                    error!("{topic} worker did not finish cleanly: {e}");
                    topics.push(TopicSummary {
                        topic,
                        state: TopicState::Failed(format!("worker aborted: {e}")),
                        stats: StreamStats::default(),
                    });
                }
            }
        }

        info!("Dispatcher for vehicle {} stopped", self.vehicle);
        StatsSnapshot {
            vehicle: self.vehicle,
            topics,
        }
    }
}

struct Consumer {
    broker: Arc<dyn Broker>,
    tag: String,
    deliveries: DeliveryStream,
}

async fn run_worker(
    mut handler: StreamHandler,
    mut consumer: Consumer,
    mut shutdown: watch::Receiver<bool>,
    state_tx: watch::Sender<TopicState>,
    failures: mpsc::UnboundedSender<TopicFailure>,
) -> TopicSummary {
    let topic = handler.topic();
    let fail = |reason: String| {
        state_tx.send_replace(TopicState::Failed(reason.clone()));
        let _ = failures.send(TopicFailure {
            topic,
            reason: reason.clone(),
        });
        TopicState::Failed(reason)
    };

    let state = loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if let Err(e) = consumer.broker.cancel(&consumer.tag).await {
                    warn!("{topic} consumer could not be cancelled: {e}");
                }
                break TopicState::Idle;
            }
            next = consumer.deliveries.next() => match next {
                Some(Ok(delivery)) => {
                    let disposition = handler.on_message(&delivery.routing_key, &delivery.body);
                    if let Err(e) = delivery.settle(disposition).await {
                        error!("{topic} delivery could not be settled: {e}");
                        break fail(e.to_string());
                    }
                }
                Some(Err(e)) => {
                    error!("{topic} consumer failed: {e}");
                    break fail(e.to_string());
                }
                None => {
                    warn!("{topic} consumer was cancelled by the broker");
                    break fail("consumer cancelled by broker".to_string());
                }
            }
        }
    };

    state_tx.send_replace(state.clone());
    TopicSummary {
        topic,
        state,
        stats: handler.into_stats(),
    }
}
