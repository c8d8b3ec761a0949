use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use reel_core::{
    Broker, BrokerConfig, Bus, ConsumePolicy, Context, CoreError, Delivery, Handler, HandlerError,
    Listener, MemoryTransport, PublishOptions, PublishPolicy, RegistryBuilder, Subscription,
    Transport, TransportError,
};
use reel_model::{
    JobFailed, JobId, JobSuccess, RecordingExpired, RequestRecording, UploadValidated,
    ValidateUpload,
};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct Counter(Arc<AtomicUsize>);

impl Counter {
    fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Validates uploads; fails the first `failures` attempts.
struct Validator {
    calls: Counter,
    failures: usize,
}

#[async_trait]
impl Handler<ValidateUpload> for Validator {
    async fn handle(&self, cmd: ValidateUpload, ctx: &Context) -> Result<(), HandlerError> {
        let n = self.calls.bump();
        if n <= self.failures {
            return Err(HandlerError::rejected("token expired"));
        }
        ctx.publish(&UploadValidated {
            job_id: cmd.job_id,
            authorized: true,
            channel_id: 1,
            user_id: 2,
            video_title: "clip".into(),
        })
        .await
        .map_err(HandlerError::failed)
    }
}

struct CountFailures(Counter);

#[async_trait]
impl Listener<JobFailed> for CountFailures {
    async fn on_event(&self, _: &JobFailed, _: &Context) -> Result<(), HandlerError> {
        self.0.bump();
        Ok(())
    }
}

struct Flaky;

#[async_trait]
impl Listener<JobSuccess> for Flaky {
    async fn on_event(&self, _: &JobSuccess, _: &Context) -> Result<(), HandlerError> {
        Err(HandlerError::failed("listener down"))
    }
}

struct CountSuccess(Counter);

#[async_trait]
impl Listener<JobSuccess> for CountSuccess {
    async fn on_event(&self, _: &JobSuccess, _: &Context) -> Result<(), HandlerError> {
        self.0.bump();
        Ok(())
    }
}

/// Memory transport that remembers the redelivered flag of every delivery.
#[derive(Clone, Default)]
struct Observed {
    inner: MemoryTransport,
    redelivered: Arc<parking_lot::Mutex<Vec<bool>>>,
}

impl Observed {
    fn flags(&self) -> Vec<bool> {
        self.redelivered.lock().clone()
    }
}

#[async_trait]
impl Transport for Observed {
    async fn publish(
        &self,
        routing_key: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), TransportError> {
        self.inner.publish(routing_key, payload, options).await
    }

    async fn declare(&self, queue: &str, routing_key: &str) -> Result<(), TransportError> {
        self.inner.declare(queue, routing_key).await
    }

    async fn subscribe(
        &self,
        queue: &str,
        prefetch: usize,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        Ok(Box::new(ObservedSubscription {
            inner: self.inner.subscribe(queue, prefetch).await?,
            redelivered: self.redelivered.clone(),
        }))
    }
}

struct ObservedSubscription {
    inner: Box<dyn Subscription>,
    redelivered: Arc<parking_lot::Mutex<Vec<bool>>>,
}

#[async_trait]
impl Subscription for ObservedSubscription {
    async fn next(&mut self) -> Option<Result<Delivery, TransportError>> {
        let next = self.inner.next().await;
        if let Some(Ok(delivery)) = &next {
            self.redelivered.lock().push(delivery.redelivered);
        }
        next
    }
}

async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn validate(job_id: JobId) -> ValidateUpload {
    ValidateUpload {
        job_id,
        token: "secret".into(),
    }
}

fn recording(job_id: JobId) -> RequestRecording {
    serde_json::from_value(serde_json::json!({
        "job_id": job_id,
        "demo_url": "https://demos.example/m.dem.gz",
        "demo_origin": "Valve",
        "upload_url": "https://uploader.example/upload",
        "player_xuid": 1,
        "start_tick": 0,
        "end_tick": 640
    }))
    .unwrap()
}

#[tokio::test]
async fn dispatch_runs_the_single_handler_once() {
    let calls = Counter::default();
    let mut reg = RegistryBuilder::new();
    reg.handler::<ValidateUpload, _>(Validator {
        calls: calls.clone(),
        failures: 0,
    })
    .unwrap();
    let bus = Bus::new(reg.build());

    bus.dispatch(validate(JobId::new())).await.unwrap();
    assert_eq!(calls.get(), 1);
}

#[tokio::test]
async fn dispatch_without_handler_is_a_configuration_error() {
    let bus = Bus::new(RegistryBuilder::new().build());
    let err = bus.dispatch(validate(JobId::new())).await.unwrap_err();
    assert!(matches!(err, CoreError::UnregisteredCommand(name) if name == "validate_upload"));
}

#[tokio::test]
async fn listener_failure_does_not_stop_the_others() {
    let seen = Counter::default();
    let mut reg = RegistryBuilder::new();
    reg.listener::<JobSuccess, _>(Flaky)
        .listener::<JobSuccess, _>(CountSuccess(seen.clone()));
    let bus = Bus::new(reg.build());

    let res = bus.publish_local(&JobSuccess { job_id: JobId::new() }).await;
    assert!(res.is_err());
    assert_eq!(seen.get(), 1);
}

#[tokio::test]
async fn concurrent_waiters_resolve_independently() {
    let bus = Bus::new(RegistryBuilder::new().build());
    let (a, b) = (JobId::new(), JobId::new());

    let wait_a = bus.waiter::<JobFailed, _>(move |e| e.job_id == a);
    let wait_b = bus.waiter::<JobFailed, _>(move |e| e.job_id == b);
    assert_eq!(bus.pending_waiters("job_failed"), 2);

    bus.publish_local(&JobFailed { job_id: b, reason: "b".into() }).await.unwrap();
    bus.publish_local(&JobFailed { job_id: a, reason: "a".into() }).await.unwrap();

    let got_a = wait_a.wait(Duration::from_secs(1)).await.unwrap();
    let got_b = wait_b.wait(Duration::from_secs(1)).await.unwrap();
    assert_eq!(got_a.reason, "a");
    assert_eq!(got_b.reason, "b");
    assert_eq!(bus.pending_waiters("job_failed"), 0);
}

#[tokio::test(start_paused = true)]
async fn wait_for_times_out_with_no_result() {
    let bus = Bus::new(RegistryBuilder::new().build());
    let job = JobId::new();

    let got = bus
        .wait_for::<JobSuccess, _>(move |e| e.job_id == job, Duration::from_secs(32))
        .await;
    assert!(got.is_none());
    assert_eq!(bus.pending_waiters("job_success"), 0);
}

#[tokio::test]
async fn requeue_policy_redelivers_until_handled() {
    let calls = Counter::default();
    let mut reg = RegistryBuilder::new();
    reg.handler::<ValidateUpload, _>(Validator {
        calls: calls.clone(),
        failures: 2,
    })
    .unwrap();
    reg.consume_policy::<ValidateUpload>(ConsumePolicy::new().requeue(true));
    let bus = Bus::new(reg.build());

    let transport = MemoryTransport::new();
    let broker = Broker::builder(bus.clone(), Arc::new(transport.clone()))
        .config(BrokerConfig::new("worker"))
        .publishes::<ValidateUpload>()
        .consumes::<ValidateUpload>()
        .build();
    let handle = broker.start(CancellationToken::new()).await.unwrap();

    let job = JobId::new();
    let validated = bus.waiter::<UploadValidated, _>(move |e| e.job_id == job);
    broker.publish(&validate(job)).await.unwrap();

    assert!(validated.wait(Duration::from_secs(2)).await.is_some());
    assert_eq!(calls.get(), 3);
    assert_eq!(transport.queue_len("validate_upload"), 0);
    handle.shutdown().await;
}

#[tokio::test]
async fn error_factory_publishes_one_event_and_acks() {
    let calls = Counter::default();
    let failures = Counter::default();
    let mut reg = RegistryBuilder::new();
    reg.handler::<ValidateUpload, _>(Validator {
        calls: calls.clone(),
        failures: usize::MAX,
    })
    .unwrap();
    reg.listener::<JobFailed, _>(CountFailures(failures.clone()));
    reg.consume_policy::<ValidateUpload>(ConsumePolicy::new().on_error(
        |err: &HandlerError, cmd: ValidateUpload| {
            Some(JobFailed {
                job_id: cmd.job_id,
                reason: err.public_reason("Recorder failed.").to_string(),
            })
        },
    ));
    let bus = Bus::new(reg.build());

    let transport = MemoryTransport::new();
    let broker = Broker::builder(bus.clone(), Arc::new(transport.clone()))
        .publishes::<ValidateUpload>()
        .consumes::<ValidateUpload>()
        .consumes::<JobFailed>()
        .build();
    broker.attach();
    let handle = broker.start(CancellationToken::new()).await.unwrap();

    let job = JobId::new();
    let failed = bus.waiter::<JobFailed, _>(move |e| e.job_id == job);
    broker.publish(&validate(job)).await.unwrap();

    let event = failed.wait(Duration::from_secs(2)).await.unwrap();
    assert_eq!(event.reason, "token expired");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.get(), 1);
    assert_eq!(failures.get(), 1);
    assert_eq!(transport.queue_len("validate_upload"), 0);
    assert_eq!(transport.queue_len("worker.job_failed"), 0);
    handle.shutdown().await;
}

#[tokio::test]
async fn requeue_with_error_factory_redelivers_without_error_events() {
    let calls = Counter::default();
    let failures = Counter::default();
    let mut reg = RegistryBuilder::new();
    reg.handler::<ValidateUpload, _>(Validator {
        calls: calls.clone(),
        failures: 2,
    })
    .unwrap();
    reg.listener::<JobFailed, _>(CountFailures(failures.clone()));
    reg.consume_policy::<ValidateUpload>(ConsumePolicy::new().requeue(true).on_error(
        |err: &HandlerError, cmd: ValidateUpload| {
            Some(JobFailed {
                job_id: cmd.job_id,
                reason: err.public_reason("Recorder failed.").to_string(),
            })
        },
    ));
    let bus = Bus::new(reg.build());

    let transport = Observed::default();
    let broker = Broker::builder(bus.clone(), Arc::new(transport.clone()))
        .publishes::<ValidateUpload>()
        .consumes::<ValidateUpload>()
        .consumes::<JobFailed>()
        .build();
    let handle = broker.start(CancellationToken::new()).await.unwrap();

    let job = JobId::new();
    let validated = bus.waiter::<UploadValidated, _>(move |e| e.job_id == job);
    broker.publish(&validate(job)).await.unwrap();

    assert!(validated.wait(Duration::from_secs(2)).await.is_some());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(calls.get(), 3);
    assert_eq!(failures.get(), 0);
    assert_eq!(transport.flags(), vec![false, true, true]);
    assert_eq!(transport.inner.queue_len("validate_upload"), 0);
    assert_eq!(transport.inner.queue_len("worker.job_failed"), 0);
    handle.shutdown().await;
}

#[tokio::test]
async fn raise_on_ok_routes_normal_completion_to_the_error_event() {
    let calls = Counter::default();
    let mut reg = RegistryBuilder::new();
    reg.handler::<ValidateUpload, _>(Validator {
        calls: calls.clone(),
        failures: 0,
    })
    .unwrap();
    reg.consume_policy::<ValidateUpload>(ConsumePolicy::new().raise_on_ok(true).on_error(
        |err: &HandlerError, cmd: ValidateUpload| {
            Some(JobFailed {
                job_id: cmd.job_id,
                reason: err.public_reason("Recorder failed.").to_string(),
            })
        },
    ));
    let bus = Bus::new(reg.build());

    let transport = MemoryTransport::new();
    let broker = Broker::builder(bus.clone(), Arc::new(transport.clone()))
        .publishes::<ValidateUpload>()
        .consumes::<ValidateUpload>()
        .consumes::<JobFailed>()
        .build();
    let handle = broker.start(CancellationToken::new()).await.unwrap();

    let job = JobId::new();
    let failed = bus.waiter::<JobFailed, _>(move |e| e.job_id == job);
    broker.publish(&validate(job)).await.unwrap();

    let event = failed.wait(Duration::from_secs(2)).await.unwrap();
    assert_eq!(event.reason, "Recorder failed.");
    assert_eq!(calls.get(), 1);
    assert_eq!(transport.queue_len("validate_upload"), 0);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unconsumed_command_is_dead_lettered_after_ttl() {
    let mut reg = RegistryBuilder::new();
    reg.publish_policy::<RequestRecording>(
        PublishPolicy::new()
            .ttl(Duration::from_secs(600))
            .dead_letter::<RecordingExpired>(),
    );
    let bus = Bus::new(reg.build());

    let transport = MemoryTransport::new();
    // the worker queue exists but no worker is consuming it
    transport
        .declare("request_recording", "request_recording")
        .await
        .unwrap();

    let broker = Broker::builder(bus.clone(), Arc::new(transport.clone()))
        .config(BrokerConfig::new("api"))
        .publishes::<RequestRecording>()
        .consumes::<RecordingExpired>()
        .build();
    let handle = broker.start(CancellationToken::new()).await.unwrap();

    let job = JobId::new();
    let expired = bus.waiter::<RecordingExpired, _>(move |e| e.job_id == job);
    broker.publish(&recording(job)).await.unwrap();

    let got = expired.wait(Duration::from_secs(3600)).await;
    assert_eq!(got, Some(RecordingExpired { job_id: job }));
    assert_eq!(transport.queue_len("request_recording"), 0);
    handle.shutdown().await;
}

#[tokio::test]
async fn start_rejects_consumed_command_without_handler() {
    let bus = Bus::new(RegistryBuilder::new().build());
    let broker = Broker::builder(bus, Arc::new(MemoryTransport::new()))
        .consumes::<ValidateUpload>()
        .build();

    let err = broker.start(CancellationToken::new()).await.err().unwrap();
    assert!(matches!(err, CoreError::UnregisteredCommand(_)));
}

#[tokio::test]
async fn undeclared_command_cannot_be_published() {
    let bus = Bus::new(RegistryBuilder::new().build());
    let broker = Broker::builder(bus, Arc::new(MemoryTransport::new())).build();

    let err = broker.publish(&validate(JobId::new())).await.unwrap_err();
    assert!(matches!(err, CoreError::Publish(_)));
}

#[tokio::test]
async fn consume_loop_resumes_after_connection_loss() {
    let calls = Counter::default();
    let mut reg = RegistryBuilder::new();
    reg.handler::<ValidateUpload, _>(Validator {
        calls: calls.clone(),
        failures: 0,
    })
    .unwrap();
    let bus = Bus::new(reg.build());

    let transport = MemoryTransport::new();
    let broker = Broker::builder(bus.clone(), Arc::new(transport.clone()))
        .config(BrokerConfig::new("worker").with_reconnect(reel_model::BackoffStrategy::fixed(10)))
        .publishes::<ValidateUpload>()
        .consumes::<ValidateUpload>()
        .build();
    let handle = broker.start(CancellationToken::new()).await.unwrap();

    broker.publish(&validate(JobId::new())).await.unwrap();
    eventually("first delivery", || calls.get() == 1).await;

    transport.disconnect();
    broker.publish(&validate(JobId::new())).await.unwrap();
    eventually("delivery after reconnect", || calls.get() >= 2).await;
    handle.shutdown().await;
}
