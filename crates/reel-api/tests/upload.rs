use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use reel_api::{
    ApiConfig, DirectoryDelivery, UNABLE_TO_UPLOAD, UPLOAD_FAILED, UploadApi, UploadService, serve,
};
use reel_core::{
    Broker, BrokerConfig, Bus, Context, Handler, HandlerError, Listener, MemoryTransport,
    RegistryBuilder,
};
use reel_model::{JobId, UploadValidated, UploaderFailure, UploaderSuccess, ValidateUpload};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

/// Job owner: authorizes the token "good", stays silent when `silent`.
struct Owner {
    silent: bool,
}

#[async_trait]
impl Handler<ValidateUpload> for Owner {
    async fn handle(&self, cmd: ValidateUpload, ctx: &Context) -> Result<(), HandlerError> {
        if self.silent {
            return Ok(());
        }
        ctx.publish(&UploadValidated {
            job_id: cmd.job_id,
            authorized: cmd.token == "good",
            channel_id: 7,
            user_id: 8,
            video_title: "clutch".into(),
        })
        .await
        .map_err(HandlerError::failed)
    }
}

#[derive(Clone, Default)]
struct Outcomes(Arc<Mutex<Vec<String>>>);

impl Outcomes {
    fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl Listener<UploaderSuccess> for Outcomes {
    async fn on_event(&self, _: &UploaderSuccess, _: &Context) -> Result<(), HandlerError> {
        self.0.lock().unwrap().push("success".into());
        Ok(())
    }
}

#[async_trait]
impl Listener<UploaderFailure> for Outcomes {
    async fn on_event(&self, e: &UploaderFailure, _: &Context) -> Result<(), HandlerError> {
        self.0.lock().unwrap().push(e.reason.clone());
        Ok(())
    }
}

struct Server {
    base: String,
    outcomes: Outcomes,
    videos: tempfile::TempDir,
    stop: CancellationToken,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn start(bus: Bus, outcomes: Outcomes, config: ApiConfig) -> Server {
    let videos = tempfile::tempdir().unwrap();
    let service = UploadService::new(bus, DirectoryDelivery::new(videos.path()), config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let stop = CancellationToken::new();
    let shutdown = stop.clone();
    tokio::spawn(async move {
        serve(listener, UploadApi::new(service).router(), async move {
            shutdown.cancelled().await
        })
        .await
        .unwrap()
    });

    Server {
        base,
        outcomes,
        videos,
        stop,
    }
}

async fn local(silent: bool, config: ApiConfig) -> Server {
    let outcomes = Outcomes::default();
    let mut reg = RegistryBuilder::new();
    reg.handler::<ValidateUpload, _>(Owner { silent }).unwrap();
    reg.listener::<UploaderSuccess, _>(outcomes.clone())
        .listener::<UploaderFailure, _>(outcomes.clone());
    start(Bus::new(reg.build()), outcomes, config).await
}

async fn post(server: &Server, job: Option<JobId>, token: Option<&str>, body: Vec<u8>) -> StatusCode {
    let mut req = reqwest::Client::new()
        .post(format!("{}/upload", server.base))
        .body(body);
    if let Some(job) = job {
        req = req.query(&[("job_id", job.to_string())]);
    }
    if let Some(token) = token {
        req = req.header("authorization", token);
    }
    req.send().await.unwrap().status()
}

#[tokio::test]
async fn authorized_upload_is_delivered() {
    let server = local(false, ApiConfig::default()).await;
    let job = JobId::new();

    let status = post(&server, Some(job), Some("good"), b"video".to_vec()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        std::fs::read(server.videos.path().join(format!("{job}.mp4"))).unwrap(),
        b"video"
    );
    assert_eq!(server.outcomes.all(), vec!["success"]);
}

#[tokio::test]
async fn request_without_job_or_token_is_refused_early() {
    let server = local(false, ApiConfig::default()).await;

    assert_eq!(post(&server, None, Some("good"), vec![]).await, StatusCode::BAD_REQUEST);
    assert_eq!(
        post(&server, Some(JobId::new()), None, vec![]).await,
        StatusCode::UNAUTHORIZED
    );
    assert!(server.outcomes.all().is_empty());
}

#[tokio::test]
async fn rejected_token_reports_upload_failed() {
    let server = local(false, ApiConfig::default()).await;

    let status = post(&server, Some(JobId::new()), Some("stolen"), b"video".to_vec()).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(server.outcomes.all(), vec![UPLOAD_FAILED]);
    assert_eq!(std::fs::read_dir(server.videos.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn unanswered_validation_is_unavailable() {
    let config = ApiConfig {
        validation_timeout_secs: 1,
        ..ApiConfig::default()
    };
    let server = local(true, config).await;

    let status = post(&server, Some(JobId::new()), Some("good"), b"video".to_vec()).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(server.outcomes.all(), vec![UNABLE_TO_UPLOAD]);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let config = ApiConfig {
        body_limit: 1024,
        ..ApiConfig::default()
    };
    let server = local(false, config).await;

    let status = post(&server, Some(JobId::new()), Some("good"), vec![0u8; 4096]).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn validation_travels_through_the_broker() {
    let transport = Arc::new(MemoryTransport::new());
    let cancel = CancellationToken::new();

    // job owner process
    let mut owner_reg = RegistryBuilder::new();
    owner_reg.handler::<ValidateUpload, _>(Owner { silent: false }).unwrap();
    let owner_bus = Bus::new(owner_reg.build());
    let owner = Broker::builder(owner_bus, transport.clone())
        .config(BrokerConfig::new("bot"))
        .consumes::<ValidateUpload>()
        .build();
    owner.attach();
    let owner_handle = owner.start(cancel.clone()).await.unwrap();

    // uploader process
    let api_bus = Bus::new(RegistryBuilder::new().build());
    let api = Broker::builder(api_bus.clone(), transport.clone())
        .config(BrokerConfig::new("uploader"))
        .publishes::<ValidateUpload>()
        .consumes::<UploadValidated>()
        .build();
    api.attach();
    let api_handle = api.start(cancel.clone()).await.unwrap();

    let server = start(api_bus, Outcomes::default(), ApiConfig::default()).await;
    let job = JobId::new();
    let status = post(&server, Some(job), Some("good"), b"video".to_vec()).await;

    assert_eq!(status, StatusCode::OK);
    assert!(server.videos.path().join(format!("{job}.mp4")).exists());

    cancel.cancel();
    owner_handle.shutdown().await;
    api_handle.shutdown().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
}
