//! Bus listener logging the job lifecycle.
//!
//! Progress (waiting, recording, uploading) is logged at debug, completions
//! at info, failures and expirations at warn.
use async_trait::async_trait;
use reel_core::{Context, HandlerError, Listener, RegistryBuilder};
use reel_model::{
    JobFailed, JobId, JobRecording, JobSuccess, JobUploading, JobWaiting, RecordingExpired,
    UploaderFailure, UploaderSuccess,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct JobLogListener;

impl JobLogListener {
    /// Subscribe to every job lifecycle event.
    pub fn register(builder: &mut RegistryBuilder) -> &mut RegistryBuilder {
        builder
            .listener::<JobWaiting, _>(Self)
            .listener::<JobRecording, _>(Self)
            .listener::<JobUploading, _>(Self)
            .listener::<JobSuccess, _>(Self)
            .listener::<JobFailed, _>(Self)
            .listener::<RecordingExpired, _>(Self)
            .listener::<UploaderSuccess, _>(Self)
            .listener::<UploaderFailure, _>(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Waiting,
    Recording,
    Uploading,
    Success,
    Failed,
    Expired,
    Delivered,
    Undelivered,
}

fn message_for(stage: Stage) -> &'static str {
    match stage {
        Stage::Waiting => "job waiting for a recorder",
        Stage::Recording => "job recording",
        Stage::Uploading => "job uploading",
        Stage::Success => "job finished",
        Stage::Failed => "job failed",
        Stage::Expired => "job expired before a worker picked it up",
        Stage::Delivered => "upload accepted",
        Stage::Undelivered => "upload refused",
    }
}

fn log_stage(stage: Stage, job_id: JobId, reason: Option<&str>) {
    let msg = message_for(stage);
    match stage {
        Stage::Waiting | Stage::Recording | Stage::Uploading => debug!(%job_id, "{msg}"),
        Stage::Success | Stage::Delivered => info!(%job_id, "{msg}"),
        Stage::Expired => warn!(%job_id, "{msg}"),
        Stage::Failed | Stage::Undelivered => {
            warn!(%job_id, reason = reason.unwrap_or("unknown"), "{msg}")
        }
    }
}

macro_rules! job_log {
    ($ty:ty, $stage:expr) => {
        job_log!($ty, $stage, |_event| None);
    };
    ($ty:ty, $stage:expr, |$event:ident| $reason:expr) => {
        #[async_trait]
        impl Listener<$ty> for JobLogListener {
            async fn on_event(&self, $event: &$ty, _: &Context) -> Result<(), HandlerError> {
                log_stage($stage, $event.job_id, $reason);
                Ok(())
            }

            fn name(&self) -> &'static str {
                "job_log"
            }
        }
    };
}

job_log!(JobWaiting, Stage::Waiting);
job_log!(JobRecording, Stage::Recording);
job_log!(JobUploading, Stage::Uploading);
job_log!(JobSuccess, Stage::Success);
job_log!(JobFailed, Stage::Failed, |event| Some(event.reason.as_str()));
job_log!(RecordingExpired, Stage::Expired);
job_log!(UploaderSuccess, Stage::Delivered);
job_log!(UploaderFailure, Stage::Undelivered, |event| Some(event.reason.as_str()));

#[cfg(test)]
mod tests {
    use super::*;
    use reel_core::Bus;
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[test]
    fn registers_for_every_lifecycle_event() {
        let mut builder = RegistryBuilder::new();
        JobLogListener::register(&mut builder);
        let reg = builder.build();

        for name in [
            "job_waiting",
            "job_recording",
            "job_uploading",
            "job_success",
            "job_failed",
            "recording_expired",
            "uploader_success",
            "uploader_failure",
        ] {
            assert_eq!(reg.listener_count(name), 1, "{name}");
        }
    }

    #[tokio::test]
    async fn failure_is_logged_with_reason_at_warn() {
        let out = Captured::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut builder = RegistryBuilder::new();
        JobLogListener::register(&mut builder);
        let bus = Bus::new(builder.build());
        let job_id = JobId::new();

        bus.publish_local(&JobRecording { job_id, infront: 0 }).await.unwrap();
        bus.publish_local(&JobFailed { job_id, reason: "Recorder failed.".into() })
            .await
            .unwrap();

        let text = out.text();
        assert!(!text.contains("job recording"), "debug lines filtered: {text}");
        assert!(text.contains("WARN"), "{text}");
        assert!(text.contains("job failed"), "{text}");
        assert!(text.contains("Recorder failed."), "{text}");
        assert!(text.contains(&job_id.to_string()), "{text}");
    }
}
