use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use reel_exec::{
    PipelineConfig,
    engine::subprocess::{CommandSpec, SubprocessEngineConfig},
};
use reel_gateway::GatewayConfig;
use reel_model::BackoffStrategy;
use reel_observe::{LoggerConfig, LoggerFormat, LoggerLevel, LoggerTimeZone};

/// Recording worker: pulls jobs from the gateway and renders them in sandboxes.
#[derive(Debug, Clone, Parser)]
#[command(name = "reel-agentd", version)]
pub struct Args {
    /// Job-assignment websocket endpoint.
    #[arg(long, env = "REEL_GATEWAY_ENDPOINT")]
    pub gateway_endpoint: String,

    /// Token for the gateway and the upload service.
    #[arg(long, env = "REEL_API_TOKEN", hide_env_values = true)]
    pub api_token: String,

    /// Delay between gateway connection attempts.
    #[arg(long, env = "REEL_RECONNECT_MS", default_value_t = 1_000)]
    pub reconnect_ms: u64,

    /// Sandbox names, one resource each.
    #[arg(long = "box", env = "REEL_BOXES", value_delimiter = ',')]
    pub boxes: Vec<String>,

    /// Number of sandboxes named `box-<n>` when no names are given.
    #[arg(long, env = "REEL_RESOURCES", default_value_t = 1)]
    pub resources: usize,

    /// Recorder program, run once per job.
    #[arg(long, env = "REEL_RECORDER")]
    pub recorder: String,

    /// Argument passed to the recorder; repeatable.
    #[arg(long = "recorder-arg", allow_hyphen_values = true)]
    pub recorder_args: Vec<String>,

    #[arg(long, env = "REEL_RECORDER_TIMEOUT_SECS", default_value_t = 600)]
    pub recorder_timeout_secs: u64,

    /// Command that rebuilds a crashed sandbox.
    #[arg(long, env = "REEL_PROVISION")]
    pub provision: Option<String>,

    #[arg(long, env = "REEL_TEMP_DIR", default_value = "temp")]
    pub temp_dir: PathBuf,

    #[arg(long, env = "REEL_DEMO_DIR", default_value = "demos")]
    pub demo_dir: PathBuf,

    /// Demo archives kept between jobs.
    #[arg(long, env = "REEL_KEEP_DEMOS", default_value_t = 8)]
    pub keep_demos: usize,

    #[arg(long, env = "REEL_DOWNLOAD_TIMEOUT_SECS", default_value_t = 32)]
    pub download_timeout_secs: u64,

    #[arg(long, env = "REEL_UPLOAD_TIMEOUT_SECS", default_value_t = 32)]
    pub upload_timeout_secs: u64,

    /// Post videos here instead of the url carried by each job.
    #[arg(long, env = "REEL_UPLOAD_URL")]
    pub upload_url: Option<String>,

    /// Serve prometheus metrics on this address.
    #[arg(long, env = "REEL_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// text, json or journald.
    #[arg(long, env = "REEL_LOG_FORMAT", default_value = "text")]
    pub log_format: LoggerFormat,

    /// `EnvFilter` expression.
    #[arg(long, env = "REEL_LOG_LEVEL", default_value = "info")]
    pub log_level: LoggerLevel,

    /// utc or local.
    #[arg(long, env = "REEL_LOG_TZ", default_value = "utc")]
    pub log_tz: LoggerTimeZone,
}

impl Args {
    pub fn logger(&self) -> LoggerConfig {
        LoggerConfig {
            format: self.log_format,
            level: self.log_level.clone(),
            tz: self.log_tz,
            ..LoggerConfig::default()
        }
    }

    pub fn box_names(&self) -> Vec<String> {
        if self.boxes.is_empty() {
            (0..self.resources).map(|n| format!("box-{n}")).collect()
        } else {
            self.boxes.clone()
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            temp_dir: self.temp_dir.clone(),
            demo_dir: self.demo_dir.clone(),
            keep_demo_count: self.keep_demos,
            download_timeout_secs: self.download_timeout_secs,
            upload_timeout_secs: self.upload_timeout_secs,
            upload_url: self.upload_url.clone(),
        }
    }

    pub fn engine(&self) -> SubprocessEngineConfig {
        let recorder = CommandSpec {
            program: self.recorder.clone(),
            args: self.recorder_args.clone(),
        };
        SubprocessEngineConfig {
            timeout_secs: self.recorder_timeout_secs,
            ..SubprocessEngineConfig::new(recorder, self.temp_dir.clone())
        }
    }

    /// The provision command, run through `sh -c`.
    pub fn provision(&self) -> Option<CommandSpec> {
        self.provision
            .as_ref()
            .map(|script| CommandSpec::new("sh").arg("-c").arg(script.clone()))
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            endpoint: self.gateway_endpoint.clone(),
            api_token: self.api_token.clone(),
            reconnect: BackoffStrategy::fixed(self.reconnect_ms),
            ..GatewayConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 7] = [
        "reel-agentd",
        "--gateway-endpoint",
        "wss://gw.example/recorder",
        "--api-token",
        "secret",
        "--recorder",
        "/opt/reel/record.sh",
    ];

    fn parse(extra: &[&str]) -> Args {
        Args::try_parse_from(REQUIRED.iter().chain(extra)).unwrap()
    }

    #[test]
    fn defaults_match_pipeline_defaults() {
        let args = parse(&[]);
        assert_eq!(args.pipeline(), PipelineConfig::default());
        assert_eq!(args.box_names(), vec!["box-0"]);
        assert_eq!(args.logger().format, LoggerFormat::Text);
        assert_eq!(args.gateway().reconnect, BackoffStrategy::fixed(1_000));
    }

    #[test]
    fn named_boxes_win_over_count() {
        let args = parse(&["--box", "csgo-a,csgo-b", "--resources", "5"]);
        assert_eq!(args.box_names(), vec!["csgo-a", "csgo-b"]);

        let args = parse(&["--resources", "3"]);
        assert_eq!(args.box_names(), vec!["box-0", "box-1", "box-2"]);
    }

    #[test]
    fn recorder_args_are_forwarded() {
        let args = parse(&["--recorder-arg", "--hq", "--recorder-arg", "x"]);
        let engine = args.engine();
        assert_eq!(engine.recorder.args, vec!["--hq", "x"]);
        assert_eq!(engine.output_dir, PathBuf::from("temp"));
    }

    #[test]
    fn invalid_log_level_is_a_usage_error() {
        let res = Args::try_parse_from(REQUIRED.iter().chain(&["--log-level", "reel=loud"]));
        assert!(res.is_err());
    }

    #[test]
    fn missing_endpoint_is_a_usage_error() {
        assert!(Args::try_parse_from(["reel-agentd", "--recorder", "x"]).is_err());
    }
}
