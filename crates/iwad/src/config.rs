//! Environment process configuration.
//!
//! Every option is a flag with an environment-variable fallback, so the same
//! binary is configured by `docker run -e ...` in production and by flags in
//! development.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use iwa_core::{
    ComposeProject, OrchestrationError, OrchestrationResult, PortForward, ReadinessTarget,
    RetryPolicy, SiblingsSpec,
};

pub const DEFAULT_MAX_STEPS: u32 = 30;
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(60);
pub const ENVIRONMENT_NAME: &str = "autoppia_affine_env";
/// First demo web port; the bundled tasks start on it.
pub const DEFAULT_DEMO_WEBS_STARTING_PORT: u16 = 8001;

/// Resolve the default step budget: positive integers are taken as is,
/// anything else falls back to [`DEFAULT_MAX_STEPS`].
pub fn resolve_max_steps(raw: Option<&str>) -> u32 {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(DEFAULT_MAX_STEPS)
}

/// Settings the evaluation path reads at request time.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    pub tasks_file: PathBuf,
    /// Scheme + host of sibling web apps that task URLs are rebased onto.
    pub demo_webs_endpoint: Option<String>,
    pub demo_webs_starting_port: u16,
    pub demo_web_service_port: u16,
    pub headless: bool,
    pub default_max_steps: u32,
    pub model_api_key: Option<String>,
    pub model_timeout: Duration,
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            tasks_file: PathBuf::from("data/tasks.json"),
            demo_webs_endpoint: None,
            demo_webs_starting_port: DEFAULT_DEMO_WEBS_STARTING_PORT,
            demo_web_service_port: 8090,
            headless: true,
            default_max_steps: DEFAULT_MAX_STEPS,
            model_api_key: None,
            model_timeout: DEFAULT_MODEL_TIMEOUT,
        }
    }
}

/// `iwad serve` options.
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to
    #[arg(long, env = "IWA_BIND", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to serve /health and /evaluate on
    #[arg(long, env = "IWA_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Static task file
    #[arg(long, env = "IWA_TASKS_FILE", default_value = "data/tasks.json")]
    pub tasks_file: PathBuf,

    /// Endpoint (scheme + host) of the demo web apps
    #[arg(long, env = "DEMO_WEBS_ENDPOINT")]
    pub demo_webs_endpoint: Option<String>,

    /// First demo web port
    #[arg(long, env = "DEMO_WEBS_STARTING_PORT", default_value_t = DEFAULT_DEMO_WEBS_STARTING_PORT)]
    pub demo_webs_starting_port: u16,

    /// Demo web backend service port
    #[arg(long, env = "DEMO_WEB_SERVICE_PORT", default_value_t = 8090)]
    pub demo_web_service_port: u16,

    /// Run the evaluator headless
    #[arg(long, env = "EVALUATOR_HEADLESS", default_value_t = true, action = clap::ArgAction::Set)]
    pub headless: bool,

    /// Default max steps per task (non-positive values fall back to 30)
    #[arg(long, env = "AUTOPPIA_AFFINE_MAX_STEPS")]
    pub max_steps: Option<String>,

    /// Bearer credential sent to the model's /act endpoint
    #[arg(long, env = "MODEL_API_KEY", hide_env_values = true)]
    pub model_api_key: Option<String>,

    /// Per-request timeout for /act calls, in seconds
    #[arg(long, env = "IWA_MODEL_TIMEOUT_SECS", default_value_t = 60)]
    pub model_timeout_secs: u64,

    /// Compose file declaring the sibling demo web apps
    #[arg(long, env = "IWA_COMPOSE_FILE")]
    pub compose_file: Option<PathBuf>,

    /// Compose project name for the siblings
    #[arg(long, env = "IWA_COMPOSE_PROJECT", default_value = "autoppia-demo-webs")]
    pub compose_project: String,

    /// Container whose running state means the siblings are already up
    #[arg(long, env = "IWA_MARKER_CONTAINER", default_value = "autoppia-demo-web")]
    pub marker_container: String,

    /// Network to attach this container to after launching siblings
    #[arg(long, env = "IWA_ATTACH_NETWORK")]
    pub attach_network: Option<String>,

    /// Name of this container (defaults to $HOSTNAME)
    #[arg(long, env = "HOSTNAME")]
    pub self_container: Option<String>,

    /// Sibling container to wait for until its health check reports healthy
    #[arg(long = "wait-container")]
    pub wait_containers: Vec<String>,

    /// URL to wait for until it answers 2xx
    #[arg(long = "wait-url")]
    pub wait_urls: Vec<String>,

    /// Readiness attempts per target
    #[arg(long, env = "IWA_READY_ATTEMPTS", default_value_t = 120)]
    pub ready_attempts: u32,

    /// Seconds between readiness attempts
    #[arg(long, env = "IWA_READY_INTERVAL_SECS", default_value_t = 5)]
    pub ready_interval_secs: u64,

    /// Log lines shown when a readiness wait times out
    #[arg(long, default_value_t = 50)]
    pub log_tail: usize,

    /// Local port forward LOCAL:HOST:PORT (repeatable)
    #[arg(long = "forward")]
    pub forwards: Vec<PortForward>,

    /// Host of the demo web frontend for default forwards
    #[arg(long, env = "IWA_WEB_HOST", default_value = "autoppia-demo-web")]
    pub web_host: String,

    /// Host of the demo web backend for default forwards
    #[arg(long, env = "IWA_BACKEND_HOST", default_value = "autoppia-demo-backend")]
    pub backend_host: String,

    /// Milliseconds to wait before checking that forwards are alive
    #[arg(long, default_value_t = 1000)]
    pub forward_settle_ms: u64,
}

impl ServeArgs {
    pub fn settings(&self) -> EnvSettings {
        EnvSettings {
            tasks_file: self.tasks_file.clone(),
            demo_webs_endpoint: self.demo_webs_endpoint.clone(),
            demo_webs_starting_port: self.demo_webs_starting_port,
            demo_web_service_port: self.demo_web_service_port,
            headless: self.headless,
            default_max_steps: resolve_max_steps(self.max_steps.as_deref()),
            model_api_key: self.model_api_key.clone().filter(|k| !k.is_empty()),
            model_timeout: Duration::from_secs(self.model_timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.ready_attempts, Duration::from_secs(self.ready_interval_secs))
            .with_log_tail(self.log_tail)
    }

    /// Sibling launch, when a compose file is configured.
    pub fn siblings(&self) -> OrchestrationResult<Option<SiblingsSpec>> {
        let Some(file) = &self.compose_file else {
            return Ok(None);
        };
        let mut spec = SiblingsSpec::new(
            ComposeProject {
                file: file.clone(),
                project: self.compose_project.clone(),
            },
            self.marker_container.clone(),
        );
        if let Some(network) = &self.attach_network {
            let container = self.self_container.clone().ok_or_else(|| {
                OrchestrationError::Config(
                    "--attach-network needs --self-container or $HOSTNAME".to_string(),
                )
            })?;
            spec = spec.with_attachment(network.clone(), container);
        }
        Ok(Some(spec))
    }

    pub fn readiness_targets(&self) -> Vec<ReadinessTarget> {
        self.wait_containers
            .iter()
            .map(ReadinessTarget::container)
            .chain(
                self.wait_urls
                    .iter()
                    .map(|url| ReadinessTarget::http(url.clone(), url.clone())),
            )
            .collect()
    }

    /// Explicit forwards, or the demo web defaults when siblings are launched.
    ///
    /// A forward listening on the API port is rejected: the relay binds
    /// first and the HTTP server could never start.
    pub fn port_forwards(&self) -> OrchestrationResult<Vec<PortForward>> {
        let forwards = self.requested_forwards();
        if let Some(clash) = forwards.iter().find(|f| f.local_port == self.port) {
            return Err(OrchestrationError::Config(format!(
                "forward {clash} listens on the API port {}",
                self.port
            )));
        }
        Ok(forwards)
    }

    fn requested_forwards(&self) -> Vec<PortForward> {
        if !self.forwards.is_empty() || self.compose_file.is_none() {
            return self.forwards.clone();
        }
        vec![
            PortForward::new(
                self.demo_webs_starting_port,
                self.web_host.clone(),
                self.demo_webs_starting_port,
            ),
            PortForward::new(
                self.demo_web_service_port,
                self.backend_host.clone(),
                self.demo_web_service_port,
            ),
        ]
    }

    pub fn forward_settle(&self) -> Duration {
        Duration::from_millis(self.forward_settle_ms)
    }
}
