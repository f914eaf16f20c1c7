//! The env + model service stack managed by `iwa`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use iwa_core::{
    ContainerSpec, ImageBuild, OrchestrationResult, PortMapping, ReadinessTarget, Registry,
    RetryPolicy, ServiceSpec,
};

/// Host variables copied into the env container when set.
pub const ENV_PASSTHROUGH: &[&str] = &[
    "DEMO_WEBS_ENDPOINT",
    "DEMO_WEBS_STARTING_PORT",
    "DEMO_WEB_SERVICE_PORT",
    "EVALUATOR_HEADLESS",
    "AUTOPPIA_AFFINE_MAX_STEPS",
    "MODEL_API_KEY",
];

const DOCKER_SOCKET: &str = "/var/run/docker.sock:/var/run/docker.sock";

#[derive(Debug, Clone, Args)]
pub struct StackArgs {
    /// Network shared by env and model containers
    #[arg(long, env = "IWA_NETWORK", default_value = "autoppia-affine-net", global = true)]
    pub network: String,

    /// Env container name
    #[arg(long, env = "IWA_ENV_CONTAINER", default_value = "autoppia-affine-env", global = true)]
    pub env_container: String,

    /// Env image tag
    #[arg(long, env = "IWA_ENV_IMAGE", default_value = "autoppia-affine-env:latest", global = true)]
    pub env_image: String,

    /// Env build context
    #[arg(long, default_value = ".", global = true)]
    pub env_context: PathBuf,

    /// Env Dockerfile (relative to the build context)
    #[arg(long, global = true)]
    pub env_dockerfile: Option<PathBuf>,

    /// Host port published for the env API
    #[arg(long, env = "IWA_ENV_PORT", default_value_t = 8002, global = true)]
    pub env_port: u16,

    /// Port the env API listens on inside its container
    #[arg(long, default_value_t = 8000, global = true)]
    pub env_container_port: u16,

    /// Do not mount the host engine socket into the env container
    #[arg(long, global = true)]
    pub no_docker_socket: bool,

    /// Model container name
    #[arg(long, env = "IWA_MODEL_CONTAINER", default_value = "autoppia-affine-model", global = true)]
    pub model_container: String,

    /// Model image tag
    #[arg(long, env = "IWA_MODEL_IMAGE", default_value = "autoppia-affine-model:latest", global = true)]
    pub model_image: String,

    /// Model build context
    #[arg(long, default_value = "model", global = true)]
    pub model_context: PathBuf,

    /// Model Dockerfile (relative to the build context)
    #[arg(long, global = true)]
    pub model_dockerfile: Option<PathBuf>,

    /// Host port published for the model API
    #[arg(long, env = "IWA_MODEL_PORT", default_value_t = 9000, global = true)]
    pub model_port: u16,

    /// Port the model listens on inside its container
    #[arg(long, default_value_t = 9000, global = true)]
    pub model_container_port: u16,

    /// Readiness attempts per service
    #[arg(long, default_value_t = 60, global = true)]
    pub ready_attempts: u32,

    /// Seconds between readiness attempts
    #[arg(long, default_value_t = 2, global = true)]
    pub ready_interval_secs: u64,

    /// Log lines shown when a service never becomes ready
    #[arg(long, default_value_t = 100, global = true)]
    pub ready_log_tail: usize,
}

impl StackArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.ready_attempts, Duration::from_secs(self.ready_interval_secs))
            .with_log_tail(self.ready_log_tail)
    }

    pub fn env_url(&self) -> String {
        format!("http://localhost:{}", self.env_port)
    }

    /// Model URL as seen from inside the env container.
    pub fn model_url_in_network(&self) -> String {
        format!("http://{}:{}", self.model_container, self.model_container_port)
    }

    /// Build the registry. `lookup` resolves passthrough variables.
    pub fn registry<F>(&self, with_builds: bool, lookup: F) -> OrchestrationResult<Registry>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = ContainerSpec::new(&self.env_container, &self.env_image)
            .with_port(PortMapping::new(self.env_port, self.env_container_port))
            .with_env("IWA_PORT", self.env_container_port.to_string());
        for key in ENV_PASSTHROUGH {
            if let Some(value) = lookup(key) {
                env = env.with_env(*key, value);
            }
        }
        if !self.no_docker_socket {
            env = env.with_volume(DOCKER_SOCKET);
        }

        let model = ContainerSpec::new(&self.model_container, &self.model_image)
            .with_port(PortMapping::new(self.model_port, self.model_container_port))
            .with_env("IWA_MODEL_PORT", self.model_container_port.to_string());

        let mut env_service = ServiceSpec::new("env", env).with_readiness(
            ReadinessTarget::http(&self.env_container, format!("{}/health", self.env_url()))
                .with_log_source(&self.env_container),
        );
        let mut model_service = ServiceSpec::new("model", model).with_readiness(
            ReadinessTarget::http(
                &self.model_container,
                format!("http://localhost:{}/health", self.model_port),
            )
            .with_log_source(&self.model_container),
        );

        if with_builds {
            let mut env_build = ImageBuild::new(&self.env_image, &self.env_context);
            if let Some(dockerfile) = &self.env_dockerfile {
                env_build = env_build.with_dockerfile(dockerfile);
            }
            let mut model_build = ImageBuild::new(&self.model_image, &self.model_context);
            if let Some(dockerfile) = &self.model_dockerfile {
                model_build = model_build.with_dockerfile(dockerfile);
            }
            env_service = env_service.with_build(env_build);
            model_service = model_service.with_build(model_build);
        }

        // Model first so the env can reach it as soon as it starts.
        Registry::new(&self.network)
            .with_service(model_service)?
            .with_service(env_service)
    }
}

/// Logical names of the services a command applies to.
pub fn select(registry: &Registry, service: Option<&str>) -> OrchestrationResult<Vec<String>> {
    match service {
        Some(name) => Ok(vec![registry.resolve(name)?.name.clone()]),
        None => Ok(registry.services().map(|s| s.name.clone()).collect()),
    }
}
