// src/renderer/mod.rs
//
// =============================================================================
// SHORTLIST: RENDERER SUPERVISOR (v 0.1)
// =============================================================================
//
// Builds, launches, health-checks, and tears down a container subprocess for
// a claimed task. The renderer is a black box: the supervisor never
// interprets its output, only its liveness and (optionally) an HTTP health
// endpoint. Grounded in the teacher's subprocess-lifecycle pattern
// (`guardian::execute_lifecycle`) and in the original node.py's literal
// `docker build` / `docker run -d` / `docker ps` / `docker stop` / `docker rm`
// invocations.

pub mod registry;

use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

pub use registry::{RendererDescriptor, RendererRegistry};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("no renderer registered for task type '{0}'")]
    UnknownType(String),
    #[error("image build failed: {0}")]
    BuildFailed(String),
    #[error("container start failed: {0}")]
    StartFailed(String),
}

/// A running renderer container for one claimed task.
pub struct RendererHandle {
    pub container_name: String,
    pub descriptor: RendererDescriptor,
    consecutive_failures: u32,
}

pub struct RendererSupervisor {
    registry: RendererRegistry,
    repo_root: std::path::PathBuf,
    health_timeout: Duration,
    stop_grace: Duration,
    max_consecutive_failures: u32,
    http: reqwest::Client,
}

impl RendererSupervisor {
    pub fn new(
        registry: RendererRegistry,
        repo_root: std::path::PathBuf,
        health_timeout: Duration,
        stop_grace: Duration,
        max_consecutive_failures: u32,
    ) -> Self {
        Self {
            registry,
            repo_root,
            health_timeout,
            stop_grace,
            max_consecutive_failures,
            http: reqwest::Client::new(),
        }
    }

    fn container_name(task_id: &str, node_id: &str) -> String {
        let prefix: String = node_id.chars().take(8).collect();
        format!("{}-{}", task_id, prefix)
    }

    pub async fn build_image(&self, task_type: &str) -> Result<(), SupervisorError> {
        let descriptor = self
            .registry
            .resolve(task_type)
            .ok_or_else(|| SupervisorError::UnknownType(task_type.to_string()))?;

        let output = Command::new("docker")
            .arg("build")
            .arg("-t")
            .arg(&descriptor.image)
            .arg(&descriptor.build_context)
            .output()
            .await
            .map_err(|e| SupervisorError::BuildFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(SupervisorError::BuildFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        Ok(())
    }

    pub async fn start(
        &self,
        task_id: &str,
        task_type: &str,
        node_id: &str,
    ) -> Result<RendererHandle, SupervisorError> {
        let descriptor = self
            .registry
            .resolve(task_type)
            .ok_or_else(|| SupervisorError::UnknownType(task_type.to_string()))?
            .clone();

        let container_name = Self::container_name(task_id, node_id);

        let mut cmd = Command::new("docker");
        cmd.arg("run").arg("-d").arg("--name").arg(&container_name);

        if let Some(port) = descriptor.port {
            cmd.arg("-p").arg(format!("{0}:{0}", port));
        }

        for volume in descriptor.resolve_volumes(&self.repo_root) {
            cmd.arg("-v").arg(volume);
        }

        for var in &descriptor.env_vars {
            match std::env::var(var) {
                Ok(val) => {
                    cmd.arg("-e").arg(format!("{}={}", var, val));
                }
                Err(_) => {
                    log::warn!(
                        "renderer '{}' expects env var '{}' but it is not set; proceeding without it",
                        task_type,
                        var
                    );
                }
            }
        }

        cmd.arg(&descriptor.image);

        let output = cmd
            .output()
            .await
            .map_err(|e| SupervisorError::StartFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(SupervisorError::StartFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        Ok(RendererHandle {
            container_name,
            descriptor,
            consecutive_failures: 0,
        })
    }

    pub async fn is_running(&self, handle: &RendererHandle) -> bool {
        let output = Command::new("docker")
            .arg("inspect")
            .arg("-f")
            .arg("{{.State.Running}}")
            .arg(&handle.container_name)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                String::from_utf8_lossy(&out.stdout).trim() == "true"
            }
            _ => false,
        }
    }

    /// Returns healthy/unhealthy, bumping or resetting the handle's internal
    /// failure counter. If no endpoint is declared, always healthy.
    pub async fn check_health(&self, handle: &mut RendererHandle) -> bool {
        if !handle.descriptor.supports_health_endpoint {
            return true;
        }
        let Some(port) = handle.descriptor.port else {
            return true;
        };

        let url = format!("http://127.0.0.1:{}/health", port);
        let probe = timeout(self.health_timeout, self.http.get(&url).send()).await;

        let ok = matches!(probe, Ok(Ok(resp)) if resp.status().is_success());

        if ok {
            handle.consecutive_failures = 0;
        } else {
            handle.consecutive_failures += 1;
        }

        handle.consecutive_failures < self.max_consecutive_failures
    }

    /// Graceful stop, falling back to force-kill, then removal. Every step
    /// swallows errors — the container may already be gone.
    pub async fn stop(&self, handle: &RendererHandle) {
        let graceful = timeout(
            self.stop_grace,
            Command::new("docker")
                .arg("stop")
                .arg("-t")
                .arg(self.stop_grace.as_secs().to_string())
                .arg(&handle.container_name)
                .output(),
        )
        .await;

        if graceful.is_err() {
            log::warn!(
                "renderer {} did not stop gracefully within {:?}; force killing",
                handle.container_name,
                self.stop_grace
            );
            let _ = Command::new("docker")
                .arg("kill")
                .arg(&handle.container_name)
                .output()
                .await;
        }

        let _ = Command::new("docker")
            .arg("rm")
            .arg("-f")
            .arg(&handle.container_name)
            .output()
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_uses_short_node_prefix() {
        let name = RendererSupervisor::container_name("t1", "0123456789abcdef");
        assert_eq!(name, "t1-01234567");
    }
}
