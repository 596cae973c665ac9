// src/renderer/registry.rs
//
// A declarative descriptor registry keyed by task `type`. New renderer
// types are added by registering a descriptor, never by growing a match
// statement or a trait hierarchy (see the dispatch note in the component
// design for the Renderer Supervisor).

use std::collections::BTreeMap;
use std::path::PathBuf;

/// One entry in the registry: everything the supervisor needs to build,
/// launch, and probe a renderer's container for a given task type.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RendererDescriptor {
    pub image: String,
    pub build_context: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Volume templates using the `{repo_root}` placeholder, e.g.
    /// `"{repo_root}/shortlist.json:/data/shortlist.json:ro"`.
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Names of environment variables forwarded from the process
    /// environment into the container. Missing ones are warned, not fatal.
    #[serde(default)]
    pub env_vars: Vec<String>,
    #[serde(default)]
    pub supports_health_endpoint: bool,
}

impl RendererDescriptor {
    pub fn resolve_volumes(&self, repo_root: &std::path::Path) -> Vec<String> {
        let root = repo_root.to_string_lossy();
        self.volumes
            .iter()
            .map(|v| v.replace("{repo_root}", &root))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RendererRegistry {
    descriptors: BTreeMap<String, RendererDescriptor>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: impl Into<String>, descriptor: RendererDescriptor) {
        self.descriptors.insert(task_type.into(), descriptor);
    }

    pub fn resolve(&self, task_type: &str) -> Option<&RendererDescriptor> {
        self.descriptors.get(task_type)
    }

    /// Load an operator-supplied registry file (JSON), merging it over the
    /// built-in defaults — an override for a known type replaces it, new
    /// types are simply added.
    pub fn load_overrides(&mut self, path: &std::path::Path) -> anyhow::Result<()> {
        let bytes = std::fs::read(path)?;
        let overrides: BTreeMap<String, RendererDescriptor> = serde_json::from_slice(&bytes)?;
        for (k, v) in overrides {
            self.descriptors.insert(k, v);
        }
        Ok(())
    }

    /// The built-in defaults, carried forward from the original port/volume
    /// table: each content renderer gets a read-only mount of
    /// `shortlist.json` and a writable output mount; `api` additionally
    /// forwards the four secret names its HTTP backend needs.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();

        let content_volumes = vec![
            "{repo_root}/shortlist.json:/data/shortlist.json:ro".to_string(),
            "{repo_root}/output:/data/output:rw".to_string(),
        ];

        reg.register(
            "audio",
            RendererDescriptor {
                image: "shortlist/renderer-audio:latest".into(),
                build_context: "renderers/audio".into(),
                port: Some(8001),
                volumes: content_volumes.clone(),
                env_vars: vec![],
                supports_health_endpoint: true,
            },
        );
        reg.register(
            "dashboard",
            RendererDescriptor {
                image: "shortlist/renderer-dashboard:latest".into(),
                build_context: "renderers/dashboard".into(),
                port: Some(8000),
                volumes: content_volumes.clone(),
                env_vars: vec![],
                supports_health_endpoint: true,
            },
        );
        reg.register(
            "video",
            RendererDescriptor {
                image: "shortlist/renderer-video:latest".into(),
                build_context: "renderers/video".into(),
                port: Some(8002),
                volumes: content_volumes.clone(),
                env_vars: vec![],
                supports_health_endpoint: true,
            },
        );
        reg.register(
            "web",
            RendererDescriptor {
                image: "shortlist/renderer-web:latest".into(),
                build_context: "renderers/web".into(),
                port: Some(8003),
                volumes: content_volumes.clone(),
                env_vars: vec![],
                supports_health_endpoint: true,
            },
        );
        reg.register(
            "api",
            RendererDescriptor {
                image: "shortlist/renderer-api:latest".into(),
                build_context: "renderers/api".into(),
                port: Some(8004),
                volumes: content_volumes.clone(),
                env_vars: vec![
                    "GIT_AUTH_TOKEN".into(),
                    "GITHUB_REPO".into(),
                    "MAINTAINER_API_TOKEN".into(),
                    "CONTRIBUTOR_API_TOKEN".into(),
                ],
                supports_health_endpoint: true,
            },
        );
        reg.register(
            "admin_ui",
            RendererDescriptor {
                image: "shortlist/renderer-admin-ui:latest".into(),
                build_context: "renderers/admin_ui".into(),
                port: Some(8005),
                volumes: content_volumes,
                env_vars: vec!["MAINTAINER_API_TOKEN".into()],
                supports_health_endpoint: true,
            },
        );

        reg
    }
}
