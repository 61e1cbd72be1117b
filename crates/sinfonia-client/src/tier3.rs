//! Deployment negotiation with the tier-1 directory
//!
//! One [`SinfoniaTier3`] per deployment attempt. It moves from
//! `Uninitialized` to `Fetched` on [`SinfoniaTier3::fetch`] and to `Deployed`
//! on [`SinfoniaTier3::deploy`]. A failed call leaves it where it was.

use crate::config::DeployRequest;
use crate::deployment::CloudletDeployment;
use crate::directory::{DirectoryClient, HttpClient};
use crate::error::DeployError;
use crate::key_cache::KeyCache;
use sinfonia_proto::DirectoryMethod;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Negotiation progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier3State {
    Uninitialized,
    /// Deployments known, none selected
    Fetched,
    /// One deployment selected
    Deployed,
}

/// Coordinator for one application deployment
pub struct SinfoniaTier3 {
    application_name: String,
    uuid: Uuid,
    applications: Vec<String>,
    directory: DirectoryClient,
    key_cache: KeyCache,
    deployments: Vec<CloudletDeployment>,
    deployment: Option<CloudletDeployment>,
    state: Tier3State,
}

impl SinfoniaTier3 {
    /// Fails fast on a malformed directory URL or application UUID
    pub fn new(
        request: &DeployRequest,
        http: Arc<dyn HttpClient>,
        key_cache: KeyCache,
    ) -> Result<Self, DeployError> {
        let directory = DirectoryClient::new(&request.tier1_url, http)?;
        let uuid = Uuid::parse_str(&request.uuid)
            .map_err(|_| DeployError::InvalidDestinationId(request.uuid.clone()))?;

        Ok(Self {
            application_name: request.application_name.clone(),
            uuid,
            applications: request.applications.clone(),
            directory,
            key_cache,
            deployments: Vec::new(),
            deployment: None,
            state: Tier3State::Uninitialized,
        })
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    pub fn state(&self) -> Tier3State {
        self.state
    }

    /// Deployments returned by the last successful call
    pub fn deployments(&self) -> &[CloudletDeployment] {
        &self.deployments
    }

    /// Deployment selected by the last successful [`SinfoniaTier3::deploy`]
    pub fn deployment(&self) -> Option<&CloudletDeployment> {
        self.deployment.as_ref()
    }

    /// Ask which cloudlets already run the application
    ///
    /// An empty answer is not an error.
    pub async fn fetch(&mut self) -> Result<&[CloudletDeployment], DeployError> {
        let deployments = self.request(DirectoryMethod::Query).await?;
        info!(
            "Fetched {} deployments of {}",
            deployments.len(),
            self.application_name
        );

        self.deployments = deployments;
        self.deployment = None;
        self.state = Tier3State::Fetched;
        Ok(&self.deployments)
    }

    /// Ask the directory to deploy the application and select a cloudlet
    ///
    /// The first deployment offered wins.
    pub async fn deploy(&mut self) -> Result<&CloudletDeployment, DeployError> {
        let deployments = self.request(DirectoryMethod::Deploy).await?;
        let Some(selected) = deployments.first().cloned() else {
            info!("No deployment available for {}", self.application_name);
            return Err(DeployError::NoDeploymentAvailable);
        };

        info!(
            "Deployed {} on cloudlet {}",
            self.application_name,
            selected
                .tunnel_config
                .peers
                .first()
                .and_then(|peer| peer.endpoint.as_ref())
                .map(ToString::to_string)
                .unwrap_or_default()
        );

        self.deployments = deployments;
        self.state = Tier3State::Deployed;
        Ok(&*self.deployment.insert(selected))
    }

    async fn request(
        &self,
        method: DirectoryMethod,
    ) -> Result<Vec<CloudletDeployment>, DeployError> {
        let keys = self.key_cache.get_keys(&self.uuid);
        debug!("Requesting {} of {}", method, self.uuid);

        let records = self
            .directory
            .request(method, &self.uuid, keys.public_key())
            .await?;

        records
            .iter()
            .map(|record| CloudletDeployment::from_record(record, &self.applications, &keys))
            .collect()
    }
}

impl std::fmt::Debug for SinfoniaTier3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinfoniaTier3")
            .field("application_name", &self.application_name)
            .field("uuid", &self.uuid)
            .field("state", &self.state)
            .field("deployments", &self.deployments.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::HttpResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use url::Url;

    const SAMPLE: &str = r#"[{
        "UUID": "00000000-0000-0000-0000-000000000000",
        "ApplicationKey": "HUN1dBaBCwl27MO4QayVEJrjBC1zh1thTTYpti7FWSY=",
        "Status": "deployed",
        "DeploymentName": "hello-world",
        "Created": "2023-07-10T14:53:48+00:00",
        "TunnelConfig": {
            "address": ["10.0.0.2/32"],
            "dns": ["10.0.0.1"],
            "publicKey": "HUN1dBaBCwl27MO4QayVEJrjBC1zh1thTTYpti7FWSY=",
            "endpoint": "cloudlet.example.com:51820",
            "allowedIPs": ["0.0.0.0/0"]
        }
    }]"#;

    /// Replies with queued responses, then with the last one
    struct ScriptedHttp {
        responses: Mutex<Vec<HttpResponse>>,
        urls: Mutex<Vec<Url>>,
    }

    impl ScriptedHttp {
        fn new(responses: Vec<HttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                urls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedHttp {
        async fn send(
            &self,
            _method: DirectoryMethod,
            url: &Url,
        ) -> Result<HttpResponse, DeployError> {
            self.urls.lock().unwrap().push(url.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                Ok(responses.remove(0))
            } else {
                Ok(responses[0].clone())
            }
        }
    }

    fn tier3(http: Arc<ScriptedHttp>) -> SinfoniaTier3 {
        SinfoniaTier3::new(&DeployRequest::default(), http, KeyCache::in_memory()).unwrap()
    }

    #[test]
    fn test_construction_fails_fast() {
        let http = ScriptedHttp::new(vec![HttpResponse::new(200, "[]")]);

        let request = DeployRequest {
            tier1_url: "cmu.findcloudlet.org".to_string(),
            ..Default::default()
        };
        let err = SinfoniaTier3::new(&request, http.clone(), KeyCache::in_memory()).unwrap_err();
        assert!(matches!(err, DeployError::InvalidDirectoryUrl(_)));

        let request = DeployRequest {
            uuid: "not-a-uuid".to_string(),
            ..Default::default()
        };
        let err = SinfoniaTier3::new(&request, http, KeyCache::in_memory()).unwrap_err();
        assert_eq!(err, DeployError::InvalidDestinationId("not-a-uuid".to_string()));
    }

    #[tokio::test]
    async fn test_deploy_selects_sample_deployment() {
        let http = ScriptedHttp::new(vec![HttpResponse::new(200, SAMPLE)]);
        let mut tier3 = tier3(http);

        let deployment = tier3.deploy().await.unwrap();
        assert!(deployment.is_deployed());
        assert_eq!(deployment.tunnel_config.peers[0].persistent_keepalive, Some(30));
        assert_eq!(
            deployment.tunnel_config.interface.included_applications,
            vec!["com.android.chrome".to_string()]
        );

        assert_eq!(tier3.state(), Tier3State::Deployed);
        assert_eq!(tier3.deployments().len(), 1);
        assert_eq!(tier3.deployment(), tier3.deployments().first());
    }

    #[tokio::test]
    async fn test_overloaded_directory_leaves_state_untouched() {
        let http = ScriptedHttp::new(vec![HttpResponse::new(503, "")]);
        let mut tier3 = tier3(http);

        let err = tier3.deploy().await.unwrap_err();
        assert_eq!(err, DeployError::DirectoryOverloaded);
        assert!(tier3.deployments().is_empty());
        assert!(tier3.deployment().is_none());
        assert_eq!(tier3.state(), Tier3State::Uninitialized);
    }

    #[tokio::test]
    async fn test_failed_deploy_keeps_previous_fetch() {
        let http = ScriptedHttp::new(vec![
            HttpResponse::new(200, SAMPLE),
            HttpResponse::new(500, ""),
        ]);
        let mut tier3 = tier3(http);

        tier3.fetch().await.unwrap();
        assert_eq!(tier3.deploy().await.unwrap_err(), DeployError::DeploymentUnavailable);
        assert_eq!(tier3.state(), Tier3State::Fetched);
        assert_eq!(tier3.deployments().len(), 1);
        assert!(tier3.deployment().is_none());
    }

    #[tokio::test]
    async fn test_fetch_empty_is_ok() {
        let http = ScriptedHttp::new(vec![HttpResponse::new(200, "[]")]);
        let mut tier3 = tier3(http);

        assert!(tier3.fetch().await.unwrap().is_empty());
        assert_eq!(tier3.state(), Tier3State::Fetched);
    }

    #[tokio::test]
    async fn test_deploy_empty_is_error() {
        let http = ScriptedHttp::new(vec![HttpResponse::new(200, "[]")]);
        let mut tier3 = tier3(http);

        assert_eq!(tier3.deploy().await.unwrap_err(), DeployError::NoDeploymentAvailable);
        assert!(tier3.deployment().is_none());
    }

    #[tokio::test]
    async fn test_fetch_clears_selection() {
        let http = ScriptedHttp::new(vec![HttpResponse::new(200, SAMPLE)]);
        let mut tier3 = tier3(http);

        tier3.deploy().await.unwrap();
        tier3.fetch().await.unwrap();
        assert!(tier3.deployment().is_none());
        assert_eq!(tier3.state(), Tier3State::Fetched);
    }

    #[tokio::test]
    async fn test_requests_reuse_cached_key() {
        let http = ScriptedHttp::new(vec![HttpResponse::new(200, "[]")]);
        let mut tier3 = tier3(http.clone());

        tier3.fetch().await.unwrap();
        tier3.fetch().await.unwrap();

        let urls = http.urls.lock().unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0], urls[1]);
        assert!(urls[0]
            .path()
            .starts_with("/api/v1/deploy/00000000-0000-0000-0000-000000000000/"));
    }
}
